use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{core::ObjectMeta, Resource};
use thiserror::Error;

use crate::helpers::pretty_type_name;

#[derive(Debug, Error)]
pub enum OwnershipError {
    #[error("{} owner is missing a name or an uid, it has to be persisted first!", .0)]
    MissingOwnerMetadata(&'static str),
    #[error("Object is already controlled by {} '{}'!", .0, .1)]
    AlreadyOwned(String, String),
}

/// Builds the controlling owner reference pointing at `owner`. The dynamic
/// type resolves the owner's kind and api version. Deleting the owner in the
/// foreground waits for the controlled object.
pub fn controller_reference<O: Resource>(
    owner: &O,
    dynamic_type: &O::DynamicType,
) -> Result<OwnerReference, OwnershipError> {
    let reference = owner
        .controller_owner_ref(dynamic_type)
        .ok_or(OwnershipError::MissingOwnerMetadata(pretty_type_name::<O>()))?;

    Ok(OwnerReference {
        block_owner_deletion: Some(true),
        ..reference
    })
}

pub fn get_controller_of(metadata: &ObjectMeta) -> Option<&OwnerReference> {
    metadata
        .owner_references
        .as_deref()
        .unwrap_or_default()
        .iter()
        .find(|reference| reference.controller == Some(true))
}

pub fn is_controlled_by(metadata: &ObjectMeta, owner_uid: &str) -> bool {
    get_controller_of(metadata).is_some_and(|controller| controller.uid == owner_uid)
}

/// Makes `owner` the controller of the object described by `metadata`.
/// Already being controlled by the same owner (by uid) leaves the metadata
/// untouched.
pub fn set_controller_reference(
    metadata: &mut ObjectMeta,
    owner: OwnerReference,
) -> Result<(), OwnershipError> {
    if let Some(controller) = get_controller_of(metadata) {
        if controller.uid == owner.uid {
            return Ok(());
        }

        return Err(OwnershipError::AlreadyOwned(
            controller.kind.to_owned(),
            controller.name.to_owned(),
        ));
    }

    let references = metadata.owner_references.get_or_insert_with(Vec::new);
    references.retain(|reference| reference.uid != owner.uid);
    references.push(OwnerReference {
        controller: Some(true),
        ..owner
    });

    Ok(())
}
