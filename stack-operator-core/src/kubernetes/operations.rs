//! Idempotent create-or-update of owned objects.
//!
//! [`create_or_update`] fetches the object named by a key (or starts from an
//! empty one), labels it as part of a stack, applies the caller's mutators in
//! order and writes it back only when something actually changed.

use std::collections::BTreeMap;

use kube::Resource;
use log::debug;
use thiserror::Error;

use crate::{
    helpers::pretty_type_name,
    resources::{
        annotations::get_reloader_annotations,
        labels::get_stack_labels,
        ownership::{controller_reference, set_controller_reference},
    },
};

use super::{ObjectKey, ResourceStore, StoreError, StoreObject};

/// A single edit applied to the desired state of an object.
pub type ObjectMutator<'a, K> = Box<dyn FnOnce(&mut K) -> anyhow::Result<()> + Send + 'a>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
    /// The store already held the desired state, nothing was written.
    Unchanged,
}

#[derive(Debug, Error)]
pub enum UpsertError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Mutator(anyhow::Error),
    #[error("Mutators changed the identity of '{}'!", .0)]
    IdentityChanged(ObjectKey),
}

impl UpsertError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, UpsertError::Store(error) if error.is_conflict())
    }
}

pub async fn create_or_update<K, S>(
    store: &S,
    key: &ObjectKey,
    mutators: Vec<ObjectMutator<'_, K>>,
) -> Result<(K, UpsertOutcome), UpsertError>
where
    K: StoreObject + Default,
    S: ResourceStore + ?Sized,
{
    match store.get::<K>(key).await {
        Ok(existing) => {
            let mut desired = existing.clone();
            apply_mutators(key, &mut desired, mutators)?;

            if desired == existing {
                debug!("{} '{key}' is up to date", pretty_type_name::<K>());
                return Ok((existing, UpsertOutcome::Unchanged));
            }

            debug!("Updating {} '{key}'...", pretty_type_name::<K>());
            let updated = store.update(&desired).await?;

            Ok((updated, UpsertOutcome::Updated))
        }
        Err(StoreError::NotFound(_)) => {
            let mut desired = K::default();
            key.stamp(&mut desired);
            apply_mutators(key, &mut desired, mutators)?;

            debug!("Creating {} '{key}'...", pretty_type_name::<K>());
            let created = store.create(&desired).await?;

            Ok((created, UpsertOutcome::Created))
        }
        Err(error) => Err(error.into()),
    }
}

fn apply_mutators<K: StoreObject>(
    key: &ObjectKey,
    object: &mut K,
    mutators: Vec<ObjectMutator<'_, K>>,
) -> Result<(), UpsertError> {
    object
        .meta_mut()
        .labels
        .get_or_insert_with(BTreeMap::new)
        .extend(get_stack_labels());

    for mutator in mutators {
        mutator(object).map_err(UpsertError::Mutator)?;
    }

    match ObjectKey::of(object) {
        Ok(actual) if actual == *key => Ok(()),
        _ => Err(UpsertError::IdentityChanged(key.to_owned())),
    }
}

/// Makes `owner` the controller of the mutated object. The owner has to be
/// persisted already, its uid is what the reference points at.
pub fn with_controller<'a, K, O>(
    owner: &O,
    dynamic_type: &O::DynamicType,
) -> ObjectMutator<'a, K>
where
    K: Resource + 'a,
    O: Resource + 'a,
{
    let reference = controller_reference(owner, dynamic_type);

    Box::new(move |object: &mut K| {
        set_controller_reference(object.meta_mut(), reference?)?;

        Ok(())
    })
}

pub fn with_labels<'a, K: Resource + 'a>(labels: BTreeMap<String, String>) -> ObjectMutator<'a, K> {
    Box::new(move |object: &mut K| {
        object
            .meta_mut()
            .labels
            .get_or_insert_with(BTreeMap::new)
            .extend(labels);

        Ok(())
    })
}

pub fn with_annotations<'a, K: Resource + 'a>(
    annotations: BTreeMap<String, String>,
) -> ObjectMutator<'a, K> {
    Box::new(move |object: &mut K| {
        object
            .meta_mut()
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .extend(annotations);

        Ok(())
    })
}

/// Restarts workloads mounting the object whenever it changes.
pub fn with_reloader_annotations<'a, K: Resource + 'a>() -> ObjectMutator<'a, K> {
    with_annotations(get_reloader_annotations())
}

pub fn with_mutation<'a, K, F>(mutation: F) -> ObjectMutator<'a, K>
where
    F: FnOnce(&mut K) -> anyhow::Result<()> + Send + 'a,
{
    Box::new(mutation)
}
