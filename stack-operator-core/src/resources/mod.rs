use std::fmt::Debug;

use kube::core::ObjectMeta;

use crate::{conditions::Conditions, kubernetes::StoreObject};

pub mod annotations;
pub mod crd;
pub mod labels;
pub mod meta;
pub mod ownership;
pub mod workload;

/// Observed state of a managed object.
pub trait ObjectStatus: Default + Clone + Debug + Send + Sync {
    fn conditions(&self) -> &Conditions;
    fn conditions_mut(&mut self) -> &mut Conditions;

    /// Kinds carrying observed fields next to their conditions extend this.
    fn is_dirty(&self, reference: &Self) -> bool {
        self.conditions().is_dirty(reference.conditions())
    }
}

/// A resource with a declared spec, driven by a reconciler.
pub trait ManagedObject: StoreObject {
    type Status: ObjectStatus;

    fn status(&self) -> Option<&Self::Status>;
    fn status_mut(&mut self) -> &mut Self::Status;

    /// Whether a full write is needed, status aside. Kinds whose mutators touch
    /// the spec extend this.
    fn is_dirty(&self, reference: &Self) -> bool {
        metadata_is_dirty(self.meta(), reference.meta())
    }

    fn generation(&self) -> i64 {
        self.meta().generation.unwrap_or_default()
    }
}

pub fn metadata_is_dirty(metadata: &ObjectMeta, reference: &ObjectMeta) -> bool {
    metadata.labels != reference.labels
        || metadata.annotations != reference.annotations
        || metadata.owner_references != reference.owner_references
        || metadata.finalizers != reference.finalizers
}

pub fn status_is_dirty<K: ManagedObject>(object: &K, reference: &K) -> bool {
    let empty = K::Status::default();

    object
        .status()
        .unwrap_or(&empty)
        .is_dirty(reference.status().unwrap_or(&empty))
}
