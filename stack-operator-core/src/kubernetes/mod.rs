use std::{borrow::Cow, fmt::Debug, fmt::Display};

use async_trait::async_trait;
use k8s_openapi::serde::{de::DeserializeOwned, Serialize};
use kube::Resource;
use thiserror::Error;

use crate::helpers::RequireMetadata;

pub mod memory;
pub mod operations;
pub mod store;

/// Anything the store can persist: a statically typed resource with a value
/// equality used to skip no-op writes.
pub trait StoreObject:
    Resource<DynamicType = ()>
    + Clone
    + Debug
    + PartialEq
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<T> StoreObject for T where
    T: Resource<DynamicType = ()>
        + Clone
        + Debug
        + PartialEq
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// Identity of an object: cluster scoped objects have no namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn namespaced(namespace: &str, name: &str) -> Self {
        Self {
            namespace: Some(namespace.to_owned()),
            name: name.to_owned(),
        }
    }

    pub fn cluster(name: &str) -> Self {
        Self {
            namespace: None,
            name: name.to_owned(),
        }
    }

    pub fn of<K: Resource>(object: &K) -> Result<Self, StoreError> {
        let name = object.require_name_or_else(|| StoreError::MissingMetadata("name".into()))?;

        Ok(Self {
            namespace: object.meta().namespace.to_owned(),
            name: name.to_owned(),
        })
    }

    pub fn stamp<K: Resource>(&self, object: &mut K) {
        let metadata = object.meta_mut();
        metadata.name = Some(self.name.to_owned());
        metadata.namespace = self.namespace.to_owned();
    }
}

impl Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{namespace}/{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("'{}' doesn't exist!", .0)]
    NotFound(ObjectKey),
    #[error("'{}' already exists!", .0)]
    AlreadyExists(ObjectKey),
    #[error("'{}' has been modified in the meantime!", .0)]
    Conflict(ObjectKey),
    #[error("Object is missing metadata ({})!", .0)]
    MissingMetadata(Cow<'static, str>),
    #[error("Couldn't convert the object! Reason: {}", .0)]
    Serialization(#[from] serde_json::Error),
    #[error("Store is unavailable! Reason: {}", .0)]
    Unavailable(Cow<'static, str>),
    #[error("Kubernetes API call failed! Reason: {}", .0)]
    KubeApi(kube::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

/// Typed access to the backing object store. Every write carries the
/// object's resource version and fails with [`StoreError::Conflict`] when it
/// is stale.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get<K: StoreObject>(&self, key: &ObjectKey) -> Result<K, StoreError>;
    async fn create<K: StoreObject>(&self, object: &K) -> Result<K, StoreError>;
    /// Writes everything but the status.
    async fn update<K: StoreObject>(&self, object: &K) -> Result<K, StoreError>;
    /// Writes only the status.
    async fn update_status<K: StoreObject>(&self, object: &K) -> Result<K, StoreError>;
    async fn list<K: StoreObject>(
        &self,
        namespace: Option<&str>,
        label_selector: &str,
    ) -> Result<Vec<K>, StoreError>;
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::ConfigMap;

    use super::*;

    #[test]
    fn key_display_includes_namespace_when_present() {
        assert_eq!(ObjectKey::namespaced("acme", "settings").to_string(), "acme/settings");
        assert_eq!(ObjectKey::cluster("acme").to_string(), "acme");
    }

    #[test]
    fn key_round_trips_through_stamp() {
        let key = ObjectKey::namespaced("acme", "settings");
        let mut config_map = ConfigMap::default();

        key.stamp(&mut config_map);

        assert_eq!(ObjectKey::of(&config_map).unwrap(), key);
    }

    #[test]
    fn key_requires_name() {
        let result = ObjectKey::of(&ConfigMap::default());

        assert!(matches!(result, Err(StoreError::MissingMetadata(_))));
    }
}
