use async_trait::async_trait;
use kube::{
    api::{ApiResource, DynamicObject, ListParams, PostParams},
    Api, Client,
};
use log::debug;

use crate::helpers::{pretty_type_name, AndIf};

use super::{ObjectKey, ResourceStore, StoreError, StoreObject};

/// [`ResourceStore`] backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    field_manager: String,
}

impl KubeStore {
    pub fn new(client: Client, field_manager: &str) -> Self {
        Self {
            client,
            field_manager: field_manager.to_owned(),
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn api<K: StoreObject>(&self, namespace: Option<&str>) -> Api<DynamicObject> {
        let resource = ApiResource::erase::<K>(&());

        match namespace {
            Some(namespace) => Api::namespaced_with(self.client.clone(), namespace, &resource),
            None => Api::all_with(self.client.clone(), &resource),
        }
    }

    fn post_params(&self) -> PostParams {
        PostParams {
            field_manager: Some(self.field_manager.to_owned()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn get<K: StoreObject>(&self, key: &ObjectKey) -> Result<K, StoreError> {
        let object = self
            .api::<K>(key.namespace.as_deref())
            .get(&key.name)
            .await
            .map_err(|error| map_kube_error(key, error))?;

        from_dynamic(object)
    }

    async fn create<K: StoreObject>(&self, object: &K) -> Result<K, StoreError> {
        let key = ObjectKey::of(object)?;
        debug!("Creating {} '{key}'...", pretty_type_name::<K>());

        let created = self
            .api::<K>(key.namespace.as_deref())
            .create(&self.post_params(), &to_dynamic(object)?)
            .await
            .map_err(|error| map_kube_error(&key, error))?;

        from_dynamic(created)
    }

    async fn update<K: StoreObject>(&self, object: &K) -> Result<K, StoreError> {
        let key = ObjectKey::of(object)?;
        debug!("Updating {} '{key}'...", pretty_type_name::<K>());

        let updated = self
            .api::<K>(key.namespace.as_deref())
            .replace(&key.name, &self.post_params(), &to_dynamic(object)?)
            .await
            .map_err(|error| map_kube_error(&key, error))?;

        from_dynamic(updated)
    }

    async fn update_status<K: StoreObject>(&self, object: &K) -> Result<K, StoreError> {
        let key = ObjectKey::of(object)?;
        debug!("Updating {} '{key}' status...", pretty_type_name::<K>());

        let updated = self
            .api::<K>(key.namespace.as_deref())
            .replace_status(&key.name, &self.post_params(), serde_json::to_vec(object)?)
            .await
            .map_err(|error| map_kube_error(&key, error))?;

        from_dynamic(updated)
    }

    async fn list<K: StoreObject>(
        &self,
        namespace: Option<&str>,
        label_selector: &str,
    ) -> Result<Vec<K>, StoreError> {
        let params = ListParams::default()
            .and_if(!label_selector.is_empty(), |params| params.labels(label_selector));

        self.api::<K>(namespace)
            .list(&params)
            .await
            .map_err(StoreError::KubeApi)?
            .items
            .into_iter()
            .map(from_dynamic)
            .collect()
    }
}

fn to_dynamic<K: StoreObject>(object: &K) -> Result<DynamicObject, StoreError> {
    let mut dynamic: DynamicObject = serde_json::from_value(serde_json::to_value(object)?)?;
    dynamic.types.get_or_insert_with(|| kube::core::TypeMeta {
        api_version: K::api_version(&()).into_owned(),
        kind: K::kind(&()).into_owned(),
    });

    Ok(dynamic)
}

fn from_dynamic<K: StoreObject>(object: DynamicObject) -> Result<K, StoreError> {
    Ok(serde_json::from_value(serde_json::to_value(object)?)?)
}

fn map_kube_error(key: &ObjectKey, error: kube::Error) -> StoreError {
    match &error {
        kube::Error::Api(response) if response.code == 404 => StoreError::NotFound(key.to_owned()),
        kube::Error::Api(response) if response.code == 409 && response.reason == "AlreadyExists" => {
            StoreError::AlreadyExists(key.to_owned())
        }
        kube::Error::Api(response) if response.code == 409 => StoreError::Conflict(key.to_owned()),
        _ => StoreError::KubeApi(error),
    }
}
