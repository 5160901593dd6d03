//! In-process [`ResourceStore`] with the write semantics of the API server:
//! uids, resource versions and generations are assigned by the store, stale
//! writes conflict, and status is only written through the status path.

use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use kube::core::ObjectMeta;
use serde_json::Value;

use super::{ObjectKey, ResourceStore, StoreError, StoreObject};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteVerb {
    Create,
    Update,
    UpdateStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub verb: WriteVerb,
    pub kind: String,
    pub key: ObjectKey,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    objects: BTreeMap<(String, ObjectKey), Value>,
    journal: Vec<WriteRecord>,
    next_failure: Option<StoreError>,
    last_version: u64,
}

impl MemoryState {
    fn next_version(&mut self) -> String {
        self.last_version += 1;
        self.last_version.to_string()
    }

    fn take_failure(&mut self) -> Result<(), StoreError> {
        match self.next_failure.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn record(&mut self, verb: WriteVerb, kind: &str, key: &ObjectKey) {
        self.journal.push(WriteRecord {
            verb,
            kind: kind.to_owned(),
            key: key.to_owned(),
        });
    }

    fn stored(&self, kind: &str, key: &ObjectKey) -> Result<Value, StoreError> {
        self.objects
            .get(&(kind.to_owned(), key.to_owned()))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_owned()))
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every successful write since creation or the last [`Self::clear_writes`].
    pub fn writes(&self) -> Vec<WriteRecord> {
        self.lock().journal.clone()
    }

    pub fn clear_writes(&self) {
        self.lock().journal.clear();
    }

    /// Makes the next write (create, update or status update) fail.
    pub fn fail_next_write(&self, error: StoreError) {
        self.lock().next_failure = Some(error);
    }

    /// Deletes an object behind the back of its readers.
    pub fn remove<K: StoreObject>(&self, key: &ObjectKey) -> bool {
        self.lock()
            .objects
            .remove(&(kind_of::<K>(), key.to_owned()))
            .is_some()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get<K: StoreObject>(&self, key: &ObjectKey) -> Result<K, StoreError> {
        let stored = self.lock().stored(&kind_of::<K>(), key)?;

        Ok(serde_json::from_value(stored)?)
    }

    async fn create<K: StoreObject>(&self, object: &K) -> Result<K, StoreError> {
        let key = ObjectKey::of(object)?;
        let kind = kind_of::<K>();
        let mut state = self.lock();
        state.take_failure()?;

        if state.objects.contains_key(&(kind.to_owned(), key.to_owned())) {
            return Err(StoreError::AlreadyExists(key));
        }

        let version = state.next_version();
        let mut created = object.clone();
        let metadata = created.meta_mut();
        metadata.uid = Some(format!("00000000-0000-0000-0000-{version:0>12}"));
        metadata.resource_version = Some(version);
        metadata.generation = Some(1);

        let value = to_typed_value(&created)?;
        state.objects.insert((kind.to_owned(), key.to_owned()), value.clone());
        state.record(WriteVerb::Create, &kind, &key);

        Ok(serde_json::from_value(value)?)
    }

    async fn update<K: StoreObject>(&self, object: &K) -> Result<K, StoreError> {
        let key = ObjectKey::of(object)?;
        let kind = kind_of::<K>();
        let mut state = self.lock();
        state.take_failure()?;

        let stored = state.stored(&kind, &key)?;
        let stored_metadata = metadata_of(&stored)?;
        ensure_fresh(&key, object.meta(), &stored_metadata)?;

        let mut value = to_typed_value(object)?;
        let spec_changed = value.get("spec") != stored.get("spec");
        let generation = stored_metadata.generation.unwrap_or(1);

        let mut updated: K = {
            copy_field(&mut value, &stored, "status");
            serde_json::from_value(value)?
        };
        let metadata = updated.meta_mut();
        metadata.uid = stored_metadata.uid;
        metadata.resource_version = Some(state.next_version());
        metadata.generation = Some(if spec_changed { generation + 1 } else { generation });

        let value = to_typed_value(&updated)?;
        state.objects.insert((kind.to_owned(), key.to_owned()), value.clone());
        state.record(WriteVerb::Update, &kind, &key);

        Ok(serde_json::from_value(value)?)
    }

    async fn update_status<K: StoreObject>(&self, object: &K) -> Result<K, StoreError> {
        let key = ObjectKey::of(object)?;
        let kind = kind_of::<K>();
        let mut state = self.lock();
        state.take_failure()?;

        let mut stored = state.stored(&kind, &key)?;
        ensure_fresh(&key, object.meta(), &metadata_of(&stored)?)?;

        copy_field(&mut stored, &to_typed_value(object)?, "status");
        let mut updated: K = serde_json::from_value(stored)?;
        updated.meta_mut().resource_version = Some(state.next_version());

        let value = to_typed_value(&updated)?;
        state.objects.insert((kind.to_owned(), key.to_owned()), value.clone());
        state.record(WriteVerb::UpdateStatus, &kind, &key);

        Ok(serde_json::from_value(value)?)
    }

    async fn list<K: StoreObject>(
        &self,
        namespace: Option<&str>,
        label_selector: &str,
    ) -> Result<Vec<K>, StoreError> {
        let kind = kind_of::<K>();
        let state = self.lock();

        state
            .objects
            .iter()
            .filter(|((object_kind, key), _)| {
                *object_kind == kind
                    && namespace.map_or(true, |namespace| key.namespace.as_deref() == Some(namespace))
            })
            .map(|(_, value)| serde_json::from_value::<K>(value.clone()).map_err(StoreError::from))
            .filter(|object| match object {
                Ok(object) => selector_matches(label_selector, object.meta().labels.as_ref()),
                Err(_) => true,
            })
            .collect()
    }
}

fn kind_of<K: StoreObject>() -> String {
    format!("{}/{}", K::api_version(&()), K::kind(&()))
}

fn to_typed_value<K: StoreObject>(object: &K) -> Result<Value, StoreError> {
    let mut value = serde_json::to_value(object)?;

    if let Some(fields) = value.as_object_mut() {
        fields.insert("apiVersion".to_owned(), K::api_version(&()).into_owned().into());
        fields.insert("kind".to_owned(), K::kind(&()).into_owned().into());
    }

    Ok(value)
}

fn metadata_of(value: &Value) -> Result<ObjectMeta, StoreError> {
    let metadata = value.get("metadata").cloned().unwrap_or_default();

    Ok(serde_json::from_value(metadata)?)
}

fn copy_field(target: &mut Value, source: &Value, field: &str) {
    if let Some(fields) = target.as_object_mut() {
        match source.get(field) {
            Some(value) => fields.insert(field.to_owned(), value.clone()),
            None => fields.remove(field),
        };
    }
}

fn ensure_fresh(
    key: &ObjectKey,
    written: &ObjectMeta,
    stored: &ObjectMeta,
) -> Result<(), StoreError> {
    if written.resource_version.is_some() && written.resource_version == stored.resource_version {
        Ok(())
    } else {
        Err(StoreError::Conflict(key.to_owned()))
    }
}

/// Equality (`key=value`) and existence (`key`) requirements joined by commas.
fn selector_matches(selector: &str, labels: Option<&BTreeMap<String, String>>) -> bool {
    selector
        .split(',')
        .map(str::trim)
        .filter(|requirement| !requirement.is_empty())
        .all(|requirement| match requirement.split_once('=') {
            Some((key, value)) => {
                labels.and_then(|labels| labels.get(key.trim())) == Some(&value.trim().to_owned())
            }
            None => labels.is_some_and(|labels| labels.contains_key(requirement)),
        })
}
