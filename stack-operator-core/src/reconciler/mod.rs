//! The control loop driving a single kind.
//!
//! One pass fetches the object, lets a [`Mutator`] work on a copy of it,
//! records the outcome as conditions and persists only what changed. Mutation
//! failures (panics included) end up in the Error condition and complete the
//! pass, store failures are returned to the caller for a retry with backoff.

use std::{
    collections::HashMap,
    marker::PhantomData,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use kube::{api::ApiResource, runtime::controller::Action};
use log::{debug, warn};

use crate::{
    conditions::{ConditionsExt, CONDITION_TYPE_ERROR},
    helpers::pretty_type_name,
    kubernetes::{ObjectKey, ResourceStore, StoreError},
    resources::{status_is_dirty, ManagedObject},
};

use self::{
    error::{MutationError, ReconcilerError},
    panic::catch_panic,
};

pub mod error;
pub mod panic;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    Immediately,
    After(Duration),
}

/// Shortest delay handed to the scheduler for an immediate requeue.
pub const MIN_REQUEUE_DELAY: Duration = Duration::from_millis(100);

impl Requeue {
    /// No hint leaves the next pass to the watch on the object. An immediate
    /// requeue still waits `backoff`, never less than [`MIN_REQUEUE_DELAY`].
    pub fn into_action(requeue: Option<Requeue>, backoff: Duration) -> Action {
        match requeue {
            Some(Requeue::Immediately) => Action::requeue(backoff.max(MIN_REQUEUE_DELAY)),
            Some(Requeue::After(delay)) => Action::requeue(delay),
            None => Action::await_change(),
        }
    }
}

/// Exponential delay for objects asking to be requeued immediately over and
/// over. Tracked per object and forgotten as soon as a pass returns any other
/// hint.
pub struct RequeueBackoff {
    base: Duration,
    max: Duration,
    attempts: Mutex<HashMap<ObjectKey, u32>>,
}

impl RequeueBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        let base = base.max(MIN_REQUEUE_DELAY);

        Self {
            base,
            max: max.max(base),
            attempts: Mutex::default(),
        }
    }

    pub fn action(&self, key: &ObjectKey, requeue: Option<Requeue>) -> Action {
        let mut attempts = self.attempts.lock().unwrap_or_else(PoisonError::into_inner);

        match requeue {
            Some(Requeue::Immediately) => {
                let attempt = attempts.entry(key.to_owned()).or_default();
                let delay = self.delay(*attempt);
                *attempt = attempt.saturating_add(1);

                debug!("Requeueing '{key}' in {delay:?} (attempt {attempt})");
                Requeue::into_action(requeue, delay)
            }
            _ => {
                attempts.remove(key);
                Requeue::into_action(requeue, self.base)
            }
        }
    }

    fn delay(&self, attempt: u32) -> Duration {
        self.base
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max)
    }
}

pub type MutationResult = Result<Option<Requeue>, MutationError>;

/// Kind specific business logic bringing an object to its desired state.
///
/// The mutator works on a private copy of the object: it may change its
/// metadata and status freely, create or update children and return a
/// requeue hint. Calling it again with an unchanged object must not produce
/// any further writes.
#[async_trait]
pub trait Mutator<K: ManagedObject>: Send + Sync {
    async fn mutate(&self, object: &mut K) -> MutationResult;

    /// Kinds whose changes should trigger a pass of their controller.
    fn owned_kinds(&self) -> Vec<ApiResource> {
        Vec::new()
    }
}

pub struct Reconciler<K, M, S: ?Sized> {
    store: Arc<S>,
    mutator: M,
    pass_timeout: Option<Duration>,
    kind: PhantomData<fn() -> K>,
}

impl<K, M, S> Reconciler<K, M, S>
where
    K: ManagedObject,
    M: Mutator<K>,
    S: ResourceStore + ?Sized,
{
    pub fn new(store: Arc<S>, mutator: M) -> Self {
        Self {
            store,
            mutator,
            pass_timeout: None,
            kind: PhantomData,
        }
    }

    /// Abandons passes running longer than `timeout`, in-flight store calls
    /// included.
    pub fn with_pass_timeout(self, timeout: Option<Duration>) -> Self {
        Self {
            pass_timeout: timeout,
            ..self
        }
    }

    pub fn mutator(&self) -> &M {
        &self.mutator
    }

    pub async fn reconcile(&self, key: &ObjectKey) -> Result<Option<Requeue>, ReconcilerError> {
        match self.pass_timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.reconcile_pass(key))
                .await
                .map_err(|_| ReconcilerError::DeadlineExceeded(key.to_owned(), timeout))?,
            None => self.reconcile_pass(key).await,
        }
    }

    async fn reconcile_pass(&self, key: &ObjectKey) -> Result<Option<Requeue>, ReconcilerError> {
        let actual = match self.store.get::<K>(key).await {
            Ok(object) => object,
            Err(StoreError::NotFound(_)) => {
                debug!("{} '{key}' is gone, skipping", pretty_type_name::<K>());
                return Ok(None);
            }
            Err(error) => return Err(ReconcilerError::Fetch(key.to_owned(), error)),
        };

        let mut updated = actual.clone();
        let outcome = catch_panic(self.mutator.mutate(&mut updated))
            .await
            .unwrap_or_else(|recovered| Err(recovered.into()));

        let requeue = match outcome {
            Ok(requeue) => {
                updated.remove_condition(CONDITION_TYPE_ERROR);
                requeue
            }
            Err(error) => {
                warn!("{} '{key}' mutation failed: {error}", pretty_type_name::<K>());
                updated.set_error(&error);
                error.requeue_hint()
            }
        };

        self.persist(key, &actual, updated).await?;

        Ok(requeue)
    }

    async fn persist(&self, key: &ObjectKey, actual: &K, updated: K) -> Result<(), ReconcilerError> {
        let persist_error = |error| ReconcilerError::Persist(key.to_owned(), error);
        let status_dirty = status_is_dirty(&updated, actual);

        if ManagedObject::is_dirty(&updated, actual) {
            let status = updated.status().cloned();
            let mut written = self.store.update(&updated).await.map_err(persist_error)?;

            if let (true, Some(status)) = (status_dirty, status) {
                *written.status_mut() = status;
                self.store
                    .update_status(&written)
                    .await
                    .map_err(persist_error)?;
            }
        } else if status_dirty {
            self.store
                .update_status(&updated)
                .await
                .map_err(persist_error)?;
        } else {
            debug!("{} '{key}' is up to date", pretty_type_name::<K>());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::BTreeMap,
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
        time::Duration,
    };

    use anyhow::anyhow;
    use k8s_openapi::api::core::v1::ConfigMap;

    use crate::{
        conditions::{
            ConditionStatus, ConditionsExt, CONDITION_TYPE_ERROR, CONDITION_TYPE_READY,
        },
        kubernetes::{
            memory::{MemoryStore, WriteVerb},
            operations::{create_or_update, with_controller, with_mutation},
            ObjectKey, ResourceStore, StoreError,
        },
        resources::{
            crd::v1beta1::stack::{Stack, StackSpec},
            labels::has_stack_label,
            ownership::is_controlled_by,
        },
    };

    use super::*;

    struct SettingsMutator {
        store: Arc<MemoryStore>,
        failing: AtomicBool,
    }

    impl SettingsMutator {
        fn new(store: Arc<MemoryStore>) -> Self {
            Self {
                store,
                failing: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl Mutator<Stack> for SettingsMutator {
        async fn mutate(&self, stack: &mut Stack) -> MutationResult {
            if self.failing.load(Ordering::SeqCst) {
                return Err(MutationError::new(anyhow!("Configuration object not found")));
            }

            let host = stack.spec.host.to_owned();
            create_or_update(
                self.store.as_ref(),
                &ObjectKey::namespaced("acme", "acme-settings"),
                vec![
                    with_controller(&*stack, &()),
                    with_mutation(move |config_map: &mut ConfigMap| {
                        config_map.data = Some(BTreeMap::from([("HOST".to_owned(), host)]));
                        Ok(())
                    }),
                ],
            )
            .await
            .map_err(|error| MutationError::requeue(error, Requeue::Immediately))?;

            stack.set_ready();

            Ok(None)
        }
    }

    struct PanickingMutator;

    #[async_trait]
    impl Mutator<Stack> for PanickingMutator {
        async fn mutate(&self, stack: &mut Stack) -> MutationResult {
            let version = stack.spec.version.as_deref();
            panic!("stack has no version: {version:?}");
        }
    }

    struct StallingMutator;

    #[async_trait]
    impl Mutator<Stack> for StallingMutator {
        async fn mutate(&self, _stack: &mut Stack) -> MutationResult {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(None)
        }
    }

    /// Records the host it served on the stack itself.
    struct AnnotatingMutator;

    #[async_trait]
    impl Mutator<Stack> for AnnotatingMutator {
        async fn mutate(&self, stack: &mut Stack) -> MutationResult {
            let host = stack.spec.host.to_owned();
            stack
                .metadata
                .annotations
                .get_or_insert_with(BTreeMap::new)
                .insert("stack.formance.com/served-host".to_owned(), host);
            stack.set_ready();

            Ok(None)
        }
    }

    /// Updates the stack behind the reconciler's back while it is mutating.
    struct RacingMutator {
        store: Arc<MemoryStore>,
    }

    #[async_trait]
    impl Mutator<Stack> for RacingMutator {
        async fn mutate(&self, stack: &mut Stack) -> MutationResult {
            let mut concurrent = stack.clone();
            concurrent.spec.debug = true;
            self.store.update(&concurrent).await.map_err(MutationError::new)?;

            stack.set_ready();

            Ok(None)
        }
    }

    async fn seeded_store() -> (Arc<MemoryStore>, ObjectKey) {
        let store = Arc::new(MemoryStore::new());
        let mut stack = Stack::new("acme", StackSpec::default());
        stack.spec.host = "acme.example.com".to_owned();
        store.create(&stack).await.unwrap();
        store.clear_writes();

        (store, ObjectKey::cluster("acme"))
    }

    fn settings_reconciler(
        store: &Arc<MemoryStore>,
    ) -> Reconciler<Stack, SettingsMutator, MemoryStore> {
        Reconciler::new(store.clone(), SettingsMutator::new(store.clone()))
    }

    async fn stored_stack(store: &MemoryStore, key: &ObjectKey) -> Stack {
        store.get::<Stack>(key).await.unwrap()
    }

    #[tokio::test]
    async fn creates_owned_child_and_converges() {
        let (store, key) = seeded_store().await;
        let reconciler = settings_reconciler(&store);

        let requeue = reconciler.reconcile(&key).await.unwrap();

        assert_eq!(requeue, None);
        let verbs: Vec<WriteVerb> = store.writes().iter().map(|write| write.verb).collect();
        assert_eq!(verbs, vec![WriteVerb::Create, WriteVerb::UpdateStatus]);

        let stack = stored_stack(&store, &key).await;
        let settings: ConfigMap = store
            .get(&ObjectKey::namespaced("acme", "acme-settings"))
            .await
            .unwrap();
        assert!(has_stack_label(settings.metadata.labels.as_ref()));
        assert!(is_controlled_by(
            &settings.metadata,
            stack.metadata.uid.as_deref().unwrap()
        ));
        assert_eq!(stack.condition_status(CONDITION_TYPE_READY), ConditionStatus::True);

        store.clear_writes();
        reconciler.reconcile(&key).await.unwrap();

        assert!(store.writes().is_empty());
    }

    #[tokio::test]
    async fn metadata_and_status_changes_are_both_persisted() {
        let (store, key) = seeded_store().await;
        let reconciler: Reconciler<Stack, _, _> = Reconciler::new(store.clone(), AnnotatingMutator);

        reconciler.reconcile(&key).await.unwrap();

        let verbs: Vec<WriteVerb> = store.writes().iter().map(|write| write.verb).collect();
        assert_eq!(verbs, vec![WriteVerb::Update, WriteVerb::UpdateStatus]);

        let stack = stored_stack(&store, &key).await;
        assert_eq!(
            stack
                .metadata
                .annotations
                .as_ref()
                .and_then(|annotations| annotations.get("stack.formance.com/served-host"))
                .map(String::as_str),
            Some("acme.example.com")
        );
        assert_eq!(stack.condition_status(CONDITION_TYPE_READY), ConditionStatus::True);

        store.clear_writes();
        reconciler.reconcile(&key).await.unwrap();

        assert!(store.writes().is_empty());
    }

    #[tokio::test]
    async fn mutation_error_is_recorded_then_cleared() {
        let (store, key) = seeded_store().await;
        let mut stack = stored_stack(&store, &key).await;
        stack.spec.debug = true;
        store.update(&stack).await.unwrap();

        let reconciler = settings_reconciler(&store);
        reconciler.mutator().failing.store(true, Ordering::SeqCst);

        let requeue = reconciler.reconcile(&key).await.unwrap();

        assert_eq!(requeue, None);
        let stack = stored_stack(&store, &key).await;
        let error = stack.condition(CONDITION_TYPE_ERROR).cloned().unwrap();
        assert_eq!(error.status, ConditionStatus::True);
        assert_eq!(error.observed_generation, 2);
        assert_eq!(error.message, "Configuration object not found");

        reconciler.mutator().failing.store(false, Ordering::SeqCst);
        reconciler.reconcile(&key).await.unwrap();

        let stack = stored_stack(&store, &key).await;
        assert_eq!(stack.condition_status(CONDITION_TYPE_ERROR), ConditionStatus::Unknown);
        assert_eq!(stack.condition_status(CONDITION_TYPE_READY), ConditionStatus::True);
        assert_eq!(
            stack.condition(CONDITION_TYPE_READY).map(|c| c.observed_generation),
            Some(2)
        );
    }

    #[tokio::test]
    async fn missing_object_is_skipped() {
        let store = Arc::new(MemoryStore::new());
        let reconciler = settings_reconciler(&store);

        let requeue = reconciler.reconcile(&ObjectKey::cluster("gone")).await.unwrap();

        assert_eq!(requeue, None);
        assert!(store.writes().is_empty());
    }

    #[tokio::test]
    async fn panicking_mutator_is_contained() {
        let (store, key) = seeded_store().await;
        let reconciler: Reconciler<Stack, _, _> = Reconciler::new(store.clone(), PanickingMutator);

        let requeue = reconciler.reconcile(&key).await.unwrap();

        assert_eq!(requeue, None);
        let stack = stored_stack(&store, &key).await;
        let error = stack.condition(CONDITION_TYPE_ERROR).cloned().unwrap();
        assert!(error.message.contains("stack has no version"));
    }

    #[tokio::test]
    async fn stale_write_surfaces_as_conflict() {
        let (store, key) = seeded_store().await;
        let reconciler: Reconciler<Stack, _, _> = Reconciler::new(
            store.clone(),
            RacingMutator {
                store: store.clone(),
            },
        );

        let result = reconciler.reconcile(&key).await;

        assert!(matches!(&result, Err(error) if error.is_conflict()));
        assert_eq!(
            stored_stack(&store, &key).await.condition_status(CONDITION_TYPE_READY),
            ConditionStatus::Unknown
        );
    }

    #[tokio::test]
    async fn store_failure_while_persisting_is_returned() {
        let (store, key) = seeded_store().await;
        let reconciler = settings_reconciler(&store);
        reconciler.mutator().failing.store(true, Ordering::SeqCst);
        store.fail_next_write(StoreError::Unavailable("etcd is down".into()));

        let result = reconciler.reconcile(&key).await;

        assert!(matches!(
            result,
            Err(ReconcilerError::Persist(_, StoreError::Unavailable(_)))
        ));
    }

    #[tokio::test]
    async fn pass_exceeding_deadline_is_abandoned() {
        let (store, key) = seeded_store().await;
        let reconciler: Reconciler<Stack, _, _> = Reconciler::new(store.clone(), StallingMutator)
            .with_pass_timeout(Some(Duration::from_millis(20)));

        let result = reconciler.reconcile(&key).await;

        assert!(matches!(result, Err(ReconcilerError::DeadlineExceeded(_, _))));
        assert!(store.writes().is_empty());
    }

    #[tokio::test]
    async fn requeue_hint_of_failed_mutation_is_returned() {
        let (store, key) = seeded_store().await;
        let reconciler = settings_reconciler(&store);
        store.fail_next_write(StoreError::Unavailable("etcd is down".into()));

        let requeue = reconciler.reconcile(&key).await.unwrap();

        assert_eq!(requeue, Some(Requeue::Immediately));
        let stack = stored_stack(&store, &key).await;
        assert_eq!(stack.condition_status(CONDITION_TYPE_ERROR), ConditionStatus::True);
    }

    #[test]
    fn requeue_hints_map_to_controller_actions() {
        let backoff = Duration::from_secs(1);

        assert_eq!(
            Requeue::into_action(Some(Requeue::After(Duration::from_secs(3))), backoff),
            Action::requeue(Duration::from_secs(3))
        );
        assert_eq!(
            Requeue::into_action(Some(Requeue::Immediately), backoff),
            Action::requeue(backoff)
        );
        assert_eq!(
            Requeue::into_action(Some(Requeue::Immediately), Duration::ZERO),
            Action::requeue(MIN_REQUEUE_DELAY)
        );
        assert_eq!(Requeue::into_action(None, backoff), Action::await_change());
    }

    #[test]
    fn repeated_immediate_requeues_back_off() {
        let backoff = RequeueBackoff::new(Duration::from_secs(1), Duration::from_secs(5));
        let acme = ObjectKey::cluster("acme");
        let other = ObjectKey::cluster("other");

        let delays: Vec<Action> = (0..5)
            .map(|_| backoff.action(&acme, Some(Requeue::Immediately)))
            .collect();

        assert_eq!(
            delays,
            [1u64, 2, 4, 5, 5]
                .map(|secs| Action::requeue(Duration::from_secs(secs)))
                .to_vec()
        );
        assert_eq!(
            backoff.action(&other, Some(Requeue::Immediately)),
            Action::requeue(Duration::from_secs(1))
        );

        assert_eq!(backoff.action(&acme, None), Action::await_change());
        assert_eq!(
            backoff.action(&acme, Some(Requeue::Immediately)),
            Action::requeue(Duration::from_secs(1))
        );
    }

    #[test]
    fn zero_backoff_is_raised_to_minimum() {
        let backoff = RequeueBackoff::new(Duration::ZERO, Duration::ZERO);

        assert_eq!(
            backoff.action(&ObjectKey::cluster("acme"), Some(Requeue::Immediately)),
            Action::requeue(MIN_REQUEUE_DELAY)
        );
    }
}
