use std::sync::Arc;

use futures::{future::BoxFuture, FutureExt, StreamExt};
use kube::{
    api::DynamicObject,
    runtime::{controller::Action, watcher::Config, Controller},
    Api, Client, ResourceExt,
};
use log::info;
use stack_operator_core::{
    helpers::pretty_type_name,
    kubernetes::{store::KubeStore, ObjectKey},
    reconciler::{error::ReconcilerError, Mutator, Reconciler, RequeueBackoff},
    resources::ManagedObject,
};

use crate::{config::OperatorConfig, helpers::handle_reconciliation_result};

pub mod stack;

struct ControllerContext<K, M> {
    reconciler: Reconciler<K, M, KubeStore>,
    backoff: RequeueBackoff,
    config: OperatorConfig,
}

/// Collects one controller per managed kind and drives them all until a
/// shutdown signal arrives.
pub struct ControllerRegistry {
    client: Client,
    store: Arc<KubeStore>,
    config: OperatorConfig,
    controllers: Vec<BoxFuture<'static, ()>>,
}

impl ControllerRegistry {
    pub fn new(client: Client, store: Arc<KubeStore>, config: OperatorConfig) -> Self {
        Self {
            client,
            store,
            config,
            controllers: Vec::new(),
        }
    }

    pub fn register<K, M>(mut self, mutator: M) -> Self
    where
        K: ManagedObject,
        M: Mutator<K> + 'static,
    {
        info!("Creating {} controller...", pretty_type_name::<K>());

        let watcher_config = Config::default();
        let mut controller =
            Controller::new(Api::<K>::all(self.client.clone()), watcher_config.clone());

        for resource in mutator.owned_kinds() {
            info!("Watching owned {} objects...", resource.kind);
            controller = controller.owns_with(
                Api::<DynamicObject>::all_with(self.client.clone(), &resource),
                resource,
                watcher_config.clone(),
            );
        }

        let context = Arc::new(ControllerContext {
            reconciler: Reconciler::new(self.store.clone(), mutator)
                .with_pass_timeout(self.config.pass_timeout),
            backoff: RequeueBackoff::new(
                self.config.requeue_backoff,
                self.config.requeue_backoff_max,
            ),
            config: self.config.clone(),
        });

        let controller = controller
            .shutdown_on_signal()
            .run(reconcile::<K, M>, error_policy::<K, M>, context)
            .for_each(handle_reconciliation_result::<K, ReconcilerError>);

        self.controllers.push(controller.boxed());

        self
    }

    pub async fn run(self) {
        info!("Starting {} controller(s)...", self.controllers.len());

        futures::future::join_all(self.controllers).await;

        info!("All controllers have stopped!");
    }
}

async fn reconcile<K, M>(
    object: Arc<K>,
    context: Arc<ControllerContext<K, M>>,
) -> Result<Action, ReconcilerError>
where
    K: ManagedObject,
    M: Mutator<K>,
{
    let key = ObjectKey {
        namespace: object.namespace(),
        name: object.name_any(),
    };

    let requeue = context.reconciler.reconcile(&key).await?;

    Ok(context.backoff.action(&key, requeue))
}

fn error_policy<K, M>(
    _object: Arc<K>,
    error: &ReconcilerError,
    context: Arc<ControllerContext<K, M>>,
) -> Action {
    if error.is_conflict() {
        Action::requeue(context.config.conflict_requeue)
    } else {
        Action::requeue(context.config.error_requeue)
    }
}
