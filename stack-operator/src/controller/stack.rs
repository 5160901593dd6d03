use std::{collections::BTreeMap, sync::Arc};

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace};
use kube::api::ApiResource;
use stack_operator_core::{
    conditions::ConditionsExt,
    kubernetes::{
        operations::{create_or_update, with_controller, with_labels, with_mutation},
        ObjectKey, ResourceStore,
    },
    reconciler::{error::MutationError, MutationResult, Mutator, Requeue},
    resources::{
        crd::v1beta1::stack::{Stack, StackSpec},
        labels::get_component_labels,
        meta::TryStackMeta,
        workload::image_pull_policy,
        ManagedObject,
    },
};

const SETTINGS_COMPONENT: &str = "settings";

/// Gives every stack its own namespace holding the settings shared by the
/// stack's components.
pub struct StackMutator<S: ?Sized> {
    store: Arc<S>,
}

impl<S: ResourceStore + ?Sized> StackMutator<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    async fn reconcile_namespace(&self, stack: &Stack) -> anyhow::Result<String> {
        let name = stack
            .try_get_namespace_name()
            .ok_or_else(|| anyhow!("Stack is missing a name!"))?;

        create_or_update::<Namespace, S>(
            self.store.as_ref(),
            &ObjectKey::cluster(&name),
            vec![with_controller(stack, &()), with_labels(get_component_labels("stack"))],
        )
        .await?;

        Ok(name)
    }

    async fn reconcile_settings(&self, stack: &Stack, namespace: &str) -> anyhow::Result<()> {
        let name = stack
            .try_get_sub_object_name(SETTINGS_COMPONENT)
            .ok_or_else(|| anyhow!("Stack is missing a name!"))?;
        let data = get_settings_data(&stack.spec);

        create_or_update::<ConfigMap, S>(
            self.store.as_ref(),
            &ObjectKey::namespaced(namespace, &name),
            vec![
                with_controller(stack, &()),
                with_labels(get_component_labels(SETTINGS_COMPONENT)),
                with_mutation(move |config_map: &mut ConfigMap| {
                    config_map.data = Some(data);
                    Ok(())
                }),
            ],
        )
        .await?;

        Ok(())
    }
}

#[async_trait]
impl<S: ResourceStore + ?Sized + 'static> Mutator<Stack> for StackMutator<S> {
    async fn mutate(&self, stack: &mut Stack) -> MutationResult {
        stack.set_progressing();

        stack
            .spec
            .validate()
            .context("Validating stack")
            .map_err(MutationError::new)?;

        let namespace = self
            .reconcile_namespace(stack)
            .await
            .context("Reconciling namespace")
            .map_err(|error| MutationError::requeue(error, Requeue::Immediately))?;

        self.reconcile_settings(stack, &namespace)
            .await
            .context("Reconciling settings")
            .map_err(|error| MutationError::requeue(error, Requeue::Immediately))?;

        stack.status_mut().namespace = Some(namespace);
        stack.set_ready();

        Ok(None)
    }

    fn owned_kinds(&self) -> Vec<ApiResource> {
        vec![
            ApiResource::erase::<Namespace>(&()),
            ApiResource::erase::<ConfigMap>(&()),
        ]
    }
}

fn get_settings_data(spec: &StackSpec) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("HOST".to_owned(), spec.host.to_owned()),
        ("SCHEME".to_owned(), spec.scheme.to_owned()),
        ("BASE_URL".to_owned(), spec.get_base_url()),
        ("DEBUG".to_owned(), spec.debug.to_string()),
        ("DEV".to_owned(), spec.dev.to_string()),
        ("VERSION".to_owned(), spec.get_version().to_owned()),
        (
            "IMAGE_PULL_POLICY".to_owned(),
            image_pull_policy(spec.get_version()),
        ),
    ])
}
