use std::{process::exit, sync::Arc};

use kube::Client;
use log::info;
use stack_operator_core::{kubernetes::store::KubeStore, resources::crd::v1beta1::stack::Stack};

use crate::{
    config::OperatorConfig,
    controller::{stack::StackMutator, ControllerRegistry},
};

mod config;
mod controller;
mod helpers;

#[tokio::main()]
async fn main() {
    configure_logger();

    let config = get_config();
    let client = create_client().await;
    let store = Arc::new(KubeStore::new(client.clone(), &config.field_manager));

    info!("Starting stack-operator as '{}'...", config.field_manager);

    ControllerRegistry::new(client, store.clone(), config)
        .register::<Stack, _>(StackMutator::new(store))
        .run()
        .await;
}

async fn create_client() -> Client {
    match Client::try_default().await {
        Ok(client) => client,
        Err(error) => {
            log::error!("Couldn't create client! {error:?}");
            exit(6)
        }
    }
}

fn get_config() -> OperatorConfig {
    match OperatorConfig::from_env() {
        Ok(config) => config,
        Err(error) => {
            log::error!("Couldn't read the configuration! {error}");
            exit(7)
        }
    }
}

fn configure_logger() {
    env_logger::builder()
        .default_format()
        .format_module_path(false)
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init()
}
