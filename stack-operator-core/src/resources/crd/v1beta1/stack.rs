use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use thiserror::Error;

use crate::{
    conditions::Conditions,
    resources::{metadata_is_dirty, ManagedObject, ObjectStatus},
};

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
#[kube(
    group = "stack.formance.com",
    version = "v1beta1",
    kind = "Stack",
    status = "StackStatus",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Host", "type":"string", "jsonPath":".spec.host"}"#,
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
pub struct StackSpec {
    /// public host the stack is served from
    pub host: String,
    /// scheme used to reach the host, either http or https
    #[serde(default = "default_scheme")]
    pub scheme: String,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub dev: bool,
    /// version applied to every component, defaults to latest
    pub version: Option<String>,
}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StackStatus {
    #[serde(default)]
    pub conditions: Conditions,
    /// namespace hosting the stack's components
    pub namespace: Option<String>,
}

#[derive(Debug, Error, PartialEq)]
pub enum StackValidationError {
    #[error("Stack host is empty!")]
    MissingHost,
    #[error("Unsupported scheme '{}'! Expected http or https.", .0)]
    UnsupportedScheme(String),
}

fn default_scheme() -> String {
    "http".to_owned()
}

impl Default for StackSpec {
    fn default() -> Self {
        Self {
            host: String::new(),
            scheme: default_scheme(),
            debug: false,
            dev: false,
            version: None,
        }
    }
}

impl StackSpec {
    pub fn validate(&self) -> Result<(), StackValidationError> {
        if self.host.trim().is_empty() {
            return Err(StackValidationError::MissingHost);
        }

        match self.scheme.as_str() {
            "http" | "https" => Ok(()),
            other => Err(StackValidationError::UnsupportedScheme(other.to_owned())),
        }
    }

    pub fn get_version(&self) -> &str {
        self.version.as_deref().unwrap_or("latest")
    }

    pub fn get_base_url(&self) -> String {
        format!("{}://{}", self.scheme, self.host)
    }
}

impl ObjectStatus for StackStatus {
    fn conditions(&self) -> &Conditions {
        &self.conditions
    }

    fn conditions_mut(&mut self) -> &mut Conditions {
        &mut self.conditions
    }

    fn is_dirty(&self, reference: &Self) -> bool {
        self.conditions.is_dirty(&reference.conditions) || self.namespace != reference.namespace
    }
}

impl ManagedObject for Stack {
    type Status = StackStatus;

    fn status(&self) -> Option<&StackStatus> {
        self.status.as_ref()
    }

    fn status_mut(&mut self) -> &mut StackStatus {
        self.status.get_or_insert_with(StackStatus::default)
    }

    fn is_dirty(&self, reference: &Self) -> bool {
        metadata_is_dirty(&self.metadata, &reference.metadata) || self.spec != reference.spec
    }
}
