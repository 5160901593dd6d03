pub mod conditions;
pub mod helpers;
pub mod kubernetes;
pub mod reconciler;
pub mod resources;

pub const DEFAULT_FIELD_MANAGER: &str = "stack-operator";
