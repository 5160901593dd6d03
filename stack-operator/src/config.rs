use std::{env::var, num::ParseIntError, time::Duration};

use stack_operator_core::DEFAULT_FIELD_MANAGER;
use thiserror::Error;

pub const FIELD_MANAGER_VAR: &str = "STACK_OPERATOR_FIELD_MANAGER";
pub const PASS_TIMEOUT_VAR: &str = "STACK_OPERATOR_PASS_TIMEOUT_SECS";
pub const ERROR_REQUEUE_VAR: &str = "STACK_OPERATOR_ERROR_REQUEUE_SECS";
pub const CONFLICT_REQUEUE_VAR: &str = "STACK_OPERATOR_CONFLICT_REQUEUE_SECS";
pub const REQUEUE_BACKOFF_VAR: &str = "STACK_OPERATOR_REQUEUE_BACKOFF_SECS";
pub const REQUEUE_BACKOFF_MAX_VAR: &str = "STACK_OPERATOR_REQUEUE_BACKOFF_MAX_SECS";

const DEFAULT_ERROR_REQUEUE_SECS: u64 = 10;
const DEFAULT_CONFLICT_REQUEUE_SECS: u64 = 1;
const DEFAULT_REQUEUE_BACKOFF_SECS: u64 = 1;
const DEFAULT_REQUEUE_BACKOFF_MAX_SECS: u64 = 300;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorConfig {
    pub field_manager: String,
    pub pass_timeout: Option<Duration>,
    pub error_requeue: Duration,
    pub conflict_requeue: Duration,
    /// First delay of an immediate requeue, doubled on every repetition.
    pub requeue_backoff: Duration,
    pub requeue_backoff_max: Duration,
}

#[derive(Debug, Error)]
pub enum FromError {
    #[error("Env var {} can't be empty!", .0)]
    EmptyVar(&'static str),
    #[error("Env var {} isn't a number of seconds: {}", .0, .1)]
    InvalidSeconds(&'static str, ParseIntError),
}

impl OperatorConfig {
    pub fn from_env() -> Result<Self, FromError> {
        Self::from_lookup(|name| var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, FromError> {
        let field_manager = match lookup(FIELD_MANAGER_VAR) {
            Some(value) if value.trim().is_empty() => {
                return Err(FromError::EmptyVar(FIELD_MANAGER_VAR))
            }
            Some(value) => value,
            None => DEFAULT_FIELD_MANAGER.to_owned(),
        };

        Ok(Self {
            field_manager,
            pass_timeout: parse_seconds(PASS_TIMEOUT_VAR, lookup(PASS_TIMEOUT_VAR))?,
            error_requeue: parse_seconds(ERROR_REQUEUE_VAR, lookup(ERROR_REQUEUE_VAR))?
                .unwrap_or(Duration::from_secs(DEFAULT_ERROR_REQUEUE_SECS)),
            conflict_requeue: parse_seconds(CONFLICT_REQUEUE_VAR, lookup(CONFLICT_REQUEUE_VAR))?
                .unwrap_or(Duration::from_secs(DEFAULT_CONFLICT_REQUEUE_SECS)),
            requeue_backoff: parse_seconds(REQUEUE_BACKOFF_VAR, lookup(REQUEUE_BACKOFF_VAR))?
                .unwrap_or(Duration::from_secs(DEFAULT_REQUEUE_BACKOFF_SECS)),
            requeue_backoff_max: parse_seconds(
                REQUEUE_BACKOFF_MAX_VAR,
                lookup(REQUEUE_BACKOFF_MAX_VAR),
            )?
            .unwrap_or(Duration::from_secs(DEFAULT_REQUEUE_BACKOFF_MAX_SECS)),
        })
    }
}

fn parse_seconds(name: &'static str, value: Option<String>) -> Result<Option<Duration>, FromError> {
    value
        .map(|value| {
            value
                .trim()
                .parse()
                .map(Duration::from_secs)
                .map_err(|error| FromError::InvalidSeconds(name, error))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_in(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = OperatorConfig::from_lookup(lookup_in(&[])).unwrap();

        assert_eq!(
            config,
            OperatorConfig {
                field_manager: "stack-operator".to_owned(),
                pass_timeout: None,
                error_requeue: Duration::from_secs(10),
                conflict_requeue: Duration::from_secs(1),
                requeue_backoff: Duration::from_secs(1),
                requeue_backoff_max: Duration::from_secs(300),
            }
        );
    }

    #[test]
    fn explicit_values_override_defaults() {
        let config = OperatorConfig::from_lookup(lookup_in(&[
            (FIELD_MANAGER_VAR, "formance"),
            (PASS_TIMEOUT_VAR, "30"),
            (ERROR_REQUEUE_VAR, " 60 "),
            (CONFLICT_REQUEUE_VAR, "0"),
            (REQUEUE_BACKOFF_VAR, "2"),
            (REQUEUE_BACKOFF_MAX_VAR, "120"),
        ]))
        .unwrap();

        assert_eq!(config.field_manager, "formance");
        assert_eq!(config.pass_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.error_requeue, Duration::from_secs(60));
        assert_eq!(config.conflict_requeue, Duration::ZERO);
        assert_eq!(config.requeue_backoff, Duration::from_secs(2));
        assert_eq!(config.requeue_backoff_max, Duration::from_secs(120));
    }

    #[test]
    fn malformed_values_are_rejected() {
        let result = OperatorConfig::from_lookup(lookup_in(&[(PASS_TIMEOUT_VAR, "soon")]));
        assert!(matches!(result, Err(FromError::InvalidSeconds(PASS_TIMEOUT_VAR, _))));

        let result = OperatorConfig::from_lookup(lookup_in(&[(FIELD_MANAGER_VAR, " ")]));
        assert!(matches!(result, Err(FromError::EmptyVar(FIELD_MANAGER_VAR))));
    }
}
