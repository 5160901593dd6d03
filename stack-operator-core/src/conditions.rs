//! Typed status conditions and the structural dirty comparison used to
//! suppress redundant status writes.
//!
//! A [`Conditions`] list holds at most one entry per condition type. Entries
//! keep their insertion position when they are replaced, so the serialized
//! array is stable across passes.

use std::fmt::Display;

use chrono::{DateTime, SubsecRound, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::resources::{ManagedObject, ObjectStatus};

pub const CONDITION_TYPE_READY: &str = "Ready";
pub const CONDITION_TYPE_PROGRESSING: &str = "Progressing";
pub const CONDITION_TYPE_ERROR: &str = "Error";

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// type of the condition, unique within an object
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    /// generation of the object when this condition was last set
    #[serde(default)]
    pub observed_generation: i64,
    pub last_transition_time: DateTime<Utc>,
    #[serde(default)]
    pub message: String,
}

impl Condition {
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        observed_generation: i64,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            observed_generation,
            // the wire format only carries whole seconds
            last_transition_time: Utc::now().trunc_subsecs(0),
            message: message.into(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(transparent)]
pub struct Conditions(Vec<Condition>);

impl Conditions {
    pub fn new(conditions: Vec<Condition>) -> Self {
        Self(conditions)
    }

    /// Replaces the condition of the same type in place or appends it.
    pub fn set(&mut self, condition: Condition) {
        match self.0.iter_mut().find(|c| c.type_ == condition.type_) {
            Some(existing) => *existing = condition,
            None => self.0.push(condition),
        }
    }

    pub fn remove(&mut self, type_: &str) {
        self.0.retain(|c| c.type_ != type_);
    }

    pub fn get(&self, type_: &str) -> Option<&Condition> {
        self.0.iter().find(|c| c.type_ == type_)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Condition> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Messages and transition times are ignored, only type, status and
    /// observed generation count.
    pub fn is_dirty(&self, reference: &Conditions) -> bool {
        if self.len() != reference.len() {
            return true;
        }

        reference.iter().any(|expected| match self.get(&expected.type_) {
            Some(actual) => {
                actual.status != expected.status
                    || actual.observed_generation != expected.observed_generation
            }
            None => true,
        })
    }
}

/// Condition bookkeeping available on every managed object.
pub trait ConditionsExt {
    fn set_condition(&mut self, type_: &str, status: ConditionStatus, message: impl Into<String>);
    fn remove_condition(&mut self, type_: &str);
    fn set_progressing(&mut self);
    fn set_ready(&mut self);
    /// Leaves Ready and Progressing untouched, so a failing pass after a
    /// successful one shows both the last Ready and the current Error.
    fn set_error(&mut self, error: &dyn Display);
    fn condition(&self, type_: &str) -> Option<&Condition>;
    fn condition_status(&self, type_: &str) -> ConditionStatus;
}

impl<K: ManagedObject> ConditionsExt for K {
    fn set_condition(&mut self, type_: &str, status: ConditionStatus, message: impl Into<String>) {
        let generation = self.generation();

        self.status_mut()
            .conditions_mut()
            .set(Condition::new(type_, status, generation, message));
    }

    fn remove_condition(&mut self, type_: &str) {
        self.status_mut().conditions_mut().remove(type_);
    }

    fn set_progressing(&mut self) {
        self.remove_condition(CONDITION_TYPE_READY);
        self.set_condition(CONDITION_TYPE_PROGRESSING, ConditionStatus::True, "");
    }

    fn set_ready(&mut self) {
        self.remove_condition(CONDITION_TYPE_PROGRESSING);
        self.set_condition(CONDITION_TYPE_READY, ConditionStatus::True, "");
    }

    fn set_error(&mut self, error: &dyn Display) {
        self.set_condition(CONDITION_TYPE_ERROR, ConditionStatus::True, error.to_string());
    }

    fn condition(&self, type_: &str) -> Option<&Condition> {
        self.status()
            .and_then(|status| status.conditions().get(type_))
    }

    fn condition_status(&self, type_: &str) -> ConditionStatus {
        self.condition(type_)
            .map(|condition| condition.status)
            .unwrap_or_default()
    }
}
