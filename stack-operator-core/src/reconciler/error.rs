use std::time::Duration;

use thiserror::Error;

use crate::kubernetes::{ObjectKey, StoreError};

use super::{panic::PanicRecovered, Requeue};

/// Failure of a mutator to bring an object to its desired state. It is
/// recorded on the object as an Error condition, never returned to the
/// scheduler.
#[derive(Debug, Error)]
#[error("{inner:#}")]
pub struct MutationError {
    inner: anyhow::Error,
    requeue: Option<Requeue>,
}

impl MutationError {
    pub fn new(source: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: source.into(),
            requeue: None,
        }
    }

    /// The pass should be retried on its own instead of waiting for a change.
    pub fn requeue(source: impl Into<anyhow::Error>, requeue: Requeue) -> Self {
        Self {
            inner: source.into(),
            requeue: Some(requeue),
        }
    }

    pub fn requeue_hint(&self) -> Option<Requeue> {
        self.requeue
    }
}

impl From<PanicRecovered> for MutationError {
    fn from(value: PanicRecovered) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("Couldn't fetch '{}'! Reason: {}", .0, .1)]
    Fetch(ObjectKey, StoreError),
    #[error("Couldn't persist '{}'! Reason: {}", .0, .1)]
    Persist(ObjectKey, StoreError),
    #[error("Reconciliation of '{}' didn't finish within {:?}!", .0, .1)]
    DeadlineExceeded(ObjectKey, Duration),
}

impl ReconcilerError {
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            ReconcilerError::Fetch(_, error) | ReconcilerError::Persist(_, error) if error.is_conflict()
        )
    }
}
