// src/exec/gate.rs

//! Admission gate bounding how many external commands run at once.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::config::validate::validate_concurrency;
use crate::errors::Result;

/// Counting permit pool shared by all runners of one batch.
///
/// Only the command phase of a runner holds a permit; tasks waiting on
/// dependencies do not count against the limit.
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl AdmissionGate {
    pub fn new(capacity: usize) -> Result<Self> {
        validate_concurrency(capacity)?;
        Ok(Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits not currently held by a runner.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Wait for a free slot. Returns `None` if `cancel` fires first.
    ///
    /// The slot is released when the returned permit is dropped.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Option<OwnedSemaphorePermit> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            permit = Arc::clone(&self.permits).acquire_owned() => permit.ok(),
        }
    }
}
