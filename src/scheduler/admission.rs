use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

use crate::error::{DispatchError, Result};
use crate::service::{ExecutionService, ListFilter};

/// Result of a single capacity check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Granted { active: usize },
    Full { active: usize },
}

/// Advisory cap on the number of active jobs in the remote service.
///
/// Capacity is observed through a live `list` call on every check; nothing is
/// reserved. Callers that need check-then-submit to be atomic with respect to
/// each other hold a [`SubmissionLock`] around both steps.
pub struct AdmissionGate {
    service: Arc<dyn ExecutionService>,
    filter: ListFilter,
    capacity: usize,
    backoff: Duration,
}

impl AdmissionGate {
    pub fn new(
        service: Arc<dyn ExecutionService>,
        filter: ListFilter,
        capacity: usize,
        backoff: Duration,
    ) -> Self {
        Self {
            service,
            filter,
            capacity,
            backoff,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Count scheduled and running jobs. A failed listing yields no count.
    pub async fn active_jobs(&self) -> Result<usize> {
        let jobs = self.service.list(&self.filter).await?;
        Ok(jobs.iter().filter(|j| j.state.is_active()).count())
    }

    pub async fn try_admit(&self) -> Result<Admission> {
        let active = self.active_jobs().await?;
        if active < self.capacity {
            Ok(Admission::Granted { active })
        } else {
            Ok(Admission::Full { active })
        }
    }

    /// Re-check every `backoff` until a slot is free or `cancel` fires.
    ///
    /// Returns the active count observed when admission was granted.
    pub async fn wait_for_slot(&self, cancel: &CancellationToken) -> Result<usize> {
        loop {
            if cancel.is_cancelled() {
                return Err(DispatchError::Cancelled);
            }

            match self.try_admit().await? {
                Admission::Granted { active } => {
                    tracing::debug!(active, capacity = self.capacity, "Admission granted");
                    return Ok(active);
                }
                Admission::Full { active } => {
                    tracing::info!(
                        active,
                        capacity = self.capacity,
                        backoff = ?self.backoff,
                        "Waiting for slot"
                    );
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(DispatchError::Cancelled),
                _ = tokio::time::sleep(self.backoff) => {}
            }
        }
    }
}

impl std::fmt::Debug for AdmissionGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionGate")
            .field("filter", &self.filter)
            .field("capacity", &self.capacity)
            .field("backoff", &self.backoff)
            .finish()
    }
}

/// Serializes the admission-check-then-submit section across workers.
///
/// Owned by the dispatcher and handed to each lifecycle controller. A
/// `disabled` lock hands out independent guards, for tests that want to
/// observe what happens without serialization.
#[derive(Debug, Clone)]
pub struct SubmissionLock {
    inner: Option<Arc<Mutex<()>>>,
}

/// Held for the duration of one admission check plus submit.
#[derive(Debug)]
pub struct SubmissionGuard {
    _guard: Option<OwnedMutexGuard<()>>,
}

impl Default for SubmissionLock {
    fn default() -> Self {
        Self::new()
    }
}

impl SubmissionLock {
    pub fn new() -> Self {
        Self {
            inner: Some(Arc::new(Mutex::new(()))),
        }
    }

    pub fn disabled() -> Self {
        Self { inner: None }
    }

    pub async fn acquire(&self) -> SubmissionGuard {
        let guard = match &self.inner {
            Some(mutex) => Some(mutex.clone().lock_owned().await),
            None => None,
        };
        SubmissionGuard { _guard: guard }
    }
}
