use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::RetryPolicy;
use crate::error::{DispatchError, Result, ServiceError};
use crate::scheduler::admission::{AdmissionGate, SubmissionLock};
use crate::scheduler::job::{JobDescriptor, JobIdentity, RemoteJobState, WorkUnit};
use crate::service::{DeleteOutcome, ExecutionService};

/// Steps of a single job's replace-and-submit cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Start,
    DeletingOld,
    AwaitDeletion,
    Ready,
    Admitted,
    Submitted,
    Done,
    /// A previous job for this unit already succeeded and was left alone
    Skipped,
    Failed,
}

impl LifecycleState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LifecycleState::Done | LifecycleState::Skipped | LifecycleState::Failed
        )
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LifecycleState::Start => "start",
            LifecycleState::DeletingOld => "deleting_old",
            LifecycleState::AwaitDeletion => "await_deletion",
            LifecycleState::Ready => "ready",
            LifecycleState::Admitted => "admitted",
            LifecycleState::Submitted => "submitted",
            LifecycleState::Done => "done",
            LifecycleState::Skipped => "skipped",
            LifecycleState::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
pub enum OutcomeStatus {
    Done,
    Skipped,
    Failed(DispatchError),
}

/// Final result for one work unit.
#[derive(Debug)]
pub struct JobOutcome {
    pub unit: WorkUnit,
    pub identity: JobIdentity,
    pub status: OutcomeStatus,
    /// Every state entered, starting with `Start`
    pub transitions: Vec<LifecycleState>,
}

impl JobOutcome {
    /// Outcome for a unit that failed before its lifecycle ran.
    pub fn failed(unit: WorkUnit, identity: JobIdentity, error: DispatchError) -> Self {
        Self {
            unit,
            identity,
            status: OutcomeStatus::Failed(error),
            transitions: vec![LifecycleState::Start, LifecycleState::Failed],
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self.status, OutcomeStatus::Failed(_))
    }

    pub fn error(&self) -> Option<&DispatchError> {
        match &self.status {
            OutcomeStatus::Failed(e) => Some(e),
            _ => None,
        }
    }

    pub fn final_state(&self) -> LifecycleState {
        self.transitions
            .last()
            .copied()
            .unwrap_or(LifecycleState::Start)
    }

    pub fn reached(&self, state: LifecycleState) -> bool {
        self.transitions.contains(&state)
    }
}

/// Everything a controller borrows from the run it belongs to.
#[derive(Clone)]
pub struct LifecycleContext {
    pub service: Arc<dyn ExecutionService>,
    pub gate: Arc<AdmissionGate>,
    pub lock: SubmissionLock,
    pub deletion_poll: RetryPolicy,
    pub skip_succeeded: bool,
    pub cancel: CancellationToken,
}

/// Drives one work unit from "maybe an old job exists" to "fresh job submitted".
///
/// Any previous job with the same identity is deleted and polled until gone,
/// then the unit waits for admission and submits while holding the run's
/// submission lock. Every failure is terminal for this unit only.
pub struct JobLifecycle {
    descriptor: JobDescriptor,
    ctx: LifecycleContext,
    transitions: Vec<LifecycleState>,
}

enum Resolution {
    Submitted,
    Skipped,
}

impl JobLifecycle {
    pub fn new(descriptor: JobDescriptor, ctx: LifecycleContext) -> Self {
        Self {
            descriptor,
            ctx,
            transitions: vec![LifecycleState::Start],
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.transitions
            .last()
            .copied()
            .unwrap_or(LifecycleState::Start)
    }

    fn transition(&mut self, next: LifecycleState) {
        tracing::debug!(
            identity = %self.descriptor.identity,
            from = %self.state(),
            to = %next,
            "Lifecycle transition"
        );
        self.transitions.push(next);
    }

    pub async fn run(mut self) -> JobOutcome {
        let status = match self.drive().await {
            Ok(Resolution::Submitted) => {
                self.transition(LifecycleState::Done);
                OutcomeStatus::Done
            }
            Ok(Resolution::Skipped) => {
                self.transition(LifecycleState::Skipped);
                OutcomeStatus::Skipped
            }
            Err(e) => {
                tracing::warn!(
                    identity = %self.descriptor.identity,
                    kind = %e.kind(),
                    error = %e,
                    "Job failed"
                );
                self.transition(LifecycleState::Failed);
                OutcomeStatus::Failed(e)
            }
        };

        JobOutcome {
            unit: self.descriptor.unit,
            identity: self.descriptor.identity,
            status,
            transitions: self.transitions,
        }
    }

    async fn drive(&mut self) -> Result<Resolution> {
        let identity = self.descriptor.identity.clone();

        // Nothing remote is touched once the run is cancelled
        if self.ctx.cancel.is_cancelled() {
            return Err(DispatchError::Cancelled);
        }

        if self.ctx.skip_succeeded
            && self.ctx.service.describe(&identity).await? == Some(RemoteJobState::Succeeded)
        {
            tracing::info!(identity = %identity, "Job already succeeded, skipping");
            return Ok(Resolution::Skipped);
        }

        self.transition(LifecycleState::DeletingOld);
        match self.ctx.service.delete(&identity).await? {
            DeleteOutcome::Deleted => {
                tracing::info!(identity = %identity, "Scheduled delete of previous job");
            }
            DeleteOutcome::NotFound => {
                tracing::info!(identity = %identity, "No existing job to delete");
            }
        }

        self.transition(LifecycleState::AwaitDeletion);
        self.await_deletion(&identity).await?;
        self.transition(LifecycleState::Ready);

        let guard = tokio::select! {
            biased;
            _ = self.ctx.cancel.cancelled() => return Err(DispatchError::Cancelled),
            guard = self.ctx.lock.acquire() => guard,
        };

        let active = self.ctx.gate.wait_for_slot(&self.ctx.cancel).await?;
        self.transition(LifecycleState::Admitted);

        tracing::info!(
            identity = %identity,
            active,
            capacity = self.ctx.gate.capacity(),
            "Submitting job"
        );
        let submitted = self
            .ctx
            .service
            .submit(&identity, &self.descriptor.config)
            .await;
        drop(guard);

        match submitted {
            Ok(_) => {
                self.transition(LifecycleState::Submitted);
                tracing::info!(identity = %identity, "Job submitted");
                Ok(Resolution::Submitted)
            }
            Err(ServiceError::CommandFailed { stdout, stderr, .. }) => {
                Err(DispatchError::SubmissionFailure {
                    identity,
                    stdout,
                    stderr,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Poll until the identity is gone. Service errors during the poll use up
    /// an attempt instead of failing the job.
    ///
    /// Running out of attempts is a `ConflictTimeout` only if some poll saw
    /// the job still present; if every poll failed, the last service error is
    /// returned instead.
    async fn await_deletion(&self, identity: &JobIdentity) -> Result<()> {
        let policy = self.ctx.deletion_poll;
        let mut seen_present = false;
        let mut last_error: Option<ServiceError> = None;

        for attempt in 1..=policy.max_attempts {
            match self.ctx.service.describe(identity).await {
                Ok(None) => {
                    tracing::debug!(identity = %identity, attempt, "Previous job gone");
                    return Ok(());
                }
                Ok(Some(state)) => {
                    tracing::debug!(identity = %identity, attempt, state = %state, "Waiting for deletion");
                    seen_present = true;
                }
                Err(e) => {
                    tracing::warn!(identity = %identity, attempt, error = %e, "Describe failed during deletion poll");
                    last_error = Some(e);
                }
            }

            if attempt < policy.max_attempts {
                tokio::select! {
                    _ = self.ctx.cancel.cancelled() => return Err(DispatchError::Cancelled),
                    _ = tokio::time::sleep(policy.interval) => {}
                }
            }
        }

        if let (false, Some(e)) = (seen_present, last_error) {
            return Err(DispatchError::Service(e));
        }

        Err(DispatchError::ConflictTimeout {
            identity: identity.clone(),
            attempts: policy.max_attempts,
        })
    }
}
