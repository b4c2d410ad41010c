//! Client side of the remote batch-execution service.
//!
//! The service owns all job state; this module only issues requests:
//! - **describe**: current state of one job, or absence
//! - **list**: every job visible under a filter (used for admission counts)
//! - **delete**: schedule removal of a job; absence counts as success
//! - **submit**: create a job from a [`JobConfig`]
//!
//! Nothing here caches remote state. [`GcloudBatchClient`] is the production
//! implementation; tests substitute in-memory fakes through the
//! [`ExecutionService`] trait.

pub mod gcloud;

pub use gcloud::GcloudBatchClient;

use async_trait::async_trait;

use crate::error::ServiceError;
use crate::scheduler::{JobConfig, JobIdentity, RemoteJobState};

/// Restricts a `list` call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ListFilter {
    #[default]
    All,
    /// Jobs whose `key` label equals `value`
    Label { key: String, value: String },
}

/// One row of a job listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSummary {
    pub identity: JobIdentity,
    pub state: RemoteJobState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Removal was scheduled; the job may remain visible for a while
    Deleted,
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submitted {
    pub identity: JobIdentity,
    /// Raw service response, kept for diagnostics
    pub output: String,
}

#[async_trait]
pub trait ExecutionService: Send + Sync {
    async fn describe(
        &self,
        identity: &JobIdentity,
    ) -> Result<Option<RemoteJobState>, ServiceError>;

    async fn list(&self, filter: &ListFilter) -> Result<Vec<JobSummary>, ServiceError>;

    async fn delete(&self, identity: &JobIdentity) -> Result<DeleteOutcome, ServiceError>;

    async fn submit(
        &self,
        identity: &JobIdentity,
        config: &JobConfig,
    ) -> Result<Submitted, ServiceError>;
}
