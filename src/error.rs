use thiserror::Error;

use crate::scheduler::JobIdentity;

/// Failure talking to the remote batch service.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{operation} failed (exit code {exit_code:?}): {}", .stderr.trim())]
    CommandFailed {
        operation: &'static str,
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("could not parse {operation} response: {source}")]
    Parse {
        operation: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("could not encode job configuration: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Why a single work unit (or the whole run, for `Config`) did not complete.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("service error: {0}")]
    Service(#[from] ServiceError),

    #[error("job {identity} still present after {attempts} deletion polls")]
    ConflictTimeout {
        identity: JobIdentity,
        attempts: u32,
    },

    #[error("submission of {identity} rejected: {}", .stderr.trim())]
    SubmissionFailure {
        identity: JobIdentity,
        stdout: String,
        stderr: String,
    },

    #[error("cancelled before submission")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

/// Coarse classification of a [`DispatchError`] for operator reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Config,
    Service,
    ConflictTimeout,
    SubmissionFailure,
    Cancelled,
    Internal,
}

impl FailureKind {
    /// Transient kinds where rerunning the same range is the remedy.
    pub fn needs_rerun(&self) -> bool {
        matches!(
            self,
            FailureKind::Service | FailureKind::ConflictTimeout | FailureKind::Cancelled
        )
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Config => write!(f, "config"),
            FailureKind::Service => write!(f, "service"),
            FailureKind::ConflictTimeout => write!(f, "conflict-timeout"),
            FailureKind::SubmissionFailure => write!(f, "submission-failure"),
            FailureKind::Cancelled => write!(f, "cancelled"),
            FailureKind::Internal => write!(f, "internal"),
        }
    }
}

impl DispatchError {
    pub fn kind(&self) -> FailureKind {
        match self {
            DispatchError::Config(_) => FailureKind::Config,
            DispatchError::Service(_) => FailureKind::Service,
            DispatchError::ConflictTimeout { .. } => FailureKind::ConflictTimeout,
            DispatchError::SubmissionFailure { .. } => FailureKind::SubmissionFailure,
            DispatchError::Cancelled => FailureKind::Cancelled,
            DispatchError::Internal(_) => FailureKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;
