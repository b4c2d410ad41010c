use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::config::JobTemplate;
use crate::error::{DispatchError, Result};

/// Longest job name the batch service accepts.
const MAX_IDENTITY_LEN: usize = 63;

/// One calendar day to compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkUnit(NaiveDate);

impl WorkUnit {
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }

    /// Compact `YYYYMMDD` key used in job names and container commands.
    pub fn key(&self) -> String {
        self.0.format("%Y%m%d").to_string()
    }
}

impl std::fmt::Display for WorkUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y%m%d"))
    }
}

/// Remote job name; stable across runs for the same work unit.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobIdentity(String);

impl JobIdentity {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// State of a job as reported by the batch service.
///
/// Absence is not a state here: lookups return `Option<RemoteJobState>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteJobState {
    Queued,
    Scheduled,
    Running,
    Succeeded,
    Failed,
    Deleting,
    Unspecified,
}

impl RemoteJobState {
    /// Parse the service's upper-case state string.
    pub fn from_service(state: &str) -> Self {
        match state {
            "QUEUED" => RemoteJobState::Queued,
            "SCHEDULED" => RemoteJobState::Scheduled,
            "RUNNING" => RemoteJobState::Running,
            "SUCCEEDED" => RemoteJobState::Succeeded,
            "FAILED" => RemoteJobState::Failed,
            "DELETION_IN_PROGRESS" => RemoteJobState::Deleting,
            _ => RemoteJobState::Unspecified,
        }
    }

    /// Whether the job occupies a slot for admission purposes.
    pub fn is_active(&self) -> bool {
        matches!(self, RemoteJobState::Scheduled | RemoteJobState::Running)
    }
}

impl std::fmt::Display for RemoteJobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteJobState::Queued => write!(f, "queued"),
            RemoteJobState::Scheduled => write!(f, "scheduled"),
            RemoteJobState::Running => write!(f, "running"),
            RemoteJobState::Succeeded => write!(f, "succeeded"),
            RemoteJobState::Failed => write!(f, "failed"),
            RemoteJobState::Deleting => write!(f, "deleting"),
            RemoteJobState::Unspecified => write!(f, "unspecified"),
        }
    }
}

/// Batch job document, serialized as the service's JSON job config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobConfig {
    pub priority: u32,
    pub task_groups: Vec<TaskGroup>,
    pub allocation_policy: AllocationPolicy,
    pub labels: BTreeMap<String, String>,
    pub logs_policy: LogsPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskGroup {
    pub task_spec: TaskSpec,
    pub task_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpec {
    pub runnables: Vec<Runnable>,
    pub compute_resource: ComputeResource,
    /// Duration string in seconds, e.g. `3600s`
    pub max_run_duration: String,
    pub max_retry_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Runnable {
    pub container: Container,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub image_uri: String,
    pub commands: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputeResource {
    pub cpu_milli: u32,
    pub memory_mib: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllocationPolicy {
    pub instances: Vec<InstancePolicyOrTemplate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstancePolicyOrTemplate {
    pub policy: InstancePolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstancePolicy {
    pub machine_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogsPolicy {
    pub destination: String,
}

impl JobConfig {
    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Everything needed to run one work unit remotely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDescriptor {
    pub unit: WorkUnit,
    pub identity: JobIdentity,
    pub config: JobConfig,
}

impl JobDescriptor {
    /// Derive the job name and document for `unit`. Pure: the same template and
    /// unit always produce the same descriptor.
    pub fn build(template: &JobTemplate, unit: WorkUnit) -> Result<Self> {
        let identity = JobIdentity::new(format!("{}-{}", template.identity_prefix, unit.key()));
        validate_identity(&identity)?;

        let commands = vec![
            template.interpreter.clone(),
            template.script.clone(),
            unit.key(),
        ];

        let mut labels = BTreeMap::new();
        labels.insert("job-type".to_string(), template.job_type_label.clone());

        let config = JobConfig {
            priority: template.priority,
            task_groups: vec![TaskGroup {
                task_spec: TaskSpec {
                    runnables: vec![Runnable {
                        container: Container {
                            image_uri: template.image_uri.clone(),
                            commands,
                        },
                    }],
                    compute_resource: ComputeResource {
                        cpu_milli: template.cpu_milli,
                        memory_mib: template.memory_mib,
                    },
                    max_run_duration: format!("{}s", template.max_run_duration.as_secs()),
                    max_retry_count: template.max_retry_count,
                },
                task_count: template.task_count,
            }],
            allocation_policy: AllocationPolicy {
                instances: vec![InstancePolicyOrTemplate {
                    policy: InstancePolicy {
                        machine_type: template.machine_type.clone(),
                    },
                }],
            },
            labels,
            logs_policy: LogsPolicy {
                destination: template.logs_destination.clone(),
            },
        };

        Ok(Self {
            unit,
            identity,
            config,
        })
    }
}

/// Job names must start with a lowercase letter, use only `[a-z0-9-]` and
/// fit in 63 characters.
fn validate_identity(identity: &JobIdentity) -> Result<()> {
    let name = identity.as_str();
    let starts_with_letter = name.chars().next().is_some_and(|c| c.is_ascii_lowercase());
    let charset_ok = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');

    if !starts_with_letter || !charset_ok || name.len() > MAX_IDENTITY_LEN {
        return Err(DispatchError::Config(format!(
            "job name {name:?} is not a valid batch job name"
        )));
    }
    Ok(())
}
