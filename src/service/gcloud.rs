use std::process::{Output, Stdio};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::ServiceConfig;
use crate::error::ServiceError;
use crate::scheduler::{JobConfig, JobIdentity, RemoteJobState};
use crate::service::{DeleteOutcome, ExecutionService, JobSummary, ListFilter, Submitted};

/// Talks to the batch service through `gcloud batch jobs ...`.
///
/// Each call spawns one CLI process and waits for it to exit. The client
/// holds only static configuration and is shared freely across workers.
#[derive(Debug, Clone)]
pub struct GcloudBatchClient {
    config: ServiceConfig,
}

#[derive(Debug, Deserialize)]
struct JobResource {
    #[serde(default)]
    name: String,
    #[serde(default)]
    status: Option<JobStatusResource>,
}

#[derive(Debug, Deserialize)]
struct JobStatusResource {
    #[serde(default)]
    state: String,
}

impl JobResource {
    fn state(&self) -> RemoteJobState {
        self.status
            .as_ref()
            .map(|s| RemoteJobState::from_service(&s.state))
            .unwrap_or(RemoteJobState::Unspecified)
    }

    /// `projects/p/locations/l/jobs/<id>` -> `<id>`
    fn identity(&self) -> JobIdentity {
        JobIdentity::new(self.name.rsplit('/').next().unwrap_or_default())
    }
}

impl GcloudBatchClient {
    pub fn new(config: ServiceConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    fn base_args(&self, verb: &str) -> Vec<String> {
        vec![
            "batch".to_string(),
            "jobs".to_string(),
            verb.to_string(),
        ]
    }

    fn scope_args(&self, args: &mut Vec<String>) {
        args.push(format!("--location={}", self.config.region));
        args.push(format!("--project={}", self.config.project));
    }

    async fn run(&self, args: &[String], stdin: Option<&[u8]>) -> Result<Output, ServiceError> {
        tracing::debug!(program = %self.config.program, args = ?args, "Invoking batch CLI");

        let spawn_err = |source| ServiceError::Spawn {
            program: self.config.program.clone(),
            source,
        };

        let mut child = Command::new(&self.config.program)
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_err)?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input).await.map_err(spawn_err)?;
            // Close stdin so the CLI sees EOF
            drop(pipe);
        }

        child.wait_with_output().await.map_err(spawn_err)
    }

    fn command_failed(operation: &'static str, output: &Output) -> ServiceError {
        ServiceError::CommandFailed {
            operation,
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        }
    }
}

fn is_not_found(output: &Output) -> bool {
    let stderr = String::from_utf8_lossy(&output.stderr).to_lowercase();
    stderr.contains("not found") || stderr.contains("not_found")
}

#[async_trait]
impl ExecutionService for GcloudBatchClient {
    async fn describe(
        &self,
        identity: &JobIdentity,
    ) -> Result<Option<RemoteJobState>, ServiceError> {
        let mut args = self.base_args("describe");
        args.push(identity.to_string());
        self.scope_args(&mut args);
        args.push("--format=json".to_string());

        let output = self.run(&args, None).await?;
        if !output.status.success() {
            if is_not_found(&output) {
                return Ok(None);
            }
            return Err(Self::command_failed("describe", &output));
        }

        let job: JobResource =
            serde_json::from_slice(&output.stdout).map_err(|source| ServiceError::Parse {
                operation: "describe",
                source,
            })?;
        Ok(Some(job.state()))
    }

    async fn list(&self, filter: &ListFilter) -> Result<Vec<JobSummary>, ServiceError> {
        let mut args = self.base_args("list");
        self.scope_args(&mut args);
        args.push("--format=json".to_string());
        if let ListFilter::Label { key, value } = filter {
            args.push(format!("--filter=labels.{key}={value}"));
        }

        let output = self.run(&args, None).await?;
        if !output.status.success() {
            return Err(Self::command_failed("list", &output));
        }

        let jobs: Vec<JobResource> =
            serde_json::from_slice(&output.stdout).map_err(|source| ServiceError::Parse {
                operation: "list",
                source,
            })?;

        Ok(jobs
            .iter()
            .map(|job| JobSummary {
                identity: job.identity(),
                state: job.state(),
            })
            .collect())
    }

    async fn delete(&self, identity: &JobIdentity) -> Result<DeleteOutcome, ServiceError> {
        let mut args = self.base_args("delete");
        args.push(identity.to_string());
        self.scope_args(&mut args);
        args.push("--quiet".to_string());

        let output = self.run(&args, None).await?;
        if output.status.success() {
            Ok(DeleteOutcome::Deleted)
        } else if is_not_found(&output) {
            Ok(DeleteOutcome::NotFound)
        } else {
            Err(Self::command_failed("delete", &output))
        }
    }

    async fn submit(
        &self,
        identity: &JobIdentity,
        config: &JobConfig,
    ) -> Result<Submitted, ServiceError> {
        let document = config.to_json().map_err(ServiceError::Encode)?;

        let mut args = self.base_args("submit");
        args.push(identity.to_string());
        self.scope_args(&mut args);
        args.push("--config=-".to_string());

        let output = self.run(&args, Some(document.as_bytes())).await?;
        if !output.status.success() {
            return Err(Self::command_failed("submit", &output));
        }

        Ok(Submitted {
            identity: identity.clone(),
            output: String::from_utf8_lossy(&output.stdout).to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_last_path_segment() {
        let job = JobResource {
            name: "projects/no2-app/locations/us-east1/jobs/compute-ra-20180507".to_string(),
            status: Some(JobStatusResource {
                state: "RUNNING".to_string(),
            }),
        };
        assert_eq!(job.identity().as_str(), "compute-ra-20180507");
        assert_eq!(job.state(), RemoteJobState::Running);
    }

    #[test]
    fn missing_status_is_unspecified() {
        let job: JobResource = serde_json::from_str(r#"{"name": "jobs/x"}"#).unwrap();
        assert_eq!(job.state(), RemoteJobState::Unspecified);
    }
}
