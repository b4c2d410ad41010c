use std::time::Duration;

/// Template for the batch job document submitted for each work unit.
///
/// Everything except the date is fixed for the run; the date is spliced into
/// the container command and the job name.
#[derive(Debug, Clone)]
pub struct JobTemplate {
    /// Prefix of every job name, e.g. `compute-ra` gives `compute-ra-20180507`
    pub identity_prefix: String,
    /// Container image that runs the computation
    pub image_uri: String,
    /// Interpreter invoked inside the container
    pub interpreter: String,
    /// Script path inside the image; receives the date as its only argument
    pub script: String,
    pub cpu_milli: u32,
    pub memory_mib: u32,
    /// Hard wall-clock cap for a single attempt
    pub max_run_duration: Duration,
    /// Additional attempts after the first failure
    pub max_retry_count: u32,
    pub task_count: u32,
    pub priority: u32,
    pub machine_type: String,
    /// Value of the `job-type` label attached to every job
    pub job_type_label: String,
    pub logs_destination: String,
}

impl Default for JobTemplate {
    fn default() -> Self {
        Self {
            identity_prefix: "compute-ra".to_string(),
            image_uri: "us-east1-docker.pkg.dev/no2-app/fastapi-repo/compute-ra-single"
                .to_string(),
            interpreter: "python".to_string(),
            script: "/app/compute_ra_single_day.py".to_string(),
            cpu_milli: 1000,
            memory_mib: 8192,
            max_run_duration: Duration::from_secs(3600),
            max_retry_count: 1,
            task_count: 1,
            priority: 0,
            machine_type: "e2-standard-4".to_string(),
            job_type_label: "compute-ra".to_string(),
            logs_destination: "CLOUD_LOGGING".to_string(),
        }
    }
}

/// Which remote jobs count against the admission capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdmissionScope {
    /// Every job in the region, whatever submitted it
    #[default]
    Region,
    /// Only jobs carrying this template's `job-type` label
    JobType,
}

/// Where and how to reach the batch service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// CLI used to talk to the service
    pub program: String,
    pub project: String,
    pub region: String,
    pub admission_scope: AdmissionScope,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            program: "gcloud".to_string(),
            project: "no2-app".to_string(),
            region: "us-east1".to_string(),
            admission_scope: AdmissionScope::Region,
        }
    }
}

/// Fixed-interval, bounded retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    /// Poll policy while waiting for a replaced job to disappear.
    pub fn deletion() -> Self {
        Self::new(Duration::from_secs(1), 60)
    }
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Number of work units handled concurrently
    pub max_parallel: usize,
    /// Advisory cap on scheduled + running jobs in the remote service
    pub max_active_jobs: usize,
    pub deletion_poll: RetryPolicy,
    /// Wait between admission checks while the service is at capacity
    pub admission_backoff: Duration,
    /// Leave units whose job already succeeded untouched
    pub skip_succeeded: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_parallel: 5,
            max_active_jobs: 5,
            deletion_poll: RetryPolicy::deletion(),
            admission_backoff: Duration::from_secs(10),
            skip_succeeded: false,
        }
    }
}

impl DispatchConfig {
    pub fn new(max_parallel: usize) -> Self {
        Self {
            max_parallel,
            ..Default::default()
        }
    }

    pub fn with_max_active_jobs(mut self, max_active_jobs: usize) -> Self {
        self.max_active_jobs = max_active_jobs;
        self
    }

    pub fn with_deletion_poll(mut self, policy: RetryPolicy) -> Self {
        self.deletion_poll = policy;
        self
    }

    pub fn with_admission_backoff(mut self, backoff: Duration) -> Self {
        self.admission_backoff = backoff;
        self
    }

    pub fn with_skip_succeeded(mut self, skip: bool) -> Self {
        self.skip_succeeded = skip;
        self
    }
}
