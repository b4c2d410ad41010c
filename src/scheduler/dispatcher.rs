use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::{AdmissionScope, DispatchConfig, JobTemplate};
use crate::error::{DispatchError, Result};
use crate::scheduler::admission::{AdmissionGate, SubmissionLock};
use crate::scheduler::job::{JobDescriptor, JobIdentity, WorkUnit};
use crate::scheduler::lifecycle::{JobLifecycle, JobOutcome, LifecycleContext};
use crate::service::{ExecutionService, ListFilter};

/// Callback invoked as each unit resolves, from the worker that resolved it.
pub type OutcomeReporter = Arc<dyn Fn(&JobOutcome) + Send + Sync>;

/// Outcomes of one dispatch run, in work-unit order.
#[derive(Debug)]
pub struct DispatchReport {
    pub run_id: Uuid,
    pub outcomes: Vec<JobOutcome>,
}

impl DispatchReport {
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(JobOutcome::is_success)
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &JobOutcome> {
        self.outcomes.iter().filter(|o| o.is_success())
    }

    pub fn failed(&self) -> impl Iterator<Item = &JobOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }
}

/// Fans a sequence of work units out over a fixed pool of workers.
///
/// Each worker takes the next unit, runs its [`JobLifecycle`] to completion,
/// then takes another. Failures stay with their unit; the run always waits for
/// every worker before returning.
pub struct Dispatcher {
    service: Arc<dyn ExecutionService>,
    template: JobTemplate,
    config: DispatchConfig,
    filter: ListFilter,
    lock: SubmissionLock,
    reporter: Option<OutcomeReporter>,
    run_id: Uuid,
}

impl Dispatcher {
    pub fn new(
        service: Arc<dyn ExecutionService>,
        template: JobTemplate,
        config: DispatchConfig,
    ) -> Self {
        Self {
            service,
            template,
            config,
            filter: ListFilter::All,
            lock: SubmissionLock::new(),
            reporter: None,
            run_id: Uuid::new_v4(),
        }
    }

    /// Count only jobs in `scope` against the admission capacity.
    pub fn with_admission_scope(mut self, scope: AdmissionScope) -> Self {
        self.filter = match scope {
            AdmissionScope::Region => ListFilter::All,
            AdmissionScope::JobType => ListFilter::Label {
                key: "job-type".to_string(),
                value: self.template.job_type_label.clone(),
            },
        };
        self
    }

    pub fn with_submission_lock(mut self, lock: SubmissionLock) -> Self {
        self.lock = lock;
        self
    }

    pub fn with_reporter(mut self, reporter: OutcomeReporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Build every descriptor up front so a bad template fails before any
    /// remote call is made.
    pub fn plan(&self, units: &[WorkUnit]) -> Result<Vec<JobDescriptor>> {
        units
            .iter()
            .map(|unit| JobDescriptor::build(&self.template, *unit))
            .collect()
    }

    pub async fn run(
        &self,
        units: Vec<WorkUnit>,
        cancel: CancellationToken,
    ) -> Result<DispatchReport> {
        if self.config.max_parallel == 0 {
            return Err(DispatchError::Config(
                "max parallel workers must be at least 1".to_string(),
            ));
        }
        if self.config.max_active_jobs == 0 {
            return Err(DispatchError::Config(
                "max active jobs must be at least 1".to_string(),
            ));
        }

        let descriptors = self.plan(&units)?;
        let identities: Vec<JobIdentity> =
            descriptors.iter().map(|d| d.identity.clone()).collect();
        let total = descriptors.len();
        let workers = self.config.max_parallel.min(total);

        tracing::info!(
            run_id = %self.run_id,
            units = total,
            workers,
            capacity = self.config.max_active_jobs,
            "Starting dispatch run"
        );

        let gate = Arc::new(AdmissionGate::new(
            self.service.clone(),
            self.filter.clone(),
            self.config.max_active_jobs,
            self.config.admission_backoff,
        ));
        let ctx = LifecycleContext {
            service: self.service.clone(),
            gate,
            lock: self.lock.clone(),
            deletion_poll: self.config.deletion_poll,
            skip_succeeded: self.config.skip_succeeded,
            cancel,
        };

        let queue: Arc<Mutex<VecDeque<(usize, JobDescriptor)>>> =
            Arc::new(Mutex::new(descriptors.into_iter().enumerate().collect()));
        let slots: Arc<Mutex<Vec<Option<JobOutcome>>>> =
            Arc::new(Mutex::new((0..total).map(|_| None).collect()));

        let mut set = JoinSet::new();
        for worker_id in 0..workers {
            let queue = queue.clone();
            let slots = slots.clone();
            let ctx = ctx.clone();
            let reporter = self.reporter.clone();
            let span = tracing::info_span!("worker", run_id = %self.run_id, worker = worker_id);

            set.spawn(
                async move {
                    loop {
                        let next = queue.lock().await.pop_front();
                        let Some((index, descriptor)) = next else {
                            break;
                        };

                        let outcome = if ctx.cancel.is_cancelled() {
                            tracing::info!(identity = %descriptor.identity, "Run cancelled, not starting job");
                            JobOutcome::failed(
                                descriptor.unit,
                                descriptor.identity,
                                DispatchError::Cancelled,
                            )
                        } else {
                            JobLifecycle::new(descriptor, ctx.clone()).run().await
                        };
                        if let Some(report) = &reporter {
                            report(&outcome);
                        }
                        slots.lock().await[index] = Some(outcome);
                    }
                }
                .instrument(span),
            );
        }

        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                tracing::error!(run_id = %self.run_id, error = %e, "Dispatch worker died");
            }
        }

        let mut slots = slots.lock().await;
        let outcomes = units
            .into_iter()
            .zip(identities)
            .zip(slots.iter_mut())
            .map(|((unit, identity), slot)| {
                slot.take().unwrap_or_else(|| {
                    JobOutcome::failed(
                        unit,
                        identity,
                        DispatchError::Internal(
                            "worker exited without reporting an outcome".to_string(),
                        ),
                    )
                })
            })
            .collect();

        let report = DispatchReport {
            run_id: self.run_id,
            outcomes,
        };
        tracing::info!(
            run_id = %self.run_id,
            succeeded = report.succeeded().count(),
            failed = report.failed().count(),
            "Dispatch run finished"
        );
        Ok(report)
    }
}
