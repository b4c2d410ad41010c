//! Dispatch of per-date jobs against a capacity-limited batch service.
//!
//! - [`job`]: work units, job identities and the job document builder
//! - [`range`]: inclusive date ranges parsed from the command line
//! - [`admission`]: advisory capacity gate and the submission lock
//! - [`lifecycle`]: per-unit delete, wait, admit, submit state machine
//! - [`dispatcher`]: bounded worker pool running one lifecycle per unit

pub mod admission;
pub mod dispatcher;
pub mod job;
pub mod lifecycle;
pub mod range;

pub use admission::{Admission, AdmissionGate, SubmissionLock};
pub use dispatcher::{DispatchReport, Dispatcher, OutcomeReporter};
pub use job::{JobConfig, JobDescriptor, JobIdentity, RemoteJobState, WorkUnit};
pub use lifecycle::{JobLifecycle, JobOutcome, LifecycleContext, LifecycleState, OutcomeStatus};
pub use range::DateRange;
