
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use ra_dispatch::config::RetryPolicy;
use ra_dispatch::error::{DispatchError, FailureKind};
use ra_dispatch::scheduler::{JobLifecycle, LifecycleState, OutcomeStatus, RemoteJobState};
use test_harness::{context, descriptor, fast_config, Call, FakeBatchService, FakeBehavior};

/// Absent job: delete reports NotFound and the unit proceeds as if the
/// delete had succeeded.
#[tokio::test]
async fn test_not_found_delete_is_success() {
    let service = Arc::new(FakeBatchService::accepting());
    let ctx = context(service.clone(), &fast_config(1, 5), CancellationToken::new());

    let outcome = JobLifecycle::new(descriptor("20180507"), ctx).run().await;

    assert!(matches!(outcome.status, OutcomeStatus::Done));
    assert!(outcome.reached(LifecycleState::Ready));
    assert!(!outcome.reached(LifecycleState::Failed));
    assert_eq!(
        outcome.transitions,
        vec![
            LifecycleState::Start,
            LifecycleState::DeletingOld,
            LifecycleState::AwaitDeletion,
            LifecycleState::Ready,
            LifecycleState::Admitted,
            LifecycleState::Submitted,
            LifecycleState::Done,
        ]
    );
    assert_eq!(service.submitted(), vec!["compute-ra-20180507".to_string()]);
}

/// An existing job is deleted, polled until it disappears, then replaced.
#[tokio::test]
async fn test_existing_job_is_replaced() {
    let behavior = FakeBehavior {
        deletion_polls: 3,
        ..Default::default()
    };
    let service = Arc::new(
        FakeBatchService::new(behavior).with_job("compute-ra-20180507", RemoteJobState::Failed),
    );
    let ctx = context(service.clone(), &fast_config(1, 5), CancellationToken::new());

    let outcome = JobLifecycle::new(descriptor("20180507"), ctx).run().await;

    assert!(outcome.is_success());
    // Three describes still see the job deleting, the fourth finds it gone
    assert_eq!(service.describe_count("compute-ra-20180507"), 4);
    assert_eq!(
        service.state_of("compute-ra-20180507"),
        Some(RemoteJobState::Running)
    );

    let calls = service.calls();
    let delete_at = calls
        .iter()
        .position(|c| *c == Call::Delete("compute-ra-20180507".into()))
        .unwrap();
    let submit_at = calls
        .iter()
        .position(|c| *c == Call::Submit("compute-ra-20180507".into()))
        .unwrap();
    assert!(delete_at < submit_at);
}

/// A job that never finishes deleting exhausts the poll budget and is never
/// submitted.
#[tokio::test]
async fn test_deletion_timeout() {
    let behavior = FakeBehavior {
        stuck_deletion: true,
        ..Default::default()
    };
    let service = Arc::new(
        FakeBatchService::new(behavior).with_job("compute-ra-20180507", RemoteJobState::Running),
    );
    let config = fast_config(1, 5).with_deletion_poll(RetryPolicy::new(Duration::from_millis(1), 60));
    let ctx = context(service.clone(), &config, CancellationToken::new());

    let outcome = JobLifecycle::new(descriptor("20180507"), ctx).run().await;

    match outcome.error() {
        Some(DispatchError::ConflictTimeout { identity, attempts }) => {
            assert_eq!(identity.as_str(), "compute-ra-20180507");
            assert_eq!(*attempts, 60);
        }
        other => panic!("expected ConflictTimeout, got {:?}", other),
    }
    assert_eq!(outcome.final_state(), LifecycleState::Failed);
    assert!(!outcome.reached(LifecycleState::Ready));
    assert_eq!(service.describe_count("compute-ra-20180507"), 60);
    assert_eq!(service.submit_count(), 0);
    assert_eq!(service.list_count(), 0);
}

#[tokio::test]
async fn test_delete_failure_is_service_error() {
    let behavior = FakeBehavior {
        fail_delete: HashSet::from(["compute-ra-20180507".to_string()]),
        ..Default::default()
    };
    let service = Arc::new(FakeBatchService::new(behavior));
    let ctx = context(service.clone(), &fast_config(1, 5), CancellationToken::new());

    let outcome = JobLifecycle::new(descriptor("20180507"), ctx).run().await;

    assert_eq!(outcome.error().map(|e| e.kind()), Some(FailureKind::Service));
    assert_eq!(
        outcome.transitions,
        vec![
            LifecycleState::Start,
            LifecycleState::DeletingOld,
            LifecycleState::Failed
        ]
    );
    assert_eq!(service.describe_count("compute-ra-20180507"), 0);
    assert_eq!(service.submit_count(), 0);
}

/// A rejected submit surfaces the CLI's stdout and stderr.
#[tokio::test]
async fn test_submission_failure_keeps_diagnostics() {
    let behavior = FakeBehavior {
        reject_submit: HashSet::from(["compute-ra-20180507".to_string()]),
        ..Default::default()
    };
    let service = Arc::new(FakeBatchService::new(behavior));
    let ctx = context(service.clone(), &fast_config(1, 5), CancellationToken::new());

    let outcome = JobLifecycle::new(descriptor("20180507"), ctx).run().await;

    match outcome.error() {
        Some(DispatchError::SubmissionFailure {
            identity,
            stdout,
            stderr,
        }) => {
            assert_eq!(identity.as_str(), "compute-ra-20180507");
            assert_eq!(stdout, "partial output");
            assert!(stderr.contains("INVALID_ARGUMENT"));
        }
        other => panic!("expected SubmissionFailure, got {:?}", other),
    }
    assert!(outcome.reached(LifecycleState::Admitted));
    assert!(!outcome.reached(LifecycleState::Submitted));
}

#[tokio::test]
async fn test_skip_succeeded_leaves_job_alone() {
    let service = Arc::new(
        FakeBatchService::accepting().with_job("compute-ra-20180507", RemoteJobState::Succeeded),
    );
    let config = fast_config(1, 5).with_skip_succeeded(true);
    let ctx = context(service.clone(), &config, CancellationToken::new());

    let outcome = JobLifecycle::new(descriptor("20180507"), ctx).run().await;

    assert!(matches!(outcome.status, OutcomeStatus::Skipped));
    assert!(outcome.is_success());
    assert_eq!(
        outcome.transitions,
        vec![LifecycleState::Start, LifecycleState::Skipped]
    );
    assert_eq!(service.delete_count(), 0);
    assert_eq!(service.submit_count(), 0);
}

#[tokio::test]
async fn test_skip_succeeded_still_replaces_failed_job() {
    let service = Arc::new(
        FakeBatchService::accepting().with_job("compute-ra-20180507", RemoteJobState::Failed),
    );
    let config = fast_config(1, 5).with_skip_succeeded(true);
    let ctx = context(service.clone(), &config, CancellationToken::new());

    let outcome = JobLifecycle::new(descriptor("20180507"), ctx).run().await;

    assert!(matches!(outcome.status, OutcomeStatus::Done));
    assert_eq!(service.delete_count(), 1);
    assert_eq!(service.submit_count(), 1);
}

#[tokio::test]
async fn test_cancel_during_deletion_poll() {
    let behavior = FakeBehavior {
        stuck_deletion: true,
        ..Default::default()
    };
    let service = Arc::new(
        FakeBatchService::new(behavior).with_job("compute-ra-20180507", RemoteJobState::Running),
    );
    let config = fast_config(1, 5).with_deletion_poll(RetryPolicy::new(Duration::from_secs(1), 60));
    let cancel = CancellationToken::new();
    let ctx = context(service.clone(), &config, cancel.clone());

    let handle = tokio::spawn(JobLifecycle::new(descriptor("20180507"), ctx).run());
    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    let outcome = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("lifecycle should stop promptly")
        .unwrap();
    assert!(matches!(outcome.error(), Some(DispatchError::Cancelled)));
    assert_eq!(service.submit_count(), 0);
}

/// Describe never succeeds and the job was never seen: the unit fails with the
/// service error rather than a deletion timeout.
#[tokio::test]
async fn test_describe_failures_are_service_error() {
    let behavior = FakeBehavior {
        fail_describe: true,
        ..Default::default()
    };
    let service = Arc::new(FakeBatchService::new(behavior));
    let ctx = context(service.clone(), &fast_config(1, 5), CancellationToken::new());

    let outcome = JobLifecycle::new(descriptor("20180507"), ctx).run().await;

    match outcome.error() {
        Some(DispatchError::Service(e)) => {
            assert!(e.to_string().contains("PERMISSION_DENIED"));
        }
        other => panic!("expected Service error, got {:?}", other),
    }
    assert_eq!(service.describe_count("compute-ra-20180507"), 60);
    assert_eq!(service.submit_count(), 0);
}

/// A unit started after cancellation leaves the remote job untouched.
#[tokio::test]
async fn test_cancelled_before_start_makes_no_calls() {
    let service = Arc::new(
        FakeBatchService::accepting().with_job("compute-ra-20180507", RemoteJobState::Succeeded),
    );
    let cancel = CancellationToken::new();
    cancel.cancel();
    let ctx = context(service.clone(), &fast_config(1, 5), cancel);

    let outcome = JobLifecycle::new(descriptor("20180507"), ctx).run().await;

    assert!(matches!(outcome.error(), Some(DispatchError::Cancelled)));
    assert_eq!(
        outcome.transitions,
        vec![LifecycleState::Start, LifecycleState::Failed]
    );
    assert!(service.calls().is_empty());
    assert_eq!(
        service.state_of("compute-ra-20180507"),
        Some(RemoteJobState::Succeeded)
    );
}

/// Cancelling while queued on the submission lock gives up without checking
/// capacity.
#[tokio::test]
async fn test_cancel_while_waiting_for_lock() {
    let service = Arc::new(FakeBatchService::accepting());
    let cancel = CancellationToken::new();
    let ctx = context(service.clone(), &fast_config(1, 5), cancel.clone());
    let held = ctx.lock.acquire().await;

    let handle = tokio::spawn(JobLifecycle::new(descriptor("20180507"), ctx).run());
    tokio::time::sleep(Duration::from_millis(30)).await;
    cancel.cancel();

    let outcome = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("lifecycle should stop promptly")
        .unwrap();
    drop(held);

    assert!(matches!(outcome.error(), Some(DispatchError::Cancelled)));
    assert!(outcome.reached(LifecycleState::Ready));
    assert!(!outcome.reached(LifecycleState::Admitted));
    assert_eq!(service.list_count(), 0);
    assert_eq!(service.submit_count(), 0);
}
