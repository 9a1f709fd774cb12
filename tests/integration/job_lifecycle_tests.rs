/*!
 * Integration tests for the job lifecycle: execution, retries, deadlines,
 * cancellation and expiry
 */

use anyhow::anyhow;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use docjobs::errors::JobError;
use docjobs::jobs::{
    JobManagerConfig, JobRequest, JobStatus, ProgressCallback, ProgressReporter, ProgressUpdate,
    from_fn,
};
use crate::common;

/// Create, run and complete a job, checking each visible state
#[tokio::test(flavor = "multi_thread")]
async fn test_job_withSuccessfulOperation_shouldGoPendingProcessingCompleted() {
    let manager = common::test_manager(common::test_config());

    let job = manager.create(JobRequest::new("a.epub", "x", "zh-cn")).unwrap();
    assert_eq!(job.status, JobStatus::Pending);

    assert!(manager.start(
        &job.id,
        common::sleeping_operation(Duration::from_millis(10), "/out/a.epub"),
        None,
    ));
    assert_eq!(manager.get(&job.id).unwrap().status, JobStatus::Processing);

    let record = manager.wait_for(&job.id, Duration::from_secs(1)).await.unwrap();
    assert_eq!(record.status, JobStatus::Completed);
    assert_eq!(record.output_path, Some(PathBuf::from("/out/a.epub")));
    assert!(record.error_message.is_none());
    assert_eq!(record.retry_count, 0);

    let started = record.started_at.unwrap();
    let completed = record.completed_at.unwrap();
    assert!(record.created_at <= started && started <= completed);
}

/// A validation failure is final on the first attempt
#[tokio::test(flavor = "multi_thread")]
async fn test_job_withValidationError_shouldFailWithoutRetry() {
    let manager = common::test_manager(JobManagerConfig {
        max_retries: 5,
        ..common::test_config()
    });
    let calls = Arc::new(AtomicUsize::new(0));
    let job = manager.create(JobRequest::new("a.txt", "x", "de")).unwrap();

    manager.start(
        &job.id,
        common::counting_operation(&calls, |_| {
            Err(JobError::Validation("unsupported encoding".to_string()).into())
        }),
        None,
    );
    let record = manager.wait_for(&job.id, Duration::from_secs(1)).await.unwrap();

    assert_eq!(record.status, JobStatus::Failed);
    assert_eq!(record.retry_count, 0);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(record.output_path.is_none());
    assert!(
        record
            .error_message
            .unwrap()
            .starts_with("[VALIDATION_ERROR]")
    );
}

/// Two transient failures within a budget of two retries still complete
#[tokio::test(flavor = "multi_thread")]
async fn test_job_withTransientFailures_shouldRetryAndComplete() {
    let manager = common::test_manager(JobManagerConfig {
        max_retries: 2,
        ..common::test_config()
    });
    let calls = Arc::new(AtomicUsize::new(0));
    let job = manager.create(JobRequest::new("a.txt", "x", "de")).unwrap();

    manager.start(
        &job.id,
        common::counting_operation(&calls, |call| {
            if call <= 2 {
                Err(anyhow!("connection reset by peer"))
            } else {
                Ok(PathBuf::from("/out/a.de.txt"))
            }
        }),
        None,
    );
    let record = manager.wait_for(&job.id, Duration::from_secs(2)).await.unwrap();

    assert_eq!(record.status, JobStatus::Completed);
    assert_eq!(record.retry_count, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(record.error_message.is_none());
}

/// An always failing operation runs once plus its retry budget
#[tokio::test(flavor = "multi_thread")]
async fn test_job_withPersistentFailure_shouldExhaustRetriesAndFail() {
    let manager = common::test_manager(JobManagerConfig {
        max_retries: 1,
        ..common::test_config()
    });
    let calls = Arc::new(AtomicUsize::new(0));
    let job = manager.create(JobRequest::new("a.txt", "x", "de")).unwrap();

    manager.start(
        &job.id,
        common::counting_operation(&calls, |_| Err(anyhow!("network is unreachable"))),
        None,
    );
    let record = manager.wait_for(&job.id, Duration::from_secs(2)).await.unwrap();

    assert_eq!(record.status, JobStatus::Failed);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(record.retry_count, 1);
    assert!(record.output_path.is_none());
    assert!(record.error_message.unwrap().starts_with("[NETWORK]"));
}

/// Authorization failures from the API are not retried
#[tokio::test(flavor = "multi_thread")]
async fn test_job_withUnauthorizedApiError_shouldNotRetry() {
    let manager = common::test_manager(common::test_config());
    let calls = Arc::new(AtomicUsize::new(0));
    let job = manager.create(JobRequest::new("a.txt", "x", "de")).unwrap();

    manager.start(
        &job.id,
        common::counting_operation(&calls, |_| {
            Err(JobError::Api {
                status_code: 403,
                message: "forbidden".to_string(),
            }
            .into())
        }),
        None,
    );
    let record = manager.wait_for(&job.id, Duration::from_secs(1)).await.unwrap();

    assert_eq!(record.status, JobStatus::Failed);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

/// Cancelling a PENDING job means its operation never runs
#[tokio::test(flavor = "multi_thread")]
async fn test_cancel_pendingJob_shouldNeverInvokeOperation() {
    let manager = common::test_manager(common::test_config());
    let calls = Arc::new(AtomicUsize::new(0));
    let job = manager.create(JobRequest::new("a.txt", "x", "de")).unwrap();

    assert!(manager.cancel(&job.id));
    manager.start(
        &job.id,
        common::counting_operation(&calls, |_| Ok(PathBuf::from("/out"))),
        None,
    );
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(manager.get(&job.id).unwrap().status, JobStatus::Cancelled);
}

/// Cancelling a job queued behind a busy pool keeps its operation from running
#[tokio::test(flavor = "multi_thread")]
async fn test_cancel_queuedJob_shouldNeverInvokeOperation() {
    let manager = common::test_manager(JobManagerConfig {
        max_workers: 1,
        ..common::test_config()
    });
    let calls = Arc::new(AtomicUsize::new(0));
    let busy = manager.create(JobRequest::new("busy.txt", "x", "de")).unwrap();
    let queued = manager.create(JobRequest::new("queued.txt", "x", "de")).unwrap();

    manager.start(
        &busy.id,
        common::sleeping_operation(Duration::from_millis(300), "/out/busy.txt"),
        None,
    );
    manager.start(
        &queued.id,
        common::counting_operation(&calls, |_| Ok(PathBuf::from("/out/queued.txt"))),
        None,
    );
    assert!(manager.cancel(&queued.id));

    let busy = manager.wait_for(&busy.id, Duration::from_secs(2)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(busy.status, JobStatus::Completed);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(manager.get(&queued.id).unwrap().status, JobStatus::Cancelled);
}

/// Cancelling a running job takes effect at once and its late output is discarded
#[tokio::test(flavor = "multi_thread")]
async fn test_cancel_runningJob_shouldDiscardLateOutput() {
    let manager = common::test_manager(common::test_config());
    let job = manager.create(JobRequest::new("slow.txt", "x", "de")).unwrap();

    let begin = Instant::now();
    manager.start(
        &job.id,
        common::sleeping_operation(Duration::from_secs(5), "/out/slow.txt"),
        None,
    );
    assert!(manager.cancel(&job.id));

    let record = manager.wait_for(&job.id, Duration::from_secs(1)).await.unwrap();
    assert_eq!(record.status, JobStatus::Cancelled);
    assert!(begin.elapsed() < Duration::from_secs(2));
    assert!(record.output_path.is_none());

    // Second cancel is a no-op
    assert!(!manager.cancel(&job.id));
}

/// A job exceeding its deadline fails with a timeout error
#[tokio::test(flavor = "multi_thread")]
async fn test_job_exceedingDeadline_shouldFailWithTimeout() {
    let manager = common::test_manager(JobManagerConfig {
        job_timeout: Duration::from_millis(100),
        ..common::test_config()
    });
    let job = manager.create(JobRequest::new("slow.txt", "x", "de")).unwrap();

    manager.start(
        &job.id,
        common::sleeping_operation(Duration::from_millis(600), "/out/slow.txt"),
        None,
    );
    let record = manager.wait_for(&job.id, Duration::from_secs(1)).await.unwrap();

    assert_eq!(record.status, JobStatus::Failed);
    assert!(record.error_message.unwrap().starts_with("[TIMEOUT]"));

    tokio::time::sleep(Duration::from_millis(700)).await;
    let record = manager.get(&job.id).unwrap();
    assert_eq!(record.status, JobStatus::Failed);
    assert!(record.output_path.is_none());
}

/// The pool never runs more operations at once than it has workers
#[tokio::test(flavor = "multi_thread")]
async fn test_workerPool_shouldBoundConcurrentOperations() {
    let manager = common::test_manager(JobManagerConfig {
        max_workers: 2,
        ..common::test_config()
    });
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut ids = Vec::new();
    for i in 0..5 {
        let job = manager
            .create(JobRequest::new(&format!("{}.txt", i), "x", "de"))
            .unwrap();
        let running = Arc::clone(&running);
        let peak = Arc::clone(&peak);
        manager.start(
            &job.id,
            from_fn(move |_, _| {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(100));
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(PathBuf::from("/out"))
            }),
            None,
        );
        ids.push(job.id);
    }

    for id in &ids {
        let record = manager.wait_for(id, Duration::from_secs(3)).await.unwrap();
        assert_eq!(record.status, JobStatus::Completed);
    }
    assert!(peak.load(Ordering::SeqCst) <= 2);
}

/// Progress flows from the operation to the record and the caller's callback,
/// and stops once the job is terminal
#[tokio::test(flavor = "multi_thread")]
async fn test_progress_afterTerminalState_shouldNotMutateRecord() {
    let manager = common::test_manager(common::test_config());
    let job = manager.create(JobRequest::new("a.txt", "x", "de")).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let callback: ProgressCallback = Arc::new(move |update: &ProgressUpdate| {
        sink.lock().push(update.current);
    });
    let kept_reporter: Arc<Mutex<Option<ProgressReporter>>> = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&kept_reporter);

    manager.start(
        &job.id,
        from_fn(move |_, progress| {
            for current in 1..=4 {
                progress.report(current, 4, None);
            }
            *slot.lock() = Some(progress.clone());
            Ok(PathBuf::from("/out/a.de.txt"))
        }),
        Some(callback),
    );
    let record = manager.wait_for(&job.id, Duration::from_secs(1)).await.unwrap();

    assert_eq!(record.status, JobStatus::Completed);
    assert_eq!(record.processed_count, 4);
    assert_eq!(record.total_count, 4);
    assert_eq!(*seen.lock(), vec![1, 2, 3, 4]);

    // Late reports go nowhere
    let reporter = kept_reporter.lock().take().unwrap();
    assert!(!reporter.report(1, 10, None));
    manager.update_progress(&job.id, 9, 10);

    let record = manager.get(&job.id).unwrap();
    assert_eq!(record.status, JobStatus::Completed);
    assert_eq!(record.processed_count, 4);
    assert_eq!(record.total_count, 4);
    assert!(manager.progress_snapshot(&job.id).is_none());
}

/// Expiry removes old finished jobs only
#[tokio::test(flavor = "multi_thread")]
async fn test_sweepExpired_shouldRemoveOnlyOldTerminalJobs() {
    let manager = common::test_manager(JobManagerConfig {
        job_ttl: Duration::from_millis(100),
        cleanup_interval: Duration::from_secs(3600),
        ..common::test_config()
    });

    let pending = manager.create(JobRequest::new("pending.txt", "x", "de")).unwrap();
    let old = manager.create(JobRequest::new("old.txt", "x", "de")).unwrap();
    manager.start(&old.id, from_fn(|_, _| Ok(PathBuf::from("/out/old.txt"))), None);
    manager.wait_for(&old.id, Duration::from_secs(1)).await;

    tokio::time::sleep(Duration::from_millis(250)).await;

    let young = manager.create(JobRequest::new("young.txt", "x", "de")).unwrap();
    manager.start(&young.id, from_fn(|_, _| Ok(PathBuf::from("/out/young.txt"))), None);
    let young_record = manager.wait_for(&young.id, Duration::from_secs(1)).await.unwrap();
    assert_eq!(young_record.status, JobStatus::Completed);

    assert_eq!(manager.sweep_expired(), 1);

    assert!(manager.get(&old.id).is_none());
    assert!(manager.get(&young.id).is_some());
    assert_eq!(manager.get(&pending.id).unwrap().status, JobStatus::Pending);
}

/// Finishing a job after the cleanup interval sweeps older jobs on its own
#[tokio::test(flavor = "multi_thread")]
async fn test_jobCompletion_afterCleanupInterval_shouldSweepExpiredJobs() {
    let manager = common::test_manager(JobManagerConfig {
        job_ttl: Duration::from_millis(100),
        cleanup_interval: Duration::from_millis(100),
        ..common::test_config()
    });

    let pending = manager.create(JobRequest::new("pending.txt", "x", "de")).unwrap();
    let first = manager.create(JobRequest::new("first.txt", "x", "de")).unwrap();
    manager.start(&first.id, from_fn(|_, _| Ok(PathBuf::from("/out/first.txt"))), None);
    let first_record = manager.wait_for(&first.id, Duration::from_secs(1)).await.unwrap();
    assert_eq!(first_record.status, JobStatus::Completed);

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(manager.get(&first.id).is_some());

    let second = manager.create(JobRequest::new("second.txt", "x", "de")).unwrap();
    manager.start(&second.id, from_fn(|_, _| Ok(PathBuf::from("/out/second.txt"))), None);
    manager.wait_for(&second.id, Duration::from_secs(1)).await;

    // The sweep runs off the worker once the second job has released its slot
    let deadline = Instant::now() + Duration::from_secs(2);
    while manager.get(&first.id).is_some() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert!(manager.get(&first.id).is_none());
    assert_eq!(manager.get(&second.id).unwrap().status, JobStatus::Completed);
    assert_eq!(manager.get(&pending.id).unwrap().status, JobStatus::Pending);
}

/// A failing progress callback never breaks the job
#[tokio::test(flavor = "multi_thread")]
async fn test_progress_withPanickingCallback_shouldStillComplete() {
    let manager = common::test_manager(common::test_config());
    let job = manager.create(JobRequest::new("a.txt", "x", "de")).unwrap();

    fn failing_callback(_: &ProgressUpdate) {
        panic!("progress consumer bug");
    }
    manager.start(
        &job.id,
        from_fn(|_, progress| {
            progress.report(1, 1, None);
            Ok(PathBuf::from("/out/a.de.txt"))
        }),
        Some(Arc::new(failing_callback)),
    );
    let record = manager.wait_for(&job.id, Duration::from_secs(1)).await.unwrap();

    assert_eq!(record.status, JobStatus::Completed);
}
