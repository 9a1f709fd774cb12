/*!
 * Job manager for translation job lifecycle.
 *
 * This module handles:
 * - Creating jobs and validating their parameters
 * - Running jobs on a bounded worker pool with retries and deadlines
 * - Cancellation, progress updates and status queries
 * - Expiry of finished jobs and their artifacts
 *
 * Cancellation is cooperative. A running translation call cannot be
 * interrupted; once a job leaves PROCESSING every later result of that call
 * is discarded instead of applied.
 */

use anyhow::anyhow;
use chrono::Utc;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::AbortHandle;
use uuid::Uuid;

use crate::errors::JobError;
use crate::file_utils::ArtifactStore;

use super::classifier::{ClassifiedError, ErrorClassifier, ErrorKind};
use super::models::{JobRecord, JobRequest, JobStats, JobStatus, short_id};
use super::operation::TranslationOperation;
use super::progress::{ProgressCallback, ProgressRegistry, ProgressReporter, ProgressSnapshot, ProgressUpdate};
use super::retry::RetryPolicy;
use super::timeout::TimeoutController;

/// Poll period used by `wait_for`
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Job manager settings
#[derive(Debug, Clone, PartialEq)]
pub struct JobManagerConfig {
    /// Worker pool capacity
    pub max_workers: usize,
    /// How long finished jobs are kept
    pub job_ttl: Duration,
    /// Minimum time between two expiry sweeps
    pub cleanup_interval: Duration,
    /// Default per-job deadline
    pub job_timeout: Duration,
    /// Default retry budget
    pub max_retries: u32,
    /// Delay before the first retry
    pub retry_base_delay: Duration,
    /// Ceiling for retry delays
    pub retry_max_delay: Duration,
    /// Minimum interval between throttled progress reports
    pub progress_interval: Duration,
}

impl Default for JobManagerConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            job_ttl: Duration::from_secs(3 * 60 * 60),
            cleanup_interval: Duration::from_secs(30 * 60),
            job_timeout: Duration::from_secs(30 * 60),
            max_retries: 3,
            retry_base_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(60),
            progress_interval: Duration::from_secs(1),
        }
    }
}

impl JobManagerConfig {
    pub fn validate(&self) -> Result<(), JobError> {
        if self.max_workers == 0 {
            return Err(JobError::Validation(
                "max_workers must be greater than zero".to_string(),
            ));
        }
        if self.job_ttl.is_zero() {
            return Err(JobError::Validation(
                "job_ttl must be greater than zero".to_string(),
            ));
        }
        if self.job_timeout.is_zero() {
            return Err(JobError::Validation(
                "job timeout must be greater than zero".to_string(),
            ));
        }
        if self.retry_max_delay < self.retry_base_delay {
            return Err(JobError::Validation(
                "retry max delay must not be smaller than the base delay".to_string(),
            ));
        }
        Ok(())
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.retry_base_delay, self.retry_max_delay)
    }
}

/// Store entry: the record plus bookkeeping for its unit of work
struct JobEntry {
    record: JobRecord,
    /// Identifies the unit of work allowed to finish this job
    run_token: u64,
    /// Whether the unit of work got a worker and began executing
    executing: bool,
    task: Option<AbortHandle>,
}

impl JobEntry {
    fn is_current(&self, token: u64) -> bool {
        self.record.status == JobStatus::Processing && self.run_token == token
    }

    /// Move the record to `next` and stamp the matching timestamp.
    /// Leaves the record untouched if the state machine forbids the move.
    fn transition(&mut self, next: JobStatus) -> bool {
        let current = self.record.status;
        if !current.can_transition_to(next) {
            warn!(
                "Job {} cannot move from {} to {}",
                self.record.short_id(),
                current,
                next
            );
            return false;
        }

        self.record.status = next;
        if next == JobStatus::Processing {
            self.record.started_at = Some(Utc::now());
        } else {
            self.record.completed_at = Some(Utc::now());
        }
        true
    }
}

struct ManagerInner {
    config: JobManagerConfig,
    handle: Handle,
    store: Mutex<HashMap<String, JobEntry>>,
    progress: Arc<ProgressRegistry>,
    timeouts: TimeoutController,
    retry: RetryPolicy,
    classifier: ErrorClassifier,
    workers: Arc<Semaphore>,
    artifacts: Option<Arc<dyn ArtifactStore>>,
    last_sweep: Mutex<Instant>,
    next_token: AtomicU64,
}

/// Owns every job record and orchestrates their execution.
///
/// Cheap to clone; all clones share the same store and worker pool.
#[derive(Clone)]
pub struct JobManager {
    inner: Arc<ManagerInner>,
}

impl JobManager {
    /// Create a manager on the current tokio runtime
    pub fn new(
        config: JobManagerConfig,
        artifacts: Option<Arc<dyn ArtifactStore>>,
    ) -> Result<Self, JobError> {
        let handle = Handle::try_current()
            .map_err(|e| JobError::System(format!("No tokio runtime available: {}", e)))?;
        Self::with_handle(config, artifacts, handle)
    }

    /// Create a manager spawning its work on `handle`
    pub fn with_handle(
        config: JobManagerConfig,
        artifacts: Option<Arc<dyn ArtifactStore>>,
        handle: Handle,
    ) -> Result<Self, JobError> {
        config.validate()?;

        info!(
            "Starting job manager ({} workers, ttl {:?}, timeout {:?}, {} retries)",
            config.max_workers, config.job_ttl, config.job_timeout, config.max_retries
        );

        let inner = ManagerInner {
            retry: config.retry_policy(),
            workers: Arc::new(Semaphore::new(config.max_workers)),
            timeouts: TimeoutController::new(handle.clone()),
            handle,
            store: Mutex::new(HashMap::new()),
            progress: Arc::new(ProgressRegistry::new()),
            classifier: ErrorClassifier::new(),
            artifacts,
            last_sweep: Mutex::new(Instant::now()),
            next_token: AtomicU64::new(1),
            config,
        };

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn config(&self) -> &JobManagerConfig {
        &self.inner.config
    }

    // =========================================================================
    // Job Creation
    // =========================================================================

    /// Create a PENDING job. Validation errors are returned synchronously
    /// and nothing is stored.
    pub fn create(&self, request: JobRequest) -> Result<JobRecord, JobError> {
        request.validate()?;

        let mut store = self.inner.store.lock();
        let mut id = Uuid::new_v4().to_string();
        while store.contains_key(&id) {
            id = Uuid::new_v4().to_string();
        }

        let record = JobRecord::new(id.clone(), request);
        info!(
            "Created job {} for {} ({} -> {})",
            short_id(&id),
            record.source_filename,
            record.model_name,
            record.target_language
        );

        store.insert(
            id,
            JobEntry {
                record: record.clone(),
                run_token: 0,
                executing: false,
                task: None,
            },
        );
        Ok(record)
    }

    // =========================================================================
    // Job Execution
    // =========================================================================

    /// Submit a PENDING job to the worker pool.
    ///
    /// Returns false if the job is unknown or not PENDING. Never blocks:
    /// when every worker is busy the job waits in the pool's queue.
    pub fn start<O>(&self, id: &str, operation: O, progress_callback: Option<ProgressCallback>) -> bool
    where
        O: TranslationOperation,
    {
        if self.inner.workers.is_closed() {
            warn!("Cannot start job {}: job manager is shut down", short_id(id));
            return false;
        }

        let operation: Arc<dyn TranslationOperation> = Arc::new(operation);
        let mut store = self.inner.store.lock();

        let entry = match store.get_mut(id) {
            Some(entry) => entry,
            None => {
                warn!("Cannot start job {}: not found", short_id(id));
                return false;
            }
        };
        if !entry.transition(JobStatus::Processing) {
            return false;
        }

        let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
        entry.run_token = token;

        let weak = Arc::downgrade(&self.inner);
        let callback: ProgressCallback = Arc::new(move |update: &ProgressUpdate| {
            if let Some(inner) = weak.upgrade() {
                inner.update_progress(&update.job_id, update.current, update.total);
            }
            if let Some(user_callback) = &progress_callback {
                user_callback(update);
            }
        });
        self.inner.progress.register(id, callback);

        let record = entry.record.clone();
        let inner = Arc::clone(&self.inner);
        let task = self
            .inner
            .handle
            .spawn(async move { inner.run_job(record, token, operation).await });
        entry.task = Some(task.abort_handle());

        info!("Submitted job {} to the worker pool", short_id(id));
        true
    }

    /// Cancel a job that has not reached a terminal state.
    ///
    /// Takes effect immediately in the record. A translation call already in
    /// flight keeps running; its result is discarded when it returns.
    pub fn cancel(&self, id: &str) -> bool {
        let mut store = self.inner.store.lock();

        let entry = match store.get_mut(id) {
            Some(entry) => entry,
            None => {
                warn!("Cannot cancel job {}: not found", short_id(id));
                return false;
            }
        };
        if entry.record.is_terminal() {
            warn!(
                "Cannot cancel job {}: already {}",
                short_id(id),
                entry.record.status
            );
            return false;
        }

        if !self.inner.cancel_entry(id, entry) {
            return false;
        }
        info!("Cancelled job {}", short_id(id));
        true
    }

    /// Overwrite the progress counters of a non-terminal job (last write wins)
    pub fn update_progress(&self, id: &str, processed: usize, total: usize) {
        self.inner.update_progress(id, processed, total);
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Get a job by identifier
    pub fn get(&self, id: &str) -> Option<JobRecord> {
        self.inner.store.lock().get(id).map(|e| e.record.clone())
    }

    /// List jobs, oldest first, optionally filtered by status
    pub fn list(&self, status_filter: Option<JobStatus>) -> Vec<JobRecord> {
        let store = self.inner.store.lock();
        let mut jobs: Vec<JobRecord> = store
            .values()
            .filter(|e| status_filter.is_none_or(|status| e.record.status == status))
            .map(|e| e.record.clone())
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        jobs
    }

    /// Job counts by status
    pub fn stats(&self) -> JobStats {
        let store = self.inner.store.lock();
        let mut stats = JobStats::default();
        for entry in store.values() {
            stats.record(entry.record.status);
        }
        stats
    }

    /// Last progress event delivered for a running job
    pub fn progress_snapshot(&self, id: &str) -> Option<ProgressSnapshot> {
        self.inner.progress.snapshot(id)
    }

    /// Failure counters by kind
    pub fn error_stats(&self) -> HashMap<ErrorKind, u64> {
        self.inner.classifier.stats()
    }

    /// Clear the failure counters
    pub fn reset_error_stats(&self) {
        self.inner.classifier.reset();
        info!("Error statistics reset");
    }

    /// Wait until a job is terminal or `timeout` elapses, returning its latest state
    pub async fn wait_for(&self, id: &str, timeout: Duration) -> Option<JobRecord> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let record = self.get(id)?;
            if record.is_terminal() || tokio::time::Instant::now() >= deadline {
                return Some(record);
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Remove finished jobs older than the TTL together with their artifacts
    pub fn sweep_expired(&self) -> usize {
        self.inner.sweep_expired()
    }

    /// Cancel every unfinished job and close the worker pool
    pub fn shutdown(&self) -> usize {
        let mut store = self.inner.store.lock();
        let mut cancelled = 0;
        for (id, entry) in store.iter_mut() {
            if entry.record.is_active() && self.inner.cancel_entry(id, entry) {
                cancelled += 1;
            }
        }
        drop(store);

        self.inner.timeouts.disarm_all();
        self.inner.workers.close();
        info!("Job manager shut down ({} jobs cancelled)", cancelled);
        cancelled
    }
}

impl ManagerInner {
    /// Body of one unit of work, run on the runtime
    async fn run_job(
        self: Arc<Self>,
        record: JobRecord,
        token: u64,
        operation: Arc<dyn TranslationOperation>,
    ) {
        let id = record.id.clone();
        let _release = ReleaseGuard {
            inner: Arc::downgrade(&self),
            id: id.clone(),
            token,
        };

        let permit = match Arc::clone(&self.workers).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                debug!("Worker pool closed, job {} will not run", short_id(&id));
                return;
            }
        };

        if !self.begin_execution(&id, token, &record) {
            debug!("Job {} left PROCESSING while queued, skipping", short_id(&id));
            return;
        }

        let reporter =
            ProgressReporter::new(&id, Arc::clone(&self.progress), self.config.progress_interval);
        let policy = match record.options.max_retries {
            Some(max_retries) => self.retry.with_max_retries(max_retries),
            None => self.retry.clone(),
        };

        let mut attempt: u32 = 0;
        loop {
            let started = Instant::now();
            let result = {
                let operation = Arc::clone(&operation);
                let record = record.clone();
                let reporter = reporter.clone();
                tokio::task::spawn_blocking(move || operation.translate(&record, &reporter)).await
            };
            let result = result
                .map_err(|e| anyhow!("Translation operation panicked: {}", e))
                .and_then(|inner| inner);

            match result {
                Ok(output_path) => {
                    debug!(
                        "Job {} attempt {} succeeded in {:?}",
                        short_id(&id),
                        attempt + 1,
                        started.elapsed()
                    );
                    self.complete(&id, token, output_path);
                    break;
                }
                Err(e) => {
                    let classified = self.classifier.record(&e);

                    if !self.is_current(&id, token) {
                        debug!(
                            "Job {} is no longer processing, discarding failure: {}",
                            short_id(&id),
                            classified
                        );
                        break;
                    }

                    if policy.should_retry(&classified, attempt) {
                        let delay = policy.backoff_delay(attempt);
                        warn!(
                            "Job {} attempt {} failed ({}), retrying in {:?}",
                            short_id(&id),
                            attempt + 1,
                            classified,
                            delay
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        if !self.record_retry(&id, token, attempt) {
                            debug!("Job {} left PROCESSING during backoff", short_id(&id));
                            break;
                        }
                        continue;
                    }

                    self.fail(&id, token, &classified);
                    break;
                }
            }
        }

        drop(permit);
        self.maybe_sweep();
    }

    /// Mark the unit of work as executing and arm the job deadline.
    /// Returns false if the job was cancelled while queued.
    fn begin_execution(self: &Arc<Self>, id: &str, token: u64, record: &JobRecord) -> bool {
        let mut store = self.store.lock();
        let entry = match store.get_mut(id) {
            Some(entry) if entry.is_current(token) => entry,
            _ => return false,
        };
        entry.executing = true;

        let timeout = record
            .options
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.config.job_timeout);
        let weak = Arc::downgrade(self);
        let job_id = id.to_string();
        self.timeouts.arm(id, timeout, move || {
            if let Some(inner) = weak.upgrade() {
                inner.handle_timeout(&job_id, token, timeout);
            }
        });

        info!("Job {} is executing", short_id(id));
        true
    }

    fn is_current(&self, id: &str, token: u64) -> bool {
        self.store
            .lock()
            .get(id)
            .is_some_and(|entry| entry.is_current(token))
    }

    fn record_retry(&self, id: &str, token: u64, attempt: u32) -> bool {
        let mut store = self.store.lock();
        match store.get_mut(id) {
            Some(entry) if entry.is_current(token) => {
                entry.record.retry_count = attempt;
                true
            }
            _ => false,
        }
    }

    fn complete(&self, id: &str, token: u64, output_path: PathBuf) {
        let mut store = self.store.lock();
        let entry = match store.get_mut(id) {
            Some(entry) if entry.is_current(token) => entry,
            _ => {
                debug!(
                    "Job {} is no longer processing, discarding output {:?}",
                    short_id(id),
                    output_path
                );
                return;
            }
        };

        if !entry.transition(JobStatus::Completed) {
            return;
        }
        entry.record.output_path = Some(output_path.clone());
        self.leave_processing(id, entry);
        info!("Job {} completed: {:?}", short_id(id), output_path);
    }

    fn fail(&self, id: &str, token: u64, error: &ClassifiedError) {
        let mut store = self.store.lock();
        let entry = match store.get_mut(id) {
            Some(entry) if entry.is_current(token) => entry,
            _ => return,
        };

        if !entry.transition(JobStatus::Failed) {
            return;
        }
        entry.record.error_message = Some(error.job_message());
        self.leave_processing(id, entry);
        error!(
            "Job {} failed after {} retries: {}",
            short_id(id),
            entry.record.retry_count,
            error
        );
    }

    fn handle_timeout(&self, id: &str, token: u64, timeout: Duration) {
        let mut store = self.store.lock();
        let entry = match store.get_mut(id) {
            Some(entry) if entry.is_current(token) => entry,
            _ => return,
        };

        let error = JobError::Timeout(timeout.as_secs());
        let classified = ClassifiedError::new(ErrorKind::Timeout, error.to_string());
        self.classifier.count(ErrorKind::Timeout);

        if !entry.transition(JobStatus::Failed) {
            return;
        }
        entry.record.error_message = Some(classified.job_message());
        self.leave_processing(id, entry);
        error!("Job {} timed out after {:?}", short_id(id), timeout);
    }

    /// Set CANCELLED and tear down. Caller holds the store lock.
    fn cancel_entry(&self, id: &str, entry: &mut JobEntry) -> bool {
        if !entry.transition(JobStatus::Cancelled) {
            return false;
        }
        if !entry.executing {
            if let Some(task) = &entry.task {
                task.abort();
            }
        }
        self.leave_processing(id, entry);
        true
    }

    /// Tear down progress routing and the deadline of a job that just became
    /// terminal. Runs under the store lock so a timer cannot observe the job
    /// half finished.
    fn leave_processing(&self, id: &str, entry: &mut JobEntry) {
        entry.task = None;
        self.progress.unregister(id);
        self.timeouts.disarm(id);
    }

    fn update_progress(&self, id: &str, processed: usize, total: usize) {
        let mut store = self.store.lock();
        match store.get_mut(id) {
            Some(entry) if !entry.record.is_terminal() => {
                entry.record.processed_count = processed;
                entry.record.total_count = total;
            }
            Some(_) => debug!("Ignoring progress for finished job {}", short_id(id)),
            None => debug!("Ignoring progress for unknown job {}", short_id(id)),
        }
    }

    /// Cleanup after the unit of work ends, however it ends
    fn release(&self, id: &str, token: u64) {
        let mut store = self.store.lock();
        if let Some(entry) = store.get_mut(id) {
            // Only reachable if the unit of work was dropped mid-flight
            if entry.is_current(token) && entry.transition(JobStatus::Failed) {
                entry.record.error_message = Some(
                    ClassifiedError::new(ErrorKind::SystemError, "job execution was aborted")
                        .job_message(),
                );
                warn!("Job {} execution aborted", short_id(id));
            }
            if entry.run_token == token {
                self.leave_processing(id, entry);
            }
        }
    }

    /// Run an expiry sweep off the runtime workers once `cleanup_interval` has passed
    fn maybe_sweep(self: &Arc<Self>) {
        let due = {
            let mut last_sweep = self.last_sweep.lock();
            if last_sweep.elapsed() >= self.config.cleanup_interval {
                *last_sweep = Instant::now();
                true
            } else {
                false
            }
        };
        if due {
            let inner = Arc::clone(self);
            self.handle.spawn_blocking(move || inner.sweep_expired());
        }
    }

    fn sweep_expired(&self) -> usize {
        let ttl = chrono::Duration::from_std(self.config.job_ttl)
            .unwrap_or(chrono::Duration::MAX);
        let now = Utc::now();

        let expired: Vec<JobRecord> = {
            let mut store = self.store.lock();
            let ids: Vec<String> = store
                .values()
                .filter(|e| e.record.is_terminal())
                .filter(|e| {
                    e.record
                        .completed_at
                        .is_some_and(|completed| now.signed_duration_since(completed) > ttl)
                })
                .map(|e| e.record.id.clone())
                .collect();
            ids.iter()
                .filter_map(|id| store.remove(id))
                .map(|e| e.record)
                .collect()
        };
        *self.last_sweep.lock() = Instant::now();

        for record in &expired {
            self.progress.unregister(&record.id);
            if let Some(artifacts) = &self.artifacts {
                let removed = artifacts.remove_artifacts(record);
                debug!(
                    "Removed {} artifacts of expired job {}",
                    removed,
                    record.short_id()
                );
            }
        }

        if !expired.is_empty() {
            info!("Swept {} expired jobs", expired.len());
        }
        expired.len()
    }
}

/// Runs `ManagerInner::release` when a unit of work ends, including when its
/// task is aborted or panics.
struct ReleaseGuard {
    inner: Weak<ManagerInner>,
    id: String,
    token: u64,
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.release(&self.id, self.token);
        }
    }
}
