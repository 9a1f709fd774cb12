/*!
 * Asynchronous translation job orchestration.
 *
 * This module provides:
 * - Job records and their state machine
 * - A job manager running blocking translations on a bounded worker pool
 * - Progress routing, deadline timers, retry policy and error classification
 */

pub mod classifier;
pub mod manager;
pub mod models;
pub mod operation;
pub mod progress;
pub mod retry;
pub mod timeout;

// Re-export main types
pub use classifier::{ClassifiedError, ErrorClassifier, ErrorKind};
pub use manager::{JobManager, JobManagerConfig};
pub use models::{JobRecord, JobRequest, JobStats, JobStatus, TranslationOptions};
pub use operation::{TranslationOperation, from_fn};
pub use progress::{
    ProgressCallback, ProgressIteratorExt, ProgressRegistry, ProgressReporter, ProgressThrottle,
    ProgressUpdate,
};
pub use retry::RetryPolicy;
pub use timeout::TimeoutController;
