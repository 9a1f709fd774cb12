/*!
 * # docjobs - Asynchronous document translation jobs
 *
 * A Rust library for running long document translations (EPUB, TXT, SRT,
 * PDF) as non-blocking, observable, cancellable and retryable jobs.
 *
 * ## Features
 *
 * - Job records with a strict PENDING -> PROCESSING -> terminal state machine
 * - Bounded worker pool for blocking translation calls
 * - Per-job deadlines, exponential backoff retries and error classification
 * - Throttled progress reporting from inside translation operations
 * - Expiry of finished jobs and their artifacts
 *
 * ## Architecture
 *
 * The library is organized in these main modules:
 * - `app_config`: Configuration management
 * - `jobs`: Job orchestration:
 *   - `jobs::manager`: Job store, worker pool and lifecycle
 *   - `jobs::progress`: Progress registry and reporting helpers
 *   - `jobs::timeout`: Per-job deadline timers
 *   - `jobs::retry`: Backoff policy
 *   - `jobs::classifier`: Error taxonomy and counters
 * - `translation`: Plain-text document operation for the job manager
 * - `file_utils`: File system operations and artifact storage
 * - `errors`: Custom error types for the application
 *
 * ## License
 *
 * This project is licensed under the MIT License
 */

// Global lints configuration
// These lints will be allowed but not auto-fixed
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::redundant_closure_for_method_calls)]

// Public modules
pub mod app_config;
pub mod errors;
pub mod file_utils;
pub mod jobs;
pub mod translation;

// Re-export main types for easier usage
pub use app_config::Config;
pub use errors::JobError;
pub use file_utils::{ArtifactStore, LocalArtifactStore};
pub use jobs::{JobManager, JobManagerConfig, JobRecord, JobRequest, JobStatus};
