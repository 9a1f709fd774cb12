/*!
 * Job records and request parameters.
 *
 * A `JobRecord` is owned by the job manager's store; everything handed out
 * to callers is a clone taken under the store lock.
 */

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::errors::JobError;

/// Document extensions the orchestration layer accepts
pub const SUPPORTED_EXTENSIONS: &[&str] = &["epub", "txt", "srt", "md", "pdf"];

/// Upper bound for the context window, in paragraphs
pub const MAX_CONTEXT_PARAGRAPHS: usize = 50;

/// Lifecycle state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Created, not yet started
    Pending,
    /// Submitted to the worker pool
    Processing,
    /// Finished with an output file
    Completed,
    /// Finished with an error message
    Failed,
    /// Cancelled by a caller or by shutdown
    Cancelled,
}

impl JobStatus {
    /// Whether no further transitions can occur
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether the job still counts as active
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Check a transition against the state machine.
    ///
    /// PENDING -> PROCESSING -> COMPLETED | FAILED, and PENDING | PROCESSING -> CANCELLED.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Pending, JobStatus::Processing) => true,
            (JobStatus::Pending | JobStatus::Processing, JobStatus::Cancelled) => true,
            (JobStatus::Processing, JobStatus::Completed | JobStatus::Failed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for JobStatus {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" | "canceled" => Ok(JobStatus::Cancelled),
            _ => Err(JobError::Validation(format!("Unknown job status: {}", s))),
        }
    }
}

/// Optional translation parameters attached to a job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranslationOptions {
    /// Sampling temperature (0.0 to 2.0)
    #[serde(default)]
    pub temperature: Option<f32>,

    /// Number of previous paragraphs sent along as context
    #[serde(default)]
    pub context_paragraphs: Option<usize>,

    /// Write only the translation instead of bilingual output
    #[serde(default)]
    pub single_output: bool,

    /// Stop after this many paragraphs (test mode)
    #[serde(default)]
    pub test_mode_limit: Option<usize>,

    /// User prompt override, must contain `{text}`
    #[serde(default)]
    pub prompt_template: Option<String>,

    /// System prompt override
    #[serde(default)]
    pub system_prompt: Option<String>,

    /// Source language, detected by the provider when absent
    #[serde(default)]
    pub source_language: Option<String>,

    /// Per-job deadline override in seconds
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Per-job retry budget override
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl TranslationOptions {
    /// Reject out-of-range values
    pub fn validate(&self) -> Result<(), JobError> {
        if let Some(temperature) = self.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(JobError::Validation(format!(
                    "temperature must be between 0.0 and 2.0, got {}",
                    temperature
                )));
            }
        }

        if let Some(context) = self.context_paragraphs {
            if context > MAX_CONTEXT_PARAGRAPHS {
                return Err(JobError::Validation(format!(
                    "context_paragraphs must be at most {}, got {}",
                    MAX_CONTEXT_PARAGRAPHS, context
                )));
            }
        }

        if self.test_mode_limit == Some(0) {
            return Err(JobError::Validation(
                "test_mode_limit must be greater than zero".to_string(),
            ));
        }

        if let Some(template) = &self.prompt_template {
            if !template.contains("{text}") {
                return Err(JobError::Validation(
                    "prompt_template must contain the {text} placeholder".to_string(),
                ));
            }
        }

        if self.timeout_secs == Some(0) {
            return Err(JobError::Validation(
                "timeout_secs must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

/// Parameters for creating a new job
#[derive(Debug, Clone)]
pub struct JobRequest {
    /// Name of the uploaded document
    pub filename: String,
    /// Model used by the translation back-end
    pub model: String,
    /// Target language code
    pub target_language: String,
    /// Optional translation parameters
    pub options: TranslationOptions,
}

impl JobRequest {
    /// Create a request with default options
    pub fn new(filename: &str, model: &str, target_language: &str) -> Self {
        Self {
            filename: filename.to_string(),
            model: model.to_string(),
            target_language: target_language.to_string(),
            options: TranslationOptions::default(),
        }
    }

    /// Replace the options
    pub fn with_options(mut self, options: TranslationOptions) -> Self {
        self.options = options;
        self
    }

    /// Validate request parameters and options
    pub fn validate(&self) -> Result<(), JobError> {
        if self.filename.trim().is_empty() {
            return Err(JobError::Validation("filename is required".to_string()));
        }
        if self.model.trim().is_empty() {
            return Err(JobError::Validation("model is required".to_string()));
        }
        if self.target_language.trim().is_empty() {
            return Err(JobError::Validation(
                "target_language is required".to_string(),
            ));
        }

        let extension = Path::new(&self.filename)
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if !SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
            return Err(JobError::Validation(format!(
                "unsupported file type '{}', expected one of: {}",
                self.filename,
                SUPPORTED_EXTENSIONS.join(", ")
            )));
        }

        self.options.validate()
    }
}

/// One translation request and its evolving state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub status: JobStatus,
    pub source_filename: String,
    pub model_name: String,
    pub target_language: String,
    pub source_language: Option<String>,
    pub options: TranslationOptions,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub processed_count: usize,
    pub total_count: usize,
    pub retry_count: u32,
    pub output_path: Option<PathBuf>,
    pub error_message: Option<String>,
}

impl JobRecord {
    /// Build a PENDING record from a validated request
    pub fn new(id: String, request: JobRequest) -> Self {
        Self {
            id,
            status: JobStatus::Pending,
            source_filename: request.filename,
            model_name: request.model,
            target_language: request.target_language,
            source_language: request.options.source_language.clone(),
            options: request.options,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            processed_count: 0,
            total_count: 0,
            retry_count: 0,
            output_path: None,
            error_message: None,
        }
    }

    /// Completion percentage from the last known counters
    pub fn progress_percentage(&self) -> f64 {
        if self.total_count == 0 {
            return 0.0;
        }
        (self.processed_count as f64 / self.total_count as f64) * 100.0
    }

    /// Whether the record has reached a terminal state
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether the record is PENDING or PROCESSING
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Short identifier for log lines
    pub fn short_id(&self) -> &str {
        short_id(&self.id)
    }
}

impl std::fmt::Display for JobRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {} -> {} ({:.1}% complete, {})",
            self.short_id(),
            self.source_filename,
            self.target_language,
            self.progress_percentage(),
            self.status
        )
    }
}

/// First eight characters of an identifier, for logs
pub(crate) fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

/// Job counts by status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub active: usize,
}

impl JobStats {
    /// Count one record
    pub fn record(&mut self, status: JobStatus) {
        self.total += 1;
        match status {
            JobStatus::Pending => self.pending += 1,
            JobStatus::Processing => self.processing += 1,
            JobStatus::Completed => self.completed += 1,
            JobStatus::Failed => self.failed += 1,
            JobStatus::Cancelled => self.cancelled += 1,
        }
        if status.is_active() {
            self.active += 1;
        }
    }
}
