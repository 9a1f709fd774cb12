/*!
 * Error classification for failed translation operations.
 *
 * Maps arbitrary failures into a closed taxonomy:
 * - Statically typed errors (`JobError`, `std::io::Error`) keep their kind
 * - Everything else is matched against keywords in the message
 * - Unmatched failures become `SystemError`
 *
 * The classifier keeps per-kind counters that only an explicit reset clears.
 */

use log::debug;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::errors::JobError;

/// Categories of job failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Timeout,
    Network,
    ApiError,
    FileError,
    ValidationError,
    SystemError,
    Cancelled,
}

impl ErrorKind {
    /// All taxonomy members, in reporting order
    pub const ALL: [ErrorKind; 7] = [
        ErrorKind::Timeout,
        ErrorKind::Network,
        ErrorKind::ApiError,
        ErrorKind::FileError,
        ErrorKind::ValidationError,
        ErrorKind::SystemError,
        ErrorKind::Cancelled,
    ];

    /// Upper-case name used in error messages
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::Network => "NETWORK",
            ErrorKind::ApiError => "API_ERROR",
            ErrorKind::FileError => "FILE_ERROR",
            ErrorKind::ValidationError => "VALIDATION_ERROR",
            ErrorKind::SystemError => "SYSTEM_ERROR",
            ErrorKind::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A failure mapped into the taxonomy
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedError {
    /// Taxonomy member
    pub kind: ErrorKind,
    /// Human readable message, recorded on failed jobs
    pub message: String,
    /// HTTP-like status code, when one could be determined
    pub status_code: Option<u16>,
}

impl ClassifiedError {
    /// Create a classified error without a status code
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status_code: None,
        }
    }

    /// Whether this is an API authorization or lookup failure (401/403/404)
    pub fn is_authorization_failure(&self) -> bool {
        if self.kind != ErrorKind::ApiError {
            return false;
        }
        if let Some(code) = self.status_code {
            return matches!(code, 401 | 403 | 404);
        }
        AUTHORIZATION_PATTERN.is_match(&self.message)
    }

    /// Message stored on the job record
    pub fn job_message(&self) -> String {
        format!("[{}] {}", self.kind, self.message)
    }
}

impl std::fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

// Checked in order, first match wins.
static KEYWORD_PATTERNS: Lazy<Vec<(Regex, ErrorKind)>> = Lazy::new(|| {
    vec![
        (
            Regex::new(r"(?i)time[ds]?[ -]?out").unwrap(),
            ErrorKind::Timeout,
        ),
        (
            Regex::new(r"(?i)connection|network|dns|unreachable").unwrap(),
            ErrorKind::Network,
        ),
        (
            Regex::new(r"(?i)\bapi\b|unauthori[sz]ed|forbidden|rate limit").unwrap(),
            ErrorKind::ApiError,
        ),
        (
            Regex::new(r"(?i)\bfile\b|\bpath\b|no such file|directory").unwrap(),
            ErrorKind::FileError,
        ),
        (
            Regex::new(r"(?i)validation|invalid").unwrap(),
            ErrorKind::ValidationError,
        ),
    ]
});

static STATUS_CODE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([45]\d{2})\b").unwrap());

static AUTHORIZATION_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)unauthori[sz]ed|forbidden|not found").unwrap());

/// Classifies failures and counts them per kind
#[derive(Debug, Default)]
pub struct ErrorClassifier {
    counts: Mutex<HashMap<ErrorKind, u64>>,
}

impl ErrorClassifier {
    /// Create a classifier with zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify a failure without touching the counters
    pub fn classify(error: &anyhow::Error) -> ClassifiedError {
        for cause in error.chain() {
            if let Some(job_error) = cause.downcast_ref::<JobError>() {
                return ClassifiedError {
                    kind: job_error.kind(),
                    message: job_error.to_string(),
                    status_code: job_error.status_code(),
                };
            }
            if let Some(io_error) = cause.downcast_ref::<std::io::Error>() {
                if let Some(kind) = classify_io(io_error) {
                    return ClassifiedError::new(kind, error.to_string());
                }
            }
        }

        Self::classify_message(&format!("{:#}", error))
    }

    /// Classify from message keywords alone
    pub fn classify_message(message: &str) -> ClassifiedError {
        let kind = KEYWORD_PATTERNS
            .iter()
            .find(|(pattern, _)| pattern.is_match(message))
            .map(|(_, kind)| *kind)
            .unwrap_or(ErrorKind::SystemError);

        let status_code = if kind == ErrorKind::ApiError {
            STATUS_CODE_PATTERN
                .captures(message)
                .and_then(|caps| caps[1].parse().ok())
        } else {
            None
        };

        ClassifiedError {
            kind,
            message: message.to_string(),
            status_code,
        }
    }

    /// Classify a failure and count it
    pub fn record(&self, error: &anyhow::Error) -> ClassifiedError {
        let classified = Self::classify(error);
        self.count(classified.kind);
        classified
    }

    /// Count an occurrence of a kind
    pub fn count(&self, kind: ErrorKind) {
        let mut counts = self.counts.lock();
        *counts.entry(kind).or_insert(0) += 1;
        debug!("Recorded {} error (total {})", kind, counts[&kind]);
    }

    /// Snapshot of the counters, every kind present
    pub fn stats(&self) -> HashMap<ErrorKind, u64> {
        let counts = self.counts.lock();
        ErrorKind::ALL
            .iter()
            .map(|kind| (*kind, counts.get(kind).copied().unwrap_or(0)))
            .collect()
    }

    /// Total failures recorded since the last reset
    pub fn total(&self) -> u64 {
        self.counts.lock().values().sum()
    }

    /// Clear all counters (operator request)
    pub fn reset(&self) {
        self.counts.lock().clear();
    }
}

fn classify_io(error: &std::io::Error) -> Option<ErrorKind> {
    use std::io::ErrorKind as Io;

    match error.kind() {
        Io::NotFound | Io::PermissionDenied | Io::AlreadyExists => Some(ErrorKind::FileError),
        Io::ConnectionRefused
        | Io::ConnectionReset
        | Io::ConnectionAborted
        | Io::NotConnected
        | Io::BrokenPipe => Some(ErrorKind::Network),
        Io::TimedOut => Some(ErrorKind::Timeout),
        Io::InvalidInput | Io::InvalidData => Some(ErrorKind::ValidationError),
        _ => None,
    }
}
