/*!
 * Progress routing between translation operations and job records.
 *
 * This module provides:
 * - `ProgressRegistry`: thread-safe map from job id to progress callback
 * - `ProgressReporter`: the observer handle passed to a translation operation
 * - `ProgressThrottle`: emission policy bounding callback frequency
 * - `ProgressIter`: iterator adaptor reporting through a throttle
 */

use log::{debug, warn};
use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::models::short_id;

/// Percentage step that always triggers an emission
const MILESTONE_PERCENT: usize = 5;

/// One progress event
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub job_id: String,
    pub current: usize,
    pub total: usize,
    pub label: Option<String>,
}

/// Callback invoked for every delivered progress event
pub type ProgressCallback = Arc<dyn Fn(&ProgressUpdate) + Send + Sync>;

/// Last known progress for a job
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub current: usize,
    pub total: usize,
    pub label: Option<String>,
    pub updated_at: Instant,
}

struct Registration {
    callback: ProgressCallback,
    last: Option<ProgressSnapshot>,
}

/// Thread-safe registry of progress callbacks
#[derive(Default)]
pub struct ProgressRegistry {
    entries: RwLock<HashMap<String, Registration>>,
}

impl ProgressRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the callback for a job
    pub fn register(&self, id: &str, callback: ProgressCallback) {
        let mut entries = self.entries.write();
        entries.insert(
            id.to_string(),
            Registration {
                callback,
                last: None,
            },
        );
        debug!("Registered progress callback for job {}", short_id(id));
    }

    /// Remove the callback for a job. Returns whether one was registered.
    pub fn unregister(&self, id: &str) -> bool {
        let removed = self.entries.write().remove(id).is_some();
        if removed {
            debug!("Unregistered progress callback for job {}", short_id(id));
        }
        removed
    }

    /// Deliver a progress event.
    ///
    /// Never panics: a missing registration is logged and ignored, and a
    /// panicking callback is caught and logged. Returns whether the callback
    /// ran to completion.
    pub fn report(&self, id: &str, current: usize, total: usize, label: Option<&str>) -> bool {
        let callback = {
            let mut entries = self.entries.write();
            match entries.get_mut(id) {
                Some(registration) => {
                    registration.last = Some(ProgressSnapshot {
                        current,
                        total,
                        label: label.map(str::to_string),
                        updated_at: Instant::now(),
                    });
                    Arc::clone(&registration.callback)
                }
                None => {
                    debug!(
                        "No progress callback for job {}, dropping {}/{}",
                        short_id(id),
                        current,
                        total
                    );
                    return false;
                }
            }
        };

        let update = ProgressUpdate {
            job_id: id.to_string(),
            current,
            total,
            label: label.map(str::to_string),
        };

        match panic::catch_unwind(AssertUnwindSafe(|| callback(&update))) {
            Ok(()) => true,
            Err(payload) => {
                warn!(
                    "Progress callback for job {} panicked: {}",
                    short_id(id),
                    panic_message(payload.as_ref())
                );
                false
            }
        }
    }

    /// Last progress reported for a job
    pub fn snapshot(&self, id: &str) -> Option<ProgressSnapshot> {
        self.entries.read().get(id).and_then(|r| r.last.clone())
    }

    /// Whether a callback is registered for a job
    pub fn is_registered(&self, id: &str) -> bool {
        self.entries.read().contains_key(id)
    }

    /// Number of registered callbacks
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Progress handle given to a translation operation
#[derive(Clone)]
pub struct ProgressReporter {
    job_id: String,
    registry: Arc<ProgressRegistry>,
    interval: Duration,
}

impl ProgressReporter {
    /// Reporter for `job_id` routed through `registry`
    pub fn new(job_id: &str, registry: Arc<ProgressRegistry>, interval: Duration) -> Self {
        Self {
            job_id: job_id.to_string(),
            registry,
            interval,
        }
    }

    /// Reporter whose events go nowhere, for running an operation outside a manager
    pub fn detached(job_id: &str) -> Self {
        Self::new(job_id, Arc::new(ProgressRegistry::new()), Duration::ZERO)
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Report unconditionally
    pub fn report(&self, current: usize, total: usize, label: Option<&str>) -> bool {
        self.registry.report(&self.job_id, current, total, label)
    }

    /// New throttle using this reporter's minimum interval
    pub fn throttle(&self) -> ProgressThrottle {
        ProgressThrottle::new(self.interval)
    }
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("job_id", &self.job_id)
            .field("interval", &self.interval)
            .finish()
    }
}

/// Decides which progress updates are worth emitting.
///
/// Emits on the first update, whenever a 5% milestone is crossed, on the
/// final update, and otherwise at most once per interval.
#[derive(Debug, Clone)]
pub struct ProgressThrottle {
    interval: Duration,
    last_emit: Option<Instant>,
    last_milestone: usize,
}

impl ProgressThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emit: None,
            last_milestone: 0,
        }
    }

    /// Whether this update should be emitted. Records the emission if so.
    pub fn should_emit(&mut self, current: usize, total: usize) -> bool {
        let now = Instant::now();
        let milestone = milestone(current, total);
        let crossed = milestone > self.last_milestone;
        self.last_milestone = self.last_milestone.max(milestone);

        let emit = match self.last_emit {
            None => true,
            Some(last) => {
                crossed
                    || (total > 0 && current >= total)
                    || now.duration_since(last) >= self.interval
            }
        };

        if emit {
            self.last_emit = Some(now);
        }
        emit
    }
}

fn milestone(current: usize, total: usize) -> usize {
    if total == 0 {
        return 0;
    }
    current.min(total) * 100 / total / MILESTONE_PERCENT
}

/// Iterator adaptor reporting progress for every item it yields
pub struct ProgressIter<'a, I> {
    inner: I,
    reporter: &'a ProgressReporter,
    throttle: ProgressThrottle,
    current: usize,
    total: usize,
    label: Option<String>,
}

impl<I: Iterator> Iterator for ProgressIter<'_, I> {
    type Item = I::Item;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.inner.next()?;
        self.current += 1;
        if self.throttle.should_emit(self.current, self.total) {
            self.reporter
                .report(self.current, self.total, self.label.as_deref());
        }
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

/// Adds `.progress(...)` to any iterator
pub trait ProgressIteratorExt: Iterator + Sized {
    /// Report through `reporter` while iterating over `total` items
    fn progress<'a>(
        self,
        reporter: &'a ProgressReporter,
        total: usize,
        label: Option<&str>,
    ) -> ProgressIter<'a, Self> {
        ProgressIter {
            inner: self,
            reporter,
            throttle: reporter.throttle(),
            current: 0,
            total,
            label: label.map(str::to_string),
        }
    }
}

impl<I: Iterator> ProgressIteratorExt for I {}
