/*!
 * Contract for the blocking translation call a job runs.
 */

use std::path::PathBuf;
use std::sync::Arc;

use super::models::JobRecord;
use super::progress::ProgressReporter;

/// A blocking document translation.
///
/// Runs on a worker thread and may take minutes. Progress goes through the
/// given reporter. The call is never interrupted: a cancelled or timed-out
/// job simply stops honoring whatever the call eventually returns.
pub trait TranslationOperation: Send + Sync + 'static {
    /// Translate the job's document and return where the output was written
    fn translate(&self, job: &JobRecord, progress: &ProgressReporter) -> anyhow::Result<PathBuf>;
}

impl<T: TranslationOperation + ?Sized> TranslationOperation for Arc<T> {
    fn translate(&self, job: &JobRecord, progress: &ProgressReporter) -> anyhow::Result<PathBuf> {
        (**self).translate(job, progress)
    }
}

/// Operation backed by a closure, see [`from_fn`]
pub struct FnOperation<F>(F);

/// Wrap a closure as a `TranslationOperation`
pub fn from_fn<F>(f: F) -> FnOperation<F>
where
    F: Fn(&JobRecord, &ProgressReporter) -> anyhow::Result<PathBuf> + Send + Sync + 'static,
{
    FnOperation(f)
}

impl<F> TranslationOperation for FnOperation<F>
where
    F: Fn(&JobRecord, &ProgressReporter) -> anyhow::Result<PathBuf> + Send + Sync + 'static,
{
    fn translate(&self, job: &JobRecord, progress: &ProgressReporter) -> anyhow::Result<PathBuf> {
        (self.0)(job, progress)
    }
}
