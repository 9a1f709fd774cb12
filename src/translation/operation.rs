/*!
 * Document translation operation run by the job manager.
 *
 * Reads a plain-text document, translates it paragraph by paragraph through
 * a `ParagraphTranslator`, and writes the result to the job's output path.
 */

use anyhow::{Context, Result};
use log::debug;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::errors::JobError;
use crate::file_utils::{ArtifactStore, DocumentType, FileManager};
use crate::jobs::{JobRecord, ProgressIteratorExt, ProgressReporter, TranslationOperation, TranslationOptions};

use super::document::TextDocument;

/// One paragraph to translate, with its preceding context
#[derive(Debug, Clone)]
pub struct ParagraphRequest<'a> {
    pub text: &'a str,
    pub context: &'a [String],
    pub source_language: Option<&'a str>,
    pub target_language: &'a str,
    pub model: &'a str,
    pub options: &'a TranslationOptions,
}

/// Translates single paragraphs. Implemented by provider clients.
pub trait ParagraphTranslator: Send + Sync + 'static {
    fn translate(&self, request: &ParagraphRequest<'_>) -> Result<String>;
}

/// Translator that tags text with the target language instead of translating.
///
/// Lets the job pipeline run end to end without a provider.
#[derive(Debug, Default)]
pub struct EchoTranslator {
    calls: AtomicUsize,
}

impl EchoTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of paragraphs translated so far
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ParagraphTranslator for EchoTranslator {
    fn translate(&self, request: &ParagraphRequest<'_>) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("[{}] {}", request.target_language, request.text))
    }
}

/// Translates txt, md and srt documents
pub struct TextDocumentOperation<T> {
    input: PathBuf,
    translator: Arc<T>,
    artifacts: Arc<dyn ArtifactStore>,
}

impl<T: ParagraphTranslator> TextDocumentOperation<T> {
    pub fn new(input: PathBuf, translator: Arc<T>, artifacts: Arc<dyn ArtifactStore>) -> Self {
        Self {
            input,
            translator,
            artifacts,
        }
    }
}

impl<T: ParagraphTranslator> TranslationOperation for TextDocumentOperation<T> {
    fn translate(&self, job: &JobRecord, progress: &ProgressReporter) -> Result<PathBuf> {
        let doc_type = DocumentType::from_path(&self.input).ok_or_else(|| {
            JobError::File(format!("unsupported file type: {:?}", self.input))
        })?;
        if !doc_type.is_plain_text() {
            return Err(JobError::File(format!(
                "{:?} documents need a dedicated loader: {:?}",
                doc_type, self.input
            ))
            .into());
        }
        if !FileManager::file_exists(&self.input) {
            return Err(JobError::File(format!("input file not found: {:?}", self.input)).into());
        }

        let content = FileManager::read_to_string(&self.input)?;
        let document = TextDocument::parse(&content);

        let limit = job
            .options
            .test_mode_limit
            .unwrap_or(usize::MAX)
            .min(document.len());
        let context_size = job.options.context_paragraphs.unwrap_or(0);
        debug!(
            "Job {} translating {} of {} paragraphs",
            job.short_id(),
            limit,
            document.len()
        );

        let mut translations: Vec<String> = Vec::with_capacity(limit);
        for (index, paragraph) in document
            .paragraphs()
            .iter()
            .take(limit)
            .enumerate()
            .progress(progress, limit, Some(job.source_filename.as_str()))
        {
            let context_start = index.saturating_sub(context_size);
            let request = ParagraphRequest {
                text: paragraph,
                context: &document.paragraphs()[context_start..index],
                source_language: job.source_language.as_deref(),
                target_language: &job.target_language,
                model: &job.model_name,
                options: &job.options,
            };
            let translated = self
                .translator
                .translate(&request)
                .with_context(|| format!("Failed to translate paragraph {}", index + 1))?;
            translations.push(translated);
        }

        let output_path =
            self.artifacts
                .output_path(&job.id, &job.source_filename, &job.target_language)?;
        FileManager::write_to_file(
            &output_path,
            &document.render(&translations, job.options.single_output),
        )?;

        Ok(output_path)
    }
}
