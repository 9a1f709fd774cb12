/*!
 * End-to-end document translation through the job manager
 */

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use docjobs::file_utils::{ArtifactStore, FileManager, LocalArtifactStore};
use docjobs::jobs::{
    JobManager, JobManagerConfig, JobRequest, JobStatus, TranslationOptions, from_fn,
};
use docjobs::translation::{EchoTranslator, TextDocumentOperation};
use crate::common;

fn manager_with_store(config: JobManagerConfig, store: &Arc<LocalArtifactStore>) -> JobManager {
    common::init_logging();
    let artifacts: Arc<dyn ArtifactStore> = store.clone();
    JobManager::new(config, Some(artifacts)).unwrap()
}

/// Translate a text document and find the bilingual output in the store
#[tokio::test(flavor = "multi_thread")]
async fn test_textDocument_translatedAsJob_shouldWriteOutput() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let input = common::create_test_document(temp_dir.path(), "story.txt")?;
    let store = Arc::new(LocalArtifactStore::new(temp_dir.path().join("data")));
    let manager = manager_with_store(common::test_config(), &store);
    let translator = Arc::new(EchoTranslator::new());

    let job = manager.create(JobRequest::new("story.txt", "echo", "fr"))?;
    manager.start(
        &job.id,
        TextDocumentOperation::new(input, Arc::clone(&translator), store.clone()),
        None,
    );
    let record = manager.wait_for(&job.id, Duration::from_secs(2)).await.unwrap();

    assert_eq!(record.status, JobStatus::Completed);
    assert_eq!(record.processed_count, 3);
    assert_eq!(record.total_count, 3);
    assert_eq!(translator.call_count(), 3);

    let output = record.output_path.unwrap();
    assert!(output.starts_with(store.root()));
    assert!(output.ends_with("story.fr.txt"));
    let content = std::fs::read_to_string(&output)?;
    assert!(content.contains("Chapter one.\n\n[fr] Chapter one."));
    assert!(content.contains("[fr] The end."));
    Ok(())
}

/// Single output with a paragraph limit only translates the first paragraphs
#[tokio::test(flavor = "multi_thread")]
async fn test_textDocument_withSingleOutputAndLimit_shouldTranslatePrefix() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let input = common::create_test_document(temp_dir.path(), "story.md")?;
    let store = Arc::new(LocalArtifactStore::new(temp_dir.path().join("data")));
    let manager = manager_with_store(common::test_config(), &store);

    let options = TranslationOptions {
        single_output: true,
        test_mode_limit: Some(1),
        context_paragraphs: Some(2),
        ..Default::default()
    };
    let job = manager.create(JobRequest::new("story.md", "echo", "de").with_options(options))?;
    manager.start(
        &job.id,
        TextDocumentOperation::new(input, Arc::new(EchoTranslator::new()), store.clone()),
        None,
    );
    let record = manager.wait_for(&job.id, Duration::from_secs(2)).await.unwrap();

    assert_eq!(record.status, JobStatus::Completed);
    let content = std::fs::read_to_string(record.output_path.unwrap())?;
    assert!(content.starts_with("[de] Chapter one."));
    assert!(content.contains("\nIt was a dark night."));
    assert!(!content.contains("[de] It was a dark night."));
    Ok(())
}

/// A missing input file fails once as a file error
#[tokio::test(flavor = "multi_thread")]
async fn test_textDocument_withMissingInput_shouldFailAsFileError() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let store = Arc::new(LocalArtifactStore::new(temp_dir.path().join("data")));
    let manager = manager_with_store(common::test_config(), &store);
    let translator = Arc::new(EchoTranslator::new());

    let job = manager.create(JobRequest::new("gone.txt", "echo", "fr"))?;
    manager.start(
        &job.id,
        TextDocumentOperation::new(
            temp_dir.path().join("gone.txt"),
            Arc::clone(&translator),
            store.clone(),
        ),
        None,
    );
    let record = manager.wait_for(&job.id, Duration::from_secs(2)).await.unwrap();

    assert_eq!(record.status, JobStatus::Failed);
    assert_eq!(record.retry_count, 0);
    assert!(record.error_message.unwrap().starts_with("[FILE_ERROR]"));
    assert_eq!(translator.call_count(), 0);
    Ok(())
}

/// Expired jobs take their artifacts with them
#[tokio::test(flavor = "multi_thread")]
async fn test_sweepExpired_withArtifactStore_shouldDeleteOutputs() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let input = common::create_test_document(temp_dir.path(), "story.txt")?;
    let store = Arc::new(LocalArtifactStore::new(temp_dir.path().join("data")));
    let manager = manager_with_store(
        JobManagerConfig {
            job_ttl: Duration::from_millis(50),
            ..common::test_config()
        },
        &store,
    );

    let job = manager.create(JobRequest::new("story.txt", "echo", "fr"))?;
    manager.start(
        &job.id,
        TextDocumentOperation::new(input.clone(), Arc::new(EchoTranslator::new()), store.clone()),
        None,
    );
    let record = manager.wait_for(&job.id, Duration::from_secs(2)).await.unwrap();
    let output = record.output_path.unwrap();
    assert!(output.exists());

    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(manager.sweep_expired(), 1);
    assert!(!output.exists());
    assert!(manager.get(&job.id).is_none());
    // The source document is not an artifact of the job
    assert!(input.exists());
    Ok(())
}

/// An operation that reports a caller's directory as its output never loses it to expiry
#[tokio::test(flavor = "multi_thread")]
async fn test_sweepExpired_withExternalDirectoryOutput_shouldKeepDirectory() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let books = temp_dir.path().join("my_books");
    let precious = books.join("sub").join("precious.txt");
    FileManager::write_to_file(&precious, "keep me")?;
    let store = Arc::new(LocalArtifactStore::new(temp_dir.path().join("data")));
    let manager = manager_with_store(
        JobManagerConfig {
            job_ttl: Duration::from_millis(50),
            ..common::test_config()
        },
        &store,
    );

    let job = manager.create(JobRequest::new("books.txt", "echo", "fr"))?;
    let output = books.clone();
    manager.start(&job.id, from_fn(move |_, _| Ok(output.clone())), None);
    let record = manager.wait_for(&job.id, Duration::from_secs(2)).await.unwrap();
    assert_eq!(record.status, JobStatus::Completed);

    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(manager.sweep_expired(), 1);
    assert!(manager.get(&job.id).is_none());
    assert!(FileManager::dir_exists(&books));
    assert_eq!(FileManager::read_to_string(&precious)?, "keep me");
    Ok(())
}
