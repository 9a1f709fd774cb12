use anyhow::{Context, Result};
use log::{debug, warn};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::jobs::models::{JobRecord, SUPPORTED_EXTENSIONS};

// @module: File, directory and artifact utilities

// @struct: File operations utility
pub struct FileManager;

impl FileManager {
    // @checks: File existence
    pub fn file_exists<P: AsRef<Path>>(path: P) -> bool {
        path.as_ref().exists() && path.as_ref().is_file()
    }

    // @checks: Directory existence
    pub fn dir_exists<P: AsRef<Path>>(path: P) -> bool {
        path.as_ref().exists() && path.as_ref().is_dir()
    }

    // @creates: Directory and parents if needed
    pub fn ensure_dir<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        if !path.exists() {
            fs::create_dir_all(path)
                .with_context(|| format!("Failed to create directory: {:?}", path))?;
        }
        Ok(())
    }

    // @generates: Output path for a translated document
    // @params: input_file, output_dir, target_language
    pub fn generate_output_path<P1: AsRef<Path>, P2: AsRef<Path>>(
        input_file: P1,
        output_dir: P2,
        target_language: &str,
    ) -> PathBuf {
        let input_file = input_file.as_ref();
        let stem = input_file.file_stem().unwrap_or_default();

        let mut output_filename = stem.to_string_lossy().to_string();
        output_filename.push('.');
        output_filename.push_str(target_language);
        if let Some(ext) = input_file.extension() {
            output_filename.push('.');
            output_filename.push_str(&ext.to_string_lossy());
        }

        output_dir.as_ref().join(output_filename)
    }

    /// Find documents with a supported extension in a directory
    pub fn find_documents<P: AsRef<Path>>(dir: P) -> Result<Vec<PathBuf>> {
        let mut result = Vec::new();

        for entry in WalkDir::new(dir.as_ref()).follow_links(true) {
            let entry = entry.context("Failed to read directory entry")?;
            let path = entry.path();

            if path.is_file() && DocumentType::from_path(path).is_some() {
                result.push(path.to_path_buf());
            }
        }

        result.sort();
        Ok(result)
    }

    /// Read a file to a string
    pub fn read_to_string<P: AsRef<Path>>(path: P) -> Result<String> {
        fs::read_to_string(&path)
            .with_context(|| format!("Failed to read file: {:?}", path.as_ref()))
    }

    /// Write a string to a file
    pub fn write_to_file<P: AsRef<Path>>(path: P, content: &str) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            Self::ensure_dir(parent)?;
        }

        fs::write(&path, content)
            .with_context(|| format!("Failed to write to file: {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Remove a file or directory tree. Missing paths are not an error.
    pub fn remove_path<P: AsRef<Path>>(path: P) -> Result<bool> {
        let path = path.as_ref();
        if path.is_dir() {
            fs::remove_dir_all(path)
                .with_context(|| format!("Failed to remove directory: {:?}", path))?;
            Ok(true)
        } else if path.exists() {
            fs::remove_file(path).with_context(|| format!("Failed to remove file: {:?}", path))?;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

/// Document formats the translation layer knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentType {
    Epub,
    Text,
    Markdown,
    Subtitle,
    Pdf,
}

impl DocumentType {
    /// Detect the document type from the file extension
    pub fn from_path<P: AsRef<Path>>(path: P) -> Option<Self> {
        let ext = path.as_ref().extension()?.to_string_lossy().to_lowercase();
        if !SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
            return None;
        }
        match ext.as_str() {
            "epub" => Some(Self::Epub),
            "txt" => Some(Self::Text),
            "md" => Some(Self::Markdown),
            "srt" => Some(Self::Subtitle),
            "pdf" => Some(Self::Pdf),
            _ => None,
        }
    }

    /// Whether the content is plain UTF-8 text split by blank lines
    pub fn is_plain_text(&self) -> bool {
        matches!(self, Self::Text | Self::Markdown | Self::Subtitle)
    }
}

/// Where uploads, outputs and scratch files of a job live.
///
/// Supplied by the host; the job manager only uses it to delete the
/// artifacts of expired jobs.
pub trait ArtifactStore: Send + Sync {
    /// Unique path for an uploaded document
    fn upload_path(&self, job_id: &str, filename: &str) -> Result<PathBuf>;

    /// Path the translated document should be written to
    fn output_path(&self, job_id: &str, filename: &str, target_language: &str) -> Result<PathBuf>;

    /// Scratch directory for a job
    fn temp_dir(&self, job_id: &str) -> Result<PathBuf>;

    /// Delete everything belonging to a job. Returns the number of paths removed.
    ///
    /// An output outside the store is removed only when it is a regular file.
    fn remove_artifacts(&self, record: &JobRecord) -> usize;
}

/// Artifact store on the local file system.
///
/// Layout: `<root>/uploads/<job>/<prefix>_<filename>`, `<root>/outputs/<job>/...`
/// and `<root>/temp/<job>/`.
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn job_dir(&self, area: &str, job_id: &str) -> Result<PathBuf> {
        let dir = self.root.join(area).join(job_id);
        FileManager::ensure_dir(&dir)?;
        Ok(dir)
    }
}

fn sanitize_filename(filename: &str) -> String {
    let name = Path::new(filename)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    if name.is_empty() {
        "document".to_string()
    } else {
        name
    }
}

impl ArtifactStore for LocalArtifactStore {
    fn upload_path(&self, job_id: &str, filename: &str) -> Result<PathBuf> {
        let dir = self.job_dir("uploads", job_id)?;
        let prefix = Uuid::new_v4().simple().to_string();
        Ok(dir.join(format!("{}_{}", &prefix[..12], sanitize_filename(filename))))
    }

    fn output_path(&self, job_id: &str, filename: &str, target_language: &str) -> Result<PathBuf> {
        let dir = self.job_dir("outputs", job_id)?;
        Ok(FileManager::generate_output_path(
            sanitize_filename(filename),
            dir,
            target_language,
        ))
    }

    fn temp_dir(&self, job_id: &str) -> Result<PathBuf> {
        self.job_dir("temp", job_id)
    }

    fn remove_artifacts(&self, record: &JobRecord) -> usize {
        let mut removed = 0;
        for area in ["uploads", "outputs", "temp"] {
            let target = self.root.join(area).join(&record.id);
            match FileManager::remove_path(&target) {
                Ok(true) => {
                    debug!("Removed artifact {:?}", target);
                    removed += 1;
                }
                Ok(false) => {}
                Err(e) => warn!("Failed to remove artifact {:?}: {:#}", target, e),
            }
        }

        // Outputs outside the root belong to the caller; only a plain file is ever removed
        if let Some(output) = record.output_path.as_deref().filter(|p| !p.starts_with(&self.root)) {
            if output.is_file() {
                match fs::remove_file(output) {
                    Ok(()) => {
                        debug!("Removed external output {:?}", output);
                        removed += 1;
                    }
                    Err(e) => warn!("Failed to remove external output {:?}: {}", output, e),
                }
            } else if output.exists() {
                warn!("Keeping external output {:?}: not a regular file", output);
            }
        }
        removed
    }
}
