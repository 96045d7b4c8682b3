//! Whole-file reads and writes.
//!
//! Files are read and written as UTF-8 text in one piece. Writes replace the
//! file contents and do not create missing parent directories.

use std::path::{Path, PathBuf};

use thiserror::Error;

use super::resolve_path;

/// Errors that can occur during file transfer.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The requested file does not exist.
    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    /// The file is not valid UTF-8 text.
    #[error("file is not valid UTF-8: {0}")]
    NotText(PathBuf),

    /// IO error.
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl TransferError {
    fn from_io(path: PathBuf, source: std::io::Error) -> Self {
        match source.kind() {
            std::io::ErrorKind::NotFound => TransferError::FileNotFound(path),
            std::io::ErrorKind::InvalidData => TransferError::NotText(path),
            _ => TransferError::Io { path, source },
        }
    }
}

/// Reads and writes files below a root directory.
#[derive(Debug, Clone)]
pub struct FileTransfer {
    root: PathBuf,
}

impl FileTransfer {
    /// Create a transfer handler rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reads the whole file at `requested` as text.
    pub async fn read(&self, requested: &str) -> Result<String, TransferError> {
        let path = resolve_path(&self.root, requested);
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| TransferError::from_io(path.clone(), e))?;

        tracing::debug!(path = %path.display(), bytes = content.len(), "File read");
        Ok(content)
    }

    /// Replaces the contents of the file at `requested`, creating it if needed.
    pub async fn write(&self, requested: &str, content: &str) -> Result<(), TransferError> {
        let path = resolve_path(&self.root, requested);
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| TransferError::from_io(path.clone(), e))?;

        tracing::debug!(path = %path.display(), bytes = content.len(), "File written");
        Ok(())
    }
}
