//! Recursive directory listing.
//!
//! A listing is a tree of `{name, type, contents}` entries. Depth is counted
//! from 1 at the requested directory; subdirectories found at the maximum
//! depth are reported with empty `contents`. A directory that cannot be read
//! is replaced by a single sentinel entry instead of failing the listing.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::resolve_path;

/// Name of the entry that stands in for an unreadable directory.
pub const ERROR_ENTRY_NAME: &str = "Error";

/// Errors that can occur around directory browsing.
#[derive(Debug, Error)]
pub enum BrowserError {
    /// The blocking listing task did not complete.
    #[error("directory listing task failed: {0}")]
    TaskFailed(String),
}

/// Kind of a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    File,
    Directory,
}

/// One node of a directory tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    /// Entry name (not full path).
    pub name: String,
    /// Entry type.
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    /// Children, present for directories only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contents: Option<Vec<DirectoryEntry>>,
}

impl DirectoryEntry {
    /// A file entry.
    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entry_type: EntryType::File,
            contents: None,
        }
    }

    /// A directory entry with the given children.
    pub fn directory(name: impl Into<String>, contents: Vec<DirectoryEntry>) -> Self {
        Self {
            name: name.into(),
            entry_type: EntryType::Directory,
            contents: Some(contents),
        }
    }

    /// The entry that replaces the contents of an unreadable directory.
    pub fn error_sentinel() -> Self {
        Self::file(ERROR_ENTRY_NAME)
    }

    /// Whether this is a directory entry.
    pub fn is_dir(&self) -> bool {
        self.entry_type == EntryType::Directory
    }
}

/// Lists directory trees below a root directory.
#[derive(Debug, Clone)]
pub struct DirectoryBrowser {
    root: PathBuf,
    max_depth: usize,
}

impl DirectoryBrowser {
    /// Create a browser rooted at `root` listing at most `max_depth` levels.
    pub fn new(root: impl Into<PathBuf>, max_depth: usize) -> Self {
        Self {
            root: root.into(),
            max_depth,
        }
    }

    /// Returns the root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the depth limit.
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Lists the tree under `requested`, resolved against the root.
    ///
    /// Blocking; see [`list_async`](Self::list_async).
    pub fn list(&self, requested: &str) -> Vec<DirectoryEntry> {
        let dir = resolve_path(&self.root, requested);
        tracing::debug!(path = %dir.display(), max_depth = self.max_depth, "Listing directory");
        self.list_level(&dir, 1)
    }

    /// Lists the tree on the blocking thread pool.
    pub async fn list_async(&self, requested: &str) -> Result<Vec<DirectoryEntry>, BrowserError> {
        let browser = self.clone();
        let requested = requested.to_string();
        tokio::task::spawn_blocking(move || browser.list(&requested))
            .await
            .map_err(|e| BrowserError::TaskFailed(e.to_string()))
    }

    fn list_level(&self, dir: &Path, level: usize) -> Vec<DirectoryEntry> {
        if level > self.max_depth {
            return Vec::new();
        }

        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!(path = %dir.display(), error = %e, "Cannot read directory");
                return vec![DirectoryEntry::error_sentinel()];
            }
        };

        let mut results: Vec<DirectoryEntry> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                // Symlinks are not followed.
                let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
                if is_dir {
                    let contents = self.list_level(&entry.path(), level + 1);
                    DirectoryEntry::directory(name, contents)
                } else {
                    DirectoryEntry::file(name)
                }
            })
            .collect();

        results.sort_by(|a, b| a.name.cmp(&b.name));
        results
    }
}
