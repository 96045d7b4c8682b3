//! File manager module for directory listing and file read/write.
//!
//! This module provides the file operations behind the HTTP endpoints:
//! - Recursive directory trees with a depth limit
//! - Whole-file reads and writes as text
//!
//! All request paths are relative to the configured home directory. See
//! [`resolve_path`] for how a request path is mapped onto it.

pub mod browser;
pub mod transfer;

use std::path::{Component, Path, PathBuf};

pub use browser::{BrowserError, DirectoryBrowser, DirectoryEntry, EntryType, ERROR_ENTRY_NAME};
pub use transfer::{FileTransfer, TransferError};

/// Maps a request path onto `base`.
///
/// The mapping is purely lexical: a leading `/` is ignored, `.` is dropped
/// and `..` removes the previous component but never climbs above `base`.
/// Symlinks are not resolved.
pub fn resolve_path(base: &Path, requested: &str) -> PathBuf {
    let mut relative = PathBuf::new();
    for component in Path::new(requested).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::ParentDir => {
                relative.pop();
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    base.join(relative)
}
