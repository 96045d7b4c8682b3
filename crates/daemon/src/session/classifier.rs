//! Heuristic classification of shell output chunks.
//!
//! A chunk is tagged [`OutputKind::Error`] when its text matches any cue in a
//! table of case-insensitive patterns commonly printed by failing commands.
//!
//! This is advisory metadata for the client UI, not a success signal:
//!
//! - Only the current chunk is inspected, so a cue split across two chunks
//!   (`"command not "` + `"found"`) is missed.
//! - Legitimate output that happens to contain a cue (`grep -c error log`)
//!   is tagged as an error.

use protocol::OutputKind;
use regex::{RegexSet, RegexSetBuilder};

/// Built-in cue table.
pub const DEFAULT_ERROR_PATTERNS: &[&str] = &[
    "not found",
    "error",
    "no such file or directory",
    "unknown",
    "cannot",
    "failed",
];

/// Tags output chunks as `output` or `error`.
#[derive(Debug, Clone)]
pub struct OutputClassifier {
    cues: RegexSet,
}

impl OutputClassifier {
    /// Builds a classifier from a table of regular expressions.
    ///
    /// Patterns are matched case-insensitively. An empty table classifies
    /// every chunk as `output`.
    pub fn new<I, S>(patterns: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let cues = RegexSetBuilder::new(patterns)
            .case_insensitive(true)
            .build()?;
        Ok(Self { cues })
    }

    /// Classifies one chunk. Never fails; defaults to `output`.
    pub fn classify(&self, chunk: &str) -> OutputKind {
        if self.cues.is_match(chunk) {
            OutputKind::Error
        } else {
            OutputKind::Output
        }
    }

    /// Number of cues in the table.
    pub fn len(&self) -> usize {
        self.cues.len()
    }

    /// Whether the cue table is empty.
    pub fn is_empty(&self) -> bool {
        self.cues.is_empty()
    }
}

impl Default for OutputClassifier {
    fn default() -> Self {
        let cues = RegexSetBuilder::new(DEFAULT_ERROR_PATTERNS)
            .case_insensitive(true)
            .build()
            .unwrap_or_else(|_| RegexSet::empty());
        Self { cues }
    }
}
