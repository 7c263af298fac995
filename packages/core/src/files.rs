// ABOUTME: Generated file set produced by code generation and consumed by sandbox mounts
// ABOUTME: Validates relative file paths and enforces file count and size bounds

use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

/// Default maximum number of files in one generated set
pub const DEFAULT_MAX_FILES: usize = 200;

/// Default maximum combined size of all file contents (4 MiB)
pub const DEFAULT_MAX_TOTAL_BYTES: usize = 4 * 1024 * 1024;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FileSetError {
    #[error("File set contains no files")]
    Empty,

    #[error("Invalid file path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("File set has {count} files, limit is {limit}")]
    TooManyFiles { count: usize, limit: usize },

    #[error("File set is {bytes} bytes, limit is {limit}")]
    TooLarge { bytes: usize, limit: usize },
}

/// Bounds applied to a generated file set before it may be mounted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSetLimits {
    pub max_files: usize,
    pub max_total_bytes: usize,
}

impl Default for FileSetLimits {
    fn default() -> Self {
        Self {
            max_files: DEFAULT_MAX_FILES,
            max_total_bytes: DEFAULT_MAX_TOTAL_BYTES,
        }
    }
}

/// Validates a file path inside a generated project.
///
/// Paths must be relative, `/`-separated, and must not escape the project
/// root. Rejected:
/// - empty paths
/// - absolute paths (`/etc/passwd`) and drive prefixes (`C:foo`)
/// - backslash separators
/// - empty, `.` or `..` segments
/// - NUL bytes and control characters
pub fn validate_file_path(path: &str) -> Result<(), FileSetError> {
    let invalid = |reason: &str| FileSetError::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    };

    if path.is_empty() {
        return Err(invalid("path cannot be empty"));
    }

    if path.starts_with('/') {
        return Err(invalid("path must be relative"));
    }

    if path.contains('\\') {
        return Err(invalid("path must use '/' separators"));
    }

    let bytes = path.as_bytes();
    if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
        return Err(invalid("path cannot start with a drive prefix"));
    }

    // Check for null bytes and control characters (log injection, truncated writes)
    if path.chars().any(|c| c.is_control()) {
        return Err(invalid("path contains control characters"));
    }

    for segment in path.split('/') {
        match segment {
            "" => return Err(invalid("path contains an empty segment")),
            "." => return Err(invalid("path contains a '.' segment")),
            ".." => return Err(invalid("path contains path traversal sequence")),
            _ => {}
        }
    }

    Ok(())
}

/// Mapping of project-relative file path to file content.
///
/// Ordered by path so mounts and logs are deterministic. Every path stored
/// here has passed [`validate_file_path`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct GeneratedFileSet {
    files: BTreeMap<String, String>,
}

impl GeneratedFileSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a file set from raw entries, validating every path and the limits
    pub fn from_entries<I, P, C>(entries: I, limits: &FileSetLimits) -> Result<Self, FileSetError>
    where
        I: IntoIterator<Item = (P, C)>,
        P: Into<String>,
        C: Into<String>,
    {
        let mut set = Self::new();
        for (path, contents) in entries {
            set.insert(path, contents)?;
        }

        if set.is_empty() {
            return Err(FileSetError::Empty);
        }

        set.check_limits(limits)?;
        Ok(set)
    }

    /// Insert or replace a file. The path is validated first.
    pub fn insert(
        &mut self,
        path: impl Into<String>,
        contents: impl Into<String>,
    ) -> Result<(), FileSetError> {
        let path = path.into();
        validate_file_path(&path)?;
        self.files.insert(path, contents.into());
        Ok(())
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.files.iter().map(|(p, c)| (p.as_str(), c.as_str()))
    }

    /// Combined byte length of every file's contents
    pub fn total_bytes(&self) -> usize {
        self.files.values().map(String::len).sum()
    }

    pub fn check_limits(&self, limits: &FileSetLimits) -> Result<(), FileSetError> {
        if self.files.len() > limits.max_files {
            return Err(FileSetError::TooManyFiles {
                count: self.files.len(),
                limit: limits.max_files,
            });
        }

        let bytes = self.total_bytes();
        if bytes > limits.max_total_bytes {
            return Err(FileSetError::TooLarge {
                bytes,
                limit: limits.max_total_bytes,
            });
        }

        Ok(())
    }
}

impl IntoIterator for GeneratedFileSet {
    type Item = (String, String);
    type IntoIter = std::collections::btree_map::IntoIter<String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.files.into_iter()
    }
}
