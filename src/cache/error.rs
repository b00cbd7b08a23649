//! Error types for the disk cache.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during cache storage operations.
///
/// Storage failures (disk full, permission denied, corruption) are surfaced
/// to the caller as a failed operation and never retried at this layer.
#[derive(Debug, Error)]
pub enum CacheError {
    /// File system error (create, read, write, rename, remove).
    #[error("cache IO error at {path}: {source}")]
    Io {
        /// The file or directory where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Stored entry metadata could not be parsed.
    #[error("corrupt cache metadata at {path}: {source}")]
    Corrupt {
        /// The metadata file that failed to parse.
        path: PathBuf,
        /// The underlying parse error.
        #[source]
        source: serde_json::Error,
    },
}

impl CacheError {
    /// Creates an IO error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a corrupt-metadata error with path context.
    pub fn corrupt(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Corrupt {
            path: path.into(),
            source,
        }
    }
}

// Note on From trait implementations:
// We intentionally do NOT implement `From<std::io::Error>` because the
// variants require path context the source error doesn't provide. The helper
// constructors are the pattern used throughout this crate.
