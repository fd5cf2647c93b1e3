//! Unified error handling for the ride statistics cache.
//!
//! Most variants describe a cache miss that the service layer recovers from
//! by recomputing. Only source-load failures and unknown channels are meant
//! to reach callers.

use thiserror::Error;

/// Unified error type for cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// No artifact is stored under the key
    #[error("No cached artifact for '{key}'")]
    NotFound { key: String },

    /// Artifact was written by a different format version
    #[error("Artifact '{key}' has version {found}, expected {expected}")]
    VersionMismatch {
        key: String,
        found: u32,
        expected: u32,
    },

    /// Declared counts disagree with the stored bytes, or a read failed mid-stream
    #[error("Artifact '{key}' is corrupt: {reason}")]
    CorruptArtifact { key: String, reason: String },

    /// Caller named a channel outside the defined set
    #[error("Unknown channel '{name}'")]
    UnknownChannel { name: String },

    /// The recording data source could not supply samples
    #[error("Recording '{recording_id}' could not be loaded: {message}")]
    Source {
        recording_id: String,
        message: String,
    },

    /// Storage medium failure
    #[error("Storage error: {message}")]
    Storage { message: String },

    /// Manifest (de)serialization failure
    #[error("Manifest error: {message}")]
    Manifest { message: String },

    /// Configuration could not be parsed
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[cfg(feature = "persistence")]
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

impl CacheError {
    /// True for failures that only mean "recompute": missing, outdated or
    /// unreadable artifacts and storage hiccups.
    pub fn is_cache_miss(&self) -> bool {
        match self {
            CacheError::NotFound { .. }
            | CacheError::VersionMismatch { .. }
            | CacheError::CorruptArtifact { .. }
            | CacheError::Storage { .. }
            | CacheError::Manifest { .. }
            | CacheError::Io(_) => true,
            #[cfg(feature = "persistence")]
            CacheError::Sqlite(_) => true,
            CacheError::UnknownChannel { .. }
            | CacheError::Source { .. }
            | CacheError::Config { .. } => false,
        }
    }

    pub(crate) fn corrupt(key: &str, reason: impl Into<String>) -> Self {
        CacheError::CorruptArtifact {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<rmp_serde::encode::Error> for CacheError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        CacheError::Manifest {
            message: e.to_string(),
        }
    }
}

impl From<rmp_serde::decode::Error> for CacheError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        CacheError::Manifest {
            message: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::Config {
            message: e.to_string(),
        }
    }
}

/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CacheError::VersionMismatch {
            key: "ride-1".to_string(),
            found: 2,
            expected: 1,
        };
        assert!(err.to_string().contains("ride-1"));
        assert!(err.to_string().contains("version 2"));
    }

    #[test]
    fn test_cache_miss_classification() {
        assert!(CacheError::NotFound {
            key: "x".to_string()
        }
        .is_cache_miss());
        assert!(CacheError::corrupt("x", "short read").is_cache_miss());
        assert!(!CacheError::UnknownChannel {
            name: "altitude".to_string()
        }
        .is_cache_miss());
    }
}
