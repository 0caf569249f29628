//! Error types for content-press
//!
//! This module provides the error taxonomy for the pipeline:
//! - Fatal setup errors (configuration, credentials, asset directory, database)
//! - Per-slot generation errors, classified for the retry controller
//! - Per-record publish errors
//!
//! Only the fatal classes ever abort a batch. Generation errors are recovered
//! by fallback substitution and publish errors are recorded per record.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for content-press operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for content-press
///
/// Each variant includes contextual information to help diagnose issues.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "assets.asset_dir")
        key: Option<String>,
    },

    /// Credential provider could not be set up (missing binary, bad command)
    #[error("credential error: {0}")]
    Credential(String),

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Asset store error
    #[error("asset store error: {0}")]
    AssetStore(#[from] AssetStoreError),

    /// Generation error that escaped the retry controller
    #[error("generation error: {0}")]
    Generation(#[from] GenerationError),

    /// Publishing a record to the content store failed
    #[error("publish error: {0}")]
    Publish(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The batch was cancelled before completion
    #[error("batch cancelled")]
    Cancelled,

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build a configuration error for a specific key
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Whether this error must abort the whole run
    ///
    /// Fatal errors are reported once, before any record is processed.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Config { .. } | Error::Credential(_) => true,
            Error::Database(DatabaseError::ConnectionFailed(_))
            | Error::Database(DatabaseError::MigrationFailed(_)) => true,
            Error::AssetStore(AssetStoreError::NotWritable { .. }) => true,
            _ => false,
        }
    }

    /// Machine-readable error code used in logs and the batch summary
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Credential(_) => "credential_error",
            Error::Database(_) | Error::Sqlx(_) => "database_error",
            Error::AssetStore(e) => match e {
                AssetStoreError::NotWritable { .. } => "asset_dir_not_writable",
                AssetStoreError::InvalidKey(_) => "invalid_asset_key",
                AssetStoreError::WriteFailed { .. } => "asset_write_failed",
            },
            Error::Generation(e) => e.code(),
            Error::Publish(_) => "publish_error",
            Error::Io(_) => "io_error",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::Cancelled => "cancelled",
            Error::Other(_) => "internal_error",
        }
    }
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Stored row could not be decoded into a record
    #[error("corrupt row for slug {slug}: {reason}")]
    CorruptRow {
        /// Slug of the offending row
        slug: String,
        /// What failed to decode
        reason: String,
    },

    /// Constraint violation (e.g., duplicate slug)
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
}

/// Asset store errors
#[derive(Debug, Error)]
pub enum AssetStoreError {
    /// The asset directory cannot be created or written to
    #[error("asset directory {path} is not writable: {reason}")]
    NotWritable {
        /// The asset directory
        path: PathBuf,
        /// Underlying cause
        reason: String,
    },

    /// Key would produce an unsafe or ambiguous filename
    #[error("invalid asset key {0:?}")]
    InvalidKey(String),

    /// Writing a new asset failed
    #[error("failed to write asset {key} to {path}: {reason}")]
    WriteFailed {
        /// Asset key
        key: String,
        /// Path being written
        path: PathBuf,
        /// Underlying cause
        reason: String,
    },
}

/// Outcome classes of a single generation call
///
/// The retry controller decides what to do from the class alone:
/// rate limits and transient faults are retried, everything else is final.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationError {
    /// Quota exceeded; retry after a cooldown
    #[error("rate limited by generation service")]
    RateLimited {
        /// Server-provided hint, if any
        retry_after: Option<Duration>,
    },

    /// Network or server fault; retry after a short delay
    #[error("transient generation failure: {0}")]
    Transient(String),

    /// Content policy, safety filter or malformed request; never retried
    #[error("generation rejected: {0}")]
    Rejected(String),

    /// No credential could be obtained for this call
    #[error("generation unavailable: {0}")]
    Unavailable(String),
}

impl GenerationError {
    /// Machine-readable code for this class
    pub fn code(&self) -> &'static str {
        match self {
            GenerationError::RateLimited { .. } => "rate_limited",
            GenerationError::Transient(_) => "transient",
            GenerationError::Rejected(_) => "rejected",
            GenerationError::Unavailable(_) => "unavailable",
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classes_are_fatal() {
        assert!(Error::config("assets.asset_dir", "missing").is_fatal());
        assert!(Error::Credential("gcloud not found".into()).is_fatal());
        assert!(
            Error::AssetStore(AssetStoreError::NotWritable {
                path: PathBuf::from("/ro"),
                reason: "read-only file system".into(),
            })
            .is_fatal()
        );
        assert!(Error::Database(DatabaseError::MigrationFailed("v1".into())).is_fatal());
    }

    #[test]
    fn per_record_errors_are_not_fatal() {
        assert!(!Error::Publish("store unavailable".into()).is_fatal());
        assert!(!Error::Database(DatabaseError::QueryFailed("locked".into())).is_fatal());
        assert!(!Error::Generation(GenerationError::Rejected("policy".into())).is_fatal());
        assert!(!Error::Other("x".into()).is_fatal());
    }

    #[test]
    fn config_helper_records_key() {
        match Error::config("retry.max_attempts", "must be positive") {
            Error::Config { message, key } => {
                assert_eq!(message, "must be positive");
                assert_eq!(key.as_deref(), Some("retry.max_attempts"));
            }
            other => panic!("expected Config, got {other:?}"),
        }
    }

    #[test]
    fn error_codes_cover_generation_classes() {
        let cases = [
            (GenerationError::RateLimited { retry_after: None }, "rate_limited"),
            (GenerationError::Transient("503".into()), "transient"),
            (GenerationError::Rejected("policy".into()), "rejected"),
            (GenerationError::Unavailable("no token".into()), "unavailable"),
        ];
        for (err, code) in cases {
            assert_eq!(err.code(), code);
            assert_eq!(Error::Generation(err).error_code(), code);
        }
    }

    #[test]
    fn display_includes_context() {
        let err = Error::AssetStore(AssetStoreError::WriteFailed {
            key: "post-01".into(),
            path: PathBuf::from("/assets/post-01_x.png"),
            reason: "disk full".into(),
        });
        let msg = err.to_string();
        assert!(msg.contains("post-01"));
        assert!(msg.contains("disk full"));
    }
}
