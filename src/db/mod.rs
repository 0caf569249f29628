//! Database layer for content-press
//!
//! SQLite persistence for published content records, keyed by slug.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] - Database lifecycle, schema migrations
//! - [`records`] - Content record upsert, replace and lookup

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use sqlx::{FromRow, sqlite::SqlitePool};

use crate::error::DatabaseError;
use crate::types::{ContentRecord, Slug};
use crate::{Error, Result};

mod migrations;
mod records;

/// Content record row as stored
///
/// Localized fields, tags and `extra` are JSON text. Timestamps are
/// nanoseconds since the Unix epoch.
#[derive(Debug, Clone, FromRow)]
pub(crate) struct ContentRow {
    pub slug: String,
    pub title: String,
    pub description: String,
    pub body: String,
    pub cover_image: Option<String>,
    pub tags: String,
    pub extra: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ContentRow {
    /// Encode a record for storage
    pub(crate) fn from_record(record: &ContentRecord) -> Result<Self> {
        Ok(Self {
            slug: record.slug.to_string(),
            title: serde_json::to_string(&record.title)?,
            description: serde_json::to_string(&record.description)?,
            body: serde_json::to_string(&record.body)?,
            cover_image: record.cover_image.clone(),
            tags: serde_json::to_string(&record.tags)?,
            extra: serde_json::to_string(&record.extra)?,
            created_at: encode_timestamp(&record.slug, "created_at", record.created_at)?,
            updated_at: encode_timestamp(&record.slug, "updated_at", record.updated_at)?,
        })
    }

    /// Decode a stored row
    pub(crate) fn into_record(self) -> Result<ContentRecord> {
        let slug = &self.slug;
        Ok(ContentRecord {
            slug: Slug::parse(slug.as_str()).map_err(|e| corrupt(slug, e.to_string()))?,
            title: decode_field(slug, "title", &self.title)?,
            description: decode_field(slug, "description", &self.description)?,
            body: decode_field(slug, "body", &self.body)?,
            cover_image: self.cover_image.clone(),
            tags: decode_field(slug, "tags", &self.tags)?,
            extra: decode_field(slug, "extra", &self.extra)?,
            created_at: DateTime::from_timestamp_nanos(self.created_at),
            updated_at: DateTime::from_timestamp_nanos(self.updated_at),
        })
    }
}

fn corrupt(slug: &str, reason: String) -> Error {
    Error::Database(DatabaseError::CorruptRow {
        slug: slug.to_string(),
        reason,
    })
}

fn decode_field<T: DeserializeOwned>(slug: &str, field: &str, raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| corrupt(slug, format!("{field}: {e}")))
}

// Nanoseconds since the epoch; covers 1677 to 2262.
fn encode_timestamp(slug: &Slug, field: &str, at: DateTime<Utc>) -> Result<i64> {
    at.timestamp_nanos_opt().ok_or_else(|| {
        Error::Database(DatabaseError::QueryFailed(format!(
            "{slug}: {field} {at} cannot be stored"
        )))
    })
}

/// Database handle for content-press
pub struct Database {
    pool: SqlitePool,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
