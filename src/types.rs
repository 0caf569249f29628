//! Core types for content-press

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::OnceLock;

use crate::error::{Error, Result};

/// Text keyed by locale code (e.g. "en", "de")
pub type LocalizedText = BTreeMap<String, String>;

/// Natural key of a content record
///
/// Lowercase ASCII words joined by single hyphens. The slug is also the
/// prefix of every asset key of the record, so it must be filename-safe.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Slug(String);

impl Slug {
    /// Parse and validate a slug
    pub fn parse(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if !slug_pattern().is_match(&value) {
            return Err(Error::config(
                "slug",
                format!("invalid slug '{value}' (expected lowercase words joined by '-')"),
            ));
        }
        Ok(Self(value))
    }

    /// Borrow the slug as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// The pattern is a literal; compiling it cannot fail.
#[allow(clippy::expect_used)]
fn slug_pattern() -> &'static regex::Regex {
    static PATTERN: OnceLock<regex::Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        regex::Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)*$").expect("slug pattern is valid")
    })
}

impl TryFrom<String> for Slug {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Slug::parse(value)
    }
}

impl From<Slug> for String {
    fn from(slug: Slug) -> Self {
        slug.0
    }
}

impl AsRef<str> for Slug {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Slug {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A content record as it is published
///
/// Created from a template, mutated only by token substitution, and written
/// whole by the publisher. Later publishes supersede it entirely.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContentRecord {
    /// Unique natural key
    pub slug: Slug,
    /// Localized titles
    pub title: LocalizedText,
    /// Localized short descriptions
    pub description: LocalizedText,
    /// Localized bodies (placeholder tokens until assembled)
    pub body: LocalizedText,
    /// Public reference of the cover image
    pub cover_image: Option<String>,
    /// Free-form tags
    pub tags: Vec<String>,
    /// Opaque metadata passed through to the store
    pub extra: serde_json::Value,
    /// When the record was first created
    pub created_at: DateTime<Utc>,
    /// When the record was last assembled
    pub updated_at: DateTime<Utc>,
}

/// A generated image on disk
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    /// Deterministic key the asset was stored under
    pub key: String,
    /// Location on disk
    pub path: PathBuf,
    /// Public reference substituted into bodies
    pub reference: String,
    /// Size in bytes
    pub size_bytes: u64,
    /// Content hash ("sha256:<hex>")
    pub content_hash: String,
}

/// Where a slot's reference came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotSource {
    /// Found in the asset directory from an earlier run
    Cached,
    /// Generated during this run
    Generated,
    /// Generation failed permanently; the slot's fallback was used
    Fallback,
}

impl SlotSource {
    /// Whether the reference points to a generated image (fresh or cached)
    pub fn is_resolved(&self) -> bool {
        matches!(self, SlotSource::Cached | SlotSource::Generated)
    }
}

/// Resolution of one slot, exactly one reference per slot
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotOutcome {
    /// 1-based slot index
    pub index: usize,
    /// Deterministic asset key
    pub key: String,
    /// Reference substituted for the slot token
    pub reference: String,
    /// Where the reference came from
    pub source: SlotSource,
    /// Generation calls spent on this slot in this run
    pub attempts: u32,
    /// Why generation failed, for fallback slots
    pub failure: Option<String>,
}

/// Per-record pipeline stage
///
/// Stages only move forward; a record never returns to an earlier stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStage {
    /// Not started
    Pending,
    /// Resolving slots (cache, generation, fallback)
    GeneratingAssets,
    /// Substituting tokens
    Assembling,
    /// Running pre-publish checks
    Validating,
    /// Writing to the content store
    Publishing,
    /// Finished successfully
    Done,
    /// Finished without publishing
    Failed,
}

impl RecordStage {
    /// Move to `next`, refusing backwards or out-of-terminal transitions
    pub fn advance(self, next: RecordStage) -> Result<RecordStage> {
        let allowed = match self {
            RecordStage::Done | RecordStage::Failed => false,
            _ if next == RecordStage::Failed => true,
            _ => next > self && next != RecordStage::Failed,
        };
        if allowed {
            Ok(next)
        } else {
            Err(Error::Other(format!(
                "invalid stage transition {self:?} -> {next:?}"
            )))
        }
    }

    /// Whether the record has finished
    pub fn is_terminal(&self) -> bool {
        matches!(self, RecordStage::Done | RecordStage::Failed)
    }
}

/// Events emitted while a batch runs
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    /// A batch started
    BatchStarted {
        /// Number of records in the batch
        records: usize,
    },
    /// A record moved to a new stage
    StageChanged {
        /// Record slug
        slug: Slug,
        /// New stage
        stage: RecordStage,
    },
    /// A slot resolved to a generated image
    SlotResolved {
        /// Record slug
        slug: Slug,
        /// 1-based slot index
        index: usize,
        /// Cached or Generated
        source: SlotSource,
        /// Public reference
        reference: String,
    },
    /// A slot fell back to its fallback reference
    SlotFallback {
        /// Record slug
        slug: Slug,
        /// 1-based slot index
        index: usize,
        /// Why generation failed
        reason: String,
    },
    /// A record was written to the content store
    RecordPublished {
        /// Record slug
        slug: Slug,
        /// Number of slots that used fallbacks
        fallbacks: usize,
    },
    /// A record failed validation and was not published
    RecordSkipped {
        /// Record slug
        slug: Slug,
        /// Violations found
        violations: Vec<String>,
    },
    /// A record could not be published
    RecordFailed {
        /// Record slug
        slug: Slug,
        /// Failure reason
        error: String,
    },
    /// The batch finished
    BatchComplete {
        /// Records published
        published: usize,
        /// Records skipped by validation
        skipped: usize,
        /// Records whose publish failed
        failed: usize,
    },
}
