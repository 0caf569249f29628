//! Per-record outcomes and the end-of-run summary

use std::fmt;

use crate::config::PublishMode;
use crate::types::{RecordStage, Slug, SlotOutcome, SlotSource};
use crate::validator::Violation;

/// What happened to a record at the publish step
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PublishStatus {
    /// Written to the content store
    Published(PublishMode),
    /// Dry run; everything but the write succeeded
    DryRun,
    /// Not published because validation failed
    Skipped(Vec<Violation>),
    /// Assembly or the store write failed
    Failed(String),
}

/// Outcome of one record
#[derive(Clone, Debug)]
pub struct RecordOutcome {
    /// Record slug
    pub slug: Slug,
    /// Final stage reached
    pub stage: RecordStage,
    /// Publish status
    pub status: PublishStatus,
    /// One outcome per declared slot, in declared order
    pub slots: Vec<SlotOutcome>,
}

impl RecordOutcome {
    fn count(&self, source: SlotSource) -> usize {
        self.slots.iter().filter(|s| s.source == source).count()
    }

    /// Slots generated in this run
    pub fn generated(&self) -> usize {
        self.count(SlotSource::Generated)
    }

    /// Slots served from earlier runs
    pub fn cached(&self) -> usize {
        self.count(SlotSource::Cached)
    }

    /// Slots that used their fallback
    pub fn fallbacks(&self) -> usize {
        self.count(SlotSource::Fallback)
    }

    /// Generation calls made for this record
    pub fn generation_calls(&self) -> u32 {
        self.slots.iter().map(|s| s.attempts).sum()
    }

    /// Whether the record reached the store (or would have, in a dry run)
    pub fn is_published(&self) -> bool {
        matches!(
            self.status,
            PublishStatus::Published(_) | PublishStatus::DryRun
        )
    }
}

/// Outcomes of a whole batch
#[derive(Clone, Debug, Default)]
pub struct BatchSummary {
    /// Outcomes in processing order
    pub records: Vec<RecordOutcome>,
    /// Records never started because the batch was cancelled
    pub not_started: Vec<Slug>,
}

impl BatchSummary {
    /// Records published (including dry runs)
    pub fn published(&self) -> usize {
        self.records.iter().filter(|r| r.is_published()).count()
    }

    /// Records skipped by validation
    pub fn skipped(&self) -> usize {
        self.records
            .iter()
            .filter(|r| matches!(r.status, PublishStatus::Skipped(_)))
            .count()
    }

    /// Records that failed to assemble or publish
    pub fn failed(&self) -> usize {
        self.records
            .iter()
            .filter(|r| matches!(r.status, PublishStatus::Failed(_)))
            .count()
    }

    /// Slugs worth re-running: skipped, failed, or never started
    pub fn failed_slugs(&self) -> Vec<Slug> {
        self.records
            .iter()
            .filter(|r| !r.is_published())
            .map(|r| r.slug.clone())
            .chain(self.not_started.iter().cloned())
            .collect()
    }

    /// Whether the batch was cut short
    pub fn was_cancelled(&self) -> bool {
        !self.not_started.is_empty()
    }

    /// Whether every record in the batch was published
    pub fn all_published(&self) -> bool {
        self.not_started.is_empty() && self.records.iter().all(RecordOutcome::is_published)
    }

    /// Generation calls made across the batch
    pub fn generation_calls(&self) -> u32 {
        self.records.iter().map(RecordOutcome::generation_calls).sum()
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<40} {:<10} {:>9} {:>6} {:>9}",
            "slug", "status", "generated", "cached", "fallback"
        )?;
        for record in &self.records {
            let status = match &record.status {
                PublishStatus::Published(_) => "published",
                PublishStatus::DryRun => "dry-run",
                PublishStatus::Skipped(_) => "skipped",
                PublishStatus::Failed(_) => "failed",
            };
            writeln!(
                f,
                "{:<40} {:<10} {:>9} {:>6} {:>9}",
                record.slug.as_str(),
                status,
                record.generated(),
                record.cached(),
                record.fallbacks()
            )?;
            match &record.status {
                PublishStatus::Skipped(violations) => {
                    for violation in violations {
                        writeln!(f, "    - {violation}")?;
                    }
                }
                PublishStatus::Failed(reason) => writeln!(f, "    - {reason}")?,
                _ => {}
            }
        }
        for slug in &self.not_started {
            writeln!(f, "{:<40} {:<10}", slug.as_str(), "cancelled")?;
        }
        write!(
            f,
            "{} published, {} skipped, {} failed",
            self.published(),
            self.skipped(),
            self.failed()
        )?;
        if self.was_cancelled() {
            write!(f, ", {} not started", self.not_started.len())?;
        }
        Ok(())
    }
}
