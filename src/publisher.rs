//! Publishing finished records to a slug-keyed content store

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{PublishConfig, PublishMode};
use crate::db::Database;
use crate::error::Result;
use crate::types::ContentRecord;

/// Slug-keyed store of published records
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Insert, or overwrite the record with the same slug
    async fn upsert(&self, record: &ContentRecord) -> Result<()>;

    /// Delete any record with the same slug, then insert, atomically
    async fn replace(&self, record: &ContentRecord) -> Result<()>;

    /// Fetch the record with `slug`
    async fn get(&self, slug: &str) -> Result<Option<ContentRecord>>;

    /// Number of stored records
    async fn count(&self) -> Result<u64>;
}

#[async_trait]
impl ContentStore for Database {
    async fn upsert(&self, record: &ContentRecord) -> Result<()> {
        self.upsert_record(record).await
    }

    async fn replace(&self, record: &ContentRecord) -> Result<()> {
        self.replace_record(record).await
    }

    async fn get(&self, slug: &str) -> Result<Option<ContentRecord>> {
        self.get_record(slug).await
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.count_records().await?.max(0) as u64)
    }
}

/// Result of publishing one record
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Written to the store
    Published(PublishMode),
    /// Dry run; nothing written
    DryRun,
    /// The store refused or failed
    Failed(String),
}

/// Writes assembled, validated records
pub struct Publisher {
    store: Arc<dyn ContentStore>,
    mode: PublishMode,
    dry_run: bool,
}

impl Publisher {
    /// Create a publisher over `store`
    pub fn new(store: Arc<dyn ContentStore>, config: &PublishConfig) -> Self {
        Self {
            store,
            mode: config.mode,
            dry_run: config.dry_run,
        }
    }

    /// Publish `record` with the configured mode
    pub async fn publish(&self, record: &ContentRecord) -> PublishOutcome {
        self.publish_with(record, self.mode).await
    }

    /// Publish `record` with an explicit mode
    ///
    /// Errors are returned as [`PublishOutcome::Failed`] so one failed
    /// record never stops the batch.
    pub async fn publish_with(&self, record: &ContentRecord, mode: PublishMode) -> PublishOutcome {
        if self.dry_run {
            tracing::info!(slug = %record.slug, mode = %mode, "Dry run, skipping publish");
            return PublishOutcome::DryRun;
        }

        let result = match mode {
            PublishMode::Upsert => self.store.upsert(record).await,
            PublishMode::Replace => self.store.replace(record).await,
        };

        match result {
            Ok(()) => {
                tracing::info!(slug = %record.slug, mode = %mode, "Published record");
                PublishOutcome::Published(mode)
            }
            Err(e) => {
                tracing::error!(
                    slug = %record.slug,
                    mode = %mode,
                    error = %e,
                    code = e.error_code(),
                    "Publish failed"
                );
                PublishOutcome::Failed(e.to_string())
            }
        }
    }

    /// The underlying store
    pub fn store(&self) -> &Arc<dyn ContentStore> {
        &self.store
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::types::Slug;
    use chrono::{DateTime, Utc};
    use tempfile::NamedTempFile;

    fn record(title: &str, secs: i64) -> ContentRecord {
        let at: DateTime<Utc> = DateTime::from_timestamp(secs, 0).unwrap();
        ContentRecord {
            slug: Slug::parse("trail-guide").unwrap(),
            title: [("en".to_string(), title.to_string())].into(),
            description: Default::default(),
            body: [("en".to_string(), format!("{title} body"))].into(),
            cover_image: None,
            tags: vec![],
            extra: serde_json::Value::Null,
            created_at: at,
            updated_at: at,
        }
    }

    async fn publisher(mode: PublishMode, dry_run: bool) -> (NamedTempFile, Publisher) {
        let file = NamedTempFile::new().unwrap();
        let db = Database::new(file.path()).await.unwrap();
        let config = PublishConfig {
            mode,
            dry_run,
            ..Default::default()
        };
        (file, Publisher::new(Arc::new(db), &config))
    }

    #[tokio::test]
    async fn upsert_twice_keeps_one_record_with_latest_values() {
        let (_file, publisher) = publisher(PublishMode::Upsert, false).await;

        assert_eq!(
            publisher.publish(&record("First", 1_700_000_000)).await,
            PublishOutcome::Published(PublishMode::Upsert)
        );
        publisher.publish(&record("Second", 1_700_000_100)).await;

        assert_eq!(publisher.store().count().await.unwrap(), 1);
        let stored = publisher.store().get("trail-guide").await.unwrap().unwrap();
        assert_eq!(stored.title["en"], "Second");
    }

    #[tokio::test]
    async fn replace_matches_new_input_exactly() {
        let (_file, publisher) = publisher(PublishMode::Replace, false).await;

        let mut first = record("First", 1_700_000_000);
        first.cover_image = Some("/old.png".into());
        first.tags = vec!["old".into()];
        publisher.publish(&first).await;

        let mut second = record("Second", 0);
        second.created_at = Utc::now();
        second.updated_at = second.created_at;
        publisher.publish(&second).await;

        let stored = publisher.store().get("trail-guide").await.unwrap().unwrap();
        assert_eq!(stored, second);
    }

    #[tokio::test]
    async fn dry_run_writes_nothing() {
        let (_file, publisher) = publisher(PublishMode::Upsert, true).await;
        assert_eq!(
            publisher.publish(&record("First", 1_700_000_000)).await,
            PublishOutcome::DryRun
        );
        assert_eq!(publisher.store().count().await.unwrap(), 0);
    }

    struct FailingStore;

    #[async_trait]
    impl ContentStore for FailingStore {
        async fn upsert(&self, _: &ContentRecord) -> Result<()> {
            Err(Error::Publish("store offline".into()))
        }
        async fn replace(&self, _: &ContentRecord) -> Result<()> {
            Err(Error::Publish("store offline".into()))
        }
        async fn get(&self, _: &str) -> Result<Option<ContentRecord>> {
            Ok(None)
        }
        async fn count(&self) -> Result<u64> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn store_errors_become_failed_outcomes() {
        let publisher = Publisher::new(Arc::new(FailingStore), &PublishConfig::default());
        match publisher.publish(&record("First", 1_700_000_000)).await {
            PublishOutcome::Failed(reason) => assert!(reason.contains("store offline")),
            other => panic!("expected Failed, got {other:?}"),
        }
    }
}
