//! Batch orchestration
//!
//! The [`Pipeline`] drives each template through
//! `Pending → GeneratingAssets → Assembling → Validating → Publishing → Done`,
//! one record at a time. Slot failures fall back, validation failures skip
//! the record, publish failures fail the record; none of them stop the batch.
//!
//! - [`record_task`] - Per-record stage machine and slot resolution
//! - [`summary`] - Per-record outcomes and the end-of-run summary

mod record_task;
mod summary;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

pub use summary::{BatchSummary, PublishStatus, RecordOutcome};

use std::sync::Arc;
use tokio::sync::{Semaphore, broadcast};
use tokio_util::sync::CancellationToken;

use crate::assembler::Assembler;
use crate::assets::{AssetStore, FsAssetStore};
use crate::config::Config;
use crate::db::Database;
use crate::error::Result;
use crate::generation::{GenerationClient, GenerationConstraints, HttpGenerationClient};
use crate::limiter::RequestLimiter;
use crate::publisher::{ContentStore, Publisher};
use crate::registry::TemplateRegistry;
use crate::retry::{RetryPolicy, Sleeper, TokioSleeper};
use crate::types::Event;
use crate::validator::Validator;

/// External collaborators of a pipeline
pub struct Collaborators {
    /// Image generation service
    pub client: Arc<dyn GenerationClient>,
    /// Generated asset cache
    pub assets: Arc<dyn AssetStore>,
    /// Destination for published records
    pub store: Arc<dyn ContentStore>,
    /// Source of retry and cooldown delays
    pub sleeper: Arc<dyn Sleeper>,
}

/// Asset generation and publishing pipeline
pub struct Pipeline {
    config: Arc<Config>,
    client: Arc<dyn GenerationClient>,
    assets: Arc<dyn AssetStore>,
    sleeper: Arc<dyn Sleeper>,
    publisher: Publisher,
    assembler: Assembler,
    validator: Validator,
    constraints: GenerationConstraints,
    retry_policy: RetryPolicy,
    limiter: RequestLimiter,
    generation_permits: Arc<Semaphore>,
    event_tx: broadcast::Sender<Event>,
}

impl Pipeline {
    /// Build a pipeline with production collaborators
    ///
    /// Opens the asset directory and the content database and sets up
    /// credentials. Any failure here is fatal and happens before a single
    /// record is processed.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let client = HttpGenerationClient::from_config(&config.generation)?;
        let assets = FsAssetStore::from_config(&config.assets).await?;
        let store = Database::new(&config.publish.database_path).await?;

        Self::with_collaborators(
            config,
            Collaborators {
                client: Arc::new(client),
                assets: Arc::new(assets),
                store: Arc::new(store),
                sleeper: Arc::new(TokioSleeper),
            },
        )
    }

    /// Build a pipeline around explicit collaborators
    pub fn with_collaborators(config: Config, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;

        let (event_tx, _rx) = broadcast::channel(1000);
        let workers = config.limiter.max_concurrent_generations.max(1);

        tracing::debug!(
            client = collaborators.client.name(),
            workers,
            requests_per_minute = ?config.limiter.requests_per_minute,
            "Pipeline configured"
        );

        Ok(Self {
            publisher: Publisher::new(collaborators.store, &config.publish),
            assembler: Assembler::new(&config.assembly),
            validator: Validator::new(&config.validation),
            constraints: GenerationConstraints::from_config(&config.generation),
            retry_policy: RetryPolicy::from(&config.retry),
            limiter: RequestLimiter::new(config.limiter.requests_per_minute),
            generation_permits: Arc::new(Semaphore::new(workers)),
            client: collaborators.client,
            assets: collaborators.assets,
            sleeper: collaborators.sleeper,
            config: Arc::new(config),
            event_tx,
        })
    }

    /// Subscribe to pipeline events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// The active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Process every template in `registry`
    pub async fn run_batch(&self, registry: &TemplateRegistry) -> BatchSummary {
        self.run_batch_until_cancelled(registry, &CancellationToken::new())
            .await
    }

    /// Process templates until done or `cancel` fires
    ///
    /// Cancellation is checked between records. A record that has started
    /// always runs to a terminal stage.
    pub async fn run_batch_until_cancelled(
        &self,
        registry: &TemplateRegistry,
        cancel: &CancellationToken,
    ) -> BatchSummary {
        let mut summary = BatchSummary::default();

        tracing::info!(records = registry.len(), "Batch started");
        self.emit(Event::BatchStarted {
            records: registry.len(),
        });

        for template in registry.iter() {
            if cancel.is_cancelled() {
                summary.not_started.push(template.slug().clone());
                continue;
            }
            let outcome = self.process_record(template).await;
            summary.records.push(outcome);
        }

        if summary.was_cancelled() {
            tracing::warn!(
                not_started = summary.not_started.len(),
                "Batch cancelled before all records ran"
            );
        }

        tracing::info!(
            published = summary.published(),
            skipped = summary.skipped(),
            failed = summary.failed(),
            generation_calls = summary.generation_calls(),
            "Batch complete"
        );
        self.emit(Event::BatchComplete {
            published: summary.published(),
            skipped: summary.skipped(),
            failed: summary.failed(),
        });

        summary
    }

    fn emit(&self, event: Event) {
        self.event_tx.send(event).ok();
    }
}
