//! # content-press
//!
//! Idempotent asset-generation and publishing pipeline for templated
//! content records.
//!
//! Each template declares a body with placeholder tokens and an ordered list
//! of image slots. The pipeline generates an image per slot through a
//! rate-limited external service, caches it under a deterministic key,
//! substitutes the references into the body, validates the result and
//! publishes it to a slug-keyed store.
//!
//! ## Design Philosophy
//!
//! - **Resumable** - Assets are keyed by slug and slot index; a re-run never
//!   generates what already exists
//! - **Failure-contained** - A failed slot falls back, a failed record is
//!   skipped, and the batch always finishes
//! - **Quota-aware** - Bounded retries, rate-limit cooldowns, and a mandatory
//!   cooldown after every successful call
//! - **Event-driven** - Consumers subscribe to pipeline events
//!
//! ## Quick Start
//!
//! ```no_run
//! use content_press::{Config, Pipeline, TemplateRegistry};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_json_file(Path::new("content-press.json"))?;
//!     let registry = TemplateRegistry::from_json_file(Path::new("templates.json"))?;
//!
//!     let pipeline = Pipeline::new(config).await?;
//!
//!     let mut events = pipeline.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let summary = pipeline.run_batch(&registry).await;
//!     println!("{summary}");
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Content assembly (token substitution, cover selection)
pub mod assembler;
/// Idempotent asset store
pub mod assets;
/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Error types
pub mod error;
/// Image generation client
pub mod generation;
/// Request rate limiting with token bucket
pub mod limiter;
/// Batch orchestration
pub mod pipeline;
/// Publishing to the content store
pub mod publisher;
/// Content templates and generation slots
pub mod registry;
/// Quota-aware retry controller
pub mod retry;
/// Core types and events
pub mod types;
/// Pre-publish validation
pub mod validator;

// Re-export commonly used types
pub use assets::{AssetStore, FsAssetStore};
pub use config::{Config, PublishMode};
pub use db::Database;
pub use error::{AssetStoreError, DatabaseError, Error, GenerationError, Result};
pub use generation::{GenerationClient, GenerationConstraints, HttpGenerationClient};
pub use pipeline::{BatchSummary, Collaborators, Pipeline, PublishStatus, RecordOutcome};
pub use publisher::{ContentStore, PublishOutcome, Publisher};
pub use registry::{ContentTemplate, GenerationSlot, TemplateRegistry};
pub use types::{ContentRecord, Event, RecordStage, Slug, SlotOutcome, SlotSource};

use tokio_util::sync::CancellationToken;

/// Run a batch, stopping between records on SIGINT or SIGTERM.
///
/// A record already in progress when the signal arrives finishes normally;
/// the remaining records are listed as not started in the summary.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// ```no_run
/// use content_press::{Config, Pipeline, TemplateRegistry, run_with_shutdown};
///
/// # async fn example(registry: TemplateRegistry) -> content_press::Result<()> {
/// let pipeline = Pipeline::new(Config::default()).await?;
/// let summary = run_with_shutdown(&pipeline, &registry).await;
/// println!("{summary}");
/// # Ok(())
/// # }
/// ```
pub async fn run_with_shutdown(pipeline: &Pipeline, registry: &TemplateRegistry) -> BatchSummary {
    run_until(pipeline, registry, wait_for_signal()).await
}

/// Run a batch, cancelling it between records once `shutdown` completes
async fn run_until<F>(
    pipeline: &Pipeline,
    registry: &TemplateRegistry,
    shutdown: F,
) -> BatchSummary
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    let watcher = tokio::spawn(async move {
        shutdown.await;
        tracing::warn!("Shutdown requested, finishing current record");
        signal_cancel.cancel();
    });

    let summary = pipeline.run_batch_until_cancelled(registry, &cancel).await;
    watcher.abort();
    summary
}

/// Resolves on the first termination signal; feeds [`run_with_shutdown`]
#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration can fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
