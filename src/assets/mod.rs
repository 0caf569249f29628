//! Idempotent asset store
//!
//! Assets are addressed by deterministic keys. A key that already has an
//! asset is never generated again, which is what makes an interrupted batch
//! resumable: re-running it only generates what is still missing.
//!
//! ## Submodules
//!
//! - [`fs`] - filesystem-backed store with atomic, never-overwriting writes

use async_trait::async_trait;
use tokio::sync::OwnedMutexGuard;

use crate::error::Result;
use crate::types::Asset;

pub mod fs;

pub use fs::FsAssetStore;

/// Key-addressed store for generated assets
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Look up the asset stored under `key`
    async fn get(&self, key: &str) -> Result<Option<Asset>>;

    /// Whether an asset exists under `key`
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Store `bytes` under `key`
    ///
    /// If the key already has an asset, that asset is returned and `bytes`
    /// are discarded. The returned asset is complete on disk.
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<Asset>;

    /// Take the per-key lock
    ///
    /// Held across lookup, generation and `put` so two workers never
    /// generate the same key.
    async fn lock(&self, key: &str) -> OwnedMutexGuard<()>;
}
