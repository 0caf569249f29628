//! Filesystem asset store
//!
//! Layout is a flat directory. An asset for key `post-01` is stored as
//! `post-01_<suffix>.<ext>`, where the suffix is a UTC timestamp plus random
//! hex. Writes go to a hidden `.part` file first and are published with a
//! hard link, so a reader either sees the complete file or nothing.

use async_trait::async_trait;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::AssetStore;
use crate::config::AssetConfig;
use crate::error::{AssetStoreError, Error, Result};
use crate::types::Asset;

/// Asset store rooted at a local directory
pub struct FsAssetStore {
    dir: PathBuf,
    public_prefix: String,
    extension: String,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl FsAssetStore {
    /// Open (and create) the asset directory
    ///
    /// Writability is probed up front. A directory that cannot be written
    /// is a fatal setup error, never a per-slot failure.
    pub async fn open(
        dir: impl Into<PathBuf>,
        public_prefix: impl Into<String>,
        extension: impl Into<String>,
    ) -> Result<Self> {
        let dir = dir.into();
        let not_writable = |reason: String| {
            Error::AssetStore(AssetStoreError::NotWritable {
                path: dir.clone(),
                reason,
            })
        };

        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| not_writable(e.to_string()))?;

        let probe = dir.join(format!(".write-probe-{}", random_hex()));
        tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&probe)
            .await
            .map_err(|e| not_writable(e.to_string()))?;
        tokio::fs::remove_file(&probe)
            .await
            .map_err(|e| not_writable(e.to_string()))?;

        let public_prefix = public_prefix.into().trim_end_matches('/').to_string();
        let extension = extension.into().trim_start_matches('.').to_string();

        tracing::info!(
            dir = %dir.display(),
            public_prefix = %public_prefix,
            "Opened asset store"
        );

        Ok(Self {
            dir,
            public_prefix,
            extension,
            locks: Mutex::new(HashMap::new()),
        })
    }

    /// Open the store described by configuration
    pub async fn from_config(config: &AssetConfig) -> Result<Self> {
        Self::open(
            config.asset_dir.clone(),
            config.public_prefix.clone(),
            config.extension.clone(),
        )
        .await
    }

    /// The asset directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn reference_for(&self, file_name: &str) -> String {
        format!("{}/{}", self.public_prefix, file_name)
    }

    async fn describe(&self, key: &str, path: PathBuf, file_name: &str) -> Result<Asset> {
        let bytes = tokio::fs::read(&path).await?;
        Ok(Asset {
            key: key.to_string(),
            reference: self.reference_for(file_name),
            size_bytes: bytes.len() as u64,
            content_hash: content_hash(&bytes),
            path,
        })
    }

    /// Earliest visible file whose name starts with `{key}_`
    async fn find(&self, key: &str) -> Result<Option<(PathBuf, String)>> {
        let prefix = format!("{key}_");
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut best: Option<(PathBuf, String)> = None;

        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name.starts_with('.') || !name.starts_with(&prefix) {
                continue;
            }
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if best.as_ref().is_none_or(|(_, current)| name < *current) {
                best = Some((entry.path(), name));
            }
        }

        Ok(best)
    }

    async fn write_new(&self, key: &str, bytes: &[u8]) -> Result<(PathBuf, String)> {
        let suffix = unique_suffix();
        let file_name = format!("{key}_{suffix}.{}", self.extension);
        let temp_path = self.dir.join(format!(".{key}.{suffix}.part"));
        let final_path = self.dir.join(&file_name);

        let write_failed = |path: &Path, e: std::io::Error| {
            Error::AssetStore(AssetStoreError::WriteFailed {
                key: key.to_string(),
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
        };

        let written = async {
            let mut file = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&temp_path)
                .await?;
            file.write_all(bytes).await?;
            file.flush().await?;
            file.sync_all().await?;
            Ok::<(), std::io::Error>(())
        }
        .await;

        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(write_failed(&temp_path, e));
        }

        // The link fails instead of replacing an existing file.
        match tokio::fs::hard_link(&temp_path, &final_path).await {
            Ok(()) => {
                let _ = tokio::fs::remove_file(&temp_path).await;
            }
            Err(e) if e.kind() == ErrorKind::Unsupported => {
                tokio::fs::rename(&temp_path, &final_path)
                    .await
                    .map_err(|e| write_failed(&final_path, e))?;
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&temp_path).await;
                return Err(write_failed(&final_path, e));
            }
        }

        Ok((final_path, file_name))
    }
}

#[async_trait]
impl AssetStore for FsAssetStore {
    async fn get(&self, key: &str) -> Result<Option<Asset>> {
        validate_key(key)?;
        match self.find(key).await? {
            Some((path, name)) => Ok(Some(self.describe(key, path, &name).await?)),
            None => Ok(None),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        Ok(self.find(key).await?.is_some())
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<Asset> {
        validate_key(key)?;

        if let Some(existing) = self.get(key).await? {
            tracing::debug!(
                key = %key,
                path = %existing.path.display(),
                "Asset already stored, keeping cached copy"
            );
            return Ok(existing);
        }

        let (path, file_name) = self.write_new(key, bytes).await?;
        tracing::info!(
            key = %key,
            path = %path.display(),
            size_bytes = bytes.len(),
            "Stored generated asset"
        );

        Ok(Asset {
            key: key.to_string(),
            reference: self.reference_for(&file_name),
            size_bytes: bytes.len() as u64,
            content_hash: content_hash(bytes),
            path,
        })
    }

    async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            // Entries only the map still references are neither held nor awaited.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

/// Keys become filename prefixes, so only `[a-z0-9-]` is allowed
fn validate_key(key: &str) -> Result<()> {
    let valid = !key.is_empty()
        && !key.starts_with('-')
        && key
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if valid {
        Ok(())
    } else {
        Err(Error::AssetStore(AssetStoreError::InvalidKey(key.to_string())))
    }
}

fn content_hash(bytes: &[u8]) -> String {
    format!("sha256:{:x}", Sha256::digest(bytes))
}

fn random_hex() -> String {
    format!("{:08x}", rand::thread_rng().r#gen::<u32>())
}

fn unique_suffix() -> String {
    format!(
        "{}{}",
        chrono::Utc::now().format("%Y%m%dT%H%M%S%3f"),
        random_hex()
    )
}
