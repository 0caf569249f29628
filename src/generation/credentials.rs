//! Credential providers for the generation service

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::config::CredentialConfig;
use crate::error::{Error, Result};

/// Short-lived bearer token
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Wrap a token
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token, for the Authorization header
    pub fn token(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Source of credentials, consulted before every generation call
///
/// `Ok(None)` means no credential is available right now. The client maps
/// both `Ok(None)` and `Err` to an unavailable generation step.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Fetch a credential
    async fn credential(&self) -> Result<Option<Credential>>;
}

/// Fixed token from configuration
pub struct StaticCredentials {
    credential: Credential,
}

impl StaticCredentials {
    /// Create a provider that always returns `token`
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            credential: Credential::new(token),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn credential(&self) -> Result<Option<Credential>> {
        if self.credential.token().is_empty() {
            return Ok(None);
        }
        Ok(Some(self.credential.clone()))
    }
}

/// Token read from an environment variable on every call
pub struct EnvCredentials {
    var: String,
}

impl EnvCredentials {
    /// Read the token from `var`
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

#[async_trait]
impl CredentialProvider for EnvCredentials {
    async fn credential(&self) -> Result<Option<Credential>> {
        match std::env::var(&self.var) {
            Ok(token) if !token.trim().is_empty() => Ok(Some(Credential::new(token.trim()))),
            _ => Ok(None),
        }
    }
}

/// Token printed on stdout by an external command (e.g. `gcloud auth print-access-token`)
///
/// Tokens are cached for `ttl` so a batch does not spawn one process per call.
pub struct CommandCredentials {
    binary_path: PathBuf,
    args: Vec<String>,
    ttl: Duration,
    cached: Mutex<Option<(Credential, Instant)>>,
}

impl CommandCredentials {
    /// Create a provider with an explicit binary path
    pub fn new(binary_path: PathBuf, args: Vec<String>, ttl: Duration) -> Self {
        Self {
            binary_path,
            args,
            ttl,
            cached: Mutex::new(None),
        }
    }

    /// Locate `program` in PATH
    ///
    /// A missing binary is a fatal setup error, reported before any record runs.
    pub fn from_path(program: &str, args: Vec<String>, ttl: Duration) -> Result<Self> {
        let binary_path = which::which(program).map_err(|e| {
            Error::Credential(format!("credential command '{program}' not found: {e}"))
        })?;
        Ok(Self::new(binary_path, args, ttl))
    }

    async fn fetch(&self) -> Result<Option<Credential>> {
        let output = Command::new(&self.binary_path)
            .args(&self.args)
            .output()
            .await
            .map_err(|e| {
                Error::Credential(format!(
                    "failed to execute {}: {}",
                    self.binary_path.display(),
                    e
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::warn!(
                command = %self.binary_path.display(),
                status = ?output.status.code(),
                stderr = %stderr.trim(),
                "Credential command failed"
            );
            return Ok(None);
        }

        let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if token.is_empty() {
            return Ok(None);
        }
        Ok(Some(Credential::new(token)))
    }
}

#[async_trait]
impl CredentialProvider for CommandCredentials {
    async fn credential(&self) -> Result<Option<Credential>> {
        let mut cached = self.cached.lock().await;
        if let Some((credential, fetched_at)) = cached.as_ref()
            && fetched_at.elapsed() < self.ttl
        {
            return Ok(Some(credential.clone()));
        }

        let fresh = self.fetch().await?;
        *cached = fresh.clone().map(|c| (c, Instant::now()));
        Ok(fresh)
    }
}

/// Build the configured credential provider
pub fn provider_from_config(config: &CredentialConfig) -> Result<Box<dyn CredentialProvider>> {
    Ok(match config {
        CredentialConfig::Static { token } => Box::new(StaticCredentials::new(token.clone())),
        CredentialConfig::Env { var } => Box::new(EnvCredentials::new(var.clone())),
        CredentialConfig::Command { program, args, ttl } => Box::new(
            CommandCredentials::from_path(program, args.clone(), *ttl)?,
        ),
    })
}
