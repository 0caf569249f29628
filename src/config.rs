//! Configuration types for content-press

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Generation service settings (endpoint, fixed constraints, credentials)
///
/// The constraint fields are sent verbatim with every request; the pipeline
/// never varies them per slot.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Prediction endpoint of the image-generation service
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Aspect ratio requested for every image (default: "16:9")
    #[serde(default = "default_aspect_ratio")]
    pub aspect_ratio: String,

    /// Safety filter tier (default: "block_some")
    #[serde(default = "default_safety_tier")]
    pub safety_tier: String,

    /// Policy for generating people/subjects (default: "allow_adult")
    #[serde(default = "default_subject_policy")]
    pub subject_policy: String,

    /// Timeout for a single generation request (default: 120 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// Where short-lived bearer credentials come from
    #[serde(default)]
    pub credentials: CredentialConfig,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            aspect_ratio: default_aspect_ratio(),
            safety_tier: default_safety_tier(),
            subject_policy: default_subject_policy(),
            request_timeout: default_request_timeout(),
            credentials: CredentialConfig::default(),
        }
    }
}

/// Credential source for the generation service
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum CredentialConfig {
    /// Fixed token (tests, local proxies)
    Static {
        /// The bearer token
        token: String,
    },
    /// Token read from an environment variable on every call (default)
    Env {
        /// Variable name (default: "CONTENT_PRESS_TOKEN")
        #[serde(default = "default_token_var")]
        var: String,
    },
    /// Token printed on stdout by an external command
    Command {
        /// Program name or path (e.g. "gcloud")
        program: String,
        /// Arguments (e.g. ["auth", "print-access-token"])
        #[serde(default)]
        args: Vec<String>,
        /// How long a fetched token is reused (default: 300 seconds)
        #[serde(default = "default_token_ttl", with = "duration_serde")]
        ttl: Duration,
    },
}

impl Default for CredentialConfig {
    fn default() -> Self {
        CredentialConfig::Env {
            var: default_token_var(),
        }
    }
}

/// Retry and cooldown policy for generation calls
///
/// `max_attempts` counts every call including the first one.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of calls per slot (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Fixed wait after a rate-limit response (default: 30 seconds)
    #[serde(default = "default_rate_limit_cooldown", with = "duration_serde")]
    pub rate_limit_cooldown: Duration,

    /// Initial wait after a transient failure (default: 5 seconds)
    #[serde(default = "default_transient_delay", with = "duration_serde")]
    pub transient_delay: Duration,

    /// Maximum wait between transient retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for transient backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to transient delays (default: false)
    #[serde(default)]
    pub jitter: bool,

    /// Mandatory pause after every successful call (default: 10 seconds)
    ///
    /// This is the batch-wide pacing rule, applied even when nothing fails.
    #[serde(default = "default_success_cooldown", with = "duration_serde")]
    pub success_cooldown: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            rate_limit_cooldown: default_rate_limit_cooldown(),
            transient_delay: default_transient_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: false,
            success_cooldown: default_success_cooldown(),
        }
    }
}

/// Concurrency limits for generation calls
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Concurrent generation calls within one record (default: 1, max: 3)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_generations: usize,

    /// Aggregate request quota shared by all workers (None = no bucket)
    ///
    /// Required when `max_concurrent_generations` is greater than 1.
    #[serde(default)]
    pub requests_per_minute: Option<u32>,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            max_concurrent_generations: default_max_concurrent(),
            requests_per_minute: None,
        }
    }
}

/// Asset directory layout
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AssetConfig {
    /// Directory generated images are written to (default: "./public/images/generated")
    #[serde(default = "default_asset_dir")]
    pub asset_dir: PathBuf,

    /// URL prefix under which the asset directory is served (default: "/images/generated")
    #[serde(default = "default_public_prefix")]
    pub public_prefix: String,

    /// File extension for new assets (default: "png")
    #[serde(default = "default_extension")]
    pub extension: String,
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            asset_dir: default_asset_dir(),
            public_prefix: default_public_prefix(),
            extension: default_extension(),
        }
    }
}

/// How resolved references are written into the body
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AssemblyConfig {
    /// Markup for one image; `{src}` is required, `{alt}` optional
    /// (default: Markdown image `![{alt}]({src})`)
    #[serde(default = "default_image_markup")]
    pub image_markup: String,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            image_markup: default_image_markup(),
        }
    }
}

/// Pre-publish checks
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Minimum number of words per locale body (default: 800)
    #[serde(default = "default_min_words")]
    pub min_words: usize,

    /// Markers that must not survive into a published body (case-insensitive)
    #[serde(default = "default_debug_markers")]
    pub debug_markers: Vec<String>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_words: default_min_words(),
            debug_markers: default_debug_markers(),
        }
    }
}

/// How records are written to the content store
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishMode {
    /// Insert, or overwrite the existing row for the slug (default)
    #[default]
    Upsert,
    /// Delete the existing row for the slug, then insert
    Replace,
}

impl std::fmt::Display for PublishMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PublishMode::Upsert => write!(f, "upsert"),
            PublishMode::Replace => write!(f, "replace"),
        }
    }
}

impl std::str::FromStr for PublishMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "upsert" => Ok(PublishMode::Upsert),
            "replace" => Ok(PublishMode::Replace),
            other => Err(Error::config(
                "publish.mode",
                format!("unknown publish mode '{other}' (expected upsert or replace)"),
            )),
        }
    }
}

/// Content store settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PublishConfig {
    /// Publish mode (default: upsert)
    #[serde(default)]
    pub mode: PublishMode,

    /// SQLite database holding published records (default: "./content.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Run everything except the final write
    #[serde(default)]
    pub dry_run: bool,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            mode: PublishMode::default(),
            database_path: default_database_path(),
            dry_run: false,
        }
    }
}

/// Main configuration for the pipeline
///
/// Every section has defaults, so an empty JSON object is a valid config.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Generation service settings
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Retry and cooldown policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Concurrency limits
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Asset directory layout
    #[serde(default)]
    pub assets: AssetConfig,

    /// Body substitution format
    #[serde(default)]
    pub assembly: AssemblyConfig,

    /// Pre-publish checks
    #[serde(default)]
    pub validation: ValidationConfig,

    /// Content store settings
    #[serde(default)]
    pub publish: PublishConfig,
}

impl Config {
    /// Load and validate a JSON configuration file
    pub fn from_json_file(path: &std::path::Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::config(
                "config",
                format!("failed to read config file '{}': {}", path.display(), e),
            )
        })?;
        let config: Config = serde_json::from_str(&raw).map_err(|e| {
            Error::config(
                "config",
                format!("failed to parse config file '{}': {}", path.display(), e),
            )
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints that serde cannot express
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.generation.endpoint).map_err(|e| {
            Error::config(
                "generation.endpoint",
                format!("invalid endpoint '{}': {}", self.generation.endpoint, e),
            )
        })?;

        if self.retry.max_attempts == 0 {
            return Err(Error::config(
                "retry.max_attempts",
                "at least one attempt is required",
            ));
        }
        if !self.retry.backoff_multiplier.is_finite() || self.retry.backoff_multiplier < 1.0 {
            return Err(Error::config(
                "retry.backoff_multiplier",
                "backoff multiplier must be a finite number >= 1.0",
            ));
        }

        let workers = self.limiter.max_concurrent_generations;
        if !(1..=MAX_CONCURRENT_GENERATIONS).contains(&workers) {
            return Err(Error::config(
                "limiter.max_concurrent_generations",
                format!("must be between 1 and {MAX_CONCURRENT_GENERATIONS}, got {workers}"),
            ));
        }
        if workers > 1 && self.limiter.requests_per_minute.is_none() {
            return Err(Error::config(
                "limiter.requests_per_minute",
                "parallel generation requires a shared requests_per_minute quota",
            ));
        }
        if self.limiter.requests_per_minute == Some(0) {
            return Err(Error::config(
                "limiter.requests_per_minute",
                "quota must be positive",
            ));
        }

        if self.assets.extension.is_empty()
            || !self
                .assets
                .extension
                .chars()
                .all(|c| c.is_ascii_alphanumeric())
        {
            return Err(Error::config(
                "assets.extension",
                format!("invalid extension '{}'", self.assets.extension),
            ));
        }

        if !self.assembly.image_markup.contains("{src}") {
            return Err(Error::config(
                "assembly.image_markup",
                "image markup must contain {src}",
            ));
        }

        Ok(())
    }
}

/// Upper bound on concurrent generation calls
pub const MAX_CONCURRENT_GENERATIONS: usize = 3;

fn default_endpoint() -> String {
    "https://us-central1-aiplatform.googleapis.com/v1/projects/content-press/locations/us-central1/publishers/google/models/imagen-3.0-generate-002:predict".to_string()
}

fn default_aspect_ratio() -> String {
    "16:9".to_string()
}

fn default_safety_tier() -> String {
    "block_some".to_string()
}

fn default_subject_policy() -> String {
    "allow_adult".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_token_var() -> String {
    "CONTENT_PRESS_TOKEN".to_string()
}

fn default_token_ttl() -> Duration {
    Duration::from_secs(300)
}

fn default_max_attempts() -> u32 {
    3
}

fn default_rate_limit_cooldown() -> Duration {
    Duration::from_secs(30)
}

fn default_transient_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_success_cooldown() -> Duration {
    Duration::from_secs(10)
}

fn default_max_concurrent() -> usize {
    1
}

fn default_asset_dir() -> PathBuf {
    PathBuf::from("./public/images/generated")
}

fn default_public_prefix() -> String {
    "/images/generated".to_string()
}

fn default_extension() -> String {
    "png".to_string()
}

fn default_image_markup() -> String {
    "![{alt}]({src})".to_string()
}

fn default_min_words() -> usize {
    800
}

fn default_debug_markers() -> Vec<String> {
    vec![
        "TODO".to_string(),
        "FIXME".to_string(),
        "lorem ipsum".to_string(),
        "[DEBUG]".to_string(),
        "<!-- internal".to_string(),
    ]
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./content.db")
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
