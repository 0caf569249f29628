//! Image generation client abstraction
//!
//! A [`GenerationClient`] performs exactly one call to an external image
//! generation service and classifies the result. Retries, cooldowns and
//! fallbacks live in [`crate::retry`] and the pipeline, never here.
//!
//! ```no_run
//! use content_press::generation::{GenerationClient, GenerationConstraints};
//! use content_press::config::GenerationConfig;
//!
//! # async fn example(client: &dyn GenerationClient) {
//! let constraints = GenerationConstraints::from_config(&GenerationConfig::default());
//! match client.generate("a foggy mountain trail at dawn", &constraints).await {
//!     Ok(bytes) => println!("{} bytes", bytes.len()),
//!     Err(e) => println!("generation failed: {e}"),
//! }
//! # }
//! ```

mod credentials;
mod http;

pub use credentials::{
    CommandCredentials, Credential, CredentialProvider, EnvCredentials, StaticCredentials,
    provider_from_config,
};
pub use http::HttpGenerationClient;

use async_trait::async_trait;

use crate::config::GenerationConfig;
use crate::error::GenerationError;

/// Fixed constraints sent with every generation call
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenerationConstraints {
    /// Number of images per call (always 1)
    pub sample_count: u32,
    /// Aspect ratio, e.g. "16:9"
    pub aspect_ratio: String,
    /// Safety filter tier
    pub safety_tier: String,
    /// Policy for generating people
    pub subject_policy: String,
}

impl GenerationConstraints {
    /// Build constraints from configuration
    pub fn from_config(config: &GenerationConfig) -> Self {
        Self {
            sample_count: 1,
            aspect_ratio: config.aspect_ratio.clone(),
            safety_tier: config.safety_tier.clone(),
            subject_policy: config.subject_policy.clone(),
        }
    }
}

/// Single-call wrapper around an image generation service
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Generate one image for `prompt`
    ///
    /// Implementations make at most one network call and never retry.
    /// An empty prompt must be reported as [`GenerationError::Rejected`].
    async fn generate(
        &self,
        prompt: &str,
        constraints: &GenerationConstraints,
    ) -> Result<Vec<u8>, GenerationError>;

    /// Short name used in logs
    fn name(&self) -> &'static str;
}
