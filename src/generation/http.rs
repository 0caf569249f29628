//! HTTP generation client for predict-style image endpoints

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{CredentialProvider, GenerationClient, GenerationConstraints};
use crate::config::GenerationConfig;
use crate::error::{Error, GenerationError, Result};

/// Generation client that posts to a predict endpoint
///
/// The request asks for a single sample with the configured constraints and
/// reads the first prediction's base64 payload. A fresh credential is
/// requested from the provider before every call.
pub struct HttpGenerationClient {
    http: reqwest::Client,
    endpoint: url::Url,
    credentials: Box<dyn CredentialProvider>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PredictRequest<'a> {
    instances: [Instance<'a>; 1],
    parameters: Parameters<'a>,
}

#[derive(Serialize)]
struct Instance<'a> {
    prompt: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Parameters<'a> {
    sample_count: u32,
    aspect_ratio: &'a str,
    safety_setting: &'a str,
    person_generation: &'a str,
}

#[derive(Deserialize)]
struct PredictResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Prediction {
    #[serde(default)]
    bytes_base64_encoded: Option<String>,
}

impl HttpGenerationClient {
    /// Create a client for `endpoint`
    pub fn new(
        endpoint: &str,
        request_timeout: Duration,
        credentials: Box<dyn CredentialProvider>,
    ) -> Result<Self> {
        let endpoint = url::Url::parse(endpoint).map_err(|e| {
            Error::config(
                "generation.endpoint",
                format!("invalid endpoint '{endpoint}': {e}"),
            )
        })?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(Error::config(
                "generation.endpoint",
                format!("endpoint must be http or https, got '{}'", endpoint.scheme()),
            ));
        }

        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            http,
            endpoint,
            credentials,
        })
    }

    /// Create a client from configuration, building its credential provider
    pub fn from_config(config: &GenerationConfig) -> Result<Self> {
        let credentials = super::provider_from_config(&config.credentials)?;
        Self::new(&config.endpoint, config.request_timeout, credentials)
    }
}

#[async_trait]
impl GenerationClient for HttpGenerationClient {
    async fn generate(
        &self,
        prompt: &str,
        constraints: &GenerationConstraints,
    ) -> std::result::Result<Vec<u8>, GenerationError> {
        if prompt.trim().is_empty() {
            return Err(GenerationError::Rejected("empty prompt".to_string()));
        }

        let credential = match self.credentials.credential().await {
            Ok(Some(credential)) => credential,
            Ok(None) => {
                return Err(GenerationError::Unavailable(
                    "no credential available".to_string(),
                ));
            }
            Err(e) => return Err(GenerationError::Unavailable(e.to_string())),
        };

        let body = PredictRequest {
            instances: [Instance { prompt }],
            parameters: Parameters {
                sample_count: constraints.sample_count,
                aspect_ratio: &constraints.aspect_ratio,
                safety_setting: &constraints.safety_tier,
                person_generation: &constraints.subject_policy,
            },
        };

        let response = self
            .http
            .post(self.endpoint.clone())
            .bearer_auth(credential.token())
            .json(&body)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let detail = response.text().await.unwrap_or_default();
            return Err(classify_status(status, retry_after, &detail));
        }

        let payload: PredictResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::Rejected(format!("undecodable response: {e}")))?;

        let encoded = payload
            .predictions
            .into_iter()
            .find_map(|p| p.bytes_base64_encoded)
            .ok_or_else(|| {
                GenerationError::Rejected("no image returned (filtered by safety policy)".into())
            })?;

        BASE64
            .decode(encoded.as_bytes())
            .map_err(|e| GenerationError::Rejected(format!("invalid image payload: {e}")))
    }

    fn name(&self) -> &'static str {
        "http-predict"
    }
}

fn classify_transport_error(e: reqwest::Error) -> GenerationError {
    if e.is_builder() {
        GenerationError::Rejected(format!("malformed request: {e}"))
    } else {
        GenerationError::Transient(e.to_string())
    }
}

fn classify_status(
    status: StatusCode,
    retry_after: Option<Duration>,
    detail: &str,
) -> GenerationError {
    let detail: String = detail.chars().take(200).collect();
    if status == StatusCode::TOO_MANY_REQUESTS {
        GenerationError::RateLimited { retry_after }
    } else if status == StatusCode::REQUEST_TIMEOUT || status.is_server_error() {
        GenerationError::Transient(format!("HTTP {status}: {detail}"))
    } else {
        GenerationError::Rejected(format!("HTTP {status}: {detail}"))
    }
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
