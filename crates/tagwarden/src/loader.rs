//! Manifest loader: fetch with timeout, retry with exponential backoff, and
//! fall back to a conservative policy when the document cannot be had.
//!
//! Retries are only spent on failures that might go away: timeouts, 5xx and
//! network errors. A 404 or a malformed document falls through to the
//! fallback manifest on the first attempt.

use std::time::Duration;

use async_trait::async_trait;

use crate::config::EngineOptions;
use crate::telemetry::{Telemetry, TelemetryEvent};
use crate::types::{Manifest, ManifestFetchError};

/// Retrieves the raw manifest document.
#[async_trait]
pub trait ManifestSource: Send + Sync {
    /// Fetch the document body at `url`. Implementations should honour
    /// `timeout`; the loader enforces it regardless.
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<String, ManifestFetchError>;
}

/// HTTP source backed by reqwest.
#[derive(Clone)]
pub struct HttpManifestSource {
    client: reqwest::Client,
}

impl HttpManifestSource {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(concat!("tagwarden/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for HttpManifestSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ManifestSource for HttpManifestSource {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<String, ManifestFetchError> {
        let timeout_ms = timeout.as_millis() as u64;
        let resp = self
            .client
            .get(url)
            .header("accept", "application/json")
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify_reqwest(e, timeout_ms))?;

        let status = resp.status().as_u16();
        match status {
            200..=299 => resp
                .text()
                .await
                .map_err(|e| classify_reqwest(e, timeout_ms)),
            404 | 410 => Err(ManifestFetchError::NotFound(status)),
            _ => Err(ManifestFetchError::ServerError(status)),
        }
    }
}

fn classify_reqwest(e: reqwest::Error, timeout_ms: u64) -> ManifestFetchError {
    if e.is_timeout() {
        ManifestFetchError::Timeout(timeout_ms)
    } else {
        ManifestFetchError::Network(e.to_string())
    }
}

/// What happened while loading a manifest.
#[derive(Debug, Clone)]
pub struct LoadOutcome {
    /// The manifest in effect: fetched, or the fallback.
    pub manifest: Manifest,
    /// Attempts made, first one included.
    pub attempts: u32,
    /// Backoff waited before each retry, in order.
    pub backoffs: Vec<Duration>,
    /// The last error when the fallback is in effect.
    pub error: Option<ManifestFetchError>,
}

impl LoadOutcome {
    pub fn used_fallback(&self) -> bool {
        self.error.is_some()
    }

    /// Fallback outcome for a manifest URL that could not even be built.
    pub fn fallback_without_fetch(error: ManifestFetchError) -> Self {
        Self {
            manifest: Manifest::fallback(),
            attempts: 0,
            backoffs: Vec::new(),
            error: Some(error),
        }
    }
}

/// Resilient manifest loader.
pub struct ManifestLoader<S> {
    source: S,
    timeout: Duration,
    max_attempts: u32,
    backoff_base: Duration,
}

impl<S: ManifestSource> ManifestLoader<S> {
    pub fn new(source: S, options: &EngineOptions) -> Self {
        Self {
            source,
            timeout: options.fetch_timeout,
            max_attempts: options.max_attempts.max(1),
            backoff_base: options.backoff_base,
        }
    }

    /// Backoff before retry number `retry` (1-based): `base * 2^(retry-1)`.
    pub fn backoff(&self, retry: u32) -> Duration {
        self.backoff_base
            .saturating_mul(2u32.saturating_pow(retry.saturating_sub(1)))
    }

    /// Load the manifest at `url`. Never fails: on exhaustion the fallback
    /// manifest is returned and a telemetry event is emitted.
    pub async fn load(&self, url: &str, telemetry: &mut Telemetry) -> LoadOutcome {
        let mut backoffs = Vec::new();
        let mut attempts = 0u32;

        let error = loop {
            attempts += 1;
            match self.attempt(url).await {
                Ok(manifest) => {
                    tracing::debug!("Loaded manifest {url} after {attempts} attempt(s)");
                    return LoadOutcome {
                        manifest,
                        attempts,
                        backoffs,
                        error: None,
                    };
                }
                Err(e) if e.is_retryable() && attempts < self.max_attempts => {
                    let delay = self.backoff(attempts);
                    tracing::debug!(
                        "Manifest attempt {attempts} failed ({}); retrying in {} ms",
                        e.kind().as_str(),
                        delay.as_millis()
                    );
                    backoffs.push(delay);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => break e,
            }
        };

        tracing::warn!(
            "Manifest {url} unavailable after {attempts} attempt(s): {error}; using fallback"
        );
        telemetry.emit(&TelemetryEvent::ManifestLoadFailed {
            url: url.to_string(),
            kind: error.kind(),
            attempts,
        });

        LoadOutcome {
            manifest: Manifest::fallback(),
            attempts,
            backoffs,
            error: Some(error),
        }
    }

    async fn attempt(&self, url: &str) -> Result<Manifest, ManifestFetchError> {
        let body = tokio::time::timeout(self.timeout, self.source.fetch(url, self.timeout))
            .await
            .map_err(|_| ManifestFetchError::Timeout(self.timeout.as_millis() as u64))??;
        Manifest::from_json(&body).map_err(|e| ManifestFetchError::JsonParse(e.to_string()))
    }
}
