//! Best-effort, sampled, fire-and-forget telemetry.
//!
//! Events are serialized into a flat JSON object carrying the event name,
//! hostname, timestamp and engine version alongside the event's own fields.
//! Delivery goes through a [`TelemetrySink`]; a sink must never block the
//! caller, and a failed delivery is silently dropped.

use std::cell::RefCell;
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{FetchErrorKind, TelemetryConfig, Tier};

/// Engine version reported in every payload.
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Every event the engine emits.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TelemetryEvent {
    /// The manifest could not be loaded; the fallback policy is in effect.
    ManifestLoadFailed {
        url: String,
        kind: FetchErrorKind,
        attempts: u32,
    },
    /// A queued resource could not be re-inserted and was dropped.
    InsertionFailed { url: String, tag: String },
    /// A tier queue was drained.
    TierFlushed {
        tier: Tier,
        trigger: String,
        executed: usize,
        dropped: usize,
    },
}

impl TelemetryEvent {
    pub fn name(&self) -> &'static str {
        match self {
            TelemetryEvent::ManifestLoadFailed { .. } => "manifest_load_failed",
            TelemetryEvent::InsertionFailed { .. } => "insertion_failed",
            TelemetryEvent::TierFlushed { .. } => "tier_flushed",
        }
    }
}

/// Non-blocking transport for telemetry payloads.
pub trait TelemetrySink {
    /// Queue `payload` for delivery to `endpoint`. Returns whether it was queued.
    fn send(&self, endpoint: &str, payload: &Value) -> bool;
}

/// Sink that discards everything.
pub struct NullSink;

impl TelemetrySink for NullSink {
    fn send(&self, _endpoint: &str, _payload: &Value) -> bool {
        false
    }
}

/// Beacon-style sink: spawns a detached POST on the current tokio runtime.
///
/// Outside a runtime the payload is dropped.
#[derive(Clone, Default)]
pub struct BeaconSink {
    client: reqwest::Client,
}

impl BeaconSink {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl TelemetrySink for BeaconSink {
    fn send(&self, endpoint: &str, payload: &Value) -> bool {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("No async runtime; dropping telemetry for {endpoint}");
            return false;
        };
        let request = self.client.post(endpoint).json(payload);
        let endpoint = endpoint.to_string();
        handle.spawn(async move {
            if let Err(e) = request.send().await {
                tracing::debug!("Telemetry delivery to {endpoint} failed: {e}");
            }
        });
        true
    }
}

/// In-memory sink that records payloads; clones share the same log.
#[derive(Clone, Default)]
pub struct MemorySink {
    sent: Rc<RefCell<Vec<(String, Value)>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything delivered so far, as `(endpoint, payload)` pairs.
    pub fn sent(&self) -> Vec<(String, Value)> {
        self.sent.borrow().clone()
    }

    pub fn events(&self) -> Vec<String> {
        self.sent
            .borrow()
            .iter()
            .filter_map(|(_, p)| p["event"].as_str().map(String::from))
            .collect()
    }
}

impl TelemetrySink for MemorySink {
    fn send(&self, endpoint: &str, payload: &Value) -> bool {
        self.sent
            .borrow_mut()
            .push((endpoint.to_string(), payload.clone()));
        true
    }
}

/// Resolves endpoint and sample rate, then hands payloads to the sink.
pub struct Telemetry {
    sink: Box<dyn TelemetrySink>,
    inline_endpoint: Option<String>,
    config: Option<TelemetryConfig>,
    hostname: String,
    rng: StdRng,
}

impl Telemetry {
    pub fn new(
        sink: Box<dyn TelemetrySink>,
        hostname: impl Into<String>,
        inline_endpoint: Option<String>,
    ) -> Self {
        Self {
            sink,
            inline_endpoint,
            config: None,
            hostname: hostname.into(),
            rng: StdRng::from_entropy(),
        }
    }

    /// Telemetry that never sends anything.
    pub fn disabled() -> Self {
        Self::new(Box::new(NullSink), "", None)
    }

    /// Use a fixed RNG seed for sampling decisions.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Adopt the telemetry block of a freshly loaded manifest.
    pub fn configure(&mut self, config: Option<TelemetryConfig>) {
        self.config = config;
    }

    /// The inline attribute wins over the manifest.
    pub fn endpoint(&self) -> Option<&str> {
        self.inline_endpoint
            .as_deref()
            .or_else(|| self.config.as_ref().and_then(|c| c.endpoint.as_deref()))
            .filter(|e| !e.is_empty())
    }

    /// Emit one event. Returns whether it was handed to the sink.
    pub fn emit(&mut self, event: &TelemetryEvent) -> bool {
        let Some(endpoint) = self.endpoint().map(String::from) else {
            return false;
        };
        if !self.sampled() {
            return false;
        }
        let payload = self.payload(event);
        self.sink.send(&endpoint, &payload)
    }

    fn sampled(&mut self) -> bool {
        match self.config.as_ref().and_then(|c| c.sample_rate) {
            None => true,
            Some(rate) if rate.is_nan() => true,
            Some(rate) => {
                let rate = rate.clamp(0.0, 1.0);
                rate >= 1.0 || self.rng.gen::<f64>() < rate
            }
        }
    }

    fn payload(&self, event: &TelemetryEvent) -> Value {
        let mut payload = serde_json::to_value(event).unwrap_or_else(|_| {
            serde_json::json!({ "event": event.name() })
        });
        if let Value::Object(map) = &mut payload {
            map.insert("hostname".into(), Value::String(self.hostname.clone()));
            map.insert(
                "timestamp".into(),
                Value::from(chrono::Utc::now().timestamp_millis()),
            );
            map.insert("version".into(), Value::String(ENGINE_VERSION.into()));
        }
        payload
    }
}
