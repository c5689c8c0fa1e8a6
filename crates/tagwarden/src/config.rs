//! Configuration loading and resolution.
//!
//! Two sources feed the engine: the attributes of the embedding script tag
//! ([`EmbedConfig`]) and tunables that are not part of the per-site manifest
//! ([`EngineOptions`]), which can be overridden from the environment.

use std::time::Duration;

use url::Url;

use crate::types::ConfigError;

/// Attribute carrying the manifest base URL on the embedding tag.
pub const ATTR_MANIFEST_BASE: &str = "data-manifest-base";

/// Attribute carrying an inline telemetry endpoint on the embedding tag.
pub const ATTR_TELEMETRY_ENDPOINT: &str = "data-telemetry-endpoint";

/// Everything the embedding tag and the page location tell the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedConfig {
    pub manifest_base: String,
    pub telemetry_endpoint: Option<String>,
    pub hostname: String,
    pub path: String,
}

impl EmbedConfig {
    /// Build from the embedding tag's attributes and the current page URL.
    pub fn from_attributes(
        attributes: &[(String, String)],
        page_url: &str,
    ) -> Result<Self, ConfigError> {
        let attr = |name: &str| {
            attributes
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let manifest_base =
            attr(ATTR_MANIFEST_BASE).ok_or(ConfigError::MissingAttribute(ATTR_MANIFEST_BASE))?;

        let page = Url::parse(page_url).map_err(|e| ConfigError::InvalidUrl {
            url: page_url.to_string(),
            message: e.to_string(),
        })?;
        let hostname = page
            .host_str()
            .ok_or_else(|| ConfigError::NoHostname(page_url.to_string()))?
            .to_string();

        Ok(Self {
            manifest_base,
            telemetry_endpoint: attr(ATTR_TELEMETRY_ENDPOINT),
            hostname,
            path: page.path().to_string(),
        })
    }

    /// The manifest document URL for this page's hostname.
    pub fn manifest_url(&self) -> Result<String, ConfigError> {
        manifest_url(&self.manifest_base, &self.hostname)
    }
}

/// `<base>/<hostname>.json`, validated as an absolute URL.
pub fn manifest_url(base: &str, hostname: &str) -> Result<String, ConfigError> {
    let sep = if base.ends_with('/') { "" } else { "/" };
    let candidate = format!("{base}{sep}{hostname}.json");
    Url::parse(&candidate)
        .map(|u| u.to_string())
        .map_err(|e| ConfigError::InvalidUrl {
            url: candidate,
            message: e.to_string(),
        })
}

/// Engine tunables that do not belong in the per-site manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOptions {
    /// Per-attempt manifest fetch timeout.
    pub fetch_timeout: Duration,
    /// Total manifest fetch attempts, first one included.
    pub max_attempts: u32,
    /// Backoff before the second attempt; doubles after each retry.
    pub backoff_base: Duration,
    /// Images and iframes whose top edge lies beyond
    /// `viewport_height * below_fold_multiplier` are lazy-loaded.
    pub below_fold_multiplier: f64,
    /// Delay after the load milestone before the idle trigger is re-armed.
    pub load_rearm_delay: Duration,
    /// Whether the host offers idle callbacks; otherwise plain timers are used.
    pub idle_callbacks: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_millis(3_000),
            max_attempts: 3,
            backoff_base: Duration::from_millis(250),
            below_fold_multiplier: 1.5,
            load_rearm_delay: Duration::from_millis(100),
            idle_callbacks: true,
        }
    }
}

impl EngineOptions {
    /// Defaults overridden by `TAGWARDEN_*` environment variables.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut opts = Self::default();
        if let Some(ms) = parse_var::<u64, _>(&lookup, "TAGWARDEN_FETCH_TIMEOUT_MS") {
            opts.fetch_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = parse_var::<u32, _>(&lookup, "TAGWARDEN_MAX_ATTEMPTS") {
            opts.max_attempts = n.max(1);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "TAGWARDEN_BACKOFF_BASE_MS") {
            opts.backoff_base = Duration::from_millis(ms);
        }
        if let Some(m) = parse_var::<f64, _>(&lookup, "TAGWARDEN_BELOW_FOLD") {
            if m.is_finite() && m >= 0.0 {
                opts.below_fold_multiplier = m;
            }
        }
        opts
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Ignoring {key}={raw}: not a valid value");
            None
        }
    }
}
