//! Core data types: the manifest policy document, tiers, and error enums.

use serde::{Deserialize, Serialize};

/// Default idle-trigger timeout when the manifest omits `idleTimeout`.
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 2_000;

/// Default delay-tier timeout when the manifest omits `delayedTimeout`.
pub const DEFAULT_DELAYED_TIMEOUT_MS: u64 = 5_000;

/// Disposition assigned to a resource URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Loads immediately, unmodified.
    Allow,
    /// Permanently dropped.
    Block,
    /// Short-horizon queue: idle or first interaction.
    Defer,
    /// Long-horizon queue: delayed timeout or first interaction.
    Delay,
}

impl Tier {
    /// Tiers that own a deferred-execution queue.
    pub const QUEUED: [Tier; 2] = [Tier::Defer, Tier::Delay];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Allow => "allow",
            Tier::Block => "block",
            Tier::Defer => "defer",
            Tier::Delay => "delay",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Element kinds the engine governs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagKind {
    Script,
    Iframe,
    Img,
}

impl TagKind {
    /// Parse a tag name case-insensitively. Returns `None` for ungoverned tags.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.to_ascii_lowercase().as_str() {
            "script" => Some(TagKind::Script),
            "iframe" => Some(TagKind::Iframe),
            "img" => Some(TagKind::Img),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TagKind::Script => "script",
            TagKind::Iframe => "iframe",
            TagKind::Img => "img",
        }
    }
}

// ── Manifest ─────────────────────────────────────────────────────────────────

/// Per-hostname policy document.
///
/// Every field is optional in the JSON document; missing fields take the
/// values from [`Manifest::default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Manifest {
    pub enabled: bool,
    pub debug: bool,
    pub allow_scripts: Vec<String>,
    pub defer_scripts: Vec<String>,
    pub delayed_scripts: Vec<String>,
    pub block_scripts: Vec<String>,
    /// Origins to open early connections to.
    pub preconnect: Vec<String>,
    pub preload: Vec<PreloadHint>,
    pub critical_css_inline: Option<String>,
    pub idle_timeout: u64,
    pub delayed_timeout: u64,
    /// Skip the element-creation override; the mutation fallback stays on.
    pub disable_interception: bool,
    pub pages: Option<PagesConfig>,
    pub telemetry: Option<TelemetryConfig>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            enabled: true,
            debug: false,
            allow_scripts: Vec::new(),
            defer_scripts: Vec::new(),
            delayed_scripts: Vec::new(),
            block_scripts: Vec::new(),
            preconnect: Vec::new(),
            preload: Vec::new(),
            critical_css_inline: None,
            idle_timeout: DEFAULT_IDLE_TIMEOUT_MS,
            delayed_timeout: DEFAULT_DELAYED_TIMEOUT_MS,
            disable_interception: false,
            pages: None,
            telemetry: None,
        }
    }
}

impl Manifest {
    /// Parse a manifest document.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Conservative policy used whenever the real manifest is unavailable.
    ///
    /// Keeps a minimal allow-list, defers well-known analytics hosts and turns
    /// the creation override off, so the page behaves mostly normally.
    pub fn fallback() -> Self {
        let defer = [
            "googletagmanager.com",
            "google-analytics.com",
            "gtag/js",
            "analytics.js",
            "connect.facebook.net",
            "static.hotjar.com",
            "clarity.ms",
            "doubleclick.net",
            "segment.com/analytics",
        ];
        Self {
            allow_scripts: vec!["jquery".to_string()],
            defer_scripts: defer.iter().map(|s| s.to_string()).collect(),
            disable_interception: true,
            ..Self::default()
        }
    }
}

/// One `<link rel="preload">` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreloadHint {
    pub url: String,
    #[serde(rename = "as", default)]
    pub as_type: Option<String>,
    #[serde(default)]
    pub crossorigin: Option<String>,
    #[serde(rename = "type", default)]
    pub mime_type: Option<String>,
}

/// Which document paths the engine activates on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PagesConfig {
    #[serde(default)]
    pub mode: PageMode,
    #[serde(default)]
    pub patterns: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageMode {
    #[default]
    All,
    Include,
    Exclude,
    /// Any value this version does not recognise.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub sample_rate: Option<f64>,
}

// ── Errors ───────────────────────────────────────────────────────────────────

/// Stable classification of a manifest fetch failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FetchErrorKind {
    Timeout,
    NotFound,
    ServerError,
    JsonParseError,
    NetworkError,
}

impl FetchErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchErrorKind::Timeout => "TIMEOUT",
            FetchErrorKind::NotFound => "NOT_FOUND",
            FetchErrorKind::ServerError => "SERVER_ERROR",
            FetchErrorKind::JsonParseError => "JSON_PARSE_ERROR",
            FetchErrorKind::NetworkError => "NETWORK_ERROR",
        }
    }
}

/// A single failed manifest fetch attempt.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ManifestFetchError {
    #[error("Manifest fetch timed out after {0} ms")]
    Timeout(u64),

    #[error("Manifest not found (HTTP {0})")]
    NotFound(u16),

    #[error("Manifest server error (HTTP {0})")]
    ServerError(u16),

    #[error("Manifest is not valid JSON: {0}")]
    JsonParse(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl ManifestFetchError {
    pub fn kind(&self) -> FetchErrorKind {
        match self {
            ManifestFetchError::Timeout(_) => FetchErrorKind::Timeout,
            ManifestFetchError::NotFound(_) => FetchErrorKind::NotFound,
            ManifestFetchError::ServerError(_) => FetchErrorKind::ServerError,
            ManifestFetchError::JsonParse(_) => FetchErrorKind::JsonParseError,
            ManifestFetchError::Network(_) => FetchErrorKind::NetworkError,
        }
    }

    /// A missing or malformed document will not fix itself on retry.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ManifestFetchError::NotFound(_) | ManifestFetchError::JsonParse(_)
        )
    }
}

/// Errors raised by a [`DomHost`](crate::dom::DomHost).
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DomError {
    #[error("Unknown node: {0}")]
    UnknownNode(u64),

    #[error("Hierarchy request error: {0}")]
    Hierarchy(String),

    #[error("Insertion rejected by host: {0}")]
    Rejected(String),
}

/// Re-inserting a queued resource failed; only that resource is dropped.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Failed to insert {tag} {url}: {source}")]
pub struct InsertionError {
    pub url: String,
    pub tag: &'static str,
    #[source]
    pub source: DomError,
}

/// A manifest pattern looked like a regex but did not compile.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid pattern {pattern}: {message}")]
pub struct PatternCompileError {
    pub pattern: String,
    pub message: String,
}

/// Invalid embed or environment configuration.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required attribute: {0}")]
    MissingAttribute(&'static str),

    #[error("Invalid URL {url}: {message}")]
    InvalidUrl { url: String, message: String },

    #[error("Page URL has no hostname: {0}")]
    NoHostname(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_defaults_fill_missing_fields() {
        let m = Manifest::from_json(r#"{"deferScripts":["analytics"]}"#).unwrap();
        assert!(m.enabled);
        assert_eq!(m.idle_timeout, DEFAULT_IDLE_TIMEOUT_MS);
        assert_eq!(m.delayed_timeout, DEFAULT_DELAYED_TIMEOUT_MS);
        assert_eq!(m.defer_scripts, vec!["analytics"]);
        assert!(m.pages.is_none());
    }

    #[test]
    fn test_manifest_full_document() {
        let m = Manifest::from_json(
            r#"{
                "enabled": true,
                "debug": true,
                "allowScripts": ["core.js"],
                "blockScripts": ["/ads\\d+/"],
                "preload": [{"url": "/font.woff2", "as": "font", "crossorigin": "anonymous", "type": "font/woff2"}],
                "criticalCssInline": "body{margin:0}",
                "idleTimeout": 1500,
                "pages": {"mode": "exclude", "patterns": ["/checkout"]},
                "telemetry": {"endpoint": "https://collect.example.com", "sampleRate": 0.25}
            }"#,
        )
        .unwrap();
        assert!(m.debug);
        assert_eq!(m.idle_timeout, 1500);
        assert_eq!(m.preload[0].as_type.as_deref(), Some("font"));
        assert_eq!(m.preload[0].mime_type.as_deref(), Some("font/woff2"));
        assert_eq!(m.pages.as_ref().unwrap().mode, PageMode::Exclude);
        assert_eq!(m.telemetry.unwrap().sample_rate, Some(0.25));
    }

    #[test]
    fn test_unknown_page_mode_parses() {
        let m = Manifest::from_json(r#"{"pages":{"mode":"sometimes","patterns":[]}}"#).unwrap();
        assert_eq!(m.pages.unwrap().mode, PageMode::Unknown);
    }

    #[test]
    fn test_fallback_manifest_is_conservative() {
        let m = Manifest::fallback();
        assert!(m.enabled);
        assert!(m.disable_interception);
        assert!(m.block_scripts.is_empty());
        assert!(m.defer_scripts.iter().any(|p| p.contains("google-analytics")));
    }

    #[test]
    fn test_fetch_error_retryability() {
        assert!(ManifestFetchError::Timeout(3000).is_retryable());
        assert!(ManifestFetchError::ServerError(503).is_retryable());
        assert!(ManifestFetchError::Network("reset".into()).is_retryable());
        assert!(!ManifestFetchError::NotFound(404).is_retryable());
        assert!(!ManifestFetchError::JsonParse("eof".into()).is_retryable());
        assert_eq!(
            ManifestFetchError::JsonParse("x".into()).kind().as_str(),
            "JSON_PARSE_ERROR"
        );
    }
}
