//! URL pattern matching and tier classification.
//!
//! A pattern is either a literal substring or, when wrapped in slashes
//! (`/ads\d+\.js/`), a regular expression. Regexes are compiled lazily and
//! memoized by their raw pattern string. A pattern that fails to compile is
//! cached as a permanent non-match so one bad rule cannot affect the others.

use std::collections::HashMap;

use regex::Regex;
use url::Url;

use crate::types::{Manifest, PatternCompileError, Tier};

/// Memoizing pattern matcher.
#[derive(Debug, Default)]
pub struct PatternMatcher {
    /// Raw pattern → compiled regex, or `None` for patterns that failed to compile.
    cache: HashMap<String, Option<Regex>>,
}

impl PatternMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if any pattern matches `url`.
    pub fn matches(&mut self, url: &str, patterns: &[String]) -> bool {
        patterns.iter().any(|p| self.matches_one(url, p))
    }

    fn matches_one(&mut self, url: &str, pattern: &str) -> bool {
        if pattern.is_empty() {
            return false;
        }
        if url.contains(pattern) {
            return true;
        }
        match regex_body(pattern) {
            Some(body) => self
                .compiled(pattern, body)
                .map(|re| re.is_match(url))
                .unwrap_or(false),
            None => false,
        }
    }

    fn compiled(&mut self, raw: &str, body: &str) -> Option<&Regex> {
        self.cache
            .entry(raw.to_string())
            .or_insert_with(|| match Regex::new(body) {
                Ok(re) => Some(re),
                Err(e) => {
                    let err = PatternCompileError {
                        pattern: raw.to_string(),
                        message: e.to_string(),
                    };
                    tracing::warn!("{err}; treating as non-matching");
                    None
                }
            })
            .as_ref()
    }

    /// Classify a resource URL against the manifest lists.
    ///
    /// Precedence is allow → block → delay → defer. A URL that matches
    /// nothing is deferred: it still loads, just later.
    pub fn classify(&mut self, url: &str, manifest: &Manifest) -> Tier {
        if self.matches(url, &manifest.allow_scripts) {
            Tier::Allow
        } else if self.matches(url, &manifest.block_scripts) {
            Tier::Block
        } else if self.matches(url, &manifest.delayed_scripts) {
            Tier::Delay
        } else {
            Tier::Defer
        }
    }

    /// Number of distinct regex patterns seen so far, valid or not.
    pub fn cached_patterns(&self) -> usize {
        self.cache.len()
    }
}

/// Interior of a slash-delimited pattern, if `pattern` is one.
fn regex_body(pattern: &str) -> Option<&str> {
    if pattern.len() > 2 && pattern.starts_with('/') && pattern.ends_with('/') {
        Some(&pattern[1..pattern.len() - 1])
    } else {
        None
    }
}

/// Resolve a possibly relative resource URL against the document base.
///
/// Input that cannot be resolved is returned unchanged so it can still be
/// matched as a string.
pub fn resolve_url(base: Option<&str>, raw: &str) -> String {
    let raw = raw.trim();
    if let Ok(abs) = Url::parse(raw) {
        return abs.to_string();
    }
    base.and_then(|b| Url::parse(b).ok())
        .and_then(|b| b.join(raw).ok())
        .map(|u| u.to_string())
        .unwrap_or_else(|| raw.to_string())
}
