//! Tagwarden CLI: operator tooling around the governance engine.

pub mod config;
pub mod error;
pub mod simulate;

pub use config::{load_manifest, read_manifest_file, resolve_manifest_arg};
pub use error::CliError;
pub use simulate::{run_scenario, Scenario, SimulationReport, Step};

use tagwarden::{gate, Manifest, PatternMatcher, Tier};

/// Classify each URL against `manifest`, in input order.
pub fn classify_all(manifest: &Manifest, urls: &[String]) -> Vec<(String, Tier)> {
    let mut matcher = PatternMatcher::new();
    urls.iter()
        .map(|u| (u.clone(), matcher.classify(u, manifest)))
        .collect()
}

/// Whether the engine would activate on each path.
pub fn gate_all(manifest: &Manifest, paths: &[String]) -> Vec<(String, bool)> {
    paths
        .iter()
        .map(|p| (p.clone(), manifest.enabled && gate::authorize(manifest, p)))
        .collect()
}
