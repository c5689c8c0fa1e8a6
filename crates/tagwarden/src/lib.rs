//! Tagwarden: resource governance engine for third-party scripts, iframes and images.
//!
//! A per-hostname manifest sorts every resource URL into one of four tiers
//! (allow, block, defer, delay). Deferred and delayed resources are held out
//! of the document and re-inserted, in order, when their trigger fires: first
//! user interaction, browser idle, or a fixed timeout.

pub mod config;
pub mod dom;
pub mod engine;
pub mod event_loop;
pub mod executor;
pub mod gate;
pub mod hints;
pub mod intercept;
pub mod loader;
pub mod pattern;
pub mod queue;
pub mod state;
pub mod telemetry;
pub mod triggers;
pub mod types;

pub use config::{EmbedConfig, EngineOptions};
pub use dom::{DomHost, LoadRecord, MemoryDocument, NodeId};
pub use engine::{bootstrap, bootstrap_from_tag, DebugSurface, Engine};
pub use event_loop::InteractionKind;
pub use executor::FlushReport;
pub use intercept::{ElementOp, GovernedElement};
pub use loader::{HttpManifestSource, LoadOutcome, ManifestLoader, ManifestSource};
pub use pattern::PatternMatcher;
pub use state::{Counters, MetricsSnapshot, Milestones};
pub use telemetry::{BeaconSink, MemorySink, NullSink, Telemetry, TelemetryEvent, TelemetrySink};
pub use types::*;
