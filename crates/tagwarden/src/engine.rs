//! The governance engine: one explicit context object per page load.
//!
//! An [`Engine`] owns the document host, the virtual event loop, the trigger
//! controller, the tier queues and the telemetry emitter. Everything runs on
//! one thread: page code and host callbacks call into the engine through
//! `&mut self`, so no locking is needed.
//!
//! Lifecycle:
//!
//! 1. [`Engine::new`]: state exists, manifest is `None`, nothing intercepted.
//! 2. [`Engine::activate`]: manifest applied, page gate consulted, hints
//!    injected, interception installed and triggers armed.
//! 3. Page activity ([`append_child`](Engine::append_child),
//!    [`dispatch_interaction`](Engine::dispatch_interaction),
//!    [`advance`](Engine::advance), ...) drives classification and flushing.
//!
//! [`bootstrap`] runs steps 1–2 with a real manifest fetch and never fails.

use std::time::Duration;

use crate::config::{EmbedConfig, EngineOptions};
use crate::dom::{DomHost, NodeId};
use crate::event_loop::{EventLoop, InteractionKind, Task};
use crate::executor::{self, FlushReport};
use crate::gate;
use crate::hints;
use crate::intercept::CreationOverride;
use crate::loader::{LoadOutcome, ManifestLoader, ManifestSource};
use crate::pattern::{resolve_url, PatternMatcher};
use crate::queue::QueuedResource;
use crate::state::{EngineState, InterceptionStatus, MetricsSnapshot};
use crate::telemetry::{Telemetry, TelemetryEvent, TelemetrySink};
use crate::triggers::TriggerController;
use crate::types::{DomError, Manifest, ManifestFetchError, Tier};

pub struct Engine<H: DomHost> {
    pub(crate) host: H,
    pub(crate) state: EngineState,
    pub(crate) matcher: PatternMatcher,
    pub(crate) event_loop: EventLoop,
    pub(crate) triggers: TriggerController,
    pub(crate) telemetry: Telemetry,
    pub(crate) options: EngineOptions,
    pub(crate) creation: CreationOverride,
    path: String,
    active: bool,
    observing: bool,
}

impl<H: DomHost> Engine<H> {
    /// Create the engine for one page load. Nothing is intercepted until
    /// [`activate`](Self::activate).
    pub fn new(host: H, options: EngineOptions, telemetry: Telemetry, path: &str) -> Self {
        let event_loop = EventLoop::new(options.idle_callbacks);
        let mut state = EngineState::new();
        state.mark("engine-start", event_loop.now_ms());
        Self {
            host,
            state,
            matcher: PatternMatcher::new(),
            event_loop,
            triggers: TriggerController::new(),
            telemetry,
            options,
            creation: CreationOverride::default(),
            path: path.to_string(),
            active: false,
            observing: false,
        }
    }

    /// Apply the manifest and, if the page gate allows it, install
    /// interception. Returns whether the engine is now governing the page.
    ///
    /// Only the first manifest of a page load is applied.
    pub fn activate(&mut self, manifest: Manifest) -> bool {
        if self.state.manifest.is_some() {
            tracing::warn!("Manifest already applied for this page load; ignoring");
            return self.active;
        }
        let now = self.now_ms();
        self.state.milestones.manifest_loaded = true;
        self.state.mark("manifest-loaded", now);
        self.telemetry.configure(manifest.telemetry.clone());
        self.state.manifest = Some(manifest.clone());

        if !manifest.enabled {
            tracing::info!("Manifest disabled; leaving {} ungoverned", self.path);
            return false;
        }
        if !gate::authorize(&manifest, &self.path) {
            tracing::debug!("Page gate rejected {}; not intercepting", self.path);
            return false;
        }

        let hinted = hints::inject(&mut self.host, &manifest, &mut self.state.processed);
        if hinted > 0 {
            tracing::debug!("Injected {hinted} resource hint(s)");
        }

        self.host.observe_mutations();
        self.observing = true;
        self.creation.installed = !manifest.disable_interception;
        self.triggers.arm(
            &mut self.event_loop,
            Duration::from_millis(manifest.idle_timeout),
            Duration::from_millis(manifest.delayed_timeout),
        );
        self.active = true;
        self.state.mark("interception-installed", now);
        tracing::debug!(
            "Governing {} (creation override: {})",
            self.path,
            self.creation.installed
        );
        true
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn manifest(&self) -> Option<&Manifest> {
        self.state.manifest.as_ref()
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    /// Direct host access for page activity the engine does not mediate.
    /// Call [`run_microtasks`](Self::run_microtasks) afterwards.
    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn event_loop(&self) -> &EventLoop {
        &self.event_loop
    }

    pub fn now_ms(&self) -> u64 {
        self.event_loop.now_ms()
    }

    /// Classify a URL with the current manifest, or the fallback before one
    /// is loaded.
    pub fn classify(&mut self, url: &str) -> Tier {
        match &self.state.manifest {
            Some(m) => self.matcher.classify(url, m),
            None => self.matcher.classify(url, &Manifest::fallback()),
        }
    }

    pub(crate) fn resolve(&self, raw: &str) -> String {
        resolve_url(self.host.base_url().as_deref(), raw)
    }

    pub(crate) fn log_decision(&self, via: &str, url: &str, tier: Tier) {
        if self.state.debug_enabled() {
            tracing::info!("[{via}] {tier}: {url}");
        } else {
            tracing::debug!("[{via}] {tier}: {url}");
        }
    }

    // ── Queues ───────────────────────────────────────────────────────────────

    pub(crate) fn enqueue(&mut self, tier: Tier, resource: QueuedResource) {
        if !self.state.queues.enqueue(tier, resource) {
            return;
        }
        self.state.counters.queued += 1;
        if TriggerController::already_fired(tier, &self.state.milestones) {
            self.triggers.schedule_drain(&mut self.event_loop, tier);
        }
    }

    /// Drain one tier. Flushing an empty tier is a no-op.
    pub fn flush(&mut self, tier: Tier, trigger: &str) -> FlushReport {
        let resources = self.state.queues.take(tier);
        if resources.is_empty() {
            return FlushReport::default();
        }
        let report = executor::flush(&mut self.host, resources, &mut self.state.processed);
        self.state.counters.executed += report.executed.len() as u64;
        self.state.counters.dropped += report.dropped.len() as u64;
        for err in &report.dropped {
            self.telemetry.emit(&TelemetryEvent::InsertionFailed {
                url: err.url.clone(),
                tag: err.tag.to_string(),
            });
        }

        let now = self.now_ms();
        self.state.mark(&format!("{tier}-flushed"), now);
        tracing::debug!(
            "Flushed {tier} via {trigger}: {} executed, {} dropped",
            report.executed.len(),
            report.dropped.len()
        );
        self.telemetry.emit(&TelemetryEvent::TierFlushed {
            tier,
            trigger: trigger.to_string(),
            executed: report.executed.len(),
            dropped: report.dropped.len(),
        });
        self.run_microtasks();
        report
    }

    /// Flush every queued tier regardless of which triggers have fired.
    /// Returns the number of resources executed.
    pub fn force_flush(&mut self) -> usize {
        Tier::QUEUED
            .into_iter()
            .map(|tier| self.flush(tier, "force").executed.len())
            .sum()
    }

    fn apply_flushes(&mut self, tiers: Vec<Tier>, trigger: &str) {
        for tier in tiers {
            self.flush(tier, trigger);
        }
    }

    // ── Page activity ────────────────────────────────────────────────────────

    /// Microtask checkpoint: deliver mutation records, then let the host
    /// start whatever loads remain.
    pub fn run_microtasks(&mut self) {
        if self.observing {
            self.process_mutations();
        }
        self.host.checkpoint();
    }

    /// Page code appends a node; observers and loads follow.
    pub fn append_child(&mut self, parent: NodeId, node: NodeId) -> Result<(), DomError> {
        self.host.append_child(parent, node)?;
        self.run_microtasks();
        Ok(())
    }

    pub fn insert_before(
        &mut self,
        parent: NodeId,
        node: NodeId,
        reference: Option<NodeId>,
    ) -> Result<(), DomError> {
        self.host.insert_before(parent, node, reference)?;
        self.run_microtasks();
        Ok(())
    }

    /// Deliver a user interaction event. Returns whether a listener took it.
    pub fn dispatch_interaction(&mut self, kind: InteractionKind) -> bool {
        if !self.event_loop.has_listener(kind) {
            return false;
        }
        let tiers = self
            .triggers
            .on_interaction(&mut self.event_loop, &mut self.state.milestones);
        if !tiers.is_empty() {
            let now = self.now_ms();
            self.state.mark("first-interaction", now);
            tracing::debug!("First interaction ({})", kind.as_str());
        }
        self.apply_flushes(tiers, "interaction");
        true
    }

    /// The host reports an idle period.
    pub fn idle_period(&mut self) {
        for task in self.event_loop.idle_period() {
            self.run_task(task);
        }
    }

    /// The page reached its load milestone.
    pub fn fire_load(&mut self) {
        let now = self.now_ms();
        self.state.mark("load", now);
        if self.active {
            self.triggers
                .on_load(&mut self.event_loop, self.options.load_rearm_delay);
        }
    }

    /// Move virtual time forward, running every task that comes due.
    pub fn advance(&mut self, by: Duration) {
        let target = self.now_ms().saturating_add(by.as_millis() as u64);
        self.advance_to(target);
    }

    pub fn advance_to(&mut self, target_ms: u64) {
        while let Some(task) = self.event_loop.pop_due(target_ms) {
            self.run_task(task);
        }
    }

    fn run_task(&mut self, task: Task) {
        let now = self.now_ms();
        match task {
            Task::Idle => {
                let first = !self.state.milestones.idle_fired;
                let tiers = self.triggers.on_idle(&mut self.state.milestones);
                if first {
                    self.state.mark("idle-fired", now);
                }
                self.apply_flushes(tiers, "idle");
            }
            Task::Delayed => {
                let first = !self.state.milestones.delayed_fired;
                let tiers = self.triggers.on_delayed(&mut self.state.milestones);
                if first {
                    self.state.mark("delayed-fired", now);
                }
                self.apply_flushes(tiers, "delayed");
            }
            Task::RearmIdle => {
                let idle_timeout = self
                    .state
                    .manifest
                    .as_ref()
                    .map(|m| m.idle_timeout)
                    .unwrap_or(crate::types::DEFAULT_IDLE_TIMEOUT_MS);
                self.triggers.rearm_idle(
                    &mut self.event_loop,
                    Duration::from_millis(idle_timeout),
                    &self.state.milestones,
                );
            }
            Task::Drain(tier) => {
                self.triggers.drain_ran(tier);
                self.flush(tier, "late");
            }
        }
    }

    // ── Diagnostics ──────────────────────────────────────────────────────────

    pub fn interception(&self) -> InterceptionStatus {
        InterceptionStatus {
            creation_override: self.active && self.creation.installed,
            mutation_fallback: self.observing,
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            active: self.active,
            now_ms: self.now_ms(),
            defer_queue: self.state.queues.len(Tier::Defer),
            delay_queue: self.state.queues.len(Tier::Delay),
            milestones: self.state.milestones,
            counters: self.state.counters,
            interception: self.interception(),
            marks: self.state.marks.clone(),
        }
    }

    /// Debug/runtime surface: state, metrics and a manual force-flush.
    pub fn debug(&mut self) -> DebugSurface<'_, H> {
        DebugSurface { engine: self }
    }
}

/// Diagnostics handle borrowed from an [`Engine`].
pub struct DebugSurface<'a, H: DomHost> {
    engine: &'a mut Engine<H>,
}

impl<H: DomHost> DebugSurface<'_, H> {
    pub fn state(&self) -> &EngineState {
        &self.engine.state
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.engine.metrics()
    }

    pub fn metrics_json(&self) -> serde_json::Value {
        serde_json::to_value(self.engine.metrics()).unwrap_or_default()
    }

    pub fn force_flush(&mut self) -> usize {
        self.engine.force_flush()
    }
}

/// Start the engine for a page: fetch the manifest (with retries and
/// fallback), then activate. Never fails.
pub async fn bootstrap<H, S>(
    host: H,
    embed: &EmbedConfig,
    source: S,
    options: EngineOptions,
    sink: Box<dyn TelemetrySink>,
) -> (Engine<H>, LoadOutcome)
where
    H: DomHost,
    S: ManifestSource,
{
    let telemetry = Telemetry::new(sink, embed.hostname.clone(), embed.telemetry_endpoint.clone());
    let mut engine = Engine::new(host, options, telemetry, &embed.path);

    let outcome = match embed.manifest_url() {
        Ok(url) => {
            let loader = ManifestLoader::new(source, &engine.options);
            loader.load(&url, &mut engine.telemetry).await
        }
        Err(e) => {
            tracing::warn!("Cannot build manifest URL: {e}; using fallback");
            let error = ManifestFetchError::Network(e.to_string());
            engine.telemetry.emit(&TelemetryEvent::ManifestLoadFailed {
                url: embed.manifest_base.clone(),
                kind: error.kind(),
                attempts: 0,
            });
            LoadOutcome::fallback_without_fetch(error)
        }
    };

    engine.activate(outcome.manifest.clone());
    (engine, outcome)
}

/// Like [`bootstrap`], starting from the embedding tag's attributes.
///
/// Unusable attributes leave the engine passive: the page loads as if the
/// engine were absent.
pub async fn bootstrap_from_tag<H, S>(
    host: H,
    attributes: &[(String, String)],
    page_url: &str,
    source: S,
    options: EngineOptions,
    sink: Box<dyn TelemetrySink>,
) -> Engine<H>
where
    H: DomHost,
    S: ManifestSource,
{
    match EmbedConfig::from_attributes(attributes, page_url) {
        Ok(embed) => bootstrap(host, &embed, source, options, sink).await.0,
        Err(e) => {
            tracing::warn!("Invalid embed configuration: {e}; engine stays passive");
            Engine::new(host, options, Telemetry::disabled(), "/")
        }
    }
}
