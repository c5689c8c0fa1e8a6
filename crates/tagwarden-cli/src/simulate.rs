//! Page timeline simulation.
//!
//! A scenario is a JSON document describing what a page does over time:
//!
//! ```json
//! {
//!   "url": "https://shop.example.com/",
//!   "path": "/",
//!   "steps": [
//!     {"insert": {"tag": "script", "src": "https://cdn.example.com/core.js"}},
//!     {"insert": {"tag": "img", "src": "/hero.jpg", "top": 1600}},
//!     {"create": {"tag": "script", "src": "https://www.googletagmanager.com/gtag/js", "head": true}},
//!     "load",
//!     {"wait": 300},
//!     {"interact": "click"},
//!     "idle",
//!     "flush"
//!   ]
//! }
//! ```
//!
//! `insert` goes through the document directly (the mutation fallback sees
//! it); `create` goes through the element-creation override.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use tagwarden::telemetry::Telemetry;
use tagwarden::{
    DomHost, ElementOp, Engine, EngineOptions, InteractionKind, LoadRecord, Manifest,
    MemoryDocument, MetricsSnapshot, NodeId,
};

use crate::error::CliError;

fn default_url() -> String {
    "https://example.com/".to_string()
}

fn default_path() -> String {
    "/".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default)]
    pub viewport_height: Option<f64>,
    pub steps: Vec<Step>,
}

impl Scenario {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    /// Page markup or a third party appends an element.
    Insert(ElementSpec),
    /// Page code builds a script through the creation override.
    Create(ElementSpec),
    /// Advance virtual time by this many milliseconds.
    Wait(u64),
    /// Deliver a user interaction event.
    Interact(String),
    /// The browser reports an idle period.
    Idle,
    /// The page reaches its load milestone.
    Load,
    /// Force-flush every queue.
    Flush,
}

impl Step {
    fn describe(&self) -> String {
        match self {
            Step::Insert(el) => format!("insert {}", el.describe()),
            Step::Create(el) => format!("create {}", el.describe()),
            Step::Wait(ms) => format!("wait {ms}ms"),
            Step::Interact(kind) => format!("interact {kind}"),
            Step::Idle => "idle".to_string(),
            Step::Load => "load".to_string(),
            Step::Flush => "flush".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementSpec {
    pub tag: String,
    #[serde(default)]
    pub src: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// Layout position of the element's top edge, in pixels.
    #[serde(default)]
    pub top: Option<f64>,
    /// Append to `<head>` instead of `<body>`.
    #[serde(default)]
    pub head: bool,
}

impl ElementSpec {
    fn describe(&self) -> String {
        match &self.src {
            Some(src) => format!("<{}> {src}", self.tag),
            None => format!("<{}>", self.tag),
        }
    }
}

/// One executed step and the loads it started.
#[derive(Debug, Clone, Serialize)]
pub struct TimelineEntry {
    pub step: usize,
    pub at_ms: u64,
    pub action: String,
    pub started: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub active: bool,
    pub timeline: Vec<TimelineEntry>,
    pub loads: Vec<LoadRecord>,
    pub metrics: MetricsSnapshot,
}

/// Run a scenario against `manifest` and report what loaded, and when.
pub fn run_scenario(
    manifest: Manifest,
    scenario: &Scenario,
    options: EngineOptions,
) -> Result<SimulationReport, CliError> {
    let mut doc = MemoryDocument::new(&scenario.url);
    if let Some(h) = scenario.viewport_height {
        doc.set_viewport_height(h);
    }
    let mut engine = Engine::new(doc, options, Telemetry::disabled(), &scenario.path);
    let active = engine.activate(manifest);
    tracing::debug!("Simulating {} (active: {active})", scenario.url);

    let mut timeline = Vec::with_capacity(scenario.steps.len());
    for (i, step) in scenario.steps.iter().enumerate() {
        let before = engine.host().loads().len();
        apply(&mut engine, step).map_err(|message| CliError::Step { step: i, message })?;
        let started = engine.host().loads()[before..]
            .iter()
            .map(|l| l.url.clone())
            .collect();
        timeline.push(TimelineEntry {
            step: i,
            at_ms: engine.now_ms(),
            action: step.describe(),
            started,
        });
    }

    Ok(SimulationReport {
        active,
        timeline,
        loads: engine.host().loads().to_vec(),
        metrics: engine.metrics(),
    })
}

fn apply(engine: &mut Engine<MemoryDocument>, step: &Step) -> Result<(), String> {
    match step {
        Step::Insert(spec) => {
            let host = engine.host_mut();
            let node = host.create_element(&spec.tag);
            place(host, node, spec);
            for (name, value) in &spec.attributes {
                host.set_attribute(node, name, value).map_err(|e| e.to_string())?;
            }
            if let Some(src) = &spec.src {
                host.set_attribute(node, "src", src).map_err(|e| e.to_string())?;
            }
            let parent = container(engine, spec)?;
            engine.append_child(parent, node).map_err(|e| e.to_string())?;
        }
        Step::Create(spec) => {
            let el = engine.create_element(&spec.tag);
            place(engine.host_mut(), el.node(), spec);
            for (name, value) in &spec.attributes {
                engine
                    .forward(&el, ElementOp::SetAttribute(name.clone(), value.clone()))
                    .map_err(|e| e.to_string())?;
            }
            if let Some(src) = &spec.src {
                engine.set_src(&el, src).map_err(|e| e.to_string())?;
            }
            let parent = container(engine, spec)?;
            engine
                .append_child(parent, el.node())
                .map_err(|e| e.to_string())?;
        }
        Step::Wait(ms) => engine.advance(Duration::from_millis(*ms)),
        Step::Interact(name) => {
            let kind = InteractionKind::parse(name)
                .ok_or_else(|| CliError::UnknownEvent(name.clone()).to_string())?;
            engine.dispatch_interaction(kind);
        }
        Step::Idle => engine.idle_period(),
        Step::Load => engine.fire_load(),
        Step::Flush => {
            engine.debug().force_flush();
        }
    }
    Ok(())
}

fn place(host: &mut MemoryDocument, node: NodeId, spec: &ElementSpec) {
    if let Some(top) = spec.top {
        host.set_layout_top(node, top);
    }
}

fn container(engine: &Engine<MemoryDocument>, spec: &ElementSpec) -> Result<NodeId, String> {
    let parent = if spec.head {
        engine.host().head()
    } else {
        engine.host().body()
    };
    parent.ok_or_else(|| "document has no container".to_string())
}
