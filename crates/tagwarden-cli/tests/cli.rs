//! CLI library tests: manifest files, classification, gating and simulation.

use std::io::Write;
use std::time::Duration;

use tagwarden::{EngineOptions, Manifest, Tier};
use tagwarden_cli::*;

// ─────────────────────── helpers ───────────────────────

const MANIFEST: &str = r#"{
    "allowScripts": ["core.js"],
    "blockScripts": ["/pixel\\d*\\.js/"],
    "delayedScripts": ["chat-widget"],
    "pages": {"mode": "exclude", "patterns": ["/checkout", "/account/"]}
}"#;

fn manifest_file(dir: &tempfile::TempDir, body: &str) -> std::path::PathBuf {
    let path = dir.path().join("shop.example.com.json");
    let mut f = std::fs::File::create(&path).unwrap();
    f.write_all(body.as_bytes()).unwrap();
    path
}

fn manifest() -> Manifest {
    Manifest::from_json(MANIFEST).unwrap()
}

// ═══════════════════════════════════════════════════════
// MANIFEST FILES
// ═══════════════════════════════════════════════════════

#[test]
fn test_read_manifest_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = manifest_file(&dir, MANIFEST);
    let m = read_manifest_file(&path).unwrap();
    assert_eq!(m.allow_scripts, vec!["core.js"]);
}

#[test]
fn test_read_manifest_errors() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.json");
    assert!(matches!(
        read_manifest_file(&missing),
        Err(CliError::Io { .. })
    ));

    let bad = manifest_file(&dir, "{\"allowScripts\": 3}");
    assert!(matches!(read_manifest_file(&bad), Err(CliError::Json { .. })));
}

#[tokio::test]
async fn test_load_manifest_from_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = manifest_file(&dir, MANIFEST);
    let m = load_manifest(path.to_str().unwrap(), Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(m.delayed_scripts, vec!["chat-widget"]);
}

#[test]
fn test_explicit_manifest_arg_wins() {
    assert_eq!(
        resolve_manifest_arg(Some("/etc/tagwarden/site.json")).as_deref(),
        Some("/etc/tagwarden/site.json")
    );
}

// ═══════════════════════════════════════════════════════
// CLASSIFY & GATE
// ═══════════════════════════════════════════════════════

#[test]
fn test_classify_all_keeps_input_order() {
    let urls: Vec<String> = [
        "https://cdn.example.com/core.js",
        "https://ads.example.net/pixel3.js",
        "https://chat.example.net/chat-widget.js",
        "https://www.google-analytics.com/analytics.js",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    let tiers: Vec<Tier> = classify_all(&manifest(), &urls)
        .into_iter()
        .map(|(_, t)| t)
        .collect();
    assert_eq!(tiers, vec![Tier::Allow, Tier::Block, Tier::Delay, Tier::Defer]);
}

#[test]
fn test_gate_all() {
    let paths: Vec<String> = ["/", "/checkout", "/account/orders", "/accounts"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let verdicts: Vec<bool> = gate_all(&manifest(), &paths)
        .into_iter()
        .map(|(_, a)| a)
        .collect();
    assert_eq!(verdicts, vec![true, false, false, true]);

    let off = Manifest {
        enabled: false,
        ..manifest()
    };
    assert!(gate_all(&off, &paths).iter().all(|(_, a)| !a));
}

// ═══════════════════════════════════════════════════════
// SIMULATE
// ═══════════════════════════════════════════════════════

#[test]
fn test_simulated_storefront_timeline() {
    let scenario = Scenario::from_json(
        r#"{
            "url": "https://shop.example.com/",
            "steps": [
                {"insert": {"tag": "script", "src": "https://cdn.example.com/core.js"}},
                {"insert": {"tag": "script", "src": "https://www.google-analytics.com/analytics.js",
                            "attributes": {"async": ""}}},
                {"create": {"tag": "script", "src": "https://chat.example.net/chat-widget.js", "head": true}},
                {"insert": {"tag": "img", "src": "/hero.jpg", "top": 2400}},
                {"wait": 250},
                {"interact": "mousemove"}
            ]
        }"#,
    )
    .unwrap();

    let report = run_scenario(manifest(), &scenario, EngineOptions::default()).unwrap();
    assert!(report.active);
    assert_eq!(report.timeline.len(), 6);
    assert_eq!(report.timeline[0].started, vec!["https://cdn.example.com/core.js"]);
    assert!(report.timeline[1].started.is_empty());
    assert!(report.timeline[2].started.is_empty());
    assert_eq!(report.timeline[3].started, vec!["/hero.jpg"]);
    assert_eq!(report.timeline[4].at_ms, 250);
    assert_eq!(
        report.timeline[5].started,
        vec![
            "https://www.google-analytics.com/analytics.js",
            "https://chat.example.net/chat-widget.js",
        ]
    );
    assert!(report.loads[1].lazy);
    assert_eq!(report.metrics.counters.executed, 2);
    assert!(report.metrics.milestones.user_interacted);
}

#[test]
fn test_simulated_excluded_page_is_untouched() {
    let scenario = Scenario::from_json(
        r#"{
            "url": "https://shop.example.com/checkout",
            "path": "/checkout",
            "steps": [
                {"insert": {"tag": "script", "src": "https://ads.example.net/pixel.js"}},
                "idle",
                "flush"
            ]
        }"#,
    )
    .unwrap();
    let report = run_scenario(manifest(), &scenario, EngineOptions::default()).unwrap();
    assert!(!report.active);
    assert_eq!(report.loads.len(), 1);
    assert_eq!(report.metrics.counters.blocked, 0);
}

#[test]
fn test_simulation_rejects_unknown_event() {
    let scenario = Scenario::from_json(r#"{"steps": ["load", {"interact": "hover"}]}"#).unwrap();
    let err = run_scenario(manifest(), &scenario, EngineOptions::default()).unwrap_err();
    match err {
        CliError::Step { step, message } => {
            assert_eq!(step, 1);
            assert!(message.contains("hover"));
        }
        other => panic!("unexpected error: {other}"),
    }
}
