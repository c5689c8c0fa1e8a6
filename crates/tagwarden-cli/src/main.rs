//! Tagwarden CLI entry point.

use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use tagwarden::config::manifest_url;
use tagwarden::{EngineOptions, HttpManifestSource, Manifest, ManifestLoader, Telemetry};
use tagwarden_cli::{
    classify_all, gate_all, load_manifest, resolve_manifest_arg, run_scenario, CliError, Scenario,
};

#[derive(Parser)]
#[command(
    name = "tagwarden",
    about = "Tagwarden: govern when third-party scripts, iframes and images load",
    version
)]
struct Cli {
    /// Manifest file or http(s) URL.
    /// Also reads TAGWARDEN_MANIFEST, then ./tagwarden.json.
    #[arg(short, long, global = true)]
    manifest: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the tier each URL is classified into.
    Classify {
        /// Resource URLs.
        #[arg(required = true)]
        urls: Vec<String>,

        /// Emit JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Report whether the engine activates on each document path.
    Gate {
        /// Document paths, e.g. /checkout.
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Load a site's manifest the way the engine does (timeout, retries,
    /// fallback) and print the outcome as JSON.
    Fetch {
        /// Manifest base URL (the data-manifest-base attribute).
        #[arg(long)]
        base: String,

        /// Site hostname.
        #[arg(long)]
        host: String,
    },

    /// Replay a page timeline scenario and print what loaded, and when.
    Simulate {
        /// Scenario JSON file.
        scenario: PathBuf,

        /// Single-line JSON output.
        #[arg(long)]
        compact: bool,
    },

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   tagwarden completions bash > ~/.local/share/bash-completion/completions/tagwarden
    ///   tagwarden completions zsh > ~/.zfunc/_tagwarden
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

async fn manifest_for(
    cli_manifest: Option<&str>,
    options: &EngineOptions,
) -> anyhow::Result<Manifest> {
    let arg = resolve_manifest_arg(cli_manifest).ok_or(CliError::NoManifest)?;
    Ok(load_manifest(&arg, options.fetch_timeout).await?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let options = EngineOptions::from_env();

    match cli.command {
        Commands::Classify { urls, json } => {
            let manifest = manifest_for(cli.manifest.as_deref(), &options).await?;
            let results = classify_all(&manifest, &urls);
            if json {
                let out: Vec<_> = results
                    .iter()
                    .map(|(url, tier)| serde_json::json!({ "url": url, "tier": tier }))
                    .collect();
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                for (url, tier) in results {
                    println!("{:<6} {url}", tier.as_str());
                }
            }
        }

        Commands::Gate { paths } => {
            let manifest = manifest_for(cli.manifest.as_deref(), &options).await?;
            for (path, active) in gate_all(&manifest, &paths) {
                let verdict = if active { "active" } else { "passive" };
                println!("{verdict:<7} {path}");
            }
        }

        Commands::Fetch { base, host } => {
            let url = manifest_url(&base, &host)?;
            let loader = ManifestLoader::new(HttpManifestSource::new(), &options);
            let outcome = loader.load(&url, &mut Telemetry::disabled()).await;
            let report = serde_json::json!({
                "url": url,
                "attempts": outcome.attempts,
                "backoffs_ms": outcome
                    .backoffs
                    .iter()
                    .map(|d| d.as_millis() as u64)
                    .collect::<Vec<_>>(),
                "used_fallback": outcome.used_fallback(),
                "error": outcome.error.as_ref().map(|e| e.to_string()),
                "error_kind": outcome.error.as_ref().map(|e| e.kind()),
                "manifest": outcome.manifest,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Simulate { scenario, compact } => {
            let manifest = manifest_for(cli.manifest.as_deref(), &options).await?;
            let text = std::fs::read_to_string(&scenario).map_err(|source| CliError::Io {
                path: scenario.clone(),
                source,
            })?;
            let scenario = Scenario::from_json(&text)?;
            let report = run_scenario(manifest, &scenario, options)?;
            if compact {
                println!("{}", serde_json::to_string(&report)?);
            } else {
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "tagwarden", &mut std::io::stdout());
        }
    }

    Ok(())
}
