//! Error types for the CLI.

use std::path::PathBuf;

use tagwarden::ManifestFetchError;

#[derive(thiserror::Error, Debug)]
pub enum CliError {
    #[error("No manifest given (use --manifest or TAGWARDEN_MANIFEST)")]
    NoManifest,

    #[error("Cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Fetch(#[from] ManifestFetchError),

    #[error("Unknown interaction event: {0}")]
    UnknownEvent(String),

    #[error("Page simulation failed at step {step}: {message}")]
    Step { step: usize, message: String },
}
