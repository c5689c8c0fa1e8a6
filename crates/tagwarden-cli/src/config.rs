//! Manifest argument resolution and loading.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tagwarden::{HttpManifestSource, Manifest, ManifestFetchError, ManifestSource};

use crate::error::CliError;

/// Resolve the manifest argument.
///
/// Order: explicit flag, `TAGWARDEN_MANIFEST`, then `./tagwarden.json` if it
/// exists.
pub fn resolve_manifest_arg(explicit: Option<&str>) -> Option<String> {
    if let Some(m) = explicit {
        return Some(m.to_string());
    }

    if let Ok(env_manifest) = std::env::var("TAGWARDEN_MANIFEST") {
        if !env_manifest.is_empty() {
            return Some(env_manifest);
        }
    }

    let cwd_manifest = PathBuf::from("tagwarden.json");
    if cwd_manifest.exists() {
        return Some(cwd_manifest.display().to_string());
    }

    None
}

/// Read and parse a manifest document from disk.
pub fn read_manifest_file(path: &Path) -> Result<Manifest, CliError> {
    let text = std::fs::read_to_string(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Manifest::from_json(&text).map_err(|source| CliError::Json {
        path: path.display().to_string(),
        source,
    })
}

/// Load a manifest from a file path or an `http(s)://` URL.
///
/// URLs are fetched once, without retries or fallback.
pub async fn load_manifest(arg: &str, timeout: Duration) -> Result<Manifest, CliError> {
    if arg.starts_with("http://") || arg.starts_with("https://") {
        let body = HttpManifestSource::new().fetch(arg, timeout).await?;
        return Manifest::from_json(&body)
            .map_err(|e| CliError::Fetch(ManifestFetchError::JsonParse(e.to_string())));
    }
    read_manifest_file(Path::new(arg))
}
