//! Page gate. Decides whether the engine activates for a document path.

use regex::Regex;

use crate::types::{Manifest, PageMode};

/// Whether the engine should govern the page at `path`.
///
/// Missing `pages` config and mode `all` always activate. Unknown modes fail
/// open.
pub fn authorize(manifest: &Manifest, path: &str) -> bool {
    let Some(pages) = &manifest.pages else {
        return true;
    };
    match pages.mode {
        PageMode::All => true,
        PageMode::Include => pages.patterns.iter().any(|p| path_matches(path, p)),
        PageMode::Exclude => !pages.patterns.iter().any(|p| path_matches(path, p)),
        PageMode::Unknown => {
            tracing::warn!("Unrecognized pages.mode in manifest; activating on {path}");
            true
        }
    }
}

/// Match a document path against one gate pattern.
///
/// - `*` anywhere makes the pattern a full-path wildcard (`/blog/*/amp`).
/// - A trailing `/` makes it a prefix (`/account/`).
/// - Anything else must equal the path exactly.
pub fn path_matches(path: &str, pattern: &str) -> bool {
    if pattern.contains('*') {
        return wildcard_regex(pattern)
            .map(|re| re.is_match(path))
            .unwrap_or(false);
    }
    if pattern.ends_with('/') {
        return path.starts_with(pattern);
    }
    path == pattern
}

fn wildcard_regex(pattern: &str) -> Option<Regex> {
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    match Regex::new(&format!("^{body}$")) {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::warn!("Invalid page pattern {pattern}: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PagesConfig;

    fn manifest(mode: PageMode, patterns: &[&str]) -> Manifest {
        Manifest {
            pages: Some(PagesConfig {
                mode,
                patterns: patterns.iter().map(|s| s.to_string()).collect(),
            }),
            ..Manifest::default()
        }
    }

    #[test]
    fn test_absent_pages_config_activates() {
        assert!(authorize(&Manifest::default(), "/anything"));
        assert!(authorize(&manifest(PageMode::All, &["/x"]), "/y"));
    }

    #[test]
    fn test_exclude_checkout() {
        let m = manifest(PageMode::Exclude, &["/checkout"]);
        assert!(!authorize(&m, "/checkout"));
        assert!(authorize(&m, "/checkout/confirm"));
        assert!(authorize(&m, "/"));
    }

    #[test]
    fn test_include_modes() {
        let m = manifest(PageMode::Include, &["/blog/", "/p/*/reviews"]);
        assert!(authorize(&m, "/blog/post-1"));
        assert!(authorize(&m, "/p/123/reviews"));
        assert!(!authorize(&m, "/p/123/reviews/2"));
        assert!(!authorize(&m, "/cart"));
        assert!(!authorize(&m, "/"));
    }

    #[test]
    fn test_root_pattern_is_a_prefix_of_every_path() {
        let m = manifest(PageMode::Include, &["/"]);
        assert!(authorize(&m, "/"));
        assert!(authorize(&m, "/cart"));
        let none = manifest(PageMode::Exclude, &["/"]);
        assert!(!authorize(&none, "/cart"));
    }

    #[test]
    fn test_include_empty_patterns_never_activates() {
        assert!(!authorize(&manifest(PageMode::Include, &[]), "/"));
        assert!(authorize(&manifest(PageMode::Exclude, &[]), "/"));
    }

    #[test]
    fn test_unknown_mode_fails_open() {
        assert!(authorize(&manifest(PageMode::Unknown, &["/"]), "/cart"));
    }

    #[test]
    fn test_wildcard_escapes_regex_metacharacters() {
        assert!(path_matches("/a.b/x", "/a.b/*"));
        assert!(!path_matches("/aXb/x", "/a.b/*"));
    }
}
