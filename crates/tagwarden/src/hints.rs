//! Resource hints injected into `<head>` on activation: preconnects,
//! preloads and the inline critical stylesheet.

use std::collections::HashSet;

use crate::dom::{DomHost, NodeId};
use crate::types::{DomError, Manifest, PreloadHint};

/// Inject every hint the manifest carries. Returns how many elements were
/// added. A hint the host refuses is skipped.
pub fn inject<H: DomHost>(
    host: &mut H,
    manifest: &Manifest,
    processed: &mut HashSet<NodeId>,
) -> usize {
    let Some(head) = host.head() else {
        return 0;
    };
    let mut added = 0;

    for origin in &manifest.preconnect {
        match preconnect(host, head, origin) {
            Ok(node) => {
                processed.insert(node);
                added += 1;
            }
            Err(e) => tracing::warn!("Skipping preconnect {origin}: {e}"),
        }
    }
    for hint in &manifest.preload {
        match preload(host, head, hint) {
            Ok(node) => {
                processed.insert(node);
                added += 1;
            }
            Err(e) => tracing::warn!("Skipping preload {}: {e}", hint.url),
        }
    }
    if let Some(css) = manifest.critical_css_inline.as_deref().filter(|c| !c.is_empty()) {
        match critical_css(host, head, css) {
            Ok(node) => {
                processed.insert(node);
                added += 1;
            }
            Err(e) => tracing::warn!("Skipping critical CSS: {e}"),
        }
    }
    added
}

fn preconnect<H: DomHost>(host: &mut H, head: NodeId, origin: &str) -> Result<NodeId, DomError> {
    let link = host.create_element("link");
    host.set_attribute(link, "rel", "preconnect")?;
    host.set_attribute(link, "href", origin)?;
    host.append_child(head, link)?;
    Ok(link)
}

fn preload<H: DomHost>(host: &mut H, head: NodeId, hint: &PreloadHint) -> Result<NodeId, DomError> {
    let link = host.create_element("link");
    host.set_attribute(link, "rel", "preload")?;
    host.set_attribute(link, "href", &hint.url)?;
    if let Some(as_type) = &hint.as_type {
        host.set_attribute(link, "as", as_type)?;
    }
    if let Some(cors) = &hint.crossorigin {
        host.set_attribute(link, "crossorigin", cors)?;
    }
    if let Some(mime) = &hint.mime_type {
        host.set_attribute(link, "type", mime)?;
    }
    host.append_child(head, link)?;
    Ok(link)
}

fn critical_css<H: DomHost>(host: &mut H, head: NodeId, css: &str) -> Result<NodeId, DomError> {
    let style = host.create_element("style");
    host.set_text(style, css)?;
    host.append_child(head, style)?;
    Ok(style)
}
