//! Tier executor. Re-materializes queued resources and puts them back into
//! the document.
//!
//! Replacements are created through the host's native path so they never
//! re-enter interception, and they are claimed as processed before insertion
//! so the mutation fallback ignores them. `src` is always applied last: a
//! `type="module"` or `nomodule` must already be in place when the fetch
//! starts.

use std::collections::{HashMap, HashSet};

use crate::dom::{DomHost, NodeId};
use crate::queue::QueuedResource;
use crate::types::{DomError, InsertionError, TagKind};

/// Outcome of flushing one batch of resources.
#[derive(Debug, Default)]
pub struct FlushReport {
    /// Replacement elements, in execution order.
    pub executed: Vec<NodeId>,
    /// Resources that could not be re-inserted and were dropped.
    pub dropped: Vec<InsertionError>,
}

/// Re-insert every resource in order. Failures drop only the failing resource.
///
/// A recorded sibling that was itself queued in this batch is followed to its
/// own recorded sibling (or its replacement once executed), so adjacent
/// queued elements come back in their original order.
pub fn flush<H: DomHost>(
    host: &mut H,
    resources: Vec<QueuedResource>,
    processed: &mut HashSet<NodeId>,
) -> FlushReport {
    let chain: HashMap<NodeId, Option<NodeId>> = resources
        .iter()
        .map(|r| (r.original, r.next_sibling))
        .collect();
    let mut replaced: HashMap<NodeId, NodeId> = HashMap::new();

    let mut report = FlushReport::default();
    for resource in resources {
        let reference = match resource.parent {
            Some(parent) => {
                resolve_reference(&*host, parent, resource.next_sibling, &chain, &replaced)
            }
            None => None,
        };
        match insert(host, &resource, reference, processed) {
            Ok(node) => {
                replaced.insert(resource.original, node);
                report.executed.push(node);
            }
            Err(e) => {
                tracing::warn!("Dropping queued resource: {e}");
                report.dropped.push(e);
            }
        }
    }
    report
}

/// First node along the recorded sibling chain that is still a child of
/// `parent`.
fn resolve_reference<H: DomHost>(
    host: &H,
    parent: NodeId,
    start: Option<NodeId>,
    chain: &HashMap<NodeId, Option<NodeId>>,
    replaced: &HashMap<NodeId, NodeId>,
) -> Option<NodeId> {
    let mut cursor = start;
    // Bounded by the batch size.
    for _ in 0..=chain.len() {
        let sibling = cursor?;
        if host.parent(sibling) == Some(parent) {
            return Some(sibling);
        }
        if let Some(&node) = replaced.get(&sibling) {
            if host.parent(node) == Some(parent) {
                return Some(node);
            }
        }
        cursor = *chain.get(&sibling)?;
    }
    None
}

/// Build a fresh element for `resource` and insert it at its anchor, or in
/// the fallback container when the anchor's parent has left the document.
pub fn rematerialize<H: DomHost>(
    host: &mut H,
    resource: &QueuedResource,
    processed: &mut HashSet<NodeId>,
) -> Result<NodeId, InsertionError> {
    let reference = resource
        .next_sibling
        .filter(|s| resource.parent.is_some() && host.parent(*s) == resource.parent);
    insert(host, resource, reference, processed)
}

fn insert<H: DomHost>(
    host: &mut H,
    resource: &QueuedResource,
    reference: Option<NodeId>,
    processed: &mut HashSet<NodeId>,
) -> Result<NodeId, InsertionError> {
    let fail = |source: DomError| InsertionError {
        url: resource.url.clone(),
        tag: resource.kind.as_str(),
        source,
    };

    let node = host.create_element(resource.kind.as_str());
    processed.insert(node);
    for (name, value) in &resource.attributes {
        if name.eq_ignore_ascii_case("src") {
            continue;
        }
        host.set_attribute(node, name, value).map_err(fail)?;
    }
    host.set_attribute(node, "src", &resource.url).map_err(fail)?;

    match resource.parent.filter(|p| host.is_connected(*p)) {
        Some(parent) => {
            host.insert_before(parent, node, reference).map_err(fail)?;
        }
        None => {
            let container = match resource.kind {
                TagKind::Script => host.head(),
                TagKind::Iframe | TagKind::Img => host.body(),
            }
            .ok_or_else(|| fail(DomError::Rejected("no fallback container".into())))?;
            host.append_child(container, node).map_err(fail)?;
        }
    }
    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::MemoryDocument;

    fn script(url: &str, attrs: &[(&str, &str)]) -> QueuedResource {
        QueuedResource {
            original: NodeId(999),
            url: url.to_string(),
            kind: TagKind::Script,
            attributes: attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            parent: None,
            next_sibling: None,
        }
    }

    #[test]
    fn test_flush_preserves_order_and_attributes() {
        let mut doc = MemoryDocument::new("https://a.com/");
        let mut processed = HashSet::new();
        let batch = vec![
            script("https://a.com/1.js", &[("type", "module"), ("data-x", "1")]),
            script("https://a.com/2.js", &[]),
            script("https://a.com/3.js", &[("nomodule", "")]),
        ];
        let report = flush(&mut doc, batch, &mut processed);
        doc.checkpoint();

        assert_eq!(report.executed.len(), 3);
        assert!(report.dropped.is_empty());
        assert_eq!(
            doc.load_urls(),
            vec!["https://a.com/1.js", "https://a.com/2.js", "https://a.com/3.js"]
        );
        let first = report.executed[0];
        assert_eq!(
            doc.attributes(first),
            vec![
                ("type".to_string(), "module".to_string()),
                ("data-x".to_string(), "1".to_string()),
                ("src".to_string(), "https://a.com/1.js".to_string()),
            ]
        );
        assert!(report.executed.iter().all(|n| processed.contains(n)));
        assert_eq!(doc.parent(first), doc.head());
    }

    #[test]
    fn test_flush_restores_anchor_position() {
        let mut doc = MemoryDocument::new("https://a.com/");
        let body = doc.body().unwrap();
        let before = doc.create_element("div");
        let after = doc.create_element("div");
        doc.append_child(body, before).unwrap();
        doc.append_child(body, after).unwrap();

        let mut res = script("https://a.com/w.js", &[]);
        res.kind = TagKind::Iframe;
        res.parent = Some(body);
        res.next_sibling = Some(after);

        let node = rematerialize(&mut doc, &res, &mut HashSet::new()).unwrap();
        assert_eq!(doc.children(body), vec![before, node, after]);
    }

    #[test]
    fn test_queued_siblings_resolve_through_each_other() {
        let mut doc = MemoryDocument::new("https://a.com/");
        let body = doc.body().unwrap();
        let a = doc.create_element("iframe");
        let b = doc.create_element("iframe");
        let footer = doc.create_element("footer");
        for n in [a, b, footer] {
            doc.append_child(body, n).unwrap();
        }
        doc.remove(a);
        doc.remove(b);

        let mut first = script("https://w.com/a", &[]);
        first.kind = TagKind::Iframe;
        first.original = a;
        first.parent = Some(body);
        first.next_sibling = Some(b);
        let mut second = script("https://w.com/b", &[]);
        second.kind = TagKind::Iframe;
        second.original = b;
        second.parent = Some(body);
        second.next_sibling = Some(footer);

        // Reverse order: `b` goes first, then `a` anchors on its replacement.
        let report = flush(&mut doc, vec![second.clone(), first.clone()], &mut HashSet::new());
        let (b2, a2) = (report.executed[0], report.executed[1]);
        assert_eq!(doc.children(body), vec![a2, b2, footer]);
        for n in [a2, b2] {
            doc.remove(n);
        }

        let report = flush(&mut doc, vec![first, second], &mut HashSet::new());
        assert_eq!(
            doc.children(body),
            vec![report.executed[0], report.executed[1], footer]
        );
    }

    #[test]
    fn test_detached_anchor_uses_fallback_container() {
        let mut doc = MemoryDocument::new("https://a.com/");
        let orphan = doc.create_element("div");
        let mut res = script("https://a.com/x.js", &[]);
        res.parent = Some(orphan);
        let node = rematerialize(&mut doc, &res, &mut HashSet::new()).unwrap();
        assert_eq!(doc.parent(node), doc.head());

        res.kind = TagKind::Iframe;
        let node = rematerialize(&mut doc, &res, &mut HashSet::new()).unwrap();
        assert_eq!(doc.parent(node), doc.body());
    }

    #[test]
    fn test_sibling_moved_away_appends_to_parent() {
        let mut doc = MemoryDocument::new("https://a.com/");
        let body = doc.body().unwrap();
        let sib = doc.create_element("div");
        doc.append_child(body, sib).unwrap();
        let mut res = script("https://a.com/x.js", &[]);
        res.parent = Some(body);
        res.next_sibling = Some(sib);
        doc.remove(sib);

        let node = rematerialize(&mut doc, &res, &mut HashSet::new()).unwrap();
        assert_eq!(doc.children(body), vec![node]);
    }

    #[test]
    fn test_insertion_failure_drops_only_that_resource() {
        let mut doc = MemoryDocument::new("https://a.com/");
        let head = doc.head().unwrap();
        let body = doc.body().unwrap();
        doc.reject_insertions_into(head);

        let mut iframe = script("https://w.com/frame", &[]);
        iframe.kind = TagKind::Iframe;
        let batch = vec![script("https://a.com/a.js", &[]), iframe];
        let report = flush(&mut doc, batch, &mut HashSet::new());
        doc.checkpoint();

        assert_eq!(report.dropped.len(), 1);
        assert_eq!(report.dropped[0].url, "https://a.com/a.js");
        assert_eq!(report.executed.len(), 1);
        assert_eq!(doc.parent(report.executed[0]), Some(body));
        assert_eq!(doc.load_urls(), vec!["https://w.com/frame"]);
    }
}
