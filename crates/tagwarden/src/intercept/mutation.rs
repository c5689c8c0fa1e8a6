//! Document mutation fallback.
//!
//! Runs at every microtask checkpoint while the engine is active, before the
//! host starts any loads. Each newly added node (and its subtree) is visited
//! once:
//!
//! - `script` / `iframe` with a source: classified. Deferred and delayed
//!   nodes are detached with their source cleared, and queued with their
//!   original parent and next sibling so order can be restored. Blocked nodes
//!   are detached for good.
//! - `img` below the fold: marked `loading="lazy"`, never queued.
//! - `iframe` below the fold and not allowed or delayed: marked lazy as well.

use crate::dom::{DomHost, NodeId};
use crate::engine::Engine;
use crate::queue::QueuedResource;
use crate::types::{TagKind, Tier};

impl<H: DomHost> Engine<H> {
    pub(crate) fn process_mutations(&mut self) {
        for root in self.host.take_mutations() {
            let mut stack = vec![root];
            while let Some(node) = stack.pop() {
                // Children first in document order.
                let mut children = self.host.children(node);
                children.reverse();
                self.govern_node(node);
                stack.extend(children);
            }
        }
    }

    fn govern_node(&mut self, node: NodeId) {
        let Some(kind) = self.host.tag_name(node).and_then(|t| TagKind::from_tag(&t)) else {
            return;
        };
        match kind {
            TagKind::Img => {
                self.lazy_if_below_fold(node);
            }
            TagKind::Script | TagKind::Iframe => {
                let Some(src) = self.host.get_attribute(node, "src").filter(|s| !s.is_empty())
                else {
                    return;
                };
                if !self.state.claim(node) {
                    return;
                }
                let url = self.resolve(&src);
                let tier = self.classify(&url);
                self.log_decision("mutation", &url, tier);

                if kind == TagKind::Iframe && !matches!(tier, Tier::Allow | Tier::Delay) {
                    self.lazy_if_below_fold(node);
                }

                match tier {
                    Tier::Allow => self.state.counters.allowed += 1,
                    Tier::Block => {
                        self.host.remove(node);
                        self.host.remove_attribute(node, "src");
                        self.state.counters.blocked += 1;
                    }
                    Tier::Defer | Tier::Delay => {
                        let resource = QueuedResource {
                            original: node,
                            url,
                            kind,
                            attributes: self
                                .host
                                .attributes(node)
                                .into_iter()
                                .filter(|(k, _)| k != "src")
                                .collect(),
                            parent: self.host.parent(node),
                            next_sibling: self.host.next_sibling(node),
                        };
                        self.host.remove(node);
                        self.host.remove_attribute(node, "src");
                        self.enqueue(tier, resource);
                    }
                }
            }
        }
    }

    /// Mark a node for native lazy loading if it sits below the fold.
    /// Each node is marked at most once.
    fn lazy_if_below_fold(&mut self, node: NodeId) -> bool {
        if self.state.lazy.contains(&node) {
            return false;
        }
        let threshold = self.host.viewport_height() * self.options.below_fold_multiplier;
        let below = self
            .host
            .bounding_top(node)
            .is_some_and(|top| top > threshold);
        if !below {
            return false;
        }
        if self.host.set_attribute(node, "loading", "lazy").is_err() {
            return false;
        }
        self.state.lazy.insert(node);
        self.state.counters.lazy_marked += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use crate::config::EngineOptions;
    use crate::dom::{DomHost, MemoryDocument};
    use crate::engine::Engine;
    use crate::telemetry::Telemetry;
    use crate::types::{Manifest, Tier};

    fn engine(manifest: Manifest) -> Engine<MemoryDocument> {
        let doc = MemoryDocument::new("https://shop.example.com/");
        let mut e = Engine::new(doc, EngineOptions::default(), Telemetry::disabled(), "/");
        e.activate(Manifest {
            disable_interception: true,
            ..manifest
        });
        e
    }

    fn policy() -> Manifest {
        Manifest {
            allow_scripts: vec!["core.js".into()],
            block_scripts: vec!["pixel".into()],
            delayed_scripts: vec!["chat".into()],
            ..Manifest::default()
        }
    }

    fn insert(e: &mut Engine<MemoryDocument>, tag: &str, src: &str) -> crate::dom::NodeId {
        let body = e.host().body().unwrap();
        let node = e.host_mut().create_element(tag);
        e.host_mut().set_attribute(node, "src", src).unwrap();
        e.append_child(body, node).unwrap();
        node
    }

    #[test]
    fn test_deferred_script_detached_and_queued() {
        let mut e = engine(policy());
        let body = e.host().body().unwrap();
        let marker = e.host_mut().create_element("div");
        e.append_child(body, marker).unwrap();

        let node = e.host_mut().create_element("script");
        e.host_mut().set_attribute(node, "async", "").unwrap();
        e.host_mut().set_attribute(node, "src", "/a/analytics.js").unwrap();
        e.insert_before(body, node, Some(marker)).unwrap();

        assert!(e.host().loads().is_empty());
        assert!(!e.host().is_connected(node));
        assert_eq!(e.host().get_attribute(node, "src"), None);

        let queued = e.state().queues.iter(Tier::Defer).next().unwrap();
        assert_eq!(queued.url, "https://shop.example.com/a/analytics.js");
        assert_eq!(queued.parent, Some(body));
        assert_eq!(queued.next_sibling, Some(marker));
        assert_eq!(queued.attributes, vec![("async".to_string(), String::new())]);
    }

    #[test]
    fn test_allowed_and_blocked_scripts() {
        let mut e = engine(policy());
        insert(&mut e, "script", "https://cdn.x.com/core.js");
        let blocked = insert(&mut e, "script", "https://ads.x.com/pixel.js");

        assert_eq!(e.host().load_urls(), vec!["https://cdn.x.com/core.js"]);
        assert!(!e.host().is_connected(blocked));
        assert_eq!(e.state().counters.allowed, 1);
        assert_eq!(e.state().counters.blocked, 1);
        assert!(e.state().queues.is_empty());
    }

    #[test]
    fn test_nested_scripts_are_found() {
        let mut e = engine(policy());
        let body = e.host().body().unwrap();
        let wrapper = e.host_mut().create_element("div");
        let a = e.host_mut().create_element("script");
        let b = e.host_mut().create_element("script");
        e.host_mut().set_attribute(a, "src", "https://x.com/one.js").unwrap();
        e.host_mut().set_attribute(b, "src", "https://x.com/chat.js").unwrap();
        e.host_mut().append_child(wrapper, a).unwrap();
        e.host_mut().append_child(wrapper, b).unwrap();
        e.append_child(body, wrapper).unwrap();

        assert!(e.host().loads().is_empty());
        assert_eq!(e.state().queues.len(Tier::Defer), 1);
        assert_eq!(e.state().queues.len(Tier::Delay), 1);
    }

    #[test]
    fn test_inline_script_untouched() {
        let mut e = engine(policy());
        let body = e.host().body().unwrap();
        let node = e.host_mut().create_element("script");
        e.host_mut().set_text(node, "window.x = 1").unwrap();
        e.append_child(body, node).unwrap();
        assert!(e.host().is_connected(node));
        assert!(e.state().queues.is_empty());
    }

    #[test]
    fn test_images_lazy_below_fold_once() {
        let mut e = engine(policy());
        let body = e.host().body().unwrap();
        let near = e.host_mut().create_element("img");
        let far = e.host_mut().create_element("img");
        e.host_mut().set_layout_top(near, 900.0);
        e.host_mut().set_layout_top(far, 1300.0);
        e.host_mut().set_attribute(far, "src", "https://x.com/far.png").unwrap();
        e.append_child(body, near).unwrap();
        e.append_child(body, far).unwrap();

        assert_eq!(e.host().get_attribute(near, "loading"), None);
        assert_eq!(e.host().get_attribute(far, "loading").as_deref(), Some("lazy"));
        assert!(e.state().queues.is_empty());
        assert!(e.host().loads()[0].lazy);

        // Re-inserting does not mark twice.
        e.host_mut().remove(far);
        e.append_child(body, far).unwrap();
        assert_eq!(e.state().counters.lazy_marked, 1);
    }

    #[test]
    fn test_iframe_below_fold_is_lazy_and_queued() {
        let mut e = engine(policy());
        let body = e.host().body().unwrap();
        let frame = e.host_mut().create_element("iframe");
        e.host_mut().set_layout_top(frame, 2000.0);
        e.host_mut().set_attribute(frame, "src", "https://video.x.com/embed").unwrap();
        e.append_child(body, frame).unwrap();

        let queued = e.state().queues.iter(Tier::Defer).next().unwrap();
        assert!(queued
            .attributes
            .contains(&("loading".to_string(), "lazy".to_string())));

        // Delayed iframes are left eager.
        let chat = e.host_mut().create_element("iframe");
        e.host_mut().set_layout_top(chat, 2000.0);
        e.host_mut().set_attribute(chat, "src", "https://x.com/chat").unwrap();
        e.append_child(body, chat).unwrap();
        let queued = e.state().queues.iter(Tier::Delay).next().unwrap();
        assert!(queued.attributes.is_empty());
    }
}
