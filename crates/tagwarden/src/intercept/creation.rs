//! Element-creation override.
//!
//! While installed, [`Engine::create_element`] hands page code a
//! [`GovernedElement`] for every `<script>`. The wrapper exposes only what
//! the engine needs to see (source get/set) and routes every other operation
//! through [`Engine::forward`] to the real element, so page code observes no
//! difference. Deferred and delayed sources are never written to the real
//! element: no fetch is ever issued for it.

use std::collections::HashMap;

use crate::dom::{DomHost, NodeId};
use crate::engine::Engine;
use crate::queue::QueuedResource;
use crate::types::{DomError, TagKind, Tier};

/// State of the creation override.
#[derive(Debug, Default)]
pub struct CreationOverride {
    /// Whether newly created scripts are wrapped.
    pub installed: bool,
    /// Source the page assigned to each wrapped element, as written.
    intended_src: HashMap<NodeId, String>,
    /// Disposition of each wrapped element whose source was assigned.
    decided: HashMap<NodeId, Tier>,
}

/// Handle returned to page code by [`Engine::create_element`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GovernedElement {
    node: NodeId,
    intercepted: bool,
}

impl GovernedElement {
    /// The real element behind the wrapper.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Whether source assignment on this element is classified.
    pub fn is_intercepted(&self) -> bool {
        self.intercepted
    }
}

/// Operations forwarded verbatim to the real element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementOp {
    GetAttribute(String),
    SetAttribute(String, String),
    RemoveAttribute(String),
    SetText(String),
    TagName,
}

impl<H: DomHost> Engine<H> {
    /// Create an element the way page code would.
    ///
    /// Scripts are wrapped while the override is installed; everything else
    /// is a plain native element.
    pub fn create_element(&mut self, tag: &str) -> GovernedElement {
        let node = self.host.create_element(tag);
        let intercepted = self.is_active()
            && self.creation.installed
            && TagKind::from_tag(tag) == Some(TagKind::Script);
        GovernedElement { node, intercepted }
    }

    /// Assign the element's source.
    ///
    /// Returns the tier the source was classified into (`Allow` for
    /// elements that are not intercepted).
    pub fn set_src(&mut self, el: &GovernedElement, url: &str) -> Result<Tier, DomError> {
        if !el.intercepted {
            self.host.set_attribute(el.node, "src", url)?;
            return Ok(Tier::Allow);
        }

        let resolved = self.resolve(url);
        self.creation.intended_src.insert(el.node, url.to_string());

        // Reassigning the source of an already-queued element retargets it.
        if let Some(queued) = self.state.queues.find_mut(el.node) {
            queued.url = resolved;
            let tier = self.creation.decided.get(&el.node).copied().unwrap_or(Tier::Defer);
            return Ok(tier);
        }
        // Decided and no longer queued: blocked, or already executed through a
        // replacement. A started script never runs again.
        if let Some(&tier) = self.creation.decided.get(&el.node) {
            if tier == Tier::Allow {
                self.host.set_attribute(el.node, "src", url)?;
            }
            return Ok(tier);
        }

        let tier = self.classify(&resolved);
        self.creation.decided.insert(el.node, tier);
        self.state.claim(el.node);
        self.log_decision("create", &resolved, tier);

        match tier {
            Tier::Allow => {
                self.state.counters.allowed += 1;
                self.host.set_attribute(el.node, "src", url)?;
            }
            Tier::Block => {
                self.state.counters.blocked += 1;
            }
            Tier::Defer | Tier::Delay => {
                let attributes = self
                    .host
                    .attributes(el.node)
                    .into_iter()
                    .filter(|(k, _)| !k.eq_ignore_ascii_case("src"))
                    .collect();
                let resource = QueuedResource {
                    original: el.node,
                    url: resolved,
                    kind: TagKind::Script,
                    attributes,
                    parent: self.host.parent(el.node),
                    next_sibling: self.host.next_sibling(el.node),
                };
                self.enqueue(tier, resource);
            }
        }
        Ok(tier)
    }

    /// Read the element's source as page code would see it.
    pub fn get_src(&self, el: &GovernedElement) -> Option<String> {
        if el.intercepted {
            if let Some(src) = self.creation.intended_src.get(&el.node) {
                return Some(src.clone());
            }
        }
        self.host.get_attribute(el.node, "src")
    }

    /// Forward any other operation to the real element.
    ///
    /// `src` writes through `SetAttribute` are classified like
    /// [`set_src`](Self::set_src); attribute changes on a queued element are
    /// mirrored into its queue record so the replacement carries them.
    pub fn forward(
        &mut self,
        el: &GovernedElement,
        op: ElementOp,
    ) -> Result<Option<String>, DomError> {
        match op {
            ElementOp::GetAttribute(name) => {
                if name.eq_ignore_ascii_case("src") {
                    return Ok(self.get_src(el));
                }
                Ok(self.host.get_attribute(el.node, &name))
            }
            ElementOp::SetAttribute(name, value) => {
                if name.eq_ignore_ascii_case("src") {
                    self.set_src(el, &value)?;
                    return Ok(None);
                }
                self.host.set_attribute(el.node, &name, &value)?;
                if let Some(queued) = self.state.queues.find_mut(el.node) {
                    queued.set_attribute(&name, &value);
                }
                Ok(None)
            }
            ElementOp::RemoveAttribute(name) => {
                self.host.remove_attribute(el.node, &name);
                if let Some(queued) = self.state.queues.find_mut(el.node) {
                    queued.remove_attribute(&name);
                }
                Ok(None)
            }
            ElementOp::SetText(text) => {
                self.host.set_text(el.node, &text)?;
                Ok(None)
            }
            ElementOp::TagName => Ok(self.host.tag_name(el.node)),
        }
    }

    /// Put the native creation path back, e.g. when another party on the
    /// page installs its own conflicting override. Elements already wrapped
    /// stay governed.
    pub fn restore_create_element(&mut self) -> bool {
        let was = self.creation.installed;
        self.creation.installed = false;
        if was {
            tracing::info!("Creation override restored to native");
        }
        was
    }

    /// Reinstall the override. Refused when the engine is passive or the
    /// manifest disables interception.
    pub fn install_create_element(&mut self) -> bool {
        let allowed = self.is_active()
            && self
                .manifest()
                .is_some_and(|m| !m.disable_interception);
        if allowed {
            self.creation.installed = true;
        }
        allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineOptions;
    use crate::dom::MemoryDocument;
    use crate::telemetry::Telemetry;
    use crate::types::Manifest;

    fn engine(manifest: Manifest) -> Engine<MemoryDocument> {
        let doc = MemoryDocument::new("https://shop.example.com/");
        let mut e = Engine::new(doc, EngineOptions::default(), Telemetry::disabled(), "/");
        e.activate(manifest);
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

    #[test]
    fn test_only_scripts_are_wrapped() {
        let mut e = engine(policy());
        assert!(e.create_element("script").is_intercepted());
        assert!(!e.create_element("div").is_intercepted());
        assert!(!e.create_element("iframe").is_intercepted());
    }

    #[test]
    fn test_deferred_source_never_reaches_element() {
        let mut e = engine(policy());
        let el = e.create_element("script");
        let tier = e.set_src(&el, "/js/analytics.js").unwrap();
        assert_eq!(tier, Tier::Defer);
        assert_eq!(e.host().get_attribute(el.node(), "src"), None);
        assert_eq!(e.get_src(&el).as_deref(), Some("/js/analytics.js"));
        assert_eq!(e.state().queues.len(Tier::Defer), 1);
        let queued = e.state().queues.iter(Tier::Defer).next().unwrap();
        assert_eq!(queued.url, "https://shop.example.com/js/analytics.js");
    }

    #[test]
    fn test_allowed_source_applies_immediately() {
        let mut e = engine(policy());
        let el = e.create_element("script");
        assert_eq!(e.set_src(&el, "https://cdn.x.com/core.js").unwrap(), Tier::Allow);
        assert_eq!(
            e.host().get_attribute(el.node(), "src").as_deref(),
            Some("https://cdn.x.com/core.js")
        );
        assert_eq!(e.state().counters.allowed, 1);
    }

    #[test]
    fn test_blocked_source_is_dropped() {
        let mut e = engine(policy());
        let el = e.create_element("script");
        assert_eq!(e.set_src(&el, "https://ads.x.com/pixel.js").unwrap(), Tier::Block);
        assert!(e.state().queues.is_empty());
        // A second assignment cannot resurrect it.
        assert_eq!(e.set_src(&el, "https://cdn.x.com/core.js").unwrap(), Tier::Block);
        assert_eq!(e.host().get_attribute(el.node(), "src"), None);
        assert_eq!(e.state().counters.blocked, 1);
    }

    #[test]
    fn test_flushed_script_does_not_run_twice() {
        let mut e = engine(policy());
        let body = e.host().body().unwrap();
        let el = e.create_element("script");
        assert_eq!(e.set_src(&el, "https://t.x.com/tag.js").unwrap(), Tier::Defer);
        e.append_child(body, el.node()).unwrap();
        assert_eq!(e.force_flush(), 1);

        assert_eq!(e.set_src(&el, "https://t.x.com/tag.js").unwrap(), Tier::Defer);
        assert!(e.state().queues.is_empty());
        assert_eq!(e.force_flush(), 0);
        e.run_microtasks();
        assert_eq!(e.host().load_urls(), vec!["https://t.x.com/tag.js"]);

        e.set_src(&el, "https://t.x.com/other.js").unwrap();
        assert_eq!(e.get_src(&el).as_deref(), Some("https://t.x.com/other.js"));
        assert_eq!(e.host().get_attribute(el.node(), "src"), None);
    }

    #[test]
    fn test_allowed_script_is_not_reclassified() {
        let mut e = engine(policy());
        let el = e.create_element("script");
        e.set_src(&el, "https://cdn.x.com/core.js").unwrap();
        assert_eq!(e.set_src(&el, "https://x.com/analytics.js").unwrap(), Tier::Allow);
        assert!(e.state().queues.is_empty());
        assert_eq!(e.state().counters.allowed, 1);
    }

    #[test]
    fn test_forwarded_attributes_follow_queued_element() {
        let mut e = engine(policy());
        let el = e.create_element("script");
        e.forward(&el, ElementOp::SetAttribute("type".into(), "module".into()))
            .unwrap();
        e.forward(&el, ElementOp::SetAttribute("src".into(), "https://x.com/chat.js".into()))
            .unwrap();
        e.forward(&el, ElementOp::SetAttribute("data-id".into(), "7".into()))
            .unwrap();

        assert_eq!(
            e.forward(&el, ElementOp::GetAttribute("src".into())).unwrap().as_deref(),
            Some("https://x.com/chat.js")
        );
        assert_eq!(
            e.forward(&el, ElementOp::TagName).unwrap().as_deref(),
            Some("script")
        );
        let queued = e.state().queues.iter(Tier::Delay).next().unwrap();
        assert_eq!(
            queued.attributes,
            vec![
                ("type".to_string(), "module".to_string()),
                ("data-id".to_string(), "7".to_string())
            ]
        );
    }

    #[test]
    fn test_restore_and_reinstall() {
        let mut e = engine(policy());
        let wrapped = e.create_element("script");
        assert!(e.restore_create_element());
        let native = e.create_element("script");
        assert!(!native.is_intercepted());
        e.set_src(&native, "https://x.com/analytics.js").unwrap();
        assert!(e.host().get_attribute(native.node(), "src").is_some());

        // Wrapped before the restore: still governed.
        assert_eq!(e.set_src(&wrapped, "https://x.com/analytics.js").unwrap(), Tier::Defer);

        assert!(e.install_create_element());
        assert!(e.create_element("script").is_intercepted());
    }

    #[test]
    fn test_disabled_interception_uses_native_creation() {
        let mut e = engine(Manifest {
            disable_interception: true,
            ..policy()
        });
        assert!(!e.create_element("script").is_intercepted());
        assert!(!e.install_create_element());
    }
}
