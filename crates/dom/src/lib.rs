//! Arena-backed DOM used by the ponyfill engine.
//!
//! This is the engine's view of the page: a mutable node graph with
//! attributes, text and document-order traversal, plus a broadcast channel
//! of [`DomUpdate`] events that mirrors a mutation observer subscription.
//! The engine only ever references nodes by [`NodeId`]; ownership stays
//! here.

#![forbid(unsafe_code)]

pub mod selector;

use indextree::Arena;
pub use indextree::NodeId;
use smallvec::SmallVec;
use tokio::sync::broadcast;
use url::Url;

pub use selector::SelectorList;

/// The kind of a DOM node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum NodeKind {
    /// The document root.
    #[default]
    Document,
    /// An element with a (lowercase) tag name.
    Element { tag: String },
    /// A text node.
    Text { text: String },
    /// A shadow root attached to its parent element. Traversal does not
    /// descend into shadow roots unless explicitly asked to.
    ShadowRoot,
}

/// A single node: kind plus attribute list (elements only).
#[derive(Debug, Clone, Default)]
pub struct DomNode {
    pub kind: NodeKind,
    pub attrs: SmallVec<[(String, String); 4]>,
}

/// A mutation event emitted after the corresponding change was applied.
#[derive(Debug, Clone)]
pub enum DomUpdate {
    InsertElement { parent: NodeId, node: NodeId, tag: String },
    InsertText { parent: NodeId, node: NodeId },
    SetAttr { node: NodeId, name: String, value: String },
    RemoveAttr { node: NodeId, name: String },
    RemoveNode { node: NodeId },
}

/// The mutable node graph. All writes emit a [`DomUpdate`] to subscribers.
#[derive(Debug)]
pub struct Dom {
    arena: Arena<DomNode>,
    root: NodeId,
    url: Url,
    updates: broadcast::Sender<DomUpdate>,
}

impl Dom {
    /// Create an empty document with the given base URL.
    pub fn new(url: Url) -> Self {
        let mut arena = Arena::new();
        let root = arena.new_node(DomNode::default());
        let (updates, _) = broadcast::channel(256);
        Self {
            arena,
            root,
            url,
            updates,
        }
    }

    /// The document root node.
    pub const fn root(&self) -> NodeId {
        self.root
    }

    /// The document base URL, used to absolutize relative references.
    pub const fn url(&self) -> &Url {
        &self.url
    }

    /// Subscribe to mutation updates. Events sent before the subscription
    /// are not replayed.
    pub fn updates(&self) -> broadcast::Receiver<DomUpdate> {
        self.updates.subscribe()
    }

    fn emit(&self, update: DomUpdate) {
        // No receivers is fine; updates are advisory.
        drop(self.updates.send(update));
    }

    /// Create a new element under `parent`, appended as the last child.
    pub fn create_element(&mut self, parent: NodeId, tag: &str) -> NodeId {
        let node = self.arena.new_node(DomNode {
            kind: NodeKind::Element {
                tag: tag.to_ascii_lowercase(),
            },
            attrs: SmallVec::new(),
        });
        parent.append(node, &mut self.arena);
        self.emit(DomUpdate::InsertElement {
            parent,
            node,
            tag: tag.to_ascii_lowercase(),
        });
        node
    }

    /// Create a new element inserted directly after `sibling`.
    pub fn create_element_after(&mut self, sibling: NodeId, tag: &str) -> NodeId {
        let node = self.arena.new_node(DomNode {
            kind: NodeKind::Element {
                tag: tag.to_ascii_lowercase(),
            },
            attrs: SmallVec::new(),
        });
        sibling.insert_after(node, &mut self.arena);
        let parent = self.parent(node).unwrap_or(self.root);
        self.emit(DomUpdate::InsertElement {
            parent,
            node,
            tag: tag.to_ascii_lowercase(),
        });
        node
    }

    /// Attach a shadow root to `host`, or return the existing one.
    pub fn attach_shadow(&mut self, host: NodeId) -> NodeId {
        if let Some(existing) = self.shadow_root_of(host) {
            return existing;
        }
        let node = self.arena.new_node(DomNode {
            kind: NodeKind::ShadowRoot,
            attrs: SmallVec::new(),
        });
        host.append(node, &mut self.arena);
        node
    }

    /// The shadow root attached to `host`, if any.
    pub fn shadow_root_of(&self, host: NodeId) -> Option<NodeId> {
        host.children(&self.arena)
            .find(|child| matches!(self.arena[*child].get().kind, NodeKind::ShadowRoot))
    }

    /// Remove a node and its subtree.
    pub fn remove_node(&mut self, node: NodeId) {
        node.remove_subtree(&mut self.arena);
        self.emit(DomUpdate::RemoveNode { node });
    }

    /// Whether the node is still part of the tree.
    pub fn is_attached(&self, node: NodeId) -> bool {
        !self.arena[node].is_removed()
            && node
                .ancestors(&self.arena)
                .any(|ancestor| ancestor == self.root)
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.arena[node].parent()
    }

    /// The element tag name, if the node is an element.
    pub fn tag(&self, node: NodeId) -> Option<&str> {
        match &self.arena[node].get().kind {
            NodeKind::Element { tag } => Some(tag),
            _ => None,
        }
    }

    pub fn attr(&self, node: NodeId, name: &str) -> Option<&str> {
        self.arena[node]
            .get()
            .attrs
            .iter()
            .find(|(attr, _)| attr == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn set_attr(&mut self, node: NodeId, name: &str, value: &str) {
        let attrs = &mut self.arena[node].get_mut().attrs;
        if let Some(slot) = attrs.iter_mut().find(|(attr, _)| attr == name) {
            if slot.1 == value {
                return;
            }
            slot.1 = value.to_owned();
        } else {
            attrs.push((name.to_owned(), value.to_owned()));
        }
        self.emit(DomUpdate::SetAttr {
            node,
            name: name.to_owned(),
            value: value.to_owned(),
        });
    }

    pub fn remove_attr(&mut self, node: NodeId, name: &str) {
        let attrs = &mut self.arena[node].get_mut().attrs;
        let before = attrs.len();
        attrs.retain(|(attr, _)| attr != name);
        if attrs.len() != before {
            self.emit(DomUpdate::RemoveAttr {
                node,
                name: name.to_owned(),
            });
        }
    }

    /// Concatenated text of all text-node descendants.
    pub fn text_content(&self, node: NodeId) -> String {
        let mut out = String::new();
        for descendant in node.descendants(&self.arena) {
            if let NodeKind::Text { text } = &self.arena[descendant].get().kind {
                out.push_str(text);
            }
        }
        out
    }

    /// Replace all children of `node` with a single text node.
    pub fn set_text_content(&mut self, node: NodeId, text: &str) {
        let children: Vec<NodeId> = node.children(&self.arena).collect();
        for child in children {
            child.remove_subtree(&mut self.arena);
        }
        let child = self.arena.new_node(DomNode {
            kind: NodeKind::Text {
                text: text.to_owned(),
            },
            attrs: SmallVec::new(),
        });
        node.append(child, &mut self.arena);
        self.emit(DomUpdate::InsertText {
            parent: node,
            node: child,
        });
    }

    /// All element descendants of `root` in document (preorder) order,
    /// excluding `root` itself. Does not cross shadow boundaries.
    pub fn elements_in(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.walk(root, false, &mut out);
        out
    }

    fn walk(&self, node: NodeId, enter_shadow: bool, out: &mut Vec<NodeId>) {
        for child in node.children(&self.arena) {
            match &self.arena[child].get().kind {
                NodeKind::Element { .. } => {
                    out.push(child);
                    self.walk(child, enter_shadow, out);
                }
                NodeKind::ShadowRoot if enter_shadow => self.walk(child, enter_shadow, out),
                _ => {}
            }
        }
    }

    /// All shadow roots in the subtree under `root` (document order).
    pub fn shadow_roots_in(&self, root: NodeId) -> Vec<NodeId> {
        let mut hosts = Vec::new();
        let mut elements = Vec::new();
        self.walk(root, true, &mut elements);
        for element in elements {
            if let Some(shadow) = self.shadow_root_of(element) {
                hosts.push(shadow);
            }
        }
        hosts
    }

    /// Elements under `root` matching `list`, in document order.
    pub fn query_all(&self, root: NodeId, list: &SelectorList) -> Vec<NodeId> {
        self.elements_in(root)
            .into_iter()
            .filter(|node| list.matches(self, *node))
            .collect()
    }

    /// Whether `node` matches the selector list.
    pub fn matches(&self, node: NodeId, list: &SelectorList) -> bool {
        list.matches(self, node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dom() -> Dom {
        Dom::new(Url::parse("https://example.com/page/").unwrap())
    }

    #[test]
    fn document_order_traversal() {
        let mut dom = dom();
        let root = dom.root();
        let head = dom.create_element(root, "head");
        let style_a = dom.create_element(head, "style");
        let body = dom.create_element(root, "body");
        let style_b = dom.create_element(body, "style");

        let order = dom.elements_in(root);
        assert_eq!(order, vec![head, style_a, body, style_b]);
    }

    #[test]
    fn text_content_round_trip() {
        let mut dom = dom();
        let root = dom.root();
        let style = dom.create_element(root, "style");
        dom.set_text_content(style, ":root { --x: red; }");
        assert_eq!(dom.text_content(style), ":root { --x: red; }");
        dom.set_text_content(style, "p { color: blue; }");
        assert_eq!(dom.text_content(style), "p { color: blue; }");
    }

    #[test]
    fn updates_are_broadcast() {
        let mut dom = dom();
        let mut updates = dom.updates();
        let root = dom.root();
        let link = dom.create_element(root, "link");
        dom.set_attr(link, "href", "site.css");

        assert!(matches!(
            updates.try_recv().unwrap(),
            DomUpdate::InsertElement { tag, .. } if tag == "link"
        ));
        assert!(matches!(
            updates.try_recv().unwrap(),
            DomUpdate::SetAttr { name, .. } if name == "href"
        ));
    }

    #[test]
    fn set_attr_to_same_value_emits_nothing() {
        let mut dom = dom();
        let root = dom.root();
        let link = dom.create_element(root, "link");
        dom.set_attr(link, "rel", "stylesheet");

        let mut updates = dom.updates();
        dom.set_attr(link, "rel", "stylesheet");
        assert!(updates.try_recv().is_err());
    }

    #[test]
    fn shadow_roots_are_isolated() {
        let mut dom = dom();
        let root = dom.root();
        let host = dom.create_element(root, "div");
        let shadow = dom.attach_shadow(host);
        let inner = dom.create_element(shadow, "style");

        assert!(!dom.elements_in(root).contains(&inner));
        assert_eq!(dom.shadow_roots_in(root), vec![shadow]);
        assert!(dom.elements_in(shadow).contains(&inner));
    }
}
