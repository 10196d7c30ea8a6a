//! DOM/event substrate boundary
//!
//! The framework never touches a real document directly; it consumes this
//! trait. A host embedding the framework supplies an implementation backed by
//! its platform document, and [`testing::FakeDom`](crate::testing::FakeDom)
//! provides an in-memory one for tests.
//!
//! Selector semantics are intentionally minimal at this boundary: the
//! framework only ever passes opaque selector strings through. An
//! implementation is free to collapse `#id`-only selectors to a direct ID
//! lookup as a fast path.

use std::rc::Rc;

use serde_json::Value;

/// Opaque handle for a document node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u64);

/// Handle for a bound event listener, used to unbind it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle(pub u64);

/// An event delivered from the document.
#[derive(Debug, Clone)]
pub struct DomEvent {
    /// Event name, e.g. `"click"`.
    pub name: String,
    /// The node the event originated on (not the node the listener is bound
    /// to — delegation relies on the difference).
    pub target: NodeId,
    /// Platform-specific payload (coordinates, key, ...).
    pub detail: Value,
}

impl DomEvent {
    /// Create an event with an empty detail payload.
    pub fn new(name: impl Into<String>, target: NodeId) -> Self {
        Self {
            name: name.into(),
            target,
            detail: Value::Null,
        }
    }
}

/// Callback invoked when a bound event fires.
pub type EventHandler = Rc<dyn Fn(&DomEvent)>;

/// The document boundary the framework dispatches against.
pub trait Dom {
    /// Query nodes matching `selector` beneath `root` (whole document when
    /// `root` is `None`), in document order.
    fn query(&self, selector: &str, root: Option<NodeId>) -> Vec<NodeId>;

    /// First match of [`Dom::query`], if any.
    fn query_first(&self, selector: &str, root: Option<NodeId>) -> Option<NodeId> {
        self.query(selector, root).into_iter().next()
    }

    /// Bind `handler` to `event` on `node`.
    fn on(&self, node: NodeId, event: &str, handler: EventHandler) -> ListenerHandle;

    /// Unbind a previously bound listener.
    fn off(&self, handle: ListenerHandle);

    /// Whether `node` is no longer attached to the document. Controllers use
    /// this lazily at event time to detect removal and tear themselves down.
    fn is_detached(&self, node: NodeId) -> bool;

    /// Whether `node` itself matches `selector`.
    fn match_selector(&self, node: NodeId, selector: &str) -> bool;

    /// Parent of `node`, if any.
    fn parent(&self, node: NodeId) -> Option<NodeId>;

    /// Walk from `target` up through its parents (stopping at `root`,
    /// inclusive) and return the first node matching `selector`.
    ///
    /// This is the delegation primitive: a delegated listener bound on a
    /// controller's context element uses it to decide whether the actual
    /// event target falls under the observed selector.
    fn match_up(&self, target: NodeId, selector: &str, root: NodeId) -> Option<NodeId> {
        let mut current = Some(target);
        while let Some(node) = current {
            if self.match_selector(node, selector) {
                return Some(node);
            }
            if node == root {
                return None;
            }
            current = self.parent(node);
        }
        None
    }
}
