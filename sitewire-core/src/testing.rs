//! Test support: an in-memory document and scriptable handlers
//!
//! Everything here is ordinary library code so integration tests and host
//! applications can exercise the framework without a real document.
//! [`FakeDom`] implements the [`Dom`] boundary over a simple node tree with
//! a minimal selector grammar (`#id`, `.class`, `tag`, `tag.class`) and
//! target-first event bubbling.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use serde_json::Value;

use crate::command::{Behavior, Command, CommandUnit, Rule};
use crate::context::AppContext;
use crate::controller::{
    CommandSetup, Controller, ControllerDef, InterceptKind, InterceptSetup, ObserverSetup,
    ObserverSource,
};
use crate::dom::{Dom, DomEvent, EventHandler, ListenerHandle, NodeId};
use crate::error::{Error, Result};
use crate::param::ParamDecl;
use crate::request::{ParamsSpec, Request};

/// A fresh application context over a fresh [`FakeDom`].
pub fn test_app() -> (Rc<AppContext>, Rc<FakeDom>) {
    let dom = FakeDom::new();
    let app = AppContext::new(Rc::clone(&dom) as Rc<dyn Dom>);
    (app, dom)
}

struct NodeData {
    tag: String,
    id: Option<String>,
    classes: Vec<String>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

struct Listener {
    handle: ListenerHandle,
    event: String,
    handler: EventHandler,
}

/// In-memory document implementing the [`Dom`] boundary.
pub struct FakeDom {
    nodes: RefCell<HashMap<NodeId, NodeData>>,
    listeners: RefCell<HashMap<NodeId, Vec<Listener>>>,
    next_node: Cell<u64>,
    next_listener: Cell<u64>,
    root: NodeId,
}

impl FakeDom {
    /// An empty document containing only the root node.
    pub fn new() -> Rc<Self> {
        let root = NodeId(0);
        let mut nodes = HashMap::new();
        nodes.insert(
            root,
            NodeData {
                tag: "document".to_string(),
                id: None,
                classes: Vec::new(),
                parent: None,
                children: Vec::new(),
            },
        );
        Rc::new(Self {
            nodes: RefCell::new(nodes),
            listeners: RefCell::new(HashMap::new()),
            next_node: Cell::new(1),
            next_listener: Cell::new(1),
            root,
        })
    }

    /// The document root.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Create an element under `parent` (the root when `None`).
    pub fn element(
        &self,
        tag: &str,
        id: Option<&str>,
        classes: &[&str],
        parent: Option<NodeId>,
    ) -> NodeId {
        let node = NodeId(self.next_node.get());
        self.next_node.set(node.0 + 1);
        let parent = parent.unwrap_or(self.root);

        let mut nodes = self.nodes.borrow_mut();
        nodes.insert(
            node,
            NodeData {
                tag: tag.to_string(),
                id: id.map(str::to_string),
                classes: classes.iter().map(|c| c.to_string()).collect(),
                parent: Some(parent),
                children: Vec::new(),
            },
        );
        if let Some(parent_data) = nodes.get_mut(&parent) {
            parent_data.children.push(node);
        }
        node
    }

    /// Detach `node` (and implicitly its subtree) from the document.
    pub fn detach(&self, node: NodeId) {
        let mut nodes = self.nodes.borrow_mut();
        let parent = nodes.get(&node).and_then(|data| data.parent);
        if let Some(parent) = parent {
            if let Some(parent_data) = nodes.get_mut(&parent) {
                parent_data.children.retain(|child| *child != node);
            }
        }
        if let Some(data) = nodes.get_mut(&node) {
            data.parent = None;
        }
    }

    /// Fire `event` on `target` and bubble it up to the root, invoking
    /// listeners target-first. Each node's listener list is snapshotted
    /// before invocation, so handlers may unbind listeners mid-dispatch.
    pub fn fire(&self, target: NodeId, event: &str) {
        let dom_event = DomEvent::new(event, target);
        let mut chain = Vec::new();
        {
            let nodes = self.nodes.borrow();
            let mut current = Some(target);
            while let Some(node) = current {
                chain.push(node);
                current = nodes.get(&node).and_then(|data| data.parent);
            }
        }
        for node in chain {
            let snapshot: Vec<EventHandler> = self
                .listeners
                .borrow()
                .get(&node)
                .map(|listeners| {
                    listeners
                        .iter()
                        .filter(|l| l.event == event)
                        .map(|l| Rc::clone(&l.handler))
                        .collect()
                })
                .unwrap_or_default();
            for handler in snapshot {
                handler(&dom_event);
            }
        }
    }

    /// Number of listeners bound to `node` for `event`.
    pub fn listener_count(&self, node: NodeId, event: &str) -> usize {
        self.listeners
            .borrow()
            .get(&node)
            .map(|listeners| listeners.iter().filter(|l| l.event == event).count())
            .unwrap_or(0)
    }

    fn matches(&self, data: &NodeData, selector: &str) -> bool {
        if let Some(id) = selector.strip_prefix('#') {
            return data.id.as_deref() == Some(id);
        }
        if let Some(class) = selector.strip_prefix('.') {
            return data.classes.iter().any(|c| c == class);
        }
        match selector.split_once('.') {
            Some((tag, class)) => {
                data.tag == tag && data.classes.iter().any(|c| c == class)
            }
            None => data.tag == selector,
        }
    }

    fn collect(
        &self,
        nodes: &HashMap<NodeId, NodeData>,
        node: NodeId,
        selector: &str,
        out: &mut Vec<NodeId>,
    ) {
        let Some(data) = nodes.get(&node) else {
            return;
        };
        for child in &data.children {
            if let Some(child_data) = nodes.get(child) {
                if self.matches(child_data, selector) {
                    out.push(*child);
                }
            }
            self.collect(nodes, *child, selector, out);
        }
    }
}

impl Dom for FakeDom {
    fn query(&self, selector: &str, root: Option<NodeId>) -> Vec<NodeId> {
        let nodes = self.nodes.borrow();
        let mut out = Vec::new();
        self.collect(&nodes, root.unwrap_or(self.root), selector, &mut out);
        out
    }

    fn on(&self, node: NodeId, event: &str, handler: EventHandler) -> ListenerHandle {
        let handle = ListenerHandle(self.next_listener.get());
        self.next_listener.set(handle.0 + 1);
        self.listeners.borrow_mut().entry(node).or_default().push(Listener {
            handle,
            event: event.to_string(),
            handler,
        });
        handle
    }

    fn off(&self, handle: ListenerHandle) {
        for listeners in self.listeners.borrow_mut().values_mut() {
            listeners.retain(|l| l.handle != handle);
        }
    }

    fn is_detached(&self, node: NodeId) -> bool {
        let nodes = self.nodes.borrow();
        let mut current = node;
        loop {
            if current == self.root {
                return false;
            }
            match nodes.get(&current).and_then(|data| data.parent) {
                Some(parent) => current = parent,
                None => return true,
            }
        }
    }

    fn match_selector(&self, node: NodeId, selector: &str) -> bool {
        self.nodes
            .borrow()
            .get(&node)
            .map(|data| self.matches(data, selector))
            .unwrap_or(false)
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.borrow().get(&node).and_then(|data| data.parent)
    }
}

/// Shared, clonable log of handler invocations.
#[derive(Clone, Default)]
pub struct CallLog(Rc<RefCell<Vec<String>>>);

impl CallLog {
    pub fn push(&self, label: impl Into<String>) {
        self.0.borrow_mut().push(label.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.borrow().clone()
    }
}

/// Behavior appending its label to a [`CallLog`] on execution.
pub struct RecordingBehavior {
    label: String,
    log: CallLog,
}

impl RecordingBehavior {
    pub fn new(label: impl Into<String>, log: &CallLog) -> Self {
        Self {
            label: label.into(),
            log: log.clone(),
        }
    }
}

impl Behavior for RecordingBehavior {
    fn execute(&self, _request: &Request) -> Result<()> {
        self.log.push(self.label.clone());
        Ok(())
    }
}

/// Command recording its request params to a [`CallLog`] as serialized JSON.
pub struct RecordingCommand {
    label: String,
    log: CallLog,
}

impl RecordingCommand {
    pub fn new(label: impl Into<String>, log: &CallLog) -> Self {
        Self {
            label: label.into(),
            log: log.clone(),
        }
    }
}

impl Command for RecordingCommand {
    fn execute(&self, request: &Request) -> Result<()> {
        self.log.push(format!("{}:{}", self.label, request.params()));
        Ok(())
    }

    fn on_response(&self, response: &Value) -> Result<()> {
        self.log.push(format!("{}:response:{response}", self.label));
        Ok(())
    }

    fn on_error(&self, error: &Value) -> Result<()> {
        self.log.push(format!("{}:error:{error}", self.label));
        Ok(())
    }
}

/// Behavior that always fails with a validation error.
pub struct FailingBehavior {
    message: String,
}

impl FailingBehavior {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Behavior for FailingBehavior {
    fn execute(&self, _request: &Request) -> Result<()> {
        Err(Error::Validation(self.message.clone()))
    }
}

/// Rule whose condition follows a shared flag.
pub struct ToggleRule {
    allow: Rc<Cell<bool>>,
}

impl ToggleRule {
    pub fn new(allow: &Rc<Cell<bool>>) -> Self {
        Self {
            allow: Rc::clone(allow),
        }
    }
}

impl Rule for ToggleRule {
    fn condition(&self, _request: &Request) -> Result<bool> {
        Ok(self.allow.get())
    }
}

/// Definition with no params, commands, or observers.
pub struct EmptyController;

impl ControllerDef for EmptyController {
    fn name(&self) -> &str {
        "Empty"
    }

    fn commands(&self, _setup: &mut CommandSetup<'_>) -> Result<()> {
        Ok(())
    }

    fn observers(&self, _setup: &mut ObserverSetup<'_>) -> Result<()> {
        Ok(())
    }
}

type InitFn = Rc<dyn Fn(&Rc<Controller>) -> Result<()>>;

/// Builder-style [`ControllerDef`] for assembling a definition inline in a
/// test instead of declaring a struct per scenario.
pub struct ScriptedController {
    name: String,
    params: Vec<ParamDecl>,
    units: Vec<(String, CommandUnit)>,
    observers: Vec<(ObserverSource, String, String, ParamsSpec)>,
    intercepts: Vec<(InterceptKind, String, String, ParamsSpec)>,
    init: Option<InitFn>,
}

impl ScriptedController {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            units: Vec::new(),
            observers: Vec::new(),
            intercepts: Vec::new(),
            init: None,
        }
    }

    pub fn param(mut self, decl: ParamDecl) -> Self {
        self.params.push(decl);
        self
    }

    pub fn command(mut self, name: impl Into<String>, command: impl Command + 'static) -> Self {
        self.units
            .push((name.into(), CommandUnit::Command(Rc::new(command))));
        self
    }

    pub fn behavior(mut self, name: impl Into<String>, behavior: impl Behavior + 'static) -> Self {
        self.units
            .push((name.into(), CommandUnit::Behavior(Rc::new(behavior))));
        self
    }

    pub fn rule(mut self, name: impl Into<String>, rule: impl Rule + 'static) -> Self {
        self.units
            .push((name.into(), CommandUnit::Rule(Rc::new(rule))));
        self
    }

    pub fn observe(
        mut self,
        source: impl Into<ObserverSource>,
        event: &str,
        command: &str,
        params: ParamsSpec,
    ) -> Self {
        self.observers.push((
            source.into(),
            event.to_string(),
            command.to_string(),
            params,
        ));
        self
    }

    pub fn intercept(
        mut self,
        kind: InterceptKind,
        intercepted: &str,
        injected: &str,
        params: ParamsSpec,
    ) -> Self {
        self.intercepts.push((
            kind,
            intercepted.to_string(),
            injected.to_string(),
            params,
        ));
        self
    }

    pub fn on_init(mut self, init: impl Fn(&Rc<Controller>) -> Result<()> + 'static) -> Self {
        self.init = Some(Rc::new(init));
        self
    }
}

impl ControllerDef for ScriptedController {
    fn name(&self) -> &str {
        &self.name
    }

    fn params(&self) -> Vec<ParamDecl> {
        self.params.clone()
    }

    fn commands(&self, setup: &mut CommandSetup<'_>) -> Result<()> {
        for (name, unit) in &self.units {
            setup.add_unit(name, unit.clone())?;
        }
        Ok(())
    }

    fn observers(&self, setup: &mut ObserverSetup<'_>) -> Result<()> {
        for (source, event, command, params) in &self.observers {
            setup.add_observer(source.clone(), event, command, params.clone())?;
        }
        Ok(())
    }

    fn intercepts(&self, setup: &mut InterceptSetup<'_>) -> Result<()> {
        for (kind, intercepted, injected, params) in &self.intercepts {
            setup.add_intercept(*kind, intercepted, injected, params.clone())?;
        }
        Ok(())
    }

    fn on_init(&self, controller: &Rc<Controller>) -> Result<()> {
        match &self.init {
            Some(init) => init(controller),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_grammar() {
        let dom = FakeDom::new();
        let panel = dom.element("div", Some("panel"), &[], None);
        let row = dom.element("li", None, &["row"], Some(panel));
        let other = dom.element("li", None, &[], Some(panel));

        assert_eq!(dom.query("#panel", None), vec![panel]);
        assert_eq!(dom.query(".row", None), vec![row]);
        assert_eq!(dom.query("li", None), vec![row, other]);
        assert_eq!(dom.query("li.row", None), vec![row]);
        assert_eq!(dom.query(".row", Some(panel)), vec![row]);
        assert!(dom.query(".row", Some(other)).is_empty());
    }

    #[test]
    fn test_events_bubble_target_first() {
        let dom = FakeDom::new();
        let panel = dom.element("div", None, &[], None);
        let row = dom.element("li", None, &[], Some(panel));
        let order = Rc::new(RefCell::new(Vec::new()));

        for (node, label) in [(panel, "panel"), (row, "row")] {
            let order = Rc::clone(&order);
            dom.on(
                node,
                "click",
                Rc::new(move |event: &DomEvent| {
                    order.borrow_mut().push((label, event.target));
                }),
            );
        }

        dom.fire(row, "click");
        assert_eq!(*order.borrow(), vec![("row", row), ("panel", row)]);
    }

    #[test]
    fn test_detachment() {
        let dom = FakeDom::new();
        let panel = dom.element("div", None, &[], None);
        let row = dom.element("li", None, &[], Some(panel));
        assert!(!dom.is_detached(row));

        dom.detach(panel);
        assert!(dom.is_detached(panel));
        assert!(dom.is_detached(row));
        assert!(dom.query("li", None).is_empty());
    }

    #[test]
    fn test_off_unbinds_one_listener() {
        let dom = FakeDom::new();
        let node = dom.element("button", None, &[], None);
        let handle = dom.on(node, "click", Rc::new(|_| {}));
        dom.on(node, "click", Rc::new(|_| {}));

        assert_eq!(dom.listener_count(node, "click"), 2);
        dom.off(handle);
        assert_eq!(dom.listener_count(node, "click"), 1);
    }

    #[test]
    fn test_match_up_walks_to_root() {
        let dom = FakeDom::new();
        let panel = dom.element("div", None, &["panel"], None);
        let row = dom.element("li", None, &["row"], Some(panel));
        let inner = dom.element("span", None, &[], Some(row));

        assert_eq!(dom.match_up(inner, ".row", panel), Some(row));
        assert_eq!(dom.match_up(inner, ".panel", panel), Some(panel));
        assert_eq!(dom.match_up(inner, ".missing", panel), None);
        // root is inclusive but the walk never goes past it
        assert_eq!(dom.match_up(inner, "document", panel), None);
    }
}
