//! Controllers: observer binding and command dispatch
//!
//! A [`Controller`] instance ties a definition ([`ControllerDef`]) to an
//! optional context element. During construction it registers its command
//! chains, binds its observers (DOM events, bus topics, model keys), applies
//! interception, and subscribes to the rebind broadcast channels so later
//! document mutations can trigger an idempotent re-binding pass.
//!
//! # Example
//!
//! ```ignore
//! struct Greeter;
//!
//! impl ControllerDef for Greeter {
//!     fn name(&self) -> &str {
//!         "Greeter"
//!     }
//!
//!     fn commands(&self, setup: &mut CommandSetup<'_>) -> Result<()> {
//!         setup.add_unit("Greet", CommandUnit::Behavior(Rc::new(GreetBehavior)))
//!     }
//!
//!     fn observers(&self, setup: &mut ObserverSetup<'_>) -> Result<()> {
//!         setup.add_observer(".greet-button", "click", "Greet", ParamsSpec::None)
//!     }
//! }
//!
//! let controller = Controller::create(Rc::new(Greeter), app, Some(panel), None)?;
//! ```

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

use serde_json::Value;
use tracing::{debug, error};

use crate::command::CommandUnit;
use crate::context::AppContext;
use crate::dom::{DomEvent, EventHandler, ListenerHandle, NodeId};
use crate::error::{require_name, Error, Result};
use crate::messaging::{Messaging, SubscriberFn, SubscriptionHandle};
use crate::model::model_topic;
use crate::param::{ParamDecl, ParamMap};
use crate::request::{Caller, Invocation, ParamsSpec, Request};

/// Broadcast topic asking every live controller to re-run observer binding.
pub const REBIND_ALL_TOPIC: &str = "/controller/observers";

/// Rebind topic scoped to controllers of one name.
pub fn rebind_topic(controller: &str) -> String {
    format!("/controller/{controller}/observers")
}

// Event-name prefixes eligible for delegation through the context element.
const DELEGATABLE_PREFIXES: [&str; 4] = ["click", "mouse", "key", "move"];

fn is_delegatable(event: &str) -> bool {
    DELEGATABLE_PREFIXES
        .iter()
        .any(|prefix| event.starts_with(prefix))
}

/// A controller definition: the static description a [`Controller`] instance
/// is built from. Definitions are stateless; all instance state lives on the
/// controller.
pub trait ControllerDef {
    /// Unique controller name, used in site maps and rebind topics.
    fn name(&self) -> &str;

    /// Parameter declarations instantiated per controller instance.
    fn params(&self) -> Vec<ParamDecl> {
        Vec::new()
    }

    /// Register command chains.
    fn commands(&self, setup: &mut CommandSetup<'_>) -> Result<()>;

    /// Bind observers. Re-run on every rebind pass, so bindings must be
    /// written idempotently (the de-duplication tags make repeated identical
    /// registrations no-ops).
    fn observers(&self, setup: &mut ObserverSetup<'_>) -> Result<()>;

    /// Apply interception to registered chains.
    fn intercepts(&self, _setup: &mut InterceptSetup<'_>) -> Result<()> {
        Ok(())
    }

    /// One-time hook after commands, observers and intercepts are in place.
    fn on_init(&self, _controller: &Rc<Controller>) -> Result<()> {
        Ok(())
    }
}

/// Where an observer listens.
#[derive(Debug, Clone)]
pub enum ObserverSource {
    /// Nodes matching a selector (delegated through the context element for
    /// delegatable events).
    Selector(String),
    /// One specific node.
    Node(NodeId),
    /// A messaging topic.
    Topic(String),
    /// A model key's change notifications.
    Model(String),
}

impl ObserverSource {
    /// Observe a bus topic.
    pub fn topic(topic: impl Into<String>) -> Self {
        ObserverSource::Topic(topic.into())
    }

    /// Observe a model key.
    pub fn model(key: impl Into<String>) -> Self {
        ObserverSource::Model(key.into())
    }
}

impl From<&str> for ObserverSource {
    fn from(selector: &str) -> Self {
        ObserverSource::Selector(selector.to_string())
    }
}

impl From<String> for ObserverSource {
    fn from(selector: String) -> Self {
        ObserverSource::Selector(selector)
    }
}

impl From<NodeId> for ObserverSource {
    fn from(node: NodeId) -> Self {
        ObserverSource::Node(node)
    }
}

/// Interception placement relative to the intercepted unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterceptKind {
    /// Injected chain runs first, then the intercepted unit.
    Before,
    /// Intercepted unit runs first, then the injected chain.
    After,
    /// Injected chain runs with an [`Invocation`] continuation and decides
    /// whether (and when) the intercepted unit proceeds.
    Around,
}

#[derive(Clone)]
struct Intercept {
    kind: InterceptKind,
    command: String,
    params: ParamsSpec,
}

#[derive(Clone, Default)]
struct Chain {
    entries: Vec<CommandUnit>,
    intercepts: Vec<Intercept>,
}

#[derive(Clone)]
struct Binding {
    command: String,
    params: ParamsSpec,
    delegate: Option<String>,
}

enum BusSource {
    Topic(String),
    Model(String),
}

/// One live controller instance.
pub struct Controller {
    def: Rc<dyn ControllerDef>,
    app: Rc<AppContext>,
    context: Option<NodeId>,
    params: ParamMap,
    chains: RefCell<HashMap<String, Chain>>,
    listeners: RefCell<Vec<ListenerHandle>>,
    topic_subs: RefCell<Vec<SubscriptionHandle>>,
    rebind_subs: RefCell<Vec<SubscriptionHandle>>,
    // De-duplication tags survive teardown so a rebind pass after removal
    // does not resurrect observers.
    tags: RefCell<HashSet<String>>,
    query_cache: RefCell<HashMap<String, Vec<NodeId>>>,
    torn_down: Cell<bool>,
}

impl Controller {
    /// Instantiate a controller: apply params, register commands, bind
    /// observers, apply intercepts, run the init hook, replay non-null param
    /// values to their change callbacks, and subscribe the rebind channels.
    pub fn create(
        def: Rc<dyn ControllerDef>,
        app: Rc<AppContext>,
        context: Option<NodeId>,
        params: Option<&Value>,
    ) -> Result<Rc<Self>> {
        require_name(def.name(), "controller name")?;

        let param_map = ParamMap::from_decls(&def.params());
        if let Some(values) = params {
            param_map.apply(values)?;
        }

        let controller = Rc::new(Self {
            def: Rc::clone(&def),
            app,
            context,
            params: param_map,
            chains: RefCell::new(HashMap::new()),
            listeners: RefCell::new(Vec::new()),
            topic_subs: RefCell::new(Vec::new()),
            rebind_subs: RefCell::new(Vec::new()),
            tags: RefCell::new(HashSet::new()),
            query_cache: RefCell::new(HashMap::new()),
            torn_down: Cell::new(false),
        });

        {
            let mut setup = CommandSetup {
                controller: &controller,
            };
            def.commands(&mut setup)?;
        }
        controller.bind_observers()?;
        {
            let mut setup = InterceptSetup {
                controller: &controller,
            };
            def.intercepts(&mut setup)?;
        }
        def.on_init(&controller)?;

        // Values assigned before on_init had nobody listening; replay them
        // now that the definition has had a chance to attach callbacks.
        for param in controller.params.iter() {
            let value = param.value();
            if !value.is_null() {
                param.fire_change(&value);
            }
        }

        controller.subscribe_rebind_channels()?;

        // All wiring captures weak references, so the context must anchor
        // the instance: it stays live until teardown evicts it, even after
        // the creator drops this handle.
        controller.app.anchor_controller(Rc::clone(&controller));

        debug!(controller = %def.name(), context = ?context, "controller created");
        Ok(controller)
    }

    /// The definition's name.
    pub fn name(&self) -> &str {
        self.def.name()
    }

    /// The context element this instance is scoped to.
    pub fn context(&self) -> Option<NodeId> {
        self.context
    }

    /// The shared application context.
    pub fn app(&self) -> &Rc<AppContext> {
        &self.app
    }

    /// The instance's live parameters.
    pub fn params(&self) -> &ParamMap {
        &self.params
    }

    /// Current value of a declared parameter.
    pub fn get_value(&self, name: &str) -> Result<Value> {
        match self.params.get(name) {
            Some(param) => Ok(param.value()),
            None => Err(Error::invalid_argument(format!(
                "controller '{}' declares no param '{name}'",
                self.name()
            ))),
        }
    }

    /// Assign a declared parameter, firing its change callback on change.
    pub fn set_value(&self, name: &str, value: Value) -> Result<bool> {
        match self.params.get(name) {
            Some(param) => param.set_value(Some(value)),
            None => Err(Error::invalid_argument(format!(
                "controller '{}' declares no param '{name}'",
                self.name()
            ))),
        }
    }

    /// Whether a command chain is registered under `name`.
    pub fn has_command(&self, name: &str) -> bool {
        self.chains.borrow().contains_key(name)
    }

    /// First unit of the chain registered under `name`.
    pub fn get_command(&self, name: &str) -> Result<CommandUnit> {
        let chains = self.chains.borrow();
        chains
            .get(name)
            .and_then(|chain| chain.entries.first().cloned())
            .ok_or_else(|| Error::UnknownCommand(name.to_string()))
    }

    /// Every unit of the chain registered under `name`, in execution order.
    pub fn get_command_chain(&self, name: &str) -> Result<Vec<CommandUnit>> {
        let chains = self.chains.borrow();
        chains
            .get(name)
            .map(|chain| chain.entries.clone())
            .ok_or_else(|| Error::UnknownCommand(name.to_string()))
    }

    /// Apply interception to the chain registered under `intercepted`: fire
    /// the `injected` chain before, after, or around its first unit.
    ///
    /// All validation happens before any mutation, so a rejected call leaves
    /// the chains untouched.
    pub fn add_intercept(
        &self,
        kind: InterceptKind,
        intercepted: &str,
        injected: &str,
        params: ParamsSpec,
    ) -> Result<()> {
        require_name(intercepted, "command name")?;
        require_name(injected, "command name")?;
        if intercepted == injected {
            return Err(Error::invalid_argument(format!(
                "command '{intercepted}' cannot intercept itself"
            )));
        }
        let mut chains = self.chains.borrow_mut();
        if !chains.contains_key(injected) {
            return Err(Error::UnknownCommand(injected.to_string()));
        }
        let Some(chain) = chains.get_mut(intercepted) else {
            return Err(Error::UnknownCommand(intercepted.to_string()));
        };
        chain.intercepts.push(Intercept {
            kind,
            command: injected.to_string(),
            params,
        });
        Ok(())
    }

    /// Run the observer-binding pass.
    ///
    /// Safe to call repeatedly: selector queries are memoized within a single
    /// pass, and the de-duplication tags turn already-seen bindings into
    /// no-ops, so only observers for newly appeared nodes are added.
    pub fn bind_observers(self: &Rc<Self>) -> Result<()> {
        self.query_cache.borrow_mut().clear();
        let def = Rc::clone(&self.def);
        let mut setup = ObserverSetup { controller: self };
        let outcome = def.observers(&mut setup);
        self.query_cache.borrow_mut().clear();
        outcome
    }

    /// Tear down this instance: DOM listeners and topic subscriptions are
    /// unbound and the context releases its ownership anchor.
    ///
    /// The rebind-channel subscriptions stay alive, and the de-duplication
    /// tags are kept, so a later broadcast neither fails nor resurrects the
    /// removed observers.
    pub fn remove_observers(&self) {
        for handle in self.listeners.borrow_mut().drain(..) {
            self.app.dom().off(handle);
        }
        for sub in self.topic_subs.borrow_mut().drain(..) {
            self.app.bus().unsubscribe(&sub);
        }
        self.torn_down.set(true);
        self.app.evict_controller(self);
        debug!(controller = %self.name(), "observers removed");
    }

    /// Ask controllers to re-run observer binding: all of them, or only those
    /// named `controller`.
    pub fn update_observers(bus: &Messaging, controller: Option<&str>) -> Result<()> {
        match controller {
            Some(name) => bus.publish(&rebind_topic(name), None),
            None => bus.publish(REBIND_ALL_TOPIC, None),
        }
    }

    /// Dispatch `request` through the chain registered under `name`: the
    /// first unit runs through the chain's interception stack, the remaining
    /// units run directly, in registration order.
    pub fn fire_command_chain(self: &Rc<Self>, name: &str, request: &Request) -> Result<()> {
        let chain = self
            .chains
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownCommand(name.to_string()))?;

        let mode = self.app.mode();
        for (index, unit) in chain.entries.iter().enumerate() {
            if index == 0 && !chain.intercepts.is_empty() {
                self.run_intercepted(&chain.intercepts, unit, request)?;
            } else {
                unit.run(request, mode)?;
            }
        }
        Ok(())
    }

    // Compose the interception stack around `unit`. Registration order folds
    // inside-out, so the most recently added intercept observes (and for
    // `Around`, gates) everything added before it.
    fn run_intercepted(
        self: &Rc<Self>,
        intercepts: &[Intercept],
        unit: &CommandUnit,
        request: &Request,
    ) -> Result<()> {
        type DispatchFn = Rc<dyn Fn(&Request) -> Result<()>>;

        let mode = self.app.mode();
        let base = unit.clone();
        let mut composed: DispatchFn = Rc::new(move |req: &Request| base.run(req, mode));

        for intercept in intercepts {
            let previous = Rc::clone(&composed);
            let controller = Rc::clone(self);
            let intercept = intercept.clone();
            composed = match intercept.kind {
                InterceptKind::Before => Rc::new(move |req: &Request| {
                    controller.fire_injected(&intercept, req, None)?;
                    previous(req)
                }),
                InterceptKind::After => Rc::new(move |req: &Request| {
                    previous(req)?;
                    controller.fire_injected(&intercept, req, None)
                }),
                InterceptKind::Around => Rc::new(move |req: &Request| {
                    let inner = Rc::clone(&previous);
                    let original = req.clone();
                    let invocation = Invocation::new(move || inner(&original));
                    controller.fire_injected(&intercept, req, Some(invocation))
                }),
            };
        }
        composed(request)
    }

    // Fire the injected chain with a fresh request that inherits the original
    // caller and event but carries the intercept's own params.
    fn fire_injected(
        self: &Rc<Self>,
        intercept: &Intercept,
        original: &Request,
        invocation: Option<Invocation>,
    ) -> Result<()> {
        let request = Request::new(
            &intercept.params,
            original.caller().clone(),
            original.event().cloned(),
            &intercept.command,
            Rc::clone(self),
            invocation,
        )?;
        self.fire_command_chain(&intercept.command, &request)
    }

    fn subscribe_rebind_channels(self: &Rc<Self>) -> Result<()> {
        let scoped = rebind_topic(self.name());
        for topic in [REBIND_ALL_TOPIC.to_string(), scoped] {
            let weak = Rc::downgrade(self);
            let callback: SubscriberFn = Rc::new(move |_payload| {
                if let Some(controller) = weak.upgrade() {
                    if let Err(err) = controller.bind_observers() {
                        error!(
                            controller = %controller.name(),
                            error = %err,
                            "observer rebind failed"
                        );
                    }
                }
            });
            let handle = self.app.bus().subscribe(&topic, callback)?;
            self.rebind_subs.borrow_mut().push(handle);
        }
        Ok(())
    }

    fn query_cached(&self, selector: &str) -> Vec<NodeId> {
        if let Some(hit) = self.query_cache.borrow().get(selector) {
            return hit.clone();
        }
        let nodes = self.app.dom().query(selector, self.context);
        self.query_cache
            .borrow_mut()
            .insert(selector.to_string(), nodes.clone());
        nodes
    }

    fn bind_node(
        self: &Rc<Self>,
        node: NodeId,
        event: &str,
        binding: Binding,
    ) -> Result<()> {
        let tag = format!(
            "node:{}|{}|{}|{}|{}",
            node.0,
            event,
            binding.delegate.as_deref().unwrap_or(""),
            binding.command,
            binding.params.signature()
        );
        if !self.tags.borrow_mut().insert(tag) {
            return Ok(());
        }

        let weak = Rc::downgrade(self);
        let handler: EventHandler = Rc::new(move |event: &DomEvent| {
            if let Some(controller) = weak.upgrade() {
                controller.handle_dom_event(node, event, &binding);
            }
        });
        let handle = self.app.dom().on(node, event, handler);
        self.listeners.borrow_mut().push(handle);
        Ok(())
    }

    fn bind_bus(
        self: &Rc<Self>,
        source: BusSource,
        event: &str,
        command: &str,
        params: ParamsSpec,
    ) -> Result<()> {
        let (topic, tag_scope) = match &source {
            BusSource::Topic(topic) => (topic.clone(), format!("topic:{topic}")),
            BusSource::Model(key) => (model_topic(key), format!("model:{key}")),
        };
        let tag = format!(
            "{tag_scope}|{event}|{command}|{}",
            params.signature()
        );
        if !self.tags.borrow_mut().insert(tag) {
            return Ok(());
        }

        let weak = Rc::downgrade(self);
        let binding = Binding {
            command: command.to_string(),
            params,
            delegate: None,
        };
        let callback: SubscriberFn = Rc::new(move |_payload| {
            if let Some(controller) = weak.upgrade() {
                controller.handle_bus_event(&source, &binding);
            }
        });
        let handle = self.app.bus().subscribe(&topic, callback)?;
        self.topic_subs.borrow_mut().push(handle);
        Ok(())
    }

    fn handle_dom_event(self: &Rc<Self>, bound: NodeId, event: &DomEvent, binding: &Binding) {
        if self.torn_down.get() {
            return;
        }
        if self.teardown_if_detached() {
            return;
        }

        let caller = match &binding.delegate {
            Some(selector) => {
                let Some(context) = self.context else {
                    return;
                };
                match self.app.dom().match_up(event.target, selector, context) {
                    Some(node) => node,
                    None => return,
                }
            }
            None => bound,
        };

        self.dispatch_observed(
            Caller::Node(caller),
            Some(event.clone()),
            &binding.command,
            &binding.params,
        );
    }

    fn handle_bus_event(self: &Rc<Self>, source: &BusSource, binding: &Binding) {
        if self.torn_down.get() {
            return;
        }
        if self.teardown_if_detached() {
            return;
        }

        let caller = match source {
            BusSource::Topic(topic) => match self.app.bus().get_topic(topic) {
                Ok(topic) => Caller::Topic(topic),
                Err(err) => {
                    error!(controller = %self.name(), error = %err, "topic lookup failed");
                    return;
                }
            },
            BusSource::Model(key) => match self.app.model().reference(key) {
                Ok(reference) => Caller::Model(reference),
                Err(err) => {
                    error!(controller = %self.name(), error = %err, "model lookup failed");
                    return;
                }
            },
        };

        self.dispatch_observed(caller, None, &binding.command, &binding.params);
    }

    // Observer callbacks have no Result path back to the publisher, so a
    // dispatch failure surfaces through the log at this boundary.
    fn dispatch_observed(
        self: &Rc<Self>,
        caller: Caller,
        event: Option<DomEvent>,
        command: &str,
        params: &ParamsSpec,
    ) {
        let request = match Request::new(params, caller, event, command, Rc::clone(self), None) {
            Ok(request) => request,
            Err(err) => {
                error!(
                    controller = %self.name(),
                    command,
                    error = %err,
                    "request construction failed"
                );
                return;
            }
        };
        if let Err(err) = self.fire_command_chain(command, &request) {
            error!(
                controller = %self.name(),
                command,
                error = %err,
                "command chain failed"
            );
        }
    }

    // Lazy removal detection: a context element found detached at event time
    // tears the instance down instead of dispatching.
    fn teardown_if_detached(&self) -> bool {
        if let Some(context) = self.context {
            if self.app.dom().is_detached(context) {
                self.remove_observers();
                return true;
            }
        }
        false
    }
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("name", &self.name())
            .field("context", &self.context)
            .field("commands", &self.chains.borrow().len())
            .finish()
    }
}

/// Registration surface passed to [`ControllerDef::commands`].
pub struct CommandSetup<'a> {
    controller: &'a Rc<Controller>,
}

impl CommandSetup<'_> {
    /// Append a unit to the chain registered under `name` (the chain is
    /// created on first registration).
    pub fn add_unit(&mut self, name: &str, unit: CommandUnit) -> Result<()> {
        require_name(name, "command name")?;
        self.controller
            .chains
            .borrow_mut()
            .entry(name.to_string())
            .or_default()
            .entries
            .push(unit);
        Ok(())
    }

    /// Append a unit resolved from the application command registry.
    pub fn add_command(&mut self, name: &str, factory_id: &str) -> Result<()> {
        let unit = self.controller.app.commands().create(factory_id)?;
        self.add_unit(name, unit)
    }
}

/// Registration surface passed to [`ControllerDef::observers`].
pub struct ObserverSetup<'a> {
    controller: &'a Rc<Controller>,
}

impl ObserverSetup<'_> {
    /// Observe `source` for `event`, firing the chain registered under
    /// `command` with `params`.
    ///
    /// The command must already be registered; binding an unknown command
    /// fails here, at registration, not at fire time. Selector sources use
    /// event delegation through the context element for delegatable events
    /// (`click*`, `mouse*`, `key*`, `move*`); otherwise each matching node is
    /// bound directly. Bus and model sources ignore delegation; their `event`
    /// only distinguishes bindings in the de-duplication tag.
    pub fn add_observer(
        &mut self,
        source: impl Into<ObserverSource>,
        event: &str,
        command: &str,
        params: ParamsSpec,
    ) -> Result<()> {
        require_name(event, "event name")?;
        require_name(command, "command name")?;
        if !self.controller.has_command(command) {
            return Err(Error::UnknownCommand(command.to_string()));
        }

        match source.into() {
            ObserverSource::Selector(selector) => {
                require_name(&selector, "selector")?;
                if let (true, Some(context)) = (is_delegatable(event), self.controller.context) {
                    self.controller.bind_node(
                        context,
                        event,
                        Binding {
                            command: command.to_string(),
                            params,
                            delegate: Some(selector),
                        },
                    )
                } else {
                    for node in self.controller.query_cached(&selector) {
                        self.controller.bind_node(
                            node,
                            event,
                            Binding {
                                command: command.to_string(),
                                params: params.clone(),
                                delegate: None,
                            },
                        )?;
                    }
                    Ok(())
                }
            }
            ObserverSource::Node(node) => self.controller.bind_node(
                node,
                event,
                Binding {
                    command: command.to_string(),
                    params,
                    delegate: None,
                },
            ),
            ObserverSource::Topic(topic) => {
                require_name(&topic, "topic")?;
                self.controller
                    .bind_bus(BusSource::Topic(topic), event, command, params)
            }
            ObserverSource::Model(key) => {
                require_name(&key, "key")?;
                self.controller
                    .bind_bus(BusSource::Model(key), event, command, params)
            }
        }
    }
}

/// Registration surface passed to [`ControllerDef::intercepts`].
pub struct InterceptSetup<'a> {
    controller: &'a Rc<Controller>,
}

impl InterceptSetup<'_> {
    /// See [`Controller::add_intercept`].
    pub fn add_intercept(
        &mut self,
        kind: InterceptKind,
        intercepted: &str,
        injected: &str,
        params: ParamsSpec,
    ) -> Result<()> {
        self.controller
            .add_intercept(kind, intercepted, injected, params)
    }
}
