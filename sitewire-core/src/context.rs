//! Shared application context
//!
//! One [`AppContext`] per embedded framework instance, threaded explicitly
//! into every collaborator. There is no global state: two contexts in one
//! process are fully isolated — separate buses, model stores, and command
//! registries.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::config::RunMode;
use crate::controller::Controller;
use crate::dom::Dom;
use crate::messaging::Messaging;
use crate::model::ModelStore;
use crate::registry::CommandRegistry;

/// The dependency bundle shared by controllers, maps, and handlers.
///
/// Also the ownership anchor for live controller instances: observer
/// wiring captures only weak references, so the context keeps each
/// instance alive from construction until teardown, regardless of what
/// the creator does with its handle.
pub struct AppContext {
    dom: Rc<dyn Dom>,
    bus: Rc<Messaging>,
    model: Rc<ModelStore>,
    commands: CommandRegistry,
    mode: Cell<RunMode>,
    controllers: RefCell<Vec<Rc<Controller>>>,
}

impl AppContext {
    /// Create a context over the given document boundary, with a fresh bus,
    /// model store, and command registry.
    pub fn new(dom: Rc<dyn Dom>) -> Rc<Self> {
        let bus = Messaging::new();
        let model = ModelStore::new(Rc::clone(&bus));
        Rc::new(Self {
            dom,
            bus,
            model,
            commands: CommandRegistry::default(),
            mode: Cell::new(RunMode::default()),
            controllers: RefCell::new(Vec::new()),
        })
    }

    /// Number of live controller instances anchored by this context.
    pub fn live_controllers(&self) -> usize {
        self.controllers.borrow().len()
    }

    pub(crate) fn anchor_controller(&self, controller: Rc<Controller>) {
        self.controllers.borrow_mut().push(controller);
    }

    pub(crate) fn evict_controller(&self, controller: &Controller) {
        self.controllers
            .borrow_mut()
            .retain(|live| !std::ptr::eq(Rc::as_ptr(live), controller));
    }

    /// The document boundary.
    pub fn dom(&self) -> &Rc<dyn Dom> {
        &self.dom
    }

    /// The messaging bus.
    pub fn bus(&self) -> &Rc<Messaging> {
        &self.bus
    }

    /// The application model store.
    pub fn model(&self) -> &Rc<ModelStore> {
        &self.model
    }

    /// The command factory registry.
    pub fn commands(&self) -> &CommandRegistry {
        &self.commands
    }

    /// Current run mode.
    pub fn mode(&self) -> RunMode {
        self.mode.get()
    }

    /// Switch run mode for this context and its model store.
    pub fn set_mode(&self, mode: RunMode) {
        self.mode.set(mode);
        self.model.set_mode(mode);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeDom;
    use serde_json::json;

    #[test]
    fn test_two_contexts_are_isolated() {
        let first = AppContext::new(FakeDom::new());
        let second = AppContext::new(FakeDom::new());

        first.model().set("k", json!(1)).unwrap();
        assert_eq!(second.model().get("k").unwrap(), serde_json::Value::Null);
        assert!(!Rc::ptr_eq(first.bus(), second.bus()));
    }

    #[test]
    fn test_mode_cascades_to_model() {
        let app = AppContext::new(FakeDom::new());
        assert_eq!(app.mode(), RunMode::Production);
        app.set_mode(RunMode::Debug);
        assert_eq!(app.mode(), RunMode::Debug);
    }
}
