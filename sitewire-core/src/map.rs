//! Declarative site map and controller mapping
//!
//! A [`SiteMap`] pairs patterns with controller names: CSS patterns attach a
//! controller instance to each matching element, route patterns attach a
//! page-level instance when a navigation path matches. [`ControllerMap`]
//! owns the definition registry, validates the site map eagerly, and keeps
//! mapping idempotent through its instance caches.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error};

use crate::context::AppContext;
use crate::controller::{Controller, ControllerDef};
use crate::dom::NodeId;
use crate::error::{require_name, Error, Result};
use crate::messaging::Messaging;

/// Broadcast topic asking the controller map to re-run document mapping.
pub const REMAP_TOPIC: &str = "/controller/map";

/// How a site-map pattern is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternKind {
    /// CSS selector matched against document elements.
    #[default]
    Css,
    /// Regular expression matched against a navigation route.
    Route,
}

/// One controller attachment within a site-map entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ControllerBinding {
    /// Registered controller name.
    pub controller: String,
    /// Instance params applied at mapping time.
    #[serde(default)]
    pub params: Option<Value>,
}

/// One pattern with its controller attachments.
#[derive(Debug, Clone, Deserialize)]
pub struct SiteMapEntry {
    pub pattern: String,
    #[serde(default)]
    pub kind: PatternKind,
    pub controllers: Vec<ControllerBinding>,
}

impl SiteMapEntry {
    /// Entry matching elements by CSS selector.
    pub fn css(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            kind: PatternKind::Css,
            controllers: Vec::new(),
        }
    }

    /// Entry matching navigation routes by regex.
    pub fn route(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            kind: PatternKind::Route,
            controllers: Vec::new(),
        }
    }

    /// Attach a controller without params.
    pub fn controller(mut self, name: impl Into<String>) -> Self {
        self.controllers.push(ControllerBinding {
            controller: name.into(),
            params: None,
        });
        self
    }

    /// Attach a controller with instance params.
    pub fn controller_with(mut self, name: impl Into<String>, params: Value) -> Self {
        self.controllers.push(ControllerBinding {
            controller: name.into(),
            params: Some(params),
        });
        self
    }
}

/// The declarative site map: an ordered list of entries, deserializable from
/// a JSON array.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct SiteMap {
    pub entries: Vec<SiteMapEntry>,
}

impl SiteMap {
    pub fn new(entries: Vec<SiteMapEntry>) -> Self {
        Self { entries }
    }
}

/// What a mapping pass runs against.
#[derive(Debug, Clone, Copy)]
pub enum MapContext<'a> {
    /// The whole document: every CSS entry queries globally.
    Document,
    /// A document subtree: CSS entries query beneath this node. Used after a
    /// partial update inserts new markup.
    Element(NodeId),
    /// A navigation route: route entries are matched, CSS entries skipped.
    Route(&'a str),
}

#[derive(Clone)]
enum CompiledPattern {
    Css(String),
    Route(Regex),
}

#[derive(Clone)]
struct CompiledEntry {
    pattern: CompiledPattern,
    controllers: Vec<ControllerBinding>,
}

/// Definition registry plus mapping engine.
pub struct ControllerMap {
    app: Rc<AppContext>,
    registry: RefCell<HashMap<String, Rc<dyn ControllerDef>>>,
    compiled: RefCell<Vec<CompiledEntry>>,
    site_map_set: Cell<bool>,
    element_cache: RefCell<HashMap<(NodeId, String), Rc<Controller>>>,
    page_cache: RefCell<HashMap<String, Rc<Controller>>>,
    on_complete: RefCell<Option<Rc<dyn Fn()>>>,
}

impl ControllerMap {
    /// Create a map bound to `app` and subscribe it to the remap broadcast
    /// channel, so publishing [`REMAP_TOPIC`] re-runs document mapping.
    pub fn new(app: Rc<AppContext>) -> Rc<Self> {
        let map = Rc::new(Self {
            app,
            registry: RefCell::new(HashMap::new()),
            compiled: RefCell::new(Vec::new()),
            site_map_set: Cell::new(false),
            element_cache: RefCell::new(HashMap::new()),
            page_cache: RefCell::new(HashMap::new()),
            on_complete: RefCell::new(None),
        });

        let weak = Rc::downgrade(&map);
        let callback = Rc::new(move |_payload: &[Value]| {
            if let Some(map) = weak.upgrade() {
                if let Err(err) = map.map_controllers(MapContext::Document) {
                    error!(error = %err, "remap broadcast failed");
                }
            }
        });
        // topic name is a non-empty constant
        let _ = map.app.bus().subscribe(REMAP_TOPIC, callback);
        map
    }

    /// Register a controller definition under its own name, replacing any
    /// previous registration.
    pub fn register(&self, def: Rc<dyn ControllerDef>) -> Result<()> {
        require_name(def.name(), "controller name")?;
        self.registry
            .borrow_mut()
            .insert(def.name().to_string(), def);
        Ok(())
    }

    /// Install the site map, validating it eagerly: every entry needs a
    /// non-empty pattern and controller names, and route patterns must be
    /// valid regular expressions. A rejected map leaves any previous one
    /// installed.
    pub fn set_site_map(&self, site_map: SiteMap) -> Result<()> {
        let mut compiled = Vec::with_capacity(site_map.entries.len());
        for entry in &site_map.entries {
            if entry.pattern.trim().is_empty() {
                return Err(Error::validation("site map entry has an empty pattern"));
            }
            for binding in &entry.controllers {
                if binding.controller.trim().is_empty() {
                    return Err(Error::validation(format!(
                        "site map entry '{}' names an empty controller",
                        entry.pattern
                    )));
                }
            }
            let pattern = match entry.kind {
                PatternKind::Css => CompiledPattern::Css(entry.pattern.clone()),
                PatternKind::Route => {
                    let regex = Regex::new(&entry.pattern).map_err(|err| {
                        Error::validation(format!(
                            "site map route '{}' is not a valid pattern: {err}",
                            entry.pattern
                        ))
                    })?;
                    CompiledPattern::Route(regex)
                }
            };
            compiled.push(CompiledEntry {
                pattern,
                controllers: entry.controllers.clone(),
            });
        }
        *self.compiled.borrow_mut() = compiled;
        self.site_map_set.set(true);
        Ok(())
    }

    /// Run a mapping pass over `context`.
    ///
    /// Requires an installed site map. CSS entries query the document (or
    /// the subtree for [`MapContext::Element`]) and attach a controller per
    /// matching element; route entries match only for [`MapContext::Route`].
    /// Already-mapped pairs are served from cache, so repeated passes over
    /// the same document are idempotent. In debug mode a failing controller
    /// is logged and skipped; in production the pass aborts with the error.
    pub fn map_controllers(&self, context: MapContext<'_>) -> Result<()> {
        if !self.site_map_set.get() {
            return Err(Error::invalid_argument("no site map has been set"));
        }
        let compiled = self.compiled.borrow().clone();
        for entry in &compiled {
            match (&entry.pattern, context) {
                (CompiledPattern::Css(selector), MapContext::Document) => {
                    self.map_matching_elements(selector, None, &entry.controllers)?;
                }
                (CompiledPattern::Css(selector), MapContext::Element(root)) => {
                    self.map_matching_elements(selector, Some(root), &entry.controllers)?;
                }
                (CompiledPattern::Route(regex), MapContext::Route(route)) => {
                    if regex.is_match(route) {
                        self.map_bindings(&entry.controllers, None)?;
                    }
                }
                _ => {}
            }
        }
        if let Some(callback) = self.on_complete.borrow().clone() {
            callback();
        }
        Ok(())
    }

    /// Attach one controller by registered name: to `element`, or page-level
    /// when `element` is `None`. Idempotent per (element, name) pair; the
    /// cached instance is returned on repeats.
    pub fn map_controller(
        &self,
        name: &str,
        element: Option<NodeId>,
        params: Option<&Value>,
    ) -> Result<Rc<Controller>> {
        require_name(name, "controller name")?;

        if let Some(node) = element {
            let key = (node, name.to_string());
            if let Some(existing) = self.element_cache.borrow().get(&key) {
                return Ok(Rc::clone(existing));
            }
        } else if let Some(existing) = self.page_cache.borrow().get(name) {
            return Ok(Rc::clone(existing));
        }

        let def = self
            .registry
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| {
                Error::TypeMismatch(format!("'{name}' is not a registered controller"))
            })?;
        let controller = Controller::create(def, Rc::clone(&self.app), element, params)?;

        match element {
            Some(node) => {
                self.element_cache
                    .borrow_mut()
                    .insert((node, name.to_string()), Rc::clone(&controller));
            }
            None => {
                self.page_cache
                    .borrow_mut()
                    .insert(name.to_string(), Rc::clone(&controller));
            }
        }
        debug!(controller = name, element = ?element, "controller mapped");
        Ok(controller)
    }

    /// The already-mapped instance for an (element, name) pair.
    pub fn controller_for(&self, element: NodeId, name: &str) -> Option<Rc<Controller>> {
        self.element_cache
            .borrow()
            .get(&(element, name.to_string()))
            .cloned()
    }

    /// The already-mapped page-level instance for `name`.
    pub fn page_controller(&self, name: &str) -> Option<Rc<Controller>> {
        self.page_cache.borrow().get(name).cloned()
    }

    /// Hook invoked at the end of every successful mapping pass.
    pub fn set_on_complete(&self, callback: Rc<dyn Fn()>) {
        *self.on_complete.borrow_mut() = Some(callback);
    }

    /// Ask the live controller map to re-run document mapping.
    pub fn remap(bus: &Messaging) -> Result<()> {
        bus.publish(REMAP_TOPIC, None)
    }

    fn map_matching_elements(
        &self,
        selector: &str,
        root: Option<NodeId>,
        bindings: &[ControllerBinding],
    ) -> Result<()> {
        for node in self.app.dom().query(selector, root) {
            self.map_bindings(bindings, Some(node))?;
        }
        Ok(())
    }

    fn map_bindings(&self, bindings: &[ControllerBinding], element: Option<NodeId>) -> Result<()> {
        for binding in bindings {
            let outcome =
                self.map_controller(&binding.controller, element, binding.params.as_ref());
            match outcome {
                Ok(_) => {}
                Err(err) if self.app.mode().catches_dispatch_errors() => {
                    error!(
                        controller = %binding.controller,
                        error = %err,
                        "controller mapping failed, continuing"
                    );
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunMode;
    use crate::testing::{test_app, CallLog, RecordingBehavior, ScriptedController};
    use crate::request::ParamsSpec;
    use serde_json::json;

    fn widget_def(log: &CallLog) -> ScriptedController {
        ScriptedController::new("Widget")
            .behavior("Poke", RecordingBehavior::new("poke", log))
            .observe(".poke", "click", "Poke", ParamsSpec::None)
    }

    #[test]
    fn test_site_map_deserializes_from_json() {
        let site_map: SiteMap = serde_json::from_value(json!([
            {"pattern": ".widget", "controllers": [{"controller": "Widget"}]},
            {
                "pattern": "^/users/\\d+$",
                "kind": "route",
                "controllers": [{"controller": "UserPage", "params": {"tab": "info"}}]
            }
        ]))
        .unwrap();

        assert_eq!(site_map.entries.len(), 2);
        assert_eq!(site_map.entries[0].kind, PatternKind::Css);
        assert_eq!(site_map.entries[1].kind, PatternKind::Route);
        assert_eq!(
            site_map.entries[1].controllers[0].params,
            Some(json!({"tab": "info"}))
        );
    }

    #[test]
    fn test_set_site_map_validates_eagerly() {
        let (app, _dom) = test_app();
        let map = ControllerMap::new(app);

        let empty_pattern = SiteMap::new(vec![SiteMapEntry::css("").controller("Widget")]);
        assert!(matches!(
            map.set_site_map(empty_pattern),
            Err(Error::Validation(_))
        ));

        let empty_controller = SiteMap::new(vec![SiteMapEntry::css(".w").controller("")]);
        assert!(matches!(
            map.set_site_map(empty_controller),
            Err(Error::Validation(_))
        ));

        let bad_route = SiteMap::new(vec![SiteMapEntry::route("([").controller("Widget")]);
        assert!(matches!(
            map.set_site_map(bad_route),
            Err(Error::Validation(_))
        ));

        // nothing was installed
        assert!(matches!(
            map.map_controllers(MapContext::Document),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_document_mapping_attaches_per_element_and_is_idempotent() {
        let (app, dom) = test_app();
        let first = dom.element("div", None, &["widget"], None);
        let second = dom.element("div", None, &["widget"], None);
        let log = CallLog::default();

        let map = ControllerMap::new(Rc::clone(&app));
        map.register(Rc::new(widget_def(&log))).unwrap();
        map.set_site_map(SiteMap::new(vec![
            SiteMapEntry::css(".widget").controller("Widget"),
        ]))
        .unwrap();

        map.map_controllers(MapContext::Document).unwrap();
        map.map_controllers(MapContext::Document).unwrap();

        let a = map.controller_for(first, "Widget").unwrap();
        let b = map.controller_for(second, "Widget").unwrap();
        assert!(!Rc::ptr_eq(&a, &b));
        assert!(Rc::ptr_eq(
            &a,
            &map.map_controller("Widget", Some(first), None).unwrap()
        ));
    }

    #[test]
    fn test_route_mapping() {
        let (app, _dom) = test_app();
        let log = CallLog::default();

        let map = ControllerMap::new(app);
        map.register(Rc::new(widget_def(&log))).unwrap();
        map.set_site_map(SiteMap::new(vec![
            SiteMapEntry::route("^/users/\\d+$").controller("Widget"),
        ]))
        .unwrap();

        map.map_controllers(MapContext::Route("/about")).unwrap();
        assert!(map.page_controller("Widget").is_none());

        map.map_controllers(MapContext::Route("/users/42")).unwrap();
        let page = map.page_controller("Widget").unwrap();

        // a second matching route reuses the page-level instance
        map.map_controllers(MapContext::Route("/users/7")).unwrap();
        assert!(Rc::ptr_eq(&page, &map.page_controller("Widget").unwrap()));
    }

    #[test]
    fn test_unregistered_controller_is_a_type_mismatch() {
        let (app, _dom) = test_app();
        let map = ControllerMap::new(app);
        assert!(matches!(
            map.map_controller("Ghost", None, None),
            Err(Error::TypeMismatch(_))
        ));
    }

    #[test]
    fn test_debug_mode_skips_failing_controller() {
        let (app, dom) = test_app();
        app.set_mode(RunMode::Debug);
        let target = dom.element("div", None, &["widget"], None);
        let log = CallLog::default();

        let map = ControllerMap::new(Rc::clone(&app));
        map.register(Rc::new(widget_def(&log))).unwrap();
        map.set_site_map(SiteMap::new(vec![
            SiteMapEntry::css(".widget").controller("Ghost"),
            SiteMapEntry::css(".widget").controller("Widget"),
        ]))
        .unwrap();

        // Ghost is unregistered; in debug mode the pass continues to Widget
        map.map_controllers(MapContext::Document).unwrap();
        assert!(map.controller_for(target, "Widget").is_some());
    }

    #[test]
    fn test_remap_broadcast_reruns_document_mapping() {
        let (app, dom) = test_app();
        let log = CallLog::default();

        let map = ControllerMap::new(Rc::clone(&app));
        map.register(Rc::new(widget_def(&log))).unwrap();
        map.set_site_map(SiteMap::new(vec![
            SiteMapEntry::css(".widget").controller("Widget"),
        ]))
        .unwrap();
        map.map_controllers(MapContext::Document).unwrap();

        let late = dom.element("div", None, &["widget"], None);
        ControllerMap::remap(app.bus()).unwrap();
        assert!(map.controller_for(late, "Widget").is_some());
    }

    #[test]
    fn test_on_complete_fires_per_pass() {
        let (app, _dom) = test_app();
        let map = ControllerMap::new(app);
        map.set_site_map(SiteMap::default()).unwrap();

        let count = Rc::new(Cell::new(0));
        let count2 = Rc::clone(&count);
        map.set_on_complete(Rc::new(move || count2.set(count2.get() + 1)));

        map.map_controllers(MapContext::Document).unwrap();
        map.map_controllers(MapContext::Route("/x")).unwrap();
        assert_eq!(count.get(), 2);
    }
}
