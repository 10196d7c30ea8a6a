//! End-to-end scenarios through the public facade: site-map mapping,
//! observer dispatch, interception, and navigation.

use std::cell::Cell;
use std::rc::Rc;

use serde_json::{json, Value};
use sitewire::prelude::*;
use sitewire::{test_app, CallLog, RecordingBehavior, RecordingCommand, ScriptedController, ToggleRule};

#[test]
fn site_map_wires_clicks_to_commands() {
    let (app, dom) = test_app();
    let panel = dom.element("div", None, &["search"], None);
    let button = dom.element("button", None, &["submit"], Some(panel));
    let log = CallLog::default();

    let map = ControllerMap::new(Rc::clone(&app));
    map.register(Rc::new(
        ScriptedController::new("Search")
            .behavior("Submit", RecordingBehavior::new("submit", &log))
            .observe(".submit", "click", "Submit", ParamsSpec::None),
    ))
    .unwrap();
    map.set_site_map(serde_json::from_value(json!([
        {"pattern": ".search", "controllers": [{"controller": "Search"}]}
    ]))
    .unwrap())
    .unwrap();
    map.map_controllers(MapContext::Document).unwrap();

    dom.fire(button, "click");
    assert_eq!(log.entries(), vec!["submit"]);

    // a second full pass plus a rebind broadcast adds no duplicate observers
    map.map_controllers(MapContext::Document).unwrap();
    Controller::update_observers(app.bus(), None).unwrap();
    dom.fire(button, "click");
    assert_eq!(log.entries(), vec!["submit", "submit"]);
}

#[test]
fn params_flow_from_site_map_to_requests() {
    let (app, dom) = test_app();
    let panel = dom.element("div", None, &["pager"], None);
    let next = dom.element("a", None, &["next"], Some(panel));
    let log = CallLog::default();

    let map = ControllerMap::new(Rc::clone(&app));
    map.register(Rc::new(
        ScriptedController::new("Pager")
            .param(ParamDecl::new("pageSize", json!(10)).typed(ParamType::Number))
            .command("Next", RecordingCommand::new("next", &log))
            .observe(
                ".next",
                "click",
                "Next",
                ParamsSpec::literal(json!({"direction": "forward"})),
            ),
    ))
    .unwrap();
    map.set_site_map(serde_json::from_value(json!([
        {
            "pattern": ".pager",
            "controllers": [{"controller": "Pager", "params": {"pageSize": 25}}]
        }
    ]))
    .unwrap())
    .unwrap();
    map.map_controllers(MapContext::Document).unwrap();

    let pager = map.controller_for(panel, "Pager").unwrap();
    assert_eq!(pager.get_value("pageSize").unwrap(), json!(25));

    dom.fire(next, "click");
    assert_eq!(log.entries(), vec!["next:{\"direction\":\"forward\"}"]);
}

#[test]
fn around_interception_gates_a_chain() {
    let (app, dom) = test_app();
    let button = dom.element("button", None, &["save"], None);
    let log = CallLog::default();
    let dirty = Rc::new(Cell::new(false));

    let def = ScriptedController::new("Editor")
        .behavior("Save", RecordingBehavior::new("save", &log))
        .rule("IfDirty", ToggleRule::new(&dirty))
        .observe(".save", "click", "Save", ParamsSpec::None)
        .intercept(InterceptKind::Around, "Save", "IfDirty", ParamsSpec::None);
    Controller::create(Rc::new(def), app, None, None).unwrap();

    dom.fire(button, "click");
    assert!(log.entries().is_empty());

    dirty.set(true);
    dom.fire(button, "click");
    assert_eq!(log.entries(), vec!["save"]);
}

#[test]
fn model_changes_drive_observers_and_requests_read_the_model() {
    let (app, _dom) = test_app();
    let log = CallLog::default();
    let seen = Rc::new(std::cell::RefCell::new(Vec::new()));

    struct EchoUser {
        seen: Rc<std::cell::RefCell<Vec<Value>>>,
    }
    impl Behavior for EchoUser {
        fn execute(&self, request: &Request) -> Result<()> {
            if let Some(reference) = request.caller().model() {
                self.seen.borrow_mut().push(reference.get()?);
            }
            Ok(())
        }
    }

    let def = ScriptedController::new("Profile")
        .behavior(
            "Refresh",
            EchoUser {
                seen: Rc::clone(&seen),
            },
        )
        .behavior("Refresh", RecordingBehavior::new("refreshed", &log))
        .observe(ObserverSource::model("user"), "notify", "Refresh", ParamsSpec::None);
    Controller::create(Rc::new(def), Rc::clone(&app), None, None).unwrap();

    app.model().set("user", json!({"name": "ada"})).unwrap();
    assert_eq!(log.entries(), vec!["refreshed"]);
    assert_eq!(*seen.borrow(), vec![json!({"name": "ada"})]);
}

#[test]
fn navigation_triggers_route_mapping() {
    let (app, _dom) = test_app();
    let log = CallLog::default();

    let map = ControllerMap::new(Rc::clone(&app));
    map.register(Rc::new(
        ScriptedController::new("UserPage")
            .behavior("Noop", RecordingBehavior::new("noop", &log))
            .observe(ObserverSource::topic("/app/noop"), "publish", "Noop", ParamsSpec::None),
    ))
    .unwrap();
    map.set_site_map(serde_json::from_value(json!([
        {"pattern": "^/users/\\d+$", "kind": "route", "controllers": [{"controller": "UserPage"}]}
    ]))
    .unwrap())
    .unwrap();

    let history = History::new(Rc::clone(app.bus()));
    let map2 = Rc::clone(&map);
    history
        .on_change(Rc::new(move |payload: &[Value]| {
            if let Some(route) = payload.first().and_then(Value::as_str) {
                map2.map_controllers(MapContext::Route(route)).unwrap();
            }
        }))
        .unwrap();

    history.navigate("/about").unwrap();
    assert!(map.page_controller("UserPage").is_none());

    history.navigate("/users/42").unwrap();
    assert!(map.page_controller("UserPage").is_some());
}

#[test]
fn detached_subtree_controllers_tear_down_lazily() {
    let (app, dom) = test_app();
    let panel = dom.element("div", None, &["widget"], None);
    let button = dom.element("button", None, &["go"], Some(panel));
    let log = CallLog::default();

    let map = ControllerMap::new(Rc::clone(&app));
    map.register(Rc::new(
        ScriptedController::new("Widget")
            .behavior("Go", RecordingBehavior::new("go", &log))
            .observe(".go", "click", "Go", ParamsSpec::None),
    ))
    .unwrap();
    map.set_site_map(serde_json::from_value(json!([
        {"pattern": ".widget", "controllers": [{"controller": "Widget"}]}
    ]))
    .unwrap())
    .unwrap();
    map.map_controllers(MapContext::Document).unwrap();

    // delegated listener sits on the panel
    assert_eq!(dom.listener_count(panel, "click"), 1);

    dom.detach(panel);
    dom.fire(button, "click");
    assert!(log.entries().is_empty());
    assert_eq!(dom.listener_count(panel, "click"), 0);
}

#[test]
fn producer_params_observe_state_at_fire_time() {
    let (app, dom) = test_app();
    let button = dom.element("button", None, &["go"], None);
    let log = CallLog::default();
    let counter = Rc::new(Cell::new(0));

    let counter2 = Rc::clone(&counter);
    let def = ScriptedController::new("Counter")
        .command("Tick", RecordingCommand::new("tick", &log))
        .observe(
            ".go",
            "click",
            "Tick",
            ParamsSpec::producer("tick-count", move |_scope| {
                counter2.set(counter2.get() + 1);
                json!({"count": counter2.get()})
            }),
        );
    Controller::create(Rc::new(def), app, None, None).unwrap();

    dom.fire(button, "click");
    dom.fire(button, "click");
    assert_eq!(
        log.entries(),
        vec!["tick:{\"count\":1}", "tick:{\"count\":2}"]
    );
}

#[test]
fn partial_mapping_covers_inserted_markup() {
    let (app, dom) = test_app();
    let log = CallLog::default();

    let map = ControllerMap::new(Rc::clone(&app));
    map.register(Rc::new(
        ScriptedController::new("Widget")
            .behavior("Go", RecordingBehavior::new("go", &log))
            .observe(".go", "click", "Go", ParamsSpec::None),
    ))
    .unwrap();
    map.set_site_map(serde_json::from_value(json!([
        {"pattern": ".widget", "controllers": [{"controller": "Widget"}]}
    ]))
    .unwrap())
    .unwrap();
    map.map_controllers(MapContext::Document).unwrap();

    // markup inserted after the initial pass, mapped via its subtree
    let region = dom.element("section", None, &[], None);
    let panel = dom.element("div", None, &["widget"], Some(region));
    let button = dom.element("button", None, &["go"], Some(panel));
    map.map_controllers(MapContext::Element(region)).unwrap();

    dom.fire(button, "click");
    assert_eq!(log.entries(), vec!["go"]);
}
