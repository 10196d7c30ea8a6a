//! Core types for sitewire
//!
//! This crate provides the building blocks for wiring a document to
//! application behavior through declarative controllers, following a
//! command-dispatch architecture with pub/sub messaging and a reactive model
//! store.
//!
//! # Core Concepts
//!
//! - **Controller**: Binds observers (events, topics, model keys) to command
//!   chains, scoped to an optional context element
//! - **Command / Behavior / Rule**: Stateless executable units; rules gate
//!   around-interception
//! - **Request**: Per-invocation context handed to every unit
//! - **Messaging**: Synchronous pub/sub bus
//! - **ModelStore**: Key/value store publishing per-key change topics
//! - **ControllerMap**: Declarative site map attaching controllers to
//!   elements and routes
//!
//! # Basic Example
//!
//! ```ignore
//! use sitewire_core::prelude::*;
//!
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
//!         setup.add_observer(".greet", "click", "Greet", ParamsSpec::None)
//!     }
//! }
//!
//! let app = AppContext::new(host_dom);
//! let map = ControllerMap::new(Rc::clone(&app));
//! map.register(Rc::new(Greeter))?;
//! map.set_site_map(serde_json::from_str(SITE_MAP_JSON)?)?;
//! map.map_controllers(MapContext::Document)?;
//! ```

pub mod command;
pub mod config;
pub mod context;
pub mod controller;
pub mod dom;
pub mod error;
pub mod history;
pub mod map;
pub mod messaging;
pub mod model;
pub mod param;
pub mod registry;
pub mod request;
pub mod service;
pub mod testing;

// Core trait exports
pub use command::{Behavior, Command, CommandUnit, Rule};
pub use controller::{
    rebind_topic, CommandSetup, Controller, ControllerDef, InterceptKind, InterceptSetup,
    ObserverSetup, ObserverSource, REBIND_ALL_TOPIC,
};

// Dispatch context exports
pub use context::AppContext;
pub use request::{Caller, Invocation, ParamsProducer, ParamsScope, ParamsSpec, Request};

// Messaging and model exports
pub use messaging::{Messaging, MessagingTopic, SubscriberFn, SubscriptionHandle};
pub use model::{model_topic, ModelReference, ModelStore};

// Mapping exports
pub use map::{
    ControllerBinding, ControllerMap, MapContext, PatternKind, SiteMap, SiteMapEntry, REMAP_TOPIC,
};

// Param exports
pub use param::{Param, ParamDecl, ParamMap, ParamType};

// Document boundary exports
pub use dom::{Dom, DomEvent, EventHandler, ListenerHandle, NodeId};

// Supporting exports
pub use config::RunMode;
pub use error::{Error, Result};
pub use history::{History, HISTORY_TOPIC};
pub use registry::{CommandFactory, CommandRegistry};
pub use service::{Service, ServiceLocator};

// Testing exports
pub use testing::{
    test_app, CallLog, EmptyController, FailingBehavior, FakeDom, RecordingBehavior,
    RecordingCommand, ScriptedController, ToggleRule,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::command::{Behavior, Command, CommandUnit, Rule};
    pub use crate::config::RunMode;
    pub use crate::context::AppContext;
    pub use crate::controller::{
        CommandSetup, Controller, ControllerDef, InterceptKind, InterceptSetup, ObserverSetup,
        ObserverSource,
    };
    pub use crate::dom::{Dom, DomEvent, EventHandler, ListenerHandle, NodeId};
    pub use crate::error::{Error, Result};
    pub use crate::history::History;
    pub use crate::map::{ControllerMap, MapContext, PatternKind, SiteMap, SiteMapEntry};
    pub use crate::messaging::{Messaging, SubscriberFn, SubscriptionHandle};
    pub use crate::model::{ModelReference, ModelStore};
    pub use crate::param::{ParamDecl, ParamType};
    pub use crate::registry::CommandRegistry;
    pub use crate::request::{Caller, Invocation, ParamsScope, ParamsSpec, Request};
    pub use crate::service::{Service, ServiceLocator};
}
