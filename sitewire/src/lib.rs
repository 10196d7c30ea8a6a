//! sitewire: declarative controller wiring for documents
//!
//! Describe which controllers attach where in a site map; sitewire maps them
//! onto the document, binds their observers, and dispatches events, topic
//! publishes, and model changes through interceptable command chains.
//!
//! # Example
//! ```ignore
//! use sitewire::prelude::*;
//!
//! let app = AppContext::new(host_dom);
//! let map = ControllerMap::new(Rc::clone(&app));
//! map.register(Rc::new(SearchController))?;
//! map.set_site_map(serde_json::from_str(
//!     r#"[{"pattern": ".search", "controllers": [{"controller": "Search"}]}]"#,
//! )?)?;
//! map.map_controllers(MapContext::Document)?;
//! ```

// Re-export everything from core
pub use sitewire_core::*;

/// Prelude for convenient imports
pub mod prelude {
    // Traits
    pub use sitewire_core::{Behavior, Command, ControllerDef, Dom, Rule, Service};

    // Dispatch
    pub use sitewire_core::{
        Caller, CommandSetup, CommandUnit, Controller, InterceptKind, InterceptSetup, Invocation,
        ObserverSetup, ObserverSource, ParamsScope, ParamsSpec, Request,
    };

    // Mapping
    pub use sitewire_core::{ControllerMap, MapContext, PatternKind, SiteMap, SiteMapEntry};

    // Messaging and model
    pub use sitewire_core::{
        Messaging, MessagingTopic, ModelReference, ModelStore, SubscriberFn, SubscriptionHandle,
    };

    // Context and supporting types
    pub use sitewire_core::{
        AppContext, CommandRegistry, DomEvent, Error, History, NodeId, ParamDecl, ParamType,
        Result, RunMode, ServiceLocator,
    };
}
