//! Navigation state broadcast
//!
//! Thin seam between the host's location handling and the framework: the
//! host feeds route changes in through [`History::navigate`], and interested
//! parties (typically a route-driven mapping pass) subscribe to
//! [`HISTORY_TOPIC`].

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::json;
use tracing::debug;

use crate::error::Result;
use crate::messaging::{Messaging, SubscriberFn, SubscriptionHandle};

/// Topic a route change is published on; the payload is the new route.
pub const HISTORY_TOPIC: &str = "/history/change";

/// Current navigation route plus change broadcast.
pub struct History {
    current: RefCell<String>,
    bus: Rc<Messaging>,
}

impl History {
    /// Start at the empty route.
    pub fn new(bus: Rc<Messaging>) -> Self {
        Self {
            current: RefCell::new(String::new()),
            bus,
        }
    }

    /// The current route.
    pub fn current(&self) -> String {
        self.current.borrow().clone()
    }

    /// Record a route change and broadcast it. Navigating to the current
    /// route is a no-op; returns whether the route changed.
    pub fn navigate(&self, route: &str) -> Result<bool> {
        if *self.current.borrow() == route {
            return Ok(false);
        }
        *self.current.borrow_mut() = route.to_string();
        debug!(route, "navigating");
        self.bus.publish(HISTORY_TOPIC, Some(json!(route)))?;
        Ok(true)
    }

    /// Subscribe to route changes.
    pub fn on_change(&self, callback: SubscriberFn) -> Result<SubscriptionHandle> {
        self.bus.subscribe(HISTORY_TOPIC, callback)
    }
}
