//! Named service locator
//!
//! Commands reach backend facilities through services resolved by name, so
//! controller code never hard-wires a transport. A service receives the
//! calling command and reports back through its
//! [`on_response`](crate::command::Command::on_response) /
//! [`on_error`](crate::command::Command::on_error) hooks.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use serde_json::Value;

use crate::command::Command;
use crate::error::{require_name, Error, Result};

/// A named backend facility.
pub trait Service {
    /// Perform the call described by `params` on behalf of `caller`, which
    /// receives the outcome through its response hooks.
    fn invoke(&self, params: &Value, caller: Rc<dyn Command>) -> Result<()>;
}

/// Name-to-service table.
#[derive(Default)]
pub struct ServiceLocator {
    services: RefCell<HashMap<String, Rc<dyn Service>>>,
}

impl ServiceLocator {
    /// Register `service` under `name`, replacing any previous registration.
    pub fn register(&self, name: &str, service: Rc<dyn Service>) -> Result<()> {
        require_name(name, "service name")?;
        self.services
            .borrow_mut()
            .insert(name.to_string(), service);
        Ok(())
    }

    /// Resolve a registered service.
    pub fn get_service(&self, name: &str) -> Result<Rc<dyn Service>> {
        require_name(name, "service name")?;
        self.services.borrow().get(name).cloned().ok_or_else(|| {
            Error::invalid_argument(format!("no service registered under '{name}'"))
        })
    }

    /// Resolve and invoke in one step.
    pub fn invoke(&self, name: &str, params: &Value, caller: Rc<dyn Command>) -> Result<()> {
        self.get_service(name)?.invoke(params, caller)
    }
}
