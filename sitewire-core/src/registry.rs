//! Explicit command factory registry
//!
//! Controller definitions name the commands they bind; the registry resolves
//! those names to factories producing fresh unit instances. Registration is
//! explicit host code, so every resolvable name is visible at startup.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::command::CommandUnit;
use crate::error::{require_name, Error, Result};

/// Produces a fresh unit per controller binding.
pub type CommandFactory = Rc<dyn Fn() -> CommandUnit>;

/// Name-to-factory table for command units.
#[derive(Default)]
pub struct CommandRegistry {
    factories: RefCell<HashMap<String, CommandFactory>>,
}

impl CommandRegistry {
    /// Register `factory` under `id`, replacing any previous registration.
    pub fn register(&self, id: &str, factory: CommandFactory) -> Result<()> {
        require_name(id, "command factory id")?;
        self.factories.borrow_mut().insert(id.to_string(), factory);
        Ok(())
    }

    /// Instantiate a fresh unit for `id`.
    pub fn create(&self, id: &str) -> Result<CommandUnit> {
        require_name(id, "command factory id")?;
        let factories = self.factories.borrow();
        let factory = factories.get(id).ok_or_else(|| {
            Error::TypeMismatch(format!("'{id}' does not resolve to a registered command"))
        })?;
        Ok(factory())
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.factories.borrow().contains_key(id)
    }
}
