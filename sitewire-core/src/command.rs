//! Executable units of behavior
//!
//! Three handler traits share one dispatch seam, [`CommandUnit::run`]:
//! params are refreshed, preconditions checked, and in debug mode a failing
//! handler is logged and absorbed so the rest of the chain keeps running.
//! Handlers are stateless with respect to the dispatch: all per-invocation
//! state arrives through the [`Request`] parameter.

use std::fmt;
use std::rc::Rc;

use tracing::error;

use crate::config::RunMode;
use crate::error::{Error, Result};
use crate::request::Request;

/// A full command: primary execution plus service response hooks.
///
/// The response hooks default to [`Error::NotImplemented`] so a service
/// invoking a command that never expected a response fails loudly instead of
/// silently dropping the payload.
pub trait Command {
    /// Primary execution.
    fn execute(&self, request: &Request) -> Result<()>;

    /// Called by a service with a successful response payload.
    fn on_response(&self, _response: &serde_json::Value) -> Result<()> {
        Err(Error::NotImplemented("on_response"))
    }

    /// Called by a service with a failure payload.
    fn on_error(&self, _error: &serde_json::Value) -> Result<()> {
        Err(Error::NotImplemented("on_error"))
    }
}

/// A lighter-weight unit: execution only, no service hooks.
pub trait Behavior {
    fn execute(&self, request: &Request) -> Result<()>;
}

/// A gate for around-interception: [`Rule::condition`] decides whether the
/// intercepted execution proceeds.
pub trait Rule {
    /// Whether the intercepted invocation may proceed.
    fn condition(&self, request: &Request) -> Result<bool>;

    /// Evaluate the condition and proceed on `true`. Rules only make sense
    /// inside an interception, so a request without an invocation is
    /// rejected.
    fn execute(&self, request: &Request) -> Result<()> {
        let invocation = request.invocation().ok_or_else(|| {
            Error::invalid_argument(format!(
                "rule '{}' fired outside an interception",
                request.command_name()
            ))
        })?;
        if self.condition(request)? {
            invocation.proceed()?;
        }
        Ok(())
    }
}

/// One registered unit of a command chain.
#[derive(Clone)]
pub enum CommandUnit {
    Command(Rc<dyn Command>),
    Behavior(Rc<dyn Behavior>),
    Rule(Rc<dyn Rule>),
}

impl CommandUnit {
    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            CommandUnit::Command(_) => "command",
            CommandUnit::Behavior(_) => "behavior",
            CommandUnit::Rule(_) => "rule",
        }
    }

    /// The full-command handler, when this unit is one. Services need it for
    /// response callbacks.
    pub fn as_command(&self) -> Option<&Rc<dyn Command>> {
        match self {
            CommandUnit::Command(command) => Some(command),
            _ => None,
        }
    }

    /// Dispatch `request` through this unit.
    ///
    /// Params are recomputed first, so a producer-backed request observes
    /// document state as of this firing. Precondition failures (a rule
    /// outside an interception) propagate in every mode; execution failures
    /// propagate in production but are logged and absorbed in debug mode so
    /// one broken handler cannot halt the chain.
    pub fn run(&self, request: &Request, mode: RunMode) -> Result<()> {
        request.update();

        if matches!(self, CommandUnit::Rule(_)) && request.invocation().is_none() {
            return Err(Error::invalid_argument(format!(
                "rule '{}' fired outside an interception",
                request.command_name()
            )));
        }

        if request.is_skippable() {
            return Ok(());
        }

        let outcome = match self {
            CommandUnit::Command(command) => command.execute(request),
            CommandUnit::Behavior(behavior) => behavior.execute(request),
            CommandUnit::Rule(rule) => rule.execute(request),
        };

        match outcome {
            Err(err) if mode.catches_dispatch_errors() => {
                error!(
                    command = %request.command_name(),
                    controller = %request.controller_name(),
                    kind = self.kind(),
                    error = %err,
                    "handler failed, continuing chain"
                );
                Ok(())
            }
            other => other,
        }
    }
}

impl fmt::Debug for CommandUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommandUnit::{}", self.kind())
    }
}

impl From<Rc<dyn Command>> for CommandUnit {
    fn from(command: Rc<dyn Command>) -> Self {
        CommandUnit::Command(command)
    }
}

impl From<Rc<dyn Behavior>> for CommandUnit {
    fn from(behavior: Rc<dyn Behavior>) -> Self {
        CommandUnit::Behavior(behavior)
    }
}

impl From<Rc<dyn Rule>> for CommandUnit {
    fn from(rule: Rc<dyn Rule>) -> Self {
        CommandUnit::Rule(rule)
    }
}
