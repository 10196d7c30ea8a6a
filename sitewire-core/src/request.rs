//! Per-invocation request context
//!
//! A [`Request`] is constructed immediately before a command chain fires and
//! discarded afterwards. It is cheap to clone (`Rc`-backed) so interception
//! can capture it in a [`proceed`](Invocation::proceed) continuation.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::controller::Controller;
use crate::dom::{DomEvent, NodeId};
use crate::error::{require_name, Error, Result};
use crate::messaging::MessagingTopic;
use crate::model::ModelReference;

/// The origin object that triggered a request.
#[derive(Clone)]
pub enum Caller {
    /// A document node (direct or delegation-resolved event target).
    Node(NodeId),
    /// A messaging topic whose publish fired the observer.
    Topic(Rc<MessagingTopic>),
    /// A model reference whose key changed.
    Model(Rc<ModelReference>),
}

impl Caller {
    /// The node, when the caller is one.
    pub fn node(&self) -> Option<NodeId> {
        match self {
            Caller::Node(node) => Some(*node),
            _ => None,
        }
    }

    /// The messaging topic, when the caller is one. The topic's in-flight
    /// message is readable from inside the dispatch.
    pub fn topic(&self) -> Option<&Rc<MessagingTopic>> {
        match self {
            Caller::Topic(topic) => Some(topic),
            _ => None,
        }
    }

    /// The model reference, when the caller is one.
    pub fn model(&self) -> Option<&Rc<ModelReference>> {
        match self {
            Caller::Model(reference) => Some(reference),
            _ => None,
        }
    }
}

impl fmt::Debug for Caller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Caller::Node(node) => write!(f, "Caller::Node({node:?})"),
            Caller::Topic(topic) => write!(f, "Caller::Topic({:?})", topic.topic()),
            Caller::Model(reference) => write!(f, "Caller::Model({:?})", reference.key()),
        }
    }
}

/// Inputs available to a params producer at fire time.
pub struct ParamsScope<'a> {
    /// The owning controller's context element, if any.
    pub context: Option<NodeId>,
    /// The caller that triggered the request.
    pub caller: &'a Caller,
}

/// Closure recomputing request params at fire time.
pub type ParamsProducer = Rc<dyn Fn(&ParamsScope<'_>) -> Value>;

/// How an observer or intercept supplies params to its requests.
///
/// Producers carry an explicit signature key: observer de-duplication needs a
/// stable identity for "the same params logic" across repeated binding
/// passes, and closures have none of their own.
#[derive(Clone)]
pub enum ParamsSpec {
    /// No params.
    None,
    /// A fixed value, captured at registration time. A literal boolean
    /// `false` marks every request built from it as skippable.
    Literal(Value),
    /// A named closure, re-evaluated per firing.
    Producer {
        signature: String,
        producer: ParamsProducer,
    },
}

impl ParamsSpec {
    /// Fixed params.
    pub fn literal(value: Value) -> Self {
        ParamsSpec::Literal(value)
    }

    /// Per-firing params under a stable signature key.
    pub fn producer(
        signature: impl Into<String>,
        producer: impl Fn(&ParamsScope<'_>) -> Value + 'static,
    ) -> Self {
        ParamsSpec::Producer {
            signature: signature.into(),
            producer: Rc::new(producer),
        }
    }

    /// Stable identity used in observer de-duplication tags.
    pub fn signature(&self) -> String {
        match self {
            ParamsSpec::None => String::new(),
            ParamsSpec::Literal(value) => value.to_string(),
            ParamsSpec::Producer { signature, .. } => format!("fn:{signature}"),
        }
    }
}

impl fmt::Debug for ParamsSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamsSpec::None => write!(f, "ParamsSpec::None"),
            ParamsSpec::Literal(value) => write!(f, "ParamsSpec::Literal({value})"),
            ParamsSpec::Producer { signature, .. } => {
                write!(f, "ParamsSpec::Producer({signature:?})")
            }
        }
    }
}

/// Continuation handed to an around-interceptor: calling
/// [`proceed`](Invocation::proceed) runs the intercepted unit (or the next
/// wrapper inward) with the original request.
#[derive(Clone)]
pub struct Invocation {
    proceed: Rc<dyn Fn() -> Result<()>>,
}

impl Invocation {
    /// Wrap a continuation.
    pub fn new(proceed: impl Fn() -> Result<()> + 'static) -> Self {
        Self {
            proceed: Rc::new(proceed),
        }
    }

    /// Run the intercepted continuation.
    pub fn proceed(&self) -> Result<()> {
        (self.proceed)()
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Invocation")
    }
}

struct RequestInner {
    params: RefCell<Map<String, Value>>,
    producer: Option<ParamsProducer>,
    computed: Cell<bool>,
    skip: bool,
    caller: Caller,
    event: Option<DomEvent>,
    command_name: String,
    controller: Rc<Controller>,
    invocation: Option<Invocation>,
}

/// Context object passed to every executable unit of a command chain.
///
/// Immutable after construction except for lazily recomputed params.
#[derive(Clone)]
pub struct Request {
    inner: Rc<RequestInner>,
}

impl Request {
    /// Build a request. The caller and controller are required by
    /// construction; the command name must be non-empty; a literal params
    /// value must be an object, `null`, or the boolean `false`.
    pub fn new(
        params: &ParamsSpec,
        caller: Caller,
        event: Option<DomEvent>,
        command_name: &str,
        controller: Rc<Controller>,
        invocation: Option<Invocation>,
    ) -> Result<Self> {
        require_name(command_name, "command name")?;

        let mut skip = false;
        let mut producer = None;
        let initial = match params {
            ParamsSpec::None | ParamsSpec::Literal(Value::Null) => Map::new(),
            ParamsSpec::Literal(Value::Object(object)) => object.clone(),
            ParamsSpec::Literal(Value::Bool(false)) => {
                skip = true;
                Map::new()
            }
            ParamsSpec::Literal(other) => {
                return Err(Error::InvalidType(format!(
                    "request params must be an object, got {other}"
                )));
            }
            ParamsSpec::Producer { producer: f, .. } => {
                producer = Some(Rc::clone(f));
                Map::new()
            }
        };

        Ok(Self {
            inner: Rc::new(RequestInner {
                params: RefCell::new(initial),
                producer,
                computed: Cell::new(false),
                skip,
                caller,
                event,
                command_name: command_name.to_string(),
                controller,
                invocation,
            }),
        })
    }

    /// The params object; a producer is evaluated on first access.
    pub fn params(&self) -> Value {
        if self.inner.producer.is_some() && !self.inner.computed.get() {
            self.update();
        }
        Value::Object(self.inner.params.borrow().clone())
    }

    /// One params entry by key.
    pub fn param(&self, key: &str) -> Option<Value> {
        if self.inner.producer.is_some() && !self.inner.computed.get() {
            self.update();
        }
        self.inner.params.borrow().get(key).cloned()
    }

    /// Re-run the params producer and merge its output additively into the
    /// existing params (fresh keys win; untouched keys survive). A no-op
    /// without a producer.
    pub fn update(&self) {
        let Some(producer) = &self.inner.producer else {
            return;
        };
        let scope = ParamsScope {
            context: self.inner.controller.context(),
            caller: &self.inner.caller,
        };
        let produced = producer(&scope);
        self.inner.computed.set(true);
        match produced {
            Value::Object(fresh) => {
                let mut params = self.inner.params.borrow_mut();
                for (key, value) in fresh {
                    params.insert(key, value);
                }
            }
            Value::Null => {}
            other => {
                debug!(
                    command = %self.inner.command_name,
                    "params producer returned non-object {other}, ignoring"
                );
            }
        }
    }

    /// Whether dispatch should skip this request (explicit `false` params).
    pub fn is_skippable(&self) -> bool {
        self.inner.skip
    }

    /// The origin that triggered the request.
    pub fn caller(&self) -> &Caller {
        &self.inner.caller
    }

    /// The DOM event that fired, if the observer was event-bound.
    pub fn event(&self) -> Option<&DomEvent> {
        self.inner.event.as_ref()
    }

    /// The command name this request is dispatched under.
    pub fn command_name(&self) -> &str {
        &self.inner.command_name
    }

    /// The controller that fired the request.
    pub fn controller(&self) -> &Rc<Controller> {
        &self.inner.controller
    }

    /// Name of the controller that fired the request.
    pub fn controller_name(&self) -> &str {
        self.inner.controller.name()
    }

    /// The firing controller's context element.
    pub fn context_element(&self) -> Option<NodeId> {
        self.inner.controller.context()
    }

    /// The interception continuation, present only inside an around
    /// interceptor's injected chain.
    pub fn invocation(&self) -> Option<&Invocation> {
        self.inner.invocation.as_ref()
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("command", &self.inner.command_name)
            .field("controller", &self.inner.controller.name())
            .field("caller", &self.inner.caller)
            .field("skippable", &self.inner.skip)
            .finish()
    }
}
