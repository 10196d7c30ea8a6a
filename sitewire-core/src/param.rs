//! Typed, validated, observable controller parameters

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use serde_json::Value;

use crate::error::{Error, Result};

/// Expected runtime shape of a parameter value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Bool,
    Number,
    String,
    Array,
    Object,
}

impl ParamType {
    /// Whether `value` matches this shape. `Value::Null` passes: absence of a
    /// value is the required-flag's concern, not the type's.
    pub fn matches(self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (ParamType::Bool, Value::Bool(_)) => true,
            (ParamType::Number, Value::Number(_)) => true,
            (ParamType::String, Value::String(_)) => true,
            (ParamType::Array, Value::Array(_)) => true,
            (ParamType::Object, Value::Object(_)) => true,
            _ => false,
        }
    }
}

/// Static parameter declaration on a controller definition. Each controller
/// instance clones its declarations into a fresh [`ParamMap`], so sibling
/// instances never share parameter state.
#[derive(Debug, Clone)]
pub struct ParamDecl {
    pub name: String,
    pub default: Value,
    pub required: bool,
    pub ty: Option<ParamType>,
}

impl ParamDecl {
    /// Optional parameter with a default value.
    pub fn new(name: impl Into<String>, default: Value) -> Self {
        Self {
            name: name.into(),
            default,
            required: false,
            ty: None,
        }
    }

    /// Mark the parameter required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Declare the expected value shape.
    pub fn typed(mut self, ty: ParamType) -> Self {
        self.ty = Some(ty);
        self
    }
}

/// Change callback fired with the new value.
pub type ParamChangeFn = Rc<dyn Fn(&Value)>;

type AggregateChange = Rc<RefCell<Option<Rc<dyn Fn(&str, &Value)>>>>;

/// One live parameter on a controller instance.
pub struct Param {
    name: String,
    default: Value,
    required: bool,
    ty: Option<ParamType>,
    value: RefCell<Value>,
    on_change: RefCell<Option<ParamChangeFn>>,
    // shared with the owning map for cascading notification
    aggregate: AggregateChange,
}

impl Param {
    fn from_decl(decl: &ParamDecl, aggregate: AggregateChange) -> Self {
        // The default is applied without validation: a required param may
        // legitimately start out empty and be filled in at mapping time.
        Self {
            name: decl.name.clone(),
            default: decl.default.clone(),
            required: decl.required,
            ty: decl.ty,
            value: RefCell::new(decl.default.clone()),
            on_change: RefCell::new(None),
            aggregate,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn default_value(&self) -> &Value {
        &self.default
    }

    pub fn required(&self) -> bool {
        self.required
    }

    pub fn param_type(&self) -> Option<ParamType> {
        self.ty
    }

    /// Current value.
    pub fn value(&self) -> Value {
        self.value.borrow().clone()
    }

    /// Register the change callback (replacing any previous one).
    pub fn set_on_change(&self, callback: ParamChangeFn) {
        *self.on_change.borrow_mut() = Some(callback);
    }

    /// Set a new value.
    ///
    /// `None` models an absent assignment and is a silent no-op — but only
    /// after the required check, so assigning nothing to a required param is
    /// still a validation failure. An unchanged value suppresses the change
    /// event. Change detection compares `Value` equality directly; a caller
    /// that rebuilds an identical structure observes "no change", matching
    /// the shallow-comparison semantics of the source design.
    ///
    /// Returns whether the stored value changed.
    pub fn set_value(&self, value: Option<Value>) -> Result<bool> {
        if self.required && is_empty(value.as_ref()) {
            return Err(Error::validation(format!(
                "param '{}' is required",
                self.name
            )));
        }
        let Some(value) = value else {
            return Ok(false);
        };
        if let Some(ty) = self.ty {
            if !ty.matches(&value) {
                return Err(Error::validation(format!(
                    "param '{}' has invalid type for value {value}",
                    self.name
                )));
            }
        }
        if *self.value.borrow() == value {
            return Ok(false);
        }
        *self.value.borrow_mut() = value.clone();
        self.fire_change(&value);
        Ok(true)
    }

    pub(crate) fn fire_change(&self, value: &Value) {
        if let Some(callback) = self.on_change.borrow().clone() {
            callback(value);
        }
        if let Some(aggregate) = self.aggregate.borrow().clone() {
            aggregate(&self.name, value);
        }
    }
}

fn is_empty(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(_) => false,
    }
}

/// The parameter map owned by one controller instance.
#[derive(Default)]
pub struct ParamMap {
    params: HashMap<String, Rc<Param>>,
    aggregate: AggregateChange,
}

impl ParamMap {
    /// Instantiate fresh params from declarations.
    pub fn from_decls(decls: &[ParamDecl]) -> Self {
        let aggregate: AggregateChange = Rc::new(RefCell::new(None));
        let params = decls
            .iter()
            .map(|decl| {
                (
                    decl.name.clone(),
                    Rc::new(Param::from_decl(decl, Rc::clone(&aggregate))),
                )
            })
            .collect();
        Self { params, aggregate }
    }

    /// Apply instance values from a JSON object: each declared param is
    /// assigned the matching key's value, absent keys assign nothing (which
    /// fails for required params).
    pub fn apply(&self, values: &Value) -> Result<()> {
        let Some(object) = values.as_object() else {
            return Err(Error::InvalidType(
                "controller params must be a JSON object".into(),
            ));
        };
        for param in self.params.values() {
            param.set_value(object.get(param.name()).cloned())?;
        }
        Ok(())
    }

    /// Register the map-level aggregate change callback.
    pub fn set_on_change(&self, callback: Rc<dyn Fn(&str, &Value)>) {
        *self.aggregate.borrow_mut() = Some(callback);
    }

    pub fn get(&self, name: &str) -> Option<&Rc<Param>> {
        self.params.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Iterate over the live params.
    pub fn iter(&self) -> impl Iterator<Item = &Rc<Param>> {
        self.params.values()
    }
}
