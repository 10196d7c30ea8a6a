//! Reactive key/value application model
//!
//! Values are stored as owned [`serde_json::Value`]s, so storing a value is
//! inherently a deep copy: callers cannot mutate stored state behind the
//! store's back, and every observable change flows through the store's API
//! and triggers exactly one notification.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use serde_json::Value;
use tracing::warn;

use crate::config::RunMode;
use crate::error::{require_name, Result};
use crate::messaging::{Messaging, SubscriberFn, SubscriptionHandle};

/// Topic a model key publishes its change notifications on.
pub fn model_topic(key: &str) -> String {
    format!("/model/{key}")
}

/// Shared key/value store with per-key change notification.
pub struct ModelStore {
    entries: RefCell<HashMap<String, Value>>,
    references: RefCell<HashMap<String, Rc<ModelReference>>>,
    bus: Rc<Messaging>,
    mode: RefCell<RunMode>,
}

impl ModelStore {
    /// Create a store publishing notifications on `bus`.
    pub fn new(bus: Rc<Messaging>) -> Rc<Self> {
        Rc::new(Self {
            entries: RefCell::new(HashMap::new()),
            references: RefCell::new(HashMap::new()),
            bus,
            mode: RefCell::new(RunMode::default()),
        })
    }

    /// Switch the debug logging behavior of [`ModelStore::get`].
    pub fn set_mode(&self, mode: RunMode) {
        *self.mode.borrow_mut() = mode;
    }

    /// Store `value` under `key` (created if absent) and notify.
    pub fn set(&self, key: &str, value: Value) -> Result<()> {
        require_name(key, "key")?;
        self.entries.borrow_mut().insert(key.to_string(), value);
        self.notify(key)
    }

    /// Append `value` to an existing entry and notify.
    ///
    /// A scalar entry is promoted to a one-element array first; an array
    /// `value` appends element-wise. Behaves as [`ModelStore::set`] when the
    /// key holds no value.
    pub fn add(&self, key: &str, value: Value) -> Result<()> {
        require_name(key, "key")?;
        if !self.contains(key)? {
            return self.set(key, value);
        }
        {
            let mut entries = self.entries.borrow_mut();
            let slot = entries
                .entry(key.to_string())
                .or_insert(Value::Null);
            if !slot.is_array() {
                let existing = slot.take();
                *slot = Value::Array(vec![existing]);
            }
            if let Value::Array(items) = slot {
                match value {
                    Value::Array(new_items) => items.extend(new_items),
                    other => items.push(other),
                }
            }
        }
        self.notify(key)
    }

    /// The stored value, or `Value::Null` when the key is absent or removed.
    pub fn get(&self, key: &str) -> Result<Value> {
        require_name(key, "key")?;
        let entries = self.entries.borrow();
        match entries.get(key) {
            Some(value) => Ok(value.clone()),
            None => {
                if self.mode.borrow().catches_dispatch_errors() {
                    warn!(key, "no model entry found");
                }
                Ok(Value::Null)
            }
        }
    }

    /// Null out the value under `key` and notify. The key registry entry
    /// remains, so a reference handed out earlier stays valid.
    pub fn remove(&self, key: &str) -> Result<()> {
        require_name(key, "key")?;
        self.entries.borrow_mut().insert(key.to_string(), Value::Null);
        self.notify(key)
    }

    /// Whether a non-null value is stored under `key`.
    pub fn contains(&self, key: &str) -> Result<bool> {
        require_name(key, "key")?;
        Ok(self
            .entries
            .borrow()
            .get(key)
            .map(|v| !v.is_null())
            .unwrap_or(false))
    }

    /// Publish the per-key change topic. Triggered automatically by every
    /// mutating call; also the hook a template/data-binding collaborator uses
    /// to force re-notification.
    pub fn notify(&self, key: &str) -> Result<()> {
        require_name(key, "key")?;
        self.bus.publish(&model_topic(key), None)
    }

    /// The observable proxy for `key`, created if absent.
    pub fn reference(self: &Rc<Self>, key: &str) -> Result<Rc<ModelReference>> {
        require_name(key, "key")?;
        let mut references = self.references.borrow_mut();
        if let Some(existing) = references.get(key) {
            return Ok(Rc::clone(existing));
        }
        let created = Rc::new(ModelReference {
            key: key.to_string(),
            store: Rc::downgrade(self),
        });
        references.insert(key.to_string(), Rc::clone(&created));
        Ok(created)
    }

    /// Subscribe `callback` to changes of `key`.
    pub fn add_observer(&self, key: &str, callback: SubscriberFn) -> Result<SubscriptionHandle> {
        require_name(key, "key")?;
        self.bus.subscribe(&model_topic(key), callback)
    }

    /// Remove a change subscription.
    pub fn remove_observer(&self, handle: &SubscriptionHandle) {
        self.bus.unsubscribe(handle);
    }

    /// The bus this store notifies on.
    pub fn bus(&self) -> &Rc<Messaging> {
        &self.bus
    }
}

/// Observable proxy for one model key. Holds no data of its own; get/set
/// delegate to the owning store.
pub struct ModelReference {
    key: String,
    store: Weak<ModelStore>,
}

impl ModelReference {
    /// The model key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The change-notification topic for this key.
    pub fn topic(&self) -> String {
        model_topic(&self.key)
    }

    /// Current stored value (`Value::Null` once the store is gone).
    pub fn get(&self) -> Result<Value> {
        match self.store.upgrade() {
            Some(store) => store.get(&self.key),
            None => Ok(Value::Null),
        }
    }

    /// Store a new value through the owning store.
    pub fn set(&self, value: Value) -> Result<()> {
        if let Some(store) = self.store.upgrade() {
            store.set(&self.key, value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use serde_json::json;
    use std::cell::RefCell;

    fn store() -> Rc<ModelStore> {
        ModelStore::new(Messaging::new())
    }

    #[test]
    fn test_set_get_round_trip() {
        let model = store();
        let value = json!({"name": "ada", "tags": [1, 2]});
        model.set("profile", value.clone()).unwrap();

        let read = model.get("profile").unwrap();
        assert_eq!(read, value);
    }

    #[test]
    fn test_stored_value_does_not_alias_caller_state() {
        let model = store();
        let mut value = json!([1, 2, 3]);
        model.set("nums", value.clone()).unwrap();

        // mutating the caller's copy must not affect the stored value
        value.as_array_mut().unwrap().push(json!(4));
        assert_eq!(model.get("nums").unwrap(), json!([1, 2, 3]));
    }

    #[test]
    fn test_add_appends_and_promotes() {
        let model = store();
        model.set("list", json!([1, 2, 3])).unwrap();
        model.add("list", json!(4)).unwrap();
        assert_eq!(model.get("list").unwrap(), json!([1, 2, 3, 4]));

        model.set("scalar", json!("a")).unwrap();
        model.add("scalar", json!("b")).unwrap();
        assert_eq!(model.get("scalar").unwrap(), json!(["a", "b"]));

        // array argument appends element-wise
        model.add("list", json!([5, 6])).unwrap();
        assert_eq!(model.get("list").unwrap(), json!([1, 2, 3, 4, 5, 6]));

        // unknown key falls back to set
        model.add("fresh", json!(1)).unwrap();
        assert_eq!(model.get("fresh").unwrap(), json!(1));
    }

    #[test]
    fn test_remove_clears_value_but_keeps_key() {
        let model = store();
        model.set("k", json!(42)).unwrap();
        assert!(model.contains("k").unwrap());

        model.remove("k").unwrap();
        assert!(!model.contains("k").unwrap());
        assert_eq!(model.get("k").unwrap(), Value::Null);
    }

    #[test]
    fn test_every_mutation_notifies_exactly_once() {
        let model = store();
        let count = Rc::new(RefCell::new(0));
        let c = Rc::clone(&count);
        model
            .add_observer("k", Rc::new(move |_| *c.borrow_mut() += 1))
            .unwrap();

        model.set("k", json!(1)).unwrap();
        model.add("k", json!(2)).unwrap();
        model.remove("k").unwrap();
        assert_eq!(*count.borrow(), 3);
    }

    #[test]
    fn test_reference_delegates_to_store() {
        let model = store();
        let reference = model.reference("k").unwrap();
        assert_eq!(reference.topic(), "/model/k");

        reference.set(json!("v")).unwrap();
        assert_eq!(model.get("k").unwrap(), json!("v"));
        assert_eq!(reference.get().unwrap(), json!("v"));

        // one reference per key
        assert!(Rc::ptr_eq(&reference, &model.reference("k").unwrap()));
    }

    #[test]
    fn test_empty_key_rejected() {
        let model = store();
        assert!(matches!(
            model.set("", json!(1)),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(model.get(" "), Err(Error::InvalidArgument(_))));
    }
}
