//! Named pub/sub messaging bus
//!
//! Topics are created lazily and live for the life of the bus. Dispatch is
//! synchronous and re-entrant: a subscriber may itself publish, producing a
//! nested dispatch chain. No recursion guard is applied; a subscriber that
//! publishes its own topic unconditionally will recurse until stack overflow,
//! which is treated as a programmer error.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use serde_json::Value;
use tracing::debug;

use crate::error::{require_name, Result};

/// Callback bound to a topic. Receives the published payload as an ordered
/// sequence; a non-sequence message is wrapped as a single-element one before
/// dispatch.
pub type SubscriberFn = Rc<dyn Fn(&[Value])>;

/// Opaque handle returned by [`Messaging::subscribe`]; removes exactly that
/// binding when passed to [`Messaging::unsubscribe`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    topic: String,
    id: u64,
}

impl SubscriptionHandle {
    /// Topic this handle is bound to.
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

/// A persistent named channel, exposed for introspection.
///
/// The message payload is transient: it is set immediately before subscriber
/// dispatch and cleared right after, so it is only observable from within a
/// subscriber callback.
pub struct MessagingTopic {
    topic: String,
    message: RefCell<Value>,
}

impl MessagingTopic {
    fn new(topic: String) -> Rc<Self> {
        Rc::new(Self {
            topic,
            message: RefCell::new(Value::Null),
        })
    }

    /// The topic name.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// The in-flight message, `Value::Null` outside of a publish.
    pub fn message(&self) -> Value {
        self.message.borrow().clone()
    }

    fn set_message(&self, message: Value) {
        *self.message.borrow_mut() = message;
    }
}

struct Subscriber {
    id: u64,
    callback: SubscriberFn,
}

#[derive(Default)]
struct BusInner {
    topics: HashMap<String, Rc<MessagingTopic>>,
    subscribers: HashMap<String, Vec<Subscriber>>,
    next_id: u64,
}

/// The messaging bus. Shared as `Rc<Messaging>`; interior mutability keeps
/// publish re-entrant.
#[derive(Default)]
pub struct Messaging {
    inner: RefCell<BusInner>,
}

impl Messaging {
    /// Create a bus with no topics.
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Invoke every subscriber bound to `topic`, in subscription order,
    /// passing `message` (wrapped as a one-element sequence when it is not
    /// already one). The topic's stored message is cleared afterwards.
    pub fn publish(&self, topic: &str, message: Option<Value>) -> Result<()> {
        require_name(topic, "topic")?;
        let topic_obj = self.get_or_create_topic(topic);
        topic_obj.set_message(message.clone().unwrap_or(Value::Null));

        let payload: Vec<Value> = match message {
            Some(Value::Array(items)) => items,
            Some(value) => vec![value],
            None => Vec::new(),
        };

        // Snapshot before dispatch: keeps nested publishes safe and pins the
        // subscriber list for this publish even if callbacks mutate it.
        let snapshot: Vec<SubscriberFn> = {
            let inner = self.inner.borrow();
            inner
                .subscribers
                .get(topic)
                .map(|subs| subs.iter().map(|s| Rc::clone(&s.callback)).collect())
                .unwrap_or_default()
        };

        debug!(topic, subscribers = snapshot.len(), "publishing");
        for callback in snapshot {
            callback(&payload);
        }

        // wipe clean, but keep the topic object alive
        topic_obj.set_message(Value::Null);
        Ok(())
    }

    /// Attach a listener to `topic`. The returned handle unsubscribes exactly
    /// this binding.
    pub fn subscribe(&self, topic: &str, callback: SubscriberFn) -> Result<SubscriptionHandle> {
        require_name(topic, "topic")?;
        self.get_or_create_topic(topic);
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_id;
        inner.next_id += 1;
        inner
            .subscribers
            .entry(topic.to_string())
            .or_default()
            .push(Subscriber { id, callback });
        Ok(SubscriptionHandle {
            topic: topic.to_string(),
            id,
        })
    }

    /// Remove the binding identified by `handle`. Unknown handles are a
    /// no-op.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        let mut inner = self.inner.borrow_mut();
        if let Some(subs) = inner.subscribers.get_mut(&handle.topic) {
            subs.retain(|s| s.id != handle.id);
        }
    }

    /// The persistent topic object for `topic`, created if absent.
    pub fn get_topic(&self, topic: &str) -> Result<Rc<MessagingTopic>> {
        require_name(topic, "topic")?;
        Ok(self.get_or_create_topic(topic))
    }

    /// Number of live subscriptions on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .borrow()
            .subscribers
            .get(topic)
            .map(|s| s.len())
            .unwrap_or(0)
    }

    fn get_or_create_topic(&self, topic: &str) -> Rc<MessagingTopic> {
        let mut inner = self.inner.borrow_mut();
        if let Some(existing) = inner.topics.get(topic) {
            return Rc::clone(existing);
        }
        let created = MessagingTopic::new(topic.to_string());
        inner.topics.insert(topic.to_string(), Rc::clone(&created));
        created
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use serde_json::json;

    #[test]
    fn test_publish_invokes_subscribers_in_order() {
        let bus = Messaging::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        for i in 0..3 {
            let log = Rc::clone(&log);
            bus.subscribe(
                "greet",
                Rc::new(move |_payload: &[Value]| log.borrow_mut().push(i)),
            )
            .unwrap();
        }

        bus.publish("greet", None).unwrap();
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn test_non_array_message_is_wrapped() {
        let bus = Messaging::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen2 = Rc::clone(&seen);
        bus.subscribe(
            "t",
            Rc::new(move |payload: &[Value]| seen2.borrow_mut().push(payload.to_vec())),
        )
        .unwrap();

        bus.publish("t", Some(json!("hello"))).unwrap();
        bus.publish("t", Some(json!([1, 2]))).unwrap();

        let seen = seen.borrow();
        assert_eq!(seen[0], vec![json!("hello")]);
        assert_eq!(seen[1], vec![json!(1), json!(2)]);
    }

    #[test]
    fn test_message_visible_during_dispatch_and_cleared_after() {
        let bus = Messaging::new();
        let topic = bus.get_topic("t").unwrap();
        let observed = Rc::new(RefCell::new(Value::Null));

        let topic2 = Rc::clone(&topic);
        let observed2 = Rc::clone(&observed);
        bus.subscribe(
            "t",
            Rc::new(move |_| *observed2.borrow_mut() = topic2.message()),
        )
        .unwrap();

        bus.publish("t", Some(json!({"n": 1}))).unwrap();
        assert_eq!(*observed.borrow(), json!({"n": 1}));
        assert_eq!(topic.message(), Value::Null);
    }

    #[test]
    fn test_unsubscribe_removes_exactly_one_binding() {
        let bus = Messaging::new();
        let count = Rc::new(RefCell::new(0));

        let c1 = Rc::clone(&count);
        let handle = bus
            .subscribe("t", Rc::new(move |_| *c1.borrow_mut() += 1))
            .unwrap();
        let c2 = Rc::clone(&count);
        bus.subscribe("t", Rc::new(move |_| *c2.borrow_mut() += 10))
            .unwrap();

        bus.unsubscribe(&handle);
        bus.publish("t", None).unwrap();
        assert_eq!(*count.borrow(), 10);
    }

    #[test]
    fn test_reentrant_publish() {
        let bus = Messaging::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        let inner_log = Rc::clone(&log);
        bus.subscribe("inner", Rc::new(move |_| inner_log.borrow_mut().push("inner")))
            .unwrap();

        let bus2 = Rc::clone(&bus);
        let outer_log = Rc::clone(&log);
        bus.subscribe(
            "outer",
            Rc::new(move |_| {
                outer_log.borrow_mut().push("outer");
                bus2.publish("inner", None).unwrap();
            }),
        )
        .unwrap();

        bus.publish("outer", None).unwrap();
        assert_eq!(*log.borrow(), vec!["outer", "inner"]);
    }

    #[test]
    fn test_empty_topic_rejected() {
        let bus = Messaging::new();
        assert!(matches!(
            bus.publish("", None),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            bus.subscribe("", Rc::new(|_| {})),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(bus.get_topic(""), Err(Error::InvalidArgument(_))));
    }
}
