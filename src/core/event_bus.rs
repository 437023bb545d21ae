//! Pub/Sub event bus for player change notifications.
//!
//! Architecture:
//! - Observers subscribe to an event type with a callback (immediate invocation)
//! - emit() invokes callbacks immediately AND queues the event
//! - poll() / drain::<E>() return queued events for batch processing in a host loop
//!
//! Callback order: FIFO (first-subscribed, first-called) within same event type.
//! Cross-type order undefined - don't rely on ordering between different event types.
//!
//! Callbacks run on the emitting thread (the player tick). They must not call
//! back into the player.

use log::warn;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// Maximum events in queue before oldest are evicted
const MAX_QUEUE_SIZE: usize = 1000;

/// Marker trait for events. Events must be Send + Sync + 'static.
pub trait Event: Any + Send + Sync + 'static {
    fn as_any(&self) -> &dyn Any;
    fn type_name(&self) -> &'static str;
}

impl<T: Any + Send + Sync + 'static> Event for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// Type-erased callback
type Callback = Arc<dyn Fn(&dyn Any) + Send + Sync>;

/// Boxed event for queue storage
pub type BoxedEvent = Box<dyn Event>;

/// Handle returned by `subscribe`, used to unsubscribe one callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Inner {
    subscribers: RwLock<HashMap<TypeId, Vec<(SubscriptionId, Callback)>>>,
    queue: Mutex<Vec<BoxedEvent>>,
    next_id: AtomicU64,
}

impl Inner {
    fn dispatch(&self, type_id: TypeId, event: &dyn Any) {
        // Clone the list so callbacks may subscribe without deadlocking
        let callbacks: Vec<Callback> = match self
            .subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&type_id)
        {
            Some(list) => list.iter().map(|(_, cb)| Arc::clone(cb)).collect(),
            None => return,
        };
        for cb in callbacks {
            cb(event);
        }
    }

    fn enqueue(&self, event: BoxedEvent) {
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        if queue.len() >= MAX_QUEUE_SIZE {
            let evict_count = queue.len() / 2;
            warn!("EventBus queue full ({} events), evicting oldest {}", queue.len(), evict_count);
            queue.drain(0..evict_count);
        }
        queue.push(event);
    }

    fn emit<E: Event + Clone>(&self, event: E) {
        self.dispatch(TypeId::of::<E>(), &event);
        self.enqueue(Box::new(event));
    }
}

/// Pub/Sub event bus with deferred processing support.
///
/// Cloning is cheap; clones share subscribers and queue.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_types", &self.inner.subscribers.read().map(|s| s.len()).unwrap_or(0))
            .field("queue_len", &self.queue_len())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                subscribers: RwLock::new(HashMap::new()),
                queue: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    // ========== Pub/Sub (immediate) ==========

    /// Subscribe to events of type E.
    ///
    /// # Example
    /// ```ignore
    /// bus.subscribe::<CurrentTimeChanged, _>(move |e| {
    ///     println!("now at {}", e.time);
    /// });
    /// ```
    pub fn subscribe<E, F>(&self, callback: F) -> SubscriptionId
    where
        E: Event,
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let wrapped: Callback = Arc::new(move |any: &dyn Any| {
            if let Some(event) = any.downcast_ref::<E>() {
                callback(event);
            }
        });
        self.inner
            .subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(TypeId::of::<E>())
            .or_default()
            .push((id, wrapped));
        id
    }

    /// Remove one callback. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.inner.subscribers.write().unwrap_or_else(|e| e.into_inner());
        for list in subscribers.values_mut() {
            if let Some(pos) = list.iter().position(|(sid, _)| *sid == id) {
                list.remove(pos);
                return true;
            }
        }
        false
    }

    /// Clear subscribers for type E
    pub fn unsubscribe_all<E: Event>(&self) {
        self.inner
            .subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&TypeId::of::<E>());
    }

    /// Invoke callbacks immediately, then queue the event.
    pub fn emit<E: Event + Clone>(&self, event: E) {
        self.inner.emit(event);
    }

    // ========== Deferred Processing ==========

    /// All events emitted since the last poll.
    pub fn poll(&self) -> Vec<BoxedEvent> {
        std::mem::take(&mut *self.inner.queue.lock().unwrap_or_else(|e| e.into_inner()))
    }

    /// Take queued events of type E, leaving the others queued.
    pub fn drain<E: Event + Clone>(&self) -> Vec<E> {
        let mut queue = self.inner.queue.lock().unwrap_or_else(|e| e.into_inner());
        let mut taken = Vec::new();
        queue.retain(|event| match downcast_event::<E>(event) {
            Some(e) => {
                taken.push(e.clone());
                false
            }
            None => true,
        });
        taken
    }

    // ========== Handle & Utilities ==========

    /// Emit-only handle for publishers.
    pub fn emitter(&self) -> EventEmitter {
        EventEmitter {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Clear all subscribers and queue
    pub fn clear(&self) {
        self.inner.subscribers.write().unwrap_or_else(|e| e.into_inner()).clear();
        self.inner.queue.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn has_subscribers<E: Event>(&self) -> bool {
        self.inner
            .subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&TypeId::of::<E>())
            .map(|v| !v.is_empty())
            .unwrap_or(false)
    }

    pub fn queue_len(&self) -> usize {
        self.inner.queue.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Emit-only handle sharing the bus.
#[derive(Clone)]
pub struct EventEmitter {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("queue_len", &self.inner.queue.lock().map(|q| q.len()).unwrap_or(0))
            .finish()
    }
}

impl EventEmitter {
    pub fn emit<E: Event + Clone>(&self, event: E) {
        self.inner.emit(event);
    }
}

/// Helper: downcast BoxedEvent to concrete type
///
/// IMPORTANT: Must explicitly deref to `dyn Event` before calling `as_any()`.
/// Without explicit deref, the blanket impl `Event for Box<dyn Event>` intercepts
/// the call and returns `&dyn Any` containing `Box<dyn Event>` instead of the
/// original type, causing downcast to always fail.
#[inline]
pub fn downcast_event<E: Event>(event: &BoxedEvent) -> Option<&E> {
    (**event).as_any().downcast_ref::<E>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[derive(Clone, Debug)]
    struct TestEvent {
        value: i32,
    }

    #[derive(Clone, Debug)]
    struct OtherEvent {
        msg: String,
    }

    #[test]
    fn test_subscribe_emit_immediate() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicI32::new(0));
        let c = Arc::clone(&counter);

        bus.subscribe::<TestEvent, _>(move |e| {
            c.fetch_add(e.value, Ordering::SeqCst);
        });

        bus.emit(TestEvent { value: 10 });
        assert_eq!(counter.load(Ordering::SeqCst), 10);
        bus.emit(TestEvent { value: 5 });
        assert_eq!(counter.load(Ordering::SeqCst), 15);
    }

    #[test]
    fn test_emit_queues_for_poll() {
        let bus = EventBus::new();
        bus.emit(TestEvent { value: 1 });
        bus.emit(TestEvent { value: 2 });
        bus.emit(OtherEvent { msg: "hello".into() });

        assert_eq!(bus.poll().len(), 3);
        assert_eq!(bus.poll().len(), 0);
    }

    #[test]
    fn test_drain_by_type() {
        let bus = EventBus::new();
        bus.emit(TestEvent { value: 1 });
        bus.emit(OtherEvent { msg: "x".into() });
        bus.emit(TestEvent { value: 2 });

        let values: Vec<i32> = bus.drain::<TestEvent>().iter().map(|e| e.value).collect();
        assert_eq!(values, vec![1, 2]);
        let rest = bus.poll();
        assert_eq!(rest.len(), 1);
        assert_eq!(downcast_event::<OtherEvent>(&rest[0]).map(|e| e.msg.as_str()), Some("x"));
    }

    #[test]
    fn test_unsubscribe_one() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicI32::new(0));
        let c1 = Arc::clone(&counter);
        let c2 = Arc::clone(&counter);
        let first = bus.subscribe::<TestEvent, _>(move |e| {
            c1.fetch_add(e.value, Ordering::SeqCst);
        });
        bus.subscribe::<TestEvent, _>(move |e| {
            c2.fetch_add(e.value * 100, Ordering::SeqCst);
        });

        assert!(bus.unsubscribe(first));
        assert!(!bus.unsubscribe(first));
        bus.emit(TestEvent { value: 1 });
        assert_eq!(counter.load(Ordering::SeqCst), 100);

        bus.unsubscribe_all::<TestEvent>();
        assert!(!bus.has_subscribers::<TestEvent>());
    }

    #[test]
    fn test_emitter_handle() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicI32::new(0));
        let c = Arc::clone(&counter);
        bus.subscribe::<TestEvent, _>(move |e| {
            c.fetch_add(e.value, Ordering::SeqCst);
        });

        bus.emitter().emit(TestEvent { value: 42 });
        assert_eq!(counter.load(Ordering::SeqCst), 42);
        assert_eq!(bus.queue_len(), 1);
    }
}
