//! Listener sets and their disposers.
//!
//! Every `on_*` registration returns a [`Subscription`]. Disposing it, or
//! dropping it, removes the callback from the set, so an adapter only ever
//! references callbacks whose owner still holds the handle.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::trace;

/// Type alias for a listener callback.
pub type Listener<E> = Arc<dyn Fn(E) + Send + Sync>;

type Registry<E> = Mutex<ListenerMap<E>>;

struct ListenerMap<E> {
    next_id: u64,
    listeners: BTreeMap<u64, Listener<E>>,
}

/// A set of callbacks receiving events of type `E`.
pub struct ListenerSet<E> {
    name: &'static str,
    inner: Arc<Registry<E>>,
}

impl<E> std::fmt::Debug for ListenerSet<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerSet")
            .field("name", &self.name)
            .field("len", &self.len())
            .finish()
    }
}

impl<E> ListenerSet<E> {
    /// Number of registered callbacks.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.inner).listeners.len()
    }

    /// Whether no callback is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E: Clone + Send + 'static> ListenerSet<E> {
    /// Create an empty set; `name` only labels log output.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: Arc::new(Mutex::new(ListenerMap {
                next_id: 0,
                listeners: BTreeMap::new(),
            })),
        }
    }

    /// Register a callback.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(E) + Send + Sync + 'static,
    {
        let id = {
            let mut map = lock(&self.inner);
            let id = map.next_id;
            map.next_id += 1;
            map.listeners.insert(id, Arc::new(callback));
            id
        };
        trace!(set = self.name, id, "listener registered");

        let weak: Weak<Registry<E>> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                lock(&inner).listeners.remove(&id);
            }
        })
    }

    /// Invoke every registered callback with `event`.
    ///
    /// The callbacks are snapshotted first and called without holding the
    /// lock, so a callback may subscribe or dispose re-entrantly.
    pub fn emit(&self, event: &E) {
        let snapshot: Vec<Listener<E>> = lock(&self.inner).listeners.values().cloned().collect();
        trace!(set = self.name, listeners = snapshot.len(), "emitting");
        for listener in snapshot {
            listener(event.clone());
        }
    }
}

fn lock<E>(registry: &Registry<E>) -> MutexGuard<'_, ListenerMap<E>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Disposer for a registered callback.
///
/// The callback is released when [`dispose`](Self::dispose) is called or the
/// handle is dropped, whichever comes first.
#[must_use = "dropping a Subscription immediately unsubscribes the callback"]
pub struct Subscription {
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.release.is_some())
            .finish()
    }
}

impl Subscription {
    /// Wrap a release function.
    pub fn new(release: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// Remove the callback now.
    pub fn dispose(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_now();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_emit_reaches_every_listener() {
        let set = ListenerSet::<u32>::new("test");
        let total = Arc::new(AtomicUsize::new(0));

        let t1 = Arc::clone(&total);
        let _a = set.subscribe(move |v| {
            t1.fetch_add(v as usize, Ordering::SeqCst);
        });
        let t2 = Arc::clone(&total);
        let _b = set.subscribe(move |v| {
            t2.fetch_add(v as usize * 10, Ordering::SeqCst);
        });

        set.emit(&2);
        assert_eq!(total.load(Ordering::SeqCst), 22);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_dispose_and_drop_release() {
        let set = ListenerSet::<()>::new("test");
        let a = set.subscribe(|()| {});
        let b = set.subscribe(|()| {});
        assert_eq!(set.len(), 2);

        a.dispose();
        assert_eq!(set.len(), 1);

        drop(b);
        assert!(set.is_empty());
    }

    #[test]
    fn test_listener_can_dispose_itself_while_emitting() {
        let set = ListenerSet::<()>::new("test");
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let calls = Arc::new(AtomicUsize::new(0));

        let slot_in = Arc::clone(&slot);
        let calls_in = Arc::clone(&calls);
        let sub = set.subscribe(move |()| {
            calls_in.fetch_add(1, Ordering::SeqCst);
            if let Some(sub) = slot_in.lock().unwrap().take() {
                sub.dispose();
            }
        });
        *slot.lock().unwrap() = Some(sub);

        set.emit(&());
        set.emit(&());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(set.is_empty());
    }

    #[test]
    fn test_subscription_outliving_set_is_harmless() {
        let set = ListenerSet::<()>::new("test");
        let sub = set.subscribe(|()| {});
        drop(set);
        sub.dispose();
    }
}
