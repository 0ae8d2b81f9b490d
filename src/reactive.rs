//! Reactive variables: shared values outside the store that notify
//! listeners on change.
//!
//! Listeners are one-shot. A subscriber that wants every change
//! re-registers from inside its listener, which keeps the listener set
//! bounded by the number of live subscribers.

use std::sync::Arc;

use parking_lot::Mutex;

type Listener<T> = Box<dyn FnOnce(&T) + Send>;

struct Inner<T> {
    value: T,
    listeners: Vec<(u64, Listener<T>)>,
    next_listener: u64,
}

/// A clonable handle to one shared value. Clones see the same value.
pub struct ReactiveVar<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Clone for ReactiveVar<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for ReactiveVar<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("ReactiveVar")
            .field("value", &inner.value)
            .field("listeners", &inner.listeners.len())
            .finish()
    }
}

impl<T: Clone + PartialEq + Send + 'static> ReactiveVar<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner { value, listeners: Vec::new(), next_listener: 0 })),
        }
    }

    pub fn get(&self) -> T {
        self.inner.lock().value.clone()
    }

    /// Replace the value. Setting an equal value is a no-op. Returns
    /// whether the value changed; pending listeners fire after the lock is
    /// released, so they may read or set this variable.
    pub fn set(&self, value: T) -> bool {
        let (listeners, current) = {
            let mut inner = self.inner.lock();
            if inner.value == value {
                return false;
            }
            inner.value = value;
            (std::mem::take(&mut inner.listeners), inner.value.clone())
        };
        if !listeners.is_empty() {
            tracing::trace!(listeners = listeners.len(), "reactive var changed");
        }
        for (_, listener) in listeners {
            listener(&current);
        }
        true
    }

    /// Run `listener` once, on the next change.
    pub fn on_next_change(&self, listener: impl FnOnce(&T) + Send + 'static) -> Mute<T> {
        let mut inner = self.inner.lock();
        inner.next_listener += 1;
        let id = inner.next_listener;
        inner.listeners.push((id, Box::new(listener)));
        Mute { var: self.clone(), id }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.lock().listeners.len()
    }
}

/// Cancels one pending listener.
pub struct Mute<T> {
    var: ReactiveVar<T>,
    id: u64,
}

impl<T> Mute<T> {
    /// Remove the listener if it has not fired yet. Returns whether it was
    /// still pending.
    pub fn mute(self) -> bool {
        let mut inner = self.var.inner.lock();
        let before = inner.listeners.len();
        inner.listeners.retain(|(id, _)| *id != self.id);
        inner.listeners.len() != before
    }
}
