//! Kind-keyed fan-out of inbound messages.
//!
//! Every decoded frame goes through [`Dispatcher::deliver`], which invokes
//! the listeners registered for the message's kind in registration order.
//!
//! Delivery works on a snapshot of the listener list taken before the
//! first listener runs, so listeners may subscribe or unsubscribe from
//! inside a callback. A listener removed mid-delivery is skipped if it has
//! not run yet; a listener added mid-delivery first sees the next message.
//!
//! One listener failing never stops the others: an `Err` is logged at
//! `warn`, a panic is caught and logged at `error`.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rally_protocol::{Kinded, Message, MessageKind};

/// Error type listeners may return. Anything that implements
/// `std::error::Error` converts into it with `?`.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// What a listener returns.
pub type ListenerResult = Result<(), ListenerError>;

type Listener = dyn Fn(&Message) -> ListenerResult + Send + Sync;

/// Handle to a registered listener, used to unsubscribe it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

struct Entry {
    id: ListenerId,
    active: AtomicBool,
    listener: Box<Listener>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: HashMap<MessageKind, Vec<Arc<Entry>>>,
}

/// Registry mapping each [`MessageKind`] to an ordered list of listeners.
///
/// Cloning is cheap and every clone shares the same registry, so the
/// connection's reader task and the application can hold one each.
#[derive(Clone, Default)]
pub struct Dispatcher {
    registry: Arc<Mutex<Registry>>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.lock();
        let mut counts: Vec<_> = registry
            .listeners
            .iter()
            .map(|(kind, list)| (*kind, list.len()))
            .collect();
        counts.sort();
        f.debug_struct("Dispatcher").field("listeners", &counts).finish()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `listener` to the list for `kind`.
    ///
    /// Registering the same closure twice yields two independent entries,
    /// each invoked once per message.
    pub fn subscribe<F>(&self, kind: MessageKind, listener: F) -> ListenerId
    where
        F: Fn(&Message) -> ListenerResult + Send + Sync + 'static,
    {
        let mut registry = self.lock();
        registry.next_id += 1;
        let id = ListenerId(registry.next_id);
        registry.listeners.entry(kind).or_default().push(Arc::new(Entry {
            id,
            active: AtomicBool::new(true),
            listener: Box::new(listener),
        }));
        tracing::trace!(%kind, %id, "listener subscribed");
        id
    }

    /// Subscribes to the kind that carries `T`, receiving the payload
    /// already narrowed.
    pub fn on<T, F>(&self, listener: F) -> ListenerId
    where
        T: Kinded,
        F: Fn(&T) -> ListenerResult + Send + Sync + 'static,
    {
        self.subscribe(T::KIND, move |message| match T::project(message) {
            Some(payload) => listener(payload),
            None => Ok(()),
        })
    }

    /// Removes the listener `id` from `kind`'s list.
    ///
    /// Returns `false` if no such listener is registered for `kind`.
    pub fn unsubscribe(&self, kind: MessageKind, id: ListenerId) -> bool {
        let mut registry = self.lock();
        let Some(list) = registry.listeners.get_mut(&kind) else {
            return false;
        };
        let Some(pos) = list.iter().position(|entry| entry.id == id) else {
            return false;
        };

        let entry = list.remove(pos);
        entry.active.store(false, Ordering::Release);
        if list.is_empty() {
            registry.listeners.remove(&kind);
        }
        tracing::trace!(%kind, %id, "listener unsubscribed");
        true
    }

    /// Number of listeners currently registered for `kind`.
    pub fn listener_count(&self, kind: MessageKind) -> usize {
        self.lock().listeners.get(&kind).map_or(0, Vec::len)
    }

    /// Invokes every listener for `message`'s kind, in registration order.
    ///
    /// Returns how many listeners completed without error. A message whose
    /// kind has no listeners is dropped silently.
    pub fn deliver(&self, message: &Message) -> usize {
        let kind = message.kind();
        let snapshot: Vec<Arc<Entry>> = self
            .lock()
            .listeners
            .get(&kind)
            .cloned()
            .unwrap_or_default();

        let mut succeeded = 0;
        for entry in snapshot {
            if !entry.active.load(Ordering::Acquire) {
                continue;
            }

            match panic::catch_unwind(AssertUnwindSafe(|| (entry.listener)(message))) {
                Ok(Ok(())) => succeeded += 1,
                Ok(Err(error)) => {
                    tracing::warn!(%kind, id = %entry.id, %error, "listener failed");
                }
                Err(payload) => {
                    let reason = payload
                        .downcast_ref::<&str>()
                        .map(|s| (*s).to_owned())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "non-string panic payload".to_owned());
                    tracing::error!(%kind, id = %entry.id, %reason, "listener panicked");
                }
            }
        }
        succeeded
    }

    // The lock is never held while a listener runs, so a poisoned lock
    // still guards a consistent registry.
    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// =========================================================================
// Tests
// =========================================================================
