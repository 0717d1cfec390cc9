//! Snapshot collections and listener fan-out
//!
//! Every mutable collection in call-core (listener lists, call sets,
//! conference-member lists, the active-call map) is a [`CopyOnWrite`]:
//! readers load the current immutable snapshot without locking, writers
//! serialise on a dedicated mutex, clone the snapshot, edit the clone and
//! swap it in. A reader therefore never observes a partially mutated
//! collection.
//!
//! [`ListenerRegistry`] builds the observer fan-out on top of it: the
//! snapshot is taken, the lock (if any) is released, and only then are the
//! listeners invoked. Listener callbacks are never run while a collection
//! lock is held.
//!
//! [`DispatchQueue`] gives a single object (a call or a peer) a total order
//! over its state-change notifications without holding any lock across a
//! callback.

use std::cell::Cell;
use std::collections::VecDeque;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, warn};

use crate::error::{CallCoreError, CallCoreResult, ListenerError, ListenerResult};

/// Immutable-snapshot cell with serialised copy-on-write updates
pub struct CopyOnWrite<T> {
    current: ArcSwap<T>,
    write_lock: Mutex<()>,
}

impl<T: Clone> CopyOnWrite<T> {
    /// Create a cell holding `value`
    pub fn new(value: T) -> Self {
        Self {
            current: ArcSwap::from_pointee(value),
            write_lock: Mutex::new(()),
        }
    }

    /// Current snapshot; never blocks and never observes a torn value
    pub fn load(&self) -> Arc<T> {
        self.current.load_full()
    }

    /// Apply `f` to a fresh copy and publish it
    ///
    /// Writers are serialised so no update is lost. The copy is published
    /// only when `f` reports a change, which keeps no-op mutations from
    /// allocating a new snapshot.
    pub fn update<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut T) -> bool,
    {
        let _guard = self.write_lock.lock();
        let mut next = T::clone(&self.current.load());
        let changed = f(&mut next);
        if changed {
            self.current.store(Arc::new(next));
        }
        changed
    }
}

impl<T: Clone + Default> Default for CopyOnWrite<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for CopyOnWrite<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("CopyOnWrite").field(&*self.current.load()).finish()
    }
}

/// Identity comparison that ignores trait-object vtables
pub(crate) fn same_instance<L: ?Sized>(a: &Arc<L>, b: &Arc<L>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// Registry of listeners of one kind
///
/// Registration is idempotent: adding the same `Arc` twice keeps a single
/// entry, removing an unknown listener does nothing.
pub struct ListenerRegistry<L: ?Sized> {
    listeners: CopyOnWrite<Vec<Arc<L>>>,
}

impl<L: ?Sized> ListenerRegistry<L> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            listeners: CopyOnWrite::new(Vec::new()),
        }
    }

    /// Register a listener; returns `false` if it was already registered
    pub fn add(&self, listener: Arc<L>) -> bool {
        self.listeners.update(|listeners| {
            if listeners.iter().any(|l| same_instance(l, &listener)) {
                false
            } else {
                listeners.push(listener);
                true
            }
        })
    }

    /// Unregister a listener; returns `false` if it was not registered
    pub fn remove(&self, listener: &Arc<L>) -> bool {
        self.listeners.update(|listeners| {
            let before = listeners.len();
            listeners.retain(|l| !same_instance(l, listener));
            listeners.len() != before
        })
    }

    /// Check whether `listener` is registered
    pub fn contains(&self, listener: &Arc<L>) -> bool {
        self.listeners.load().iter().any(|l| same_instance(l, listener))
    }

    /// Point-in-time copy of the registered listeners
    pub fn snapshot(&self) -> Arc<Vec<Arc<L>>> {
        self.listeners.load()
    }

    /// Number of registered listeners
    pub fn len(&self) -> usize {
        self.listeners.load().len()
    }

    /// Whether no listener is registered
    pub fn is_empty(&self) -> bool {
        self.listeners.load().is_empty()
    }

    /// Deliver an event to every listener of the current snapshot
    ///
    /// A listener returning [`ListenerError::Failed`] is logged and skipped.
    /// [`ListenerError::Fatal`] stops delivery and is returned to the caller.
    pub fn dispatch<F>(&self, event: &'static str, mut deliver: F) -> CallCoreResult<()>
    where
        F: FnMut(&L) -> ListenerResult,
    {
        let snapshot = self.snapshot();
        for listener in snapshot.iter() {
            match deliver(&**listener) {
                Ok(()) => {}
                Err(ListenerError::Failed(reason)) => {
                    warn!(event, %reason, "Listener failed, continuing delivery");
                }
                Err(ListenerError::Fatal(reason)) => {
                    error!(event, %reason, "Fatal listener fault, aborting delivery");
                    return Err(CallCoreError::ListenerAborted {
                        event: event.to_string(),
                        reason,
                    });
                }
            }
        }
        Ok(())
    }
}

impl<L: ?Sized> Default for ListenerRegistry<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: ?Sized> std::fmt::Debug for ListenerRegistry<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.len())
            .finish()
    }
}

struct QueueState<E> {
    pending: VecDeque<Pending<E>>,
    draining: bool,
}

thread_local! {
    /// Depth of queue drains running on this thread
    static DELIVERING: Cell<usize> = const { Cell::new(0) };
}

enum Slot {
    Waiting,
    Ready(CallCoreResult<()>),
    Taken,
}

/// Outcome of one queued notification, handed back to whoever queued it
pub(crate) struct Delivery {
    slot: Mutex<Slot>,
    done: Condvar,
}

impl Delivery {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            slot: Mutex::new(Slot::Waiting),
            done: Condvar::new(),
        })
    }

    fn complete(&self, result: CallCoreResult<()>) {
        let mut slot = self.slot.lock();
        if matches!(*slot, Slot::Waiting) {
            *slot = Slot::Ready(result);
            self.done.notify_all();
        }
    }

    fn try_take(&self) -> Option<CallCoreResult<()>> {
        let mut slot = self.slot.lock();
        match std::mem::replace(&mut *slot, Slot::Taken) {
            Slot::Ready(result) => Some(result),
            other => {
                *slot = other;
                None
            }
        }
    }

    fn wait(&self) -> CallCoreResult<()> {
        let mut slot = self.slot.lock();
        loop {
            match std::mem::replace(&mut *slot, Slot::Taken) {
                Slot::Ready(result) => return result,
                Slot::Taken => return Ok(()),
                Slot::Waiting => {
                    *slot = Slot::Waiting;
                    self.done.wait(&mut slot);
                }
            }
        }
    }
}

/// A queued event; completes its delivery with an error if dropped undelivered
struct Pending<E> {
    event: E,
    delivery: Arc<Delivery>,
}

impl<E> Drop for Pending<E> {
    fn drop(&mut self) {
        self.delivery.complete(Err(CallCoreError::ListenerAborted {
            event: "queued notification".to_string(),
            reason: "delivery interrupted by a panicking listener".to_string(),
        }));
    }
}

/// Ordered delivery of one object's notifications
///
/// The owner enqueues while still holding its own state lock, so queue order
/// equals transition order. After releasing the state lock it calls
/// [`DispatchQueue::drain`]. Whichever thread finds the queue idle delivers
/// everything pending and stores each event's outcome in that event's
/// [`Delivery`]. A caller that finds another thread delivering waits for its
/// own event and gets its own outcome back, unless it is itself running
/// inside a delivery: then it returns at once and the event follows the one
/// in flight.
pub(crate) struct DispatchQueue<E> {
    state: Mutex<QueueState<E>>,
}

impl<E> DispatchQueue<E> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                pending: VecDeque::new(),
                draining: false,
            }),
        }
    }

    pub(crate) fn enqueue(&self, event: E) -> Arc<Delivery> {
        let delivery = Delivery::new();
        self.state.lock().pending.push_back(Pending {
            event,
            delivery: delivery.clone(),
        });
        delivery
    }

    /// Deliver pending events, or wait for another thread to deliver ours
    ///
    /// Returns the outcome of the event `delivery` belongs to. Faults of
    /// other callers' events are handed to those callers.
    pub(crate) fn drain<F>(&self, delivery: &Delivery, mut deliver: F) -> CallCoreResult<()>
    where
        F: FnMut(&E) -> CallCoreResult<()>,
    {
        let busy = {
            let mut state = self.state.lock();
            if state.draining {
                true
            } else {
                state.draining = true;
                false
            }
        };
        if busy {
            if let Some(result) = delivery.try_take() {
                return result;
            }
            // Waiting from inside a listener could wait on ourselves
            if DELIVERING.with(Cell::get) > 0 {
                debug!("Notification deferred behind the delivery in progress");
                return Ok(());
            }
            return delivery.wait();
        }

        let mut guard = DrainGuard { queue: self, armed: true };
        {
            let _scope = DeliveryScope::enter();
            loop {
                // Going idle must happen under the same lock as the empty pop,
                // otherwise an event enqueued in between would be stranded
                let next = {
                    let mut state = self.state.lock();
                    let next = state.pending.pop_front();
                    if next.is_none() {
                        state.draining = false;
                    }
                    next
                };
                let Some(pending) = next else { break };
                let result = deliver(&pending.event);
                pending.delivery.complete(result);
            }
        }
        guard.armed = false;
        delivery.wait()
    }
}

/// Marks this thread as delivering for the lifetime of the value
struct DeliveryScope;

impl DeliveryScope {
    fn enter() -> Self {
        DELIVERING.with(|depth| depth.set(depth.get() + 1));
        Self
    }
}

impl Drop for DeliveryScope {
    fn drop(&mut self) {
        DELIVERING.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Resets the queue if a listener panics mid-drain
///
/// Events still pending are dropped so their callers stop waiting.
struct DrainGuard<'a, E> {
    queue: &'a DispatchQueue<E>,
    armed: bool,
}

impl<E> Drop for DrainGuard<'_, E> {
    fn drop(&mut self) {
        if self.armed {
            let stranded = {
                let mut state = self.queue.state.lock();
                state.draining = false;
                std::mem::take(&mut state.pending)
            };
            drop(stranded);
        }
    }
}
