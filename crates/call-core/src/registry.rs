//! Registry of calls that have not ended
//!
//! [`ActiveCallRegistry`] keeps a map from call id to call holding exactly
//! the tracked calls whose state is not `Ended`. It subscribes to every
//! call it holds and evicts the call as soon as it observes the transition
//! into `Ended`, then tells its own [`ActiveCallsListener`]s.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use tracing::debug;

use crate::call::{Call, CallId, CallState};
use crate::error::{CallCoreResult, ListenerResult};
use crate::events::{CallChangeEvent, CallChangeListener};
use crate::listeners::{CopyOnWrite, ListenerRegistry};

/// Observer of calls leaving the active set because they ended
pub trait ActiveCallsListener: Send + Sync {
    fn active_call_ended(&self, call: &Arc<Call>) -> ListenerResult;
}

/// Set of non-ended calls keyed by call id
pub struct ActiveCallRegistry {
    calls: CopyOnWrite<HashMap<CallId, Arc<Call>>>,
    relay: Arc<RegistryRelay>,
    listeners: ListenerRegistry<dyn ActiveCallsListener>,
}

impl ActiveCallRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|self_ref: &Weak<Self>| Self {
            calls: CopyOnWrite::new(HashMap::new()),
            relay: Arc::new(RegistryRelay {
                registry: self_ref.clone(),
            }),
            listeners: ListenerRegistry::new(),
        })
    }

    /// Start tracking `call`
    ///
    /// Calls that already ended are not tracked. Returns `false` if the call
    /// was not inserted.
    pub fn add_call(&self, call: &Arc<Call>) -> CallCoreResult<bool> {
        if call.state() == CallState::Ended {
            debug!(call_id = %call.id(), "Not tracking ended call");
            return Ok(false);
        }

        let inserted = self.calls.update(|calls| {
            if calls.contains_key(call.id()) {
                false
            } else {
                calls.insert(call.id().clone(), call.clone());
                true
            }
        });
        if !inserted {
            return Ok(false);
        }
        call.add_call_change_listener(self.relay.clone());
        debug!(call_id = %call.id(), "Call added to active set");

        // The call may have ended between the check above and the subscription
        if call.state() == CallState::Ended {
            self.evict_ended(call)?;
            return Ok(false);
        }
        Ok(true)
    }

    /// Stop tracking `call` without raising an end-of-call notification
    pub fn remove_call(&self, call: &Arc<Call>) -> bool {
        let removed = self.remove_entry(call);
        if removed {
            let relay: Arc<dyn CallChangeListener> = self.relay.clone();
            call.remove_call_change_listener(&relay);
            debug!(call_id = %call.id(), "Call removed from active set");
        }
        removed
    }

    fn remove_entry(&self, call: &Arc<Call>) -> bool {
        self.calls.update(|calls| match calls.get(call.id()) {
            Some(tracked) if Arc::ptr_eq(tracked, call) => {
                calls.remove(call.id());
                true
            }
            _ => false,
        })
    }

    fn evict_ended(&self, call: &Arc<Call>) -> CallCoreResult<()> {
        if !self.remove_entry(call) {
            return Ok(());
        }
        let relay: Arc<dyn CallChangeListener> = self.relay.clone();
        call.remove_call_change_listener(&relay);
        debug!(call_id = %call.id(), "Ended call evicted from active set");

        self.listeners
            .dispatch("active_call_ended", |listener| listener.active_call_ended(call))
    }

    /// Snapshot of the active calls
    pub fn get_active_calls(&self) -> Vec<Arc<Call>> {
        self.calls.load().values().cloned().collect()
    }

    pub fn get_active_call_count(&self) -> usize {
        self.calls.load().len()
    }

    pub fn find_call(&self, call_id: &CallId) -> Option<Arc<Call>> {
        self.calls.load().get(call_id).cloned()
    }

    pub fn contains(&self, call_id: &CallId) -> bool {
        self.calls.load().contains_key(call_id)
    }

    pub fn add_listener(&self, listener: Arc<dyn ActiveCallsListener>) -> bool {
        self.listeners.add(listener)
    }

    pub fn remove_listener(&self, listener: &Arc<dyn ActiveCallsListener>) -> bool {
        self.listeners.remove(listener)
    }
}

impl fmt::Debug for ActiveCallRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveCallRegistry")
            .field("active_calls", &self.get_active_call_count())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

struct RegistryRelay {
    registry: Weak<ActiveCallRegistry>,
}

impl CallChangeListener for RegistryRelay {
    fn call_state_changed(&self, event: &CallChangeEvent) -> ListenerResult {
        if event.new_state != CallState::Ended {
            return Ok(());
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.evict_ended(&event.call)?;
        }
        Ok(())
    }
}
