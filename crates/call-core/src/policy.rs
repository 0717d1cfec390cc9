//! Cross-call admission and hold policy
//!
//! [`CallAdmissionPolicy`] watches every call the protocol providers report
//! and keeps the user's attention on one session at a time:
//!
//! 1. **Admission** - a newly initiated or received call is rejected with
//!    "busy here" when call waiting is disabled and another tracked call is
//!    in progress, or when do-not-disturb rejection applies and the account's
//!    presence is in the busy band. Otherwise the call is tracked.
//! 2. **Hold** - when a tracked call goes from `Initialization` to
//!    `InProgress`, or one of its peers becomes `Connected`, every other
//!    tracked in-progress call is put on hold. Calls that share the
//!    triggering call's conference are left alone.
//! 3. **Cleanup** - an ended call is untracked and unsubscribed.
//!
//! Telephony operations are best effort. A failed hold or hangup is logged
//! and the policy carries on with the remaining peers and calls.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rvoip_call_core::{CallAdmissionPolicy, PolicyConfig};
//! use rvoip_call_core::events::{CallEvent, CallEventKind, CallListener};
//! # fn provider_call() -> Arc<rvoip_call_core::Call> { unimplemented!() }
//!
//! let policy = CallAdmissionPolicy::new(PolicyConfig::new().with_call_waiting_disabled(true));
//!
//! // Protocol providers forward their call events to the policy
//! let call = provider_call();
//! policy.incoming_call_received(&CallEvent::new(call, CallEventKind::Received)).unwrap();
//! ```

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use crate::call::{Call, CallState};
use crate::config::PolicyConfig;
use crate::error::{CallCoreError, ListenerResult};
use crate::events::{
    CallChangeEvent, CallChangeListener, CallEvent, CallListener, CallPeerChangeEvent,
    CallPeerEvent, CallPeerListener,
};
use crate::listeners::CopyOnWrite;
use crate::peer::CallPeerState;
use crate::provider::{effective_presence_status, HANGUP_REASON_BUSY_HERE};

/// Why a new call was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rejection {
    CallWaitingDisabled,
    DoNotDisturb(u32),
}

/// Coordinator deciding which calls may ring and which must hold
pub struct CallAdmissionPolicy {
    config: RwLock<PolicyConfig>,
    tracked: CopyOnWrite<Vec<Arc<Call>>>,
    relay: Arc<PolicyRelay>,
}

impl CallAdmissionPolicy {
    pub fn new(config: PolicyConfig) -> Arc<Self> {
        Arc::new_cyclic(|self_ref: &Weak<Self>| Self {
            config: RwLock::new(config),
            tracked: CopyOnWrite::new(Vec::new()),
            relay: Arc::new(PolicyRelay {
                policy: self_ref.clone(),
            }),
        })
    }

    pub fn config(&self) -> PolicyConfig {
        self.config.read().clone()
    }

    /// Replace the configuration; applies to the next decision
    pub fn set_config(&self, config: PolicyConfig) {
        *self.config.write() = config;
    }

    /// Snapshot of the calls currently tracked
    pub fn tracked_calls(&self) -> Arc<Vec<Arc<Call>>> {
        self.tracked.load()
    }

    pub fn tracked_call_count(&self) -> usize {
        self.tracked.load().len()
    }

    pub fn is_tracking(&self, call: &Arc<Call>) -> bool {
        self.tracked.load().iter().any(|c| Arc::ptr_eq(c, call))
    }

    // ===== ADMISSION =====

    fn admit(&self, call: &Arc<Call>) {
        match self.rejection_for(call) {
            Some(Rejection::CallWaitingDisabled) => {
                info!(call_id = %call.id(), "Rejecting call with busy here, call waiting disabled");
                self.reject_busy(call);
            }
            Some(Rejection::DoNotDisturb(status)) => {
                info!(call_id = %call.id(), status, "Rejecting call with busy here, do not disturb");
                self.reject_busy(call);
            }
            None => self.track(call),
        }
    }

    fn rejection_for(&self, call: &Arc<Call>) -> Option<Rejection> {
        let config = self.config.read().clone();

        if config.call_waiting_disabled {
            let other_in_progress = self
                .tracked
                .load()
                .iter()
                .any(|other| !Arc::ptr_eq(other, call) && other.state() == CallState::InProgress);
            if other_in_progress {
                return Some(Rejection::CallWaitingDisabled);
            }
        }

        let provider = call.provider();
        if config.reject_on_dnd_for(provider.account_id()) {
            // No presence anywhere counts as available
            match effective_presence_status(provider.as_ref()) {
                Some(status) if config.busy_range.contains(status) => {
                    return Some(Rejection::DoNotDisturb(status));
                }
                Some(_) => {}
                None => debug!(account = provider.account_id(), "No presence status, treating as available"),
            }
        }
        None
    }

    fn reject_busy(&self, call: &Arc<Call>) {
        let provider = call.provider();
        let Some(telephony) = provider.telephony() else {
            let err = CallCoreError::telephony_unavailable(provider.account_id());
            warn!(call_id = %call.id(), error = %err, category = err.category(), "No telephony operations to reject call");
            return;
        };
        for peer in call.peers().iter() {
            if peer.state().is_terminal() {
                continue;
            }
            if let Err(e) = telephony.hangup_call_peer(peer, HANGUP_REASON_BUSY_HERE, "Busy here") {
                error!(call_id = %call.id(), peer_id = %peer.id(), error = %e, "Failed to reject call peer");
            }
        }
    }

    // ===== TRACKING =====

    fn track(&self, call: &Arc<Call>) {
        let added = self.tracked.update(|calls| {
            if calls.iter().any(|c| Arc::ptr_eq(c, call)) {
                false
            } else {
                calls.push(call.clone());
                true
            }
        });
        if !added {
            return;
        }

        call.add_call_change_listener(self.relay.clone());
        for peer in call.peers().iter() {
            peer.add_call_peer_listener(self.relay.clone());
        }
        debug!(call_id = %call.id(), tracked = self.tracked_call_count(), "Tracking call");
    }

    fn untrack(&self, call: &Arc<Call>) {
        let removed = self.tracked.update(|calls| {
            let before = calls.len();
            calls.retain(|c| !Arc::ptr_eq(c, call));
            calls.len() != before
        });

        let call_relay: Arc<dyn CallChangeListener> = self.relay.clone();
        call.remove_call_change_listener(&call_relay);
        let peer_relay: Arc<dyn CallPeerListener> = self.relay.clone();
        for peer in call.peers().iter() {
            peer.remove_call_peer_listener(&peer_relay);
        }
        if removed {
            debug!(call_id = %call.id(), tracked = self.tracked_call_count(), "Stopped tracking call");
        }
    }

    // ===== HOLD =====

    fn hold_other_calls(&self, active: &Arc<Call>) {
        let conference = active.conference();
        for other in self.tracked.load().iter() {
            if Arc::ptr_eq(other, active) || other.state() != CallState::InProgress {
                continue;
            }
            if Arc::ptr_eq(&other.conference(), &conference) {
                debug!(call_id = %other.id(), "Same conference as active call, not holding");
                continue;
            }
            self.hold_call(other);
        }
    }

    fn hold_call(&self, call: &Arc<Call>) {
        let provider = call.provider();
        let Some(telephony) = provider.telephony() else {
            let err = CallCoreError::telephony_unavailable(provider.account_id());
            warn!(call_id = %call.id(), error = %err, category = err.category(), "No telephony operations to hold call");
            return;
        };

        for peer in call.peers().iter() {
            let state = peer.state();
            if state.is_terminal() || state.is_on_hold() {
                continue;
            }
            info!(call_id = %call.id(), peer_id = %peer.id(), "Putting peer on hold");
            if let Err(e) = telephony.put_on_hold(peer) {
                error!(call_id = %call.id(), peer_id = %peer.id(), error = %e, "Failed to put peer on hold");
            }
        }
    }

    fn single_call_in_progress(&self) -> bool {
        self.config.read().single_call_in_progress_enabled
    }
}

impl CallListener for CallAdmissionPolicy {
    fn outgoing_call_created(&self, event: &CallEvent) -> ListenerResult {
        self.admit(&event.call);
        Ok(())
    }

    fn incoming_call_received(&self, event: &CallEvent) -> ListenerResult {
        self.admit(&event.call);
        Ok(())
    }

    fn call_ended(&self, event: &CallEvent) -> ListenerResult {
        self.untrack(&event.call);
        Ok(())
    }
}

impl fmt::Debug for CallAdmissionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallAdmissionPolicy")
            .field("config", &*self.config.read())
            .field("tracked_calls", &self.tracked_call_count())
            .finish()
    }
}

/// Listener the policy registers on tracked calls and their peers
struct PolicyRelay {
    policy: Weak<CallAdmissionPolicy>,
}

impl CallChangeListener for PolicyRelay {
    fn call_peer_added(&self, event: &CallPeerEvent) -> ListenerResult {
        if let Some(policy) = self.policy.upgrade() {
            event.peer.add_call_peer_listener(policy.relay.clone());
        }
        Ok(())
    }

    fn call_peer_removed(&self, event: &CallPeerEvent) -> ListenerResult {
        if let Some(policy) = self.policy.upgrade() {
            let relay: Arc<dyn CallPeerListener> = policy.relay.clone();
            event.peer.remove_call_peer_listener(&relay);
        }
        Ok(())
    }

    fn call_state_changed(&self, event: &CallChangeEvent) -> ListenerResult {
        let Some(policy) = self.policy.upgrade() else {
            return Ok(());
        };
        match (event.old_state, event.new_state) {
            (CallState::Initialization, CallState::InProgress) if policy.single_call_in_progress() => {
                policy.hold_other_calls(&event.call);
            }
            (_, CallState::Ended) => policy.untrack(&event.call),
            _ => {}
        }
        Ok(())
    }
}

impl CallPeerListener for PolicyRelay {
    fn peer_state_changed(&self, event: &CallPeerChangeEvent) -> ListenerResult {
        if event.new_state != CallPeerState::Connected {
            return Ok(());
        }
        let Some(policy) = self.policy.upgrade() else {
            return Ok(());
        };
        if !policy.single_call_in_progress() {
            return Ok(());
        }
        if let Some(call) = event.peer.call() {
            policy.hold_other_calls(&call);
        }
        Ok(())
    }
}
