//! Conference membership
//!
//! A [`ConferenceMembership`] groups the calls that form one logical
//! session. It derives whether the local endpoint is a conference focus
//! (mixing more than one remote party), relays peer and call events from
//! every contained call to its own listeners, and carries a display-only
//! transient state ("Uplifting", "Merging", ...) that can reset itself after
//! a timeout.
//!
//! # Focus Rule
//!
//! The derived focus condition is: more than one call, or exactly one call
//! with more than one peer. The stored flag is only *promoted* when calls or
//! peers are added and only *demoted* when a call is removed. Removing a
//! peer from a call therefore never drops focus on its own; this debounces
//! short peer-count dips while a conference is being reshaped.
//!
//! # Transient Display State
//!
//! [`ConferenceMembership::set_display_state_transient`] stores a state and
//! schedules a reset back to [`ConferenceDisplayState::Idle`] on the tokio
//! runtime. Any later state change cancels the pending reset, so at most one
//! reset is ever pending.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::call::{Call, CallState};
use crate::config::ConferenceConfig;
use crate::error::{CallCoreError, CallCoreResult, ListenerResult};
use crate::events::{
    deliver_peer_conference_event, CallChangeEvent, CallChangeListener, CallPeerConferenceEvent,
    CallPeerConferenceListener, CallPeerEvent, ConferencePropertyChange, ConferencePropertyEvent,
    ConferencePropertyListener,
};
use crate::listeners::{CopyOnWrite, ListenerRegistry};
use crate::peer::CallPeer;

/// Display-only state of a conference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConferenceDisplayState {
    /// Nothing in progress
    #[default]
    Idle,
    /// A one-to-one call is being turned into a conference
    Uplifting,
    /// The media path is being switched to another focus
    Switching,
    /// Separate calls are being merged into this conference
    Merging,
}

impl ConferenceDisplayState {
    /// Human-readable label; empty for `Idle`
    pub fn label(&self) -> &'static str {
        match self {
            ConferenceDisplayState::Idle => "",
            ConferenceDisplayState::Uplifting => "Uplifting to conference",
            ConferenceDisplayState::Switching => "Switching conference",
            ConferenceDisplayState::Merging => "Merging calls",
        }
    }
}

impl fmt::Display for ConferenceDisplayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

struct DisplaySlot {
    state: ConferenceDisplayState,
    reset: Option<CancellationToken>,
    // Bumped on every change so a reset that lost the race is dropped
    generation: u64,
}

/// Which way a focus refresh may move the stored flag
#[derive(Clone, Copy)]
enum FocusUpdate {
    Promote,
    Demote,
}

/// A set of calls forming one logical conference
pub struct ConferenceMembership {
    id: Uuid,
    self_ref: Weak<ConferenceMembership>,
    calls: CopyOnWrite<Vec<Arc<Call>>>,
    conference_focus: AtomicBool,
    relay: Arc<ConferenceRelay>,
    call_listeners: ListenerRegistry<dyn CallChangeListener>,
    peer_conference_listeners: ListenerRegistry<dyn CallPeerConferenceListener>,
    property_listeners: ListenerRegistry<dyn ConferencePropertyListener>,
    display: Mutex<DisplaySlot>,
    runtime: Option<Handle>,
    config: ConferenceConfig,
}

impl ConferenceMembership {
    /// Create an empty conference with default settings
    pub fn new() -> Arc<Self> {
        Self::build(ConferenceConfig::default(), None)
    }

    pub fn with_config(config: ConferenceConfig) -> Arc<Self> {
        Self::build(config, None)
    }

    /// Create a conference whose reset timers run on `runtime`
    ///
    /// Without an explicit runtime the ambient tokio runtime of the caller
    /// is used.
    pub fn with_runtime(config: ConferenceConfig, runtime: Handle) -> Arc<Self> {
        Self::build(config, Some(runtime))
    }

    fn build(config: ConferenceConfig, runtime: Option<Handle>) -> Arc<Self> {
        Arc::new_cyclic(|self_ref: &Weak<Self>| Self {
            id: Uuid::new_v4(),
            self_ref: self_ref.clone(),
            calls: CopyOnWrite::new(Vec::new()),
            conference_focus: AtomicBool::new(false),
            relay: Arc::new(ConferenceRelay {
                conference: self_ref.clone(),
            }),
            call_listeners: ListenerRegistry::new(),
            peer_conference_listeners: ListenerRegistry::new(),
            property_listeners: ListenerRegistry::new(),
            display: Mutex::new(DisplaySlot {
                state: ConferenceDisplayState::Idle,
                reset: None,
                generation: 0,
            }),
            runtime,
            config,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &ConferenceConfig {
        &self.config
    }

    // ===== CALLS =====

    /// Snapshot of the calls in this conference
    pub fn calls(&self) -> Arc<Vec<Arc<Call>>> {
        self.calls.load()
    }

    pub fn call_count(&self) -> usize {
        self.calls.load().len()
    }

    pub fn contains_call(&self, call: &Arc<Call>) -> bool {
        self.calls.load().iter().any(|c| Arc::ptr_eq(c, call))
    }

    /// Peers of every contained call
    pub fn call_peers(&self) -> Vec<Arc<CallPeer>> {
        self.calls
            .load()
            .iter()
            .flat_map(|call| call.peers().iter().cloned().collect::<Vec<_>>())
            .collect()
    }

    pub fn call_peer_count(&self) -> usize {
        self.calls.load().iter().map(|call| call.peer_count()).sum()
    }

    /// Add a call to the conference
    ///
    /// Subscribes to the call and its peers, promotes the focus flag if the
    /// conference now qualifies, and reports `CallAdded` to property
    /// listeners. Returns `false` if the call was already present.
    ///
    /// This does not change [`Call::conference`]; use
    /// [`Call::set_conference`] to move a call.
    pub fn add_call(&self, call: &Arc<Call>) -> CallCoreResult<bool> {
        let added = self.calls.update(|calls| {
            if calls.iter().any(|c| Arc::ptr_eq(c, call)) {
                false
            } else {
                calls.push(call.clone());
                true
            }
        });
        if !added {
            return Ok(false);
        }

        call.add_call_change_listener(self.relay.clone());
        for peer in call.peers().iter() {
            peer.add_conference_listener(self.relay.clone());
        }
        debug!(conference_id = %self.id, call_id = %call.id(), "Call added to conference");

        self.refresh_focus(FocusUpdate::Promote)?;
        self.fire_property_change(ConferencePropertyChange::CallAdded(call.clone()))?;
        Ok(true)
    }

    /// Remove a call from the conference
    ///
    /// Reverse of [`ConferenceMembership::add_call`]; the focus flag may only
    /// be demoted here.
    pub fn remove_call(&self, call: &Arc<Call>) -> CallCoreResult<bool> {
        let removed = self.calls.update(|calls| {
            let before = calls.len();
            calls.retain(|c| !Arc::ptr_eq(c, call));
            calls.len() != before
        });
        if !removed {
            return Ok(false);
        }

        let relay: Arc<dyn CallChangeListener> = self.relay.clone();
        call.remove_call_change_listener(&relay);
        let relay: Arc<dyn CallPeerConferenceListener> = self.relay.clone();
        for peer in call.peers().iter() {
            peer.remove_conference_listener(&relay);
        }
        debug!(conference_id = %self.id, call_id = %call.id(), "Call removed from conference");

        self.refresh_focus(FocusUpdate::Demote)?;
        self.fire_property_change(ConferencePropertyChange::CallRemoved(call.clone()))?;
        Ok(true)
    }

    // ===== FOCUS =====

    /// Whether the local endpoint mixes this conference
    pub fn is_conference_focus(&self) -> bool {
        self.conference_focus.load(Ordering::SeqCst)
    }

    fn derive_focus(&self) -> bool {
        let calls = self.calls.load();
        match calls.len() {
            0 => false,
            1 => calls[0].peer_count() > 1,
            _ => true,
        }
    }

    fn refresh_focus(&self, direction: FocusUpdate) -> CallCoreResult<()> {
        let derived = self.derive_focus();
        let allowed = match direction {
            FocusUpdate::Promote => derived,
            FocusUpdate::Demote => !derived,
        };
        if !allowed {
            return Ok(());
        }

        let old = self.conference_focus.swap(derived, Ordering::SeqCst);
        if old == derived {
            return Ok(());
        }
        debug!(conference_id = %self.id, focus = derived, "Conference focus changed");
        self.fire_property_change(ConferencePropertyChange::FocusChanged { old, new: derived })
    }

    // ===== DISPLAY STATE =====

    pub fn display_state(&self) -> ConferenceDisplayState {
        self.display.lock().state
    }

    /// Label of the current display state; empty when idle
    pub fn display_state_label(&self) -> &'static str {
        self.display_state().label()
    }

    /// Whether an automatic reset is scheduled
    pub fn has_pending_display_reset(&self) -> bool {
        self.display.lock().reset.is_some()
    }

    /// Store a display state, cancelling any pending reset
    pub fn set_display_state(&self, state: ConferenceDisplayState) -> CallCoreResult<()> {
        let old = {
            let mut slot = self.display.lock();
            if let Some(token) = slot.reset.take() {
                token.cancel();
            }
            slot.generation = slot.generation.wrapping_add(1);
            std::mem::replace(&mut slot.state, state)
        };
        self.fire_display_change(old, state)
    }

    /// Store a display state that resets to `Idle` after `timeout`
    ///
    /// `None` uses [`ConferenceConfig::transient_timeout`]. Any pending reset
    /// is cancelled first.
    ///
    /// # Errors
    ///
    /// [`CallCoreError::TimerUnavailable`] when the conference was built
    /// without a runtime and the caller is not inside one. The state is left
    /// unchanged in that case.
    pub fn set_display_state_transient(
        &self,
        state: ConferenceDisplayState,
        timeout: Option<Duration>,
    ) -> CallCoreResult<()> {
        let runtime = match &self.runtime {
            Some(handle) => handle.clone(),
            None => Handle::try_current().map_err(|e| CallCoreError::TimerUnavailable {
                reason: e.to_string(),
            })?,
        };
        let timeout = timeout.unwrap_or_else(|| self.config.transient_timeout());
        let token = CancellationToken::new();

        let (old, generation) = {
            let mut slot = self.display.lock();
            if let Some(pending) = slot.reset.replace(token.clone()) {
                pending.cancel();
            }
            slot.generation = slot.generation.wrapping_add(1);
            let old = std::mem::replace(&mut slot.state, state);
            (old, slot.generation)
        };

        let conference = self.self_ref.clone();
        runtime.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    if let Some(conference) = conference.upgrade() {
                        if let Err(e) = conference.expire_display_state(generation) {
                            warn!(conference_id = %conference.id, error = %e, "Display state reset notification failed");
                        }
                    }
                }
            }
        });

        debug!(conference_id = %self.id, state = ?state, timeout_ms = timeout.as_millis() as u64, "Transient display state set");
        self.fire_display_change(old, state)
    }

    fn expire_display_state(&self, generation: u64) -> CallCoreResult<()> {
        let old = {
            let mut slot = self.display.lock();
            if slot.generation != generation {
                return Ok(());
            }
            slot.reset = None;
            slot.generation = slot.generation.wrapping_add(1);
            std::mem::replace(&mut slot.state, ConferenceDisplayState::Idle)
        };
        self.fire_display_change(old, ConferenceDisplayState::Idle)
    }

    fn fire_display_change(&self, old: ConferenceDisplayState, new: ConferenceDisplayState) -> CallCoreResult<()> {
        if old == new {
            return Ok(());
        }
        self.fire_property_change(ConferencePropertyChange::DisplayStateChanged { old, new })
    }

    fn fire_property_change(&self, change: ConferencePropertyChange) -> CallCoreResult<()> {
        let Some(conference) = self.self_ref.upgrade() else {
            return Ok(());
        };
        let event = ConferencePropertyEvent { conference, change };
        self.property_listeners
            .dispatch("conference_property_changed", |listener| listener.conference_property_changed(&event))
    }

    // ===== LISTENERS =====

    /// Register for peer-added/removed and state events of every contained call
    pub fn add_call_change_listener(&self, listener: Arc<dyn CallChangeListener>) -> bool {
        self.call_listeners.add(listener)
    }

    pub fn remove_call_change_listener(&self, listener: &Arc<dyn CallChangeListener>) -> bool {
        self.call_listeners.remove(listener)
    }

    /// Register for conference events reported by any contained peer
    pub fn add_peer_conference_listener(&self, listener: Arc<dyn CallPeerConferenceListener>) -> bool {
        self.peer_conference_listeners.add(listener)
    }

    pub fn remove_peer_conference_listener(&self, listener: &Arc<dyn CallPeerConferenceListener>) -> bool {
        self.peer_conference_listeners.remove(listener)
    }

    pub fn add_property_listener(&self, listener: Arc<dyn ConferencePropertyListener>) -> bool {
        self.property_listeners.add(listener)
    }

    pub fn remove_property_listener(&self, listener: &Arc<dyn ConferencePropertyListener>) -> bool {
        self.property_listeners.remove(listener)
    }
}

impl Drop for ConferenceMembership {
    fn drop(&mut self) {
        if let Some(token) = self.display.get_mut().reset.take() {
            token.cancel();
        }
    }
}

impl fmt::Debug for ConferenceMembership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConferenceMembership")
            .field("id", &self.id)
            .field("calls", &self.call_count())
            .field("conference_focus", &self.is_conference_focus())
            .field("display_state", &self.display.lock().state)
            .finish()
    }
}

/// Listener the conference registers on its calls and their peers
///
/// Holds only a weak reference so calls do not keep the conference alive.
struct ConferenceRelay {
    conference: Weak<ConferenceMembership>,
}

impl CallChangeListener for ConferenceRelay {
    fn call_peer_added(&self, event: &CallPeerEvent) -> ListenerResult {
        let Some(conference) = self.conference.upgrade() else {
            return Ok(());
        };
        event.peer.add_conference_listener(conference.relay.clone());
        conference.refresh_focus(FocusUpdate::Promote)?;
        conference
            .call_listeners
            .dispatch("call_peer_added", |listener| listener.call_peer_added(event))?;
        Ok(())
    }

    fn call_peer_removed(&self, event: &CallPeerEvent) -> ListenerResult {
        let Some(conference) = self.conference.upgrade() else {
            return Ok(());
        };
        let relay: Arc<dyn CallPeerConferenceListener> = conference.relay.clone();
        event.peer.remove_conference_listener(&relay);
        conference
            .call_listeners
            .dispatch("call_peer_removed", |listener| listener.call_peer_removed(event))?;
        Ok(())
    }

    fn call_state_changed(&self, event: &CallChangeEvent) -> ListenerResult {
        let Some(conference) = self.conference.upgrade() else {
            return Ok(());
        };
        conference
            .call_listeners
            .dispatch("call_state_changed", |listener| listener.call_state_changed(event))?;
        if event.new_state == CallState::Ended {
            conference.remove_call(&event.call)?;
        }
        Ok(())
    }
}

impl CallPeerConferenceListener for ConferenceRelay {
    fn conference_focus_changed(&self, event: &CallPeerConferenceEvent) -> ListenerResult {
        self.relay_peer_event(event)
    }

    fn conference_member_added(&self, event: &CallPeerConferenceEvent) -> ListenerResult {
        self.relay_peer_event(event)
    }

    fn conference_member_removed(&self, event: &CallPeerConferenceEvent) -> ListenerResult {
        self.relay_peer_event(event)
    }
}

impl ConferenceRelay {
    fn relay_peer_event(&self, event: &CallPeerConferenceEvent) -> ListenerResult {
        let Some(conference) = self.conference.upgrade() else {
            return Ok(());
        };
        conference
            .peer_conference_listeners
            .dispatch("peer_conference_changed", |listener| deliver_peer_conference_event(listener, event))?;
        Ok(())
    }
}
