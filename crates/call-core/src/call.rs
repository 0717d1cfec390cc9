//! Calls
//!
//! A [`Call`] is one signaling session owned by a protocol provider. It holds
//! its remote peers, a coarse lifecycle state and a reference to the
//! [`ConferenceMembership`] it belongs to. Every call belongs to exactly one
//! conference; a fresh call gets a conference of its own.

use std::fmt;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::conference::ConferenceMembership;
use crate::error::CallCoreResult;
use crate::events::{CallChangeEvent, CallChangeListener, CallPeerEvent, CallPeerEventKind};
use crate::listeners::{CopyOnWrite, DispatchQueue, ListenerRegistry};
use crate::peer::{CallPeer, PeerId};
use crate::provider::ProtocolProvider;

/// Unique identifier for a call
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallId(pub String);

impl CallId {
    /// Generate a fresh random identifier
    pub fn new() -> Self {
        Self(format!("call-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for CallId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Coarse lifecycle of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallState {
    /// Created, no peer connected yet
    Initialization,
    /// At least one peer is (or was) connected
    InProgress,
    /// Terminal
    Ended,
}

impl CallState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Ended)
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallState::Initialization => write!(f, "Initialization"),
            CallState::InProgress => write!(f, "In Progress"),
            CallState::Ended => write!(f, "Ended"),
        }
    }
}

/// A signaling session with one or more remote peers
pub struct Call {
    id: CallId,
    provider: Arc<dyn ProtocolProvider>,
    self_ref: Weak<Call>,
    state: RwLock<CallState>,
    conference: RwLock<Arc<ConferenceMembership>>,
    /// Serialises whole conference moves, held across swap, remove and add
    conference_move: Mutex<()>,
    peers: CopyOnWrite<Vec<Arc<CallPeer>>>,
    listeners: ListenerRegistry<dyn CallChangeListener>,
    notifications: DispatchQueue<CallChangeEvent>,
    created_at: DateTime<Utc>,
}

impl Call {
    /// Create a call in its own single-call conference
    ///
    /// The call and its conference reference each other until the call
    /// reaches [`CallState::Ended`], which removes it from the conference.
    /// Providers must drive every call to `Ended`; a call dropped in any
    /// other state is never freed.
    pub fn new(provider: Arc<dyn ProtocolProvider>) -> Arc<Self> {
        Self::with_id(CallId::new(), provider)
    }

    /// Create a call with a provider-assigned identifier
    pub fn with_id(id: CallId, provider: Arc<dyn ProtocolProvider>) -> Arc<Self> {
        let conference = ConferenceMembership::new();
        let call = Arc::new_cyclic(|self_ref| Self {
            id,
            provider,
            self_ref: self_ref.clone(),
            state: RwLock::new(CallState::Initialization),
            conference: RwLock::new(conference.clone()),
            conference_move: Mutex::new(()),
            peers: CopyOnWrite::new(Vec::new()),
            listeners: ListenerRegistry::new(),
            notifications: DispatchQueue::new(),
            created_at: Utc::now(),
        });

        // Nobody can be listening yet, so this only fails on a broken invariant
        if let Err(e) = conference.add_call(&call) {
            warn!(call_id = %call.id, error = %e, "Failed to register call with its conference");
        }
        debug!(call_id = %call.id, account = call.provider.account_id(), "Call created");
        call
    }

    pub fn id(&self) -> &CallId {
        &self.id
    }

    /// Protocol provider that owns this call
    pub fn provider(&self) -> &Arc<dyn ProtocolProvider> {
        &self.provider
    }

    pub fn state(&self) -> CallState {
        *self.state.read()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Conference this call currently belongs to
    pub fn conference(&self) -> Arc<ConferenceMembership> {
        self.conference.read().clone()
    }

    /// Whether the local endpoint mixes this call's conference
    pub fn is_conference_focus(&self) -> bool {
        self.conference().is_conference_focus()
    }

    /// Move the call to another conference
    ///
    /// The call is removed from its current conference and added to
    /// `conference`. Setting the current conference again does nothing.
    /// Concurrent moves of one call run one after the other, so the call
    /// ends up in exactly the conference [`Call::conference`] names. Must
    /// not be called for this call from a conference listener it triggers.
    pub fn set_conference(&self, conference: Arc<ConferenceMembership>) -> CallCoreResult<()> {
        let Some(call) = self.self_ref.upgrade() else {
            return Ok(());
        };
        let _moving = self.conference_move.lock();
        let previous = {
            let mut current = self.conference.write();
            if Arc::ptr_eq(&current, &conference) {
                return Ok(());
            }
            std::mem::replace(&mut *current, conference.clone())
        };

        debug!(
            call_id = %self.id,
            from = %previous.id(),
            to = %conference.id(),
            "Moving call between conferences"
        );
        previous.remove_call(&call)?;
        conference.add_call(&call)?;
        Ok(())
    }

    // ===== PEERS =====

    /// Snapshot of the call's peers
    pub fn peers(&self) -> Arc<Vec<Arc<CallPeer>>> {
        self.peers.load()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.load().len()
    }

    pub fn find_peer(&self, peer_id: &PeerId) -> Option<Arc<CallPeer>> {
        self.peers.load().iter().find(|p| p.id() == peer_id).cloned()
    }

    /// Attach a peer and notify call-change listeners
    ///
    /// Returns `false` if the peer is already part of the call.
    pub fn add_peer(&self, peer: Arc<CallPeer>) -> CallCoreResult<bool> {
        let added = self.peers.update(|peers| {
            if peers.iter().any(|p| Arc::ptr_eq(p, &peer)) {
                false
            } else {
                peers.push(peer.clone());
                true
            }
        });
        if !added {
            return Ok(false);
        }

        debug!(call_id = %self.id, peer_id = %peer.id(), "Peer added to call");
        self.fire_peer_event(peer, CallPeerEventKind::Added)?;
        Ok(true)
    }

    /// Detach a peer and notify call-change listeners
    pub fn remove_peer(&self, peer: &Arc<CallPeer>) -> CallCoreResult<bool> {
        let removed = self.peers.update(|peers| {
            let before = peers.len();
            peers.retain(|p| !Arc::ptr_eq(p, peer));
            peers.len() != before
        });
        if !removed {
            return Ok(false);
        }

        debug!(call_id = %self.id, peer_id = %peer.id(), "Peer removed from call");
        self.fire_peer_event(peer.clone(), CallPeerEventKind::Removed)?;
        Ok(true)
    }

    fn fire_peer_event(&self, peer: Arc<CallPeer>, kind: CallPeerEventKind) -> CallCoreResult<()> {
        let Some(call) = self.self_ref.upgrade() else {
            return Ok(());
        };
        let event = CallPeerEvent { call, peer, kind };
        match kind {
            CallPeerEventKind::Added => self
                .listeners
                .dispatch("call_peer_added", |listener| listener.call_peer_added(&event)),
            CallPeerEventKind::Removed => self
                .listeners
                .dispatch("call_peer_removed", |listener| listener.call_peer_removed(&event)),
        }
    }

    // ===== STATE =====

    /// Move the call to `new_state`
    ///
    /// No-op when the state is unchanged. `Ended` is terminal: later
    /// transitions are ignored.
    ///
    /// Notifications for one call are delivered in transition order. When
    /// another thread is delivering this call's notifications, this call
    /// blocks until that thread has delivered its event too, and returns
    /// that event's outcome. Called from inside a listener callback it does
    /// not block: the event is queued behind the one in flight and `Ok(())`
    /// is returned, with any fatal fault it raises logged instead.
    ///
    /// # Errors
    ///
    /// [`CallCoreError::ListenerAborted`](crate::CallCoreError::ListenerAborted)
    /// when a listener reports a fatal fault for this transition.
    pub fn set_state(&self, new_state: CallState, reason: Option<&str>) -> CallCoreResult<()> {
        let Some(call) = self.self_ref.upgrade() else {
            return Ok(());
        };

        let delivery = {
            let mut state = self.state.write();
            let old_state = *state;
            if old_state == new_state {
                return Ok(());
            }
            if old_state.is_terminal() {
                debug!(call_id = %self.id, requested = %new_state, "Ignoring transition out of Ended");
                return Ok(());
            }
            *state = new_state;

            debug!(
                call_id = %self.id,
                old_state = %old_state,
                new_state = %new_state,
                "Call state changed"
            );

            self.notifications.enqueue(CallChangeEvent {
                call,
                old_state,
                new_state,
                reason: reason.map(str::to_string),
                timestamp: Utc::now(),
            })
        };

        self.notifications.drain(&delivery, |event| {
            self.listeners
                .dispatch("call_state_changed", |listener| listener.call_state_changed(event))
        })
    }

    // ===== LISTENERS =====

    pub fn add_call_change_listener(&self, listener: Arc<dyn CallChangeListener>) -> bool {
        self.listeners.add(listener)
    }

    pub fn remove_call_change_listener(&self, listener: &Arc<dyn CallChangeListener>) -> bool {
        self.listeners.remove(listener)
    }

    pub fn call_change_listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl fmt::Debug for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("id", &self.id)
            .field("account", &self.provider.account_id())
            .field("state", &self.state())
            .field("peers", &self.peer_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ListenerResult;
    use crate::provider::TelephonyOperations;
    use parking_lot::Mutex;

    struct NullProvider;

    impl ProtocolProvider for NullProvider {
        fn account_id(&self) -> &str {
            "test@example.com"
        }

        fn telephony(&self) -> Option<Arc<dyn TelephonyOperations>> {
            None
        }
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl CallChangeListener for Recorder {
        fn call_peer_added(&self, event: &CallPeerEvent) -> ListenerResult {
            self.seen.lock().push(format!("added {}", event.peer.address()));
            Ok(())
        }

        fn call_peer_removed(&self, event: &CallPeerEvent) -> ListenerResult {
            self.seen.lock().push(format!("removed {}", event.peer.address()));
            Ok(())
        }

        fn call_state_changed(&self, event: &CallChangeEvent) -> ListenerResult {
            self.seen.lock().push(format!("{} -> {}", event.old_state, event.new_state));
            Ok(())
        }
    }

    #[test]
    fn test_new_call_has_own_conference() {
        let call = Call::new(Arc::new(NullProvider));
        assert_eq!(call.state(), CallState::Initialization);
        assert_eq!(call.conference().call_count(), 1);
        assert!(!call.is_conference_focus());
        assert!(call.id().as_str().starts_with("call-"));
    }

    #[test]
    fn test_peer_membership() {
        let call = Call::new(Arc::new(NullProvider));
        let recorder = Arc::new(Recorder::default());
        call.add_call_change_listener(recorder.clone());

        let peer = CallPeer::with_id(&call, PeerId::from("bob"), "sip:bob@example.com");
        assert!(call.add_peer(peer.clone()).unwrap());
        assert!(!call.add_peer(peer.clone()).unwrap());
        assert_eq!(call.peer_count(), 1);
        assert!(call.find_peer(&PeerId::from("bob")).is_some());

        assert!(call.remove_peer(&peer).unwrap());
        assert!(!call.remove_peer(&peer).unwrap());
        assert_eq!(
            *recorder.seen.lock(),
            vec!["added sip:bob@example.com", "removed sip:bob@example.com"]
        );
    }

    #[test]
    fn test_ended_is_terminal() {
        let call = Call::new(Arc::new(NullProvider));
        let recorder = Arc::new(Recorder::default());
        call.add_call_change_listener(recorder.clone());

        call.set_state(CallState::InProgress, None).unwrap();
        call.set_state(CallState::InProgress, None).unwrap();
        call.set_state(CallState::Ended, Some("hangup")).unwrap();
        call.set_state(CallState::InProgress, None).unwrap();

        assert_eq!(call.state(), CallState::Ended);
        assert_eq!(
            *recorder.seen.lock(),
            vec!["Initialization -> In Progress", "In Progress -> Ended"]
        );
    }

    #[test]
    fn test_ended_call_leaves_its_conference() {
        let call = Call::new(Arc::new(NullProvider));
        let conference = call.conference();
        call.set_state(CallState::Ended, None).unwrap();
        assert_eq!(conference.call_count(), 0);
    }

    #[test]
    fn test_set_conference_moves_call() {
        let first = Call::new(Arc::new(NullProvider));
        let second = Call::new(Arc::new(NullProvider));
        let old = first.conference();
        let shared = second.conference();

        first.set_conference(shared.clone()).unwrap();
        first.set_conference(shared.clone()).unwrap();

        assert_eq!(old.call_count(), 0);
        assert_eq!(shared.call_count(), 2);
        assert!(Arc::ptr_eq(&first.conference(), &shared));
        assert!(shared.is_conference_focus());
    }
}
