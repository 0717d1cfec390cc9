//! Call peers and their state machine
//!
//! A [`CallPeer`] is one remote party inside a [`Call`]. Protocol providers
//! drive it with [`CallPeer::set_state`] as signaling arrives; every
//! accepted transition is delivered to the peer's state listeners in the
//! order the transitions happened.
//!
//! # Lifecycle
//!
//! ```text
//! Unknown ─┬─► IncomingCall ──────────────────────────┐
//!          └─► InitiatingCall ─► Connecting ─► ...  ──┤
//!                                                     ▼
//!          OnHoldLocally / OnHoldRemotely ◄──►  Connected
//!          OnHoldMutually                             │
//!                                                     ▼
//!                                      Disconnected / Failed
//! ```
//!
//! The call-duration clock starts when the peer enters `Connected` from a
//! state that was not an on-hold state, so resuming from hold keeps the
//! original start time.
//!
//! # Conference Members
//!
//! When the remote party itself mixes a conference, the provider reports the
//! other participants as [`ConferenceMember`]s. The member list is
//! copy-on-write; [`CallPeer::conference_member_count`] reports zero unless
//! the peer is currently a conference focus.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::call::Call;
use crate::error::CallCoreResult;
use crate::events::{
    deliver_peer_conference_event, CallPeerChangeEvent, CallPeerConferenceEvent,
    CallPeerConferenceEventKind, CallPeerConferenceListener, CallPeerDisplayNameEvent,
    CallPeerListener, CallPeerResourceEvent, CallPeerResourceListener, CallPeerSecurityEvent,
    CallPeerSecurityListener, CallSecurityStatus,
};
use crate::listeners::{CopyOnWrite, DispatchQueue, ListenerRegistry};
use crate::member::ConferenceMember;

/// Unique identifier for a call peer
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub String);

impl PeerId {
    /// Generate a fresh random identifier
    pub fn new() -> Self {
        Self(format!("peer-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for PeerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// State of a remote party within a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallPeerState {
    /// Freshly created, nothing signaled yet
    Unknown,
    /// Outgoing invitation being sent
    InitiatingCall,
    /// Incoming invitation waiting for an answer
    IncomingCall,
    /// Outgoing call in progress, no ringing indication yet
    Connecting,
    /// Outgoing call progressing with early media
    ConnectingWithEarlyMedia,
    /// Incoming call answered, media being set up
    ConnectingIncomingCallWithMedia,
    /// Remote side is ringing
    AlertingRemoteSide,
    /// Call established, media flowing
    Connected,
    /// Remote side reported busy
    Busy,
    /// We put the peer on hold
    OnHoldLocally,
    /// The peer put us on hold
    OnHoldRemotely,
    /// Both sides put each other on hold
    OnHoldMutually,
    /// Peer was referred (transferred) elsewhere
    Referred,
    /// Call leg ended normally
    Disconnected,
    /// Call leg ended with an error
    Failed,
}

impl CallPeerState {
    /// Check if the peer is on hold in either direction
    pub fn is_on_hold(&self) -> bool {
        matches!(
            self,
            CallPeerState::OnHoldLocally | CallPeerState::OnHoldRemotely | CallPeerState::OnHoldMutually
        )
    }

    /// Check if the call leg has ended
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallPeerState::Disconnected | CallPeerState::Failed)
    }

    /// Check if the peer is connected (held peers count as connected)
    pub fn is_established(&self) -> bool {
        *self == CallPeerState::Connected || self.is_on_hold()
    }

    /// Human-readable label for UI display
    pub fn label(&self) -> &'static str {
        match self {
            CallPeerState::Unknown => "Unknown",
            CallPeerState::InitiatingCall => "Initiating Call",
            CallPeerState::IncomingCall => "Incoming Call",
            CallPeerState::Connecting => "Connecting",
            CallPeerState::ConnectingWithEarlyMedia => "Connecting with Early Media",
            CallPeerState::ConnectingIncomingCallWithMedia => "Connecting Incoming Call with Media",
            CallPeerState::AlertingRemoteSide => "Ringing",
            CallPeerState::Connected => "Connected",
            CallPeerState::Busy => "Busy",
            CallPeerState::OnHoldLocally => "Locally On Hold",
            CallPeerState::OnHoldRemotely => "Remotely On Hold",
            CallPeerState::OnHoldMutually => "Mutually On Hold",
            CallPeerState::Referred => "Referred",
            CallPeerState::Disconnected => "Disconnected",
            CallPeerState::Failed => "Failed",
        }
    }
}

impl fmt::Display for CallPeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

struct StateRecord {
    state: CallPeerState,
    reason: Option<String>,
    reason_code: Option<u16>,
}

/// One remote party within a call
pub struct CallPeer {
    id: PeerId,
    address: String,
    call: Weak<Call>,
    self_ref: Weak<CallPeer>,
    display_name: RwLock<Option<String>>,
    state: RwLock<StateRecord>,
    call_duration_start: RwLock<Option<DateTime<Utc>>>,
    conference_focus: AtomicBool,
    conference_members: CopyOnWrite<Vec<Arc<ConferenceMember>>>,
    security_status: RwLock<CallSecurityStatus>,
    resource: RwLock<Option<String>>,
    notifications: DispatchQueue<CallPeerChangeEvent>,
    state_listeners: ListenerRegistry<dyn CallPeerListener>,
    conference_listeners: ListenerRegistry<dyn CallPeerConferenceListener>,
    security_listeners: ListenerRegistry<dyn CallPeerSecurityListener>,
    resource_listeners: ListenerRegistry<dyn CallPeerResourceListener>,
}

impl CallPeer {
    /// Create a peer belonging to `call` with a generated identifier
    ///
    /// The peer is not attached to the call yet; the provider does that with
    /// [`Call::add_peer`] once the peer is ready to be seen.
    pub fn new(call: &Arc<Call>, address: impl Into<String>) -> Arc<Self> {
        Self::with_id(call, PeerId::new(), address)
    }

    /// Create a peer with a provider-assigned identifier
    pub fn with_id(call: &Arc<Call>, id: PeerId, address: impl Into<String>) -> Arc<Self> {
        let address = address.into();
        Arc::new_cyclic(|self_ref| Self {
            id,
            address,
            call: Arc::downgrade(call),
            self_ref: self_ref.clone(),
            display_name: RwLock::new(None),
            state: RwLock::new(StateRecord {
                state: CallPeerState::Unknown,
                reason: None,
                reason_code: None,
            }),
            call_duration_start: RwLock::new(None),
            conference_focus: AtomicBool::new(false),
            conference_members: CopyOnWrite::new(Vec::new()),
            security_status: RwLock::new(CallSecurityStatus::Off),
            resource: RwLock::new(None),
            notifications: DispatchQueue::new(),
            state_listeners: ListenerRegistry::new(),
            conference_listeners: ListenerRegistry::new(),
            security_listeners: ListenerRegistry::new(),
            resource_listeners: ListenerRegistry::new(),
        })
    }

    pub fn id(&self) -> &PeerId {
        &self.id
    }

    /// Remote address (SIP URI, JID, ...)
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Call this peer belongs to, while that call is alive
    pub fn call(&self) -> Option<Arc<Call>> {
        self.call.upgrade()
    }

    pub fn display_name(&self) -> Option<String> {
        self.display_name.read().clone()
    }

    pub fn state(&self) -> CallPeerState {
        self.state.read().state
    }

    /// Reason supplied with the most recent transition
    pub fn state_reason(&self) -> Option<String> {
        self.state.read().reason.clone()
    }

    /// Reason code supplied with the most recent transition
    pub fn state_reason_code(&self) -> Option<u16> {
        self.state.read().reason_code
    }

    /// Move the peer to `new_state`
    ///
    /// Setting the current state again is a no-op and notifies nobody.
    /// Otherwise the state is updated atomically and a
    /// [`CallPeerChangeEvent`] is delivered to every state listener.
    ///
    /// # Delivery
    ///
    /// Notifications for one peer are delivered in transition order. If
    /// another thread is already delivering this peer's notifications, the
    /// event is queued behind them, delivered by that thread, and this call
    /// blocks until its own event has reached every listener.
    ///
    /// When called from inside a listener callback while another delivery
    /// of this peer is in flight, the event is queued and this call returns
    /// `Ok(())` at once. The event is still delivered in order after the
    /// current one; a fatal fault it triggers is logged, not returned.
    ///
    /// # Errors
    ///
    /// [`CallCoreError::ListenerAborted`](crate::CallCoreError::ListenerAborted)
    /// when a listener reports a fatal fault for this transition. Faults
    /// raised by other callers' transitions are never returned here. The
    /// state change itself has already been applied.
    pub fn set_state(
        &self,
        new_state: CallPeerState,
        reason: Option<&str>,
        reason_code: Option<u16>,
    ) -> CallCoreResult<()> {
        let Some(peer) = self.self_ref.upgrade() else {
            return Ok(());
        };

        let delivery = {
            let mut record = self.state.write();
            if record.state == new_state {
                debug!(peer_id = %self.id, state = %new_state, "Peer already in requested state");
                return Ok(());
            }

            let old_state = record.state;
            record.state = new_state;
            record.reason = reason.map(str::to_string);
            record.reason_code = reason_code;

            if new_state == CallPeerState::Connected && !old_state.is_on_hold() {
                *self.call_duration_start.write() = Some(Utc::now());
            }

            debug!(
                peer_id = %self.id,
                old_state = %old_state,
                new_state = %new_state,
                "Call peer state changed"
            );

            self.notifications.enqueue(CallPeerChangeEvent {
                peer,
                old_state,
                new_state,
                reason: reason.map(str::to_string),
                reason_code,
                timestamp: Utc::now(),
            })
        };

        self.notifications.drain(&delivery, |event| {
            self.state_listeners
                .dispatch("peer_state_changed", |listener| listener.peer_state_changed(event))
        })
    }

    /// When the peer last entered `Connected` from a non-held state
    pub fn call_duration_start(&self) -> Option<DateTime<Utc>> {
        *self.call_duration_start.read()
    }

    /// Time elapsed since [`CallPeer::call_duration_start`]
    pub fn call_duration(&self) -> Option<chrono::Duration> {
        self.call_duration_start().map(|start| Utc::now() - start)
    }

    /// Change the display name and notify state listeners
    pub fn set_display_name(&self, name: Option<String>) -> CallCoreResult<()> {
        let Some(peer) = self.self_ref.upgrade() else {
            return Ok(());
        };
        let old_name = {
            let mut current = self.display_name.write();
            if *current == name {
                return Ok(());
            }
            std::mem::replace(&mut *current, name.clone())
        };

        let event = CallPeerDisplayNameEvent {
            peer,
            old_name,
            new_name: name,
        };
        self.state_listeners
            .dispatch("peer_display_name_changed", |listener| listener.peer_display_name_changed(&event))
    }

    // ===== CONFERENCE FOCUS AND MEMBERS =====

    /// Whether the remote party mixes a conference
    pub fn is_conference_focus(&self) -> bool {
        self.conference_focus.load(Ordering::SeqCst)
    }

    /// Mark the remote party as (not) mixing a conference
    pub fn set_conference_focus(&self, focus: bool) -> CallCoreResult<()> {
        if self.conference_focus.swap(focus, Ordering::SeqCst) == focus {
            return Ok(());
        }
        debug!(peer_id = %self.id, focus, "Peer conference focus changed");
        self.fire_conference_event(CallPeerConferenceEventKind::FocusChanged, None)
    }

    /// Snapshot of the members announced by this peer
    pub fn conference_members(&self) -> Arc<Vec<Arc<ConferenceMember>>> {
        self.conference_members.load()
    }

    /// Number of members, or zero when the peer is not a conference focus
    pub fn conference_member_count(&self) -> usize {
        if self.is_conference_focus() {
            self.conference_members.load().len()
        } else {
            0
        }
    }

    /// Add a member; returns `false` if an equal member is already present
    pub fn add_conference_member(&self, member: Arc<ConferenceMember>) -> CallCoreResult<bool> {
        let added = self.conference_members.update(|members| {
            if members.iter().any(|m| Arc::ptr_eq(m, &member) || **m == *member) {
                false
            } else {
                members.push(member.clone());
                true
            }
        });
        if !added {
            return Ok(false);
        }
        self.fire_conference_event(CallPeerConferenceEventKind::MemberAdded, Some(member))?;
        Ok(true)
    }

    /// Remove a member; returns `false` if no equal member was present
    pub fn remove_conference_member(&self, member: &Arc<ConferenceMember>) -> CallCoreResult<bool> {
        let mut removed = None;
        self.conference_members.update(|members| {
            match members.iter().position(|m| Arc::ptr_eq(m, member) || **m == **member) {
                Some(index) => {
                    removed = Some(members.remove(index));
                    true
                }
                None => false,
            }
        });
        let Some(removed) = removed else {
            return Ok(false);
        };
        self.fire_conference_event(CallPeerConferenceEventKind::MemberRemoved, Some(removed))?;
        Ok(true)
    }

    fn fire_conference_event(
        &self,
        kind: CallPeerConferenceEventKind,
        member: Option<Arc<ConferenceMember>>,
    ) -> CallCoreResult<()> {
        let Some(peer) = self.self_ref.upgrade() else {
            return Ok(());
        };
        let event = CallPeerConferenceEvent { peer, kind, member };
        self.conference_listeners
            .dispatch("peer_conference_changed", |listener| deliver_peer_conference_event(listener, &event))
    }

    // ===== SECURITY AND RESOURCE =====

    pub fn security_status(&self) -> CallSecurityStatus {
        self.security_status.read().clone()
    }

    /// Record a media security change and notify security listeners
    pub fn set_security_status(&self, status: CallSecurityStatus) -> CallCoreResult<()> {
        let Some(peer) = self.self_ref.upgrade() else {
            return Ok(());
        };
        {
            let mut current = self.security_status.write();
            if *current == status {
                return Ok(());
            }
            *current = status.clone();
        }
        let event = CallPeerSecurityEvent { peer, status };
        self.security_listeners
            .dispatch("peer_security_changed", |listener| listener.security_status_changed(&event))
    }

    /// Remote resource (device or endpoint) currently serving the call
    pub fn resource(&self) -> Option<String> {
        self.resource.read().clone()
    }

    pub fn set_resource(&self, resource: Option<String>) -> CallCoreResult<()> {
        let Some(peer) = self.self_ref.upgrade() else {
            return Ok(());
        };
        let old_resource = {
            let mut current = self.resource.write();
            if *current == resource {
                return Ok(());
            }
            std::mem::replace(&mut *current, resource.clone())
        };
        let event = CallPeerResourceEvent {
            peer,
            old_resource,
            new_resource: resource,
        };
        self.resource_listeners
            .dispatch("peer_resource_changed", |listener| listener.resource_changed(&event))
    }

    // ===== LISTENER REGISTRATION =====

    /// Register a state listener; duplicates are ignored
    pub fn add_call_peer_listener(&self, listener: Arc<dyn CallPeerListener>) -> bool {
        self.state_listeners.add(listener)
    }

    pub fn remove_call_peer_listener(&self, listener: &Arc<dyn CallPeerListener>) -> bool {
        self.state_listeners.remove(listener)
    }

    pub fn call_peer_listener_count(&self) -> usize {
        self.state_listeners.len()
    }

    /// Register a conference listener; duplicates are ignored
    pub fn add_conference_listener(&self, listener: Arc<dyn CallPeerConferenceListener>) -> bool {
        self.conference_listeners.add(listener)
    }

    pub fn remove_conference_listener(&self, listener: &Arc<dyn CallPeerConferenceListener>) -> bool {
        self.conference_listeners.remove(listener)
    }

    pub fn conference_listener_count(&self) -> usize {
        self.conference_listeners.len()
    }

    pub fn add_security_listener(&self, listener: Arc<dyn CallPeerSecurityListener>) -> bool {
        self.security_listeners.add(listener)
    }

    pub fn remove_security_listener(&self, listener: &Arc<dyn CallPeerSecurityListener>) -> bool {
        self.security_listeners.remove(listener)
    }

    pub fn add_resource_listener(&self, listener: Arc<dyn CallPeerResourceListener>) -> bool {
        self.resource_listeners.add(listener)
    }

    pub fn remove_resource_listener(&self, listener: &Arc<dyn CallPeerResourceListener>) -> bool {
        self.resource_listeners.remove(listener)
    }
}

impl fmt::Debug for CallPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallPeer")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("state", &self.state())
            .field("conference_focus", &self.is_conference_focus())
            .finish()
    }
}

impl fmt::Display for CallPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.display_name() {
            Some(name) => write!(f, "{} <{}>", name, self.address),
            None => f.write_str(&self.address),
        }
    }
}
