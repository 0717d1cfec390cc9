//! Event payloads and listener traits
//!
//! Listener traits follow an adapter style: every callback has a default
//! implementation that accepts the event and does nothing, so an observer
//! implements only the callbacks it cares about.
//!
//! All callbacks run synchronously on the thread that produced the event.
//! A slow listener delays the listeners after it in the same fan-out but
//! never blocks unrelated calls.
//!
//! # Example
//!
//! ```rust
//! use rvoip_call_core::events::{CallPeerChangeEvent, CallPeerListener};
//! use rvoip_call_core::ListenerResult;
//!
//! struct StateLogger;
//!
//! impl CallPeerListener for StateLogger {
//!     fn peer_state_changed(&self, event: &CallPeerChangeEvent) -> ListenerResult {
//!         println!("{} -> {}", event.old_state, event.new_state);
//!         Ok(())
//!     }
//! }
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::call::{Call, CallState};
use crate::conference::{ConferenceDisplayState, ConferenceMembership};
use crate::error::ListenerResult;
use crate::member::ConferenceMember;
use crate::peer::{CallPeer, CallPeerState};

// ===== PEER EVENTS =====

/// A call peer moved to a new state
#[derive(Debug, Clone)]
pub struct CallPeerChangeEvent {
    /// Peer that changed state
    pub peer: Arc<CallPeer>,
    /// State before the transition
    pub old_state: CallPeerState,
    /// State after the transition
    pub new_state: CallPeerState,
    /// Human-readable reason supplied by the protocol provider
    pub reason: Option<String>,
    /// Protocol reason code (e.g. a SIP status code)
    pub reason_code: Option<u16>,
    /// When the transition happened
    pub timestamp: DateTime<Utc>,
}

/// A call peer's display name changed
#[derive(Debug, Clone)]
pub struct CallPeerDisplayNameEvent {
    pub peer: Arc<CallPeer>,
    pub old_name: Option<String>,
    pub new_name: Option<String>,
}

/// Kind of conference change reported by a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallPeerConferenceEventKind {
    /// The peer started or stopped acting as a conference focus
    FocusChanged,
    /// A conference member became known through the peer
    MemberAdded,
    /// A conference member left the conference mixed by the peer
    MemberRemoved,
}

/// Conference change reported by a peer that mixes a conference
#[derive(Debug, Clone)]
pub struct CallPeerConferenceEvent {
    /// Peer acting as (or ceasing to act as) a conference focus
    pub peer: Arc<CallPeer>,
    /// What changed
    pub kind: CallPeerConferenceEventKind,
    /// Member added or removed; `None` for focus changes
    pub member: Option<Arc<ConferenceMember>>,
}

/// Media security status of a peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallSecurityStatus {
    /// No media encryption negotiated
    Off,
    /// Media is encrypted
    On {
        /// Negotiated cipher suite
        cipher: String,
    },
    /// Encryption was requested but could not be negotiated
    NegotiationFailed {
        reason: String,
    },
}

/// A peer's media security status changed
#[derive(Debug, Clone)]
pub struct CallPeerSecurityEvent {
    pub peer: Arc<CallPeer>,
    pub status: CallSecurityStatus,
}

/// The remote resource (device/endpoint) behind a peer changed
#[derive(Debug, Clone)]
pub struct CallPeerResourceEvent {
    pub peer: Arc<CallPeer>,
    pub old_resource: Option<String>,
    pub new_resource: Option<String>,
}

/// Observer of peer state and display-name changes
pub trait CallPeerListener: Send + Sync {
    /// The peer moved to a new state
    fn peer_state_changed(&self, event: &CallPeerChangeEvent) -> ListenerResult {
        let _ = event;
        Ok(())
    }

    /// The peer's display name changed
    fn peer_display_name_changed(&self, event: &CallPeerDisplayNameEvent) -> ListenerResult {
        let _ = event;
        Ok(())
    }
}

/// Observer of conference changes reported by peers
pub trait CallPeerConferenceListener: Send + Sync {
    fn conference_focus_changed(&self, event: &CallPeerConferenceEvent) -> ListenerResult {
        let _ = event;
        Ok(())
    }

    fn conference_member_added(&self, event: &CallPeerConferenceEvent) -> ListenerResult {
        let _ = event;
        Ok(())
    }

    fn conference_member_removed(&self, event: &CallPeerConferenceEvent) -> ListenerResult {
        let _ = event;
        Ok(())
    }
}

/// Route a conference event to the matching callback
pub(crate) fn deliver_peer_conference_event(
    listener: &dyn CallPeerConferenceListener,
    event: &CallPeerConferenceEvent,
) -> ListenerResult {
    match event.kind {
        CallPeerConferenceEventKind::FocusChanged => listener.conference_focus_changed(event),
        CallPeerConferenceEventKind::MemberAdded => listener.conference_member_added(event),
        CallPeerConferenceEventKind::MemberRemoved => listener.conference_member_removed(event),
    }
}

/// Observer of peer media security changes
pub trait CallPeerSecurityListener: Send + Sync {
    fn security_status_changed(&self, event: &CallPeerSecurityEvent) -> ListenerResult;
}

/// Observer of remote resource changes
pub trait CallPeerResourceListener: Send + Sync {
    fn resource_changed(&self, event: &CallPeerResourceEvent) -> ListenerResult;
}

// ===== CALL EVENTS =====

/// Whether a peer joined or left a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallPeerEventKind {
    Added,
    Removed,
}

/// A peer joined or left a call
#[derive(Debug, Clone)]
pub struct CallPeerEvent {
    pub call: Arc<Call>,
    pub peer: Arc<CallPeer>,
    pub kind: CallPeerEventKind,
}

/// A call moved to a new state
#[derive(Debug, Clone)]
pub struct CallChangeEvent {
    pub call: Arc<Call>,
    pub old_state: CallState,
    pub new_state: CallState,
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Observer of a call's peer set and state
pub trait CallChangeListener: Send + Sync {
    fn call_peer_added(&self, event: &CallPeerEvent) -> ListenerResult {
        let _ = event;
        Ok(())
    }

    fn call_peer_removed(&self, event: &CallPeerEvent) -> ListenerResult {
        let _ = event;
        Ok(())
    }

    fn call_state_changed(&self, event: &CallChangeEvent) -> ListenerResult {
        let _ = event;
        Ok(())
    }
}

/// Lifecycle milestone reported by a protocol provider's telephony layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallEventKind {
    /// Outgoing call created locally
    Initiated,
    /// Incoming call received from the network
    Received,
    /// Call ended
    Ended,
}

/// Call lifecycle event
#[derive(Debug, Clone)]
pub struct CallEvent {
    pub call: Arc<Call>,
    pub kind: CallEventKind,
}

impl CallEvent {
    pub fn new(call: Arc<Call>, kind: CallEventKind) -> Self {
        Self { call, kind }
    }
}

/// Observer of call lifecycle events, fed by protocol providers
pub trait CallListener: Send + Sync {
    fn outgoing_call_created(&self, event: &CallEvent) -> ListenerResult {
        let _ = event;
        Ok(())
    }

    fn incoming_call_received(&self, event: &CallEvent) -> ListenerResult {
        let _ = event;
        Ok(())
    }

    fn call_ended(&self, event: &CallEvent) -> ListenerResult {
        let _ = event;
        Ok(())
    }
}

// ===== CONFERENCE EVENTS =====

/// Property of a conference that changed
#[derive(Debug, Clone)]
pub enum ConferencePropertyChange {
    /// A call joined the conference
    CallAdded(Arc<Call>),
    /// A call left the conference
    CallRemoved(Arc<Call>),
    /// The derived conference-focus flag flipped
    FocusChanged { old: bool, new: bool },
    /// The display-only transient state changed
    DisplayStateChanged {
        old: ConferenceDisplayState,
        new: ConferenceDisplayState,
    },
}

/// Property change notification from a conference
#[derive(Debug, Clone)]
pub struct ConferencePropertyEvent {
    pub conference: Arc<ConferenceMembership>,
    pub change: ConferencePropertyChange,
}

/// Observer of conference-level property changes
pub trait ConferencePropertyListener: Send + Sync {
    fn conference_property_changed(&self, event: &ConferencePropertyEvent) -> ListenerResult;
}
