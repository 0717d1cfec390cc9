//! Call-core: call lifecycle coordination for rvoip clients
//!
//! This crate sits between protocol providers (SIP, XMPP, ...) and the user
//! interface. Providers create [`Call`]s and [`CallPeer`]s and drive their
//! transitions; call-core tracks them, derives conference state and applies
//! the cross-call admission policy.
//!
//! ## Layering
//! ```text
//! UI / application
//!        |  listener traits, snapshots
//! call-core  (peers, calls, conferences, active set, admission policy)
//!        |  ProtocolProvider / TelephonyOperations
//! protocol providers -> signaling stacks
//! ```
//!
//! Call-core focuses on:
//! - Per-peer state machines with ordered notifications
//! - Conference focus derivation and event relaying
//! - The set of calls that have not ended
//! - Holding competing calls and rejecting unwanted ones
//!
//! There is no internal event loop. Everything runs synchronously on the
//! thread that reports the signaling event; the only background work is the
//! conference display-state reset timer, which runs on tokio.

pub mod call;
pub mod conference;
pub mod config;
pub mod error;
pub mod events;
pub mod listeners;
pub mod member;
pub mod peer;
pub mod policy;
pub mod provider;
pub mod registry;

// Public API exports
pub use call::{Call, CallId, CallState};
pub use conference::{ConferenceDisplayState, ConferenceMembership};
pub use config::{BusyRange, CallCoreConfig, ConferenceConfig, PolicyConfig};
pub use error::{CallCoreError, CallCoreResult, ListenerError, ListenerResult};
pub use events::{
    CallChangeListener, CallEvent, CallEventKind, CallListener, CallPeerConferenceListener,
    CallPeerListener, CallPeerResourceListener, CallPeerSecurityListener, CallSecurityStatus,
    ConferencePropertyListener,
};
pub use listeners::{CopyOnWrite, ListenerRegistry};
pub use member::ConferenceMember;
pub use peer::{CallPeer, CallPeerState, PeerId};
pub use policy::CallAdmissionPolicy;
pub use provider::{
    presence, ProtocolProvider, TelephonyOperations, HANGUP_REASON_BUSY_HERE,
    HANGUP_REASON_NORMAL_CLEARING, HANGUP_REASON_TIMEOUT,
};
pub use registry::{ActiveCallRegistry, ActiveCallsListener};

/// Call-core version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
