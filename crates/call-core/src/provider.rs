//! Collaborators supplied by protocol providers
//!
//! call-core never speaks a wire protocol. Protocol providers (SIP, XMPP,
//! ...) create calls and peers, drive their transitions, and hand the core
//! a [`ProtocolProvider`] handle through which it reaches the provider's
//! telephony capability and presence state.

use std::sync::Arc;

use crate::error::CallCoreResult;
use crate::peer::CallPeer;

/// Hangup reason: normal call clearing
pub const HANGUP_REASON_NORMAL_CLEARING: u16 = 200;
/// Hangup reason: no answer within the allowed time
pub const HANGUP_REASON_TIMEOUT: u16 = 408;
/// Hangup reason: the local user is busy
pub const HANGUP_REASON_BUSY_HERE: u16 = 486;

/// Presence status thresholds
///
/// Presence is reported as an integer in `0..=MAX_STATUS_VALUE`; the bands
/// between these thresholds classify it.
pub mod presence {
    /// At or below: offline
    pub const OFFLINE_THRESHOLD: u32 = 0;
    /// Above: online in some form
    pub const ONLINE_THRESHOLD: u32 = 20;
    /// Below (and above online): do-not-disturb / busy
    pub const EXTENDED_AWAY_THRESHOLD: u32 = 31;
    /// At or above: away
    pub const AWAY_THRESHOLD: u32 = 36;
    /// At or above: available
    pub const AVAILABLE_THRESHOLD: u32 = 50;
    /// At or above: eager to communicate
    pub const EAGER_TO_COMMUNICATE_THRESHOLD: u32 = 80;
    /// Highest valid status value
    pub const MAX_STATUS_VALUE: u32 = 100;
}

/// Basic telephony capability of a protocol provider
///
/// Each operation is best effort; failures are reported as
/// [`CallCoreError::OperationFailed`](crate::CallCoreError::OperationFailed)
/// and callers in this crate log them without aborting sibling work.
pub trait TelephonyOperations: Send + Sync {
    /// Put the remote peer on hold
    fn put_on_hold(&self, peer: &Arc<CallPeer>) -> CallCoreResult<()>;

    /// Resume a held peer
    fn put_off_hold(&self, peer: &Arc<CallPeer>) -> CallCoreResult<()>;

    /// End the call leg to `peer`, signalling `reason_code`
    fn hangup_call_peer(
        &self,
        peer: &Arc<CallPeer>,
        reason_code: u16,
        reason: &str,
    ) -> CallCoreResult<()>;
}

/// Handle to the protocol provider that owns a call
pub trait ProtocolProvider: Send + Sync {
    /// Unique account identifier, used for per-account configuration
    fn account_id(&self) -> &str;

    /// Protocol name for diagnostics
    fn protocol_name(&self) -> &str {
        "unknown"
    }

    /// Telephony capability, if the provider supports calls
    fn telephony(&self) -> Option<Arc<dyn TelephonyOperations>>;

    /// Current presence status value, if the provider supports presence
    fn presence_status(&self) -> Option<u32> {
        None
    }

    /// Provider linked to this one for presence (e.g. an XMPP account that
    /// carries presence for a SIP account)
    fn linked_provider(&self) -> Option<Arc<dyn ProtocolProvider>> {
        None
    }
}

/// Presence status of `provider`, falling back to its linked provider
pub(crate) fn effective_presence_status(provider: &dyn ProtocolProvider) -> Option<u32> {
    provider
        .presence_status()
        .or_else(|| provider.linked_provider().and_then(|linked| linked.presence_status()))
}
