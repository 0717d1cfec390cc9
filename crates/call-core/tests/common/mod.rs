//! Shared fixtures for call-core integration tests

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;
use rvoip_call_core::{
    Call, CallCoreError, CallCoreResult, CallPeer, CallPeerState, CallState, PeerId,
    ProtocolProvider, TelephonyOperations,
};

/// Telephony capability that records every request
///
/// With `apply_states` enabled it also moves peers the way a real provider
/// would once the remote side acknowledges: hold -> `OnHoldLocally`,
/// unhold -> `Connected`, hangup -> `Disconnected`.
#[derive(Default)]
pub struct MockTelephony {
    pub held: Mutex<Vec<PeerId>>,
    pub unheld: Mutex<Vec<PeerId>>,
    pub hangups: Mutex<Vec<(PeerId, u16, String)>>,
    failing_peers: Mutex<HashSet<PeerId>>,
    apply_states: bool,
}

impl MockTelephony {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn applying_states() -> Arc<Self> {
        Arc::new(Self {
            apply_states: true,
            ..Self::default()
        })
    }

    /// Make every operation on `peer` fail
    pub fn fail_for(&self, peer: &Arc<CallPeer>) {
        self.failing_peers.lock().insert(peer.id().clone());
    }

    pub fn held_peers(&self) -> Vec<PeerId> {
        self.held.lock().clone()
    }

    pub fn hangups(&self) -> Vec<(PeerId, u16, String)> {
        self.hangups.lock().clone()
    }

    fn check(&self, operation: &str, peer: &Arc<CallPeer>) -> CallCoreResult<()> {
        if self.failing_peers.lock().contains(peer.id()) {
            return Err(CallCoreError::operation_failed(
                operation,
                format!("remote side rejected request for {}", peer.address()),
            ));
        }
        Ok(())
    }
}

impl TelephonyOperations for MockTelephony {
    fn put_on_hold(&self, peer: &Arc<CallPeer>) -> CallCoreResult<()> {
        self.check("put_on_hold", peer)?;
        self.held.lock().push(peer.id().clone());
        if self.apply_states {
            peer.set_state(CallPeerState::OnHoldLocally, None, None)?;
        }
        Ok(())
    }

    fn put_off_hold(&self, peer: &Arc<CallPeer>) -> CallCoreResult<()> {
        self.check("put_off_hold", peer)?;
        self.unheld.lock().push(peer.id().clone());
        if self.apply_states {
            peer.set_state(CallPeerState::Connected, None, None)?;
        }
        Ok(())
    }

    fn hangup_call_peer(&self, peer: &Arc<CallPeer>, reason_code: u16, reason: &str) -> CallCoreResult<()> {
        self.check("hangup_call_peer", peer)?;
        self.hangups
            .lock()
            .push((peer.id().clone(), reason_code, reason.to_string()));
        if self.apply_states {
            peer.set_state(CallPeerState::Disconnected, Some(reason), Some(reason_code))?;
        }
        Ok(())
    }
}

/// Protocol provider with configurable telephony and presence
pub struct MockProvider {
    account: String,
    telephony: Option<Arc<MockTelephony>>,
    presence: Mutex<Option<u32>>,
    linked: Option<Arc<dyn ProtocolProvider>>,
}

impl MockProvider {
    pub fn new(account: &str, telephony: Arc<MockTelephony>) -> Arc<Self> {
        Arc::new(Self {
            account: account.to_string(),
            telephony: Some(telephony),
            presence: Mutex::new(None),
            linked: None,
        })
    }

    pub fn without_telephony(account: &str) -> Arc<Self> {
        Arc::new(Self {
            account: account.to_string(),
            telephony: None,
            presence: Mutex::new(None),
            linked: None,
        })
    }

    pub fn with_presence(account: &str, telephony: Arc<MockTelephony>, status: u32) -> Arc<Self> {
        let provider = Self::new(account, telephony);
        provider.set_presence(Some(status));
        provider
    }

    /// Provider with no presence of its own, backed by `linked`
    pub fn with_linked(
        account: &str,
        telephony: Arc<MockTelephony>,
        linked: Arc<dyn ProtocolProvider>,
    ) -> Arc<Self> {
        Arc::new(Self {
            account: account.to_string(),
            telephony: Some(telephony),
            presence: Mutex::new(None),
            linked: Some(linked),
        })
    }

    pub fn set_presence(&self, status: Option<u32>) {
        *self.presence.lock() = status;
    }
}

impl ProtocolProvider for MockProvider {
    fn account_id(&self) -> &str {
        &self.account
    }

    fn protocol_name(&self) -> &str {
        "mock"
    }

    fn telephony(&self) -> Option<Arc<dyn TelephonyOperations>> {
        self.telephony
            .clone()
            .map(|t| t as Arc<dyn TelephonyOperations>)
    }

    fn presence_status(&self) -> Option<u32> {
        *self.presence.lock()
    }

    fn linked_provider(&self) -> Option<Arc<dyn ProtocolProvider>> {
        self.linked.clone()
    }
}

/// Route crate logs to the test writer; `RUST_LOG` overrides the filter
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rvoip_call_core=info")),
        )
        .with_test_writer()
        .try_init();
}

/// Create a call with one peer attached
pub fn call_with_peer(provider: &Arc<MockProvider>, address: &str) -> (Arc<Call>, Arc<CallPeer>) {
    let call = Call::new(provider.clone());
    let peer = add_peer(&call, address);
    (call, peer)
}

pub fn add_peer(call: &Arc<Call>, address: &str) -> Arc<CallPeer> {
    let peer = CallPeer::new(call, address);
    call.add_peer(peer.clone()).expect("add peer");
    peer
}

/// Bring a call up the way a provider does when the remote side answers
pub fn answer(call: &Arc<Call>, peer: &Arc<CallPeer>) {
    peer.set_state(CallPeerState::Connected, None, None).expect("peer connected");
    call.set_state(CallState::InProgress, None).expect("call in progress");
}
