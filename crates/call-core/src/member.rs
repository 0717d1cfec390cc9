//! Conference members
//!
//! A conference member is a participant we only know about indirectly: a
//! remote peer that mixes a conference tells us who else is in it. Members
//! are created by protocol providers and attached to the focus peer with
//! [`CallPeer::add_conference_member`](crate::CallPeer::add_conference_member).

use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::peer::{CallPeer, CallPeerState};

/// A participant known through a peer that is a conference focus
///
/// Two members are equal when they have the same address.
pub struct ConferenceMember {
    address: String,
    focus: Weak<CallPeer>,
    display_name: RwLock<Option<String>>,
    audio_ssrc: RwLock<Option<u32>>,
    video_ssrc: RwLock<Option<u32>>,
    state: RwLock<CallPeerState>,
}

impl ConferenceMember {
    /// Create a member announced by `focus`
    pub fn new(focus: &Arc<CallPeer>, address: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            address: address.into(),
            focus: Arc::downgrade(focus),
            display_name: RwLock::new(None),
            audio_ssrc: RwLock::new(None),
            video_ssrc: RwLock::new(None),
            state: RwLock::new(CallPeerState::Unknown),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Peer mixing the conference this member belongs to
    pub fn conference_focus(&self) -> Option<Arc<CallPeer>> {
        self.focus.upgrade()
    }

    pub fn display_name(&self) -> Option<String> {
        self.display_name.read().clone()
    }

    pub fn set_display_name(&self, name: Option<String>) {
        *self.display_name.write() = name;
    }

    /// Synchronization source of the member's audio in the mixed stream
    ///
    /// Used to correlate per-member audio levels with this member.
    pub fn audio_ssrc(&self) -> Option<u32> {
        *self.audio_ssrc.read()
    }

    pub fn set_audio_ssrc(&self, ssrc: Option<u32>) {
        *self.audio_ssrc.write() = ssrc;
    }

    pub fn video_ssrc(&self) -> Option<u32> {
        *self.video_ssrc.read()
    }

    pub fn set_video_ssrc(&self, ssrc: Option<u32>) {
        *self.video_ssrc.write() = ssrc;
    }

    pub fn state(&self) -> CallPeerState {
        *self.state.read()
    }

    pub fn set_state(&self, state: CallPeerState) {
        *self.state.write() = state;
    }
}

impl PartialEq for ConferenceMember {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for ConferenceMember {}

impl std::fmt::Debug for ConferenceMember {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConferenceMember")
            .field("address", &self.address)
            .field("display_name", &*self.display_name.read())
            .field("audio_ssrc", &*self.audio_ssrc.read())
            .field("state", &*self.state.read())
            .finish()
    }
}
