//! Admission and hold policy scenarios

mod common;

use std::sync::Arc;

use common::{add_peer, answer, call_with_peer, MockProvider, MockTelephony};
use rvoip_call_core::presence::{AWAY_THRESHOLD, AVAILABLE_THRESHOLD};
use rvoip_call_core::{
    BusyRange, Call, CallAdmissionPolicy, CallEvent, CallEventKind, CallListener, CallPeerState,
    CallState, PolicyConfig, ProtocolProvider, HANGUP_REASON_BUSY_HERE,
};

fn received(policy: &CallAdmissionPolicy, call: &Arc<Call>) {
    policy
        .incoming_call_received(&CallEvent::new(call.clone(), CallEventKind::Received))
        .unwrap();
}

fn initiated(policy: &CallAdmissionPolicy, call: &Arc<Call>) {
    policy
        .outgoing_call_created(&CallEvent::new(call.clone(), CallEventKind::Initiated))
        .unwrap();
}

#[test]
fn test_call_going_in_progress_holds_unrelated_call() {
    let telephony = MockTelephony::applying_states();
    let provider = MockProvider::new("alice@example.com", telephony.clone());
    let policy = CallAdmissionPolicy::new(PolicyConfig::default());

    let (a, a_peer) = call_with_peer(&provider, "sip:bob@example.com");
    received(&policy, &a);
    answer(&a, &a_peer);

    let (b, _b_peer) = call_with_peer(&provider, "sip:carol@example.com");
    initiated(&policy, &b);
    b.set_state(CallState::InProgress, None).unwrap();

    assert_eq!(telephony.held_peers(), vec![a_peer.id().clone()]);
    assert_eq!(a_peer.state(), CallPeerState::OnHoldLocally);
}

#[test]
fn test_same_conference_calls_are_not_held() {
    let telephony = MockTelephony::new();
    let provider = MockProvider::new("alice@example.com", telephony.clone());
    let policy = CallAdmissionPolicy::new(PolicyConfig::default());

    let (a, a_peer) = call_with_peer(&provider, "sip:bob@example.com");
    received(&policy, &a);
    answer(&a, &a_peer);

    let (b, b_peer) = call_with_peer(&provider, "sip:carol@example.com");
    b.set_conference(a.conference()).unwrap();
    initiated(&policy, &b);
    answer(&b, &b_peer);

    assert!(telephony.held_peers().is_empty());
    assert!(a.is_conference_focus());
}

#[test]
fn test_held_and_terminated_peers_are_skipped() {
    let telephony = MockTelephony::applying_states();
    let provider = MockProvider::new("alice@example.com", telephony.clone());
    let policy = CallAdmissionPolicy::new(PolicyConfig::default());

    let (a, connected) = call_with_peer(&provider, "sip:bob@example.com");
    let held = add_peer(&a, "sip:carol@example.com");
    let gone = add_peer(&a, "sip:dave@example.com");
    let failed = add_peer(&a, "sip:erin@example.com");
    received(&policy, &a);
    answer(&a, &connected);
    held.set_state(CallPeerState::OnHoldRemotely, None, None).unwrap();
    gone.set_state(CallPeerState::Disconnected, None, None).unwrap();
    failed.set_state(CallPeerState::Failed, None, None).unwrap();

    let (b, b_peer) = call_with_peer(&provider, "sip:frank@example.com");
    received(&policy, &b);
    answer(&b, &b_peer);

    assert_eq!(telephony.held_peers(), vec![connected.id().clone()]);
}

#[test]
fn test_hold_failure_does_not_stop_other_holds() {
    let telephony = MockTelephony::new();
    let provider = MockProvider::new("alice@example.com", telephony.clone());
    let policy = CallAdmissionPolicy::new(PolicyConfig::default());

    let (a, a1) = call_with_peer(&provider, "sip:bob@example.com");
    let a2 = add_peer(&a, "sip:carol@example.com");
    received(&policy, &a);
    a2.set_state(CallPeerState::Connected, None, None).unwrap();
    answer(&a, &a1);

    let (c, c_peer) = call_with_peer(&provider, "sip:dave@example.com");
    received(&policy, &c);
    answer(&c, &c_peer);
    telephony.held.lock().clear();

    telephony.fail_for(&a1);
    let (b, b_peer) = call_with_peer(&provider, "sip:erin@example.com");
    initiated(&policy, &b);
    let result = b_peer.set_state(CallPeerState::Connected, None, None);

    assert!(result.is_ok(), "hold failures are logged, not propagated");
    let held = telephony.held_peers();
    assert!(held.contains(a2.id()));
    assert!(held.contains(c_peer.id()));
    assert!(!held.contains(a1.id()));
}

#[test]
fn test_peer_added_after_tracking_triggers_hold() {
    let telephony = MockTelephony::new();
    let provider = MockProvider::new("alice@example.com", telephony.clone());
    let policy = CallAdmissionPolicy::new(PolicyConfig::default());

    let (a, a_peer) = call_with_peer(&provider, "sip:bob@example.com");
    received(&policy, &a);
    answer(&a, &a_peer);

    let b = Call::new(provider.clone());
    initiated(&policy, &b);
    let late = add_peer(&b, "sip:carol@example.com");
    late.set_state(CallPeerState::Connected, None, None).unwrap();

    assert_eq!(telephony.held_peers(), vec![a_peer.id().clone()]);
}

#[test]
fn test_disabled_single_call_policy_never_holds() {
    let telephony = MockTelephony::new();
    let provider = MockProvider::new("alice@example.com", telephony.clone());
    let policy = CallAdmissionPolicy::new(PolicyConfig::new().with_single_call_in_progress(false));

    let (a, a_peer) = call_with_peer(&provider, "sip:bob@example.com");
    received(&policy, &a);
    answer(&a, &a_peer);
    let (b, b_peer) = call_with_peer(&provider, "sip:carol@example.com");
    received(&policy, &b);
    answer(&b, &b_peer);

    assert!(telephony.held_peers().is_empty());
    assert_eq!(policy.tracked_call_count(), 2);
}

#[test]
fn test_call_waiting_disabled_rejects_second_call() {
    let telephony = MockTelephony::new();
    let provider = MockProvider::new("alice@example.com", telephony.clone());
    let policy = CallAdmissionPolicy::new(PolicyConfig::new().with_call_waiting_disabled(true));

    let (a, a_peer) = call_with_peer(&provider, "sip:bob@example.com");
    received(&policy, &a);
    answer(&a, &a_peer);

    let (b, b_peer) = call_with_peer(&provider, "sip:carol@example.com");
    received(&policy, &b);

    assert_eq!(
        telephony.hangups(),
        vec![(b_peer.id().clone(), HANGUP_REASON_BUSY_HERE, "Busy here".to_string())]
    );
    assert!(!policy.is_tracking(&b));
    assert!(policy.is_tracking(&a));
    assert!(telephony.held_peers().is_empty());
    assert_eq!(a_peer.state(), CallPeerState::Connected);
}

#[test]
fn test_call_waiting_disabled_admits_when_idle() {
    let telephony = MockTelephony::new();
    let provider = MockProvider::new("alice@example.com", telephony.clone());
    let policy = CallAdmissionPolicy::new(PolicyConfig::new().with_call_waiting_disabled(true));

    // A tracked call that has not reached InProgress does not count
    let (a, _a_peer) = call_with_peer(&provider, "sip:bob@example.com");
    received(&policy, &a);
    let (b, _b_peer) = call_with_peer(&provider, "sip:carol@example.com");
    received(&policy, &b);

    assert!(telephony.hangups().is_empty());
    assert_eq!(policy.tracked_call_count(), 2);
}

#[test]
fn test_dnd_rejection_uses_linked_provider_presence() {
    let telephony = MockTelephony::new();
    let xmpp: Arc<dyn ProtocolProvider> =
        MockProvider::with_presence("alice@jabber.example.com", MockTelephony::new(), 25);
    let sip = MockProvider::with_linked("sip:alice@example.com", telephony.clone(), xmpp);
    let policy = CallAdmissionPolicy::new(PolicyConfig::new().with_reject_on_dnd(true));

    let (call, peer) = call_with_peer(&sip, "sip:bob@example.com");
    received(&policy, &call);

    assert_eq!(telephony.hangups().len(), 1);
    assert_eq!(telephony.hangups()[0].0, *peer.id());
    assert_eq!(telephony.hangups()[0].1, HANGUP_REASON_BUSY_HERE);
    assert_eq!(policy.tracked_call_count(), 0);
}

#[test]
fn test_dnd_outside_busy_band_admits() {
    let telephony = MockTelephony::new();
    let provider = MockProvider::with_presence("alice@example.com", telephony.clone(), AWAY_THRESHOLD);
    let policy = CallAdmissionPolicy::new(PolicyConfig::new().with_reject_on_dnd(true));

    let (away, _) = call_with_peer(&provider, "sip:bob@example.com");
    received(&policy, &away);

    provider.set_presence(Some(AVAILABLE_THRESHOLD));
    let (available, _) = call_with_peer(&provider, "sip:carol@example.com");
    received(&policy, &available);

    provider.set_presence(None);
    let (unknown, _) = call_with_peer(&provider, "sip:dave@example.com");
    received(&policy, &unknown);

    assert!(telephony.hangups().is_empty());
    assert_eq!(policy.tracked_call_count(), 3);
}

#[test]
fn test_dnd_account_override_and_custom_band() {
    let telephony = MockTelephony::new();
    let provider = MockProvider::with_presence("alice@example.com", telephony.clone(), 25);

    let policy = CallAdmissionPolicy::new(
        PolicyConfig::new()
            .with_reject_on_dnd(true)
            .with_account_reject_on_dnd("alice@example.com", false),
    );
    let (exempt, _) = call_with_peer(&provider, "sip:bob@example.com");
    received(&policy, &exempt);
    assert!(policy.is_tracking(&exempt));

    policy.set_config(
        PolicyConfig::new()
            .with_reject_on_dnd(true)
            .with_busy_range(BusyRange::new(30, 40)),
    );
    let (outside, _) = call_with_peer(&provider, "sip:carol@example.com");
    received(&policy, &outside);
    assert!(policy.is_tracking(&outside));
    assert!(telephony.hangups().is_empty());
}

#[test]
fn test_call_end_event_untracks() {
    let telephony = MockTelephony::new();
    let provider = MockProvider::new("alice@example.com", telephony.clone());
    let policy = CallAdmissionPolicy::new(PolicyConfig::default());

    let (a, a_peer) = call_with_peer(&provider, "sip:bob@example.com");
    received(&policy, &a);
    answer(&a, &a_peer);
    policy
        .call_ended(&CallEvent::new(a.clone(), CallEventKind::Ended))
        .unwrap();
    assert_eq!(policy.tracked_call_count(), 0);

    // An untracked call no longer drives holds
    let (b, b_peer) = call_with_peer(&provider, "sip:carol@example.com");
    received(&policy, &b);
    answer(&b, &b_peer);
    a_peer.set_state(CallPeerState::OnHoldRemotely, None, None).unwrap();
    a_peer.set_state(CallPeerState::Connected, None, None).unwrap();

    assert!(telephony.held_peers().is_empty());
}

#[test]
fn test_missing_telephony_degrades_quietly() {
    let with_telephony = MockTelephony::new();
    let provider = MockProvider::new("alice@example.com", with_telephony.clone());
    let bare = MockProvider::without_telephony("bare@example.com");
    let policy = CallAdmissionPolicy::new(PolicyConfig::default());

    let (a, a_peer) = call_with_peer(&bare, "sip:bob@example.com");
    received(&policy, &a);
    answer(&a, &a_peer);

    let (b, b_peer) = call_with_peer(&provider, "sip:carol@example.com");
    received(&policy, &b);
    answer(&b, &b_peer);

    assert_eq!(a_peer.state(), CallPeerState::Connected);
    assert!(with_telephony.held_peers().is_empty());
}
