//
// Copyright 2019-2021 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! Tests for incoming calls

mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use roomrtc::common::{reason, CallDirection, CallMediaType, CallState, HangupParty};
use roomrtc::core::call::{Call, CallConfig};
use roomrtc::core::signaling::{CALL_ANSWER, CALL_HANGUP};
use roomrtc::error::RoomRtcError;
use roomrtc::sim::sim_channel::SimSignalChannel;
use roomrtc::sim::sim_media::{SimMediaProvider, SimVideoView};

use common::{
    answer_content, candidate, candidates_content, hangup_content, invite_content, test_init,
    TestContext,
};

fn ring(context: &TestContext, sdp: &str) {
    context
        .call
        .on_invite(
            invite_content(context.call.call_id().as_str(), sdp, Duration::from_secs(60)),
            Duration::from_secs(0),
        )
        .unwrap();
    context.sync();
}

// Inbound voice call: ringing, answer, connect, remote hangup.
#[test]
fn inbound_voice_happy_path() {
    let context = TestContext::new();

    ring(&context, common::AUDIO_SDP);
    assert_eq!(context.call.state().unwrap(), CallState::Ringing);
    assert_eq!(
        context.call.direction().unwrap(),
        Some(CallDirection::Incoming)
    );
    assert_eq!(
        context.call.media_type().unwrap(),
        Some(CallMediaType::Audio)
    );
    // The remote offer was applied to a fresh peer connection.
    assert_eq!(context.provider.peer_connections_created(), 1);
    assert_eq!(context.provider.remote_descriptions_set(), 1);

    context.call.answer().unwrap();
    context.sync();

    assert_eq!(context.call.state().unwrap(), CallState::Connecting);
    assert_eq!(
        context.counters.states(),
        vec![
            CallState::Ringing,
            CallState::WaitLocalMedia,
            CallState::CreateAnswer,
            CallState::Connecting
        ]
    );
    let constraints = context.provider.last_answer_constraints().unwrap();
    assert!(constraints.offer_to_receive_audio);
    assert!(!constraints.offer_to_receive_video);

    let answers = context.channel.published_of(CALL_ANSWER);
    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0]["version"], 0);
    assert_eq!(answers[0]["call_id"], context.call.call_id().as_str());
    assert_eq!(answers[0]["answer"]["type"], "answer");

    context.provider.ice_connected();
    context.sync();
    assert_eq!(context.call.state().unwrap(), CallState::Connected);
    assert!(context.call.did_connect());

    // Remote hangs up: nothing goes back out on the wire.
    context
        .call
        .on_hangup(hangup_content(context.call.call_id().as_str(), "user_hangup"))
        .unwrap();
    context.sync();
    assert_eq!(context.call.state().unwrap(), CallState::Ended);
    assert_eq!(
        context.call.hangup_party().unwrap(),
        Some(HangupParty::Remote)
    );
    assert_eq!(
        context.call.hangup_reason().unwrap().as_deref(),
        Some("user_hangup")
    );
    assert_eq!(context.counters.hangup_count(), 1);
    assert_eq!(context.channel.published_count(CALL_HANGUP), 0);
    assert_eq!(context.provider.peer_connections_closed(), 1);
}

// A video m-section in the offered SDP makes it a video call, which
// answers with video receive enabled.
#[test]
fn inbound_video_type_inferred_from_sdp() {
    let context = TestContext::new();

    ring(&context, common::VIDEO_SDP);
    assert_eq!(
        context.call.media_type().unwrap(),
        Some(CallMediaType::Video)
    );

    context.call.answer().unwrap();
    context.sync();

    let capture = context.provider.last_constraints().unwrap();
    assert!(capture.video.is_some());
    let constraints = context.provider.last_answer_constraints().unwrap();
    assert!(constraints.offer_to_receive_video);
}

// An aged invite rings only for the remaining lifetime.
#[test]
fn inbound_aged_invite_expires_early() {
    let context = TestContext::new();

    context
        .call
        .on_invite(
            invite_content(
                context.call.call_id().as_str(),
                common::AUDIO_SDP,
                Duration::from_millis(400),
            ),
            Duration::from_millis(300),
        )
        .unwrap();
    context.sync();
    assert_eq!(context.call.state().unwrap(), CallState::Ringing);

    thread::sleep(Duration::from_millis(400));
    context.sync();

    assert_eq!(context.call.state().unwrap(), CallState::Ended);
    assert_eq!(
        context.call.hangup_party().unwrap(),
        Some(HangupParty::Remote)
    );
    assert_eq!(
        context.call.hangup_reason().unwrap().as_deref(),
        Some(reason::INVITE_TIMEOUT)
    );
    assert_eq!(context.counters.hangup_count(), 1);
    // Expiry is local bookkeeping; nothing is published.
    assert_eq!(context.channel.total_attempts(), 0);
    assert_eq!(context.provider.peer_connections_closed(), 1);
}

// A fresh invite rings for its whole lifetime.
#[test]
fn inbound_unaged_invite_expires_after_lifetime() {
    let context = TestContext::new();

    context
        .call
        .on_invite(
            invite_content(
                context.call.call_id().as_str(),
                common::AUDIO_SDP,
                Duration::from_millis(400),
            ),
            Duration::from_secs(0),
        )
        .unwrap();
    context.sync();

    thread::sleep(Duration::from_millis(200));
    context.sync();
    assert_eq!(context.call.state().unwrap(), CallState::Ringing);

    thread::sleep(Duration::from_millis(400));
    context.sync();
    assert_eq!(context.call.state().unwrap(), CallState::Ended);
    assert_eq!(
        context.call.hangup_reason().unwrap().as_deref(),
        Some(reason::INVITE_TIMEOUT)
    );
}

// Answering after the ring expired is an idempotent no-op.
#[test]
fn inbound_answer_after_expiry_is_ignored() {
    let context = TestContext::new();

    context
        .call
        .on_invite(
            invite_content(
                context.call.call_id().as_str(),
                common::AUDIO_SDP,
                Duration::from_millis(150),
            ),
            Duration::from_secs(0),
        )
        .unwrap();
    context.sync();
    thread::sleep(Duration::from_millis(400));
    context.sync();
    assert_eq!(context.call.state().unwrap(), CallState::Ended);

    context.call.answer().unwrap();
    context.sync();
    assert_eq!(context.call.state().unwrap(), CallState::Ended);
    assert_eq!(context.provider.streams_acquired(), 0);
}

// Another of our devices took the call.
#[test]
fn inbound_answered_elsewhere() {
    let context = TestContext::new();

    ring(&context, common::AUDIO_SDP);
    context
        .call
        .on_answered_elsewhere(answer_content(context.call.call_id().as_str()))
        .unwrap();
    context.sync();

    assert_eq!(context.call.state().unwrap(), CallState::Ended);
    assert_eq!(
        context.call.hangup_reason().unwrap().as_deref(),
        Some(reason::ANSWERED_ELSEWHERE)
    );
    assert_eq!(context.counters.hangup_count(), 1);
    assert_eq!(context.channel.published_count(CALL_HANGUP), 0);
}

// The remote stream going away counts as a remote hangup.
#[test]
fn inbound_remote_stream_end_hangs_up() {
    let context = TestContext::new();

    ring(&context, common::AUDIO_SDP);
    context.call.answer().unwrap();
    context.sync();
    context.provider.ice_connected();
    context.provider.add_remote_stream(false);
    context.sync();

    context.provider.end_remote_stream();
    context.sync();

    assert_eq!(context.call.state().unwrap(), CallState::Ended);
    assert_eq!(
        context.call.hangup_party().unwrap(),
        Some(HangupParty::Remote)
    );
    assert_eq!(
        context.call.hangup_reason().unwrap().as_deref(),
        Some(reason::REMOTE_STREAM_ENDED)
    );
    // Both streams get stopped on teardown.
    assert_eq!(context.provider.streams_stopped(), 2);
}

// Re-binding the remote view plays an already-present stream.
#[test]
fn set_remote_view_plays_present_stream() {
    let context = TestContext::new();

    ring(&context, common::AUDIO_SDP);
    context.call.answer().unwrap();
    context.sync();
    context.provider.add_remote_stream(false);
    context.sync();

    let view = SimVideoView::new("late-bound");
    context.call.set_remote_view(view.clone()).unwrap();
    assert!(view.is_playing());
    assert!(view.url().unwrap().starts_with("sim://sim-remote-"));
}

// Candidate application failures are swallowed; ICE is best effort.
#[test]
fn inbound_candidate_failures_are_swallowed() {
    let context = TestContext::new();

    ring(&context, common::AUDIO_SDP);
    context.provider.force_candidate_fault(true);
    context
        .call
        .on_candidates(candidates_content(
            context.call.call_id().as_str(),
            vec![candidate(1), candidate(2)],
        ))
        .unwrap();
    context.sync();

    // Still ringing, no error surfaced.
    assert_eq!(context.call.state().unwrap(), CallState::Ringing);
    assert_eq!(context.counters.error_count(), 0);
    assert_eq!(context.provider.remote_candidates_added(), 0);
}

// Remote candidates reach the provider in batch order.
#[test]
fn inbound_candidates_are_applied_in_order() {
    let context = TestContext::new();

    ring(&context, common::AUDIO_SDP);
    context
        .call
        .on_candidates(candidates_content(
            context.call.call_id().as_str(),
            vec![candidate(1), candidate(2), candidate(3)],
        ))
        .unwrap();
    context.sync();

    assert_eq!(
        context.provider.remote_candidates(),
        vec![candidate(1), candidate(2), candidate(3)]
    );
}

// A second invite for the same call is dropped.
#[test]
fn inbound_duplicate_invite_is_dropped() {
    let context = TestContext::new();

    ring(&context, common::AUDIO_SDP);
    ring(&context, common::VIDEO_SDP);

    assert_eq!(context.provider.peer_connections_created(), 1);
    assert_eq!(
        context.call.media_type().unwrap(),
        Some(CallMediaType::Audio)
    );
}

// A hangup observed after the fact renders as a synthetic ended call.
#[test]
fn synthetic_ended_call_for_history() {
    test_init();

    let provider = Arc::new(SimMediaProvider::new());
    let channel = Arc::new(SimSignalChannel::new());
    let mut config = CallConfig::new(common::ROOM_ID, channel.clone(), provider.clone());
    config.call_id = Some("c-history".into());
    let call = Call::new_ended(config, "user_hangup");

    assert_eq!(call.state().unwrap(), CallState::Ended);
    assert_eq!(call.hangup_party().unwrap(), Some(HangupParty::Remote));
    assert_eq!(call.hangup_reason().unwrap().as_deref(), Some("user_hangup"));
    assert_eq!(channel.total_attempts(), 0);
    assert_eq!(provider.peer_connections_created(), 0);

    call.close().unwrap();
}

// Answering while fledgling is a state error.
#[test]
fn answer_without_invite_is_rejected() {
    let context = TestContext::new();

    let err = context.call.answer().unwrap_err();
    assert!(matches!(
        err.downcast_ref::<RoomRtcError>(),
        Some(RoomRtcError::InvalidStateForOperation { .. })
    ));
}
