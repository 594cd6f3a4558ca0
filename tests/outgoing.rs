//
// Copyright 2019-2021 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! Tests for outgoing calls

mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use roomrtc::common::{reason, CallDirection, CallMediaType, CallState, HangupParty};
use roomrtc::core::call::{Call, CallConfig};
use roomrtc::core::media::{IceServer, ProviderVariant};
use roomrtc::core::signaling::{CALL_HANGUP, CALL_INVITE};
use roomrtc::core::sink::CallErrorCode;
use roomrtc::error::RoomRtcError;
use roomrtc::sim::sim_channel::SimSignalChannel;
use roomrtc::sim::sim_media::{SimMediaProvider, SimVideoView};

use common::{answer_content, test_init, TestContext};

// Placing a call without any registered observer must refuse up front;
// capture failures would otherwise go unseen.
#[test]
fn place_refuses_without_error_listener() {
    test_init();

    let provider = Arc::new(SimMediaProvider::new());
    let channel = Arc::new(SimSignalChannel::new());
    let call = Call::new(CallConfig::new(common::ROOM_ID, channel, provider.clone()));

    let err = call.place_voice().unwrap_err();
    assert!(matches!(
        err.downcast_ref::<RoomRtcError>(),
        Some(RoomRtcError::NoErrorListener)
    ));
    assert_eq!(call.state().unwrap(), CallState::Fledgling);
    assert_eq!(provider.streams_acquired(), 0);

    call.close().unwrap();
}

// Happy outbound voice call: fledgling -> wait_local_media ->
// create_offer -> invite_sent -> connecting -> connected -> ended.
#[test]
fn outbound_voice_happy_path() {
    let context = TestContext::new();

    // No turn servers supplied: the fallback STUN entry gets injected.
    assert_eq!(context.call.turn_servers(), &[IceServer::fallback_stun()]);

    context.call.place_voice().unwrap();
    context.sync();

    assert_eq!(context.call.state().unwrap(), CallState::InviteSent);
    assert_eq!(
        context.call.direction().unwrap(),
        Some(CallDirection::Outgoing)
    );
    assert_eq!(
        context.call.media_type().unwrap(),
        Some(CallMediaType::Audio)
    );
    assert_eq!(
        context.counters.states(),
        vec![
            CallState::WaitLocalMedia,
            CallState::CreateOffer,
            CallState::InviteSent
        ]
    );

    // Audio-only capture, one peer connection, one local description.
    let constraints = context.provider.last_constraints().unwrap();
    assert!(constraints.audio);
    assert!(constraints.video.is_none());
    assert_eq!(context.provider.peer_connections_created(), 1);
    assert_eq!(context.provider.local_descriptions_set(), 1);

    // Exactly one invite went out, shaped per the wire contract.
    let invites = context.channel.published_of(CALL_INVITE);
    assert_eq!(invites.len(), 1);
    assert_eq!(invites[0]["version"], 0);
    assert_eq!(invites[0]["call_id"], context.call.call_id().as_str());
    assert_eq!(invites[0]["offer"]["type"], "offer");
    assert_eq!(invites[0]["lifetime"], 60_000);

    // The answer arrives.
    context
        .call
        .on_answer(answer_content(context.call.call_id().as_str()))
        .unwrap();
    context.sync();
    assert_eq!(context.call.state().unwrap(), CallState::Connecting);
    assert_eq!(context.provider.remote_descriptions_set(), 1);

    // ICE connects.
    context.provider.ice_connected();
    context.sync();
    assert_eq!(context.call.state().unwrap(), CallState::Connected);
    assert!(context.call.did_connect());

    // Local hangup: one published hangup, one sink notification.
    context.call.hangup("user_hangup").unwrap();
    context.sync();
    assert_eq!(context.call.state().unwrap(), CallState::Ended);
    assert_eq!(context.call.hangup_party().unwrap(), Some(HangupParty::Local));
    assert_eq!(
        context.call.hangup_reason().unwrap().as_deref(),
        Some("user_hangup")
    );
    let hangups = context.channel.published_of(CALL_HANGUP);
    assert_eq!(hangups.len(), 1);
    assert_eq!(hangups[0]["reason"], "user_hangup");
    assert_eq!(context.counters.hangup_count(), 1);
    assert_eq!(context.counters.error_count(), 0);
    assert_eq!(context.provider.peer_connections_closed(), 1);
    assert_eq!(context.provider.streams_stopped(), 1);
}

// An unanswered video invite expires after the configured lifetime.
#[test]
fn outbound_invite_timeout() {
    let context = TestContext::with_lifetime(Duration::from_millis(300));

    let local_view = SimVideoView::new("local");
    let remote_view = SimVideoView::new("remote");
    context
        .call
        .place_video(local_view.clone(), remote_view)
        .unwrap();
    context.sync();

    assert_eq!(context.call.state().unwrap(), CallState::InviteSent);
    // Video call: the capture got rendered locally.
    assert!(local_view.is_playing());
    assert!(local_view.url().unwrap().starts_with("sim://"));
    let constraints = context.provider.last_constraints().unwrap();
    assert!(constraints.video.is_some());

    thread::sleep(Duration::from_millis(700));
    context.sync();

    assert_eq!(context.call.state().unwrap(), CallState::Ended);
    assert_eq!(context.call.hangup_party().unwrap(), Some(HangupParty::Local));
    assert_eq!(
        context.call.hangup_reason().unwrap().as_deref(),
        Some(reason::INVITE_TIMEOUT)
    );
    assert_eq!(context.counters.hangup_count(), 1);
    assert_eq!(context.channel.published_count(CALL_HANGUP), 1);
    assert_eq!(context.provider.peer_connections_closed(), 1);
    // The local renderer got paused on teardown.
    assert!(!local_view.is_playing());
}

// An answered call that is left alone does not time out.
#[test]
fn outbound_no_timeout_after_answer() {
    let context = TestContext::with_lifetime(Duration::from_millis(250));

    context.call.place_voice().unwrap();
    context.sync();
    context
        .call
        .on_answer(answer_content(context.call.call_id().as_str()))
        .unwrap();
    context.sync();

    thread::sleep(Duration::from_millis(500));
    context.sync();
    assert_eq!(context.call.state().unwrap(), CallState::Connecting);
    assert_eq!(context.counters.hangup_count(), 0);
}

// ICE failure tears the call down with the ice_failed reason.
#[test]
fn outbound_ice_failed() {
    let context = TestContext::new();

    context.call.place_voice().unwrap();
    context.sync();
    context
        .call
        .on_answer(answer_content(context.call.call_id().as_str()))
        .unwrap();
    context.sync();

    context.provider.ice_failed();
    context.sync();

    assert_eq!(context.call.state().unwrap(), CallState::Ended);
    assert_eq!(
        context.call.hangup_reason().unwrap().as_deref(),
        Some(reason::ICE_FAILED)
    );
    let hangups = context.channel.published_of(CALL_HANGUP);
    assert_eq!(hangups.len(), 1);
    assert_eq!(hangups[0]["reason"], reason::ICE_FAILED);
    assert!(!context.call.did_connect());
}

// Offer creation failure is advisory: an error emission, no teardown.
#[test]
fn outbound_offer_failure_does_not_hang_up() {
    let context = TestContext::new();
    context.provider.force_offer_fault(true);

    context.call.place_voice().unwrap();
    context.sync();

    assert_eq!(context.counters.error_codes(), vec![CallErrorCode::LocalOfferFailed]);
    assert_eq!(context.call.state().unwrap(), CallState::CreateOffer);
    assert_eq!(context.counters.hangup_count(), 0);
    assert_eq!(context.channel.published_count(CALL_INVITE), 0);
}

// Capture denial emits no_user_media and hangs the call up by itself.
#[test]
fn outbound_capture_denied() {
    let context = TestContext::new();
    context.provider.force_capture_fault(true);

    context.call.place_voice().unwrap();
    context.sync();

    assert_eq!(context.counters.error_codes(), vec![CallErrorCode::NoUserMedia]);
    assert_eq!(context.call.state().unwrap(), CallState::Ended);
    assert_eq!(
        context.call.hangup_reason().unwrap().as_deref(),
        Some(reason::USER_MEDIA_FAILED)
    );
    assert_eq!(context.counters.hangup_count(), 1);
    // No invite ever went out, so nothing goes on the wire.
    assert_eq!(context.channel.published_count(CALL_HANGUP), 0);
}

// Signalling arriving after the end changes nothing.
#[test]
fn outbound_ended_is_absorbing() {
    let context = TestContext::new();

    context.call.place_voice().unwrap();
    context.sync();
    context.call.hangup("user_hangup").unwrap();
    context.sync();
    assert_eq!(context.call.state().unwrap(), CallState::Ended);

    let candidates_before = context.provider.remote_candidates_added();
    context
        .call
        .on_answer(answer_content(context.call.call_id().as_str()))
        .unwrap();
    context
        .call
        .on_candidates(common::candidates_content(
            context.call.call_id().as_str(),
            vec![common::candidate(1)],
        ))
        .unwrap();
    context.call.hangup("again").unwrap();
    context.sync();

    assert_eq!(context.call.state().unwrap(), CallState::Ended);
    assert_eq!(context.provider.remote_candidates_added(), candidates_before);
    // hangup_reason is monotonic: set once, never re-set.
    assert_eq!(
        context.call.hangup_reason().unwrap().as_deref(),
        Some("user_hangup")
    );
    assert_eq!(context.counters.hangup_count(), 1);
    assert_eq!(context.channel.published_count(CALL_HANGUP), 1);
}

// Mute toggling drives track enablement on the live capture stream.
#[test]
fn microphone_mute_toggles_audio_tracks() {
    let context = TestContext::new();

    context.call.place_voice().unwrap();
    context.sync();

    let streams = context.provider.stopped_streams();
    assert!(streams.is_empty());
    // Capture starts enabled.
    assert_eq!(context.provider.audio_enabled_for("sim-stream-1"), Some(true));

    context.call.set_microphone_muted(true).unwrap();
    assert!(context.call.is_microphone_muted());
    assert_eq!(context.provider.audio_enabled_for("sim-stream-1"), Some(false));

    context.call.set_microphone_muted(false).unwrap();
    assert_eq!(context.provider.audio_enabled_for("sim-stream-1"), Some(true));
}

// A video mute toggled while capture is still resolving lands on the
// stream as soon as it exists.
#[test]
fn video_mute_applies_to_late_capture() {
    let context = TestContext::new();

    let local_view = SimVideoView::new("local");
    let remote_view = SimVideoView::new("remote");
    context
        .call
        .place_video(local_view, remote_view)
        .unwrap();
    // Mute before the capture completion has been processed.
    context.call.set_local_video_muted(true).unwrap();
    assert!(context.call.is_local_video_muted());
    context.sync();

    assert_eq!(context.provider.video_enabled_for("sim-stream-1"), Some(false));
    // Audio is independent of the camera mute.
    assert_eq!(context.provider.audio_enabled_for("sim-stream-1"), Some(true));

    context.call.set_local_video_muted(false).unwrap();
    assert_eq!(context.provider.video_enabled_for("sim-stream-1"), Some(true));
}

// Glare handoff: the replaced call's stream transfers into the new
// call's answer path; only `replaced` is observed externally.
#[test]
fn glare_replacement_hands_over_stream() {
    let context = TestContext::new();

    context.call.place_voice().unwrap();
    context.sync();
    assert_eq!(context.call.state().unwrap(), CallState::InviteSent);

    // The competing inbound call for the same room.
    let (new_call, new_provider, new_counters) = context.new_inbound_call("c-their-call");
    new_call
        .on_invite(
            common::invite_content("c-their-call", common::AUDIO_SDP, Duration::from_secs(60)),
            Duration::from_secs(0),
        )
        .unwrap();
    new_call.synchronize().unwrap();
    assert_eq!(new_call.state().unwrap(), CallState::Ringing);

    context.call.replace_by(&new_call).unwrap();
    context.sync();
    new_call.synchronize().unwrap();

    // The old call: replaced emission, then a silent local end.
    assert_eq!(
        context.counters.replaced_to().unwrap().as_str(),
        "c-their-call"
    );
    assert_eq!(context.call.state().unwrap(), CallState::Ended);
    assert_eq!(
        context.call.hangup_reason().unwrap().as_deref(),
        Some(reason::REPLACED)
    );
    assert_eq!(context.counters.hangup_count(), 0);
    assert_eq!(context.channel.published_count(CALL_HANGUP), 0);

    // The new call took the stream (no second capture) and ran its
    // answer path with it.
    assert_eq!(new_provider.streams_acquired(), 0);
    assert_eq!(new_call.state().unwrap(), CallState::Connecting);
    let answers = context.channel.published_of(roomrtc::core::signaling::CALL_ANSWER);
    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0]["call_id"], "c-their-call");
    assert_eq!(new_counters.hangup_count(), 0);

    new_call.close().unwrap();
}

// Mozilla-flavored providers get one url per ice-server entry.
#[test]
fn mozilla_variant_shapes_ice_servers() {
    test_init();

    let provider = Arc::new(SimMediaProvider::new());
    provider.set_variant(ProviderVariant::Mozilla);
    let channel = Arc::new(SimSignalChannel::new());
    let mut config = CallConfig::new(common::ROOM_ID, channel, provider.clone());
    config.turn_servers = vec![IceServer {
        urls: vec![
            "turn:turn.example.com?transport=udp".to_string(),
            "turn:turn.example.com?transport=tcp".to_string(),
        ],
        username: Some("user".to_string()),
        credential: Some("secret".to_string()),
    }];
    let call = Call::new(config);

    let counters = Arc::new(common::SinkCounters::default());
    call.add_observer(Box::new(common::TestSink::new(counters)))
        .unwrap();
    call.place_voice().unwrap();
    call.synchronize().unwrap();

    let pc_config = provider.last_pc_config().unwrap();
    assert_eq!(pc_config.ice_servers.len(), 2);
    assert_eq!(
        pc_config.ice_servers[0].urls,
        vec!["turn:turn.example.com?transport=udp"]
    );
    assert_eq!(pc_config.ice_servers[1].username.as_deref(), Some("user"));

    call.close().unwrap();
}

// Placing twice is a state error, and capture happens at most once.
#[test]
fn place_twice_is_rejected() {
    let context = TestContext::new();

    context.call.place_voice().unwrap();
    context.sync();
    let err = context.call.place_voice().unwrap_err();
    assert!(matches!(
        err.downcast_ref::<RoomRtcError>(),
        Some(RoomRtcError::InvalidStateForOperation { .. })
    ));
    assert_eq!(context.provider.streams_acquired(), 1);
}
