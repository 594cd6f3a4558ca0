//
// Copyright 2019-2021 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! Common test utilities

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use roomrtc::common::{CallId, CallState, CALL_TIMEOUT};
use roomrtc::core::call::{Call, CallConfig};
use roomrtc::core::signaling::{
    AnswerContent, CandidatesContent, HangupContent, IceCandidate, InviteContent,
    SessionDescription,
};
use roomrtc::core::sink::{CallErrorCode, EventSink};
use roomrtc::sim::sim_channel::SimSignalChannel;
use roomrtc::sim::sim_media::{SimMediaProvider, SimUrlMinter};

pub const ROOM_ID: &str = "!room:example.org";

pub const AUDIO_SDP: &str =
    "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\n";
pub const VIDEO_SDP: &str =
    "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\n";

pub fn test_init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Everything the test sink observed.
#[derive(Default)]
pub struct SinkCounters {
    hangups: AtomicUsize,
    errors: Mutex<Vec<(CallErrorCode, String)>>,
    replaced_to: Mutex<Option<CallId>>,
    states: Mutex<Vec<CallState>>,
}

impl SinkCounters {
    pub fn hangup_count(&self) -> usize {
        self.hangups.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> usize {
        self.errors.lock().unwrap().len()
    }

    pub fn error_codes(&self) -> Vec<CallErrorCode> {
        self.errors.lock().unwrap().iter().map(|(c, _)| *c).collect()
    }

    pub fn replaced_to(&self) -> Option<CallId> {
        self.replaced_to.lock().unwrap().clone()
    }

    pub fn states(&self) -> Vec<CallState> {
        self.states.lock().unwrap().clone()
    }
}

pub struct TestSink {
    counters: Arc<SinkCounters>,
}

impl TestSink {
    pub fn new(counters: Arc<SinkCounters>) -> Self {
        Self { counters }
    }
}

impl EventSink<SimMediaProvider> for TestSink {
    fn on_state_changed(&self, _call_id: &CallId, _old_state: CallState, new_state: CallState) {
        self.counters.states.lock().unwrap().push(new_state);
    }

    fn on_error(&self, _call_id: &CallId, code: CallErrorCode, message: &str) {
        self.counters
            .errors
            .lock()
            .unwrap()
            .push((code, message.to_string()));
    }

    fn on_hangup(&self, _call: &Call<SimMediaProvider>) {
        self.counters.hangups.fetch_add(1, Ordering::Relaxed);
    }

    fn on_replaced(&self, _old_call_id: &CallId, new_call: &Call<SimMediaProvider>) {
        *self.counters.replaced_to.lock().unwrap() = Some(new_call.call_id().clone());
    }
}

pub struct TestContext {
    pub provider: Arc<SimMediaProvider>,
    pub channel: Arc<SimSignalChannel>,
    pub counters: Arc<SinkCounters>,
    pub call: Call<SimMediaProvider>,
}

impl Drop for TestContext {
    fn drop(&mut self) {
        let _ = self.call.close();
    }
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_lifetime(CALL_TIMEOUT)
    }

    /// Shorten the invite lifetime so timeout tests need not sleep a
    /// minute.
    pub fn with_lifetime(invite_lifetime: Duration) -> Self {
        test_init();

        let provider = Arc::new(SimMediaProvider::new());
        let channel = Arc::new(SimSignalChannel::new());
        let mut config = CallConfig::new(ROOM_ID, channel.clone(), provider.clone());
        config.invite_lifetime = invite_lifetime;
        config.url_minter = Some(Arc::new(SimUrlMinter));
        let call = Call::new(config);

        let counters = Arc::new(SinkCounters::default());
        call.add_observer(Box::new(TestSink {
            counters: counters.clone(),
        }))
        .unwrap();

        Self {
            provider,
            channel,
            counters,
            call,
        }
    }

    /// A second call sharing this context's channel, with its own
    /// provider and sink, for glare scenarios.
    pub fn new_inbound_call(
        &self,
        call_id: &str,
    ) -> (Call<SimMediaProvider>, Arc<SimMediaProvider>, Arc<SinkCounters>) {
        let provider = Arc::new(SimMediaProvider::new());
        let mut config = CallConfig::new(ROOM_ID, self.channel.clone(), provider.clone());
        config.call_id = Some(CallId::new(call_id));
        config.url_minter = Some(Arc::new(SimUrlMinter));
        let call = Call::new(config);

        let counters = Arc::new(SinkCounters::default());
        call.add_observer(Box::new(TestSink {
            counters: counters.clone(),
        }))
        .unwrap();
        (call, provider, counters)
    }

    pub fn sync(&self) {
        self.call.synchronize().unwrap();
    }
}

pub fn invite_content(call_id: &str, sdp: &str, lifetime: Duration) -> InviteContent {
    InviteContent::new(
        &CallId::new(call_id),
        SessionDescription::offer(sdp),
        lifetime,
    )
}

pub fn answer_content(call_id: &str) -> AnswerContent {
    AnswerContent::new(&CallId::new(call_id), SessionDescription::answer(AUDIO_SDP))
}

pub fn hangup_content(call_id: &str, reason: &str) -> HangupContent {
    HangupContent::new(&CallId::new(call_id), reason)
}

pub fn candidates_content(call_id: &str, candidates: Vec<IceCandidate>) -> CandidatesContent {
    CandidatesContent::new(&CallId::new(call_id), candidates)
}

pub fn candidate(n: u32) -> IceCandidate {
    IceCandidate::new(
        format!("candidate:{} 1 UDP 2122252543 10.0.0.{} 50000 typ host", n, n),
        "audio",
        0,
    )
}
