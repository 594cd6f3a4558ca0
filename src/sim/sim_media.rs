//
// Copyright 2019-2021 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! Simulation implementation of the MediaProvider interface.
//!
//! Deterministic and in-process: completions run inline, ICE and
//! stream events are fired manually by tests, and everything the core
//! asks for is counted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::common::Result;
use crate::core::media::{
    AnswerConstraints, DescriptionDone, IceConnectionState, MediaConstraints, MediaDone, MediaItem,
    MediaProvider, PeerConnectionConfig, PeerConnectionObserverTrait, ProviderVariant, StatusDone,
    UrlMinter,
};
use crate::core::signaling::{IceCandidate, SessionDescription};
use crate::error::RoomRtcError;

const DEFAULT_AUDIO_SDP: &str = "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\n";

/// Simulation stream handle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SimMediaStream {
    pub id: String,
    pub has_video: bool,
}

impl MediaItem for SimMediaStream {}

/// Simulation peer connection handle.
#[derive(Clone, Debug)]
pub struct SimPeerConnection {
    pub id: u32,
    closed: std::sync::Arc<AtomicBool>,
}

impl MediaItem for SimPeerConnection {}

/// Simulation renderer binding.
#[derive(Clone, Debug, Default)]
pub struct SimVideoView {
    pub label: String,
    playing: std::sync::Arc<AtomicBool>,
    url: std::sync::Arc<Mutex<Option<String>>>,
}

impl SimVideoView {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Default::default()
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    pub fn url(&self) -> Option<String> {
        self.url.lock().unwrap().clone()
    }
}

impl MediaItem for SimVideoView {}

/// Simulation url minter: `sim://<stream id>`.
pub struct SimUrlMinter;

impl UrlMinter<SimMediaStream> for SimUrlMinter {
    fn mint(&self, stream: &SimMediaStream) -> String {
        format!("sim://{}", stream.id)
    }
}

#[derive(Default)]
struct SimStats {
    streams_acquired: AtomicUsize,
    offers_requested: AtomicUsize,
    answers_requested: AtomicUsize,
    local_descriptions_set: AtomicUsize,
    remote_descriptions_set: AtomicUsize,
    remote_candidates_added: AtomicUsize,
    peer_connections_created: AtomicUsize,
    peer_connections_closed: AtomicUsize,
    streams_stopped: AtomicUsize,
    tracks_stopped: AtomicUsize,
    streams_attached: AtomicUsize,
}

/// Simulation implementation of MediaProvider.
pub struct SimMediaProvider {
    stats: SimStats,
    force_capture_fault: AtomicBool,
    force_offer_fault: AtomicBool,
    force_answer_fault: AtomicBool,
    force_candidate_fault: AtomicBool,
    open_webrtc: AtomicBool,
    variant: Mutex<ProviderVariant>,
    offer_sdp: Mutex<String>,
    answer_sdp: Mutex<String>,
    next_id: AtomicU32,
    observers: Mutex<HashMap<u32, Box<dyn PeerConnectionObserverTrait<SimMediaProvider>>>>,
    last_pc_id: AtomicU32,
    last_pc_config: Mutex<Option<PeerConnectionConfig>>,
    last_constraints: Mutex<Option<MediaConstraints>>,
    last_answer_constraints: Mutex<Option<AnswerConstraints>>,
    remote_candidates: Mutex<Vec<IceCandidate>>,
    audio_enabled: Mutex<HashMap<String, bool>>,
    video_enabled: Mutex<HashMap<String, bool>>,
    stopped_streams: Mutex<Vec<String>>,
}

impl Default for SimMediaProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SimMediaProvider {
    pub fn new() -> Self {
        Self {
            stats: SimStats::default(),
            force_capture_fault: AtomicBool::new(false),
            force_offer_fault: AtomicBool::new(false),
            force_answer_fault: AtomicBool::new(false),
            force_candidate_fault: AtomicBool::new(false),
            open_webrtc: AtomicBool::new(false),
            variant: Mutex::new(ProviderVariant::Generic),
            offer_sdp: Mutex::new(DEFAULT_AUDIO_SDP.to_string()),
            answer_sdp: Mutex::new(DEFAULT_AUDIO_SDP.to_string()),
            next_id: AtomicU32::new(1),
            observers: Mutex::new(HashMap::new()),
            last_pc_id: AtomicU32::new(0),
            last_pc_config: Mutex::new(None),
            last_constraints: Mutex::new(None),
            last_answer_constraints: Mutex::new(None),
            remote_candidates: Mutex::new(Vec::new()),
            audio_enabled: Mutex::new(HashMap::new()),
            video_enabled: Mutex::new(HashMap::new()),
            stopped_streams: Mutex::new(Vec::new()),
        }
    }

    // Fault injection.

    pub fn force_capture_fault(&self, enable: bool) {
        self.force_capture_fault.store(enable, Ordering::Release);
    }

    pub fn force_offer_fault(&self, enable: bool) {
        self.force_offer_fault.store(enable, Ordering::Release);
    }

    pub fn force_answer_fault(&self, enable: bool) {
        self.force_answer_fault.store(enable, Ordering::Release);
    }

    pub fn force_candidate_fault(&self, enable: bool) {
        self.force_candidate_fault.store(enable, Ordering::Release);
    }

    pub fn set_open_webrtc(&self, enable: bool) {
        self.open_webrtc.store(enable, Ordering::Release);
    }

    pub fn set_variant(&self, variant: ProviderVariant) {
        *self.variant.lock().unwrap() = variant;
    }

    /// SDP the next created offer carries; include an `m=video`
    /// section for video calls.
    pub fn set_offer_sdp(&self, sdp: impl Into<String>) {
        *self.offer_sdp.lock().unwrap() = sdp.into();
    }

    pub fn set_answer_sdp(&self, sdp: impl Into<String>) {
        *self.answer_sdp.lock().unwrap() = sdp.into();
    }

    // Manual event triggers, aimed at the most recent peer connection.

    pub fn ice_state_changed(&self, new_state: IceConnectionState) {
        let id = self.last_pc_id.load(Ordering::Acquire);
        if let Some(observer) = self.observers.lock().unwrap().get_mut(&id) {
            observer.handle_ice_connection_state_changed(new_state);
        }
    }

    pub fn ice_connected(&self) {
        self.ice_state_changed(IceConnectionState::Connected);
    }

    pub fn ice_failed(&self) {
        self.ice_state_changed(IceConnectionState::Failed);
    }

    pub fn gather_candidate(&self, candidate: IceCandidate) {
        let id = self.last_pc_id.load(Ordering::Acquire);
        if let Some(observer) = self.observers.lock().unwrap().get_mut(&id) {
            observer.handle_local_candidate_gathered(candidate);
        }
    }

    pub fn add_remote_stream(&self, has_video: bool) -> SimMediaStream {
        let stream = SimMediaStream {
            id: format!("sim-remote-{}", self.next_id.fetch_add(1, Ordering::Relaxed)),
            has_video,
        };
        let id = self.last_pc_id.load(Ordering::Acquire);
        if let Some(observer) = self.observers.lock().unwrap().get_mut(&id) {
            observer.handle_remote_stream_added(stream.clone());
        }
        stream
    }

    pub fn end_remote_stream(&self) {
        let id = self.last_pc_id.load(Ordering::Acquire);
        if let Some(observer) = self.observers.lock().unwrap().get_mut(&id) {
            observer.handle_remote_stream_ended();
        }
    }

    // Recorded state, for assertions.

    pub fn streams_acquired(&self) -> usize {
        self.stats.streams_acquired.load(Ordering::Relaxed)
    }

    pub fn offers_requested(&self) -> usize {
        self.stats.offers_requested.load(Ordering::Relaxed)
    }

    pub fn answers_requested(&self) -> usize {
        self.stats.answers_requested.load(Ordering::Relaxed)
    }

    pub fn local_descriptions_set(&self) -> usize {
        self.stats.local_descriptions_set.load(Ordering::Relaxed)
    }

    pub fn remote_descriptions_set(&self) -> usize {
        self.stats.remote_descriptions_set.load(Ordering::Relaxed)
    }

    pub fn remote_candidates_added(&self) -> usize {
        self.stats.remote_candidates_added.load(Ordering::Relaxed)
    }

    pub fn peer_connections_created(&self) -> usize {
        self.stats.peer_connections_created.load(Ordering::Relaxed)
    }

    pub fn peer_connections_closed(&self) -> usize {
        self.stats.peer_connections_closed.load(Ordering::Relaxed)
    }

    pub fn streams_stopped(&self) -> usize {
        self.stats.streams_stopped.load(Ordering::Relaxed)
    }

    pub fn tracks_stopped(&self) -> usize {
        self.stats.tracks_stopped.load(Ordering::Relaxed)
    }

    pub fn streams_attached(&self) -> usize {
        self.stats.streams_attached.load(Ordering::Relaxed)
    }

    pub fn last_pc_config(&self) -> Option<PeerConnectionConfig> {
        self.last_pc_config.lock().unwrap().clone()
    }

    pub fn last_constraints(&self) -> Option<MediaConstraints> {
        self.last_constraints.lock().unwrap().clone()
    }

    pub fn last_answer_constraints(&self) -> Option<AnswerConstraints> {
        *self.last_answer_constraints.lock().unwrap()
    }

    pub fn remote_candidates(&self) -> Vec<IceCandidate> {
        self.remote_candidates.lock().unwrap().clone()
    }

    pub fn audio_enabled_for(&self, stream_id: &str) -> Option<bool> {
        self.audio_enabled.lock().unwrap().get(stream_id).copied()
    }

    pub fn video_enabled_for(&self, stream_id: &str) -> Option<bool> {
        self.video_enabled.lock().unwrap().get(stream_id).copied()
    }

    pub fn stopped_streams(&self) -> Vec<String> {
        self.stopped_streams.lock().unwrap().clone()
    }
}

impl MediaProvider for SimMediaProvider {
    type MediaStream = SimMediaStream;
    type PeerConnection = SimPeerConnection;
    type VideoView = SimVideoView;

    fn variant(&self) -> ProviderVariant {
        *self.variant.lock().unwrap()
    }

    fn is_open_webrtc(&self) -> bool {
        self.open_webrtc.load(Ordering::Acquire)
    }

    fn acquire_media(&self, constraints: MediaConstraints, done: MediaDone<Self::MediaStream>) {
        let has_video = constraints.video.is_some();
        *self.last_constraints.lock().unwrap() = Some(constraints);
        if self.force_capture_fault.load(Ordering::Acquire) {
            done(Err(
                RoomRtcError::AcquireMedia("simulated capture denial".to_string()).into(),
            ));
            return;
        }
        self.stats.streams_acquired.fetch_add(1, Ordering::Relaxed);
        let stream = SimMediaStream {
            id: format!("sim-stream-{}", self.next_id.fetch_add(1, Ordering::Relaxed)),
            has_video,
        };
        done(Ok(stream));
    }

    fn create_peer_connection(
        &self,
        config: PeerConnectionConfig,
        observer: Box<dyn PeerConnectionObserverTrait<Self>>,
    ) -> Result<Self::PeerConnection> {
        *self.last_pc_config.lock().unwrap() = Some(config);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.observers.lock().unwrap().insert(id, observer);
        self.last_pc_id.store(id, Ordering::Release);
        self.stats
            .peer_connections_created
            .fetch_add(1, Ordering::Relaxed);
        Ok(SimPeerConnection {
            id,
            closed: std::sync::Arc::new(AtomicBool::new(false)),
        })
    }

    fn create_offer(&self, _pc: &Self::PeerConnection, done: DescriptionDone) {
        self.stats.offers_requested.fetch_add(1, Ordering::Relaxed);
        if self.force_offer_fault.load(Ordering::Acquire) {
            done(Err(
                RoomRtcError::CreateOffer("simulated offer failure".to_string()).into(),
            ));
            return;
        }
        done(Ok(SessionDescription::offer(
            self.offer_sdp.lock().unwrap().clone(),
        )));
    }

    fn create_answer(
        &self,
        _pc: &Self::PeerConnection,
        constraints: AnswerConstraints,
        done: DescriptionDone,
    ) {
        self.stats.answers_requested.fetch_add(1, Ordering::Relaxed);
        *self.last_answer_constraints.lock().unwrap() = Some(constraints);
        if self.force_answer_fault.load(Ordering::Acquire) {
            done(Err(
                RoomRtcError::CreateAnswer("simulated answer failure".to_string()).into(),
            ));
            return;
        }
        done(Ok(SessionDescription::answer(
            self.answer_sdp.lock().unwrap().clone(),
        )));
    }

    fn set_local_description(
        &self,
        _pc: &Self::PeerConnection,
        _description: SessionDescription,
        done: StatusDone,
    ) {
        self.stats
            .local_descriptions_set
            .fetch_add(1, Ordering::Relaxed);
        done(Ok(()));
    }

    fn set_remote_description(
        &self,
        _pc: &Self::PeerConnection,
        _description: SessionDescription,
        done: StatusDone,
    ) {
        self.stats
            .remote_descriptions_set
            .fetch_add(1, Ordering::Relaxed);
        done(Ok(()));
    }

    fn add_remote_candidate(
        &self,
        _pc: &Self::PeerConnection,
        candidate: IceCandidate,
    ) -> Result<()> {
        if self.force_candidate_fault.load(Ordering::Acquire) {
            return Err(RoomRtcError::AddIceCandidate.into());
        }
        self.stats
            .remote_candidates_added
            .fetch_add(1, Ordering::Relaxed);
        self.remote_candidates.lock().unwrap().push(candidate);
        Ok(())
    }

    fn attach_stream(&self, _pc: &Self::PeerConnection, _stream: &Self::MediaStream) -> Result<()> {
        self.stats.streams_attached.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn close_peer_connection(&self, pc: &Self::PeerConnection) {
        pc.closed.store(true, Ordering::Release);
        self.stats
            .peer_connections_closed
            .fetch_add(1, Ordering::Relaxed);
        // The provider owns the observer; closing releases it, which
        // drops its back-reference into the call.
        self.observers.lock().unwrap().remove(&pc.id);
    }

    fn is_signaling_closed(&self, pc: &Self::PeerConnection) -> bool {
        pc.closed.load(Ordering::Acquire)
    }

    fn stop_stream(&self, stream: &Self::MediaStream) {
        self.stats.streams_stopped.fetch_add(1, Ordering::Relaxed);
        self.stopped_streams.lock().unwrap().push(stream.id.clone());
    }

    fn stop_tracks(&self, _stream: &Self::MediaStream) {
        self.stats.tracks_stopped.fetch_add(1, Ordering::Relaxed);
    }

    fn set_audio_enabled(&self, stream: &Self::MediaStream, enabled: bool) {
        self.audio_enabled
            .lock()
            .unwrap()
            .insert(stream.id.clone(), enabled);
    }

    fn set_video_enabled(&self, stream: &Self::MediaStream, enabled: bool) {
        self.video_enabled
            .lock()
            .unwrap()
            .insert(stream.id.clone(), enabled);
    }

    fn has_video_track(&self, stream: &Self::MediaStream) -> bool {
        stream.has_video
    }

    fn play_view(&self, view: &Self::VideoView, url: &str) -> Result<()> {
        view.playing.store(true, Ordering::Release);
        *view.url.lock().unwrap() = Some(url.to_string());
        Ok(())
    }

    fn pause_view(&self, view: &Self::VideoView) {
        view.playing.store(false, Ordering::Release);
    }
}
