//
// Copyright 2019-2021 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! MediaProvider trait describing the interface a media stack adapter
//! must implement for calling.
//!
//! The core never probes a global environment for a media stack; the
//! host constructs a concrete provider and injects it at call
//! construction.

use std::fmt;

use crate::common::{CallMediaType, Result};
use crate::core::signaling::{IceCandidate, SessionDescription};

/// A trait encompassing the traits the provider associated types must
/// implement.
pub trait MediaItem: Send + 'static {}

/// Completion callback for media acquisition.
pub type MediaDone<S> = Box<dyn FnOnce(Result<S>) + Send>;
/// Completion callback for offer/answer creation.
pub type DescriptionDone = Box<dyn FnOnce(Result<SessionDescription>) + Send>;
/// Completion callback for description application.
pub type StatusDone = Box<dyn FnOnce(Result<()>) + Send>;

/// Which media stack flavor the provider adapts. Used only to shape
/// the ice-servers configuration: Mozilla-flavored stacks take one url
/// per server entry, the others a list of urls per entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderVariant {
    Generic,
    Mozilla,
    Webkit,
}

/// Rust version of the RTCIceConnectionState enum.
///
/// See [RTCIceConnectionState](https://w3c.github.io/webrtc-pc/#dom-rtciceconnectionstate)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Failed,
    Disconnected,
    Closed,
}

impl IceConnectionState {
    /// True for the states that mean connectivity was established.
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected | Self::Completed)
    }
}

impl fmt::Display for IceConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Rust version of the RTCSignalingState enum, reduced to what the
/// core observes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    Closed,
}

impl fmt::Display for SignalingState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Video capture bounds requested for video calls.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VideoConstraints {
    pub min_width: u32,
    pub max_width: u32,
    pub min_height: u32,
    pub max_height: u32,
}

impl Default for VideoConstraints {
    fn default() -> Self {
        Self {
            min_width: 640,
            max_width: 640,
            min_height: 360,
            max_height: 360,
        }
    }
}

/// Capture constraints: audio always, video only for video calls.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: Option<VideoConstraints>,
}

impl MediaConstraints {
    pub fn audio_only() -> Self {
        Self {
            audio: true,
            video: None,
        }
    }

    pub fn audio_and_video() -> Self {
        Self {
            audio: true,
            video: Some(VideoConstraints::default()),
        }
    }

    pub fn for_media_type(media_type: CallMediaType) -> Self {
        match media_type {
            CallMediaType::Audio => Self::audio_only(),
            CallMediaType::Video => Self::audio_and_video(),
        }
    }
}

/// Receive directions requested when creating an answer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AnswerConstraints {
    pub offer_to_receive_audio: bool,
    pub offer_to_receive_video: bool,
}

/// A STUN/TURN server configuration entry as supplied by the host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IceServer {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

impl IceServer {
    pub fn new(urls: Vec<String>) -> Self {
        Self {
            urls,
            username: None,
            credential: None,
        }
    }

    /// The STUN entry injected when the host supplies no servers.
    pub fn fallback_stun() -> Self {
        Self::new(vec!["stun:stun.l.google.com:19302".to_string()])
    }
}

/// Ice-server configuration shaped for a concrete provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerConnectionConfig {
    pub ice_servers: Vec<IceServer>,
}

impl PeerConnectionConfig {
    /// Adapt the host-supplied server list to the provider's shape.
    /// Mozilla-flavored stacks want exactly one url per entry, so
    /// multi-url entries are flattened; the credentials ride along.
    pub fn for_variant(variant: ProviderVariant, servers: &[IceServer]) -> Self {
        let ice_servers = match variant {
            ProviderVariant::Mozilla => servers
                .iter()
                .flat_map(|server| {
                    server.urls.iter().map(move |url| IceServer {
                        urls: vec![url.clone()],
                        username: server.username.clone(),
                        credential: server.credential.clone(),
                    })
                })
                .collect(),
            ProviderVariant::Generic | ProviderVariant::Webkit => servers.to_vec(),
        };
        Self { ice_servers }
    }
}

/// The callbacks a peer connection delivers back into the core. The
/// call installs an implementation when it creates its peer
/// connection; the provider must drop it when the connection closes.
pub trait PeerConnectionObserverTrait<T>: Send + 'static
where
    T: MediaProvider,
{
    // ICE events
    fn handle_local_candidate_gathered(&mut self, candidate: IceCandidate);
    fn handle_ice_connection_state_changed(&mut self, new_state: IceConnectionState);
    fn handle_signaling_state_changed(&mut self, _new_state: SignalingState) {}

    // Media events
    fn handle_remote_stream_added(&mut self, stream: T::MediaStream);
    fn handle_remote_stream_ended(&mut self);
}

/// Converts a stream handle into a renderer-consumable URL. Required
/// only when video views are in play.
pub trait UrlMinter<S>: Send + Sync {
    fn mint(&self, stream: &S) -> String;
}

/// A trait describing the interface a media stack must implement for
/// calling: capture, peer connection, description negotiation, and
/// view plumbing. Operations that may suspend (waiting on user
/// permission, asynchronous SDP generation) take completion callbacks;
/// each callback is invoked exactly once, on any thread.
pub trait MediaProvider: Send + Sync + Sized + 'static {
    /// Opaque capture/remote stream handle, owned by the provider.
    type MediaStream: MediaItem + Clone;

    /// Opaque peer connection handle, exclusively owned by one call.
    type PeerConnection: MediaItem + Clone;

    /// Opaque renderer binding for local/remote video.
    type VideoView: MediaItem + Clone;

    fn variant(&self) -> ProviderVariant {
        ProviderVariant::Generic
    }

    /// When true, ICE state events are unavailable and the moment
    /// remote media begins playing counts as the connected transition.
    fn is_open_webrtc(&self) -> bool {
        false
    }

    /// Acquire local capture. Suspends while the user decides.
    fn acquire_media(&self, constraints: MediaConstraints, done: MediaDone<Self::MediaStream>);

    /// Create a peer connection wired to the given observer.
    fn create_peer_connection(
        &self,
        config: PeerConnectionConfig,
        observer: Box<dyn PeerConnectionObserverTrait<Self>>,
    ) -> Result<Self::PeerConnection>;

    fn create_offer(&self, pc: &Self::PeerConnection, done: DescriptionDone);

    fn create_answer(
        &self,
        pc: &Self::PeerConnection,
        constraints: AnswerConstraints,
        done: DescriptionDone,
    );

    fn set_local_description(
        &self,
        pc: &Self::PeerConnection,
        description: SessionDescription,
        done: StatusDone,
    );

    fn set_remote_description(
        &self,
        pc: &Self::PeerConnection,
        description: SessionDescription,
        done: StatusDone,
    );

    /// Feed one remote ICE candidate into connectivity establishment.
    fn add_remote_candidate(&self, pc: &Self::PeerConnection, candidate: IceCandidate)
        -> Result<()>;

    /// Attach a local capture stream to the peer connection.
    fn attach_stream(&self, pc: &Self::PeerConnection, stream: &Self::MediaStream) -> Result<()>;

    fn close_peer_connection(&self, pc: &Self::PeerConnection);

    /// True when the connection's signalling state already reached
    /// `closed` (a remote teardown got there first).
    fn is_signaling_closed(&self, pc: &Self::PeerConnection) -> bool;

    fn stop_stream(&self, stream: &Self::MediaStream);

    fn stop_tracks(&self, stream: &Self::MediaStream);

    fn set_audio_enabled(&self, stream: &Self::MediaStream, enabled: bool);

    fn set_video_enabled(&self, stream: &Self::MediaStream, enabled: bool);

    fn has_video_track(&self, stream: &Self::MediaStream) -> bool;

    fn play_view(&self, view: &Self::VideoView, url: &str) -> Result<()>;

    fn pause_view(&self, view: &Self::VideoView);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mozilla_config_flattens_multi_url_entries() {
        let servers = vec![IceServer {
            urls: vec!["turn:a.example.com".to_string(), "turn:b.example.com".to_string()],
            username: Some("u".to_string()),
            credential: Some("p".to_string()),
        }];
        let config = PeerConnectionConfig::for_variant(ProviderVariant::Mozilla, &servers);
        assert_eq!(config.ice_servers.len(), 2);
        assert_eq!(config.ice_servers[0].urls, vec!["turn:a.example.com"]);
        assert_eq!(config.ice_servers[1].urls, vec!["turn:b.example.com"]);
        assert_eq!(config.ice_servers[1].username.as_deref(), Some("u"));
    }

    #[test]
    fn generic_config_keeps_url_lists() {
        let servers = vec![IceServer::new(vec![
            "turn:a.example.com".to_string(),
            "turn:b.example.com".to_string(),
        ])];
        let config = PeerConnectionConfig::for_variant(ProviderVariant::Generic, &servers);
        assert_eq!(config.ice_servers.len(), 1);
        assert_eq!(config.ice_servers[0].urls.len(), 2);
    }

    #[test]
    fn constraints_match_media_type() {
        assert_eq!(
            MediaConstraints::for_media_type(CallMediaType::Audio),
            MediaConstraints::audio_only()
        );
        let video = MediaConstraints::for_media_type(CallMediaType::Video);
        let bounds = video.video.unwrap();
        assert_eq!((bounds.min_width, bounds.max_width), (640, 640));
        assert_eq!((bounds.min_height, bounds.max_height), (360, 360));
    }
}
