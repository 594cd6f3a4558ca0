//
// Copyright 2019-2021 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! Common types used throughout the library.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

/// Common Result type, using `anyhow::Error` for Error.
pub type Result<T> = std::result::Result<T, anyhow::Error>;

/// Opaque room identifier provided by the messaging substrate.
pub type RoomId = String;

/// How long an outbound invite stays valid before the caller gives up.
/// Also the base lifetime advertised in the invite payload.
pub const CALL_TIMEOUT: Duration = Duration::from_millis(60_000);

static CALL_ID_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Unique call identification string.
///
/// Minted identifiers sort roughly by creation time and cannot collide
/// within a client session.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CallId {
    id: String,
}

impl CallId {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    /// Mint a fresh identifier: "c" + unix-millis + session sequence number.
    pub fn mint() -> Self {
        let millis = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let seq = CALL_ID_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        Self::new(format!("c{}{}", millis, seq))
    }

    pub fn as_str(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl From<String> for CallId {
    fn from(item: String) -> Self {
        CallId::new(item)
    }
}

impl From<&str> for CallId {
    fn from(item: &str) -> Self {
        CallId::new(item)
    }
}

/// Tracks the state of a call.
///
/// The outbound path runs Fledgling -> WaitLocalMedia -> CreateOffer ->
/// InviteSent -> Connecting -> Connected -> Ended. The inbound path runs
/// Fledgling -> Ringing -> WaitLocalMedia -> CreateAnswer -> Connecting
/// -> Connected -> Ended. `Ended` is absorbing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallState {
    /// Freshly constructed, nothing has happened yet.
    Fledgling,

    /// Waiting for local media capture to complete.
    WaitLocalMedia,

    /// Outbound only: the offer is being created and published.
    CreateOffer,

    /// Inbound only: the answer is being created and published.
    CreateAnswer,

    /// Inbound only: a remote offer has been applied, awaiting answer().
    Ringing,

    /// Outbound only: the invite has been published, awaiting an answer.
    InviteSent,

    /// Descriptions are exchanged; ICE is probing connectivity.
    Connecting,

    /// ICE reached connected/completed; media should be flowing.
    Connected,

    /// The call is over. Terminal.
    Ended,
}

impl CallState {
    pub fn is_terminal(self) -> bool {
        self == CallState::Ended
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let display = match self {
            CallState::Fledgling => "fledgling",
            CallState::WaitLocalMedia => "wait_local_media",
            CallState::CreateOffer => "create_offer",
            CallState::CreateAnswer => "create_answer",
            CallState::Ringing => "ringing",
            CallState::InviteSent => "invite_sent",
            CallState::Connecting => "connecting",
            CallState::Connected => "connected",
            CallState::Ended => "ended",
        };
        write!(f, "{}", display)
    }
}

/// The call direction. Unset is modeled as `Option::None` on the call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallDirection {
    /// Incoming call.
    Incoming,

    /// Outgoing call.
    Outgoing,
}

impl fmt::Display for CallDirection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Type of media for a call, settled once tracks are known.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallMediaType {
    /// Audio only.
    Audio,

    /// Audio and video.
    Video,
}

impl fmt::Display for CallMediaType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Which side ended the call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HangupParty {
    Local,
    Remote,
}

impl fmt::Display for HangupParty {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Hangup reasons recorded by the core itself. Applications may supply
/// any other short string through `hangup(reason)`.
pub mod reason {
    /// The invite expired before the remote side answered.
    pub const INVITE_TIMEOUT: &str = "invite_timeout";

    /// ICE connectivity establishment failed.
    pub const ICE_FAILED: &str = "ice_failed";

    /// Another device of ours answered the call.
    pub const ANSWERED_ELSEWHERE: &str = "answered_elsewhere";

    /// Local media capture was denied or unavailable.
    pub const USER_MEDIA_FAILED: &str = "user_media_failed";

    /// The remote media stream went away.
    pub const REMOTE_STREAM_ENDED: &str = "remote_stream_ended";

    /// The call was replaced during glare resolution.
    pub const REPLACED: &str = "replaced";

    /// Plain user-initiated hangup.
    pub const USER_HANGUP: &str = "user_hangup";
}
