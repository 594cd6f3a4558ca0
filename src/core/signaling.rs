//
// Copyright 2019-2021 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! The messages we exchange over the signalling room to establish a
//! call. Payloads are plain owned fields, never live wrapper objects
//! from a media stack; some engines break when handed foreign wrappers.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::common::CallId;
use crate::core::util::redact_string;

/// Event type literal for invites.
pub const CALL_INVITE: &str = "m.call.invite";
/// Event type literal for answers.
pub const CALL_ANSWER: &str = "m.call.answer";
/// Event type literal for batched ICE candidates.
pub const CALL_CANDIDATES: &str = "m.call.candidates";
/// Event type literal for hangups.
pub const CALL_HANGUP: &str = "m.call.hangup";

/// Protocol version stamped on every payload.
pub const VERSION: u32 = 0;

/// Whether a session description is an offer or an answer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DescriptionType {
    Offer,
    Answer,
}

impl fmt::Display for DescriptionType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Offer => write!(f, "offer"),
            Self::Answer => write!(f, "answer"),
        }
    }
}

/// A session description as carried on the wire: the SDP text plus its
/// role, copied out of whatever the media stack produced.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub sdp: String,
    #[serde(rename = "type")]
    pub typ: DescriptionType,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            typ: DescriptionType::Offer,
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            typ: DescriptionType::Answer,
        }
    }

    /// True when the SDP carries a video media section.
    pub fn has_video(&self) -> bool {
        self.sdp.contains("m=video")
    }
}

impl fmt::Display for SessionDescription {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.typ, redact_string(&self.sdp))
    }
}

impl fmt::Debug for SessionDescription {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}

/// A trickled ICE candidate, copied field by field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid")]
    pub sdp_mid: String,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_m_line_index: u32,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>, sdp_mid: impl Into<String>, sdp_m_line_index: u32) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: sdp_mid.into(),
            sdp_m_line_index,
        }
    }
}

/// Content of `m.call.invite`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteContent {
    pub version: u32,
    pub call_id: String,
    pub offer: SessionDescription,
    /// How long the invite stays valid, in milliseconds.
    pub lifetime: u64,
}

impl InviteContent {
    pub fn new(call_id: &CallId, offer: SessionDescription, lifetime: Duration) -> Self {
        Self {
            version: VERSION,
            call_id: call_id.as_str().to_string(),
            offer,
            lifetime: lifetime.as_millis() as u64,
        }
    }

    pub fn lifetime(&self) -> Duration {
        Duration::from_millis(self.lifetime)
    }
}

/// Content of `m.call.answer`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerContent {
    pub version: u32,
    pub call_id: String,
    pub answer: SessionDescription,
}

impl AnswerContent {
    pub fn new(call_id: &CallId, answer: SessionDescription) -> Self {
        Self {
            version: VERSION,
            call_id: call_id.as_str().to_string(),
            answer,
        }
    }
}

/// Content of `m.call.candidates`. Candidates are batched; order
/// within a batch matches emission order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidatesContent {
    pub version: u32,
    pub call_id: String,
    pub candidates: Vec<IceCandidate>,
}

impl CandidatesContent {
    pub fn new(call_id: &CallId, candidates: Vec<IceCandidate>) -> Self {
        Self {
            version: VERSION,
            call_id: call_id.as_str().to_string(),
            candidates,
        }
    }
}

/// Content of `m.call.hangup`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HangupContent {
    pub version: u32,
    pub call_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl HangupContent {
    pub fn new(call_id: &CallId, reason: impl Into<String>) -> Self {
        Self {
            version: VERSION,
            call_id: call_id.as_str().to_string(),
            reason: Some(reason.into()),
        }
    }
}

/// A typed signalling payload, paired with its event type literal.
#[derive(Clone, Debug)]
pub enum Payload {
    Invite(InviteContent),
    Answer(AnswerContent),
    Candidates(CandidatesContent),
    Hangup(HangupContent),
}

impl Payload {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Invite(_) => CALL_INVITE,
            Self::Answer(_) => CALL_ANSWER,
            Self::Candidates(_) => CALL_CANDIDATES,
            Self::Hangup(_) => CALL_HANGUP,
        }
    }

    pub fn call_id(&self) -> &str {
        match self {
            Self::Invite(c) => &c.call_id,
            Self::Answer(c) => &c.call_id,
            Self::Candidates(c) => &c.call_id,
            Self::Hangup(c) => &c.call_id,
        }
    }

    /// Structured form, as handed to the messaging substrate.
    pub fn to_json(&self) -> crate::common::Result<serde_json::Value> {
        let value = match self {
            Self::Invite(c) => serde_json::to_value(c)?,
            Self::Answer(c) => serde_json::to_value(c)?,
            Self::Candidates(c) => serde_json::to_value(c)?,
            Self::Hangup(c) => serde_json::to_value(c)?,
        };
        Ok(value)
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let display = match self {
            Self::Invite(c) => format!("Invite(lifetime: {}ms)", c.lifetime),
            Self::Answer(_) => "Answer(...)".to_string(),
            Self::Candidates(c) => format!("Candidates({})", c.candidates.len()),
            Self::Hangup(c) => format!("Hangup({:?})", c.reason),
        };
        write!(f, "({}, call_id: {})", display, self.call_id())
    }
}

/// An invite with extra info specific to receiving: the router tells
/// us how old the event already is, so ringing can expire early.
#[derive(Clone, Debug)]
pub struct ReceivedInvite {
    pub invite: InviteContent,
    /// The approximate age of the invite.
    pub age: Duration,
}
