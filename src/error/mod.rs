//
// Copyright 2019-2021 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! Common error codes.

use thiserror::Error;

use crate::common::{CallId, CallState};

/// Platform independent error conditions.
#[derive(Error, Debug)]
pub enum RoomRtcError {
    // Project wide common error codes
    #[error("Mutex poisoned: {0}")]
    MutexPoisoned(&'static str),
    #[error("Expecting non-none option value in: {0}, var: {1}")]
    OptionValueNotSet(String, String),

    // Call contract error codes
    #[error("No error listener registered on the event sink")]
    NoErrorListener,
    #[error("Invalid state for {operation}: {state}")]
    InvalidStateForOperation {
        operation: &'static str,
        state: CallState,
    },
    #[error("Peer connection already created, call_id: {0}")]
    PeerConnectionAlreadySet(CallId),
    #[error("Local media already acquired, call_id: {0}")]
    LocalMediaAlreadyAcquired(CallId),

    // Media provider error codes
    #[error("Unable to acquire local media: {0}")]
    AcquireMedia(String),
    #[error("Unable to create peer connection: {0}")]
    CreatePeerConnection(String),
    #[error("Unable to create offer: {0}")]
    CreateOffer(String),
    #[error("Unable to create answer: {0}")]
    CreateAnswer(String),
    #[error("Unable to apply session description: {0}")]
    SetDescription(String),
    #[error("AddIceCandidate failure")]
    AddIceCandidate,

    // Signalling channel error codes
    #[error("Publish failed: {0}")]
    Publish(String),
}
