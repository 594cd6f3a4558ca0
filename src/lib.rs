//
// Copyright 2019-2021 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! # RoomRTC -- A Rust call signalling core
//!
//! This crate drives the lifecycle of a single peer-to-peer voice or
//! video call whose signalling (session descriptions and ICE
//! candidates) travels as typed events through a room-based messaging
//! substrate. The substrate client, the media stack, and the UI are
//! external collaborators reached through ports; the crate owns the
//! per-call state machine and the candidate batching/retry sender.

#[macro_use]
extern crate log;

pub mod common;
pub mod error;

/// Core, platform independent functionality.
pub mod core {
    pub mod actor;
    pub mod call;
    pub mod call_fsm;
    pub mod call_mutex;
    pub mod candidate_pump;
    pub mod channel;
    pub mod media;
    pub mod signaling;
    pub mod sink;
    pub mod util;
}

/// Simulation implementations of the ports, for tests and examples.
pub mod sim {
    pub mod sim_channel;
    pub mod sim_media;
}
