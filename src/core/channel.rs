//
// Copyright 2019-2021 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! SignalChannel trait describing the interface the messaging
//! substrate client must implement for calling.

use crate::common::Result;
use crate::core::signaling::Payload;

/// Completion callback for a publish; invoked exactly once, on any
/// thread, when the substrate has either delivered or given up.
pub type PublishDone = Box<dyn FnOnce(Result<()>) + Send>;

/// Publishes typed signalling payloads into a room. The substrate is
/// unreliable from the core's point of view; the per-publish
/// completion is what drives the candidate sender's retry logic.
pub trait SignalChannel: Send + Sync + 'static {
    fn publish(&self, room_id: &str, payload: Payload, done: PublishDone);
}
