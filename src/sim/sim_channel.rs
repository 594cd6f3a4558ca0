//
// Copyright 2019-2021 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! Simulation implementation of the SignalChannel interface.
//!
//! Records every publish attempt (with a timestamp, for backoff
//! assertions) and can be told to fail the next N publishes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use crate::core::channel::{PublishDone, SignalChannel};
use crate::core::signaling::Payload;
use crate::error::RoomRtcError;

/// One observed call to publish().
#[derive(Clone, Debug)]
pub struct RecordedPublish {
    pub room_id: String,
    pub event_type: &'static str,
    pub content: serde_json::Value,
    pub at: Instant,
    pub ok: bool,
}

/// Simulation implementation of SignalChannel.
#[derive(Default)]
pub struct SimSignalChannel {
    attempts: Mutex<Vec<RecordedPublish>>,
    fail_next: AtomicUsize,
}

impl SimSignalChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` publishes (of any event type).
    pub fn fail_next_publishes(&self, n: usize) {
        self.fail_next.store(n, Ordering::Release);
    }

    /// All attempts for an event type, failed ones included, in order.
    pub fn attempts_of(&self, event_type: &str) -> Vec<RecordedPublish> {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.event_type == event_type)
            .cloned()
            .collect()
    }

    /// Successfully published contents for an event type, in order.
    pub fn published_of(&self, event_type: &str) -> Vec<serde_json::Value> {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.event_type == event_type && a.ok)
            .map(|a| a.content.clone())
            .collect()
    }

    pub fn published_count(&self, event_type: &str) -> usize {
        self.published_of(event_type).len()
    }

    pub fn last_published(&self, event_type: &str) -> Option<serde_json::Value> {
        self.published_of(event_type).pop()
    }

    pub fn total_attempts(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }
}

impl SignalChannel for SimSignalChannel {
    fn publish(&self, room_id: &str, payload: Payload, done: PublishDone) {
        let fail = loop {
            let n = self.fail_next.load(Ordering::Acquire);
            if n == 0 {
                break false;
            }
            if self
                .fail_next
                .compare_exchange(n, n - 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break true;
            }
        };

        let content = payload.to_json().unwrap_or(serde_json::Value::Null);
        self.attempts.lock().unwrap().push(RecordedPublish {
            room_id: room_id.to_string(),
            event_type: payload.event_type(),
            content,
            at: Instant::now(),
            ok: !fail,
        });

        if fail {
            done(Err(RoomRtcError::Publish(
                "simulated publish failure".to_string(),
            )
            .into()));
        } else {
            done(Ok(()));
        }
    }
}
