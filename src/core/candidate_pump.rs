//
// Copyright 2019-2021 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! Candidate Pump
//!
//! Buffers locally gathered ICE candidates, coalesces them into
//! batches, and decides the retry schedule when a publish fails. This
//! is pure bookkeeping: the call state machine owns the actual
//! publishing and timer scheduling and consults the pump for what to
//! do next. That split keeps one flush in flight per call at most,
//! because every decision passes through the serialized FSM.

use std::time::Duration;

use crate::core::signaling::IceCandidate;

/// How long a freshly scheduled flush waits for more candidates.
pub const COALESCE_DELAY: Duration = Duration::from_millis(100);

/// First retry delay; each consecutive failure doubles it.
const RETRY_BASE_MS: u64 = 500;

/// Consecutive failures tolerated before the pump gives up on the
/// current run. Undelivered candidates stay buffered and the next
/// enqueue starts a fresh round.
const MAX_FAILURES_PER_RUN: u32 = 5;

#[derive(Default)]
pub struct CandidatePump {
    /// Candidates awaiting publication, in emission order. Failed
    /// batches are re-queued at the front so ordering survives.
    buffer: Vec<IceCandidate>,
    /// Consecutive publish failures in the current run.
    attempts: u32,
    /// A flush (coalescing or retry) is already scheduled.
    flush_scheduled: bool,
    /// A drained batch is out with the channel and has not completed.
    in_flight: bool,
}

impl CandidatePump {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a candidate. Returns the coalescing delay when the
    /// caller should schedule a flush; returns None while a flush,
    /// an in-flight publish, or a back-off retry is already pending
    /// (the completion of those picks the buffer up again).
    pub fn enqueue(&mut self, candidate: IceCandidate) -> Option<Duration> {
        self.buffer.push(candidate);
        if self.attempts == 0 && !self.flush_scheduled && !self.in_flight {
            self.flush_scheduled = true;
            Some(COALESCE_DELAY)
        } else {
            None
        }
    }

    /// Atomically drain the buffer for publication. None when there is
    /// nothing to send.
    pub fn begin_flush(&mut self) -> Option<Vec<IceCandidate>> {
        self.flush_scheduled = false;
        if self.buffer.is_empty() {
            return None;
        }
        self.in_flight = true;
        Some(std::mem::take(&mut self.buffer))
    }

    /// The in-flight batch was delivered. Returns true when candidates
    /// arrived meanwhile and the caller should flush again immediately
    /// (no coalescing delay on the chained flush).
    pub fn publish_succeeded(&mut self) -> bool {
        self.in_flight = false;
        self.attempts = 0;
        if self.buffer.is_empty() {
            false
        } else {
            self.flush_scheduled = true;
            true
        }
    }

    /// The in-flight batch failed. Re-queues it ahead of anything that
    /// arrived meanwhile and returns the back-off delay for the retry,
    /// or None when the failure ceiling was hit and this run is over.
    pub fn publish_failed(&mut self, mut batch: Vec<IceCandidate>) -> Option<Duration> {
        batch.append(&mut self.buffer);
        self.buffer = batch;

        self.in_flight = false;
        self.attempts += 1;
        if self.attempts > MAX_FAILURES_PER_RUN {
            self.attempts = 0;
            self.flush_scheduled = false;
            return None;
        }
        self.flush_scheduled = true;
        Some(Duration::from_millis(RETRY_BASE_MS << (self.attempts - 1)))
    }

    /// Drop everything. Used when the call ends.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.attempts = 0;
        self.flush_scheduled = false;
        self.in_flight = false;
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}
