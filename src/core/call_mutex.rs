//
// Copyright 2019-2021 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! Call Mutex
//!
//! Wrapper around `std::sync::Mutex` whose `lock()` converts a
//! poisoned mutex into a labelled error instead of a panic.

use std::sync::{Mutex, MutexGuard};

use crate::common::Result;
use crate::error::RoomRtcError;

pub struct CallMutex<T: ?Sized> {
    /// Human readable label for the mutex, used in the poison error.
    label: &'static str,
    /// The actual mutex.
    mutex: Mutex<T>,
}

impl<T> CallMutex<T> {
    pub fn new(t: T, label: &'static str) -> CallMutex<T> {
        CallMutex {
            mutex: Mutex::new(t),
            label,
        }
    }

    pub fn lock(&self) -> Result<MutexGuard<'_, T>> {
        match self.mutex.lock() {
            Ok(v) => Ok(v),
            Err(_) => Err(RoomRtcError::MutexPoisoned(self.label).into()),
        }
    }
}
