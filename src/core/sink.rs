//
// Copyright 2019-2021 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! EventSink trait: how the hosting application observes a call.

use std::fmt;

use crate::common::{CallId, CallState};
use crate::core::call::Call;
use crate::core::media::MediaProvider;

/// Non-fatal error codes surfaced to the application. These are codes,
/// not types; hosts switch on the wire string.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallErrorCode {
    /// The media provider failed to create an offer.
    LocalOfferFailed,

    /// Capture was denied or hardware is unavailable. The call hangs
    /// itself up after emitting this.
    NoUserMedia,

    /// `place_*` was invoked with no error listener registered.
    NoErrorListener,
}

impl CallErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LocalOfferFailed => "local_offer_failed",
            Self::NoUserMedia => "no_user_media",
            Self::NoErrorListener => "no_error_listener",
        }
    }
}

impl fmt::Display for CallErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Observer interface registered on a call. All notifications arrive
/// serialized on the call's execution context.
///
/// Registering any sink satisfies the error-listener requirement that
/// `place_voice`/`place_video` enforce: every sink carries `on_error`.
pub trait EventSink<T>: Send
where
    T: MediaProvider,
{
    /// A state transition happened. Advisory.
    fn on_state_changed(&self, _call_id: &CallId, _old_state: CallState, _new_state: CallState) {}

    /// A non-fatal error. The host decides whether to hang up.
    fn on_error(&self, call_id: &CallId, code: CallErrorCode, message: &str);

    /// Terminal: the call ended. `hangup_party` and `hangup_reason`
    /// are readable on the call.
    fn on_hangup(&self, call: &Call<T>);

    /// The call is about to terminate in favor of `new_call`;
    /// consumers should re-bind to it.
    fn on_replaced(&self, old_call_id: &CallId, new_call: &Call<T>);
}
