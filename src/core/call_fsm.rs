//
// Copyright 2019-2021 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! Call Finite State Machine
//!
//! Consumes every event touching a call -- user actions, inbound
//! signalling, media provider callbacks, publish completions, and
//! timers -- serialized on the call's actor. Each handler re-checks
//! for the terminal state before mutating, so entering `ended` acts
//! as a cancellation token for everything still in flight.
//!
//! # Asynchronous inputs
//!
//! ## Control events from the application
//! - StartCapture (place/answer)
//! - LocalHangup
//! - Replaced
//! - EndCall
//!
//! ## Signalling events from the router
//! - ReceivedInvite
//! - ReceivedAnswer
//! - ReceivedCandidates
//! - ReceivedHangup
//! - AnsweredElsewhere
//!
//! ## From the media provider
//! - LocalMediaReady / LocalMediaFailed
//! - OfferCreated / OfferFailed / LocalOfferSet
//! - AnswerCreated / AnswerFailed / LocalAnswerSet
//! - LocalCandidate
//! - IceStateChanged
//! - RemoteStreamAdded / RemoteStreamEnded
//!
//! ## From timers and the candidate pump
//! - InviteTimeout / RingingTimeout
//! - PumpFlush / PumpPublishResult

use std::fmt;
use std::sync::{Arc, Condvar, Mutex};

use crate::common::{reason, CallDirection, CallMediaType, CallState, HangupParty, Result};
use crate::core::call::Call;
use crate::core::candidate_pump::{CandidatePump, COALESCE_DELAY};
use crate::core::media::{AnswerConstraints, IceConnectionState, MediaConstraints, MediaProvider};
use crate::core::signaling::{
    AnswerContent, CandidatesContent, HangupContent, IceCandidate, Payload, ReceivedInvite,
    SessionDescription,
};
use crate::core::sink::CallErrorCode;
use crate::error::RoomRtcError;

/// The different types of CallEvents.
pub enum CallEvent<T>
where
    T: MediaProvider,
{
    /// Begin local media acquisition (outbound place or inbound answer).
    StartCapture,
    /// Local capture completed; `for_answer` picks the negotiation path.
    LocalMediaReady {
        stream: T::MediaStream,
        for_answer: bool,
    },
    /// Local capture was denied or failed.
    LocalMediaFailed(String),
    /// The provider produced an offer description.
    OfferCreated(SessionDescription),
    /// The provider could not produce an offer.
    OfferFailed(String),
    /// The offer was applied as the local description.
    LocalOfferSet(SessionDescription),
    /// The provider produced an answer description.
    AnswerCreated(SessionDescription),
    /// The provider could not produce an answer.
    AnswerFailed(String),
    /// The answer was applied as the local description.
    LocalAnswerSet(SessionDescription),
    /// Hang up on behalf of the local user.
    LocalHangup {
        reason: String,
        suppress_event: bool,
    },
    /// Received an invite signalling message.
    ReceivedInvite(ReceivedInvite),
    /// Received an answer signalling message.
    ReceivedAnswer(AnswerContent),
    /// Received a batch of remote ICE candidates.
    ReceivedCandidates(CandidatesContent),
    /// Received a hangup signalling message.
    ReceivedHangup(HangupContent),
    /// Another of our devices took the call.
    AnsweredElsewhere,
    /// The provider gathered a local ICE candidate.
    LocalCandidate(IceCandidate),
    /// A scheduled candidate flush came due.
    PumpFlush,
    /// A candidate batch publish completed.
    PumpPublishResult {
        batch: Vec<IceCandidate>,
        result: std::result::Result<(), String>,
    },
    /// The peer connection's ICE state changed.
    IceStateChanged(IceConnectionState),
    /// The remote stream arrived.
    RemoteStreamAdded(T::MediaStream),
    /// The remote stream went away.
    RemoteStreamEnded,
    /// The outbound invite expired unanswered.
    InviteTimeout,
    /// The inbound ring expired unanswered.
    RingingTimeout,
    /// This call was replaced by another during glare resolution.
    Replaced(Call<T>),
    /// Flush the FSM queue; test infrastructure.
    Synchronize(Arc<(Mutex<bool>, Condvar)>),
    /// Shut the call down for disposal.
    EndCall,
}

impl<T> CallEvent<T>
where
    T: MediaProvider,
{
    /// Candidate traffic is chatty; log it at debug.
    fn is_frequent(&self) -> bool {
        matches!(
            self,
            Self::LocalCandidate(_) | Self::PumpFlush | Self::PumpPublishResult { .. }
        )
    }
}

impl<T> fmt::Display for CallEvent<T>
where
    T: MediaProvider,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let display = match self {
            Self::StartCapture => "StartCapture".to_string(),
            Self::LocalMediaReady { for_answer, .. } => {
                format!("LocalMediaReady(for_answer: {})", for_answer)
            }
            Self::LocalMediaFailed(e) => format!("LocalMediaFailed({})", e),
            Self::OfferCreated(_) => "OfferCreated".to_string(),
            Self::OfferFailed(e) => format!("OfferFailed({})", e),
            Self::LocalOfferSet(_) => "LocalOfferSet".to_string(),
            Self::AnswerCreated(_) => "AnswerCreated".to_string(),
            Self::AnswerFailed(e) => format!("AnswerFailed({})", e),
            Self::LocalAnswerSet(_) => "LocalAnswerSet".to_string(),
            Self::LocalHangup {
                reason,
                suppress_event,
            } => format!("LocalHangup({}, suppress: {})", reason, suppress_event),
            Self::ReceivedInvite(r) => format!("ReceivedInvite(age: {:?})", r.age),
            Self::ReceivedAnswer(_) => "ReceivedAnswer".to_string(),
            Self::ReceivedCandidates(c) => {
                format!("ReceivedCandidates({})", c.candidates.len())
            }
            Self::ReceivedHangup(h) => format!("ReceivedHangup({:?})", h.reason),
            Self::AnsweredElsewhere => "AnsweredElsewhere".to_string(),
            Self::LocalCandidate(_) => "LocalCandidate".to_string(),
            Self::PumpFlush => "PumpFlush".to_string(),
            Self::PumpPublishResult { batch, result } => format!(
                "PumpPublishResult({}, ok: {})",
                batch.len(),
                result.is_ok()
            ),
            Self::IceStateChanged(s) => format!("IceStateChanged({})", s),
            Self::RemoteStreamAdded(_) => "RemoteStreamAdded".to_string(),
            Self::RemoteStreamEnded => "RemoteStreamEnded".to_string(),
            Self::InviteTimeout => "InviteTimeout".to_string(),
            Self::RingingTimeout => "RingingTimeout".to_string(),
            Self::Replaced(call) => format!("Replaced({})", call.call_id()),
            Self::Synchronize(_) => "Synchronize".to_string(),
            Self::EndCall => "EndCall".to_string(),
        };
        write!(f, "({})", display)
    }
}

impl<T> fmt::Debug for CallEvent<T>
where
    T: MediaProvider,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}

/// CallStateMachine object.
///
/// Runs as the state of the call's actor; every `handle_event` call
/// happens on that one thread, which is the serialization the rest of
/// the crate relies on. Owns the candidate pump so its bookkeeping
/// needs no further locking.
pub struct CallStateMachine<T>
where
    T: MediaProvider,
{
    /// Outbound ICE candidate batching and retry state.
    pump: CandidatePump,
    _marker: std::marker::PhantomData<T>,
}

impl<T> Default for CallStateMachine<T>
where
    T: MediaProvider,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> CallStateMachine<T>
where
    T: MediaProvider,
{
    pub fn new() -> Self {
        Self {
            pump: CandidatePump::new(),
            _marker: std::marker::PhantomData,
        }
    }

    /// Top level event dispatch.
    pub fn handle_event(&mut self, call: Call<T>, event: CallEvent<T>) {
        // Handled no matter what state the call is in.
        match event {
            CallEvent::Synchronize(sync) => return Self::handle_synchronize(&sync),
            CallEvent::EndCall => {
                if let Err(e) = self.handle_end_call(call) {
                    error!("handle_end_call() failed: {:?}", e);
                }
                return;
            }
            _ => {}
        }

        let state = match call.state() {
            Ok(state) => state,
            Err(e) => {
                error!("handle_event(): state unavailable: {:?}", e);
                return;
            }
        };

        if event.is_frequent() {
            debug!("state: {}, event: {}", state, event);
        } else {
            info!("state: {}, event: {}", state, event);
        }

        // `ended` is absorbing: everything still in flight becomes a
        // no-op, which is what makes late callbacks and duplicate
        // signalling idempotent.
        if state == CallState::Ended {
            match &event {
                CallEvent::LocalMediaReady { stream, .. } => {
                    debug!("dropping capture that completed after end");
                    call.media_provider().stop_stream(stream);
                }
                CallEvent::PumpFlush | CallEvent::PumpPublishResult { .. } => self.pump.clear(),
                _ => debug!("handle_event(): dropping {} while ended", event),
            }
            return;
        }

        let result = match event {
            CallEvent::StartCapture => self.handle_start_capture(call),
            CallEvent::LocalMediaReady { stream, for_answer } => {
                self.handle_local_media_ready(call, state, stream, for_answer)
            }
            CallEvent::LocalMediaFailed(message) => {
                self.handle_local_media_failed(call, message)
            }
            CallEvent::OfferCreated(offer) => self.handle_offer_created(call, offer),
            CallEvent::OfferFailed(message) => self.handle_offer_failed(call, message),
            CallEvent::LocalOfferSet(offer) => self.handle_local_offer_set(call, offer),
            CallEvent::AnswerCreated(answer) => self.handle_answer_created(call, answer),
            CallEvent::AnswerFailed(message) => self.handle_answer_failed(call, message),
            CallEvent::LocalAnswerSet(answer) => self.handle_local_answer_set(call, answer),
            CallEvent::LocalHangup {
                reason,
                suppress_event,
            } => self.terminate(
                &call,
                HangupParty::Local,
                &reason,
                !suppress_event,
                !suppress_event,
            ),
            CallEvent::ReceivedInvite(received) => {
                self.handle_received_invite(call, state, received)
            }
            CallEvent::ReceivedAnswer(answer) => {
                self.handle_received_answer(call, state, answer)
            }
            CallEvent::ReceivedCandidates(candidates) => {
                self.handle_received_candidates(call, candidates)
            }
            CallEvent::ReceivedHangup(hangup) => self.handle_received_hangup(call, hangup),
            CallEvent::AnsweredElsewhere => {
                self.terminate(&call, HangupParty::Remote, reason::ANSWERED_ELSEWHERE, false, true)
            }
            CallEvent::LocalCandidate(candidate) => self.handle_local_candidate(call, candidate),
            CallEvent::PumpFlush => self.handle_pump_flush(call),
            CallEvent::PumpPublishResult { batch, result } => {
                self.handle_pump_publish_result(call, batch, result)
            }
            CallEvent::IceStateChanged(new_state) => {
                self.handle_ice_state_changed(call, state, new_state)
            }
            CallEvent::RemoteStreamAdded(stream) => self.handle_remote_stream_added(call, stream),
            CallEvent::RemoteStreamEnded => {
                self.terminate(&call, HangupParty::Remote, reason::REMOTE_STREAM_ENDED, false, true)
            }
            CallEvent::InviteTimeout => self.handle_invite_timeout(call, state),
            CallEvent::RingingTimeout => self.handle_ringing_timeout(call, state),
            CallEvent::Replaced(new_call) => self.handle_replaced(call, new_call),
            CallEvent::Synchronize(_) => Ok(()),
            CallEvent::EndCall => Ok(()),
        };
        if let Err(e) = result {
            error!("Handling event failed: {:?}", e);
        }
    }

    /// Ask the provider for local capture matching the call's media
    /// type. The completion re-enters the FSM as LocalMediaReady or
    /// LocalMediaFailed.
    fn handle_start_capture(&mut self, call: Call<T>) -> Result<()> {
        call.mark_media_acquired()?;

        let media_type = call.media_type()?.unwrap_or(CallMediaType::Audio);
        let constraints = MediaConstraints::for_media_type(media_type);
        let for_answer = call.direction()? == Some(CallDirection::Incoming);

        let injector = call.clone();
        call.media_provider().acquire_media(
            constraints,
            Box::new(move |result| {
                let event = match result {
                    Ok(stream) => CallEvent::LocalMediaReady { stream, for_answer },
                    Err(e) => CallEvent::LocalMediaFailed(e.to_string()),
                };
                injector
                    .inject_event(event)
                    .unwrap_or_else(|e| error!("injecting capture result failed: {:?}", e));
            }),
        );
        Ok(())
    }

    /// Local capture completed; continue down the offer or answer path.
    fn handle_local_media_ready(
        &mut self,
        call: Call<T>,
        state: CallState,
        stream: T::MediaStream,
        for_answer: bool,
    ) -> Result<()> {
        if !for_answer {
            // A replacement installed by glare resolution takes the
            // stream instead; it continues on its own answer path.
            if let Some(successor) = call.successor()? {
                info!(
                    "handing captured stream to replacement call: {}",
                    successor.call_id()
                );
                return successor.accept_handed_stream(stream);
            }
        }
        if state == CallState::Ended {
            debug!("capture completed after end, stopping stream");
            call.media_provider().stop_stream(&stream);
            return Ok(());
        }

        if call.media_type()? == Some(CallMediaType::Video) {
            call.play_local_view(&stream)?;
        }
        // Store the stream before applying enablement so mutes toggled
        // while capture was resolving cannot fall between the two.
        call.set_local_stream(stream.clone())?;
        call.media_provider()
            .set_audio_enabled(&stream, !call.is_microphone_muted());
        call.media_provider()
            .set_video_enabled(&stream, !call.is_local_video_muted());

        if for_answer {
            self.continue_answer_path(call, stream)
        } else {
            self.continue_offer_path(call, stream)
        }
    }

    fn continue_offer_path(&mut self, call: Call<T>, stream: T::MediaStream) -> Result<()> {
        let pc = call.create_peer_connection()?;
        call.media_provider().attach_stream(&pc, &stream)?;
        call.set_state(CallState::CreateOffer)?;

        let injector = call.clone();
        call.media_provider().create_offer(
            &pc,
            Box::new(move |result| {
                let event = match result {
                    Ok(offer) => CallEvent::OfferCreated(offer),
                    Err(e) => CallEvent::OfferFailed(e.to_string()),
                };
                injector
                    .inject_event(event)
                    .unwrap_or_else(|e| error!("injecting offer result failed: {:?}", e));
            }),
        );
        Ok(())
    }

    fn continue_answer_path(&mut self, call: Call<T>, stream: T::MediaStream) -> Result<()> {
        let pc = call.peer_connection()?.ok_or_else(|| {
            RoomRtcError::OptionValueNotSet(
                "continue_answer_path()".to_string(),
                "peer_connection".to_string(),
            )
        })?;
        call.media_provider().attach_stream(&pc, &stream)?;

        // Set synchronously, before the answer callback resolves, so
        // concurrent messages get classified against create_answer.
        call.set_state(CallState::CreateAnswer)?;

        let constraints = AnswerConstraints {
            offer_to_receive_audio: true,
            offer_to_receive_video: call.media_type()? == Some(CallMediaType::Video),
        };
        let injector = call.clone();
        call.media_provider().create_answer(
            &pc,
            constraints,
            Box::new(move |result| {
                let event = match result {
                    Ok(answer) => CallEvent::AnswerCreated(answer),
                    Err(e) => CallEvent::AnswerFailed(e.to_string()),
                };
                injector
                    .inject_event(event)
                    .unwrap_or_else(|e| error!("injecting answer result failed: {:?}", e));
            }),
        );
        Ok(())
    }

    /// Capture denial ends the call after telling the application.
    fn handle_local_media_failed(&mut self, call: Call<T>, message: String) -> Result<()> {
        call.emit_error(CallErrorCode::NoUserMedia, &message)?;
        self.terminate(
            &call,
            HangupParty::Local,
            reason::USER_MEDIA_FAILED,
            true,
            true,
        )
    }

    fn handle_offer_created(&mut self, call: Call<T>, offer: SessionDescription) -> Result<()> {
        let pc = call.peer_connection()?.ok_or_else(|| {
            RoomRtcError::OptionValueNotSet(
                "handle_offer_created()".to_string(),
                "peer_connection".to_string(),
            )
        })?;
        let description = offer.clone();
        let injector = call.clone();
        call.media_provider().set_local_description(
            &pc,
            offer,
            Box::new(move |result| match result {
                Ok(()) => injector
                    .inject_event(CallEvent::LocalOfferSet(description))
                    .unwrap_or_else(|e| error!("injecting local offer failed: {:?}", e)),
                Err(e) => error!("set_local_description (offer) failed: {:?}", e),
            }),
        );
        Ok(())
    }

    /// Offer creation failure is advisory; the application decides
    /// whether to hang up.
    fn handle_offer_failed(&mut self, call: Call<T>, message: String) -> Result<()> {
        call.emit_error(CallErrorCode::LocalOfferFailed, &message)
    }

    /// The local description is in place: publish the invite, move to
    /// invite_sent, and start the ringing clock.
    fn handle_local_offer_set(&mut self, call: Call<T>, offer: SessionDescription) -> Result<()> {
        let content = call.invite_content(offer);
        call.publish(
            Payload::Invite(content),
            Box::new(|result| {
                if let Err(e) = result {
                    error!("invite publish failed: {:?}", e);
                }
            }),
        );
        call.mark_invite_sent();
        call.set_state(CallState::InviteSent)?;
        call.inject_event_delayed(call.invite_lifetime(), CallEvent::InviteTimeout)
    }

    fn handle_answer_created(&mut self, call: Call<T>, answer: SessionDescription) -> Result<()> {
        let pc = call.peer_connection()?.ok_or_else(|| {
            RoomRtcError::OptionValueNotSet(
                "handle_answer_created()".to_string(),
                "peer_connection".to_string(),
            )
        })?;
        let description = answer.clone();
        let injector = call.clone();
        call.media_provider().set_local_description(
            &pc,
            answer,
            Box::new(move |result| match result {
                Ok(()) => injector
                    .inject_event(CallEvent::LocalAnswerSet(description))
                    .unwrap_or_else(|e| error!("injecting local answer failed: {:?}", e)),
                Err(e) => error!("set_local_description (answer) failed: {:?}", e),
            }),
        );
        Ok(())
    }

    fn handle_answer_failed(&mut self, _call: Call<T>, message: String) -> Result<()> {
        // Mirrors the offer-failure policy, but there is no wire code
        // for it; the ringing timeout will reap the call.
        error!("create_answer failed: {}", message);
        Ok(())
    }

    fn handle_local_answer_set(&mut self, call: Call<T>, answer: SessionDescription) -> Result<()> {
        let content = AnswerContent::new(call.call_id(), answer);
        call.publish(
            Payload::Answer(content),
            Box::new(|result| {
                if let Err(e) = result {
                    error!("answer publish failed: {:?}", e);
                }
            }),
        );
        call.set_state(CallState::Connecting)
    }

    /// An invite arrived: apply the remote offer, move to ringing, and
    /// start the (age-shortened) ringing clock.
    fn handle_received_invite(
        &mut self,
        call: Call<T>,
        state: CallState,
        received: ReceivedInvite,
    ) -> Result<()> {
        if state != CallState::Fledgling {
            self.unexpected_state(state, "ReceivedInvite");
            return Ok(());
        }
        call.set_direction(CallDirection::Incoming)?;
        let media_type = if received.invite.offer.has_video() {
            CallMediaType::Video
        } else {
            CallMediaType::Audio
        };
        call.set_media_type(media_type)?;

        let pc = call.create_peer_connection()?;
        call.media_provider().set_remote_description(
            &pc,
            received.invite.offer.clone(),
            Box::new(|result| {
                if let Err(e) = result {
                    debug!("set_remote_description (offer) failed: {:?}", e);
                }
            }),
        );
        call.set_state(CallState::Ringing)?;

        let remaining = received.invite.lifetime().saturating_sub(received.age);
        if remaining.is_zero() {
            call.inject_event(CallEvent::RingingTimeout)
        } else {
            call.inject_event_delayed(remaining, CallEvent::RingingTimeout)
        }
    }

    fn handle_received_answer(
        &mut self,
        call: Call<T>,
        state: CallState,
        answer: AnswerContent,
    ) -> Result<()> {
        let pc = match call.peer_connection()? {
            Some(pc) => pc,
            None => {
                warn!("received answer before a peer connection exists, dropping");
                return Ok(());
            }
        };
        call.media_provider().set_remote_description(
            &pc,
            answer.answer,
            Box::new(|result| {
                if let Err(e) = result {
                    debug!("set_remote_description (answer) failed: {:?}", e);
                }
            }),
        );
        // Do not regress if ICE already won the race.
        if state != CallState::Connected {
            call.set_state(CallState::Connecting)?;
        }
        Ok(())
    }

    /// Remote candidates are best effort: every per-candidate failure
    /// is swallowed.
    fn handle_received_candidates(
        &mut self,
        call: Call<T>,
        candidates: CandidatesContent,
    ) -> Result<()> {
        let pc = match call.peer_connection()? {
            Some(pc) => pc,
            None => {
                debug!("received candidates before a peer connection exists, dropping");
                return Ok(());
            }
        };
        for candidate in candidates.candidates {
            if let Err(e) = call.media_provider().add_remote_candidate(&pc, candidate) {
                debug!("add_remote_candidate failed: {:?}", e);
            }
        }
        Ok(())
    }

    fn handle_received_hangup(&mut self, call: Call<T>, hangup: HangupContent) -> Result<()> {
        let reason = hangup.reason.unwrap_or_default();
        self.terminate(&call, HangupParty::Remote, &reason, false, true)
    }

    fn handle_local_candidate(&mut self, call: Call<T>, candidate: IceCandidate) -> Result<()> {
        if let Some(delay) = self.pump.enqueue(candidate) {
            call.inject_event_delayed(delay, CallEvent::PumpFlush)?;
        }
        Ok(())
    }

    /// Drain the pump and publish one batch. The completion re-enters
    /// as PumpPublishResult, which keeps publishes serial per call.
    fn handle_pump_flush(&mut self, call: Call<T>) -> Result<()> {
        let state = call.state()?;
        if state == CallState::Ended {
            self.pump.clear();
            return Ok(());
        }
        if state == CallState::Fledgling {
            // Candidates must not go out before the call exists on the
            // wire; check again shortly.
            call.inject_event_delayed(COALESCE_DELAY, CallEvent::PumpFlush)?;
            return Ok(());
        }
        let batch = match self.pump.begin_flush() {
            Some(batch) => batch,
            None => return Ok(()),
        };
        let content = CandidatesContent::new(call.call_id(), batch.clone());
        let injector = call.clone();
        call.publish(
            Payload::Candidates(content),
            Box::new(move |result| {
                let result = result.map_err(|e| e.to_string());
                injector
                    .inject_event(CallEvent::PumpPublishResult { batch, result })
                    .unwrap_or_else(|e| error!("injecting publish result failed: {:?}", e));
            }),
        );
        Ok(())
    }

    fn handle_pump_publish_result(
        &mut self,
        call: Call<T>,
        batch: Vec<IceCandidate>,
        result: std::result::Result<(), String>,
    ) -> Result<()> {
        match result {
            Ok(()) => {
                // Anything that trickled in while the batch was in
                // flight goes out right away.
                if self.pump.publish_succeeded() {
                    self.handle_pump_flush(call)?;
                }
            }
            Err(e) => {
                warn!("candidates publish failed: {}", e);
                match self.pump.publish_failed(batch) {
                    Some(delay) => {
                        debug!("retrying candidates in {:?}", delay);
                        call.inject_event_delayed(delay, CallEvent::PumpFlush)?;
                    }
                    None => {
                        warn!("giving up on candidates for now; they stay buffered");
                    }
                }
            }
        }
        Ok(())
    }

    fn handle_ice_state_changed(
        &mut self,
        call: Call<T>,
        state: CallState,
        new_state: IceConnectionState,
    ) -> Result<()> {
        match new_state {
            IceConnectionState::Connected | IceConnectionState::Completed => {
                if state != CallState::Connected {
                    call.set_state(CallState::Connected)?;
                }
                call.set_did_connect();
                Ok(())
            }
            IceConnectionState::Failed => {
                self.terminate(&call, HangupParty::Local, reason::ICE_FAILED, true, true)
            }
            other => {
                debug!("ignoring ICE state change: {}", other);
                Ok(())
            }
        }
    }

    fn handle_remote_stream_added(&mut self, call: Call<T>, stream: T::MediaStream) -> Result<()> {
        call.set_remote_stream(stream.clone())?;

        if call.direction()? == Some(CallDirection::Incoming) && call.media_type()?.is_none() {
            let media_type = if call.media_provider().has_video_track(&stream) {
                CallMediaType::Video
            } else {
                CallMediaType::Audio
            };
            call.set_media_type(media_type)?;
        }
        call.play_remote_view(&stream)?;

        if call.media_provider().is_open_webrtc() {
            // This stack exposes no ICE state events; playing remote
            // media is the connected signal.
            call.set_state(CallState::Connected)?;
            call.set_did_connect();
        }
        Ok(())
    }

    fn handle_invite_timeout(&mut self, call: Call<T>, state: CallState) -> Result<()> {
        if state != CallState::InviteSent {
            debug!("invite timer fired in state {}, ignoring", state);
            return Ok(());
        }
        self.terminate(&call, HangupParty::Local, reason::INVITE_TIMEOUT, true, true)
    }

    fn handle_ringing_timeout(&mut self, call: Call<T>, state: CallState) -> Result<()> {
        if state != CallState::Ringing {
            debug!("ringing timer fired in state {}, ignoring", state);
            return Ok(());
        }
        // The caller's own invite timer reaps its side; nothing goes
        // out on the wire from here.
        self.terminate(
            &call,
            HangupParty::Remote,
            reason::INVITE_TIMEOUT,
            false,
            true,
        )
    }

    fn handle_replaced(&mut self, call: Call<T>, new_call: Call<T>) -> Result<()> {
        call.emit_replaced(&new_call)?;
        self.terminate(&call, HangupParty::Local, reason::REPLACED, false, false)
    }

    fn handle_synchronize(sync: &Arc<(Mutex<bool>, Condvar)>) {
        let (mutex, condvar) = &**sync;
        if let Ok(mut done) = mutex.lock() {
            *done = true;
            condvar.notify_all();
        }
    }

    fn handle_end_call(&mut self, call: Call<T>) -> Result<()> {
        info!("handle_end_call():");
        if call.state()? != CallState::Ended {
            self.terminate(&call, HangupParty::Local, reason::USER_HANGUP, false, false)?;
        }
        call.terminate_complete()
    }

    /// Tear the call down: record the hangup, release media and the
    /// peer connection, optionally publish `m.call.hangup`, move to
    /// ended, optionally notify the application.
    fn terminate(
        &mut self,
        call: &Call<T>,
        party: HangupParty,
        hangup_reason: &str,
        publish_hangup: bool,
        emit_hangup: bool,
    ) -> Result<()> {
        if call.state()? == CallState::Ended {
            debug!("terminate(): already ended");
            return Ok(());
        }
        info!(
            "terminate(): call_id: {}, party: {}, reason: {}",
            call.call_id(),
            party,
            hangup_reason
        );
        call.set_hangup(party, hangup_reason)?;
        self.pump.clear();

        let provider = call.media_provider();
        if let Some(stream) = call.take_local_stream()? {
            provider.stop_tracks(&stream);
            provider.stop_stream(&stream);
        }
        if let Some(stream) = call.take_remote_stream()? {
            provider.stop_tracks(&stream);
            provider.stop_stream(&stream);
        }
        call.pause_views()?;

        if let Some(pc) = call.take_peer_connection()? {
            // Locally initiated hangups close unconditionally; a
            // remote teardown may already have closed signalling.
            if party == HangupParty::Local || !provider.is_signaling_closed(&pc) {
                provider.close_peer_connection(&pc);
            }
        }

        if publish_hangup && call.should_send_hangup()? {
            let content = HangupContent::new(call.call_id(), hangup_reason);
            call.publish(
                Payload::Hangup(content),
                Box::new(|result| {
                    if let Err(e) = result {
                        warn!("hangup publish failed: {:?}", e);
                    }
                }),
            );
        }

        call.set_state(CallState::Ended)?;
        if emit_hangup {
            call.emit_hangup()?;
        }
        Ok(())
    }

    fn unexpected_state(&self, state: CallState, event: &str) {
        warn!("Unexpected event {}, while in state {}", event, state);
    }
}
