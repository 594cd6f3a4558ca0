//
// Copyright 2019-2021 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! A peer-to-peer call controller.
//!
//! `Call` is a cloneable handle over shared per-call state. User
//! actions and inbound signalling are injected as events into a
//! per-call state machine (see [call_fsm](../call_fsm/index.html))
//! running on its own actor, which serializes every transition.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use crate::common::{
    CallDirection, CallId, CallMediaType, CallState, HangupParty, Result, RoomId, CALL_TIMEOUT,
};
use crate::core::actor::{Actor, Stopper};
use crate::core::call_fsm::{CallEvent, CallStateMachine};
use crate::core::call_mutex::CallMutex;
use crate::core::channel::{PublishDone, SignalChannel};
use crate::core::media::{
    IceConnectionState, IceServer, MediaProvider, PeerConnectionObserverTrait, SignalingState,
    UrlMinter,
};
use crate::core::signaling::{
    AnswerContent, CandidatesContent, HangupContent, IceCandidate, InviteContent, Payload,
    ReceivedInvite,
};
use crate::core::sink::{CallErrorCode, EventSink};
use crate::error::RoomRtcError;

/// Number of synchronize passes needed to drain the FSM queue: each
/// pass flushes the events that the handlers of the previous pass
/// enqueued, and the longest completion cascade (capture -> offer ->
/// local description -> publish) is shorter than this.
const SYNCHRONIZE_PASSES: usize = 6;

/// Construction options for a call.
///
/// `room_id`, `channel`, and `media_provider` are required;
/// `url_minter` only when video views are used. An empty
/// `turn_servers` list gets the fallback STUN entry injected.
pub struct CallConfig<T>
where
    T: MediaProvider,
{
    pub room_id: RoomId,
    pub channel: Arc<dyn SignalChannel>,
    pub media_provider: Arc<T>,
    pub url_minter: Option<Arc<dyn UrlMinter<T::MediaStream>>>,
    pub turn_servers: Vec<IceServer>,
    pub invite_lifetime: Duration,
    /// Identifier to adopt; inbound calls reuse the remote one. Minted
    /// when absent.
    pub call_id: Option<CallId>,
}

impl<T> CallConfig<T>
where
    T: MediaProvider,
{
    pub fn new(
        room_id: impl Into<RoomId>,
        channel: Arc<dyn SignalChannel>,
        media_provider: Arc<T>,
    ) -> Self {
        Self {
            room_id: room_id.into(),
            channel,
            media_provider,
            url_minter: None,
            turn_servers: Vec::new(),
            invite_lifetime: CALL_TIMEOUT,
            call_id: None,
        }
    }
}

/// A two-party negotiation context for media exchange within a room.
pub struct Call<T>
where
    T: MediaProvider,
{
    /// Unique identification for the call.
    call_id: CallId,
    /// The room the signalling events travel through.
    room_id: RoomId,
    /// Lifetime advertised on outbound invites; also the outbound
    /// ringing timeout.
    invite_lifetime: Duration,
    /// STUN/TURN configuration; never empty.
    turn_servers: Vec<IceServer>,
    /// The injected media stack adapter.
    media_provider: Arc<T>,
    /// The injected messaging substrate client.
    channel: Arc<dyn SignalChannel>,
    /// Converts stream handles into renderer URLs.
    url_minter: Option<Arc<dyn UrlMinter<T::MediaStream>>>,
    /// The call direction; None until placed or invited.
    direction: Arc<CallMutex<Option<CallDirection>>>,
    /// The call media type; None until tracks are known.
    media_type: Arc<CallMutex<Option<CallMediaType>>>,
    /// The current state of the call.
    state: Arc<CallMutex<CallState>>,
    /// Which side hung up; set once at termination.
    hangup_party: Arc<CallMutex<Option<HangupParty>>>,
    /// Why the call ended; set once at termination.
    hangup_reason: Arc<CallMutex<Option<String>>>,
    /// Local capture stream handle, owned by the provider.
    local_stream: Arc<CallMutex<Option<T::MediaStream>>>,
    /// Remote stream handle, owned by the provider.
    remote_stream: Arc<CallMutex<Option<T::MediaStream>>>,
    /// The one peer connection this call may own.
    peer_connection: Arc<CallMutex<Option<T::PeerConnection>>>,
    /// Renderer binding for local video.
    local_view: Arc<CallMutex<Option<T::VideoView>>>,
    /// Renderer binding for remote media.
    remote_view: Arc<CallMutex<Option<T::VideoView>>>,
    /// Replacement call installed by `replace_by`.
    successor: Arc<CallMutex<Option<Call<T>>>>,
    /// Registered application observers.
    observers: Arc<CallMutex<Vec<Box<dyn EventSink<T>>>>>,
    /// True once ICE ever reached connected/completed.
    did_connect: Arc<AtomicBool>,
    /// Capture may only happen once per call.
    media_acquired: Arc<AtomicBool>,
    /// Whether an invite went out for this call.
    did_send_invite: Arc<AtomicBool>,
    /// Glare handoff: answer() must wait for the replaced call's
    /// stream instead of capturing.
    wait_for_handed_stream: Arc<AtomicBool>,
    microphone_muted: Arc<AtomicBool>,
    local_video_muted: Arc<AtomicBool>,
    /// Injects events into the state machine.
    fsm: Actor<CallStateMachine<T>>,
    /// Stops the FSM actor at close().
    stopper: Stopper,
    /// Signals close() that the FSM observed EndCall.
    terminate_condvar: Arc<(Mutex<bool>, Condvar)>,
}

impl<T> fmt::Display for Call<T>
where
    T: MediaProvider,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let state = match self.state() {
            Ok(v) => format!("{}", v),
            Err(_) => "unavailable".to_string(),
        };
        write!(
            f,
            "thread: {:?}, call_id: {}, state: {}",
            thread::current().id(),
            self.call_id,
            state
        )
    }
}

impl<T> fmt::Debug for Call<T>
where
    T: MediaProvider,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl<T> Clone for Call<T>
where
    T: MediaProvider,
{
    fn clone(&self) -> Self {
        Self {
            call_id: self.call_id.clone(),
            room_id: self.room_id.clone(),
            invite_lifetime: self.invite_lifetime,
            turn_servers: self.turn_servers.clone(),
            media_provider: Arc::clone(&self.media_provider),
            channel: Arc::clone(&self.channel),
            url_minter: self.url_minter.clone(),
            direction: Arc::clone(&self.direction),
            media_type: Arc::clone(&self.media_type),
            state: Arc::clone(&self.state),
            hangup_party: Arc::clone(&self.hangup_party),
            hangup_reason: Arc::clone(&self.hangup_reason),
            local_stream: Arc::clone(&self.local_stream),
            remote_stream: Arc::clone(&self.remote_stream),
            peer_connection: Arc::clone(&self.peer_connection),
            local_view: Arc::clone(&self.local_view),
            remote_view: Arc::clone(&self.remote_view),
            successor: Arc::clone(&self.successor),
            observers: Arc::clone(&self.observers),
            did_connect: Arc::clone(&self.did_connect),
            media_acquired: Arc::clone(&self.media_acquired),
            did_send_invite: Arc::clone(&self.did_send_invite),
            wait_for_handed_stream: Arc::clone(&self.wait_for_handed_stream),
            microphone_muted: Arc::clone(&self.microphone_muted),
            local_video_muted: Arc::clone(&self.local_video_muted),
            fsm: self.fsm.clone(),
            stopper: self.stopper.clone(),
            terminate_condvar: Arc::clone(&self.terminate_condvar),
        }
    }
}

impl<T> Drop for Call<T>
where
    T: MediaProvider,
{
    fn drop(&mut self) {
        if Arc::strong_count(&self.state) == 1 {
            debug!("Dropping last reference to call: {}", self.call_id);
        }
    }
}

impl<T> Call<T>
where
    T: MediaProvider,
{
    /// Create a new Call in the fledgling state.
    pub fn new(config: CallConfig<T>) -> Self {
        let call_id = config.call_id.unwrap_or_else(CallId::mint);
        info!("new(): call_id: {}", call_id);

        let turn_servers = if config.turn_servers.is_empty() {
            vec![IceServer::fallback_stun()]
        } else {
            config.turn_servers
        };

        let stopper = Stopper::new();
        let fsm = Actor::start(stopper.clone(), |_actor| CallStateMachine::new());

        Self {
            call_id,
            room_id: config.room_id,
            invite_lifetime: config.invite_lifetime,
            turn_servers,
            media_provider: config.media_provider,
            channel: config.channel,
            url_minter: config.url_minter,
            direction: Arc::new(CallMutex::new(None, "direction")),
            media_type: Arc::new(CallMutex::new(None, "media_type")),
            state: Arc::new(CallMutex::new(CallState::Fledgling, "state")),
            hangup_party: Arc::new(CallMutex::new(None, "hangup_party")),
            hangup_reason: Arc::new(CallMutex::new(None, "hangup_reason")),
            local_stream: Arc::new(CallMutex::new(None, "local_stream")),
            remote_stream: Arc::new(CallMutex::new(None, "remote_stream")),
            peer_connection: Arc::new(CallMutex::new(None, "peer_connection")),
            local_view: Arc::new(CallMutex::new(None, "local_view")),
            remote_view: Arc::new(CallMutex::new(None, "remote_view")),
            successor: Arc::new(CallMutex::new(None, "successor")),
            observers: Arc::new(CallMutex::new(Vec::new(), "observers")),
            did_connect: Arc::new(AtomicBool::new(false)),
            media_acquired: Arc::new(AtomicBool::new(false)),
            did_send_invite: Arc::new(AtomicBool::new(false)),
            wait_for_handed_stream: Arc::new(AtomicBool::new(false)),
            microphone_muted: Arc::new(AtomicBool::new(false)),
            local_video_muted: Arc::new(AtomicBool::new(false)),
            fsm,
            stopper,
            terminate_condvar: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    /// Construct a call directly in the ended state, for rendering a
    /// hangup observed after the fact. No signalling or media happens.
    pub fn new_ended(config: CallConfig<T>, reason: impl Into<String>) -> Self {
        let call = Self::new(config);
        if let (Ok(mut state), Ok(mut party), Ok(mut stored)) = (
            call.state.lock(),
            call.hangup_party.lock(),
            call.hangup_reason.lock(),
        ) {
            *state = CallState::Ended;
            *party = Some(HangupParty::Remote);
            *stored = Some(reason.into());
        }
        call
    }

    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn invite_lifetime(&self) -> Duration {
        self.invite_lifetime
    }

    /// The effective STUN/TURN configuration (fallback included).
    pub fn turn_servers(&self) -> &[IceServer] {
        &self.turn_servers
    }

    /// Return the current state of the call.
    pub fn state(&self) -> Result<CallState> {
        let state = self.state.lock()?;
        Ok(*state)
    }

    pub fn direction(&self) -> Result<Option<CallDirection>> {
        let direction = self.direction.lock()?;
        Ok(*direction)
    }

    pub fn media_type(&self) -> Result<Option<CallMediaType>> {
        let media_type = self.media_type.lock()?;
        Ok(*media_type)
    }

    pub fn hangup_party(&self) -> Result<Option<HangupParty>> {
        let party = self.hangup_party.lock()?;
        Ok(*party)
    }

    pub fn hangup_reason(&self) -> Result<Option<String>> {
        let reason = self.hangup_reason.lock()?;
        Ok(reason.clone())
    }

    /// True once ICE ever reached connected/completed.
    pub fn did_connect(&self) -> bool {
        self.did_connect.load(Ordering::Acquire)
    }

    /// Register an application observer. At least one must be
    /// registered before placing a call.
    pub fn add_observer(&self, observer: Box<dyn EventSink<T>>) -> Result<()> {
        self.observers.lock()?.push(observer);
        Ok(())
    }

    /// Place an outbound voice call: acquire audio-only capture and
    /// drive the offer path.
    pub fn place_voice(&self) -> Result<()> {
        self.ensure_error_listener()?;
        self.begin_place(CallMediaType::Audio)
    }

    /// Place an outbound video call. The views are bound now; the
    /// remote stream is rendered into `remote_view` once it shows up.
    pub fn place_video(&self, local_view: T::VideoView, remote_view: T::VideoView) -> Result<()> {
        self.ensure_error_listener()?;
        *self.local_view.lock()? = Some(local_view);
        *self.remote_view.lock()? = Some(remote_view);
        self.begin_place(CallMediaType::Video)
    }

    fn begin_place(&self, media_type: CallMediaType) -> Result<()> {
        {
            let mut state = self.state.lock()?;
            if *state != CallState::Fledgling {
                return Err(RoomRtcError::InvalidStateForOperation {
                    operation: "place",
                    state: *state,
                }
                .into());
            }
            *state = CallState::WaitLocalMedia;
        }
        *self.direction.lock()? = Some(CallDirection::Outgoing);
        *self.media_type.lock()? = Some(media_type);
        self.notify_state_changed(CallState::Fledgling, CallState::WaitLocalMedia)?;
        self.inject_event(CallEvent::StartCapture)
    }

    /// Answer an inbound, ringing call.
    pub fn answer(&self) -> Result<()> {
        let state = self.state()?;
        if state == CallState::Ended {
            debug!("answer(): already ended, ignoring");
            return Ok(());
        }
        if self.wait_for_handed_stream.load(Ordering::Acquire) {
            // Glare handoff: the replaced call forwards its capture
            // when it completes; do not acquire our own.
            info!("answer(): waiting for handed stream");
            self.set_state(CallState::WaitLocalMedia)?;
            return Ok(());
        }
        if state != CallState::Ringing {
            return Err(RoomRtcError::InvalidStateForOperation {
                operation: "answer",
                state,
            }
            .into());
        }
        self.set_state(CallState::WaitLocalMedia)?;
        self.inject_event(CallEvent::StartCapture)
    }

    /// Hang up locally and publish the hangup to the room.
    pub fn hangup(&self, reason: &str) -> Result<()> {
        self.hangup_with_options(reason, false)
    }

    /// Hang up locally. With `suppress_event` neither the room event
    /// nor the sink hangup notification goes out (replacement uses
    /// this; consumers re-bind on `replaced`).
    pub fn hangup_with_options(&self, reason: &str, suppress_event: bool) -> Result<()> {
        if self.state()? == CallState::Ended {
            debug!("hangup(): already ended, ignoring");
            return Ok(());
        }
        self.inject_event(CallEvent::LocalHangup {
            reason: reason.to_string(),
            suppress_event,
        })
    }

    /// Re-bind the remote renderer; plays immediately when a remote
    /// stream is already present.
    pub fn set_remote_view(&self, view: T::VideoView) -> Result<()> {
        *self.remote_view.lock()? = Some(view);
        let stream = self.remote_stream.lock()?.clone();
        if let Some(stream) = stream {
            self.play_remote_view(&stream)?;
        }
        Ok(())
    }

    /// Hand this call over to `new_call` during glare resolution: the
    /// captured stream (current or future) transfers to `new_call`'s
    /// answer path, view bindings are copied, `replaced` is emitted,
    /// and this call terminates without any external hangup event.
    pub fn replace_by(&self, new_call: &Call<T>) -> Result<()> {
        info!(
            "replace_by(): call_id: {} -> call_id: {}",
            self.call_id,
            new_call.call_id()
        );
        match self.state()? {
            CallState::WaitLocalMedia => {
                // Capture has not completed yet; the successor link
                // forwards the stream when it does.
                new_call
                    .wait_for_handed_stream
                    .store(true, Ordering::Release);
            }
            CallState::CreateOffer | CallState::InviteSent => {
                if let Some(stream) = self.local_stream.lock()?.take() {
                    new_call.accept_handed_stream(stream)?;
                }
            }
            state => {
                debug!("replace_by(): nothing to hand over in state {}", state);
            }
        }
        new_call.copy_views_from(self)?;
        *self.successor.lock()? = Some(new_call.clone());
        self.inject_event(CallEvent::Replaced(new_call.clone()))
    }

    /// Mute or unmute the captured microphone tracks.
    pub fn set_microphone_muted(&self, muted: bool) -> Result<()> {
        self.microphone_muted.store(muted, Ordering::Release);
        if let Some(stream) = self.local_stream.lock()?.as_ref() {
            self.media_provider.set_audio_enabled(stream, !muted);
        }
        Ok(())
    }

    pub fn is_microphone_muted(&self) -> bool {
        self.microphone_muted.load(Ordering::Acquire)
    }

    /// Mute or unmute the captured video tracks.
    pub fn set_local_video_muted(&self, muted: bool) -> Result<()> {
        self.local_video_muted.store(muted, Ordering::Release);
        if let Some(stream) = self.local_stream.lock()?.as_ref() {
            self.media_provider.set_video_enabled(stream, !muted);
        }
        Ok(())
    }

    pub fn is_local_video_muted(&self) -> bool {
        self.local_video_muted.load(Ordering::Acquire)
    }

    // Inbound signalling intake, invoked by the host's event router.

    /// An `m.call.invite` arrived for this call. `age` is how old the
    /// event already was at delivery; it shortens the ringing window.
    pub fn on_invite(&self, invite: InviteContent, age: Duration) -> Result<()> {
        self.inject_event(CallEvent::ReceivedInvite(ReceivedInvite { invite, age }))
    }

    /// An `m.call.answer` arrived for this call.
    pub fn on_answer(&self, answer: AnswerContent) -> Result<()> {
        self.inject_event(CallEvent::ReceivedAnswer(answer))
    }

    /// An `m.call.candidates` batch arrived for this call.
    pub fn on_candidates(&self, candidates: CandidatesContent) -> Result<()> {
        self.inject_event(CallEvent::ReceivedCandidates(candidates))
    }

    /// An `m.call.hangup` arrived for this call.
    pub fn on_hangup(&self, hangup: HangupContent) -> Result<()> {
        self.inject_event(CallEvent::ReceivedHangup(hangup))
    }

    /// Another of our devices answered this call.
    pub fn on_answered_elsewhere(&self, _answer: AnswerContent) -> Result<()> {
        self.inject_event(CallEvent::AnsweredElsewhere)
    }

    /// Block until the FSM has drained its queue, including the event
    /// cascades triggered by provider and channel completions. Timer
    /// driven work is not waited for.
    pub fn synchronize(&self) -> Result<()> {
        for _ in 0..SYNCHRONIZE_PASSES {
            self.synchronize_once()?;
        }
        Ok(())
    }

    fn synchronize_once(&self) -> Result<()> {
        let sync = Arc::new((Mutex::new(false), Condvar::new()));
        self.inject_event(CallEvent::Synchronize(sync.clone()))?;

        let (mutex, condvar) = &*sync;
        let mut done = mutex
            .lock()
            .map_err(|_| RoomRtcError::MutexPoisoned("synchronize"))?;
        while !*done {
            done = condvar
                .wait(done)
                .map_err(|_| RoomRtcError::MutexPoisoned("synchronize"))?;
        }
        Ok(())
    }

    /// Dispose of the call: terminate if still active (without
    /// publishing anything) and stop the FSM actor. Blocks; must not
    /// be called from an observer callback.
    pub fn close(&self) -> Result<()> {
        info!("close(): call_id: {}", self.call_id);
        self.inject_event(CallEvent::EndCall)?;
        self.wait_for_terminate()?;
        self.stopper.stop_all_and_join();
        Ok(())
    }

    fn wait_for_terminate(&self) -> Result<()> {
        let (mutex, condvar) = &*self.terminate_condvar;
        let mut complete = mutex
            .lock()
            .map_err(|_| RoomRtcError::MutexPoisoned("terminate_condvar"))?;
        while !*complete {
            complete = condvar
                .wait(complete)
                .map_err(|_| RoomRtcError::MutexPoisoned("terminate_condvar"))?;
        }
        Ok(())
    }

    /// Notification that the FSM observed EndCall.
    ///
    /// `Note:` Called by the FSM on the actor thread.
    pub(crate) fn terminate_complete(&self) -> Result<()> {
        let (mutex, condvar) = &*self.terminate_condvar;
        let mut complete = mutex
            .lock()
            .map_err(|_| RoomRtcError::MutexPoisoned("terminate_condvar"))?;
        *complete = true;
        condvar.notify_all();
        Ok(())
    }

    // Internal state plumbing, used by the FSM.

    pub(crate) fn media_provider(&self) -> &Arc<T> {
        &self.media_provider
    }

    /// Update the current state and notify observers.
    pub(crate) fn set_state(&self, new_state: CallState) -> Result<()> {
        let old_state = {
            let mut state = self.state.lock()?;
            if *state == new_state {
                return Ok(());
            }
            let old = *state;
            *state = new_state;
            old
        };
        debug!(
            "set_state(): call_id: {}, {} -> {}",
            self.call_id, old_state, new_state
        );
        self.notify_state_changed(old_state, new_state)
    }

    fn notify_state_changed(&self, old_state: CallState, new_state: CallState) -> Result<()> {
        for observer in self.observers.lock()?.iter() {
            observer.on_state_changed(&self.call_id, old_state, new_state);
        }
        Ok(())
    }

    pub(crate) fn set_direction(&self, direction: CallDirection) -> Result<()> {
        *self.direction.lock()? = Some(direction);
        Ok(())
    }

    pub(crate) fn set_media_type(&self, media_type: CallMediaType) -> Result<()> {
        *self.media_type.lock()? = Some(media_type);
        Ok(())
    }

    /// Record which side ended the call and why. Set once; later
    /// attempts are ignored.
    pub(crate) fn set_hangup(&self, party: HangupParty, reason: &str) -> Result<()> {
        let mut hangup_party = self.hangup_party.lock()?;
        let mut hangup_reason = self.hangup_reason.lock()?;
        if hangup_party.is_none() {
            *hangup_party = Some(party);
        }
        if hangup_reason.is_none() {
            *hangup_reason = Some(reason.to_string());
        }
        Ok(())
    }

    pub(crate) fn set_did_connect(&self) {
        self.did_connect.store(true, Ordering::Release);
    }

    pub(crate) fn mark_invite_sent(&self) {
        self.did_send_invite.store(true, Ordering::Release);
    }

    /// Hangups only go on the wire when the remote side can know the
    /// call: always for inbound calls, only after the invite was
    /// published for outbound ones.
    pub(crate) fn should_send_hangup(&self) -> Result<bool> {
        Ok(match self.direction()? {
            Some(CallDirection::Incoming) => true,
            Some(CallDirection::Outgoing) => self.did_send_invite.load(Ordering::Acquire),
            None => false,
        })
    }

    /// Enforce the acquire-at-most-once invariant.
    pub(crate) fn mark_media_acquired(&self) -> Result<()> {
        if self.media_acquired.swap(true, Ordering::AcqRel) {
            return Err(RoomRtcError::LocalMediaAlreadyAcquired(self.call_id.clone()).into());
        }
        Ok(())
    }

    pub(crate) fn successor(&self) -> Result<Option<Call<T>>> {
        Ok(self.successor.lock()?.clone())
    }

    pub(crate) fn set_local_stream(&self, stream: T::MediaStream) -> Result<()> {
        *self.local_stream.lock()? = Some(stream);
        Ok(())
    }

    pub(crate) fn take_local_stream(&self) -> Result<Option<T::MediaStream>> {
        Ok(self.local_stream.lock()?.take())
    }

    pub(crate) fn set_remote_stream(&self, stream: T::MediaStream) -> Result<()> {
        *self.remote_stream.lock()? = Some(stream);
        Ok(())
    }

    pub(crate) fn take_remote_stream(&self) -> Result<Option<T::MediaStream>> {
        Ok(self.remote_stream.lock()?.take())
    }

    /// Create and store this call's one peer connection, wired to an
    /// observer that injects events back into the FSM.
    pub(crate) fn create_peer_connection(&self) -> Result<T::PeerConnection> {
        let mut slot = self.peer_connection.lock()?;
        if slot.is_some() {
            return Err(RoomRtcError::PeerConnectionAlreadySet(self.call_id.clone()).into());
        }
        let config = crate::core::media::PeerConnectionConfig::for_variant(
            self.media_provider.variant(),
            &self.turn_servers,
        );
        let observer = Box::new(CallPcObserver { call: self.clone() });
        let pc = self.media_provider.create_peer_connection(config, observer)?;
        *slot = Some(pc.clone());
        Ok(pc)
    }

    pub(crate) fn peer_connection(&self) -> Result<Option<T::PeerConnection>> {
        Ok(self.peer_connection.lock()?.clone())
    }

    pub(crate) fn take_peer_connection(&self) -> Result<Option<T::PeerConnection>> {
        Ok(self.peer_connection.lock()?.take())
    }

    /// Render the local capture stream into the local view, when both
    /// a view and a minter are configured.
    pub(crate) fn play_local_view(&self, stream: &T::MediaStream) -> Result<()> {
        let view = self.local_view.lock()?.clone();
        self.play_view(view, stream)
    }

    /// Render the remote stream into the remote view.
    pub(crate) fn play_remote_view(&self, stream: &T::MediaStream) -> Result<()> {
        let view = self.remote_view.lock()?.clone();
        self.play_view(view, stream)
    }

    fn play_view(&self, view: Option<T::VideoView>, stream: &T::MediaStream) -> Result<()> {
        let view = match view {
            Some(view) => view,
            None => return Ok(()),
        };
        match &self.url_minter {
            Some(minter) => {
                let url = minter.mint(stream);
                if let Err(e) = self.media_provider.play_view(&view, &url) {
                    warn!("play_view() failed: {}", e);
                }
            }
            None => warn!("play_view(): no url_minter configured, cannot render"),
        }
        Ok(())
    }

    pub(crate) fn pause_views(&self) -> Result<()> {
        if let Some(view) = self.local_view.lock()?.as_ref() {
            self.media_provider.pause_view(view);
        }
        if let Some(view) = self.remote_view.lock()?.as_ref() {
            self.media_provider.pause_view(view);
        }
        Ok(())
    }

    fn copy_views_from(&self, other: &Call<T>) -> Result<()> {
        *self.local_view.lock()? = other.local_view.lock()?.clone();
        *self.remote_view.lock()? = other.remote_view.lock()?.clone();
        Ok(())
    }

    /// Receive the capture stream of a call this one replaces; it goes
    /// straight into the answer path.
    pub(crate) fn accept_handed_stream(&self, stream: T::MediaStream) -> Result<()> {
        self.wait_for_handed_stream.store(false, Ordering::Release);
        self.inject_event(CallEvent::LocalMediaReady {
            stream,
            for_answer: true,
        })
    }

    /// Publish a signalling payload to this call's room.
    pub(crate) fn publish(&self, payload: Payload, done: PublishDone) {
        info!("publish(): {}", payload);
        self.channel.publish(&self.room_id, payload, done);
    }

    /// Build the invite payload for the created offer.
    pub(crate) fn invite_content(
        &self,
        offer: crate::core::signaling::SessionDescription,
    ) -> InviteContent {
        InviteContent::new(&self.call_id, offer, self.invite_lifetime)
    }

    fn ensure_error_listener(&self) -> Result<()> {
        if self.observers.lock()?.is_empty() {
            return Err(RoomRtcError::NoErrorListener.into());
        }
        Ok(())
    }

    // Observer notifications, emitted from the FSM thread.

    pub(crate) fn emit_error(&self, code: CallErrorCode, message: &str) -> Result<()> {
        error!(
            "call error: call_id: {}, code: {}, message: {}",
            self.call_id, code, message
        );
        for observer in self.observers.lock()?.iter() {
            observer.on_error(&self.call_id, code, message);
        }
        Ok(())
    }

    pub(crate) fn emit_hangup(&self) -> Result<()> {
        for observer in self.observers.lock()?.iter() {
            observer.on_hangup(self);
        }
        Ok(())
    }

    pub(crate) fn emit_replaced(&self, new_call: &Call<T>) -> Result<()> {
        for observer in self.observers.lock()?.iter() {
            observer.on_replaced(&self.call_id, new_call);
        }
        Ok(())
    }

    // Event injection.

    pub(crate) fn inject_event(&self, event: CallEvent<T>) -> Result<()> {
        let call = self.clone();
        self.fsm.send(move |fsm| fsm.handle_event(call, event));
        Ok(())
    }

    pub(crate) fn inject_event_delayed(&self, delay: Duration, event: CallEvent<T>) -> Result<()> {
        let call = self.clone();
        self.fsm
            .send_delayed(delay, move |fsm| fsm.handle_event(call, event));
        Ok(())
    }
}

/// Peer connection observer wired into the provider. Holds a call
/// handle only to inject events; the provider must release it when the
/// connection closes so the call's resources can unwind.
struct CallPcObserver<T>
where
    T: MediaProvider,
{
    call: Call<T>,
}

impl<T> PeerConnectionObserverTrait<T> for CallPcObserver<T>
where
    T: MediaProvider,
{
    fn handle_local_candidate_gathered(&mut self, candidate: IceCandidate) {
        if let Err(e) = self.call.inject_event(CallEvent::LocalCandidate(candidate)) {
            error!("injecting local candidate failed: {}", e);
        }
    }

    fn handle_ice_connection_state_changed(&mut self, new_state: IceConnectionState) {
        if let Err(e) = self.call.inject_event(CallEvent::IceStateChanged(new_state)) {
            error!("injecting ICE state change failed: {}", e);
        }
    }

    fn handle_signaling_state_changed(&mut self, new_state: SignalingState) {
        debug!(
            "signaling state changed: call_id: {}, new_state: {}",
            self.call.call_id(),
            new_state
        );
    }

    fn handle_remote_stream_added(&mut self, stream: T::MediaStream) {
        if let Err(e) = self.call.inject_event(CallEvent::RemoteStreamAdded(stream)) {
            error!("injecting remote stream failed: {}", e);
        }
    }

    fn handle_remote_stream_ended(&mut self) {
        if let Err(e) = self.call.inject_event(CallEvent::RemoteStreamEnded) {
            error!("injecting remote stream end failed: {}", e);
        }
    }
}
