//! Offer/answer/ICE state machine for the calling side.
//!
//! The negotiator is owned by a single task (see [`crate::call`]); every
//! handler takes `&mut self`, so no two events ever mutate the session at the
//! same time. Each suspension point races against the hang-up flag.

use std::future::Future;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use voxlane_common::{Error, IceCandidate, Result, SdpType, SessionDescription, SignalingMessage};

use crate::peer::{AudioTrack, MediaCapture, PeerConnection, PeerConnectionState};
use crate::session::{CallState, CallStatus, NegotiationSession};
use crate::signaling::SignalSink;

/// What happened to an event that did not end the call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Applied to the session and the peer connection.
    Applied,
    /// Held in the pending candidate queue.
    Buffered,
    /// Not applicable in the current state.
    Ignored(Error),
    /// A remote candidate that does not fit the negotiated session.
    Rejected(String),
}

pub struct Negotiator<P, M, S>
where
    P: PeerConnection,
    M: MediaCapture<Track = P::Track>,
    S: SignalSink,
{
    session: NegotiationSession,
    peer: P,
    media: M,
    signaling: S,
    tracks: Vec<P::Track>,
    cancel: watch::Receiver<bool>,
    status_tx: watch::Sender<CallStatus>,
    remote_tx: watch::Sender<Option<P::Remote>>,
    released: bool,
}

impl<P, M, S> Negotiator<P, M, S>
where
    P: PeerConnection,
    M: MediaCapture<Track = P::Track>,
    S: SignalSink,
{
    /// `cancel` flips to `true` when the caller hangs up.
    pub fn new(peer: P, media: M, signaling: S, cancel: watch::Receiver<bool>) -> Self {
        let session = NegotiationSession::new();
        let (status_tx, _) = watch::channel(session.status());
        let (remote_tx, _) = watch::channel(None);
        Self {
            session,
            peer,
            media,
            signaling,
            tracks: Vec::new(),
            cancel,
            status_tx,
            remote_tx,
            released: false,
        }
    }

    pub fn session(&self) -> &NegotiationSession {
        &self.session
    }

    pub fn state(&self) -> CallState {
        self.session.state()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<CallStatus> {
        self.status_tx.subscribe()
    }

    pub fn subscribe_remote(&self) -> watch::Receiver<Option<P::Remote>> {
        self.remote_tx.subscribe()
    }

    /// Number of local tracks currently held.
    pub fn local_track_count(&self) -> usize {
        self.tracks.len()
    }

    /// `Idle -> Initiating -> OfferSent`.
    ///
    /// On error the session has already been torn down and is `Failed`
    /// (or `Closed` if the caller hung up meanwhile).
    pub async fn start_call(&mut self) -> Result<Disposition> {
        let state = self.state();
        if state != CallState::Idle {
            let err = Error::stale(format!("call start while {state}"));
            warn!(session = %self.session.id, "{}", err);
            return Ok(Disposition::Ignored(err));
        }

        self.transition(CallState::Initiating);
        match self.initiate().await {
            Ok(()) => Ok(Disposition::Applied),
            Err(e) => {
                self.abort(&e).await;
                Err(e)
            }
        }
    }

    async fn initiate(&mut self) -> Result<()> {
        let tracks = cancellable(&self.cancel, self.media.acquire_audio()).await?;
        if tracks.is_empty() {
            return Err(Error::media_access("capture yielded no audio tracks"));
        }
        info!(session = %self.session.id, "acquired {} local audio track(s)", tracks.len());
        self.tracks = tracks;

        for track in &self.tracks {
            cancellable(&self.cancel, self.peer.add_track(track)).await?;
        }

        let offer = cancellable(&self.cancel, self.peer.create_offer()).await?;
        if offer.kind != SdpType::Offer {
            return Err(Error::negotiation(format!(
                "expected an offer, peer produced {}",
                offer.kind
            )));
        }
        cancellable(&self.cancel, self.peer.set_local_description(offer.clone())).await?;
        self.session.set_local_description(offer.clone());

        if *self.cancel.borrow() {
            return Err(Error::Cancelled);
        }
        self.signaling.send(SignalingMessage::Offer(offer))?;
        self.transition(CallState::OfferSent);
        Ok(())
    }

    /// Dispatch a message received from the relay.
    pub async fn handle_signal(&mut self, message: SignalingMessage) -> Result<Disposition> {
        match message {
            SignalingMessage::Answer(desc) => self.apply_answer(desc).await,
            SignalingMessage::IceCandidate(candidate) => {
                Ok(self.handle_remote_candidate(candidate).await)
            }
            SignalingMessage::Offer(_) => Ok(self.ignore("unexpected offer from relay")),
        }
    }

    /// `OfferSent -> Connected`. Answers in any other state leave the
    /// session untouched.
    pub async fn apply_answer(&mut self, answer: SessionDescription) -> Result<Disposition> {
        let state = self.state();
        if state != CallState::OfferSent {
            return Ok(self.ignore(&format!("answer while {state}")));
        }
        if answer.kind != SdpType::Answer {
            return Ok(self.ignore(&format!("{} description in answer slot", answer.kind)));
        }

        let applied = cancellable(
            &self.cancel,
            self.peer.set_remote_description(answer.clone()),
        )
        .await;
        if let Err(e) = applied {
            self.abort(&e).await;
            return Err(e);
        }

        let pending = self.session.set_remote_description(answer);
        if !pending.is_empty() {
            debug!(session = %self.session.id, "flushing {} buffered remote candidate(s)", pending.len());
        }
        for candidate in pending {
            self.apply_remote_candidate(candidate).await;
        }

        self.transition(CallState::Connected);
        Ok(Disposition::Applied)
    }

    /// Apply a remote candidate, or buffer it until the remote description
    /// is known.
    pub async fn handle_remote_candidate(&mut self, candidate: IceCandidate) -> Disposition {
        let state = self.state();
        if !state.accepts_candidates() {
            return self.ignore(&format!("remote candidate while {state}"));
        }
        if self.session.remote_description().is_none() {
            debug!(session = %self.session.id, "buffering remote candidate until answer: {}", candidate.candidate);
            self.session.buffer_remote_candidate(candidate);
            return Disposition::Buffered;
        }
        self.apply_remote_candidate(candidate).await
    }

    async fn apply_remote_candidate(&mut self, candidate: IceCandidate) -> Disposition {
        let admitted = match self.session.remote_description() {
            Some(remote) => remote.admits(&candidate).map_err(|e| e.to_string()),
            None => Err("no remote description".to_string()),
        };
        if let Err(reason) = admitted {
            warn!(session = %self.session.id, "rejecting remote candidate {:?}: {}", candidate.candidate, reason);
            return Disposition::Rejected(reason);
        }

        match self.peer.add_ice_candidate(candidate.clone()).await {
            Ok(()) => {
                debug!(session = %self.session.id, "applied remote candidate: {}", candidate.candidate);
                self.session.record_remote_candidate(candidate);
                Disposition::Applied
            }
            Err(e) => {
                warn!(session = %self.session.id, "peer refused remote candidate {:?}: {}", candidate.candidate, e);
                Disposition::Rejected(e.to_string())
            }
        }
    }

    /// Forward a locally gathered candidate to the peer immediately.
    pub fn handle_local_candidate(&mut self, candidate: IceCandidate) -> Disposition {
        let state = self.state();
        if !state.accepts_candidates() {
            return self.ignore(&format!("local candidate while {state}"));
        }
        self.session.record_local_candidate(candidate.clone());
        match self.signaling.send(SignalingMessage::IceCandidate(candidate)) {
            Ok(()) => Disposition::Applied,
            Err(e) => {
                warn!(session = %self.session.id, "could not send local candidate: {}", e);
                Disposition::Ignored(e)
            }
        }
    }

    /// Publish the remote stream for playback.
    pub fn handle_remote_stream(&mut self, remote: P::Remote) -> Disposition {
        let state = self.state();
        if state.is_finished() {
            return self.ignore(&format!("remote stream while {state}"));
        }
        info!(session = %self.session.id, "remote audio stream available");
        self.remote_tx.send_replace(Some(remote));
        Disposition::Applied
    }

    /// React to connectivity changes of the underlying connection.
    pub async fn handle_connection_state(
        &mut self,
        peer_state: PeerConnectionState,
    ) -> Result<Disposition> {
        let state = self.state();
        let lost = match state {
            CallState::Connected => matches!(
                peer_state,
                PeerConnectionState::Disconnected
                    | PeerConnectionState::Failed
                    | PeerConnectionState::Closed
            ),
            CallState::Initiating | CallState::OfferSent => matches!(
                peer_state,
                PeerConnectionState::Failed | PeerConnectionState::Closed
            ),
            _ => false,
        };

        if lost {
            let err = Error::transport(format!("peer connection {peer_state}"));
            self.abort(&err).await;
            return Err(err);
        }
        debug!(session = %self.session.id, "peer connection {} while {}", peer_state, state);
        Ok(Disposition::Applied)
    }

    /// The relay transport went away.
    pub async fn handle_signaling_closed(&mut self, reason: &str) -> Result<Disposition> {
        let state = self.state();
        if state.is_finished() {
            debug!(session = %self.session.id, "signaling closed after call end: {}", reason);
            return Ok(Disposition::Ignored(Error::stale(format!(
                "signaling closed while {state}"
            ))));
        }
        let err = Error::transport(format!("signaling closed: {reason}"));
        self.abort(&err).await;
        Err(err)
    }

    /// End the call. Idempotent; a failed call stays `Failed`.
    pub async fn hang_up(&mut self) -> Result<()> {
        if self.state().is_finished() {
            debug!(session = %self.session.id, "hang-up while {}: nothing to do", self.state());
            return Ok(());
        }
        info!(session = %self.session.id, "hanging up");
        self.release().await;
        self.transition(CallState::Closed);
        Ok(())
    }

    async fn abort(&mut self, err: &Error) {
        self.release().await;
        if *err == Error::Cancelled {
            info!(session = %self.session.id, "call cancelled by hang-up");
            self.transition(CallState::Closed);
        } else {
            error!(session = %self.session.id, "call failed: {}", err);
            self.session.fail(err.to_string());
            self.publish();
        }
    }

    /// Stop local tracks, close the peer connection and the transport.
    async fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        for track in self.tracks.drain(..) {
            debug!(session = %self.session.id, "stopping local track {}", track.id());
            track.stop();
        }
        if let Err(e) = self.peer.close().await {
            warn!(session = %self.session.id, "closing peer connection: {}", e);
        }
        self.signaling.close();
        self.remote_tx.send_replace(None);
    }

    fn ignore(&self, what: &str) -> Disposition {
        let err = Error::stale(what);
        warn!(session = %self.session.id, "{}", err);
        Disposition::Ignored(err)
    }

    fn transition(&mut self, next: CallState) {
        self.session.transition(next);
        self.publish();
    }

    fn publish(&self) {
        self.status_tx.send_replace(self.session.status());
    }
}

/// Run `fut` unless the hang-up flag is (or becomes) set first.
async fn cancellable<T>(
    cancel: &watch::Receiver<bool>,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    let mut cancel = cancel.clone();
    tokio::select! {
        biased;
        _ = hung_up(&mut cancel) => Err(Error::Cancelled),
        result = fut => result,
    }
}

async fn hung_up(cancel: &mut watch::Receiver<bool>) {
    let sender_gone = cancel.wait_for(|flag| *flag).await.is_err();
    if sender_gone {
        // Nobody can hang up any more; never resolve.
        std::future::pending::<()>().await;
    }
}
