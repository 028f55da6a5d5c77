//! Call driver: one task owns the negotiator and feeds it every external
//! event in turn.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use voxlane_common::{Error, Result};

use crate::negotiator::{Disposition, Negotiator};
use crate::peer::{MediaCapture, PeerConnection, PeerEvent};
use crate::session::CallStatus;
use crate::signaling::{SignalSink, SignalingEvent};

/// Requests from the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallCommand {
    Start,
    HangUp,
}

/// UI-facing control surface of a running call.
pub struct CallHandle<R> {
    commands: mpsc::UnboundedSender<CallCommand>,
    cancel: Arc<watch::Sender<bool>>,
    status: watch::Receiver<CallStatus>,
    remote: watch::Receiver<Option<R>>,
}

impl<R> Clone for CallHandle<R> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            cancel: Arc::clone(&self.cancel),
            status: self.status.clone(),
            remote: self.remote.clone(),
        }
    }
}

impl<R> CallHandle<R> {
    /// Call-start trigger.
    pub fn start(&self) -> Result<()> {
        self.commands
            .send(CallCommand::Start)
            .map_err(|_| Error::stale("call already finished"))
    }

    /// End the call. Interrupts any in-flight step; safe to call repeatedly.
    pub fn hang_up(&self) {
        self.cancel.send_replace(true);
        let _ = self.commands.send(CallCommand::HangUp);
    }

    /// State notifications, including the failure reason.
    pub fn status(&self) -> watch::Receiver<CallStatus> {
        self.status.clone()
    }

    pub fn current_status(&self) -> CallStatus {
        self.status.borrow().clone()
    }

    /// Remote stream notifications. `None` until the peer sends media and
    /// again after teardown.
    pub fn remote_stream(&self) -> watch::Receiver<Option<R>> {
        self.remote.clone()
    }

    /// Wait until the call is `Closed` or `Failed`.
    pub async fn finished(&self) -> CallStatus {
        let mut status = self.status.clone();
        if let Ok(finished) = status.wait_for(|s| s.state.is_finished()).await {
            return finished.clone();
        }
        // Driver gone; its last published status is final.
        let last = status.borrow().clone();
        last
    }
}

struct CallDriver<P, M, S>
where
    P: PeerConnection,
    M: MediaCapture<Track = P::Track>,
    S: SignalSink,
{
    negotiator: Negotiator<P, M, S>,
    commands: mpsc::UnboundedReceiver<CallCommand>,
    signals: mpsc::UnboundedReceiver<SignalingEvent>,
    peer_events: mpsc::UnboundedReceiver<PeerEvent<P::Remote>>,
}

/// Spawn the task that owns a fresh negotiation session.
///
/// `signals` is typically [`SignalingChannel::event_stream`](crate::signaling::SignalingChannel::event_stream)
/// and `peer_events` the receiver handed out with the peer connection.
/// The task resolves to the final status.
pub fn spawn_call<P, M, S>(
    peer: P,
    peer_events: mpsc::UnboundedReceiver<PeerEvent<P::Remote>>,
    media: M,
    signaling: S,
    signals: mpsc::UnboundedReceiver<SignalingEvent>,
) -> (CallHandle<P::Remote>, JoinHandle<CallStatus>)
where
    P: PeerConnection + 'static,
    M: MediaCapture<Track = P::Track> + 'static,
    S: SignalSink + 'static,
{
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let negotiator = Negotiator::new(peer, media, signaling, cancel_rx);

    let handle = CallHandle {
        commands: commands_tx,
        cancel: Arc::new(cancel_tx),
        status: negotiator.subscribe_status(),
        remote: negotiator.subscribe_remote(),
    };

    let driver = CallDriver {
        negotiator,
        commands: commands_rx,
        signals,
        peer_events,
    };
    (handle, tokio::spawn(driver.run()))
}

impl<P, M, S> CallDriver<P, M, S>
where
    P: PeerConnection,
    M: MediaCapture<Track = P::Track>,
    S: SignalSink,
{
    async fn run(mut self) -> CallStatus {
        while !self.negotiator.state().is_finished() {
            tokio::select! {
                biased;
                Some(command) = self.commands.recv() => self.on_command(command).await,
                Some(event) = self.signals.recv() => self.on_signal(event).await,
                Some(event) = self.peer_events.recv() => self.on_peer_event(event).await,
                else => {
                    debug!("all call inputs closed");
                    break;
                }
            }
        }

        // Inputs gone without an explicit hang-up still release everything.
        if !self.negotiator.state().is_finished() {
            let _ = self.negotiator.hang_up().await;
        }
        self.negotiator.session().status()
    }

    async fn on_command(&mut self, command: CallCommand) {
        let result = match command {
            CallCommand::Start => self.negotiator.start_call().await,
            CallCommand::HangUp => self.negotiator.hang_up().await.map(|_| Disposition::Applied),
        };
        report(result);
    }

    async fn on_signal(&mut self, event: SignalingEvent) {
        let result = match event {
            SignalingEvent::Message(message) => self.negotiator.handle_signal(message).await,
            SignalingEvent::Disconnected { reason } => {
                self.negotiator.handle_signaling_closed(&reason).await
            }
        };
        report(result);
    }

    async fn on_peer_event(&mut self, event: PeerEvent<P::Remote>) {
        let result = match event {
            PeerEvent::LocalCandidate(candidate) => {
                Ok(self.negotiator.handle_local_candidate(candidate))
            }
            PeerEvent::RemoteStream(remote) => Ok(self.negotiator.handle_remote_stream(remote)),
            PeerEvent::ConnectionState(state) => {
                self.negotiator.handle_connection_state(state).await
            }
        };
        report(result);
    }
}

// The negotiator logs at the point of decision; this only records errors
// reaching the driver.
fn report(result: Result<Disposition>) {
    match result {
        Err(e) if e.is_fatal() => warn!("call event ended the session: {}", e),
        Err(e) => debug!("call event dropped: {}", e),
        Ok(_) => {}
    }
}
