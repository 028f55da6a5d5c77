//! Per-call negotiation data.
//!
//! A [`NegotiationSession`] lives for exactly one call attempt:
//! - Idle: created, nothing acquired
//! - Initiating: local media requested, offer being built
//! - OfferSent: local description set and transmitted
//! - Connected: remote answer applied
//! - Closed / Failed: torn down

use std::collections::VecDeque;
use std::fmt;

use uuid::Uuid;
use voxlane_common::{IceCandidate, SessionDescription};

/// Call state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallState {
    #[default]
    Idle,
    Initiating,
    OfferSent,
    Connected,
    Closed,
    Failed,
}

impl CallState {
    /// No further negotiation happens in a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Connected | Self::Closed | Self::Failed)
    }

    /// The call is over and its resources released.
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }

    /// ICE candidates are exchanged from `Initiating` until the call ends.
    pub fn accepts_candidates(self) -> bool {
        matches!(self, Self::Initiating | Self::OfferSent | Self::Connected)
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Observable snapshot of a call, published to the UI.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CallStatus {
    pub state: CallState,
    /// Set when `state` is `Failed`.
    pub failure: Option<String>,
}

/// Remote candidates that arrived before the remote description.
///
/// Drained exactly once, in arrival order, when the remote description is set.
#[derive(Debug, Default)]
pub struct PendingCandidateQueue {
    queue: VecDeque<IceCandidate>,
    flushed: bool,
}

impl PendingCandidateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, candidate: IceCandidate) {
        self.queue.push_back(candidate);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_flushed(&self) -> bool {
        self.flushed
    }

    /// Take every buffered candidate in arrival order. Later calls return nothing.
    pub fn drain(&mut self) -> Vec<IceCandidate> {
        if self.flushed {
            return Vec::new();
        }
        self.flushed = true;
        self.queue.drain(..).collect()
    }
}

/// One call attempt
#[derive(Debug)]
pub struct NegotiationSession {
    /// Unique session ID, used in logs
    pub id: Uuid,
    state: CallState,
    local_description: Option<SessionDescription>,
    remote_description: Option<SessionDescription>,
    local_candidates: Vec<IceCandidate>,
    remote_candidates: Vec<IceCandidate>,
    pending: PendingCandidateQueue,
    failure: Option<String>,
}

impl Default for NegotiationSession {
    fn default() -> Self {
        Self::new()
    }
}

impl NegotiationSession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: CallState::Idle,
            local_description: None,
            remote_description: None,
            local_candidates: Vec::new(),
            remote_candidates: Vec::new(),
            pending: PendingCandidateQueue::new(),
            failure: None,
        }
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn status(&self) -> CallStatus {
        CallStatus {
            state: self.state,
            failure: self.failure.clone(),
        }
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn local_description(&self) -> Option<&SessionDescription> {
        self.local_description.as_ref()
    }

    pub fn remote_description(&self) -> Option<&SessionDescription> {
        self.remote_description.as_ref()
    }

    pub fn local_candidates(&self) -> &[IceCandidate] {
        &self.local_candidates
    }

    pub fn remote_candidates(&self) -> &[IceCandidate] {
        &self.remote_candidates
    }

    pub fn pending(&self) -> &PendingCandidateQueue {
        &self.pending
    }

    pub(crate) fn transition(&mut self, next: CallState) {
        if self.state != next {
            tracing::info!(session = %self.id, "call state {} -> {}", self.state, next);
            self.state = next;
        }
    }

    pub(crate) fn fail(&mut self, reason: String) {
        self.failure = Some(reason);
        self.transition(CallState::Failed);
    }

    pub(crate) fn set_local_description(&mut self, desc: SessionDescription) {
        self.local_description = Some(desc);
    }

    /// Record the remote description and hand back the candidates that were
    /// waiting for it.
    pub(crate) fn set_remote_description(&mut self, desc: SessionDescription) -> Vec<IceCandidate> {
        self.remote_description = Some(desc);
        self.pending.drain()
    }

    pub(crate) fn buffer_remote_candidate(&mut self, candidate: IceCandidate) {
        self.pending.push(candidate);
    }

    pub(crate) fn record_remote_candidate(&mut self, candidate: IceCandidate) {
        self.remote_candidates.push(candidate);
    }

    pub(crate) fn record_local_candidate(&mut self, candidate: IceCandidate) {
        self.local_candidates.push(candidate);
    }
}
