#![forbid(unsafe_code)]

//! Calling side of a peer-to-peer audio call.
//!
//! [`signaling::SignalingChannel`] carries offers, answers and ICE
//! candidates over a WebSocket relay. [`negotiator::Negotiator`] drives the
//! offer/answer exchange, and [`call::spawn_call`] runs it on its own task
//! behind a [`call::CallHandle`].

pub mod call;
pub mod config;
pub mod negotiator;
pub mod peer;
pub mod rtc;
pub mod session;
pub mod signaling;

pub use call::{spawn_call, CallCommand, CallHandle};
pub use config::CallConfig;
pub use negotiator::{Disposition, Negotiator};
pub use peer::{AudioTrack, MediaCapture, PeerConnection, PeerConnectionState, PeerEvent};
pub use rtc::{RemoteAudio, RtcAudioCapture, RtcAudioTrack, RtcPeer};
pub use session::{CallState, CallStatus, NegotiationSession, PendingCandidateQueue};
pub use signaling::{SignalSink, SignalingChannel, SignalingEvent};
