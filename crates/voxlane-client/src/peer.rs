//! Capabilities the negotiator drives: local audio capture and the peer
//! connection itself. The webrtc-rs implementation lives in [`crate::rtc`].

use async_trait::async_trait;
use std::fmt;
use voxlane_common::{IceCandidate, Result, SessionDescription};

/// Connectivity of the underlying peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl fmt::Display for PeerConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::New => "new",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Asynchronous notifications raised by a peer connection.
#[derive(Debug, Clone)]
pub enum PeerEvent<R> {
    /// A local ICE candidate was gathered.
    LocalCandidate(IceCandidate),
    /// The remote side started sending media.
    RemoteStream(R),
    ConnectionState(PeerConnectionState),
}

/// A captured local audio track.
pub trait AudioTrack: Send + Sync {
    fn id(&self) -> &str;
    /// Stop capturing. Must be idempotent.
    fn stop(&self);
}

/// Local audio capture.
#[async_trait]
pub trait MediaCapture: Send + Sync {
    type Track: AudioTrack + 'static;

    /// Acquire the local audio tracks. Fails with `Error::MediaAccess` when
    /// no device is present or access is refused.
    async fn acquire_audio(&self) -> Result<Vec<Self::Track>>;
}

/// The negotiating half of a peer connection.
///
/// Description and candidate failures are reported as `Error::Negotiation`.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    type Track: AudioTrack + 'static;
    /// Reference to a remote media stream, published for playback.
    type Remote: Clone + Send + Sync + 'static;

    async fn add_track(&self, track: &Self::Track) -> Result<()>;
    async fn create_offer(&self) -> Result<SessionDescription>;
    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;
    async fn close(&self) -> Result<()>;
}
