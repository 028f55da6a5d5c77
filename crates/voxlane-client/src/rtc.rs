//! webrtc-rs implementation of the call capabilities.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use voxlane_common::{Error, IceCandidate, Result, SdpType, SessionDescription};
use voxlane_media::{AudioSource, AudioSourceKind, OPUS_SAMPLE_RATE};

use crate::peer::{AudioTrack, MediaCapture, PeerConnection, PeerConnectionState, PeerEvent};

const STREAM_ID: &str = "voxlane";

/// Remote audio published for playback.
#[derive(Clone)]
pub struct RemoteAudio {
    pub stream_id: String,
    pub track_id: String,
    pub track: Arc<TrackRemote>,
}

impl fmt::Debug for RemoteAudio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteAudio")
            .field("stream_id", &self.stream_id)
            .field("track_id", &self.track_id)
            .finish()
    }
}

/// Local Opus track fed by an [`AudioSource`].
pub struct RtcAudioTrack {
    id: String,
    track: Arc<TrackLocalStaticSample>,
    source: AudioSource,
    pump: JoinHandle<()>,
}

impl AudioTrack for RtcAudioTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn stop(&self) {
        self.source.stop();
        self.pump.abort();
    }
}

/// Audio capture backed by `voxlane-media`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RtcAudioCapture {
    kind: AudioSourceKind,
}

impl RtcAudioCapture {
    pub fn new(kind: AudioSourceKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl MediaCapture for RtcAudioCapture {
    type Track = RtcAudioTrack;

    async fn acquire_audio(&self) -> Result<Vec<RtcAudioTrack>> {
        let (source, mut frames) = AudioSource::start(self.kind).map_err(Error::media_access)?;

        let id = format!("audio-{}", Uuid::new_v4());
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_string(),
                clock_rate: OPUS_SAMPLE_RATE,
                channels: 2,
                ..Default::default()
            },
            id.clone(),
            STREAM_ID.to_string(),
        ));

        let writer = Arc::clone(&track);
        let pump = tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                let sample = Sample {
                    data: Bytes::from(frame.data),
                    duration: frame.duration,
                    ..Default::default()
                };
                if let Err(e) = writer.write_sample(&sample).await {
                    debug!("audio sample write failed: {}", e);
                }
            }
        });

        info!("local audio track {} capturing from {}", id, self.kind);
        Ok(vec![RtcAudioTrack {
            id,
            track,
            source,
            pump,
        }])
    }
}

/// A webrtc-rs peer connection configured for a single audio call.
pub struct RtcPeer {
    pc: Arc<RTCPeerConnection>,
}

impl RtcPeer {
    /// Build the connection and wire its callbacks into a [`PeerEvent`] stream.
    pub async fn new(
        ice_servers: &[String],
    ) -> Result<(Self, mpsc::UnboundedReceiver<PeerEvent<RemoteAudio>>)> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::negotiation(format!("register codecs: {e}")))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| Error::negotiation(format!("register interceptors: {e}")))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let mut config = RTCConfiguration::default();
        if !ice_servers.is_empty() {
            config.ice_servers = vec![RTCIceServer {
                urls: ice_servers.to_vec(),
                ..Default::default()
            }];
        }

        let pc = Arc::new(
            api.new_peer_connection(config)
                .await
                .map_err(|e| Error::negotiation(format!("create peer connection: {e}")))?,
        );

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        wire_events(&pc, events_tx);
        Ok((Self { pc }, events_rx))
    }
}

fn wire_events(pc: &RTCPeerConnection, events: mpsc::UnboundedSender<PeerEvent<RemoteAudio>>) {
    let tx = events.clone();
    pc.on_ice_candidate(Box::new(move |c: Option<RTCIceCandidate>| {
        let tx = tx.clone();
        Box::pin(async move {
            // `None` marks the end of gathering.
            let Some(candidate) = c else {
                debug!("local ICE gathering complete");
                return;
            };
            match candidate.to_json() {
                Ok(init) => {
                    let _ = tx.send(PeerEvent::LocalCandidate(from_rtc_candidate(init)));
                }
                Err(e) => warn!("unserializable local candidate: {}", e),
            }
        })
    }));

    let tx = events.clone();
    pc.on_track(Box::new(move |track, _receiver, _transceiver| {
        let tx = tx.clone();
        Box::pin(async move {
            info!(
                "remote track {} ({}) on stream {}",
                track.id(),
                track.kind(),
                track.stream_id()
            );
            let remote = RemoteAudio {
                stream_id: track.stream_id(),
                track_id: track.id(),
                track,
            };
            let _ = tx.send(PeerEvent::RemoteStream(remote));
        })
    }));

    let tx = events;
    pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
        let tx = tx.clone();
        Box::pin(async move {
            info!("peer connection state changed: {}", s);
            let _ = tx.send(PeerEvent::ConnectionState(from_rtc_state(s)));
        })
    }));
}

#[async_trait]
impl PeerConnection for RtcPeer {
    type Track = RtcAudioTrack;
    type Remote = RemoteAudio;

    async fn add_track(&self, track: &RtcAudioTrack) -> Result<()> {
        let sender = self
            .pc
            .add_track(Arc::clone(&track.track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| Error::negotiation(format!("add track: {e}")))?;

        // Drain RTCP so the interceptors keep running.
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| Error::negotiation(format!("create offer: {e}")))?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.pc
            .set_local_description(to_rtc_description(desc)?)
            .await
            .map_err(|e| Error::negotiation(format!("set local description: {e}")))
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        self.pc
            .set_remote_description(to_rtc_description(desc)?)
            .await
            .map_err(|e| Error::negotiation(format!("set remote description: {e}")))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.pc
            .add_ice_candidate(to_rtc_candidate(candidate))
            .await
            .map_err(|e| Error::negotiation(format!("add ICE candidate: {e}")))
    }

    async fn close(&self) -> Result<()> {
        self.pc
            .close()
            .await
            .map_err(|e| Error::negotiation(format!("close: {e}")))
    }
}

fn to_rtc_description(desc: SessionDescription) -> Result<RTCSessionDescription> {
    let parsed = match desc.kind {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp),
        SdpType::Pranswer => RTCSessionDescription::pranswer(desc.sdp),
        SdpType::Rollback => {
            return Err(Error::negotiation("rollback descriptions are not supported"))
        }
    };
    parsed.map_err(|e| Error::negotiation(format!("invalid SDP: {e}")))
}

fn to_rtc_candidate(candidate: IceCandidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate,
        sdp_mid: candidate.sdp_mid,
        sdp_mline_index: candidate.sdp_m_line_index,
        username_fragment: candidate.username_fragment,
    }
}

fn from_rtc_candidate(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_m_line_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

fn from_rtc_state(state: RTCPeerConnectionState) -> PeerConnectionState {
    match state {
        RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => {
            PeerConnectionState::New
        }
        RTCPeerConnectionState::Connecting => PeerConnectionState::Connecting,
        RTCPeerConnectionState::Connected => PeerConnectionState::Connected,
        RTCPeerConnectionState::Disconnected => PeerConnectionState::Disconnected,
        RTCPeerConnectionState::Failed => PeerConnectionState::Failed,
        RTCPeerConnectionState::Closed => PeerConnectionState::Closed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_conversion_keeps_fields() {
        let candidate = IceCandidate {
            candidate: "candidate:1 1 udp 2130706431 10.0.0.2 50000 typ host".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_m_line_index: Some(0),
            username_fragment: Some("ufrag".to_string()),
        };
        let back = from_rtc_candidate(to_rtc_candidate(candidate.clone()));
        assert_eq!(back, candidate);
    }

    #[test]
    fn test_state_mapping() {
        assert_eq!(
            from_rtc_state(RTCPeerConnectionState::Unspecified),
            PeerConnectionState::New
        );
        assert_eq!(
            from_rtc_state(RTCPeerConnectionState::Disconnected),
            PeerConnectionState::Disconnected
        );
        assert_eq!(
            from_rtc_state(RTCPeerConnectionState::Failed),
            PeerConnectionState::Failed
        );
    }

    #[test]
    fn test_rollback_is_rejected() {
        let desc = SessionDescription {
            kind: SdpType::Rollback,
            sdp: String::new(),
        };
        assert!(matches!(
            to_rtc_description(desc),
            Err(Error::Negotiation(_))
        ));
    }

    #[tokio::test]
    async fn test_offer_contains_audio_section() {
        let (peer, _events) = RtcPeer::new(&[]).await.expect("peer");
        let capture = RtcAudioCapture::new(AudioSourceKind::Silence);
        let tracks = capture.acquire_audio().await.expect("tracks");
        peer.add_track(&tracks[0]).await.expect("add track");

        let offer = peer.create_offer().await.expect("offer");
        assert_eq!(offer.kind, SdpType::Offer);
        assert!(offer.sdp.contains("m=audio"));
        assert_eq!(offer.media_mids().len(), 1);

        peer.set_local_description(offer).await.expect("set local");
        tracks[0].stop();
        peer.close().await.expect("close");
    }
}
