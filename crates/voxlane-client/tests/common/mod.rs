//! In-process stand-ins for media capture, the peer connection and the relay.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{watch, Notify};
use voxlane_client::{AudioTrack, MediaCapture, Negotiator, PeerConnection, SignalSink};
use voxlane_common::{Error, IceCandidate, Result, SessionDescription, SignalingMessage};

pub const OFFER_SDP: &str = "v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111\r\na=mid:0\r\na=sendrecv\r\n";

pub const ANSWER_SDP: &str = "v=0\r\no=- 3 4 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111\r\na=mid:0\r\na=sendrecv\r\n";

pub fn answer() -> SessionDescription {
    SessionDescription::answer(ANSWER_SDP)
}

pub fn candidate(n: u32) -> IceCandidate {
    IceCandidate {
        candidate: format!("candidate:{n} 1 udp 2130706431 10.0.0.{n} 5000{n} typ host"),
        sdp_mid: Some("0".to_string()),
        sdp_m_line_index: Some(0),
        username_fragment: None,
    }
}

// ---- media ----

pub struct FakeTrack {
    id: String,
    stopped: Arc<AtomicBool>,
}

impl AudioTrack for FakeTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaMode {
    Grant(usize),
    Deny,
    /// Never resolves.
    Hang,
}

#[derive(Clone)]
pub struct FakeMedia {
    mode: MediaMode,
    issued: Arc<Mutex<Vec<Arc<AtomicBool>>>>,
}

impl FakeMedia {
    pub fn new(mode: MediaMode) -> Self {
        Self {
            mode,
            issued: Arc::default(),
        }
    }

    pub fn issued(&self) -> usize {
        self.issued.lock().unwrap().len()
    }

    pub fn all_stopped(&self) -> bool {
        self.issued
            .lock()
            .unwrap()
            .iter()
            .all(|stopped| stopped.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl MediaCapture for FakeMedia {
    type Track = FakeTrack;

    async fn acquire_audio(&self) -> Result<Vec<FakeTrack>> {
        match self.mode {
            MediaMode::Grant(count) => {
                let mut issued = self.issued.lock().unwrap();
                Ok((0..count)
                    .map(|i| {
                        let stopped = Arc::new(AtomicBool::new(false));
                        issued.push(Arc::clone(&stopped));
                        FakeTrack {
                            id: format!("mic-{i}"),
                            stopped,
                        }
                    })
                    .collect())
            }
            MediaMode::Deny => Err(Error::media_access("permission denied")),
            MediaMode::Hang => std::future::pending().await,
        }
    }
}

// ---- peer connection ----

#[derive(Default)]
pub struct PeerLog {
    pub tracks: Vec<String>,
    pub offers_created: usize,
    pub local_description: Option<SessionDescription>,
    pub remote_descriptions: Vec<SessionDescription>,
    pub candidates: Vec<IceCandidate>,
}

#[derive(Clone, Default)]
pub struct FakePeer {
    pub log: Arc<Mutex<PeerLog>>,
    closes: Arc<AtomicUsize>,
    fail_offer: Arc<AtomicBool>,
    fail_remote: Arc<AtomicBool>,
    /// When set, `set_remote_description` waits for a notification.
    remote_gate: Option<Arc<Notify>>,
}

impl FakePeer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_offer() -> Self {
        let peer = Self::default();
        peer.fail_offer.store(true, Ordering::SeqCst);
        peer
    }

    pub fn failing_remote() -> Self {
        let peer = Self::default();
        peer.fail_remote.store(true, Ordering::SeqCst);
        peer
    }

    pub fn gated_remote(gate: Arc<Notify>) -> Self {
        Self {
            remote_gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn applied_candidates(&self) -> Vec<String> {
        self.log
            .lock()
            .unwrap()
            .candidates
            .iter()
            .map(|c| c.candidate.clone())
            .collect()
    }

    pub fn remote_description_count(&self) -> usize {
        self.log.lock().unwrap().remote_descriptions.len()
    }
}

#[async_trait]
impl PeerConnection for FakePeer {
    type Track = FakeTrack;
    type Remote = String;

    async fn add_track(&self, track: &FakeTrack) -> Result<()> {
        self.log.lock().unwrap().tracks.push(track.id().to_string());
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        if self.fail_offer.load(Ordering::SeqCst) {
            return Err(Error::negotiation("no codecs"));
        }
        self.log.lock().unwrap().offers_created += 1;
        Ok(SessionDescription::offer(OFFER_SDP))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.log.lock().unwrap().local_description = Some(desc);
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        if let Some(gate) = &self.remote_gate {
            gate.notified().await;
        }
        if self.fail_remote.load(Ordering::SeqCst) {
            return Err(Error::negotiation("answer does not match offer"));
        }
        self.log.lock().unwrap().remote_descriptions.push(desc);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        if candidate.candidate.contains("refuse") {
            return Err(Error::negotiation("unparseable candidate"));
        }
        self.log.lock().unwrap().candidates.push(candidate);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ---- relay ----

#[derive(Clone, Default)]
pub struct FakeSignal {
    sent: Arc<Mutex<Vec<SignalingMessage>>>,
    closed: Arc<AtomicBool>,
}

impl FakeSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn disconnected() -> Self {
        let signal = Self::default();
        signal.closed.store(true, Ordering::SeqCst);
        signal
    }

    pub fn sent(&self) -> Vec<SignalingMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn offers(&self) -> usize {
        self.sent()
            .iter()
            .filter(|m| matches!(m, SignalingMessage::Offer(_)))
            .count()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl SignalSink for FakeSignal {
    fn send(&self, message: SignalingMessage) -> Result<()> {
        if self.is_closed() {
            return Err(Error::NotConnected);
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

// ---- harness ----

pub struct Harness {
    pub negotiator: Negotiator<FakePeer, FakeMedia, FakeSignal>,
    pub peer: FakePeer,
    pub media: FakeMedia,
    pub signal: FakeSignal,
    pub cancel: watch::Sender<bool>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(FakePeer::new(), FakeMedia::new(MediaMode::Grant(1)), FakeSignal::new())
    }

    pub fn with(peer: FakePeer, media: FakeMedia, signal: FakeSignal) -> Self {
        let (cancel, cancel_rx) = watch::channel(false);
        let negotiator = Negotiator::new(peer.clone(), media.clone(), signal.clone(), cancel_rx);
        Self {
            negotiator,
            peer,
            media,
            signal,
            cancel,
        }
    }

    /// A harness whose call has already reached `OfferSent`.
    pub async fn offer_sent() -> Self {
        let mut harness = Self::new();
        harness.negotiator.start_call().await.unwrap();
        harness
    }

    /// A harness whose call has already reached `Connected`.
    pub async fn connected() -> Self {
        let mut harness = Self::offer_sent().await;
        harness.negotiator.apply_answer(answer()).await.unwrap();
        harness
    }
}
