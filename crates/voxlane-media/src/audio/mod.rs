use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;

#[cfg(feature = "microphone")]
mod microphone;
mod silence;

pub const OPUS_SAMPLE_RATE: u32 = 48_000;
pub const OPUS_FRAME_MS: u32 = 20;
pub const OPUS_MAX_PACKET_BYTES: usize = 4_000;
pub const OPUS_BITRATE_BPS: i32 = 32_000;

/// Opus packet decoding to 20 ms of silence (TOC 0xf8, CELT FB 20 ms).
pub const OPUS_SILENCE_FRAME: [u8; 3] = [0xf8, 0xff, 0xfe];

/// Frames buffered between the capture thread and the track writer.
pub(crate) const FRAME_QUEUE_DEPTH: usize = 50;

pub fn opus_frame_duration() -> Duration {
    Duration::from_millis(OPUS_FRAME_MS as u64)
}

/// One encoded Opus packet ready to be written to a track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedAudio {
    pub data: Vec<u8>,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaError {
    #[error("no audio input device available")]
    NoDevice,
    #[error("audio input refused: {0}")]
    Refused(String),
    #[error("unsupported audio source: {0}")]
    Unsupported(String),
}

/// Where a local audio track gets its packets from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioSourceKind {
    /// Opus silence at the nominal frame rate.
    #[default]
    Silence,
    /// Default input device, Opus encoded.
    Microphone,
}

impl fmt::Display for AudioSourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Silence => f.write_str("silence"),
            Self::Microphone => f.write_str("microphone"),
        }
    }
}

impl FromStr for AudioSourceKind {
    type Err = MediaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "silence" => Ok(Self::Silence),
            "microphone" | "mic" => Ok(Self::Microphone),
            other => Err(MediaError::Unsupported(other.to_string())),
        }
    }
}

enum Running {
    Task(tokio::task::JoinHandle<()>),
    #[cfg(feature = "microphone")]
    Thread(microphone::CaptureThread),
}

/// A running audio source. Packets arrive on the receiver returned by
/// [`AudioSource::start`]; the receiver closes once the source is stopped.
pub struct AudioSource {
    kind: AudioSourceKind,
    running: std::sync::Mutex<Option<Running>>,
}

impl AudioSource {
    /// Start producing packets. Must be called from within a tokio runtime.
    pub fn start(kind: AudioSourceKind) -> Result<(Self, mpsc::Receiver<EncodedAudio>), MediaError> {
        let (tx, rx) = mpsc::channel(FRAME_QUEUE_DEPTH);
        let running = match kind {
            AudioSourceKind::Silence => Running::Task(silence::spawn(tx)),
            #[cfg(feature = "microphone")]
            AudioSourceKind::Microphone => Running::Thread(microphone::CaptureThread::spawn(tx)?),
            #[cfg(not(feature = "microphone"))]
            AudioSourceKind::Microphone => {
                return Err(MediaError::Unsupported(
                    "built without the `microphone` feature".to_string(),
                ))
            }
        };
        tracing::debug!("audio source started: {}", kind);
        Ok((
            Self {
                kind,
                running: std::sync::Mutex::new(Some(running)),
            },
            rx,
        ))
    }

    pub fn kind(&self) -> AudioSourceKind {
        self.kind
    }

    pub fn is_running(&self) -> bool {
        self.lock().is_some()
    }

    /// Stop producing packets. Safe to call more than once.
    pub fn stop(&self) {
        let Some(running) = self.lock().take() else {
            return;
        };
        match running {
            Running::Task(handle) => handle.abort(),
            #[cfg(feature = "microphone")]
            Running::Thread(thread) => thread.stop(),
        }
        tracing::debug!("audio source stopped: {}", self.kind);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Running>> {
        match self.running.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Drop for AudioSource {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_kind_parse() {
        assert_eq!("silence".parse(), Ok(AudioSourceKind::Silence));
        assert_eq!("Mic".parse(), Ok(AudioSourceKind::Microphone));
        assert!("speaker".parse::<AudioSourceKind>().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_source_emits_frames_until_stopped() {
        let (source, mut rx) = AudioSource::start(AudioSourceKind::Silence).unwrap();
        let first = rx.recv().await.expect("frame");
        assert_eq!(first.data, OPUS_SILENCE_FRAME.to_vec());
        assert_eq!(first.duration, opus_frame_duration());
        assert!(rx.recv().await.is_some());

        source.stop();
        source.stop();
        assert!(!source.is_running());
        while rx.recv().await.is_some() {}
    }

    #[cfg(not(feature = "microphone"))]
    #[tokio::test]
    async fn test_microphone_unavailable_without_feature() {
        let result = AudioSource::start(AudioSourceKind::Microphone);
        assert!(matches!(result, Err(MediaError::Unsupported(_))));
    }
}
