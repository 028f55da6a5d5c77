use anyhow::{anyhow, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BuildStreamError, SampleFormat, SampleRate, Stream, StreamConfig};
use opus::{Application, Channels, Encoder as OpusEncoder};
use std::sync::mpsc as std_mpsc;
use std::thread;
use tokio::sync::mpsc;

use super::{
    opus_frame_duration, EncodedAudio, MediaError, OPUS_BITRATE_BPS, OPUS_FRAME_MS,
    OPUS_MAX_PACKET_BYTES, OPUS_SAMPLE_RATE,
};

/// Owns the cpal stream on a dedicated thread; cpal streams are not `Send`
/// on every backend.
pub(super) struct CaptureThread {
    stop_tx: std_mpsc::Sender<()>,
    handle: Option<thread::JoinHandle<()>>,
}

impl CaptureThread {
    pub(super) fn spawn(tx: mpsc::Sender<EncodedAudio>) -> Result<Self, MediaError> {
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), MediaError>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name("voxlane-mic".to_string())
            .spawn(move || {
                let stream = match open_input(tx) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                // Blocks until stop() or the owner is dropped.
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| MediaError::Refused(format!("capture thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                stop_tx,
                handle: Some(handle),
            }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => Err(MediaError::Refused(
                "capture thread exited during startup".to_string(),
            )),
        }
    }

    pub(super) fn stop(mut self) {
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn open_input(tx: mpsc::Sender<EncodedAudio>) -> Result<Stream, MediaError> {
    let host = cpal::default_host();
    let device = host.default_input_device().ok_or(MediaError::NoDevice)?;

    let (config, sample_format) =
        select_input_config(&device).map_err(|e| MediaError::Unsupported(e.to_string()))?;
    let channels = match config.channels {
        1 => Channels::Mono,
        _ => Channels::Stereo,
    };
    let encoder = FrameEncoder::new(channels, config.channels as usize, tx)
        .map_err(|e| MediaError::Unsupported(e.to_string()))?;

    let err_fn = |err| {
        tracing::error!("cpal input stream error: {}", err);
    };

    let stream = match sample_format {
        SampleFormat::F32 => {
            let mut encoder = encoder;
            device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    encoder.push(data.iter().map(|s| f32_to_i16(*s)))
                },
                err_fn,
                None,
            )
        }
        SampleFormat::I16 => {
            let mut encoder = encoder;
            device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    encoder.push(data.iter().copied())
                },
                err_fn,
                None,
            )
        }
        SampleFormat::U16 => {
            let mut encoder = encoder;
            device.build_input_stream(
                &config,
                move |data: &[u16], _: &cpal::InputCallbackInfo| {
                    encoder.push(data.iter().map(|s| (*s as i32 - 32_768) as i16))
                },
                err_fn,
                None,
            )
        }
        other => {
            return Err(MediaError::Unsupported(format!(
                "sample format {other:?}"
            )))
        }
    }
    .map_err(|e| match e {
        BuildStreamError::DeviceNotAvailable => MediaError::NoDevice,
        other => MediaError::Refused(other.to_string()),
    })?;

    stream
        .play()
        .map_err(|e| MediaError::Refused(e.to_string()))?;
    Ok(stream)
}

fn select_input_config(device: &cpal::Device) -> Result<(StreamConfig, SampleFormat)> {
    let configs = device
        .supported_input_configs()
        .map_err(|e| anyhow!("audio input configs error: {}", e))?;

    for cfg in configs {
        if cfg.channels() == 0 || cfg.channels() > 2 {
            continue;
        }
        let min = cfg.min_sample_rate().0;
        let max = cfg.max_sample_rate().0;
        if min <= OPUS_SAMPLE_RATE && max >= OPUS_SAMPLE_RATE {
            let config = cfg.with_sample_rate(SampleRate(OPUS_SAMPLE_RATE)).config();
            return Ok((config, cfg.sample_format()));
        }
    }

    Err(anyhow!(
        "input device offers no mono/stereo config at {} Hz",
        OPUS_SAMPLE_RATE
    ))
}

struct FrameEncoder {
    encoder: OpusEncoder,
    channels: usize,
    pcm: Vec<i16>,
    out: Vec<u8>,
    tx: mpsc::Sender<EncodedAudio>,
}

impl FrameEncoder {
    fn new(channels: Channels, count: usize, tx: mpsc::Sender<EncodedAudio>) -> Result<Self> {
        let mut encoder = OpusEncoder::new(OPUS_SAMPLE_RATE, channels, Application::Voip)
            .map_err(|e| anyhow!("Opus encoder init failed: {}", e))?;
        encoder
            .set_bitrate(opus::Bitrate::Bits(OPUS_BITRATE_BPS))
            .map_err(|e| anyhow!("Opus bitrate set failed: {}", e))?;
        encoder.set_inband_fec(true).ok();
        Ok(Self {
            encoder,
            channels: count,
            pcm: Vec::with_capacity(frame_samples(count)),
            out: vec![0u8; OPUS_MAX_PACKET_BYTES],
            tx,
        })
    }

    fn push(&mut self, samples: impl Iterator<Item = i16>) {
        let frame_len = frame_samples(self.channels);
        for sample in samples {
            self.pcm.push(sample);
            if self.pcm.len() == frame_len {
                self.flush();
            }
        }
    }

    fn flush(&mut self) {
        match self.encoder.encode(&self.pcm, &mut self.out) {
            Ok(len) => {
                let frame = EncodedAudio {
                    data: self.out[..len].to_vec(),
                    duration: opus_frame_duration(),
                };
                // The realtime callback never blocks; a full queue drops the frame.
                if self.tx.try_send(frame).is_err() {
                    tracing::trace!("audio frame dropped");
                }
            }
            Err(err) => tracing::warn!("Opus encode error: {}", err),
        }
        self.pcm.clear();
    }
}

fn frame_samples(channels: usize) -> usize {
    (OPUS_SAMPLE_RATE as usize / 1000) * OPUS_FRAME_MS as usize * channels
}

fn f32_to_i16(value: f32) -> i16 {
    (value.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}
