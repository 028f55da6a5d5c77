#![forbid(unsafe_code)]

pub mod audio;

pub use audio::{
    opus_frame_duration, AudioSource, AudioSourceKind, EncodedAudio, MediaError, OPUS_SAMPLE_RATE,
};
