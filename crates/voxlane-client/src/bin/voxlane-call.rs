use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tracing::{info, warn};
use voxlane_client::config::{DEFAULT_ICE_SERVER, DEFAULT_SIGNALING_URL};
use voxlane_client::{spawn_call, CallConfig, CallState, RtcAudioCapture, RtcPeer, SignalingChannel};
use voxlane_common::helpers::split_list;
use voxlane_media::AudioSourceKind;

#[derive(Parser, Debug)]
#[command(name = "voxlane-call")]
#[command(about = "Place a peer-to-peer audio call through a signaling relay")]
struct Args {
    /// Signaling relay WebSocket URL
    #[arg(long, env = "VOXLANE_SIGNALING_URL", default_value = DEFAULT_SIGNALING_URL)]
    signaling_url: String,

    /// STUN/TURN server URL (repeatable, or a comma separated list)
    #[arg(long = "ice-server", env = "VOXLANE_ICE_SERVERS", default_value = DEFAULT_ICE_SERVER)]
    ice_servers: Vec<String>,

    /// Local audio: silence or microphone
    #[arg(long, env = "VOXLANE_AUDIO_SOURCE", default_value_t = AudioSourceKind::Silence)]
    audio_source: AudioSourceKind,

    /// Default log level when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn call_config(&self) -> CallConfig {
        CallConfig {
            signaling_url: self.signaling_url.clone(),
            ice_servers: self.ice_servers.iter().flat_map(|s| split_list(s)).collect(),
            audio_source: self.audio_source,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    voxlane_common::init_tracing_with_default(&args.log_level);

    let config = args.call_config();
    config.validate()?;

    let signaling = SignalingChannel::connect(&config.signaling_url)
        .await
        .context("connecting to signaling relay")?;
    let signals = signaling.event_stream()?;

    let (peer, peer_events) = RtcPeer::new(&config.ice_servers).await?;
    let media = RtcAudioCapture::new(config.audio_source);

    let (handle, driver) = spawn_call(peer, peer_events, media, signaling, signals);

    let mut status = handle.status();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = status.borrow_and_update().clone();
            match &current.failure {
                Some(reason) => warn!("call {}: {}", current.state, reason),
                None => info!("call {}", current.state),
            }
        }
    });

    let mut remote = handle.remote_stream();
    tokio::spawn(async move {
        while remote.changed().await.is_ok() {
            match remote.borrow_and_update().as_ref() {
                Some(audio) => info!(
                    "playing remote audio {} from stream {}",
                    audio.track_id, audio.stream_id
                ),
                None => info!("remote audio stopped"),
            }
        }
    });

    handle.start()?;

    let hang_up = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, hanging up");
            hang_up.hang_up();
        }
    });

    let final_status = driver.await.context("call task panicked")?;
    match final_status.state {
        CallState::Failed => Err(anyhow!(
            "call failed: {}",
            final_status.failure.as_deref().unwrap_or("unknown reason")
        )),
        state => {
            info!("call ended: {}", state);
            Ok(())
        }
    }
}
