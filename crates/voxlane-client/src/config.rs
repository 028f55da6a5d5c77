use url::Url;
use voxlane_common::helpers::env_bool;
use voxlane_common::{Error, Result};
use voxlane_media::AudioSourceKind;

pub const DEFAULT_SIGNALING_URL: &str = "ws://localhost:8080/ws";
pub const DEFAULT_ICE_SERVER: &str = "stun:stun.l.google.com:19302";

const ENVIRONMENT_ENV: &str = "VOXLANE_ENVIRONMENT";
const ALLOW_INSECURE_ENV: &str = "VOXLANE_ALLOW_INSECURE_SIGNALING";

const ICE_SCHEMES: [&str; 4] = ["stun:", "stuns:", "turn:", "turns:"];

/// Everything needed to place a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallConfig {
    pub signaling_url: String,
    pub ice_servers: Vec<String>,
    pub audio_source: AudioSourceKind,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            signaling_url: DEFAULT_SIGNALING_URL.to_string(),
            ice_servers: vec![DEFAULT_ICE_SERVER.to_string()],
            audio_source: AudioSourceKind::default(),
        }
    }
}

impl CallConfig {
    /// Validate against the process environment.
    pub fn validate(&self) -> Result<()> {
        let production = std::env::var(ENVIRONMENT_ENV)
            .map(|v| v.eq_ignore_ascii_case("production"))
            .unwrap_or(false);
        let allow_insecure = env_bool(ALLOW_INSECURE_ENV, false);
        self.validate_with(production, allow_insecure)
    }

    pub fn validate_with(&self, production: bool, allow_insecure: bool) -> Result<()> {
        let url = Url::parse(&self.signaling_url).map_err(|e| {
            Error::config(format!("invalid signaling URL {}: {e}", self.signaling_url))
        })?;
        match url.scheme() {
            "wss" => {}
            "ws" if production && !allow_insecure => {
                return Err(Error::config(format!(
                    "refusing insecure ws:// signaling URL in production; use wss:// or set {ALLOW_INSECURE_ENV}=1"
                )));
            }
            "ws" => {}
            other => {
                return Err(Error::config(format!(
                    "signaling URL must be ws:// or wss://, got {other}://"
                )));
            }
        }

        if self.ice_servers.is_empty() {
            return Err(Error::config("at least one ICE server is required"));
        }
        for server in &self.ice_servers {
            if !ICE_SCHEMES.iter().any(|scheme| server.starts_with(scheme)) {
                return Err(Error::config(format!(
                    "ICE server {server} must use stun:, stuns:, turn: or turns:"
                )));
            }
        }
        Ok(())
    }
}
