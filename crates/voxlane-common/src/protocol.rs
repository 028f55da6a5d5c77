//! Signaling wire protocol.
//!
//! Every frame on the relay is a JSON object discriminated by `type`:
//!
//! ```text
//! { "type": "offer"|"answer", "payload": { "type": "offer"|"answer", "sdp": "..." } }
//! { "type": "ice-candidate", "payload": { "candidate": "...", "sdpMid": "0", "sdpMLineIndex": 0 } }
//! ```
//!
//! Unknown `type` values decode to `None` so newer peers can extend the protocol.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::error::{Error, Result};

/// Kind of a session description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

impl std::fmt::Display for SdpType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::Pranswer => "pranswer",
            Self::Rollback => "rollback",
        };
        f.write_str(name)
    }
}

/// An SDP offer or answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpType,
    pub sdp: String,
}

/// A trickled ICE candidate, in the browser's `RTCIceCandidateInit` shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_m_line_index: Option<u16>,
    #[serde(
        rename = "usernameFragment",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub username_fragment: Option<String>,
}

/// Message exchanged with the peer through the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum SignalingMessage {
    Offer(SessionDescription),
    Answer(SessionDescription),
    IceCandidate(IceCandidate),
}

/// Why a remote candidate cannot be used with a remote description.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CandidateMismatch {
    #[error("sdpMLineIndex {index} out of range ({sections} media sections)")]
    LineOutOfRange { index: u16, sections: usize },
    #[error("sdpMid {0:?} not present in remote description")]
    UnknownMid(String),
    #[error("candidate names neither sdpMid nor sdpMLineIndex")]
    Unbound,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Answer,
            sdp: sdp.into(),
        }
    }

    /// The `a=mid:` value of each `m=` section, in order.
    pub fn media_mids(&self) -> Vec<Option<String>> {
        let mut mids = Vec::new();
        for line in self.sdp.lines() {
            let line = line.trim_end_matches('\r');
            if line.starts_with("m=") {
                mids.push(None);
            } else if let Some(mid) = line.strip_prefix("a=mid:") {
                if let Some(slot) = mids.last_mut() {
                    *slot = Some(mid.trim().to_string());
                }
            }
        }
        mids
    }

    /// Check that `candidate` refers to a media section of this description.
    pub fn admits(&self, candidate: &IceCandidate) -> std::result::Result<(), CandidateMismatch> {
        let mids = self.media_mids();

        if let Some(mid) = candidate.sdp_mid.as_deref() {
            if mids.iter().flatten().any(|m| m == mid) {
                return Ok(());
            }
            // A mid that matches nothing is only acceptable if the index resolves.
            if candidate.sdp_m_line_index.is_none() {
                return Err(CandidateMismatch::UnknownMid(mid.to_string()));
            }
        }

        match candidate.sdp_m_line_index {
            Some(index) if (index as usize) < mids.len() => {
                match (candidate.sdp_mid.as_deref(), &mids[index as usize]) {
                    (Some(mid), Some(actual)) if mid != actual => {
                        Err(CandidateMismatch::UnknownMid(mid.to_string()))
                    }
                    _ => Ok(()),
                }
            }
            Some(index) => Err(CandidateMismatch::LineOutOfRange {
                index,
                sections: mids.len(),
            }),
            None => Err(CandidateMismatch::Unbound),
        }
    }
}

impl SignalingMessage {
    /// Wire discriminator of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Offer(_) => "offer",
            Self::Answer(_) => "answer",
            Self::IceCandidate(_) => "ice-candidate",
        }
    }

    /// Serialize to a JSON text frame.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(Error::malformed)
    }

    /// Decode a JSON text frame.
    ///
    /// Returns `Ok(None)` for well-formed frames with an unknown `type`.
    /// Bare session descriptions (`{"type":"answer","sdp":...}`) and bare
    /// candidate objects (`{"candidate":...}`) are accepted without the
    /// `payload` envelope.
    pub fn decode(text: &str) -> Result<Option<Self>> {
        let value: Value = serde_json::from_str(text).map_err(Error::malformed)?;
        let object = value
            .as_object()
            .ok_or_else(|| Error::malformed("expected a JSON object"))?;

        let kind = match object.get("type") {
            Some(Value::String(kind)) => kind.clone(),
            Some(_) => return Err(Error::malformed("`type` is not a string")),
            None if object.contains_key("candidate") => {
                let candidate: IceCandidate =
                    serde_json::from_value(value).map_err(Error::malformed)?;
                return Ok(Some(Self::IceCandidate(candidate)));
            }
            None => return Err(Error::malformed("missing `type`")),
        };
        let enveloped = object.contains_key("payload");

        let message = match (kind.as_str(), enveloped) {
            ("offer" | "answer" | "ice-candidate", true) => {
                serde_json::from_value::<Self>(value).map_err(Error::malformed)?
            }
            ("offer", false) => Self::Offer(bare_description(value)?),
            ("answer", false) => Self::Answer(bare_description(value)?),
            ("ice-candidate", false) => {
                return Err(Error::malformed("ice-candidate without payload"))
            }
            _ => return Ok(None),
        };

        message.validate()?;
        Ok(Some(message))
    }

    fn validate(&self) -> Result<()> {
        match self {
            Self::Offer(desc) if desc.kind != SdpType::Offer => Err(Error::malformed(format!(
                "offer carries a {} description",
                desc.kind
            ))),
            Self::Answer(desc) if desc.kind != SdpType::Answer => Err(Error::malformed(format!(
                "answer carries a {} description",
                desc.kind
            ))),
            _ => Ok(()),
        }
    }
}

fn bare_description(value: Value) -> Result<SessionDescription> {
    serde_json::from_value(value).map_err(Error::malformed)
}
