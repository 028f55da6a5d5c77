//! Common error types for Voxlane.

use thiserror::Error;

/// Result type alias using Voxlane's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for call setup and signaling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// No microphone, or access to it was refused
    #[error("media access error: {0}")]
    MediaAccess(String),

    /// Relay unreachable or the transport broke
    #[error("transport error: {0}")]
    Transport(String),

    /// Signaling transport is not open
    #[error("signaling transport not connected")]
    NotConnected,

    /// Session description could not be generated or applied
    #[error("negotiation error: {0}")]
    Negotiation(String),

    /// Signaling payload could not be decoded
    #[error("malformed signaling message: {0}")]
    MalformedMessage(String),

    /// Message is not applicable in the current call state
    #[error("stale message ignored: {0}")]
    StaleMessageIgnored(String),

    /// A suspended step was interrupted by hang-up
    #[error("call cancelled")]
    Cancelled,

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create a media access error from any displayable type.
    pub fn media_access(msg: impl std::fmt::Display) -> Self {
        Self::MediaAccess(msg.to_string())
    }

    /// Create a transport error from any displayable type.
    pub fn transport(msg: impl std::fmt::Display) -> Self {
        Self::Transport(msg.to_string())
    }

    /// Create a negotiation error from any displayable type.
    pub fn negotiation(msg: impl std::fmt::Display) -> Self {
        Self::Negotiation(msg.to_string())
    }

    /// Create a malformed message error from any displayable type.
    pub fn malformed(msg: impl std::fmt::Display) -> Self {
        Self::MalformedMessage(msg.to_string())
    }

    /// Create a stale message error from any displayable type.
    pub fn stale(msg: impl std::fmt::Display) -> Self {
        Self::StaleMessageIgnored(msg.to_string())
    }

    /// Create a config error from any displayable type.
    pub fn config(msg: impl std::fmt::Display) -> Self {
        Self::Config(msg.to_string())
    }

    /// Whether this error ends the session.
    ///
    /// Malformed and stale messages are absorbed where they occur; everything
    /// else moves the session to `Failed` (or `Closed` for cancellation).
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::MalformedMessage(_) | Self::StaleMessageIgnored(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(Error::media_access("no input device").is_fatal());
        assert!(Error::transport("refused").is_fatal());
        assert!(Error::NotConnected.is_fatal());
        assert!(Error::negotiation("bad sdp").is_fatal());
        assert!(Error::Cancelled.is_fatal());
        assert!(!Error::malformed("eof").is_fatal());
        assert!(!Error::stale("answer in Idle").is_fatal());
    }

    #[test]
    fn test_display_includes_detail() {
        let err = Error::media_access("permission denied");
        assert_eq!(err.to_string(), "media access error: permission denied");
        assert_eq!(
            Error::NotConnected.to_string(),
            "signaling transport not connected"
        );
    }
}
