//! The library's error type.

use thiserror::Error;

/// Broad classes of failure. Everything except `Cancelled` is terminal for the exchange instance that produced it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input caught before any network interaction (oversized payload, malformed secret or record).
    Configuration,
    /// The randomness source or the password stretcher failed.
    Randomness,
    /// The peer or the channel sent something that cannot be trusted.
    Protocol,
    /// The meeting place could not be reached or refused the request.
    Transport,
    /// Cooperative shutdown. Persisted state stays valid and can be resumed later.
    Cancelled,
}

#[derive(Error, Debug)]
pub enum PandaError {
    #[error("panda: shutdown requested")]
    ShutdownRequested,

    #[error("panda: key exchange too large for meeting place ({needed} bytes needed, {padding} available)")]
    TooLarge { needed: usize, padding: usize },

    #[error("panda: invalid shared secret: {0}")]
    InvalidSecret(String),

    #[error("panda: invalid serialised key exchange: {0}")]
    InvalidRecord(String),

    #[error("panda: randomness source failed: {0}")]
    Rng(#[from] rand_core::Error),

    #[error("panda: password derivation failed: {0}")]
    Derivation(String),

    #[error("panda: meeting point reply too small ({len} bytes, need at least {min})")]
    ReplyTooSmall { len: usize, min: usize },

    #[error("panda: peer's message cannot be authenticated")]
    Authentication,

    #[error("panda: peer's public value is not contributory")]
    NonContributory,

    #[error("panda: peer's message is invalid")]
    MalformedPayload,

    #[error("panda: peer's message is truncated")]
    Truncated,

    #[error("panda: rendezvous tag already used by two other messages")]
    TagInUse,

    #[error("panda: meeting place request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("panda: state serialisation failed: {0}")]
    Serialization(#[from] bincode::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PandaError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PandaError::ShutdownRequested => ErrorKind::Cancelled,
            PandaError::TooLarge { .. }
            | PandaError::InvalidSecret(_)
            | PandaError::InvalidRecord(_)
            | PandaError::Serialization(_) => ErrorKind::Configuration,
            PandaError::Rng(_) | PandaError::Derivation(_) | PandaError::Io(_) => ErrorKind::Randomness,
            PandaError::ReplyTooSmall { .. }
            | PandaError::Authentication
            | PandaError::NonContributory
            | PandaError::MalformedPayload
            | PandaError::Truncated
            | PandaError::TagInUse => ErrorKind::Protocol,
            PandaError::Transport(_) => ErrorKind::Transport,
        }
    }

    /// is_shutdown is true for the cancellation error, which callers may treat as "resume later"
    pub fn is_shutdown(&self) -> bool {
        matches!(self, PandaError::ShutdownRequested)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_is_its_own_kind() {
        assert!(PandaError::ShutdownRequested.is_shutdown());
        assert_eq!(PandaError::ShutdownRequested.kind(), ErrorKind::Cancelled);
        assert!(!PandaError::Authentication.is_shutdown());
    }

    #[test]
    fn taxonomy() {
        assert_eq!(PandaError::TooLarge { needed: 10, padding: 5 }.kind(), ErrorKind::Configuration);
        assert_eq!(PandaError::Authentication.kind(), ErrorKind::Protocol);
        assert_eq!(PandaError::Truncated.kind(), ErrorKind::Protocol);
        assert_eq!(PandaError::Derivation("oom".into()).kind(), ErrorKind::Randomness);
    }
}
