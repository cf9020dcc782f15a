//! Error types for device sessions

use fido2_host_crypto::CryptoError;
use fido2_host_ctap::{CodecError, ResponseError, StatusCode};
use fido2_host_transport::Error as TransportError;

use thiserror::Error;

/// Everything a session operation can fail with
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Framing or device I/O failure
    #[error("transport error: {0}")]
    Transport(TransportError),

    /// The device sent bytes that do not decode
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Wrong PIN; `retries_left` is set when the device reported a count
    #[error("PIN invalid{}", retries_suffix(.retries_left))]
    PinInvalid { retries_left: Option<u8> },

    /// No PIN attempts left. The session stays unusable until reopened.
    #[error("PIN blocked")]
    PinBlocked,

    #[error("timed out waiting for user action")]
    UserActionTimeout,

    #[error("operation cancelled")]
    Cancelled,

    /// Another command is already running on this session
    #[error("session busy")]
    SessionBusy,

    #[error("failed to open device: {0}")]
    DeviceOpen(String),

    /// Non-success CTAP2 status, raw so vendor codes survive
    #[error("device returned {}", StatusCode::from_u8(*.0))]
    Command(u8),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Rejected before anything was sent
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl Error {
    /// Classify a CTAP2 status byte
    pub fn from_status(code: u8) -> Self {
        let status = StatusCode::from_u8(code);
        if status.is_user_timeout() {
            return Error::UserActionTimeout;
        }
        match status {
            StatusCode::KeepaliveCancel => Error::Cancelled,
            StatusCode::PinBlocked => Error::PinBlocked,
            _ => Error::Command(code),
        }
    }

    /// Status reported by the device, if this error came from one
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Command(code) => Some(StatusCode::from_u8(*code)),
            _ => None,
        }
    }

    /// Errors after which the session refuses further commands
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Error::PinBlocked | Error::Codec(CodecError::UnsupportedKeyType)
        )
    }

    pub(crate) fn is_busy(&self) -> bool {
        matches!(self, Error::Transport(TransportError::ChannelBusy))
    }

    pub(crate) fn is_capability_mismatch(&self) -> bool {
        self.status()
            .is_some_and(StatusCode::is_capability_mismatch)
    }
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::UserActionTimeout => Error::UserActionTimeout,
            TransportError::Cancelled => Error::Cancelled,
            other => Error::Transport(other),
        }
    }
}

impl From<ResponseError> for Error {
    fn from(err: ResponseError) -> Self {
        match err {
            ResponseError::Status(code) => Error::from_status(code),
            ResponseError::Codec(codec) => Error::Codec(codec),
        }
    }
}

fn retries_suffix(retries_left: &Option<u8>) -> String {
    retries_left
        .map(|n| format!(", {n} retries left"))
        .unwrap_or_default()
}

/// Result type alias for session operations
pub type Result<T> = std::result::Result<T, Error>;
