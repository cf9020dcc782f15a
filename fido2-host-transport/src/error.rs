//! Transport layer error types

use thiserror::Error;

/// Transport layer result type
pub type Result<T> = std::result::Result<T, Error>;

/// Transport layer errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("invalid packet format")]
    InvalidPacket,

    #[error("invalid channel id")]
    InvalidChannel,

    #[error("unknown CTAPHID command 0x{0:02x}")]
    InvalidCommand(u8),

    /// Continuation out of order, or a new message started mid-reassembly
    #[error("invalid sequence number")]
    InvalidSequence,

    #[error("message too large ({size} > {max} bytes)")]
    MessageTooLarge { size: usize, max: usize },

    /// No packet within the transaction timeout
    #[error("timeout waiting for device")]
    Timeout,

    /// CTAPHID_ERROR with ERR_CHANNEL_BUSY
    #[error("channel busy")]
    ChannelBusy,

    /// Any other CTAPHID_ERROR code
    #[error("device reported CTAPHID error 0x{0:02x}")]
    Device(u8),

    /// INIT reply that does not fit the request
    #[error("invalid INIT response: {0}")]
    InvalidInitResponse(&'static str),

    /// Reply carried a different command than the request
    #[error("unexpected response command 0x{0:02x}")]
    UnexpectedResponse(u8),

    /// User presence was requested and not given in time
    #[error("timed out waiting for user action")]
    UserActionTimeout,

    #[error("operation cancelled")]
    Cancelled,

    #[error("device disconnected")]
    Disconnected,

    #[error("device not found")]
    DeviceNotFound,

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}
