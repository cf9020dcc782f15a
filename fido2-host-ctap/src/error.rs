//! Codec errors

use thiserror::Error;

/// Structural failure while encoding a request or decoding a response
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Not valid CBOR, or valid CBOR missing a required member
    #[error("malformed response: {0}")]
    Malformed(String),

    /// A member had the wrong CBOR type
    #[error("unexpected CBOR type for {0}")]
    UnexpectedType(&'static str),

    /// Input ended before the item did
    #[error("truncated input")]
    Truncated,

    /// COSE key with a kty/crv/alg combination this library does not handle
    #[error("unsupported COSE key type")]
    UnsupportedKeyType,
}

pub type Result<T> = core::result::Result<T, CodecError>;
