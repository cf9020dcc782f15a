//! CTAP2 commands, host side
//!
//! A request is the command byte followed by an optional canonical CBOR map;
//! a response is a status byte followed by an optional CBOR map. Each command
//! type implements [`Command`] to describe both halves.
//!
//! <https://fidoalliance.org/specs/fido-v2.2-rd-20230321/fido-client-to-authenticator-protocol-v2.2-rd-20230321.html#authenticator-api>

pub mod client_pin;
pub mod get_assertion;
pub mod get_info;
pub mod get_next_assertion;
pub mod make_credential;

use crate::error::CodecError;
use crate::status::StatusCode;

use thiserror::Error;

/// CTAP command codes issued by this library
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandCode {
    MakeCredential = 0x01,
    GetAssertion = 0x02,
    GetInfo = 0x04,
    ClientPin = 0x06,
    GetNextAssertion = 0x08,
}

impl CommandCode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::MakeCredential),
            0x02 => Some(Self::GetAssertion),
            0x04 => Some(Self::GetInfo),
            0x06 => Some(Self::ClientPin),
            0x08 => Some(Self::GetNextAssertion),
            _ => None,
        }
    }
}

/// Failure turning a raw response into a typed one
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResponseError {
    /// Non-zero status byte, kept raw so vendor codes survive
    #[error("authenticator returned {}", StatusCode::from_u8(*.0))]
    Status(u8),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl ResponseError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status(code) => Some(StatusCode::from_u8(*code)),
            Self::Codec(_) => None,
        }
    }
}

/// A CTAP2 command with its typed response
pub trait Command {
    const CODE: CommandCode;

    type Response;

    /// CBOR parameter map, `None` for parameterless commands
    fn parameters(&self) -> Result<Option<Vec<u8>>, CodecError>;

    /// Decode the bytes following a success status
    fn decode_response(body: &[u8]) -> Result<Self::Response, CodecError>;

    /// Full request payload: command byte then parameters
    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let params = self.parameters()?;
        let mut out = Vec::with_capacity(1 + params.as_ref().map_or(0, Vec::len));
        out.push(Self::CODE as u8);
        if let Some(params) = params {
            out.extend_from_slice(&params);
        }
        Ok(out)
    }

    /// Split the status byte off a raw response and decode the rest
    fn decode(response: &[u8]) -> Result<Self::Response, ResponseError> {
        let (&status, body) = response.split_first().ok_or(CodecError::Truncated)?;
        if status != StatusCode::Success.to_u8() {
            return Err(ResponseError::Status(status));
        }
        Ok(Self::decode_response(body)?)
    }
}
