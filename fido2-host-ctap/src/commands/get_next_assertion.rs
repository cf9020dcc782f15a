//! authenticatorGetNextAssertion (0x08)
//!
//! Parameterless; valid only right after a getAssertion that reported more
//! than one credential.

use super::get_assertion::{GetAssertionResponse, decode_assertion};
use super::{Command, CommandCode};
use crate::error::Result;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GetNextAssertion;

impl Command for GetNextAssertion {
    const CODE: CommandCode = CommandCode::GetNextAssertion;
    type Response = GetAssertionResponse;

    fn parameters(&self) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    fn decode_response(body: &[u8]) -> Result<GetAssertionResponse> {
        decode_assertion(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::ResponseError;

    #[test]
    fn test_encoding() {
        assert_eq!(GetNextAssertion.encode().unwrap(), vec![0x08]);
    }

    #[test]
    fn test_not_allowed() {
        assert_eq!(
            GetNextAssertion::decode(&[0x30]).unwrap_err(),
            ResponseError::Status(0x30)
        );
    }
}
