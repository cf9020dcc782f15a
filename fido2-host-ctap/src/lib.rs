//! CTAP2 codec for FIDO2 hosts
//!
//! Encodes authenticator requests as a command byte followed by a canonical
//! CBOR map and decodes the status-prefixed responses into typed values.
//! Decoding never panics; every structural problem surfaces as a
//! [`CodecError`].
//!
//! ```
//! use fido2_host_ctap::commands::{Command, get_info::GetInfo};
//!
//! assert_eq!(GetInfo.encode().unwrap(), vec![0x04]);
//! assert!(GetInfo::decode(&[0x01]).is_err());
//! ```
//!
//! Message layouts follow CTAP 2.2:
//! <https://fidoalliance.org/specs/fido-v2.2-rd-20230321/fido-client-to-authenticator-protocol-v2.2-rd-20230321.html>

pub mod auth_data;
pub mod cbor;
pub mod commands;
pub mod cose;
pub mod error;
pub mod extensions;
pub mod status;
pub mod types;

pub use auth_data::{AttestedCredentialData, AuthenticatorData};
pub use commands::{Command, CommandCode, ResponseError};
pub use cose::CosePublicKey;
pub use error::{CodecError, Result};
pub use status::StatusCode;
pub use types::{CoseAlgorithm, CredProtect, PublicKeyCredentialDescriptor, RelyingParty, User};
