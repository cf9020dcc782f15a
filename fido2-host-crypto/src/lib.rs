//! Cryptographic primitives for the host side of CTAP2
//!
//! - **ECDH**: ephemeral P-256 key agreement with the authenticator
//! - **PIN/UV auth protocols**: one (SHA-256 KDF, zero-IV AES-CBC, truncated
//!   HMAC) and two (HKDF, random-IV AES-CBC, full HMAC)
//! - **SecBytes**: mlocked, zeroizing storage for tokens
//!
//! <https://fidoalliance.org/specs/fido-v2.2-rd-20230321/fido-client-to-authenticator-protocol-v2.2-rd-20230321.html>

pub mod ecdh;
pub mod error;
pub mod pin_protocol;
pub mod sec_bytes;

pub use error::{CryptoError, Result};
pub use pin_protocol::{PinProtocol, SharedSecret};
pub use sec_bytes::SecBytes;

use sha2::{Digest, Sha256};

/// SHA-256 of `data`
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}
