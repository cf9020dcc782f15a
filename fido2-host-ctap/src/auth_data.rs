//! Authenticator data parsing
//!
//! ```text
//! rpIdHash (32) | flags (1) | signCount (4, BE)
//!   [ aaguid (16) | credIdLen (2, BE) | credId | COSE_Key ]   if AT
//!   [ extensions (CBOR map) ]                                  if ED
//! ```

use crate::cbor::{self, Value};
use crate::cose::CosePublicKey;
use crate::error::{CodecError, Result};

/// Flag bits
pub mod flags {
    pub const UP: u8 = 0x01;
    pub const UV: u8 = 0x04;
    pub const BE: u8 = 0x08;
    pub const BS: u8 = 0x10;
    pub const AT: u8 = 0x40;
    pub const ED: u8 = 0x80;
}

const FIXED_LEN: usize = 32 + 1 + 4;

#[derive(Debug, Clone, PartialEq)]
pub struct AttestedCredentialData {
    pub aaguid: [u8; 16],
    pub credential_id: Vec<u8>,
    /// COSE_Key exactly as the authenticator encoded it
    pub public_key_cbor: Vec<u8>,
    pub public_key: CosePublicKey,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuthenticatorData {
    pub rp_id_hash: [u8; 32],
    pub flags: u8,
    pub sign_count: u32,
    pub attested_credential: Option<AttestedCredentialData>,
    pub extensions: Option<Value>,
}

fn take<'a>(data: &'a [u8], pos: &mut usize, len: usize) -> Result<&'a [u8]> {
    let end = pos.checked_add(len).ok_or(CodecError::Truncated)?;
    let slice = data.get(*pos..end).ok_or(CodecError::Truncated)?;
    *pos = end;
    Ok(slice)
}

impl AuthenticatorData {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < FIXED_LEN {
            return Err(CodecError::Truncated);
        }
        let mut pos = 0;

        let mut rp_id_hash = [0u8; 32];
        rp_id_hash.copy_from_slice(take(data, &mut pos, 32)?);
        let flags = take(data, &mut pos, 1)?[0];
        let mut count = [0u8; 4];
        count.copy_from_slice(take(data, &mut pos, 4)?);
        let sign_count = u32::from_be_bytes(count);

        let attested_credential = if flags & flags::AT != 0 {
            let mut aaguid = [0u8; 16];
            aaguid.copy_from_slice(take(data, &mut pos, 16)?);
            let len = take(data, &mut pos, 2)?;
            let cred_len = u16::from_be_bytes([len[0], len[1]]) as usize;
            let credential_id = take(data, &mut pos, cred_len)?.to_vec();

            let key_len = cbor::item_len(&data[pos..])?;
            let public_key_cbor = take(data, &mut pos, key_len)?.to_vec();
            let public_key = CosePublicKey::from_cbor(&public_key_cbor)?;

            Some(AttestedCredentialData {
                aaguid,
                credential_id,
                public_key_cbor,
                public_key,
            })
        } else {
            None
        };

        let extensions = if flags & flags::ED != 0 {
            let len = cbor::item_len(&data[pos..])?;
            let value = cbor::decode_value(take(data, &mut pos, len)?)?;
            if !matches!(value, Value::Map(_)) {
                return Err(CodecError::UnexpectedType("authData extensions"));
            }
            Some(value)
        } else {
            None
        };

        if pos != data.len() {
            return Err(CodecError::Malformed(format!(
                "{} trailing bytes in authenticator data",
                data.len() - pos
            )));
        }

        Ok(Self {
            rp_id_hash,
            flags,
            sign_count,
            attested_credential,
            extensions,
        })
    }

    pub fn user_present(&self) -> bool {
        self.flags & flags::UP != 0
    }

    pub fn user_verified(&self) -> bool {
        self.flags & flags::UV != 0
    }

    /// Output of a named extension
    pub fn extension(&self, name: &str) -> Option<&Value> {
        let ext = self.extensions.as_ref()?;
        cbor::text_map_entries(ext, "extensions")
            .ok()?
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v)
    }
}
