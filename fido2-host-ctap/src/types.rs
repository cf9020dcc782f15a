//! WebAuthn entities carried inside CTAP2 requests and responses
//!
//! Each entity is a text-keyed CBOR map on the wire. Encoding goes through
//! [`TextMapBuilder`] so member order is canonical regardless of field order.

use crate::cbor::{self, TextMapBuilder, Value};
use crate::error::{CodecError, Result};

/// Credential type string; the only one CTAP2 defines
pub const PUBLIC_KEY: &str = "public-key";

/// Relying party entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelyingParty {
    /// RP ID, e.g. "example.com"
    pub id: String,
    pub name: Option<String>,
}

impl RelyingParty {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }

    pub fn with_name(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: Some(name.into()),
        }
    }

    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        TextMapBuilder::new()
            .insert("id", self.id.as_str())?
            .insert_opt("name", self.name.as_deref())?
            .build()
    }
}

/// User account entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// Opaque user handle, at most 64 bytes
    pub id: Vec<u8>,
    pub name: Option<String>,
    pub display_name: Option<String>,
}

impl User {
    pub fn new(id: Vec<u8>) -> Self {
        Self {
            id,
            name: None,
            display_name: None,
        }
    }

    pub fn with_details(
        id: Vec<u8>,
        name: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            id,
            name: Some(name.into()),
            display_name: Some(display_name.into()),
        }
    }

    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        TextMapBuilder::new()
            .insert_bytes("id", &self.id)?
            .insert_opt("name", self.name.as_deref())?
            .insert_opt("displayName", self.display_name.as_deref())?
            .build()
    }

    /// Parse the user entity returned by GetAssertion
    pub fn from_value(value: &Value) -> Result<Self> {
        let mut user = User::new(Vec::new());
        let mut has_id = false;
        for (key, v) in cbor::text_map_entries(value, "user")? {
            match key {
                "id" => {
                    user.id = cbor::as_bytes(v, "user.id")?.to_vec();
                    has_id = true;
                }
                "name" => user.name = Some(cbor::as_text(v, "user.name")?.to_owned()),
                "displayName" => {
                    user.display_name = Some(cbor::as_text(v, "user.displayName")?.to_owned())
                }
                _ => {}
            }
        }
        if !has_id {
            return Err(CodecError::Malformed("user entity without id".into()));
        }
        Ok(user)
    }
}

/// Credential descriptor for allow and exclude lists
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKeyCredentialDescriptor {
    pub id: Vec<u8>,
    pub transports: Option<Vec<String>>,
}

impl PublicKeyCredentialDescriptor {
    pub fn new(id: Vec<u8>) -> Self {
        Self {
            id,
            transports: None,
        }
    }

    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        TextMapBuilder::new()
            .insert_bytes("id", &self.id)?
            .insert("type", PUBLIC_KEY)?
            .insert_opt("transports", self.transports.as_ref())?
            .build()
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let mut id = None;
        let mut transports = None;
        for (key, v) in cbor::text_map_entries(value, "credential")? {
            match key {
                "id" => id = Some(cbor::as_bytes(v, "credential.id")?.to_vec()),
                "type" => {
                    let ty = cbor::as_text(v, "credential.type")?;
                    if ty != PUBLIC_KEY {
                        return Err(CodecError::Malformed(format!(
                            "unknown credential type {ty:?}"
                        )));
                    }
                }
                "transports" => {
                    transports = Some(
                        cbor::as_array(v, "credential.transports")?
                            .iter()
                            .map(|t| cbor::as_text(t, "transport").map(str::to_owned))
                            .collect::<Result<Vec<_>>>()?,
                    )
                }
                _ => {}
            }
        }
        let id = id.ok_or_else(|| CodecError::Malformed("credential without id".into()))?;
        Ok(Self { id, transports })
    }
}

/// Encode a descriptor list as a CBOR array
pub fn descriptor_list_to_cbor(list: &[PublicKeyCredentialDescriptor]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    cbor::write_array_head(&mut out, list.len());
    for descriptor in list {
        out.extend_from_slice(&descriptor.to_cbor()?);
    }
    Ok(out)
}

/// COSE algorithm identifiers accepted in pubKeyCredParams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum CoseAlgorithm {
    ES256 = -7,
    EdDSA = -8,
    ES384 = -35,
    RS256 = -257,
}

impl CoseAlgorithm {
    pub fn to_i32(self) -> i32 {
        self as i32
    }

    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            -7 => Some(Self::ES256),
            -8 => Some(Self::EdDSA),
            -35 => Some(Self::ES384),
            -257 => Some(Self::RS256),
            _ => None,
        }
    }
}

/// Encode pubKeyCredParams, preserving caller order
pub fn credential_params_to_cbor(algorithms: &[CoseAlgorithm]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    cbor::write_array_head(&mut out, algorithms.len());
    for alg in algorithms {
        let entry = TextMapBuilder::new()
            .insert("alg", alg.to_i32())?
            .insert("type", PUBLIC_KEY)?
            .build()?;
        out.extend_from_slice(&entry);
    }
    Ok(out)
}

/// credProtect policy levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum CredProtect {
    UserVerificationOptional = 0x01,
    UserVerificationOptionalWithCredentialIdList = 0x02,
    UserVerificationRequired = 0x03,
}

impl CredProtect {
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::UserVerificationOptional),
            0x02 => Some(Self::UserVerificationOptionalWithCredentialIdList),
            0x03 => Some(Self::UserVerificationRequired),
            _ => None,
        }
    }
}
