//! Extension inputs and outputs
//!
//! - **hmac-secret**: `true` at creation; at assertion a map of the
//!   platform key agreement key, encrypted salt(s), salt MAC and protocol.
//!   The authenticator answers with the encrypted HMAC output(s).
//! - **credProtect**: policy level at creation, echoed in authData.
//!
//! Spec: <https://fidoalliance.org/specs/fido-v2.2-rd-20230321/fido-client-to-authenticator-protocol-v2.2-rd-20230321.html#sctn-defined-extensions>

use crate::auth_data::AuthenticatorData;
use crate::cbor::{self, MapBuilder, TextMapBuilder, Value};
use crate::error::{CodecError, Result};
use crate::types::CredProtect;

use smallvec::SmallVec;

pub mod ext_ids {
    pub const CRED_PROTECT: &str = "credProtect";
    pub const HMAC_SECRET: &str = "hmac-secret";
}

/// Extensions requested on makeCredential
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MakeCredentialExtensions {
    pub hmac_secret: bool,
    pub cred_protect: Option<CredProtect>,
}

impl MakeCredentialExtensions {
    pub fn is_empty(&self) -> bool {
        !self.hmac_secret && self.cred_protect.is_none()
    }

    /// Identifiers of every requested extension
    pub fn requested(&self) -> SmallVec<[&'static str; 2]> {
        let mut ids = SmallVec::new();
        if self.hmac_secret {
            ids.push(ext_ids::HMAC_SECRET);
        }
        if self.cred_protect.is_some() {
            ids.push(ext_ids::CRED_PROTECT);
        }
        ids
    }

    pub fn to_cbor(&self) -> Result<Option<Vec<u8>>> {
        if self.is_empty() {
            return Ok(None);
        }
        let mut map = TextMapBuilder::new();
        if self.hmac_secret {
            map = map.insert(ext_ids::HMAC_SECRET, true)?;
        }
        if let Some(policy) = self.cred_protect {
            map = map.insert(ext_ids::CRED_PROTECT, policy.to_u8())?;
        }
        map.build().map(Some)
    }
}

/// hmac-secret getAssertion input, already encrypted and authenticated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HmacSecretInput {
    /// Platform COSE key agreement key (encoded)
    pub key_agreement: Vec<u8>,
    /// `encrypt(sharedSecret, salt1 [|| salt2])`
    pub salt_enc: Vec<u8>,
    /// `authenticate(sharedSecret, saltEnc)`
    pub salt_auth: Vec<u8>,
    pub pin_uv_auth_protocol: u8,
}

impl HmacSecretInput {
    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        let mut map = MapBuilder::new()
            .insert_raw(0x01, self.key_agreement.clone())
            .insert_bytes(0x02, &self.salt_enc)?
            .insert_bytes(0x03, &self.salt_auth)?;
        // Protocol one is the default and older devices reject the member
        if self.pin_uv_auth_protocol != 1 {
            map = map.insert(0x04, self.pin_uv_auth_protocol)?;
        }
        map.build()
    }
}

/// Extensions requested on getAssertion
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetAssertionExtensions {
    pub hmac_secret: Option<HmacSecretInput>,
}

impl GetAssertionExtensions {
    pub fn is_empty(&self) -> bool {
        self.hmac_secret.is_none()
    }

    pub fn to_cbor(&self) -> Result<Option<Vec<u8>>> {
        let Some(input) = &self.hmac_secret else {
            return Ok(None);
        };
        TextMapBuilder::new()
            .insert_raw(ext_ids::HMAC_SECRET, input.to_cbor()?)
            .build()
            .map(Some)
    }
}

/// Extension outputs found in makeCredential authenticator data
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CreatedExtensions {
    pub hmac_secret: bool,
    pub cred_protect: Option<CredProtect>,
}

impl CreatedExtensions {
    pub fn from_auth_data(auth_data: &AuthenticatorData) -> Result<Self> {
        let hmac_secret = match auth_data.extension(ext_ids::HMAC_SECRET) {
            Some(v) => cbor::as_bool(v, "hmac-secret output")?,
            None => false,
        };
        let cred_protect = match auth_data.extension(ext_ids::CRED_PROTECT) {
            Some(v) => {
                let level = cbor::as_int(v, "credProtect output")?;
                let policy = u8::try_from(level)
                    .ok()
                    .and_then(CredProtect::from_u8)
                    .ok_or_else(|| {
                        CodecError::Malformed(format!("credProtect level {level}"))
                    })?;
                Some(policy)
            }
            None => None,
        };
        Ok(Self {
            hmac_secret,
            cred_protect,
        })
    }
}

/// Encrypted hmac-secret output from getAssertion authenticator data
pub fn hmac_secret_output(auth_data: &AuthenticatorData) -> Result<Option<Vec<u8>>> {
    match auth_data.extension(ext_ids::HMAC_SECRET) {
        Some(Value::Bytes(b)) => Ok(Some(b.clone())),
        Some(_) => Err(CodecError::UnexpectedType("hmac-secret output")),
        None => Ok(None),
    }
}
