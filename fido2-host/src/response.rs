//! Results of session operations
//!
//! Decoded from the CTAP responses, with the pieces a WebAuthn client needs
//! pulled out of the authenticator data.

use crate::error::Result;
use crate::request::ClientDataHash;

use fido2_host_ctap::commands::get_assertion::GetAssertionResponse;
use fido2_host_ctap::commands::make_credential::MakeCredentialResponse;
use fido2_host_ctap::extensions::CreatedExtensions;
use fido2_host_ctap::types::PUBLIC_KEY;
use fido2_host_ctap::{
    AuthenticatorData, CodecError, CosePublicKey, CredProtect, PublicKeyCredentialDescriptor, User,
};

/// A newly created credential with its attestation
#[derive(Debug, Clone, PartialEq)]
pub struct AttestationResult {
    /// Authenticator data exactly as signed
    pub auth_data_raw: Vec<u8>,
    pub auth_data: AuthenticatorData,
    /// Echo of the hash the caller supplied
    pub client_data_hash: ClientDataHash,
    pub credential_id: Vec<u8>,
    /// COSE_Key bytes as the authenticator encoded them
    pub public_key_cbor: Vec<u8>,
    pub public_key: CosePublicKey,
    pub aaguid: [u8; 16],
    /// Attestation statement format, e.g. "packed" or "none"
    pub fmt: String,
    /// Empty for self or `none` attestation without a signature
    pub signature: Vec<u8>,
    pub alg: Option<i64>,
    pub x5c: Vec<Vec<u8>>,
    /// hmac-secret was enabled for the credential
    pub hmac_secret: bool,
    pub cred_protect: Option<CredProtect>,
}

impl AttestationResult {
    pub(crate) fn from_response(
        response: MakeCredentialResponse,
        client_data_hash: ClientDataHash,
    ) -> Result<Self> {
        let Some(credential) = response.auth_data.attested_credential.clone() else {
            return Err(CodecError::Malformed("no attested credential data".into()).into());
        };
        let extensions = CreatedExtensions::from_auth_data(&response.auth_data)?;

        Ok(Self {
            auth_data_raw: response.auth_data_raw,
            auth_data: response.auth_data,
            client_data_hash,
            credential_id: credential.credential_id,
            public_key_cbor: credential.public_key_cbor,
            public_key: credential.public_key,
            aaguid: credential.aaguid,
            fmt: response.fmt,
            signature: response.att_stmt.sig.unwrap_or_default(),
            alg: response.att_stmt.alg,
            x5c: response.att_stmt.x5c,
            hmac_secret: extensions.hmac_secret,
            cred_protect: extensions.cred_protect,
        })
    }

    /// Always `"public-key"`
    pub fn credential_type(&self) -> &'static str {
        PUBLIC_KEY
    }
}

/// One assertion from getAssertion or getNextAssertion
#[derive(Debug, Clone, PartialEq)]
pub struct AssertionResult {
    pub auth_data_raw: Vec<u8>,
    pub auth_data: AuthenticatorData,
    pub signature: Vec<u8>,
    /// Omitted by the device when the allow list had a single entry
    pub credential_id: Option<Vec<u8>>,
    /// Present for discoverable credentials
    pub user: Option<User>,
    /// Total assertions available; fetch the rest with getNextAssertion
    pub number_of_credentials: Option<u32>,
    /// Decrypted hmac-secret output, 32 or 64 bytes
    pub hmac_secret: Option<Vec<u8>>,
}

impl AssertionResult {
    pub(crate) fn from_response(response: GetAssertionResponse) -> Self {
        Self {
            auth_data_raw: response.auth_data_raw,
            auth_data: response.auth_data,
            signature: response.signature,
            credential_id: response.credential.map(|c| c.id),
            user: response.user,
            number_of_credentials: response.number_of_credentials,
            hmac_secret: None,
        }
    }

    /// Credential id from the response, else the single allow-list entry
    pub(crate) fn fill_credential_id(&mut self, allow_list: &[PublicKeyCredentialDescriptor]) {
        if self.credential_id.is_some() {
            return;
        }
        if let [only] = allow_list {
            self.credential_id = Some(only.id.clone());
        }
    }
}
