//! PIN/UV auth protocol negotiation
//!
//! Runs the ClientPIN exchange that turns a user PIN into a pinUvAuthToken:
//!
//! 1. getKeyAgreement with the chosen protocol
//! 2. ECDH with a fresh P-256 key pair, protocol KDF
//! 3. getPinToken (protocol one) or getPinUvAuthTokenUsingPinWithPermissions
//! 4. decrypt the token and compute pinUvAuthParam from it
//!
//! Step 1-2 alone also provide the shared secret for hmac-secret.
//!
//! Spec: <https://fidoalliance.org/specs/fido-v2.2-rd-20230321/fido-client-to-authenticator-protocol-v2.2-rd-20230321.html#authenticatorClientPIN>

use crate::capabilities::Capabilities;
use crate::error::{Error, Result};

use fido2_host_crypto::ecdh::KeyPair;
use fido2_host_crypto::pin_protocol::pin_hash;
use fido2_host_crypto::{PinProtocol, SecBytes, SharedSecret};
use fido2_host_ctap::commands::client_pin::{ClientPin, ClientPinResponse};
use fido2_host_ctap::cose::{self, CosePublicKey};
use fido2_host_ctap::extensions::HmacSecretInput;
use fido2_host_ctap::{CodecError, StatusCode};

pub use fido2_host_ctap::commands::client_pin::permissions;

/// Where a negotiation currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Uninitialized,
    KeyAgreementSent,
    SharedSecretDerived,
    TokenObtained,
    /// Negotiation failed; the context must be discarded
    Failed,
    /// pinUvAuthParam produced
    Success,
}

impl NegotiationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Success)
    }
}

/// One PIN/UV auth negotiation with an authenticator
///
/// Secrets are zeroized on drop. A context is never reused across
/// operations; each gets a fresh key pair.
pub struct PinUvAuthContext {
    protocol: PinProtocol,
    state: NegotiationState,
    /// Platform key agreement key, COSE encoded
    platform_key: Option<Vec<u8>>,
    shared_secret: Option<SharedSecret>,
    token: Option<SecBytes>,
}

impl core::fmt::Debug for PinUvAuthContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PinUvAuthContext")
            .field("protocol", &self.protocol)
            .field("state", &self.state)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl PinUvAuthContext {
    pub fn new(protocol: PinProtocol) -> Self {
        Self {
            protocol,
            state: NegotiationState::Uninitialized,
            platform_key: None,
            shared_secret: None,
            token: None,
        }
    }

    /// Context with the protocol the device prefers
    pub fn for_device(capabilities: &Capabilities) -> Result<Self> {
        let protocol = capabilities.preferred_pin_protocol().ok_or_else(|| {
            Error::InvalidRequest("device supports no common PIN/UV auth protocol".into())
        })?;
        Ok(Self::new(protocol))
    }

    pub fn protocol(&self) -> PinProtocol {
        self.protocol
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    /// Steps one and two: key agreement and shared secret derivation
    pub fn establish<F>(&mut self, exec: &mut F) -> Result<()>
    where
        F: FnMut(&ClientPin) -> Result<ClientPinResponse>,
    {
        if self.state != NegotiationState::Uninitialized {
            return Err(Error::InvalidRequest(format!(
                "key agreement already ran ({:?})",
                self.state
            )));
        }
        self.state = NegotiationState::KeyAgreementSent;
        let result = self.key_agreement(exec);
        self.fail_on_err(result)
    }

    fn key_agreement<F>(&mut self, exec: &mut F) -> Result<()>
    where
        F: FnMut(&ClientPin) -> Result<ClientPinResponse>,
    {
        let response = exec(&ClientPin::GetKeyAgreement {
            protocol: self.protocol.version(),
        })?;
        let (x, y) = match response.key_agreement {
            Some(CosePublicKey::Ec2P256 { x, y, .. }) => (x, y),
            Some(_) => return Err(CodecError::UnsupportedKeyType.into()),
            None => {
                return Err(
                    CodecError::Malformed("getKeyAgreement without keyAgreement".into()).into(),
                );
            }
        };

        let keypair = KeyPair::generate();
        let z = keypair.shared_secret_cose(&x, &y)?;
        let (px, py) = keypair.public_key_cose();

        self.platform_key = Some(cose::key_agreement_to_cbor(&px, &py)?);
        self.shared_secret = Some(self.protocol.kdf(&z));
        self.state = NegotiationState::SharedSecretDerived;
        log::debug!("PIN/UV protocol {} shared secret derived", self.protocol.version());
        Ok(())
    }

    /// Step three: exchange the PIN for a token
    ///
    /// `permissions` and `rp_id` are sent only when the permission-scoped
    /// subcommand is used, which is the case for protocol two or when the
    /// device advertises `pinUvAuthToken`.
    pub fn obtain_token<F>(
        &mut self,
        pin: &str,
        permissions: u8,
        rp_id: Option<&str>,
        use_permissions: bool,
        exec: &mut F,
    ) -> Result<()>
    where
        F: FnMut(&ClientPin) -> Result<ClientPinResponse>,
    {
        if self.state != NegotiationState::SharedSecretDerived {
            return Err(Error::InvalidRequest(format!(
                "no shared secret to request a token with ({:?})",
                self.state
            )));
        }
        if pin.is_empty() {
            self.state = NegotiationState::Failed;
            return Err(Error::InvalidRequest("empty PIN".into()));
        }
        let result = self.request_token(pin, permissions, rp_id, use_permissions, exec);
        self.fail_on_err(result)
    }

    fn request_token<F>(
        &mut self,
        pin: &str,
        permissions: u8,
        rp_id: Option<&str>,
        use_permissions: bool,
        exec: &mut F,
    ) -> Result<()>
    where
        F: FnMut(&ClientPin) -> Result<ClientPinResponse>,
    {
        let (Some(secret), Some(key_agreement)) = (&self.shared_secret, &self.platform_key) else {
            return Err(Error::InvalidRequest("shared secret missing".into()));
        };
        let pin_hash_enc = secret.encrypt(pin_hash(pin).as_slice())?;
        let protocol = self.protocol.version();

        let command = if use_permissions {
            ClientPin::GetPinUvAuthTokenUsingPinWithPermissions {
                protocol,
                key_agreement: key_agreement.clone(),
                pin_hash_enc,
                permissions,
                rp_id: rp_id.map(str::to_owned),
            }
        } else {
            ClientPin::GetPinToken {
                protocol,
                key_agreement: key_agreement.clone(),
                pin_hash_enc,
            }
        };

        let response = match exec(&command) {
            Ok(response) => response,
            Err(err) if err.status() == Some(StatusCode::PinInvalid) => {
                return Err(pin_invalid(exec));
            }
            Err(err) => return Err(err),
        };

        let encrypted = response.pin_uv_auth_token.ok_or_else(|| {
            CodecError::Malformed("token response without pinUvAuthToken".into())
        })?;
        let token = SecBytes::new(secret.decrypt(&encrypted)?);
        if token.len() != 16 && token.len() != 32 {
            return Err(
                CodecError::Malformed(format!("pinUvAuthToken is {} bytes", token.len())).into(),
            );
        }
        self.token = Some(token);
        self.state = NegotiationState::TokenObtained;
        log::debug!("pinUvAuthToken obtained (permissions {permissions:#04x})");
        Ok(())
    }

    /// `authenticate(token, clientDataHash)`
    pub fn pin_uv_auth_param(&mut self, client_data_hash: &[u8; 32]) -> Result<Vec<u8>> {
        let Some(token) = &self.token else {
            return Err(Error::InvalidRequest("no pinUvAuthToken".into()));
        };
        let param = token.with_bytes(|key| self.protocol.authenticate(key, client_data_hash));
        self.state = NegotiationState::Success;
        Ok(param)
    }

    /// Encrypt and authenticate hmac-secret salts (32 or 64 bytes)
    pub fn hmac_secret_input(&self, salts: &[u8]) -> Result<HmacSecretInput> {
        if salts.len() != 32 && salts.len() != 64 {
            return Err(Error::InvalidRequest(format!(
                "hmac-secret salts are {} bytes",
                salts.len()
            )));
        }
        let (Some(secret), Some(key_agreement)) = (&self.shared_secret, &self.platform_key) else {
            return Err(Error::InvalidRequest("shared secret missing".into()));
        };
        let salt_enc = secret.encrypt(salts)?;
        let salt_auth = secret.authenticate(&salt_enc);
        Ok(HmacSecretInput {
            key_agreement: key_agreement.clone(),
            salt_enc,
            salt_auth,
            pin_uv_auth_protocol: self.protocol.version(),
        })
    }

    /// Decrypt the hmac-secret output, expecting `expected_len` bytes
    pub fn decrypt_hmac_secret(&self, output: &[u8], expected_len: usize) -> Result<Vec<u8>> {
        let Some(secret) = &self.shared_secret else {
            return Err(Error::InvalidRequest("shared secret missing".into()));
        };
        let plain = secret.decrypt(output)?;
        if plain.len() != expected_len {
            return Err(CodecError::Malformed(format!(
                "hmac-secret output is {} bytes, expected {expected_len}",
                plain.len()
            ))
            .into());
        }
        Ok(plain)
    }

    fn fail_on_err(&mut self, result: Result<()>) -> Result<()> {
        if result.is_err() {
            self.state = NegotiationState::Failed;
            self.token = None;
        }
        result
    }
}

/// Turn a PIN_INVALID into the retries the device still allows
///
/// A device that cannot report the count still gets `PinInvalid`, only
/// without `retries_left`.
fn pin_invalid<F>(exec: &mut F) -> Error
where
    F: FnMut(&ClientPin) -> Result<ClientPinResponse>,
{
    let retries_left = match exec(&ClientPin::GetPinRetries) {
        Ok(ClientPinResponse {
            pin_retries: Some(0),
            ..
        }) => return Error::PinBlocked,
        Ok(ClientPinResponse { pin_retries, .. }) => pin_retries,
        Err(Error::PinBlocked) => return Error::PinBlocked,
        Err(err) => {
            log::debug!("getPinRetries after wrong PIN failed: {err}");
            None
        }
    };
    match retries_left {
        Some(n) => log::warn!("wrong PIN, {n} retries left"),
        None => log::warn!("wrong PIN, retries unknown"),
    }
    Error::PinInvalid { retries_left }
}

/// Full negotiation for a command that needs a token
///
/// Uses the permission-scoped token request unless the device only speaks
/// protocol one without advertising `pinUvAuthToken`.
pub fn negotiate<F>(
    capabilities: &Capabilities,
    pin: &str,
    permissions: u8,
    rp_id: Option<&str>,
    exec: &mut F,
) -> Result<PinUvAuthContext>
where
    F: FnMut(&ClientPin) -> Result<ClientPinResponse>,
{
    let mut ctx = PinUvAuthContext::for_device(capabilities)?;
    ctx.establish(exec)?;
    let use_permissions =
        ctx.protocol() == PinProtocol::V2 || capabilities.supports_pin_uv_auth_token();
    ctx.obtain_token(pin, permissions, rp_id, use_permissions, exec)?;
    Ok(ctx)
}
