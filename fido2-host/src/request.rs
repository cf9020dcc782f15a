//! Request types for session operations

use crate::error::{Error, Result};

use fido2_host_ctap::{CoseAlgorithm, CredProtect, PublicKeyCredentialDescriptor, RelyingParty, User};

use zeroize::Zeroizing;

/// A validated client data hash (must be exactly 32 bytes)
///
/// The caller computes it; the session never rehashes client data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientDataHash([u8; 32]);

impl ClientDataHash {
    pub fn new(hash: [u8; 32]) -> Self {
        Self(hash)
    }

    /// # Errors
    ///
    /// Returns `Error::InvalidRequest` if the slice is not exactly 32 bytes.
    pub fn from_slice(slice: &[u8]) -> Result<Self> {
        let hash = slice.try_into().map_err(|_| {
            Error::InvalidRequest(format!("client data hash is {} bytes", slice.len()))
        })?;
        Ok(Self(hash))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl AsRef<[u8]> for ClientDataHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for ClientDataHash {
    fn from(hash: [u8; 32]) -> Self {
        Self::new(hash)
    }
}

/// User PIN, zeroized on drop and never printed
#[derive(Clone, PartialEq, Eq)]
pub struct Pin(Zeroizing<String>);

impl Pin {
    pub fn new(pin: impl Into<String>) -> Self {
        Self(Zeroizing::new(pin.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Debug for Pin {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("Pin(<redacted>)")
    }
}

/// Request for creating a new credential (authenticatorMakeCredential)
///
/// Use the builder methods to set optional parameters.
#[derive(Debug, Clone)]
pub struct MakeCredentialRequest {
    pub(crate) client_data_hash: ClientDataHash,
    pub(crate) rp: RelyingParty,
    pub(crate) user: User,
    pub(crate) algorithms: Vec<CoseAlgorithm>,
    pub(crate) exclude_list: Vec<PublicKeyCredentialDescriptor>,
    pub(crate) resident_key: Option<bool>,
    pub(crate) user_verification: Option<bool>,
    pub(crate) hmac_secret: bool,
    pub(crate) cred_protect: Option<CredProtect>,
    pub(crate) pin: Option<Pin>,
}

impl MakeCredentialRequest {
    /// Create a request with ES256 as the only algorithm
    pub fn new(client_data_hash: ClientDataHash, rp: RelyingParty, user: User) -> Self {
        Self {
            client_data_hash,
            rp,
            user,
            algorithms: vec![CoseAlgorithm::ES256],
            exclude_list: Vec::new(),
            resident_key: None,
            user_verification: None,
            hmac_secret: false,
            cred_protect: None,
            pin: None,
        }
    }

    /// Acceptable algorithms, most preferred first
    ///
    /// An empty list keeps the ES256 default.
    pub fn with_algorithms(mut self, algorithms: Vec<CoseAlgorithm>) -> Self {
        if !algorithms.is_empty() {
            self.algorithms = algorithms;
        }
        self
    }

    pub fn with_exclude_list(mut self, exclude_list: Vec<PublicKeyCredentialDescriptor>) -> Self {
        self.exclude_list = exclude_list;
        self
    }

    /// Create a discoverable credential
    pub fn with_resident_key(mut self, resident_key: bool) -> Self {
        self.resident_key = Some(resident_key);
        self
    }

    pub fn with_user_verification(mut self, user_verification: bool) -> Self {
        self.user_verification = Some(user_verification);
        self
    }

    /// Request the hmac-secret extension
    pub fn with_hmac_secret(mut self) -> Self {
        self.hmac_secret = true;
        self
    }

    pub fn with_cred_protect(mut self, policy: CredProtect) -> Self {
        self.cred_protect = Some(policy);
        self
    }

    pub fn with_pin(mut self, pin: impl Into<String>) -> Self {
        self.pin = Some(Pin::new(pin));
        self
    }

    pub fn client_data_hash(&self) -> &ClientDataHash {
        &self.client_data_hash
    }

    pub fn rp(&self) -> &RelyingParty {
        &self.rp
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn algorithms(&self) -> &[CoseAlgorithm] {
        &self.algorithms
    }

    pub fn exclude_list(&self) -> &[PublicKeyCredentialDescriptor] {
        &self.exclude_list
    }

    pub fn pin(&self) -> Option<&Pin> {
        self.pin.as_ref()
    }
}

/// Request for getting an assertion (authenticatorGetAssertion)
#[derive(Debug, Clone)]
pub struct GetAssertionRequest {
    pub(crate) client_data_hash: ClientDataHash,
    pub(crate) rp_id: String,
    pub(crate) allow_list: Vec<PublicKeyCredentialDescriptor>,
    pub(crate) user_presence: Option<bool>,
    pub(crate) user_verification: Option<bool>,
    /// salt1, or salt1 || salt2
    pub(crate) hmac_secret_salts: Option<Zeroizing<Vec<u8>>>,
    pub(crate) pin: Option<Pin>,
}

impl GetAssertionRequest {
    pub fn new(client_data_hash: ClientDataHash, rp_id: impl Into<String>) -> Self {
        Self {
            client_data_hash,
            rp_id: rp_id.into(),
            allow_list: Vec::new(),
            user_presence: None,
            user_verification: None,
            hmac_secret_salts: None,
            pin: None,
        }
    }

    /// Add a single credential to the allow list
    pub fn with_credential(mut self, credential: PublicKeyCredentialDescriptor) -> Self {
        self.allow_list.push(credential);
        self
    }

    pub fn with_allow_list(mut self, allow_list: Vec<PublicKeyCredentialDescriptor>) -> Self {
        self.allow_list = allow_list;
        self
    }

    pub fn with_user_presence(mut self, user_presence: bool) -> Self {
        self.user_presence = Some(user_presence);
        self
    }

    pub fn with_user_verification(mut self, user_verification: bool) -> Self {
        self.user_verification = Some(user_verification);
        self
    }

    /// Evaluate hmac-secret with one salt, or two when `salt2` is given
    pub fn with_hmac_secret(mut self, salt1: &[u8], salt2: Option<&[u8]>) -> Result<Self> {
        let mut salts = Zeroizing::new(Vec::with_capacity(64));
        for salt in std::iter::once(salt1).chain(salt2) {
            if salt.len() != 32 {
                return Err(Error::InvalidRequest(format!(
                    "hmac-secret salt is {} bytes",
                    salt.len()
                )));
            }
            salts.extend_from_slice(salt);
        }
        self.hmac_secret_salts = Some(salts);
        Ok(self)
    }

    pub fn with_pin(mut self, pin: impl Into<String>) -> Self {
        self.pin = Some(Pin::new(pin));
        self
    }

    pub fn client_data_hash(&self) -> &ClientDataHash {
        &self.client_data_hash
    }

    pub fn rp_id(&self) -> &str {
        &self.rp_id
    }

    pub fn allow_list(&self) -> &[PublicKeyCredentialDescriptor] {
        &self.allow_list
    }

    pub fn pin(&self) -> Option<&Pin> {
        self.pin.as_ref()
    }

    pub(crate) fn hmac_secret_salts(&self) -> Option<&[u8]> {
        self.hmac_secret_salts.as_deref().map(Vec::as_slice)
    }
}
