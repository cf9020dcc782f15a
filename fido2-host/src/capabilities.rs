//! Device capability model
//!
//! An immutable view over one GetInfo response. The session keeps it behind
//! an `Arc` and swaps in a new snapshot when GetInfo is re-fetched, so
//! readers never see a half-updated model.

use fido2_host_crypto::PinProtocol;
use fido2_host_ctap::commands::get_info::{AuthenticatorInfo, AuthenticatorOptions, OptionState};
use fido2_host_ctap::cbor::MAX_CTAP_MESSAGE_SIZE;

/// Message size assumed when GetInfo does not report maxMsgSize
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024;

pub const FIDO_2_0: &str = "FIDO_2_0";
pub const FIDO_2_1: &str = "FIDO_2_1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    info: AuthenticatorInfo,
}

impl Capabilities {
    pub fn new(info: AuthenticatorInfo) -> Self {
        Self { info }
    }

    /// The full decoded GetInfo response
    pub fn info(&self) -> &AuthenticatorInfo {
        &self.info
    }

    pub fn aaguid(&self) -> &[u8; 16] {
        &self.info.aaguid
    }

    pub fn options(&self) -> &AuthenticatorOptions {
        &self.info.options
    }

    pub fn option(&self, name: &str) -> OptionState {
        self.info.options.get(name)
    }

    pub fn supports_version(&self, version: &str) -> bool {
        self.info.versions.contains(version)
    }

    pub fn supports_extension(&self, name: &str) -> bool {
        self.info.extensions.contains(name)
    }

    /// A PIN has been set on the device
    pub fn pin_configured(&self) -> bool {
        self.info.options.client_pin.is_enabled()
    }

    /// The device implements ClientPIN at all, PIN set or not
    pub fn client_pin_supported(&self) -> bool {
        self.info.options.client_pin.is_present()
    }

    /// Permission-scoped tokens via subcommand 0x09
    pub fn supports_pin_uv_auth_token(&self) -> bool {
        self.info.options.pin_uv_auth_token.is_enabled()
    }

    /// Highest protocol both sides implement
    ///
    /// A device that supports ClientPIN but lists no protocols predates the
    /// field and speaks protocol one.
    pub fn preferred_pin_protocol(&self) -> Option<PinProtocol> {
        if self.info.pin_uv_auth_protocols.is_empty() {
            return self.client_pin_supported().then_some(PinProtocol::V1);
        }
        PinProtocol::SUPPORTED
            .into_iter()
            .find(|p| self.info.pin_uv_auth_protocols.contains(&p.version()))
    }

    /// Largest CTAP message the device accepts
    pub fn max_message_size(&self) -> usize {
        self.info
            .max_msg_size
            .map_or(DEFAULT_MAX_MESSAGE_SIZE, |size| size as usize)
            .min(MAX_CTAP_MESSAGE_SIZE)
    }

    /// Unknown when the device does not list algorithms
    pub fn supports_algorithm(&self, alg: i64) -> bool {
        self.info.algorithms.is_empty() || self.info.algorithms.contains(&alg)
    }

    /// Largest allow/exclude list the device takes in one request
    pub fn max_credential_count_in_list(&self) -> Option<usize> {
        self.info
            .max_credential_count_in_list
            .map(|count| count as usize)
    }
}
