//! # fido2-host
//!
//! Host side of CTAP2: talk to a FIDO2 authenticator over CTAPHID to create
//! credentials and get assertions.
//!
//! ## Architecture
//!
//! - **Session**: [`DeviceSession`] owns one device, runs one command at a
//!   time and retries a busy channel
//! - **Capabilities**: the GetInfo snapshot commands are checked against
//! - **PIN**: PIN/UV auth protocol one and two, pinUvAuthToken and the
//!   hmac-secret shared secret
//! - **Requests/Responses**: builders for MakeCredential and GetAssertion,
//!   decoded attestation and assertion results
//!
//! Framing lives in `fido2-host-transport`, CBOR in `fido2-host-ctap` and the
//! cryptography in `fido2-host-crypto`.
//!
//! ## Example
//!
//! ```no_run
//! # #[cfg(feature = "usb")]
//! # fn main() -> Result<(), fido2_host::Error> {
//! use fido2_host::{
//!     ClientDataHash, DeviceSession, MakeCredentialRequest, RelyingParty, SessionConfig, User,
//!     UsbConnector,
//! };
//!
//! let mut connector = UsbConnector::new()?;
//! let location = connector.device_locations()?.into_iter().next().unwrap();
//! let session = DeviceSession::open(&connector, &location.path, SessionConfig::default())?;
//!
//! let request = MakeCredentialRequest::new(
//!     ClientDataHash::new([0u8; 32]),
//!     RelyingParty::new("example.com"),
//!     User::new(vec![1, 2, 3, 4]),
//! )
//! .with_resident_key(true);
//! let attestation = session.make_credential(&request)?;
//! println!("credential id: {:02x?}", attestation.credential_id);
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "usb"))]
//! # fn main() {}
//! ```

pub mod capabilities;
pub mod config;
pub mod error;
pub mod pin;
pub mod request;
pub mod response;
pub mod session;

pub use capabilities::Capabilities;
pub use config::{RetryPolicy, SessionConfig, SessionConfigBuilder};
pub use error::{Error, Result};
pub use pin::{NegotiationState, PinUvAuthContext};
pub use request::{ClientDataHash, GetAssertionRequest, MakeCredentialRequest, Pin};
pub use response::{AssertionResult, AttestationResult};
pub use session::DeviceSession;

pub use fido2_host_crypto::PinProtocol;
pub use fido2_host_ctap::commands::get_info::{AuthenticatorInfo, OptionState};
pub use fido2_host_ctap::{
    CoseAlgorithm, CosePublicKey, CredProtect, PublicKeyCredentialDescriptor, RelyingParty,
    StatusCode, User,
};
pub use fido2_host_transport::{CancelToken, CtapHidInfo, HidConnector, HidDevice};
#[cfg(feature = "usb")]
pub use fido2_host_transport::{DeviceLocation, UsbConnector, UsbDevice, device_locations, open_usb};
