//! CTAPHID transport for FIDO2 hosts
//!
//! This crate provides:
//! - CTAPHID packets, fragmentation and reassembly
//! - A request/response [`Framer`] with keepalive, busy and cancel handling
//! - The [`HidDevice`]/[`HidConnector`] boundary to the actual hardware
//! - USB HID devices via hidapi - requires the "usb" feature
//!
//! # Features
//!
//! - `usb`: Enable the hidapi backend (requires libudev on Linux)
//!
//! CTAPHID: <https://fidoalliance.org/specs/fido-v2.2-rd-20230321/fido-client-to-authenticator-protocol-v2.2-rd-20230321.html#usb>

pub mod cancel;
pub mod ctaphid;
pub mod device;
pub mod error;
pub mod framer;
#[cfg(feature = "usb")]
pub mod usb;

pub use cancel::CancelToken;
pub use ctaphid::{Cmd, CtapHidInfo, Message, Packet};
pub use device::{HidConnector, HidDevice};
pub use error::{Error, Result};
pub use framer::{Framer, Timeouts};
#[cfg(feature = "usb")]
pub use usb::{DeviceLocation, UsbConnector, UsbDevice, device_locations, open_usb};
