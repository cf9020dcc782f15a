//! USB HID backend
//!
//! Enumerates FIDO2 authenticators (usage page 0xF1D0, usage 0x01) through
//! hidapi and exposes them as [`HidDevice`]s.

use crate::ctaphid::{PACKET_SIZE, Packet};
use crate::device::{HidConnector, HidDevice};
use crate::error::{Error, Result};

use std::ffi::CString;
use std::time::Duration;

use hidapi::HidApi;
use log::debug;

/// FIDO2 HID usage page
const FIDO_USAGE_PAGE: u16 = 0xF1D0;

/// FIDO2 HID usage
const FIDO_USAGE: u16 = 0x01;

/// A connected authenticator as enumeration reports it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceLocation {
    /// Platform path accepted by [`open_usb`]
    pub path: String,
    pub vendor_id: u16,
    pub product_id: u16,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
}

fn hid_error(context: &str, err: hidapi::HidError) -> Error {
    Error::Io(format!("{context}: {err}"))
}

/// An open USB HID authenticator
pub struct UsbDevice {
    device: hidapi::HidDevice,
    path: String,
}

impl UsbDevice {
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl std::fmt::Debug for UsbDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsbDevice").field("path", &self.path).finish()
    }
}

impl HidDevice for UsbDevice {
    fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        // Report ID 0 goes first on the wire
        let mut report = [0u8; PACKET_SIZE + 1];
        report[1..].copy_from_slice(packet.as_bytes());
        let written = self
            .device
            .write(&report)
            .map_err(|e| hid_error("write failed", e))?;
        if written < PACKET_SIZE {
            return Err(Error::Io(format!(
                "incomplete write: {written} of {} bytes",
                report.len()
            )));
        }
        Ok(())
    }

    fn read_packet(&mut self, timeout: Duration) -> Result<Option<Packet>> {
        let mut buf = [0u8; PACKET_SIZE];
        let millis = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        let read = self
            .device
            .read_timeout(&mut buf, millis)
            .map_err(|e| hid_error("read failed", e))?;
        match read {
            0 => Ok(None),
            PACKET_SIZE => Packet::from_slice(&buf).map(Some),
            n => Err(Error::Io(format!(
                "incomplete read: {n} bytes (expected {PACKET_SIZE})"
            ))),
        }
    }
}

/// Opens authenticators through a shared hidapi context
pub struct UsbConnector {
    api: HidApi,
}

impl UsbConnector {
    pub fn new() -> Result<Self> {
        let api = HidApi::new().map_err(|e| hid_error("failed to initialize hidapi", e))?;
        Ok(Self { api })
    }

    /// FIDO2 devices currently attached
    pub fn device_locations(&mut self) -> Result<Vec<DeviceLocation>> {
        self.api
            .refresh_devices()
            .map_err(|e| hid_error("device enumeration failed", e))?;

        let locations: Vec<_> = self
            .api
            .device_list()
            .filter(|info| info.usage_page() == FIDO_USAGE_PAGE && info.usage() == FIDO_USAGE)
            .map(|info| DeviceLocation {
                path: info.path().to_string_lossy().into_owned(),
                vendor_id: info.vendor_id(),
                product_id: info.product_id(),
                manufacturer: info.manufacturer_string().map(str::to_owned),
                product: info.product_string().map(str::to_owned),
                serial_number: info.serial_number().map(str::to_owned),
            })
            .collect();
        debug!("found {} FIDO2 HID device(s)", locations.len());
        Ok(locations)
    }
}

impl HidConnector for UsbConnector {
    type Device = UsbDevice;

    fn open(&self, path: &str) -> Result<UsbDevice> {
        let c_path = CString::new(path)
            .map_err(|e| Error::Io(format!("invalid device path: {e}")))?;
        let device = self
            .api
            .open_path(&c_path)
            .map_err(|e| hid_error("failed to open device", e))?;
        debug!("opened {path}");
        Ok(UsbDevice {
            device,
            path: path.to_owned(),
        })
    }
}

/// Enumerate attached FIDO2 authenticators
pub fn device_locations() -> Result<Vec<DeviceLocation>> {
    UsbConnector::new()?.device_locations()
}

/// Open one authenticator by path
pub fn open_usb(path: &str) -> Result<UsbDevice> {
    UsbConnector::new()?.open(path)
}
