//! Device boundary
//!
//! The framer never touches HID directly; it talks to a [`HidDevice`]. The
//! `usb` feature provides a hidapi implementation, tests provide in-process
//! authenticators.

use crate::ctaphid::Packet;
use crate::error::Result;

use std::time::Duration;

/// An open HID device exchanging 64-byte reports
pub trait HidDevice {
    fn write_packet(&mut self, packet: &Packet) -> Result<()>;

    /// Wait up to `timeout` for one packet; `Ok(None)` when nothing arrived
    fn read_packet(&mut self, timeout: Duration) -> Result<Option<Packet>>;

    /// Release the handle. Called once by the session; dropping is enough
    /// for most backends.
    fn close(&mut self) {}
}

impl<D: HidDevice + ?Sized> HidDevice for Box<D> {
    fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        (**self).write_packet(packet)
    }

    fn read_packet(&mut self, timeout: Duration) -> Result<Option<Packet>> {
        (**self).read_packet(timeout)
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Opens devices by platform path
pub trait HidConnector {
    type Device: HidDevice;

    fn open(&self, path: &str) -> Result<Self::Device>;
}
