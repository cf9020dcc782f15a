//! CTAPHID request/response exchange
//!
//! A [`Framer`] owns a channel id and the timeout policy for it. It sends a
//! payload as a packet train and then waits for the reply:
//!
//! - packets for other channels are ignored
//! - KEEPALIVE resets the idle timeout; the first `UPNEEDED` status starts
//!   the user-action clock
//! - CTAPHID_ERROR ends the wait with the mapped transport error
//! - a set [`CancelToken`] sends CTAPHID_CANCEL and drains the reply
//!
//! Spec: <https://fidoalliance.org/specs/fido-v2.2-rd-20230321/fido-client-to-authenticator-protocol-v2.2-rd-20230321.html#usb-hid-framing>

use crate::cancel::CancelToken;
use crate::ctaphid::{
    self, BROADCAST_CID, Cmd, CtapHidInfo, KeepaliveStatus, Message, Packet, Reassembler,
};
use crate::device::HidDevice;
use crate::error::{Error, Result};

use std::time::{Duration, Instant};

use log::{debug, trace, warn};

/// Timeout policy for one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Longest silence tolerated while waiting for a reply
    pub transaction: Duration,
    /// Longest wait after the device reports UPNEEDED
    pub user_action: Duration,
    /// Bound on draining the reply to a cancelled request
    pub cancel_drain: Duration,
    /// Granularity of cancellation and deadline checks
    pub poll_interval: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            transaction: Duration::from_secs(3),
            user_action: Duration::from_secs(30),
            cancel_drain: Duration::from_millis(500),
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// One allocated CTAPHID channel
#[derive(Debug, Clone)]
pub struct Framer {
    cid: u32,
    timeouts: Timeouts,
}

impl Framer {
    pub fn new(cid: u32, timeouts: Timeouts) -> Self {
        Self { cid, timeouts }
    }

    /// Allocate a channel with CTAPHID_INIT on the broadcast channel
    pub fn init<D: HidDevice + ?Sized>(
        device: &mut D,
        timeouts: Timeouts,
    ) -> Result<(Self, CtapHidInfo)> {
        let nonce: [u8; 8] = rand::random();
        let broadcast = Self::new(BROADCAST_CID, timeouts);
        broadcast.send(device, Cmd::Init, &nonce, ctaphid::MAX_MESSAGE_SIZE)?;

        let deadline = Instant::now() + timeouts.transaction;
        loop {
            let reply = broadcast.receive(device, None)?;
            if reply.command() != Some(Cmd::Init) {
                return Err(Error::UnexpectedResponse(reply.cmd));
            }
            match CtapHidInfo::parse(&reply.data, &nonce) {
                Ok(info) => {
                    debug!(
                        "allocated cid={:08x} protocol={} version={}.{}.{} caps=0x{:02x}",
                        info.cid,
                        info.protocol_version,
                        info.major_version,
                        info.minor_version,
                        info.build_version,
                        info.capabilities
                    );
                    return Ok((Self::new(info.cid, timeouts), info));
                }
                // Another host's INIT reply on the shared broadcast channel
                Err(Error::InvalidInitResponse("nonce mismatch")) if Instant::now() < deadline => {
                    trace!("skipping INIT reply with foreign nonce");
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn cid(&self) -> u32 {
        self.cid
    }

    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    /// Fragment and write a message; nothing is written when it exceeds
    /// `max_size`
    pub fn send<D: HidDevice + ?Sized>(
        &self,
        device: &mut D,
        cmd: Cmd,
        payload: &[u8],
        max_size: usize,
    ) -> Result<()> {
        if payload.len() > max_size {
            return Err(Error::MessageTooLarge {
                size: payload.len(),
                max: max_size,
            });
        }
        let packets = Packet::fragment(self.cid, cmd, payload)?;
        trace!(
            "TX cid={:08x} cmd={:?} len={} packets={}",
            self.cid,
            cmd,
            payload.len(),
            packets.len()
        );
        for packet in &packets {
            device.write_packet(packet)?;
        }
        Ok(())
    }

    /// Wait for the next complete message on this channel
    pub fn receive<D: HidDevice + ?Sized>(
        &self,
        device: &mut D,
        cancel: Option<&CancelToken>,
    ) -> Result<Message> {
        let mut idle_deadline = Instant::now() + self.timeouts.transaction;
        let mut presence_deadline: Option<Instant> = None;
        let mut assembly: Option<Reassembler> = None;

        loop {
            if cancel.is_some_and(CancelToken::is_cancelled) {
                debug!("cancel requested on cid={:08x}", self.cid);
                self.abort(device);
                return Err(Error::Cancelled);
            }

            let now = Instant::now();
            if presence_deadline.is_some_and(|deadline| now >= deadline) {
                warn!("no user action within {:?}", self.timeouts.user_action);
                self.abort(device);
                return Err(Error::UserActionTimeout);
            }
            if now >= idle_deadline {
                return Err(Error::Timeout);
            }

            let wait = self.timeouts.poll_interval.min(idle_deadline - now);
            let Some(packet) = device.read_packet(wait)? else {
                continue;
            };
            if packet.cid() != self.cid {
                trace!("ignoring packet for cid={:08x}", packet.cid());
                continue;
            }
            idle_deadline = Instant::now() + self.timeouts.transaction;

            if !packet.is_init() {
                let partial = assembly.as_mut().ok_or(Error::InvalidSequence)?;
                partial.push(&packet)?;
            } else {
                if assembly.is_some() {
                    return Err(Error::InvalidSequence);
                }
                match packet.cmd() {
                    Some(Cmd::Keepalive) => {
                        let status = packet.payload()[0];
                        if KeepaliveStatus::from_u8(status) == Some(KeepaliveStatus::UpNeeded)
                            && presence_deadline.is_none()
                        {
                            debug!("device waiting for user presence");
                            presence_deadline = Some(Instant::now() + self.timeouts.user_action);
                        } else {
                            trace!("keepalive status=0x{status:02x}");
                        }
                        continue;
                    }
                    Some(Cmd::Error) => {
                        let code = packet.payload()[0];
                        debug!("CTAPHID error 0x{code:02x} on cid={:08x}", self.cid);
                        return Err(ctaphid::error_from_code(code));
                    }
                    _ => assembly = Some(Reassembler::start(&packet)?),
                }
            }

            if assembly.as_ref().is_some_and(Reassembler::is_complete) {
                if let Some(done) = assembly.take() {
                    let message = done.finish()?;
                    trace!(
                        "RX cid={:08x} cmd=0x{:02x} len={}",
                        message.cid,
                        message.cmd,
                        message.data.len()
                    );
                    return Ok(message);
                }
            }
        }
    }

    /// Send a request and return the payload of its matching reply
    pub fn transact<D: HidDevice + ?Sized>(
        &self,
        device: &mut D,
        cmd: Cmd,
        payload: &[u8],
        max_size: usize,
        cancel: Option<&CancelToken>,
    ) -> Result<Vec<u8>> {
        self.send(device, cmd, payload, max_size)?;
        let reply = self.receive(device, cancel)?;
        if reply.cmd != cmd.to_u8() {
            return Err(Error::UnexpectedResponse(reply.cmd));
        }
        Ok(reply.data)
    }

    /// Send CTAPHID_CANCEL and swallow whatever the device still sends for
    /// the cancelled request
    fn abort<D: HidDevice + ?Sized>(&self, device: &mut D) {
        if let Err(e) = device.write_packet(&Packet::cancel(self.cid)) {
            debug!("writing CTAPHID_CANCEL failed: {e}");
            return;
        }

        let deadline = Instant::now() + self.timeouts.cancel_drain;
        let mut assembly: Option<Reassembler> = None;
        loop {
            let now = Instant::now();
            if now >= deadline {
                debug!("cancel drain window elapsed");
                return;
            }
            let packet = match device.read_packet(deadline - now) {
                Ok(Some(packet)) => packet,
                Ok(None) => continue,
                Err(e) => {
                    debug!("cancel drain stopped: {e}");
                    return;
                }
            };
            if packet.cid() != self.cid {
                continue;
            }
            if packet.is_init() {
                match packet.cmd() {
                    Some(Cmd::Keepalive) => continue,
                    Some(Cmd::Error) => return,
                    _ => match Reassembler::start(&packet) {
                        Ok(start) => assembly = Some(start),
                        Err(_) => return,
                    },
                }
            } else if let Some(partial) = assembly.as_mut() {
                if partial.push(&packet).is_err() {
                    return;
                }
            }
            if assembly.as_ref().is_some_and(Reassembler::is_complete) {
                trace!("drained reply to cancelled request");
                return;
            }
        }
    }
}
