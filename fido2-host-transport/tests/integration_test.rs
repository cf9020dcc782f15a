//! Framer against a scripted in-process authenticator

use fido2_host_transport::ctaphid::{self, BROADCAST_CID};
use fido2_host_transport::{CancelToken, Cmd, Error, Framer, HidDevice, Packet, Result, Timeouts};

use std::collections::VecDeque;
use std::thread;
use std::time::Duration;

const CID: u32 = 0x0A0B0C0D;

/// Answers INIT, echoes CBOR and PING after a number of keepalives
struct EchoAuthenticator {
    outbox: VecDeque<Packet>,
    inbox: Vec<Packet>,
    keepalives: usize,
    keepalive_status: u8,
    busy: bool,
    /// Stop answering CBOR entirely, only keep the user waiting
    hold: bool,
}

impl EchoAuthenticator {
    fn new() -> Self {
        Self {
            outbox: VecDeque::new(),
            inbox: Vec::new(),
            keepalives: 0,
            keepalive_status: 0x01,
            busy: false,
            hold: false,
        }
    }

    fn reply(&mut self, cid: u32, cmd: Cmd, data: &[u8]) {
        self.outbox.extend(Packet::fragment(cid, cmd, data).unwrap());
    }

    fn handle(&mut self, message: fido2_host_transport::Message) {
        match message.command() {
            Some(Cmd::Init) => {
                let mut payload = message.data.clone();
                payload.extend_from_slice(&CID.to_be_bytes());
                payload.extend_from_slice(&[2, 1, 0, 0, 0x05]);
                self.reply(BROADCAST_CID, Cmd::Init, &payload);
            }
            Some(Cmd::Cancel) => {
                // CTAP2_ERR_KEEPALIVE_CANCEL
                self.outbox.clear();
                self.reply(message.cid, Cmd::Cbor, &[0x2D]);
            }
            Some(_) if self.busy => self.reply(message.cid, Cmd::Error, &[0x06]),
            Some(cmd) => {
                for _ in 0..self.keepalives {
                    self.reply(message.cid, Cmd::Keepalive, &[self.keepalive_status]);
                }
                if !self.hold {
                    self.reply(message.cid, cmd, &message.data);
                }
            }
            None => self.reply(message.cid, Cmd::Error, &[0x01]),
        }
    }
}

impl HidDevice for EchoAuthenticator {
    fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        self.inbox.push(packet.clone());
        if let Ok(message) = ctaphid::reassemble(&self.inbox) {
            self.inbox.clear();
            self.handle(message);
        }
        Ok(())
    }

    fn read_packet(&mut self, timeout: Duration) -> Result<Option<Packet>> {
        match self.outbox.pop_front() {
            Some(packet) => Ok(Some(packet)),
            None if self.hold => {
                // Keep the user-presence wait alive
                thread::sleep(timeout.min(Duration::from_millis(5)));
                Ok(Some(
                    Packet::fragment(CID, Cmd::Keepalive, &[0x02])
                        .unwrap()
                        .remove(0),
                ))
            }
            None => {
                thread::sleep(timeout.min(Duration::from_millis(5)));
                Ok(None)
            }
        }
    }
}

fn timeouts() -> Timeouts {
    Timeouts {
        transaction: Duration::from_millis(200),
        user_action: Duration::from_millis(100),
        cancel_drain: Duration::from_millis(50),
        poll_interval: Duration::from_millis(5),
    }
}

#[test]
fn test_init_then_large_exchange() {
    let mut device = EchoAuthenticator::new();
    let (framer, info) = Framer::init(&mut device, timeouts()).unwrap();
    assert_eq!(framer.cid(), CID);
    assert_eq!(info.protocol_version, 2);
    assert!(info.has_cbor());

    let payload: Vec<u8> = (0..ctaphid::MAX_MESSAGE_SIZE).map(|i| i as u8).collect();
    let reply = framer
        .transact(&mut device, Cmd::Cbor, &payload, ctaphid::MAX_MESSAGE_SIZE, None)
        .unwrap();
    assert_eq!(reply, payload);
}

#[test]
fn test_keepalives_extend_the_wait() {
    let mut device = EchoAuthenticator::new();
    device.keepalives = 20;
    let framer = Framer::new(CID, timeouts());
    let reply = framer
        .transact(&mut device, Cmd::Ping, b"ping", 1024, None)
        .unwrap();
    assert_eq!(reply, b"ping");
}

#[test]
fn test_busy_channel() {
    let mut device = EchoAuthenticator::new();
    device.busy = true;
    let framer = Framer::new(CID, timeouts());
    assert_eq!(
        framer
            .transact(&mut device, Cmd::Cbor, &[0x04], 1024, None)
            .unwrap_err(),
        Error::ChannelBusy
    );
}

#[test]
fn test_cancel_from_another_thread() {
    let mut device = EchoAuthenticator::new();
    device.hold = true;
    let framer = Framer::new(CID, Timeouts {
        user_action: Duration::from_secs(10),
        ..timeouts()
    });

    let token = CancelToken::new();
    let remote = token.clone();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        remote.cancel();
    });

    let result = framer.transact(&mut device, Cmd::Cbor, &[0x01], 1024, Some(&token));
    canceller.join().unwrap();
    assert_eq!(result.unwrap_err(), Error::Cancelled);
}

#[test]
fn test_user_presence_never_given() {
    let mut device = EchoAuthenticator::new();
    device.hold = true;
    let framer = Framer::new(CID, timeouts());
    assert_eq!(
        framer
            .transact(&mut device, Cmd::Cbor, &[0x01], 1024, None)
            .unwrap_err(),
        Error::UserActionTimeout
    );
}
