//! CTAPHID packet layer
//!
//! Packet Format:
//! - Initialization packet: CID(4) + CMD(1) + BCNT(2) + DATA(57)
//! - Continuation packet: CID(4) + SEQ(1) + DATA(59)
//!
//! Spec: <https://fidoalliance.org/specs/fido-v2.2-rd-20230321/fido-client-to-authenticator-protocol-v2.2-rd-20230321.html#usb-hid-framing>

use crate::error::{Error, Result};

/// HID report size
pub const PACKET_SIZE: usize = 64;

/// Largest payload one init packet plus 128 continuations can carry
pub const MAX_MESSAGE_SIZE: usize = INIT_PACKET_DATA_SIZE + MAX_CONTINUATIONS * CONT_PACKET_DATA_SIZE;

/// Channel used for INIT before a CID has been allocated
pub const BROADCAST_CID: u32 = 0xFFFFFFFF;

/// 64 - 4 CID - 1 CMD - 2 BCNT
const INIT_PACKET_DATA_SIZE: usize = 57;

/// 64 - 4 CID - 1 SEQ
const CONT_PACKET_DATA_SIZE: usize = 59;

/// SEQ runs 0..=127
const MAX_CONTINUATIONS: usize = 128;

const TYPE_INIT: u8 = 0x80;

/// CTAPHID commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Cmd {
    /// Transaction that echoes the data back
    Ping = 0x01,

    /// Encapsulated CTAP1/U2F message
    Msg = 0x03,

    /// Place an exclusive lock for one channel
    Lock = 0x04,

    /// Allocate a new CID or synchronize channel
    Init = 0x06,

    /// Request authenticator to provide visual/audible identification
    Wink = 0x08,

    /// Encapsulated CTAP CBOR encoded message
    Cbor = 0x10,

    /// Cancel any outstanding requests on the given CID
    Cancel = 0x11,

    /// The request is still being processed
    Keepalive = 0x3B,

    /// Error response message
    Error = 0x3F,
}

impl Cmd {
    /// Command from the CMD byte, TYPE bit ignored
    pub fn from_u8(value: u8) -> Option<Self> {
        match value & !TYPE_INIT {
            0x01 => Some(Cmd::Ping),
            0x03 => Some(Cmd::Msg),
            0x04 => Some(Cmd::Lock),
            0x06 => Some(Cmd::Init),
            0x08 => Some(Cmd::Wink),
            0x10 => Some(Cmd::Cbor),
            0x11 => Some(Cmd::Cancel),
            0x3B => Some(Cmd::Keepalive),
            0x3F => Some(Cmd::Error),
            _ => None,
        }
    }

    /// CMD byte with the TYPE bit set
    pub fn to_u8_init(self) -> u8 {
        (self as u8) | TYPE_INIT
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// CTAPHID_ERROR codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorCode {
    InvalidCmd = 0x01,
    InvalidPar = 0x02,
    InvalidLen = 0x03,
    InvalidSeq = 0x04,
    MsgTimeout = 0x05,
    ChannelBusy = 0x06,
    LockRequired = 0x0A,
    InvalidChannel = 0x0B,
    Other = 0x7F,
}

impl ErrorCode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::InvalidCmd),
            0x02 => Some(Self::InvalidPar),
            0x03 => Some(Self::InvalidLen),
            0x04 => Some(Self::InvalidSeq),
            0x05 => Some(Self::MsgTimeout),
            0x06 => Some(Self::ChannelBusy),
            0x0A => Some(Self::LockRequired),
            0x0B => Some(Self::InvalidChannel),
            0x7F => Some(Self::Other),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// Map a CTAPHID_ERROR payload byte to a transport error
pub fn error_from_code(code: u8) -> Error {
    match ErrorCode::from_u8(code) {
        Some(ErrorCode::ChannelBusy) => Error::ChannelBusy,
        Some(ErrorCode::MsgTimeout) => Error::Timeout,
        Some(ErrorCode::InvalidSeq) => Error::InvalidSequence,
        Some(ErrorCode::InvalidChannel) => Error::InvalidChannel,
        _ => Error::Device(code),
    }
}

/// CTAPHID_KEEPALIVE status byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KeepaliveStatus {
    Processing = 0x01,
    UpNeeded = 0x02,
}

impl KeepaliveStatus {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Processing),
            0x02 => Some(Self::UpNeeded),
            _ => None,
        }
    }
}

/// Capability flags from the INIT response
pub mod capability {
    pub const WINK: u8 = 0x01;
    pub const CBOR: u8 = 0x04;
    /// Device does not implement CTAPHID_MSG
    pub const NMSG: u8 = 0x08;
}

/// A single 64-byte HID packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    data: [u8; PACKET_SIZE],
}

impl Packet {
    pub fn from_bytes(data: [u8; PACKET_SIZE]) -> Self {
        Self { data }
    }

    /// Packet from a slice of exactly 64 bytes
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        let data: [u8; PACKET_SIZE] = data.try_into().map_err(|_| Error::InvalidPacket)?;
        Ok(Self { data })
    }

    pub fn as_bytes(&self) -> &[u8; PACKET_SIZE] {
        &self.data
    }

    pub fn cid(&self) -> u32 {
        u32::from_be_bytes([self.data[0], self.data[1], self.data[2], self.data[3]])
    }

    pub fn is_init(&self) -> bool {
        self.data[4] & TYPE_INIT != 0
    }

    /// Raw CMD byte without the TYPE bit (init packets only)
    pub fn cmd_byte(&self) -> Option<u8> {
        self.is_init().then_some(self.data[4] & !TYPE_INIT)
    }

    pub fn cmd(&self) -> Option<Cmd> {
        self.cmd_byte().and_then(Cmd::from_u8)
    }

    /// BCNT (init packets only)
    pub fn payload_len(&self) -> Option<u16> {
        self.is_init()
            .then(|| u16::from_be_bytes([self.data[5], self.data[6]]))
    }

    /// SEQ (continuation packets only)
    pub fn seq(&self) -> Option<u8> {
        (!self.is_init()).then_some(self.data[4])
    }

    pub fn payload(&self) -> &[u8] {
        if self.is_init() {
            &self.data[7..]
        } else {
            &self.data[5..]
        }
    }

    fn header(cid: u32, fifth: u8) -> [u8; PACKET_SIZE] {
        let mut data = [0u8; PACKET_SIZE];
        data[0..4].copy_from_slice(&cid.to_be_bytes());
        data[4] = fifth;
        data
    }

    /// Split a message into an init packet and its continuations
    pub fn fragment(cid: u32, cmd: Cmd, data: &[u8]) -> Result<Vec<Self>> {
        if data.len() > MAX_MESSAGE_SIZE {
            return Err(Error::MessageTooLarge {
                size: data.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }

        let first = data.len().min(INIT_PACKET_DATA_SIZE);
        let mut init = Self::header(cid, cmd.to_u8_init());
        init[5..7].copy_from_slice(&(data.len() as u16).to_be_bytes());
        init[7..7 + first].copy_from_slice(&data[..first]);

        let mut packets = Vec::with_capacity(1 + (data.len() - first).div_ceil(CONT_PACKET_DATA_SIZE));
        packets.push(Self::from_bytes(init));

        for (seq, chunk) in data[first..].chunks(CONT_PACKET_DATA_SIZE).enumerate() {
            let mut cont = Self::header(cid, seq as u8);
            cont[5..5 + chunk.len()].copy_from_slice(chunk);
            packets.push(Self::from_bytes(cont));
        }

        Ok(packets)
    }

    /// CTAPHID_CANCEL, which carries no payload
    pub fn cancel(cid: u32) -> Self {
        Self::from_bytes(Self::header(cid, Cmd::Cancel.to_u8_init()))
    }
}

/// A complete CTAPHID message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub cid: u32,
    /// CMD byte without the TYPE bit; unknown commands are kept raw
    pub cmd: u8,
    pub data: Vec<u8>,
}

impl Message {
    pub fn new(cid: u32, cmd: Cmd, data: Vec<u8>) -> Self {
        Self {
            cid,
            cmd: cmd.to_u8(),
            data,
        }
    }

    pub fn command(&self) -> Option<Cmd> {
        Cmd::from_u8(self.cmd)
    }

    pub fn to_packets(&self) -> Result<Vec<Packet>> {
        let cmd = self.command().ok_or(Error::InvalidCommand(self.cmd))?;
        Packet::fragment(self.cid, cmd, &self.data)
    }
}

/// Incremental reassembly of one message on one channel
#[derive(Debug)]
pub struct Reassembler {
    cid: u32,
    cmd: u8,
    expected_len: usize,
    data: Vec<u8>,
    next_seq: u8,
}

impl Reassembler {
    /// Begin with an init packet
    pub fn start(packet: &Packet) -> Result<Self> {
        let cmd = packet.cmd_byte().ok_or(Error::InvalidSequence)?;
        let expected_len = packet.payload_len().ok_or(Error::InvalidPacket)? as usize;
        if expected_len > MAX_MESSAGE_SIZE {
            return Err(Error::MessageTooLarge {
                size: expected_len,
                max: MAX_MESSAGE_SIZE,
            });
        }

        let mut data = Vec::with_capacity(expected_len);
        let first = expected_len.min(INIT_PACKET_DATA_SIZE);
        data.extend_from_slice(&packet.payload()[..first]);

        Ok(Self {
            cid: packet.cid(),
            cmd,
            expected_len,
            data,
            next_seq: 0,
        })
    }

    /// Add the next continuation packet
    pub fn push(&mut self, packet: &Packet) -> Result<()> {
        if packet.cid() != self.cid {
            return Err(Error::InvalidChannel);
        }
        let seq = packet.seq().ok_or(Error::InvalidSequence)?;
        if seq != self.next_seq || self.is_complete() {
            return Err(Error::InvalidSequence);
        }

        let take = (self.expected_len - self.data.len()).min(CONT_PACKET_DATA_SIZE);
        self.data.extend_from_slice(&packet.payload()[..take]);
        self.next_seq = self.next_seq.wrapping_add(1);
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.data.len() >= self.expected_len
    }

    pub fn finish(self) -> Result<Message> {
        if !self.is_complete() {
            return Err(Error::InvalidSequence);
        }
        Ok(Message {
            cid: self.cid,
            cmd: self.cmd,
            data: self.data,
        })
    }
}

/// Reassemble a message from a complete packet list
pub fn reassemble(packets: &[Packet]) -> Result<Message> {
    let (first, rest) = packets.split_first().ok_or(Error::InvalidPacket)?;
    let mut assembly = Reassembler::start(first)?;
    for packet in rest {
        assembly.push(packet)?;
    }
    assembly.finish()
}

/// Device details from the CTAPHID_INIT response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CtapHidInfo {
    /// Allocated channel
    pub cid: u32,
    pub protocol_version: u8,
    pub major_version: u8,
    pub minor_version: u8,
    pub build_version: u8,
    pub capabilities: u8,
}

impl CtapHidInfo {
    /// INIT response length: nonce(8) CID(4) proto major minor build caps
    pub const LEN: usize = 17;

    /// Parse an INIT payload, checking the nonce echo
    pub fn parse(payload: &[u8], nonce: &[u8; 8]) -> Result<Self> {
        if payload.len() < Self::LEN {
            return Err(Error::InvalidInitResponse("short payload"));
        }
        if payload[..8] != nonce[..] {
            return Err(Error::InvalidInitResponse("nonce mismatch"));
        }
        let cid = u32::from_be_bytes([payload[8], payload[9], payload[10], payload[11]]);
        if cid == 0 || cid == BROADCAST_CID {
            return Err(Error::InvalidInitResponse("reserved channel id"));
        }
        Ok(Self {
            cid,
            protocol_version: payload[12],
            major_version: payload[13],
            minor_version: payload[14],
            build_version: payload[15],
            capabilities: payload[16],
        })
    }

    pub fn has_wink(&self) -> bool {
        self.capabilities & capability::WINK != 0
    }

    pub fn has_cbor(&self) -> bool {
        self.capabilities & capability::CBOR != 0
    }

    pub fn has_msg(&self) -> bool {
        self.capabilities & capability::NMSG == 0
    }
}
