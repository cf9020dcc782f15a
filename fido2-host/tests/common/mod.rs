//! In-process CTAP2 authenticator for session tests
//!
//! Speaks CTAPHID over [`HidDevice`] and implements enough of CTAP2 for the
//! host flows: GetInfo, ClientPIN (protocols one and two), MakeCredential
//! with packed self attestation, GetAssertion/GetNextAssertion and
//! hmac-secret. Faults (busy channel, injected status codes, a user who
//! never touches the device) are switched on through [`VirtualAuthenticator`].

#![allow(dead_code)]

use fido2_host::{DeviceSession, SessionConfig};
use fido2_host_crypto::ecdh::KeyPair;
use fido2_host_crypto::pin_protocol::pin_hash;
use fido2_host_crypto::{PinProtocol, SharedSecret, sha256};
use fido2_host_ctap::cbor::{self, MapBuilder, MapParser, TextMapBuilder, Value};
use fido2_host_ctap::cose::{self, CosePublicKey};
use fido2_host_ctap::{PublicKeyCredentialDescriptor, StatusCode, User};
use fido2_host_transport::ctaphid::{self, BROADCAST_CID};
use fido2_host_transport::{
    Cmd, Error as TransportError, HidConnector, HidDevice, Message, Packet,
    Result as TransportResult,
};

use p256::ecdsa::signature::Signer;
use p256::ecdsa::{Signature, SigningKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

pub const CID: u32 = 0x1234_5678;
pub const AAGUID: [u8; 16] = [0xA5; 16];
pub const PIN: &str = "1234";
pub const RP_ID: &str = "example.com";
pub const MAX_PIN_RETRIES: u8 = 8;

const UP: u8 = 0x01;
const UV: u8 = 0x04;
const AT: u8 = 0x40;
const ED: u8 = 0x80;

type CtapResult<T> = std::result::Result<T, StatusCode>;

/// What GetInfo reports
#[derive(Debug, Clone)]
pub struct DeviceProfile {
    pub versions: Vec<&'static str>,
    pub extensions: Vec<&'static str>,
    /// `None` leaves the clientPin option out of GetInfo
    pub client_pin: Option<bool>,
    pub pin_uv_auth_token: bool,
    pub pin_protocols: Vec<u8>,
    pub max_msg_size: Option<u32>,
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self {
            versions: vec!["FIDO_2_0", "FIDO_2_1"],
            extensions: vec!["credProtect", "hmac-secret"],
            client_pin: Some(false),
            pin_uv_auth_token: true,
            pin_protocols: vec![2, 1],
            max_msg_size: Some(1200),
        }
    }
}

impl DeviceProfile {
    /// Device with `PIN` set
    pub fn with_pin() -> Self {
        Self {
            client_pin: Some(true),
            ..Self::default()
        }
    }

    fn get_info(&self) -> CtapResult<Vec<u8>> {
        let mut options = TextMapBuilder::new()
            .insert("rk", true)
            .and_then(|m| m.insert("up", true))
            .and_then(|m| m.insert_opt("clientPin", self.client_pin))
            .map_err(|_| StatusCode::Other)?;
        if self.pin_uv_auth_token {
            options = options
                .insert("pinUvAuthToken", true)
                .map_err(|_| StatusCode::Other)?;
        }
        let mut map = MapBuilder::new()
            .insert(0x01, &self.versions)
            .and_then(|m| m.insert(0x02, &self.extensions))
            .and_then(|m| m.insert_bytes(0x03, &AAGUID))
            .map_err(|_| StatusCode::Other)?
            .insert_raw(0x04, options.build().map_err(|_| StatusCode::Other)?);
        map = map
            .insert_opt(0x05, self.max_msg_size)
            .map_err(|_| StatusCode::Other)?;
        if !self.pin_protocols.is_empty() {
            map = map
                .insert(0x06, &self.pin_protocols)
                .map_err(|_| StatusCode::Other)?;
        }
        map.build().map_err(|_| StatusCode::Other)
    }
}

struct StoredCredential {
    id: Vec<u8>,
    rp_id: String,
    user: User,
    discoverable: bool,
    key: SigningKey,
    cred_random: [u8; 32],
    sign_count: u32,
}

struct State {
    profile: DeviceProfile,
    pin: Option<String>,
    pin_retries: u8,
    key_agreement: KeyPair,
    pin_token: Option<(PinProtocol, [u8; 32])>,
    credentials: Vec<StoredCredential>,
    /// Remaining getNextAssertion responses
    next_assertions: VecDeque<Vec<u8>>,

    inbox: Vec<Packet>,
    outbox: VecDeque<Packet>,
    /// Channel of a request waiting for a touch that never comes
    waiting_for_touch: Option<u32>,

    // Fault injection
    busy_replies: usize,
    injected: VecDeque<(u8, StatusCode)>,
    hold_for_touch: bool,

    // Observations
    commands: Vec<u8>,
    client_pin_subcommands: Vec<u8>,
    last_request: Option<Vec<u8>>,
    cancels: usize,
}

/// Handle to a virtual authenticator; clones share the device
#[derive(Clone)]
pub struct VirtualAuthenticator {
    state: Arc<Mutex<State>>,
}

impl std::fmt::Debug for VirtualAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("VirtualAuthenticator")
    }
}

impl VirtualAuthenticator {
    pub fn new(profile: DeviceProfile) -> Self {
        let pin = profile.client_pin.unwrap_or(false).then(|| PIN.to_string());
        Self {
            state: Arc::new(Mutex::new(State {
                profile,
                pin,
                pin_retries: MAX_PIN_RETRIES,
                key_agreement: KeyPair::generate(),
                pin_token: None,
                credentials: Vec::new(),
                next_assertions: VecDeque::new(),
                inbox: Vec::new(),
                outbox: VecDeque::new(),
                waiting_for_touch: None,
                busy_replies: 0,
                injected: VecDeque::new(),
                hold_for_touch: false,
                commands: Vec::new(),
                client_pin_subcommands: Vec::new(),
                last_request: None,
                cancels: 0,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Answer the next `count` CBOR requests with ERR_CHANNEL_BUSY
    pub fn set_busy_replies(&self, count: usize) {
        self.state().busy_replies = count;
    }

    /// Fail the next request for `command` with `status`
    pub fn inject_status(&self, command: u8, status: StatusCode) {
        self.state().injected.push_back((command, status));
    }

    /// Never complete MakeCredential/GetAssertion, keep asking for a touch
    pub fn set_hold_for_touch(&self, hold: bool) {
        self.state().hold_for_touch = hold;
    }

    pub fn set_pin_retries(&self, retries: u8) {
        self.state().pin_retries = retries;
    }

    pub fn update_profile(&self, update: impl FnOnce(&mut DeviceProfile)) {
        update(&mut self.state().profile);
    }

    pub fn pin_retries(&self) -> u8 {
        self.state().pin_retries
    }

    /// CTAP command bytes received, in order
    pub fn commands(&self) -> Vec<u8> {
        self.state().commands.clone()
    }

    pub fn count(&self, command: u8) -> usize {
        self.state().commands.iter().filter(|&&c| c == command).count()
    }

    pub fn client_pin_subcommands(&self) -> Vec<u8> {
        self.state().client_pin_subcommands.clone()
    }

    /// Parameters of the most recent CTAP request, without the command byte
    pub fn last_request(&self) -> Option<MapParser> {
        let request = self.state().last_request.clone()?;
        MapParser::from_bytes(&request).ok()
    }

    pub fn cancels(&self) -> usize {
        self.state().cancels
    }

    pub fn credential_count(&self) -> usize {
        self.state().credentials.len()
    }
}

impl HidDevice for VirtualAuthenticator {
    fn write_packet(&mut self, packet: &Packet) -> TransportResult<()> {
        let mut state = self.state();
        if packet.is_init() && packet.cmd() == Some(Cmd::Cancel) {
            state.cancel(packet.cid());
            return Ok(());
        }
        state.inbox.push(packet.clone());
        if let Ok(message) = ctaphid::reassemble(&state.inbox) {
            state.inbox.clear();
            state.handle(message);
        }
        Ok(())
    }

    fn read_packet(&mut self, timeout: Duration) -> TransportResult<Option<Packet>> {
        {
            let mut state = self.state();
            if let Some(packet) = state.outbox.pop_front() {
                return Ok(Some(packet));
            }
            if let Some(cid) = state.waiting_for_touch {
                drop(state);
                thread::sleep(timeout.min(Duration::from_millis(5)));
                return Ok(Packet::fragment(cid, Cmd::Keepalive, &[0x02])?.pop());
            }
        }
        thread::sleep(timeout.min(Duration::from_millis(2)));
        Ok(None)
    }
}

impl State {
    fn reply(&mut self, cid: u32, cmd: Cmd, data: &[u8]) {
        match Packet::fragment(cid, cmd, data) {
            Ok(packets) => self.outbox.extend(packets),
            Err(_) => self.error(cid, 0x03),
        }
    }

    fn error(&mut self, cid: u32, code: u8) {
        self.reply(cid, Cmd::Error, &[code]);
    }

    fn cancel(&mut self, cid: u32) {
        self.cancels += 1;
        if self.waiting_for_touch.take().is_some() {
            self.reply(cid, Cmd::Cbor, &[StatusCode::KeepaliveCancel.to_u8()]);
        }
    }

    fn handle(&mut self, message: Message) {
        match message.command() {
            Some(Cmd::Init) => {
                let mut payload = message.data.clone();
                payload.extend_from_slice(&CID.to_be_bytes());
                payload.extend_from_slice(&[2, 1, 0, 0, 0x05]);
                self.reply(BROADCAST_CID, Cmd::Init, &payload);
            }
            Some(Cmd::Ping) => self.reply(message.cid, Cmd::Ping, &message.data),
            Some(Cmd::Cbor) if self.busy_replies > 0 => {
                self.busy_replies -= 1;
                self.error(message.cid, 0x06);
            }
            Some(Cmd::Cbor) => {
                if let Some(body) = self.cbor(message.cid, &message.data) {
                    self.reply(message.cid, Cmd::Cbor, &body);
                }
            }
            _ => self.error(message.cid, 0x01),
        }
    }

    /// Full CBOR response, or `None` while the user is "asked to touch"
    fn cbor(&mut self, cid: u32, request: &[u8]) -> Option<Vec<u8>> {
        let Some((&command, params)) = request.split_first() else {
            return Some(vec![StatusCode::InvalidLength.to_u8()]);
        };
        self.commands.push(command);
        self.last_request = Some(params.to_vec());

        if self.injected.front().is_some_and(|(c, _)| *c == command) {
            if let Some((_, status)) = self.injected.pop_front() {
                return Some(vec![status.to_u8()]);
            }
        }
        if self.hold_for_touch && (command == 0x01 || command == 0x02) {
            self.waiting_for_touch = Some(cid);
            return None;
        }

        let result = match command {
            0x01 => self.make_credential(params),
            0x02 => self.get_assertion(params),
            0x04 => self.profile.get_info(),
            0x06 => self.client_pin(params),
            0x08 => self
                .next_assertions
                .pop_front()
                .ok_or(StatusCode::NotAllowed),
            _ => Err(StatusCode::InvalidCommand),
        };
        Some(match result {
            Ok(body) => {
                let mut response = vec![StatusCode::Success.to_u8()];
                response.extend_from_slice(&body);
                response
            }
            Err(status) => vec![status.to_u8()],
        })
    }

    fn shared_secret(&self, protocol: PinProtocol, platform_key: Value) -> CtapResult<SharedSecret> {
        let CosePublicKey::Ec2P256 { x, y, .. } =
            CosePublicKey::from_value(platform_key).map_err(|_| StatusCode::InvalidParameter)?
        else {
            return Err(StatusCode::InvalidParameter);
        };
        let z = self
            .key_agreement
            .shared_secret_cose(&x, &y)
            .map_err(|_| StatusCode::InvalidParameter)?;
        Ok(protocol.kdf(&z))
    }

    fn client_pin(&mut self, params: &[u8]) -> CtapResult<Vec<u8>> {
        let mut parser = MapParser::from_bytes(params).map_err(|_| StatusCode::InvalidCbor)?;
        let subcommand = parser
            .get_int(0x02, "subCommand")
            .map_err(|_| StatusCode::MissingParameter)? as u8;
        self.client_pin_subcommands.push(subcommand);
        let protocol = parser
            .get_int_opt(0x01, "pinUvAuthProtocol")
            .ok()
            .flatten()
            .and_then(|p| PinProtocol::try_from(p as u8).ok());

        match subcommand {
            0x01 => MapBuilder::new()
                .insert(0x03, self.pin_retries)
                .and_then(MapBuilder::build)
                .map_err(|_| StatusCode::Other),
            0x02 => {
                protocol.ok_or(StatusCode::MissingParameter)?;
                let (x, y) = self.key_agreement.public_key_cose();
                let key = cose::key_agreement_to_cbor(&x, &y).map_err(|_| StatusCode::Other)?;
                MapBuilder::new()
                    .insert_raw(0x01, key)
                    .build()
                    .map_err(|_| StatusCode::Other)
            }
            0x05 | 0x09 => {
                let protocol = protocol.ok_or(StatusCode::MissingParameter)?;
                let Some(pin) = self.pin.clone() else {
                    return Err(StatusCode::PinNotSet);
                };
                if self.pin_retries == 0 {
                    return Err(StatusCode::PinBlocked);
                }
                let platform_key = parser.take(0x03).ok_or(StatusCode::MissingParameter)?;
                let pin_hash_enc = parser
                    .get_bytes(0x06, "pinHashEnc")
                    .map_err(|_| StatusCode::MissingParameter)?;
                if subcommand == 0x09
                    && parser
                        .get_int_opt(0x09, "permissions")
                        .ok()
                        .flatten()
                        .is_none_or(|p| p == 0)
                {
                    return Err(StatusCode::MissingParameter);
                }

                let secret = self.shared_secret(protocol, platform_key)?;
                let hash = secret
                    .decrypt(&pin_hash_enc)
                    .map_err(|_| StatusCode::PinInvalid)?;
                if hash != pin_hash(&pin).as_slice() {
                    self.pin_retries -= 1;
                    self.key_agreement = KeyPair::generate();
                    return Err(if self.pin_retries == 0 {
                        StatusCode::PinBlocked
                    } else {
                        StatusCode::PinInvalid
                    });
                }

                self.pin_retries = MAX_PIN_RETRIES;
                let token: [u8; 32] = rand::random();
                self.pin_token = Some((protocol, token));
                let encrypted = secret.encrypt(&token).map_err(|_| StatusCode::Other)?;
                MapBuilder::new()
                    .insert_bytes(0x02, &encrypted)
                    .and_then(MapBuilder::build)
                    .map_err(|_| StatusCode::Other)
            }
            _ => Err(StatusCode::InvalidSubcommand),
        }
    }

    /// UV flag for a request carrying pinUvAuthParam
    fn verify_pin_auth(&self, parser: &MapParser, param_key: i64, cdh: &[u8]) -> CtapResult<u8> {
        let Some(param) = parser.get_bytes_opt(param_key, "pinUvAuthParam").ok().flatten() else {
            return Ok(0);
        };
        let Some((protocol, token)) = &self.pin_token else {
            return Err(StatusCode::PinAuthInvalid);
        };
        if protocol.authenticate(token, cdh) != param {
            return Err(StatusCode::PinAuthInvalid);
        }
        Ok(UV)
    }

    fn make_credential(&mut self, params: &[u8]) -> CtapResult<Vec<u8>> {
        let parser = MapParser::from_bytes(params).map_err(|_| StatusCode::InvalidCbor)?;
        let cdh = parser
            .get_bytes(0x01, "clientDataHash")
            .map_err(|_| StatusCode::MissingParameter)?;
        let rp = parser.require(0x02, "rp").map_err(|_| StatusCode::MissingParameter)?;
        let rp_id = text_member(rp, "id").ok_or(StatusCode::MissingParameter)?;
        let user = parser
            .require(0x03, "user")
            .and_then(User::from_value)
            .map_err(|_| StatusCode::MissingParameter)?;

        let algorithms = parser
            .require(0x04, "pubKeyCredParams")
            .and_then(|v| cbor::as_array(v, "pubKeyCredParams"))
            .map_err(|_| StatusCode::MissingParameter)?;
        let es256 = algorithms.iter().any(|param| {
            member(param, "alg").and_then(|alg| cbor::as_int(alg, "alg").ok()) == Some(-7)
        });
        if !es256 {
            return Err(StatusCode::UnsupportedAlgorithm);
        }

        if let Some(Value::Array(excluded)) = parser.get(0x05) {
            for descriptor in excluded {
                let descriptor = PublicKeyCredentialDescriptor::from_value(descriptor)
                    .map_err(|_| StatusCode::CborUnexpectedType)?;
                if self.credentials.iter().any(|c| c.id == descriptor.id) {
                    return Err(StatusCode::CredentialExcluded);
                }
            }
        }

        let uv = self.verify_pin_auth(&parser, 0x08, &cdh)?;
        let discoverable = parser
            .get(0x07)
            .and_then(|opts| member(opts, "rk"))
            .is_some_and(|rk| matches!(rk, Value::Bool(true)));

        let mut outputs = TextMapBuilder::new();
        if let Some(extensions) = parser.get(0x06) {
            if matches!(member(extensions, "hmac-secret"), Some(Value::Bool(true))) {
                outputs = outputs.insert("hmac-secret", true).map_err(|_| StatusCode::Other)?;
            }
            if let Some(level) = member(extensions, "credProtect") {
                let level = cbor::as_int(level, "credProtect").map_err(|_| StatusCode::InvalidOption)?;
                outputs = outputs.insert("credProtect", level).map_err(|_| StatusCode::Other)?;
            }
        }

        let key = SigningKey::random(&mut rand::rngs::OsRng);
        let point = key.verifying_key().as_affine().to_encoded_point(false);
        let (Some(x), Some(y)) = (point.x(), point.y()) else {
            return Err(StatusCode::Other);
        };
        let public_key = CosePublicKey::Ec2P256 {
            alg: Some(-7),
            x: (*x).into(),
            y: (*y).into(),
        }
        .to_cbor()
        .map_err(|_| StatusCode::Other)?;

        let id: [u8; 16] = rand::random();
        let mut auth_data = Vec::new();
        auth_data.extend_from_slice(&sha256(rp_id.as_bytes()));
        let ed = if outputs.is_empty() { 0 } else { ED };
        auth_data.push(UP | uv | AT | ed);
        auth_data.extend_from_slice(&0u32.to_be_bytes());
        auth_data.extend_from_slice(&AAGUID);
        auth_data.extend_from_slice(&(id.len() as u16).to_be_bytes());
        auth_data.extend_from_slice(&id);
        auth_data.extend_from_slice(&public_key);
        if !outputs.is_empty() {
            auth_data.extend_from_slice(&outputs.build().map_err(|_| StatusCode::Other)?);
        }

        let mut signed = auth_data.clone();
        signed.extend_from_slice(&cdh);
        let signature: Signature = key.sign(&signed);
        let att_stmt = TextMapBuilder::new()
            .insert("alg", -7)
            .and_then(|m| m.insert_bytes("sig", signature.to_der().as_bytes()))
            .and_then(TextMapBuilder::build)
            .map_err(|_| StatusCode::Other)?;

        self.credentials.push(StoredCredential {
            id: id.to_vec(),
            rp_id: rp_id.to_string(),
            user,
            discoverable,
            key,
            cred_random: rand::random(),
            sign_count: 0,
        });

        MapBuilder::new()
            .insert(0x01, "packed")
            .and_then(|m| m.insert_bytes(0x02, &auth_data))
            .map(|m| m.insert_raw(0x03, att_stmt))
            .and_then(MapBuilder::build)
            .map_err(|_| StatusCode::Other)
    }

    fn get_assertion(&mut self, params: &[u8]) -> CtapResult<Vec<u8>> {
        self.next_assertions.clear();
        let mut parser = MapParser::from_bytes(params).map_err(|_| StatusCode::InvalidCbor)?;
        let rp_id = parser
            .get_text_opt(0x01, "rpId")
            .ok()
            .flatten()
            .ok_or(StatusCode::MissingParameter)?;
        let cdh = parser
            .get_bytes(0x02, "clientDataHash")
            .map_err(|_| StatusCode::MissingParameter)?;
        let allow_list: Vec<Vec<u8>> = match parser.get(0x03) {
            Some(Value::Array(items)) => items
                .iter()
                .map(|d| PublicKeyCredentialDescriptor::from_value(d).map(|d| d.id))
                .collect::<Result<_, _>>()
                .map_err(|_| StatusCode::CborUnexpectedType)?,
            _ => Vec::new(),
        };
        let uv = self.verify_pin_auth(&parser, 0x06, &cdh)?;

        // Salts decrypted once; outputs differ per credential
        let salts = match parser.take(0x04) {
            Some(extensions) => match member(&extensions, "hmac-secret") {
                Some(input) => Some(self.hmac_secret_salts(input.clone())?),
                None => None,
            },
            None => None,
        };

        let matching: Vec<usize> = self
            .credentials
            .iter()
            .enumerate()
            .filter(|(_, c)| c.rp_id == rp_id)
            .filter(|(_, c)| {
                if allow_list.is_empty() {
                    c.discoverable
                } else {
                    allow_list.contains(&c.id)
                }
            })
            .map(|(i, _)| i)
            .collect();
        if matching.is_empty() {
            return Err(StatusCode::NoCredentials);
        }

        let total = matching.len();
        let mut responses = Vec::with_capacity(total);
        for (n, index) in matching.into_iter().enumerate() {
            let count = (n == 0 && total > 1).then_some(total);
            let with_user = allow_list.is_empty();
            responses.push(self.assertion(index, &rp_id, &cdh, uv, salts.as_ref(), count, with_user)?);
        }
        let first = responses.remove(0);
        self.next_assertions = responses.into();
        Ok(first)
    }

    /// Decrypted salts plus the secret to encrypt the output with
    fn hmac_secret_salts(&self, input: Value) -> CtapResult<(SharedSecret, Vec<u8>)> {
        let mut input = MapParser::from_value(input).map_err(|_| StatusCode::InvalidCbor)?;
        let protocol = input
            .get_int_opt(0x04, "pinUvAuthProtocol")
            .ok()
            .flatten()
            .map_or(Ok(PinProtocol::V1), |p| PinProtocol::try_from(p as u8))
            .map_err(|_| StatusCode::InvalidParameter)?;
        let key = input.take(0x01).ok_or(StatusCode::MissingParameter)?;
        let salt_enc = input
            .get_bytes(0x02, "saltEnc")
            .map_err(|_| StatusCode::MissingParameter)?;
        let salt_auth = input
            .get_bytes(0x03, "saltAuth")
            .map_err(|_| StatusCode::MissingParameter)?;

        let secret = self.shared_secret(protocol, key)?;
        if !secret.verify(&salt_enc, &salt_auth) {
            return Err(StatusCode::PinAuthInvalid);
        }
        let salts = secret
            .decrypt(&salt_enc)
            .map_err(|_| StatusCode::InvalidLength)?;
        if salts.len() != 32 && salts.len() != 64 {
            return Err(StatusCode::InvalidLength);
        }
        Ok((secret, salts))
    }

    #[allow(clippy::too_many_arguments)]
    fn assertion(
        &mut self,
        index: usize,
        rp_id: &str,
        cdh: &[u8],
        uv: u8,
        salts: Option<&(SharedSecret, Vec<u8>)>,
        number_of_credentials: Option<usize>,
        with_user: bool,
    ) -> CtapResult<Vec<u8>> {
        let credential = &mut self.credentials[index];
        credential.sign_count += 1;

        let mut outputs = TextMapBuilder::new();
        if let Some((secret, salts)) = salts {
            let mut output = Vec::with_capacity(salts.len());
            for salt in salts.chunks(32) {
                let mut input = credential.cred_random.to_vec();
                input.extend_from_slice(salt);
                output.extend_from_slice(&sha256(&input));
            }
            let encrypted = secret.encrypt(&output).map_err(|_| StatusCode::Other)?;
            outputs = outputs
                .insert_bytes("hmac-secret", &encrypted)
                .map_err(|_| StatusCode::Other)?;
        }

        let mut auth_data = Vec::new();
        auth_data.extend_from_slice(&sha256(rp_id.as_bytes()));
        let ed = if outputs.is_empty() { 0 } else { ED };
        auth_data.push(UP | uv | ed);
        auth_data.extend_from_slice(&credential.sign_count.to_be_bytes());
        if !outputs.is_empty() {
            auth_data.extend_from_slice(&outputs.build().map_err(|_| StatusCode::Other)?);
        }

        let mut signed = auth_data.clone();
        signed.extend_from_slice(cdh);
        let signature: Signature = credential.key.sign(&signed);

        let descriptor = PublicKeyCredentialDescriptor::new(credential.id.clone())
            .to_cbor()
            .map_err(|_| StatusCode::Other)?;
        let mut map = MapBuilder::new()
            .insert_raw(0x01, descriptor)
            .insert_bytes(0x02, &auth_data)
            .and_then(|m| m.insert_bytes(0x03, signature.to_der().as_bytes()))
            .map_err(|_| StatusCode::Other)?;
        if with_user {
            map = map.insert_raw(0x04, credential.user.to_cbor().map_err(|_| StatusCode::Other)?);
        }
        map.insert_opt(0x05, number_of_credentials)
            .and_then(MapBuilder::build)
            .map_err(|_| StatusCode::Other)
    }
}

fn member<'a>(map: &'a Value, name: &str) -> Option<&'a Value> {
    match map {
        Value::Map(entries) => entries.iter().find_map(|(k, v)| match k {
            Value::Text(key) if key == name => Some(v),
            _ => None,
        }),
        _ => None,
    }
}

fn text_member<'a>(map: &'a Value, name: &str) -> Option<&'a str> {
    match member(map, name)? {
        Value::Text(text) => Some(text),
        _ => None,
    }
}

/// Opens the one virtual device at path "virtual"
pub struct VirtualConnector(pub VirtualAuthenticator);

impl HidConnector for VirtualConnector {
    type Device = VirtualAuthenticator;

    fn open(&self, path: &str) -> TransportResult<VirtualAuthenticator> {
        if path == "virtual" {
            Ok(self.0.clone())
        } else {
            Err(TransportError::DeviceNotFound)
        }
    }
}

/// Short timeouts so failure paths finish quickly
pub fn test_config() -> SessionConfig {
    SessionConfig::builder()
        .transaction_timeout(Duration::from_millis(500))
        .user_action_timeout(Duration::from_millis(200))
        .cancel_drain_timeout(Duration::from_millis(50))
        .poll_interval(Duration::from_millis(5))
        .initial_backoff(Duration::from_millis(1))
        .build()
}

pub fn open(profile: DeviceProfile) -> (DeviceSession<VirtualAuthenticator>, VirtualAuthenticator) {
    let device = VirtualAuthenticator::new(profile);
    let session = DeviceSession::open(&VirtualConnector(device.clone()), "virtual", test_config())
        .expect("open virtual authenticator");
    (session, device)
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
