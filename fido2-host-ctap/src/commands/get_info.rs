//! authenticatorGetInfo (0x04)
//!
//! Spec: <https://fidoalliance.org/specs/fido-v2.2-rd-20230321/fido-client-to-authenticator-protocol-v2.2-rd-20230321.html#authenticatorGetInfo>

use super::{Command, CommandCode};
use crate::cbor::{self, MapParser, Value};
use crate::error::{CodecError, Result};

use std::collections::{BTreeMap, BTreeSet};

/// GetInfo response keys
pub mod keys {
    pub const VERSIONS: i64 = 0x01;
    pub const EXTENSIONS: i64 = 0x02;
    pub const AAGUID: i64 = 0x03;
    pub const OPTIONS: i64 = 0x04;
    pub const MAX_MSG_SIZE: i64 = 0x05;
    pub const PIN_UV_AUTH_PROTOCOLS: i64 = 0x06;
    pub const MAX_CREDENTIAL_COUNT_IN_LIST: i64 = 0x07;
    pub const MAX_CREDENTIAL_ID_LENGTH: i64 = 0x08;
    pub const TRANSPORTS: i64 = 0x09;
    pub const ALGORITHMS: i64 = 0x0A;
    pub const FORCE_PIN_CHANGE: i64 = 0x0C;
    pub const MIN_PIN_LENGTH: i64 = 0x0D;
    pub const FIRMWARE_VERSION: i64 = 0x0E;
    pub const REMAINING_DISCOVERABLE_CREDENTIALS: i64 = 0x14;
}

/// Parameterless GetInfo request
#[derive(Debug, Clone, Copy, Default)]
pub struct GetInfo;

impl Command for GetInfo {
    const CODE: CommandCode = CommandCode::GetInfo;
    type Response = AuthenticatorInfo;

    fn parameters(&self) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    fn decode_response(body: &[u8]) -> Result<AuthenticatorInfo> {
        AuthenticatorInfo::from_cbor(body)
    }
}

/// An authenticator option as reported by GetInfo
///
/// CTAP gives absence its own meaning (usually "not supported"), distinct
/// from present-and-false ("supported, not configured").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum OptionState {
    #[default]
    Absent,
    Disabled,
    Enabled,
}

impl OptionState {
    pub fn is_enabled(self) -> bool {
        self == Self::Enabled
    }

    pub fn is_present(self) -> bool {
        self != Self::Absent
    }
}

impl From<Option<bool>> for OptionState {
    fn from(value: Option<bool>) -> Self {
        match value {
            None => Self::Absent,
            Some(false) => Self::Disabled,
            Some(true) => Self::Enabled,
        }
    }
}

macro_rules! known_options {
    ($($field:ident => $name:literal,)+) => {
        /// The options map, with every option this library knows typed
        #[derive(Debug, Clone, Default, PartialEq, Eq)]
        pub struct AuthenticatorOptions {
            $(pub $field: OptionState,)+
            /// Options this library does not interpret, kept verbatim
            pub unknown: BTreeMap<String, bool>,
        }

        impl AuthenticatorOptions {
            fn slot(&mut self, name: &str) -> Option<&mut OptionState> {
                match name {
                    $($name => Some(&mut self.$field),)+
                    _ => None,
                }
            }

            /// Look an option up by its wire name, known or not
            pub fn get(&self, name: &str) -> OptionState {
                match name {
                    $($name => self.$field,)+
                    _ => self.unknown.get(name).copied().into(),
                }
            }
        }
    };
}

known_options! {
    plat => "plat",
    rk => "rk",
    client_pin => "clientPin",
    up => "up",
    uv => "uv",
    pin_uv_auth_token => "pinUvAuthToken",
    no_mc_ga_permissions_with_client_pin => "noMcGaPermissionsWithClientPin",
    cred_mgmt => "credMgmt",
    bio_enroll => "bioEnroll",
    large_blobs => "largeBlobs",
    ep => "ep",
    always_uv => "alwaysUv",
    make_cred_uv_not_rqd => "makeCredUvNotRqd",
}

impl AuthenticatorOptions {
    pub fn from_value(value: &Value) -> Result<Self> {
        let mut options = Self::default();
        for (name, v) in cbor::text_map_entries(value, "options")? {
            match options.slot(name) {
                Some(state) => *state = Some(cbor::as_bool(v, "option value")?).into(),
                None => match v {
                    Value::Bool(b) => {
                        options.unknown.insert(name.to_owned(), *b);
                    }
                    _ => log::debug!("ignoring non-boolean option {name:?}"),
                },
            }
        }
        Ok(options)
    }
}

/// Decoded GetInfo response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthenticatorInfo {
    pub versions: BTreeSet<String>,
    pub extensions: BTreeSet<String>,
    pub aaguid: [u8; 16],
    pub options: AuthenticatorOptions,
    pub max_msg_size: Option<u32>,
    /// Device preference order
    pub pin_uv_auth_protocols: Vec<u8>,
    pub max_credential_count_in_list: Option<u32>,
    pub max_credential_id_length: Option<u32>,
    pub transports: Vec<String>,
    /// COSE identifiers from the algorithms list
    pub algorithms: Vec<i64>,
    pub force_pin_change: bool,
    pub min_pin_length: Option<u32>,
    pub firmware_version: Option<u64>,
    pub remaining_discoverable_credentials: Option<u32>,
}

fn text_set(parser: &MapParser, key: i64, field: &'static str) -> Result<BTreeSet<String>> {
    match parser.get(key) {
        Some(v) => cbor::as_array(v, field)?
            .iter()
            .map(|s| cbor::as_text(s, field).map(str::to_owned))
            .collect(),
        None => Ok(BTreeSet::new()),
    }
}

fn uint<T: TryFrom<i64>>(parser: &MapParser, key: i64, field: &'static str) -> Result<Option<T>> {
    parser
        .get_int_opt(key, field)?
        .map(|v| T::try_from(v).map_err(|_| CodecError::UnexpectedType(field)))
        .transpose()
}

impl AuthenticatorInfo {
    pub fn from_cbor(data: &[u8]) -> Result<Self> {
        let parser = MapParser::from_bytes(data)?;

        let versions = text_set(&parser, keys::VERSIONS, "versions")?;
        if versions.is_empty() {
            return Err(CodecError::Malformed("GetInfo without versions".into()));
        }

        let aaguid_bytes = parser.get_bytes(keys::AAGUID, "aaguid")?;
        let aaguid: [u8; 16] = aaguid_bytes
            .as_slice()
            .try_into()
            .map_err(|_| CodecError::Malformed(format!("aaguid is {} bytes", aaguid_bytes.len())))?;

        let options = match parser.get(keys::OPTIONS) {
            Some(v) => AuthenticatorOptions::from_value(v)?,
            None => AuthenticatorOptions::default(),
        };

        let pin_uv_auth_protocols = match parser.get(keys::PIN_UV_AUTH_PROTOCOLS) {
            Some(v) => cbor::as_array(v, "pinUvAuthProtocols")?
                .iter()
                .map(|p| {
                    let p = cbor::as_int(p, "pinUvAuthProtocols")?;
                    u8::try_from(p).map_err(|_| CodecError::UnexpectedType("pinUvAuthProtocols"))
                })
                .collect::<Result<Vec<_>>>()?,
            None => Vec::new(),
        };

        let transports = text_set(&parser, keys::TRANSPORTS, "transports")?
            .into_iter()
            .collect();

        // Entries are {"alg": int, "type": "public-key"}; other types are skipped
        let mut algorithms = Vec::new();
        if let Some(v) = parser.get(keys::ALGORITHMS) {
            for entry in cbor::as_array(v, "algorithms")? {
                let mut alg = None;
                let mut public_key = false;
                for (name, member) in cbor::text_map_entries(entry, "algorithm")? {
                    match name {
                        "alg" => alg = Some(cbor::as_int(member, "algorithm.alg")?),
                        "type" => public_key = cbor::as_text(member, "algorithm.type")? == "public-key",
                        _ => {}
                    }
                }
                if let (Some(alg), true) = (alg, public_key) {
                    algorithms.push(alg);
                }
            }
        }

        Ok(Self {
            versions,
            extensions: text_set(&parser, keys::EXTENSIONS, "extensions")?,
            aaguid,
            options,
            max_msg_size: uint(&parser, keys::MAX_MSG_SIZE, "maxMsgSize")?,
            pin_uv_auth_protocols,
            max_credential_count_in_list: uint(
                &parser,
                keys::MAX_CREDENTIAL_COUNT_IN_LIST,
                "maxCredentialCountInList",
            )?,
            max_credential_id_length: uint(
                &parser,
                keys::MAX_CREDENTIAL_ID_LENGTH,
                "maxCredentialIdLength",
            )?,
            transports,
            algorithms,
            force_pin_change: parser
                .get_bool_opt(keys::FORCE_PIN_CHANGE, "forcePINChange")?
                .unwrap_or(false),
            min_pin_length: uint(&parser, keys::MIN_PIN_LENGTH, "minPINLength")?,
            firmware_version: uint(&parser, keys::FIRMWARE_VERSION, "firmwareVersion")?,
            remaining_discoverable_credentials: uint(
                &parser,
                keys::REMAINING_DISCOVERABLE_CREDENTIALS,
                "remainingDiscoverableCredentials",
            )?,
        })
    }
}
