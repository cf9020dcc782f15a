//! authenticatorMakeCredential (0x01)
//!
//! Spec: <https://fidoalliance.org/specs/fido-v2.2-rd-20230321/fido-client-to-authenticator-protocol-v2.2-rd-20230321.html#authenticatorMakeCredential>

use super::{Command, CommandCode};
use crate::auth_data::AuthenticatorData;
use crate::cbor::{self, MapBuilder, MapParser, TextMapBuilder, Value};
use crate::error::{CodecError, Result};
use crate::extensions::MakeCredentialExtensions;
use crate::types::{
    self, CoseAlgorithm, PublicKeyCredentialDescriptor, RelyingParty, User,
};

/// Request parameter keys
pub mod req_keys {
    pub const CLIENT_DATA_HASH: i64 = 0x01;
    pub const RP: i64 = 0x02;
    pub const USER: i64 = 0x03;
    pub const PUB_KEY_CRED_PARAMS: i64 = 0x04;
    pub const EXCLUDE_LIST: i64 = 0x05;
    pub const EXTENSIONS: i64 = 0x06;
    pub const OPTIONS: i64 = 0x07;
    pub const PIN_UV_AUTH_PARAM: i64 = 0x08;
    pub const PIN_UV_AUTH_PROTOCOL: i64 = 0x09;
}

/// Response keys
pub mod resp_keys {
    pub const FMT: i64 = 0x01;
    pub const AUTH_DATA: i64 = 0x02;
    pub const ATT_STMT: i64 = 0x03;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MakeCredential {
    pub client_data_hash: [u8; 32],
    pub rp: RelyingParty,
    pub user: User,
    /// Caller preference order
    pub algorithms: Vec<CoseAlgorithm>,
    pub exclude_list: Vec<PublicKeyCredentialDescriptor>,
    pub extensions: MakeCredentialExtensions,
    /// `rk` option, omitted when `None`
    pub resident_key: Option<bool>,
    /// `uv` option, omitted when `None`
    pub user_verification: Option<bool>,
    pub pin_uv_auth_param: Option<Vec<u8>>,
    pub pin_uv_auth_protocol: Option<u8>,
}

impl MakeCredential {
    pub fn new(client_data_hash: [u8; 32], rp: RelyingParty, user: User) -> Self {
        Self {
            client_data_hash,
            rp,
            user,
            algorithms: vec![CoseAlgorithm::ES256],
            exclude_list: Vec::new(),
            extensions: MakeCredentialExtensions::default(),
            resident_key: None,
            user_verification: None,
            pin_uv_auth_param: None,
            pin_uv_auth_protocol: None,
        }
    }

    fn options_cbor(&self) -> Result<Option<Vec<u8>>> {
        let options = TextMapBuilder::new()
            .insert_opt("rk", self.resident_key)?
            .insert_opt("uv", self.user_verification)?;
        if options.is_empty() {
            return Ok(None);
        }
        options.build().map(Some)
    }
}

impl Command for MakeCredential {
    const CODE: CommandCode = CommandCode::MakeCredential;
    type Response = MakeCredentialResponse;

    fn parameters(&self) -> Result<Option<Vec<u8>>> {
        let mut map = MapBuilder::new()
            .insert_bytes(req_keys::CLIENT_DATA_HASH, &self.client_data_hash)?
            .insert_raw(req_keys::RP, self.rp.to_cbor()?)
            .insert_raw(req_keys::USER, self.user.to_cbor()?)
            .insert_raw(
                req_keys::PUB_KEY_CRED_PARAMS,
                types::credential_params_to_cbor(&self.algorithms)?,
            );

        if !self.exclude_list.is_empty() {
            map = map.insert_raw(
                req_keys::EXCLUDE_LIST,
                types::descriptor_list_to_cbor(&self.exclude_list)?,
            );
        }
        if let Some(ext) = self.extensions.to_cbor()? {
            map = map.insert_raw(req_keys::EXTENSIONS, ext);
        }
        if let Some(options) = self.options_cbor()? {
            map = map.insert_raw(req_keys::OPTIONS, options);
        }
        if let Some(param) = &self.pin_uv_auth_param {
            map = map.insert_bytes(req_keys::PIN_UV_AUTH_PARAM, param)?;
        }

        map.insert_opt(req_keys::PIN_UV_AUTH_PROTOCOL, self.pin_uv_auth_protocol)?
            .build()
            .map(Some)
    }

    fn decode_response(body: &[u8]) -> Result<MakeCredentialResponse> {
        let mut parser = MapParser::from_bytes(body)?;

        let fmt = cbor::as_text(parser.require(resp_keys::FMT, "fmt")?, "fmt")?.to_owned();
        let auth_data_raw = parser.get_bytes(resp_keys::AUTH_DATA, "authData")?;
        let auth_data = AuthenticatorData::parse(&auth_data_raw)?;
        if auth_data.attested_credential.is_none() {
            return Err(CodecError::Malformed(
                "makeCredential authData without attested credential".into(),
            ));
        }
        let att_stmt = match parser.take(resp_keys::ATT_STMT) {
            Some(value) => AttestationStatement::from_value(value)?,
            None => AttestationStatement::default(),
        };

        Ok(MakeCredentialResponse {
            fmt,
            auth_data_raw,
            auth_data,
            att_stmt,
        })
    }
}

/// Attestation statement members the host surfaces
///
/// `packed`, `fido-u2f` and `tpm` statements share `alg`/`sig`/`x5c`;
/// `none` is an empty map. The whole statement is kept in `raw`.
#[derive(Debug, Clone, PartialEq)]
pub struct AttestationStatement {
    pub alg: Option<i64>,
    pub sig: Option<Vec<u8>>,
    pub x5c: Vec<Vec<u8>>,
    pub raw: Value,
}

impl Default for AttestationStatement {
    fn default() -> Self {
        Self {
            alg: None,
            sig: None,
            x5c: Vec::new(),
            raw: Value::Map(Vec::new()),
        }
    }
}

impl AttestationStatement {
    pub fn from_value(value: Value) -> Result<Self> {
        let mut stmt = Self::default();
        for (name, member) in cbor::text_map_entries(&value, "attStmt")? {
            match name {
                "alg" => stmt.alg = Some(cbor::as_int(member, "attStmt.alg")?),
                "sig" => stmt.sig = Some(cbor::as_bytes(member, "attStmt.sig")?.to_vec()),
                "x5c" => {
                    stmt.x5c = cbor::as_array(member, "attStmt.x5c")?
                        .iter()
                        .map(|cert| cbor::as_bytes(cert, "attStmt.x5c").map(<[u8]>::to_vec))
                        .collect::<Result<_>>()?;
                }
                _ => {}
            }
        }
        stmt.raw = value;
        Ok(stmt)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MakeCredentialResponse {
    pub fmt: String,
    pub auth_data_raw: Vec<u8>,
    pub auth_data: AuthenticatorData,
    pub att_stmt: AttestationStatement,
}
