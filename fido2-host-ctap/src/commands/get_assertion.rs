//! authenticatorGetAssertion (0x02)
//!
//! Spec: <https://fidoalliance.org/specs/fido-v2.2-rd-20230321/fido-client-to-authenticator-protocol-v2.2-rd-20230321.html#authenticatorGetAssertion>

use super::{Command, CommandCode};
use crate::auth_data::AuthenticatorData;
use crate::cbor::{MapBuilder, MapParser, TextMapBuilder};
use crate::error::{CodecError, Result};
use crate::extensions::GetAssertionExtensions;
use crate::types::{self, PublicKeyCredentialDescriptor, User};

/// Request parameter keys
pub mod req_keys {
    pub const RP_ID: i64 = 0x01;
    pub const CLIENT_DATA_HASH: i64 = 0x02;
    pub const ALLOW_LIST: i64 = 0x03;
    pub const EXTENSIONS: i64 = 0x04;
    pub const OPTIONS: i64 = 0x05;
    pub const PIN_UV_AUTH_PARAM: i64 = 0x06;
    pub const PIN_UV_AUTH_PROTOCOL: i64 = 0x07;
}

/// Response keys
pub mod resp_keys {
    pub const CREDENTIAL: i64 = 0x01;
    pub const AUTH_DATA: i64 = 0x02;
    pub const SIGNATURE: i64 = 0x03;
    pub const USER: i64 = 0x04;
    pub const NUMBER_OF_CREDENTIALS: i64 = 0x05;
    pub const USER_SELECTED: i64 = 0x06;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetAssertion {
    pub rp_id: String,
    pub client_data_hash: [u8; 32],
    pub allow_list: Vec<PublicKeyCredentialDescriptor>,
    pub extensions: GetAssertionExtensions,
    pub user_presence: Option<bool>,
    pub user_verification: Option<bool>,
    pub pin_uv_auth_param: Option<Vec<u8>>,
    pub pin_uv_auth_protocol: Option<u8>,
}

impl GetAssertion {
    pub fn new(rp_id: impl Into<String>, client_data_hash: [u8; 32]) -> Self {
        Self {
            rp_id: rp_id.into(),
            client_data_hash,
            allow_list: Vec::new(),
            extensions: GetAssertionExtensions::default(),
            user_presence: None,
            user_verification: None,
            pin_uv_auth_param: None,
            pin_uv_auth_protocol: None,
        }
    }
}

impl Command for GetAssertion {
    const CODE: CommandCode = CommandCode::GetAssertion;
    type Response = GetAssertionResponse;

    fn parameters(&self) -> Result<Option<Vec<u8>>> {
        let mut map = MapBuilder::new()
            .insert(req_keys::RP_ID, self.rp_id.as_str())?
            .insert_bytes(req_keys::CLIENT_DATA_HASH, &self.client_data_hash)?;

        if !self.allow_list.is_empty() {
            map = map.insert_raw(
                req_keys::ALLOW_LIST,
                types::descriptor_list_to_cbor(&self.allow_list)?,
            );
        }
        if let Some(ext) = self.extensions.to_cbor()? {
            map = map.insert_raw(req_keys::EXTENSIONS, ext);
        }

        let options = TextMapBuilder::new()
            .insert_opt("up", self.user_presence)?
            .insert_opt("uv", self.user_verification)?;
        if !options.is_empty() {
            map = map.insert_raw(req_keys::OPTIONS, options.build()?);
        }
        if let Some(param) = &self.pin_uv_auth_param {
            map = map.insert_bytes(req_keys::PIN_UV_AUTH_PARAM, param)?;
        }

        map.insert_opt(req_keys::PIN_UV_AUTH_PROTOCOL, self.pin_uv_auth_protocol)?
            .build()
            .map(Some)
    }

    fn decode_response(body: &[u8]) -> Result<GetAssertionResponse> {
        decode_assertion(body)
    }
}

/// Shared by getAssertion and getNextAssertion
pub(crate) fn decode_assertion(body: &[u8]) -> Result<GetAssertionResponse> {
    let parser = MapParser::from_bytes(body)?;

    let credential = parser
        .get(resp_keys::CREDENTIAL)
        .map(PublicKeyCredentialDescriptor::from_value)
        .transpose()?;
    let auth_data_raw = parser.get_bytes(resp_keys::AUTH_DATA, "authData")?;
    let auth_data = AuthenticatorData::parse(&auth_data_raw)?;
    let signature = parser.get_bytes(resp_keys::SIGNATURE, "signature")?;
    let user = parser.get(resp_keys::USER).map(User::from_value).transpose()?;
    let number_of_credentials = parser
        .get_int_opt(resp_keys::NUMBER_OF_CREDENTIALS, "numberOfCredentials")?
        .map(|n| {
            u32::try_from(n).map_err(|_| CodecError::UnexpectedType("numberOfCredentials"))
        })
        .transpose()?;

    Ok(GetAssertionResponse {
        credential,
        auth_data_raw,
        auth_data,
        signature,
        user,
        number_of_credentials,
        user_selected: parser.get_bool_opt(resp_keys::USER_SELECTED, "userSelected")?,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct GetAssertionResponse {
    /// Omitted by the device when the allow list had exactly one entry
    pub credential: Option<PublicKeyCredentialDescriptor>,
    pub auth_data_raw: Vec<u8>,
    pub auth_data: AuthenticatorData,
    pub signature: Vec<u8>,
    pub user: Option<User>,
    pub number_of_credentials: Option<u32>,
    pub user_selected: Option<bool>,
}
