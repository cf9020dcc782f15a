//! authenticatorClientPIN (0x06), the subcommands a PIN/UV negotiation needs
//!
//! Spec: <https://fidoalliance.org/specs/fido-v2.2-rd-20230321/fido-client-to-authenticator-protocol-v2.2-rd-20230321.html#authenticatorClientPIN>

use super::{Command, CommandCode};
use crate::cbor::{MapBuilder, MapParser};
use crate::cose::CosePublicKey;
use crate::error::{CodecError, Result};

/// Request parameter keys
pub mod req_keys {
    pub const PIN_UV_AUTH_PROTOCOL: i64 = 0x01;
    pub const SUBCOMMAND: i64 = 0x02;
    pub const KEY_AGREEMENT: i64 = 0x03;
    pub const PIN_HASH_ENC: i64 = 0x06;
    pub const PERMISSIONS: i64 = 0x09;
    pub const RP_ID: i64 = 0x0A;
}

/// Response keys
pub mod resp_keys {
    pub const KEY_AGREEMENT: i64 = 0x01;
    pub const PIN_UV_AUTH_TOKEN: i64 = 0x02;
    pub const PIN_RETRIES: i64 = 0x03;
    pub const POWER_CYCLE_STATE: i64 = 0x04;
}

/// Subcommand identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Subcommand {
    GetPinRetries = 0x01,
    GetKeyAgreement = 0x02,
    GetPinToken = 0x05,
    GetPinUvAuthTokenUsingPinWithPermissions = 0x09,
}

/// pinUvAuthToken permission bits
pub mod permissions {
    pub const MAKE_CREDENTIAL: u8 = 0x01;
    pub const GET_ASSERTION: u8 = 0x02;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientPin {
    GetPinRetries,
    GetKeyAgreement {
        protocol: u8,
    },
    /// Legacy token request, no permissions
    GetPinToken {
        protocol: u8,
        key_agreement: Vec<u8>,
        pin_hash_enc: Vec<u8>,
    },
    GetPinUvAuthTokenUsingPinWithPermissions {
        protocol: u8,
        key_agreement: Vec<u8>,
        pin_hash_enc: Vec<u8>,
        permissions: u8,
        rp_id: Option<String>,
    },
}

impl ClientPin {
    pub fn subcommand(&self) -> Subcommand {
        match self {
            Self::GetPinRetries => Subcommand::GetPinRetries,
            Self::GetKeyAgreement { .. } => Subcommand::GetKeyAgreement,
            Self::GetPinToken { .. } => Subcommand::GetPinToken,
            Self::GetPinUvAuthTokenUsingPinWithPermissions { .. } => {
                Subcommand::GetPinUvAuthTokenUsingPinWithPermissions
            }
        }
    }
}

impl Command for ClientPin {
    const CODE: CommandCode = CommandCode::ClientPin;
    type Response = ClientPinResponse;

    fn parameters(&self) -> Result<Option<Vec<u8>>> {
        let map = MapBuilder::new().insert(req_keys::SUBCOMMAND, self.subcommand() as u8)?;
        let map = match self {
            Self::GetPinRetries => map,
            Self::GetKeyAgreement { protocol } => {
                map.insert(req_keys::PIN_UV_AUTH_PROTOCOL, *protocol)?
            }
            Self::GetPinToken {
                protocol,
                key_agreement,
                pin_hash_enc,
            } => map
                .insert(req_keys::PIN_UV_AUTH_PROTOCOL, *protocol)?
                .insert_raw(req_keys::KEY_AGREEMENT, key_agreement.clone())
                .insert_bytes(req_keys::PIN_HASH_ENC, pin_hash_enc)?,
            Self::GetPinUvAuthTokenUsingPinWithPermissions {
                protocol,
                key_agreement,
                pin_hash_enc,
                permissions,
                rp_id,
            } => map
                .insert(req_keys::PIN_UV_AUTH_PROTOCOL, *protocol)?
                .insert_raw(req_keys::KEY_AGREEMENT, key_agreement.clone())
                .insert_bytes(req_keys::PIN_HASH_ENC, pin_hash_enc)?
                .insert(req_keys::PERMISSIONS, *permissions)?
                .insert_opt(req_keys::RP_ID, rp_id.as_deref())?,
        };
        map.build().map(Some)
    }

    fn decode_response(body: &[u8]) -> Result<ClientPinResponse> {
        if body.is_empty() {
            return Ok(ClientPinResponse::default());
        }
        let mut parser = MapParser::from_bytes(body)?;

        let key_agreement = parser
            .take(resp_keys::KEY_AGREEMENT)
            .map(CosePublicKey::from_value)
            .transpose()?;
        let pin_retries = parser
            .get_int_opt(resp_keys::PIN_RETRIES, "pinRetries")?
            .map(|r| u8::try_from(r).map_err(|_| CodecError::UnexpectedType("pinRetries")))
            .transpose()?;

        Ok(ClientPinResponse {
            key_agreement,
            pin_uv_auth_token: parser.get_bytes_opt(resp_keys::PIN_UV_AUTH_TOKEN, "pinUvAuthToken")?,
            pin_retries,
            power_cycle_state: parser.get_bool_opt(resp_keys::POWER_CYCLE_STATE, "powerCycleState")?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientPinResponse {
    pub key_agreement: Option<CosePublicKey>,
    /// Still encrypted with the shared secret
    pub pin_uv_auth_token: Option<Vec<u8>>,
    pub pin_retries: Option<u8>,
    pub power_cycle_state: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cose;

    #[test]
    fn test_get_pin_retries_encoding() {
        // 0x06 {2: 1}
        assert_eq!(ClientPin::GetPinRetries.encode().unwrap(), vec![0x06, 0xa1, 0x02, 0x01]);
    }

    #[test]
    fn test_get_key_agreement_encoding() {
        // 0x06 {1: 2, 2: 2}
        assert_eq!(
            ClientPin::GetKeyAgreement { protocol: 2 }.encode().unwrap(),
            vec![0x06, 0xa2, 0x01, 0x02, 0x02, 0x02]
        );
    }

    #[test]
    fn test_token_with_permissions_encoding() {
        let request = ClientPin::GetPinUvAuthTokenUsingPinWithPermissions {
            protocol: 2,
            key_agreement: cose::key_agreement_to_cbor(&[5; 32], &[6; 32]).unwrap(),
            pin_hash_enc: vec![0xEE; 32],
            permissions: permissions::MAKE_CREDENTIAL,
            rp_id: Some("example.com".into()),
        };
        let encoded = request.encode().unwrap();
        assert_eq!(encoded[0], 0x06);

        let parser = MapParser::from_bytes(&encoded[1..]).unwrap();
        assert_eq!(parser.get_int(2, "sub").unwrap(), 0x09);
        assert_eq!(parser.get_int(9, "perm").unwrap(), 0x01);
        assert_eq!(parser.get_text_opt(0x0A, "rp").unwrap().as_deref(), Some("example.com"));
        assert!(CosePublicKey::from_value(parser.get(3).unwrap().clone()).is_ok());
    }

    #[test]
    fn test_legacy_token_has_no_permissions() {
        let request = ClientPin::GetPinToken {
            protocol: 1,
            key_agreement: cose::key_agreement_to_cbor(&[5; 32], &[6; 32]).unwrap(),
            pin_hash_enc: vec![0xEE; 16],
        };
        let parser = MapParser::from_bytes(&request.encode().unwrap()[1..]).unwrap();
        assert_eq!(parser.get_int(2, "sub").unwrap(), 0x05);
        assert!(!parser.contains_key(9));
        assert!(!parser.contains_key(0x0A));
    }

    #[test]
    fn test_decode_responses() {
        let body = MapBuilder::new()
            .insert_raw(1, cose::key_agreement_to_cbor(&[1; 32], &[2; 32]).unwrap())
            .build()
            .unwrap();
        let response = ClientPin::decode_response(&body).unwrap();
        assert!(matches!(
            response.key_agreement,
            Some(CosePublicKey::Ec2P256 { .. })
        ));

        let body = MapBuilder::new().insert(3, 5).unwrap().build().unwrap();
        assert_eq!(ClientPin::decode_response(&body).unwrap().pin_retries, Some(5));

        let body = MapBuilder::new().insert(3, 300).unwrap().build().unwrap();
        assert_eq!(
            ClientPin::decode_response(&body).unwrap_err(),
            CodecError::UnexpectedType("pinRetries")
        );

        assert_eq!(
            ClientPin::decode_response(&[]).unwrap(),
            ClientPinResponse::default()
        );
    }
}
