//! COSE_Key decoding and encoding
//!
//! Two key shapes are understood: EC2 on P-256 (credential keys and the
//! authenticator's key agreement key) and OKP Ed25519. Anything else decodes
//! to [`CodecError::UnsupportedKeyType`].

use crate::cbor::{MapBuilder, MapParser, Value};
use crate::error::{CodecError, Result};
use crate::types::CoseAlgorithm;

mod label {
    pub const KTY: i64 = 1;
    pub const ALG: i64 = 3;
    pub const CRV: i64 = -1;
    pub const X: i64 = -2;
    pub const Y: i64 = -3;
}

const KTY_OKP: i64 = 1;
const KTY_EC2: i64 = 2;
const CRV_P256: i64 = 1;
const CRV_ED25519: i64 = 6;

/// ECDH-ES + HKDF-256, the algorithm tag on key agreement keys
pub const ALG_ECDH_ES_HKDF_256: i64 = -25;

/// Decoded public key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CosePublicKey {
    Ec2P256 {
        alg: Option<i64>,
        x: [u8; 32],
        y: [u8; 32],
    },
    Ed25519 {
        x: [u8; 32],
    },
}

fn coordinate(parser: &MapParser, label: i64, field: &'static str) -> Result<[u8; 32]> {
    let bytes = parser.get_bytes(label, field)?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| CodecError::Malformed(format!("{field} is {} bytes", bytes.len())))
}

impl CosePublicKey {
    pub fn from_cbor(data: &[u8]) -> Result<Self> {
        Self::from_parser(&MapParser::from_bytes(data)?)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        Self::from_parser(&MapParser::from_value(value)?)
    }

    fn from_parser(parser: &MapParser) -> Result<Self> {
        let kty = parser.get_int(label::KTY, "COSE kty")?;
        // Label -1 is only a curve for OKP and EC2; RSA puts the modulus there
        if kty != KTY_EC2 && kty != KTY_OKP {
            return Err(CodecError::UnsupportedKeyType);
        }
        let alg = parser.get_int_opt(label::ALG, "COSE alg")?;
        let crv = parser.get_int_opt(label::CRV, "COSE crv")?;

        match (kty, crv) {
            (KTY_EC2, Some(CRV_P256)) => Ok(Self::Ec2P256 {
                alg,
                x: coordinate(parser, label::X, "COSE x")?,
                y: coordinate(parser, label::Y, "COSE y")?,
            }),
            (KTY_OKP, Some(CRV_ED25519)) => {
                if alg.is_some_and(|a| a != CoseAlgorithm::EdDSA.to_i32() as i64) {
                    return Err(CodecError::UnsupportedKeyType);
                }
                Ok(Self::Ed25519 {
                    x: coordinate(parser, label::X, "COSE x")?,
                })
            }
            _ => Err(CodecError::UnsupportedKeyType),
        }
    }

    /// Signature algorithm this key is bound to, when it names one
    pub fn algorithm(&self) -> Option<CoseAlgorithm> {
        match self {
            Self::Ec2P256 { alg, .. } => {
                alg.and_then(|a| i32::try_from(a).ok().and_then(CoseAlgorithm::from_i32))
            }
            Self::Ed25519 { .. } => Some(CoseAlgorithm::EdDSA),
        }
    }

    /// Uncompressed SEC1 point for EC2 keys
    pub fn sec1_bytes(&self) -> Option<Vec<u8>> {
        match self {
            Self::Ec2P256 { x, y, .. } => {
                let mut out = Vec::with_capacity(65);
                out.push(0x04);
                out.extend_from_slice(x);
                out.extend_from_slice(y);
                Some(out)
            }
            Self::Ed25519 { .. } => None,
        }
    }

    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        match self {
            Self::Ec2P256 { alg, x, y } => MapBuilder::new()
                .insert(label::KTY, KTY_EC2)?
                .insert_opt(label::ALG, *alg)?
                .insert(label::CRV, CRV_P256)?
                .insert_bytes(label::X, x)?
                .insert_bytes(label::Y, y)?
                .build(),
            Self::Ed25519 { x } => MapBuilder::new()
                .insert(label::KTY, KTY_OKP)?
                .insert(label::ALG, CoseAlgorithm::EdDSA.to_i32())?
                .insert(label::CRV, CRV_ED25519)?
                .insert_bytes(label::X, x)?
                .build(),
        }
    }
}

/// Platform key agreement key: `{1: 2, 3: -25, -1: 1, -2: x, -3: y}`
pub fn key_agreement_to_cbor(x: &[u8; 32], y: &[u8; 32]) -> Result<Vec<u8>> {
    CosePublicKey::Ec2P256 {
        alg: Some(ALG_ECDH_ES_HKDF_256),
        x: *x,
        y: *y,
    }
    .to_cbor()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_agreement_encoding_is_canonical() {
        let cbor = key_agreement_to_cbor(&[0x11; 32], &[0x22; 32]).unwrap();
        assert_eq!(&cbor[..8], &[0xa5, 0x01, 0x02, 0x03, 0x38, 0x18, 0x20, 0x01]);
        assert_eq!(&cbor[8..11], &[0x21, 0x58, 0x20]);

        match CosePublicKey::from_cbor(&cbor).unwrap() {
            CosePublicKey::Ec2P256 { alg, x, y } => {
                assert_eq!(alg, Some(-25));
                assert_eq!(x, [0x11; 32]);
                assert_eq!(y, [0x22; 32]);
            }
            other => panic!("unexpected key {other:?}"),
        }
    }

    #[test]
    fn test_es256_credential_key() {
        let key = CosePublicKey::Ec2P256 {
            alg: Some(-7),
            x: [1; 32],
            y: [2; 32],
        };
        let decoded = CosePublicKey::from_cbor(&key.to_cbor().unwrap()).unwrap();
        assert_eq!(decoded.algorithm(), Some(CoseAlgorithm::ES256));
        let sec1 = decoded.sec1_bytes().unwrap();
        assert_eq!(sec1.len(), 65);
        assert_eq!(sec1[0], 0x04);
    }

    #[test]
    fn test_ed25519_key() {
        let key = CosePublicKey::Ed25519 { x: [7; 32] };
        let decoded = CosePublicKey::from_cbor(&key.to_cbor().unwrap()).unwrap();
        assert_eq!(decoded, key);
        assert_eq!(decoded.algorithm(), Some(CoseAlgorithm::EdDSA));
        assert!(decoded.sec1_bytes().is_none());
    }

    #[test]
    fn test_unsupported_key_types() {
        // RSA (kty 3)
        let rsa = MapBuilder::new()
            .insert(1, 3)
            .unwrap()
            .insert(3, -257)
            .unwrap()
            .insert_bytes(-1, &[0xAA; 256])
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(
            CosePublicKey::from_cbor(&rsa).unwrap_err(),
            CodecError::UnsupportedKeyType
        );

        // EC2 on P-384
        let p384 = MapBuilder::new()
            .insert(1, 2)
            .unwrap()
            .insert(-1, 2)
            .unwrap()
            .insert_bytes(-2, &[0; 48])
            .unwrap()
            .insert_bytes(-3, &[0; 48])
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(
            CosePublicKey::from_cbor(&p384).unwrap_err(),
            CodecError::UnsupportedKeyType
        );
    }

    #[test]
    fn test_bad_coordinate_length() {
        let short = MapBuilder::new()
            .insert(1, 2)
            .unwrap()
            .insert(-1, 1)
            .unwrap()
            .insert_bytes(-2, &[0; 31])
            .unwrap()
            .insert_bytes(-3, &[0; 32])
            .unwrap()
            .build()
            .unwrap();
        assert!(matches!(
            CosePublicKey::from_cbor(&short),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn test_missing_kty() {
        let cbor = MapBuilder::new().insert(3, -7).unwrap().build().unwrap();
        assert!(matches!(
            CosePublicKey::from_cbor(&cbor),
            Err(CodecError::Malformed(_))
        ));
    }
}
