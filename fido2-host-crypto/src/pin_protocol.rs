//! PIN/UV auth protocols one and two, platform side
//!
//! Reference: <https://fidoalliance.org/specs/fido-v2.2-rd-20230321/fido-client-to-authenticator-protocol-v2.2-rd-20230321.html#sctn-pin-uv-auth-protocol-one>
//!
//! | | Protocol 1 | Protocol 2 |
//! |---|---|---|
//! | KDF | `SHA-256(Z)` | `HKDF(Z, "CTAP2 HMAC key") \|\| HKDF(Z, "CTAP2 AES key")` |
//! | encrypt | AES-256-CBC, zero IV | AES-256-CBC, random IV prepended |
//! | authenticate | `HMAC-SHA-256[..16]` | `HMAC-SHA-256` |
//!
//! Neither protocol pads: callers only ever encrypt 16/32/64-byte values.

use crate::error::{CryptoError, Result};

use aes::Aes256;
use cbc::{
    Decryptor, Encryptor,
    cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::NoPadding},
};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;
type Aes256CbcEnc = Encryptor<Aes256>;
type Aes256CbcDec = Decryptor<Aes256>;

const BLOCK_LEN: usize = 16;

fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key size");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

fn cbc_encrypt(key: &[u8; 32], iv: &[u8; BLOCK_LEN], plaintext: &[u8]) -> Result<Vec<u8>> {
    if plaintext.is_empty() || !plaintext.len().is_multiple_of(BLOCK_LEN) {
        return Err(CryptoError::EncryptionFailed);
    }
    let mut buffer = plaintext.to_vec();
    let len = buffer.len();
    Aes256CbcEnc::new(key.into(), iv.into())
        .encrypt_padded_mut::<NoPadding>(&mut buffer, len)
        .map_err(|_| CryptoError::EncryptionFailed)?;
    Ok(buffer)
}

fn cbc_decrypt(key: &[u8; 32], iv: &[u8; BLOCK_LEN], ciphertext: &[u8]) -> Result<Vec<u8>> {
    if ciphertext.is_empty() || !ciphertext.len().is_multiple_of(BLOCK_LEN) {
        return Err(CryptoError::DecryptionFailed);
    }
    let mut buffer = ciphertext.to_vec();
    Aes256CbcDec::new(key.into(), iv.into())
        .decrypt_padded_mut::<NoPadding>(&mut buffer)
        .map_err(|_| CryptoError::DecryptionFailed)?;
    Ok(buffer)
}

/// PIN/UV auth protocol one
pub mod v1 {
    use super::*;

    /// `SHA-256(Z)`, used both as AES key and HMAC key
    pub fn kdf(z: &[u8; 32]) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(Sha256::digest(z).into())
    }

    /// AES-256-CBC with an all-zero IV
    pub fn encrypt(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>> {
        cbc_encrypt(key, &[0u8; BLOCK_LEN], plaintext)
    }

    pub fn decrypt(key: &[u8; 32], ciphertext: &[u8]) -> Result<Vec<u8>> {
        cbc_decrypt(key, &[0u8; BLOCK_LEN], ciphertext)
    }

    /// First 16 bytes of HMAC-SHA-256
    ///
    /// # Examples
    ///
    /// ```
    /// use fido2_host_crypto::pin_protocol::v1;
    ///
    /// let mac = v1::authenticate(&[0x42u8; 32], b"client_data_hash");
    /// assert_eq!(mac.len(), 16);
    /// ```
    pub fn authenticate(key: &[u8], data: &[u8]) -> [u8; 16] {
        let full = hmac_sha256(key, data);
        let mut out = [0u8; 16];
        out.copy_from_slice(&full[..16]);
        out
    }

    /// Constant-time MAC check
    pub fn verify(key: &[u8], data: &[u8], expected: &[u8]) -> bool {
        authenticate(key, data)[..].ct_eq(expected).into()
    }
}

/// PIN/UV auth protocol two
pub mod v2 {
    use super::*;

    const HKDF_SALT: [u8; 32] = [0u8; 32];

    fn hkdf(z: &[u8; 32], info: &[u8]) -> [u8; 32] {
        let hkdf = Hkdf::<Sha256>::new(Some(&HKDF_SALT), z);
        let mut okm = [0u8; 32];
        hkdf.expand(info, &mut okm)
            .expect("32 bytes is valid length for HKDF-SHA-256");
        okm
    }

    /// Returns `(hmac_key, aes_key)`, the two halves of the 64-byte secret
    pub fn kdf(z: &[u8; 32]) -> (Zeroizing<[u8; 32]>, Zeroizing<[u8; 32]>) {
        (
            Zeroizing::new(hkdf(z, b"CTAP2 HMAC key")),
            Zeroizing::new(hkdf(z, b"CTAP2 AES key")),
        )
    }

    /// AES-256-CBC with a random IV; output is `IV || ciphertext`
    pub fn encrypt(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut iv = [0u8; BLOCK_LEN];
        rand::thread_rng().fill_bytes(&mut iv);

        let ciphertext = cbc_encrypt(key, &iv, plaintext)?;
        let mut out = Vec::with_capacity(BLOCK_LEN + ciphertext.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Inverse of [`encrypt`]: the first block is the IV
    pub fn decrypt(key: &[u8; 32], ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() < BLOCK_LEN {
            return Err(CryptoError::DecryptionFailed);
        }
        let (iv, body) = ciphertext.split_at(BLOCK_LEN);
        let mut iv_block = [0u8; BLOCK_LEN];
        iv_block.copy_from_slice(iv);
        cbc_decrypt(key, &iv_block, body)
    }

    /// Full 32-byte HMAC-SHA-256
    pub fn authenticate(key: &[u8], data: &[u8]) -> [u8; 32] {
        hmac_sha256(key, data)
    }

    pub fn verify(key: &[u8], data: &[u8], expected: &[u8]) -> bool {
        authenticate(key, data)[..].ct_eq(expected).into()
    }
}

/// PIN/UV auth protocol version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PinProtocol {
    V1 = 1,
    V2 = 2,
}

impl PinProtocol {
    /// Protocols implemented by this crate, most preferred first
    pub const SUPPORTED: [PinProtocol; 2] = [PinProtocol::V2, PinProtocol::V1];

    pub fn version(self) -> u8 {
        self as u8
    }

    /// Derive the protocol-specific shared secret from the raw ECDH output
    pub fn kdf(self, z: &[u8; 32]) -> SharedSecret {
        match self {
            PinProtocol::V1 => {
                let key = v1::kdf(z);
                SharedSecret {
                    protocol: self,
                    hmac_key: key.clone(),
                    aes_key: key,
                }
            }
            PinProtocol::V2 => {
                let (hmac_key, aes_key) = v2::kdf(z);
                SharedSecret {
                    protocol: self,
                    hmac_key,
                    aes_key,
                }
            }
        }
    }

    /// `authenticate(key, message)` as defined by this protocol
    ///
    /// Used with a pinUvAuthToken as key to compute pinUvAuthParam.
    pub fn authenticate(self, key: &[u8], data: &[u8]) -> Vec<u8> {
        match self {
            PinProtocol::V1 => v1::authenticate(key, data).to_vec(),
            PinProtocol::V2 => v2::authenticate(key, data).to_vec(),
        }
    }
}

impl TryFrom<u8> for PinProtocol {
    type Error = CryptoError;

    fn try_from(version: u8) -> Result<Self> {
        match version {
            1 => Ok(PinProtocol::V1),
            2 => Ok(PinProtocol::V2),
            other => Err(CryptoError::UnsupportedProtocol(other)),
        }
    }
}

/// Shared secret established with an authenticator
///
/// Keys are zeroized on drop and never printed.
pub struct SharedSecret {
    protocol: PinProtocol,
    hmac_key: Zeroizing<[u8; 32]>,
    aes_key: Zeroizing<[u8; 32]>,
}

impl SharedSecret {
    pub fn protocol(&self) -> PinProtocol {
        self.protocol
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        match self.protocol {
            PinProtocol::V1 => v1::encrypt(&self.aes_key, plaintext),
            PinProtocol::V2 => v2::encrypt(&self.aes_key, plaintext),
        }
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        match self.protocol {
            PinProtocol::V1 => v1::decrypt(&self.aes_key, ciphertext),
            PinProtocol::V2 => v2::decrypt(&self.aes_key, ciphertext),
        }
    }

    /// MAC keyed with the shared secret itself (hmac-secret saltAuth)
    pub fn authenticate(&self, data: &[u8]) -> Vec<u8> {
        self.protocol.authenticate(self.hmac_key.as_slice(), data)
    }

    pub fn verify(&self, data: &[u8], mac: &[u8]) -> bool {
        match self.protocol {
            PinProtocol::V1 => v1::verify(self.hmac_key.as_slice(), data, mac),
            PinProtocol::V2 => v2::verify(self.hmac_key.as_slice(), data, mac),
        }
    }
}

impl core::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SharedSecret")
            .field("protocol", &self.protocol)
            .field("keys", &"<redacted>")
            .finish()
    }
}

/// `LEFT(SHA-256(pin), 16)`, the value sent encrypted as pinHashEnc
pub fn pin_hash(pin: &str) -> Zeroizing<[u8; 16]> {
    let digest = Zeroizing::new(<[u8; 32]>::from(Sha256::digest(pin.as_bytes())));
    let mut out = Zeroizing::new([0u8; 16]);
    out.copy_from_slice(&digest[..16]);
    out
}
