//! P-256 ECDH for the PIN/UV auth protocol key agreement
//!
//! The platform generates a fresh key pair for every negotiation and combines
//! it with the authenticator's key agreement key. The raw shared secret `Z`
//! is the x-coordinate of the resulting point; protocol-specific KDFs are
//! applied in [`crate::pin_protocol`].

use crate::error::{CryptoError, Result};

use p256::{EncodedPoint, PublicKey, SecretKey, elliptic_curve::sec1::ToEncodedPoint};
use rand::rngs::OsRng;
use zeroize::Zeroizing;

/// Length of an uncompressed SEC1 point (0x04 || x || y)
const SEC1_UNCOMPRESSED_LEN: usize = 65;

/// Ephemeral P-256 key pair used for a single key agreement
pub struct KeyPair {
    secret: SecretKey,
    public: PublicKey,
}

impl KeyPair {
    /// Generate a new random key pair
    ///
    /// # Examples
    ///
    /// ```
    /// use fido2_host_crypto::ecdh::KeyPair;
    ///
    /// let keypair = KeyPair::generate();
    /// assert_eq!(keypair.public_key_bytes().len(), 65);
    /// ```
    pub fn generate() -> Self {
        let secret = SecretKey::random(&mut OsRng);
        let public = secret.public_key();
        Self { secret, public }
    }

    /// Public key as (x, y) coordinates for COSE_Key encoding
    /// (kty: 2, alg: -25, crv: 1).
    pub fn public_key_cose(&self) -> ([u8; 32], [u8; 32]) {
        let sec1 = self.public_key_bytes();
        let mut x = [0u8; 32];
        let mut y = [0u8; 32];
        x.copy_from_slice(&sec1[1..33]);
        y.copy_from_slice(&sec1[33..65]);
        (x, y)
    }

    /// Public key in uncompressed SEC1 format (0x04 || x || y)
    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.public.to_encoded_point(false).as_bytes().to_vec()
    }

    /// Raw ECDH shared secret with a peer key in uncompressed SEC1 format
    pub fn shared_secret(&self, peer_public_key: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
        if peer_public_key.len() != SEC1_UNCOMPRESSED_LEN {
            return Err(CryptoError::InvalidPublicKey);
        }
        let peer_public = PublicKey::from_sec1_bytes(peer_public_key)
            .map_err(|_| CryptoError::InvalidPublicKey)?;

        let shared =
            p256::ecdh::diffie_hellman(self.secret.to_nonzero_scalar(), peer_public.as_affine());

        let mut z = Zeroizing::new([0u8; 32]);
        z.copy_from_slice(shared.raw_secret_bytes());
        Ok(z)
    }

    /// Raw ECDH shared secret with a peer key given as COSE coordinates
    pub fn shared_secret_cose(&self, x: &[u8; 32], y: &[u8; 32]) -> Result<Zeroizing<[u8; 32]>> {
        let point = EncodedPoint::from_affine_coordinates(x.into(), y.into(), false);
        self.shared_secret(point.as_bytes())
    }
}
