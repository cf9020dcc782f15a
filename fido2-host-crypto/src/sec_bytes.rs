//! Secret byte storage for PIN/UV auth tokens
//!
//! Backed by `SecVec`, which mlocks the allocation and zeroes it on drop.

use secstr::SecVec;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

/// Bytes that must never outlive their use or show up in logs
#[derive(Clone)]
pub struct SecBytes {
    inner: SecVec<u8>,
}

impl SecBytes {
    /// Moves `data` into protected storage
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            inner: SecVec::from(data),
        }
    }

    pub fn from_slice(data: &[u8]) -> Self {
        Self::new(data.to_vec())
    }

    /// Access raw bytes
    ///
    /// Keep the borrow short; prefer [`SecBytes::with_bytes`].
    pub fn as_slice(&self) -> &[u8] {
        self.inner.unsecure()
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `f` against the protected bytes
    pub fn with_bytes<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&[u8]) -> R,
    {
        let result = f(self.as_slice());
        core::sync::atomic::compiler_fence(core::sync::atomic::Ordering::SeqCst);
        result
    }

    /// Copy into a fixed-size array that is zeroed on drop
    ///
    /// Returns `None` when the length does not match.
    pub fn to_array<const N: usize>(&self) -> Option<Zeroizing<[u8; N]>> {
        if self.len() != N {
            return None;
        }
        let mut arr = Zeroizing::new([0u8; N]);
        arr.copy_from_slice(self.as_slice());
        Some(arr)
    }
}

impl From<Vec<u8>> for SecBytes {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

impl core::fmt::Debug for SecBytes {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SecBytes")
            .field("len", &self.len())
            .field("data", &"<redacted>")
            .finish()
    }
}

impl PartialEq for SecBytes {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice().ct_eq(other.as_slice()).into()
    }
}

impl Eq for SecBytes {}
