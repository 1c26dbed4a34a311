use std::fmt;

use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Container for sensitive fixed-size bytes.
///
/// The bytes are zeroed on drop, hidden from `Debug` output, and compared in constant time.
/// Cloning copies the bytes; each copy zeroes itself independently.
#[derive(Clone, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Secret<const N: usize>([u8; N]);

/// The 32-byte root secret.
pub type MasterKey = Secret<32>;

/// A 32-byte symmetric key, e.g. a key-encrypting-key or the recovery key.
pub type SymmetricKey = Secret<32>;

impl<const N: usize> Secret<N> {
    pub fn from_bytes(bytes: [u8; N]) -> Self {
        Self(bytes)
    }

    /// Copy a secret out of a slice. Returns `None` on a length mismatch. The source slice is
    /// left untouched.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; N] = bytes.try_into().ok()?;
        Some(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; N] {
        &self.0
    }
}

impl<const N: usize> AsRef<[u8]> for Secret<N> {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl<const N: usize> PartialEq for Secret<N> {
    fn eq(&self, other: &Self) -> bool {
        bool::from(self.0.ct_eq(&other.0))
    }
}

impl<const N: usize> fmt::Debug for Secret<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secret").field("value", &"***").finish()
    }
}
