//! Three-way XOR secret splitting.
//!
//! A master key is split into a device share, an auth share and a recovery share such that
//! `master = device ^ auth ^ recovery`. All three shares are required; any two of them are
//! uniformly random and carry no information about the master key. This is not a threshold
//! scheme.

use rand_core::{CryptoRng, RngCore};
use zeroize::Zeroize;

use crate::{
    error::CryptoError,
    primitives::random_secret,
    secret::{MasterKey, Secret},
};

/// Size of every share.
pub const SHARE_BYTES: usize = 32;

/// The three shares of a master key. Each is zeroed on drop.
#[derive(Clone, Debug)]
pub struct Shares {
    pub device: Secret<SHARE_BYTES>,
    pub auth: Secret<SHARE_BYTES>,
    pub recovery: Secret<SHARE_BYTES>,
}

/// Split `master_key` into two random shares and the recovery share that completes them.
pub fn split<R>(csprng: &mut R, master_key: &MasterKey) -> Result<Shares, CryptoError>
where
    R: CryptoRng + RngCore + ?Sized,
{
    let device = random_secret(csprng)?;
    let auth = random_secret(csprng)?;

    let recovery = xor3(master_key.as_bytes(), device.as_bytes(), auth.as_bytes());
    Ok(Shares {
        device,
        auth,
        recovery,
    })
}

/// Recombine all three shares into the master key.
pub fn reconstruct(device: &[u8], auth: &[u8], recovery: &[u8]) -> Result<MasterKey, CryptoError> {
    for share in [device, auth, recovery] {
        if share.len() != SHARE_BYTES {
            return Err(CryptoError::InvalidShareLength(share.len()));
        }
    }

    Ok(xor3(device, auth, recovery))
}

impl Shares {
    /// Recombine these shares into the master key.
    pub fn reconstruct(&self) -> MasterKey {
        xor3(self.device.as_bytes(), self.auth.as_bytes(), self.recovery.as_bytes())
    }
}

// Callers have already checked all three lengths.
fn xor3(a: &[u8], b: &[u8], c: &[u8]) -> Secret<SHARE_BYTES> {
    let mut out = [0u8; SHARE_BYTES];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = a[i] ^ b[i] ^ c[i];
    }
    let secret = Secret::from_bytes(out);
    out.zeroize();
    secret
}
