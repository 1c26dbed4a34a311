//! Stateless cryptographic primitives.
//!
//! Everything here is a pure function over byte buffers, plus a caller-supplied RNG wherever
//! randomness is needed. All clients of the key-share service must produce identical bytes, so
//! the constructions are fixed to libsodium's.
//!
//! # Algorithms
//!
//! - Symmetric encryption: XSalsa20-Poly1305 ("secretbox"). The 16-byte Poly1305 tag is
//!   prepended to the ciphertext, exactly as `crypto_secretbox_easy` lays it out. Nonces are 24
//!   random bytes, freshly drawn on every call.
//! - Hashing: unkeyed BLAKE2b with a 32-byte digest (`crypto_generichash`).
//! - Key derivation: BLAKE2b-256 of `salt || identifier`, fed as the master key to the
//!   `crypto_kdf_derive_from_key` construction. That construction is keyed BLAKE2b-256 over an
//!   empty message, with the salt set to the little-endian subkey index (always 1) and the
//!   personalization set to the 8-byte context, each zero-padded to 16 bytes.
//! - Password hashing: Argon2id v1.3, single lane, 32-byte output. `mem_limit` is in bytes and
//!   `ops_limit` is the iteration count, matching `crypto_pwhash`.
//! - Key agreement keys: X25519.

use argon2::{Algorithm, Argon2, Params, Version};
use blake2::{
    digest::{consts::U32, Digest, Mac},
    Blake2b, Blake2bMac,
};
use crypto_secretbox::{
    aead::{Aead, KeyInit, Nonce},
    XSalsa20Poly1305,
};
use rand_core::{CryptoRng, RngCore};
use subtle::ConstantTimeEq;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, Zeroizing};

use crate::{error::CryptoError, secret::Secret};

/// Symmetric key size.
pub const KEY_BYTES: usize = 32;
/// Secretbox nonce size.
pub const NONCE_BYTES: usize = 24;
/// Poly1305 tag size.
pub const MAC_BYTES: usize = 16;
/// Argon2id salt size.
pub const SALT_BYTES: usize = 16;
/// Size of a key-derivation context string.
pub const CONTEXT_BYTES: usize = 8;
/// Output size of [`generic_hash`].
pub const HASH_BYTES: usize = 32;

const KDF_SUBKEY_ID: u64 = 1;

/// Ciphertext and the nonce it was sealed with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sealed {
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; NONCE_BYTES],
}

/// Fill a new vector with `len` random bytes.
pub fn random_bytes<R>(csprng: &mut R, len: usize) -> Result<Vec<u8>, CryptoError>
where
    R: CryptoRng + RngCore + ?Sized,
{
    let mut out = vec![0u8; len];
    csprng
        .try_fill_bytes(&mut out)
        .map_err(|_| CryptoError::RandomGenerationFailed)?;
    Ok(out)
}

/// Fill a new array with random bytes.
pub fn random_array<R, const N: usize>(csprng: &mut R) -> Result<[u8; N], CryptoError>
where
    R: CryptoRng + RngCore + ?Sized,
{
    let mut out = [0u8; N];
    csprng
        .try_fill_bytes(&mut out)
        .map_err(|_| CryptoError::RandomGenerationFailed)?;
    Ok(out)
}

/// Generate a fresh random 32-byte secret.
pub fn random_secret<R>(csprng: &mut R) -> Result<Secret<32>, CryptoError>
where
    R: CryptoRng + RngCore + ?Sized,
{
    let mut bytes: [u8; 32] = random_array(csprng)?;
    let secret = Secret::from_bytes(bytes);
    bytes.zeroize();
    Ok(secret)
}

fn cipher(key: &[u8]) -> Result<XSalsa20Poly1305, CryptoError> {
    if key.len() != KEY_BYTES {
        return Err(CryptoError::InvalidKeyLength {
            expected: KEY_BYTES,
            actual: key.len(),
        });
    }
    XSalsa20Poly1305::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength {
        expected: KEY_BYTES,
        actual: key.len(),
    })
}

/// Seal `plaintext` under a 32-byte `key` with a fresh random nonce.
pub fn encrypt<R>(csprng: &mut R, plaintext: &[u8], key: &[u8]) -> Result<Sealed, CryptoError>
where
    R: CryptoRng + RngCore + ?Sized,
{
    let cipher = cipher(key)?;
    let nonce: [u8; NONCE_BYTES] = random_array(csprng)?;
    let ciphertext = cipher
        .encrypt(Nonce::<XSalsa20Poly1305>::from_slice(&nonce), plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;
    Ok(Sealed { ciphertext, nonce })
}

/// Authenticate and open a secretbox. Any failure, including a nonce of the wrong length, is
/// reported as [`CryptoError::DecryptionFailed`]. A key of the wrong length is still a caller
/// bug and reported as such.
pub fn decrypt(
    ciphertext: &[u8],
    nonce: &[u8],
    key: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let cipher = cipher(key)?;
    if nonce.len() != NONCE_BYTES || ciphertext.len() < MAC_BYTES {
        return Err(CryptoError::DecryptionFailed);
    }
    cipher
        .decrypt(Nonce::<XSalsa20Poly1305>::from_slice(nonce), ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Open a secretbox that must contain exactly one 32-byte key.
pub fn decrypt_secret(
    ciphertext: &[u8],
    nonce: &[u8],
    key: &[u8],
) -> Result<Secret<32>, CryptoError> {
    let plaintext = decrypt(ciphertext, nonce, key)?;
    Secret::from_slice(&plaintext).ok_or(CryptoError::DecryptionFailed)
}

/// Unkeyed BLAKE2b-256 over the concatenation of `parts`.
pub fn generic_hash(parts: &[&[u8]]) -> [u8; HASH_BYTES] {
    let mut hasher = Blake2b::<U32>::new();
    for part in parts {
        Digest::update(&mut hasher, part);
    }
    let mut out = [0u8; HASH_BYTES];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Zero-pad or truncate a context string to exactly 8 bytes.
pub fn context_bytes(context: &str) -> [u8; CONTEXT_BYTES] {
    let mut out = [0u8; CONTEXT_BYTES];
    let bytes = context.as_bytes();
    let len = bytes.len().min(CONTEXT_BYTES);
    out[..len].copy_from_slice(&bytes[..len]);
    out
}

/// Deterministically derive a 32-byte key from an identifier, a context string and an optional
/// salt. Identical inputs always produce identical keys.
pub fn derive_key(
    identifier: &[u8],
    context: &str,
    salt: Option<&[u8]>,
) -> Result<Secret<32>, CryptoError> {
    let mut master = match salt {
        Some(salt) => generic_hash(&[salt, identifier]),
        None => generic_hash(&[identifier]),
    };

    let mut kdf_salt = [0u8; 16];
    kdf_salt[..8].copy_from_slice(&KDF_SUBKEY_ID.to_le_bytes());
    let mut persona = [0u8; 16];
    persona[..CONTEXT_BYTES].copy_from_slice(&context_bytes(context));

    let mac = Blake2bMac::<U32>::new_with_salt_and_personal(&master, &kdf_salt, &persona);
    master.zeroize();
    let mac = mac.map_err(|_| CryptoError::InvalidKeyLength {
        expected: KEY_BYTES,
        actual: HASH_BYTES,
    })?;

    let mut out = [0u8; KEY_BYTES];
    out.copy_from_slice(&mac.finalize().into_bytes());
    let key = Secret::from_bytes(out);
    out.zeroize();
    Ok(key)
}

/// Argon2id password hashing with caller-supplied cost parameters.
pub fn pwhash(
    password: &[u8],
    salt: &[u8],
    ops_limit: u64,
    mem_limit: u64,
) -> Result<Secret<32>, CryptoError> {
    if salt.len() != SALT_BYTES {
        return Err(CryptoError::InvalidSaltLength(salt.len()));
    }
    let t_cost = u32::try_from(ops_limit)
        .map_err(|_| CryptoError::PasswordDerivationFailed("ops limit out of range".into()))?;
    let m_cost = u32::try_from(mem_limit / 1024)
        .map_err(|_| CryptoError::PasswordDerivationFailed("memory limit out of range".into()))?;
    let params = Params::new(m_cost, t_cost, 1, Some(KEY_BYTES))
        .map_err(|e| CryptoError::PasswordDerivationFailed(e.to_string()))?;

    let mut out = [0u8; KEY_BYTES];
    Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
        .hash_password_into(password, salt, &mut out)
        .map_err(|e| CryptoError::PasswordDerivationFailed(e.to_string()))?;
    let key = Secret::from_bytes(out);
    out.zeroize();
    Ok(key)
}

/// Compare two byte strings without short-circuiting on the first differing byte. Only the
/// lengths are compared in variable time.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}

/// Byte-wise XOR of two equal-length buffers.
pub fn xor(a: &[u8], b: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if a.len() != b.len() {
        return Err(CryptoError::LengthMismatch(a.len(), b.len()));
    }
    Ok(a.iter().zip(b.iter()).map(|(x, y)| x ^ y).collect())
}

/// Overwrite a buffer with zeros in a way the optimizer won't elide.
pub fn secure_zero(buffer: &mut [u8]) {
    buffer.zeroize();
}

/// An X25519 key pair. The private half is zeroed on drop.
#[derive(Clone, Debug)]
pub struct KeyPair {
    pub public_key: [u8; 32],
    pub private_key: Secret<32>,
}

impl KeyPair {
    /// Generate a new key pair from 32 random bytes.
    pub fn generate<R>(csprng: &mut R) -> Result<KeyPair, CryptoError>
    where
        R: CryptoRng + RngCore + ?Sized,
    {
        let private_key = random_secret(csprng)?;
        let public_key = public_key_from_private(&private_key);
        Ok(KeyPair {
            public_key,
            private_key,
        })
    }
}

/// Recompute the X25519 public key for a private key.
pub fn public_key_from_private(private_key: &Secret<32>) -> [u8; 32] {
    let secret = StaticSecret::from(*private_key.as_bytes());
    PublicKey::from(&secret).to_bytes()
}
