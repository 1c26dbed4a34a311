//! Keys protecting the individual shares.
//!
//! - The device share key is derived from the device's identity and a secret issued by the
//!   device-registration service, so local storage alone is not enough to open the device share.
//! - The recovery key is the raw 256-bit entropy of a 24-word BIP39 English mnemonic. It is never
//!   stored; the user holds the phrase.
//! - The password key-encrypting-key is Argon2id over the password with stored salt and costs.

use base64::{engine::general_purpose::STANDARD, Engine};
use bip39::{Language, Mnemonic};
use rand_core::{CryptoRng, RngCore};
use zeroize::{Zeroize, Zeroizing};

use crate::{
    error::CryptoError,
    primitives::{derive_key, pwhash, random_array},
    secret::{Secret, SymmetricKey},
};

/// Key-derivation context for the device share key. Only the first 8 bytes take part.
pub const DEVICE_SHARE_CONTEXT: &str = "device share";

/// Number of words in a recovery phrase.
pub const MNEMONIC_WORDS: usize = 24;

/// Bytes of entropy encoded by a recovery phrase.
pub const RECOVERY_KEY_BYTES: usize = 32;

/// Derive the key that seals this device's share.
///
/// The identifier is `device_id:fingerprint:base64(device_secret)`, with the fingerprint segment
/// left out entirely when the fingerprint is empty.
pub fn device_share_key(
    device_id: &str,
    fingerprint: &str,
    device_secret: &[u8],
) -> Result<SymmetricKey, CryptoError> {
    let encoded_secret = Zeroizing::new(STANDARD.encode(device_secret));
    let mut identifier = Zeroizing::new(String::with_capacity(
        device_id.len() + fingerprint.len() + encoded_secret.len() + 2,
    ));
    identifier.push_str(device_id);
    identifier.push(':');
    if !fingerprint.is_empty() {
        identifier.push_str(fingerprint);
        identifier.push(':');
    }
    identifier.push_str(&encoded_secret);
    derive_key(identifier.as_bytes(), DEVICE_SHARE_CONTEXT, None)
}

/// Lowercase, trim, and collapse whitespace between words.
pub fn normalize_mnemonic(mnemonic: &str) -> Zeroizing<String> {
    let lowered = Zeroizing::new(mnemonic.to_lowercase());
    Zeroizing::new(lowered.split_whitespace().collect::<Vec<_>>().join(" "))
}

/// Validate a 24-word phrase and return its entropy as the recovery key.
pub fn recovery_key_from_mnemonic(mnemonic: &str) -> Result<SymmetricKey, CryptoError> {
    let normalized = normalize_mnemonic(mnemonic);
    let parsed = Mnemonic::parse_in_normalized(Language::English, &normalized)
        .map_err(|_| CryptoError::MnemonicValidationFailed)?;
    if parsed.word_count() != MNEMONIC_WORDS {
        return Err(CryptoError::MnemonicValidationFailed);
    }
    let (mut entropy, len) = parsed.to_entropy_array();
    let key = Secret::from_slice(&entropy[..len]);
    entropy.zeroize();
    key.ok_or(CryptoError::MnemonicValidationFailed)
}

/// Encode 32 bytes of entropy as a 24-word phrase. Inverse of [`recovery_key_from_mnemonic`].
pub fn entropy_to_mnemonic(entropy: &[u8]) -> Result<Zeroizing<String>, CryptoError> {
    if entropy.len() != RECOVERY_KEY_BYTES {
        return Err(CryptoError::MnemonicGenerationFailed);
    }
    let mnemonic = Mnemonic::from_entropy_in(Language::English, entropy)
        .map_err(|_| CryptoError::MnemonicGenerationFailed)?;
    Ok(Zeroizing::new(mnemonic.to_string()))
}

/// Draw fresh entropy and return both the phrase and the recovery key it encodes.
pub fn generate_mnemonic<R>(csprng: &mut R) -> Result<(Zeroizing<String>, SymmetricKey), CryptoError>
where
    R: CryptoRng + RngCore + ?Sized,
{
    let mut entropy: [u8; RECOVERY_KEY_BYTES] = random_array(csprng)?;
    let phrase = entropy_to_mnemonic(&entropy);
    let key = Secret::from_bytes(entropy);
    entropy.zeroize();
    Ok((phrase?, key))
}

/// Derive the password key-encrypting-key.
pub fn password_kek(
    password: &str,
    salt: &[u8],
    ops_limit: u64,
    mem_limit: u64,
) -> Result<SymmetricKey, CryptoError> {
    pwhash(password.as_bytes(), salt, ops_limit, mem_limit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    const ZERO_PHRASE: &str = "abandon abandon abandon abandon abandon abandon abandon abandon \
        abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon \
        abandon abandon abandon abandon art";
    const SEVENS_PHRASE: &str = "legal winner thank year wave sausage worth useful legal winner \
        thank year wave sausage worth useful legal winner thank year wave sausage worth title";

    #[test]
    fn device_key_vectors() {
        let secret = [7u8; 32];
        let key = device_share_key("device-123", "linux-x86_64", &secret).unwrap();
        assert_eq!(
            hex::encode(key.as_bytes()),
            "584e4fbefc45600058eacb08f50b8aee8d92e07a770241c5c18eeb5b824218a8"
        );
        let key = device_share_key("device-123", "", &secret).unwrap();
        assert_eq!(
            hex::encode(key.as_bytes()),
            "758c2ac5e52d75ee327c5dbf53a058bf70080bd14f4fce3636175eac4824dd54"
        );
    }

    #[test]
    fn device_key_depends_on_secret() {
        let a = device_share_key("device-123", "fp", &[1u8; 32]).unwrap();
        let b = device_share_key("device-123", "fp", &[2u8; 32]).unwrap();
        let c = device_share_key("device-124", "fp", &[1u8; 32]).unwrap();
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn known_mnemonics() {
        assert_eq!(&*entropy_to_mnemonic(&[0u8; 32]).unwrap(), &*normalize_mnemonic(ZERO_PHRASE));
        assert_eq!(
            &*entropy_to_mnemonic(&[0x7f; 32]).unwrap(),
            &*normalize_mnemonic(SEVENS_PHRASE)
        );
        assert_eq!(recovery_key_from_mnemonic(ZERO_PHRASE).unwrap().as_bytes(), &[0u8; 32]);
        assert_eq!(recovery_key_from_mnemonic(SEVENS_PHRASE).unwrap().as_bytes(), &[0x7f; 32]);
    }

    #[test]
    fn mnemonic_round_trip() {
        let mut csprng = StdRng::seed_from_u64(3);
        for _ in 0..64 {
            let entropy: [u8; 32] = random_array(&mut csprng).unwrap();
            let phrase = entropy_to_mnemonic(&entropy).unwrap();
            assert_eq!(phrase.split(' ').count(), MNEMONIC_WORDS);
            let key = recovery_key_from_mnemonic(&phrase).unwrap();
            assert_eq!(key.as_bytes(), &entropy);
        }
    }

    #[test]
    fn generated_phrase_matches_key() {
        let mut csprng = StdRng::seed_from_u64(11);
        let (phrase, key) = generate_mnemonic(&mut csprng).unwrap();
        assert_eq!(recovery_key_from_mnemonic(&phrase).unwrap(), key);
    }

    #[test]
    fn mnemonic_normalization() {
        let messy = format!("  {}\n", ZERO_PHRASE.to_uppercase().replace(' ', "   "));
        assert_eq!(recovery_key_from_mnemonic(&messy).unwrap().as_bytes(), &[0u8; 32]);
    }

    #[test]
    fn invalid_mnemonics() {
        let bad_checksum = ZERO_PHRASE.replace("art", "abandon");
        assert_eq!(
            recovery_key_from_mnemonic(&bad_checksum).unwrap_err(),
            CryptoError::MnemonicValidationFailed
        );
        let bad_word = ZERO_PHRASE.replace("art", "notaword");
        assert_eq!(
            recovery_key_from_mnemonic(&bad_word).unwrap_err(),
            CryptoError::MnemonicValidationFailed
        );
        let twelve = "abandon abandon abandon abandon abandon abandon abandon abandon abandon \
            abandon abandon about";
        assert_eq!(
            recovery_key_from_mnemonic(twelve).unwrap_err(),
            CryptoError::MnemonicValidationFailed
        );
        assert_eq!(
            recovery_key_from_mnemonic("").unwrap_err(),
            CryptoError::MnemonicValidationFailed
        );
    }

    #[test]
    fn entropy_must_be_32_bytes() {
        assert_eq!(
            entropy_to_mnemonic(&[0u8; 16]).unwrap_err(),
            CryptoError::MnemonicGenerationFailed
        );
    }

    #[test]
    fn password_kek_matches_pwhash() {
        let salt = [5u8; 16];
        let kek = password_kek("correct-horse", &salt, 1, 8192).unwrap();
        let raw = pwhash(b"correct-horse", &salt, 1, 8192).unwrap();
        assert_eq!(kek, raw);
        assert_ne!(password_kek("wrong", &salt, 1, 8192).unwrap(), kek);
    }
}
