//! Symmetric session codec of the control channel.
//!
//! Every message is encrypted with AES-128-CTR under the session key; a
//! fresh random 16-byte IV is generated per message and prefixed to the
//! ciphertext. AES-128-GCM is provided but reserved — only CTR is wired
//! into the control channel.

use aes::Aes128;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Nonce};
use ctr::cipher::{KeyIvInit, StreamCipher};
use rand::RngCore;

type Aes128Ctr = ctr::Ctr128BE<Aes128>;

pub const AES_KEY_LEN: usize = 16;
pub const AES_IV_LEN: usize = 16;
pub const GCM_MIN_IV_LEN: usize = 12;
pub const GCM_TAG_LEN: usize = 16;

pub const INVALID_CODE: i32 = -1;
pub const NONE_CODE: i32 = 0;
pub const CTR_CODE: i32 = 1;
pub const GCM_CODE: i32 = 2;

/// Canonical algorithm string announced during the encryption handshake.
pub const ENCRYPT_ALG: &str = "aes128ctr";

/// Upper bound of one encapsulated announce item.
const MAX_ALG_STR_LEN: usize = 64;

const VERSION: i32 = 1;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("algorithm is not CTR")]
    NotCtr,
    #[error("invalid key length")]
    InvalidKey,
    #[error("invalid iv length")]
    InvalidIv,
    #[error("invalid aad")]
    InvalidAad,
    #[error("invalid tag length")]
    InvalidTag,
    #[error("input too short")]
    InputTooShort,
    #[error("cipher operation failed")]
    CipherFailure,
}

/// The algorithm string this endpoint advertises.
pub fn algorithm() -> &'static str {
    ENCRYPT_ALG
}

/// Protocol version of the encryption handshake. Always 1; peers announcing
/// anything else are answered with ours and otherwise ignored.
pub fn version() -> i32 {
    VERSION
}

/// Match a peer algorithm string to an algorithm id by exact equality.
pub fn match_algorithm(alg: &str) -> i32 {
    if alg.len() >= MAX_ALG_STR_LEN {
        return INVALID_CODE;
    }
    if alg == ENCRYPT_ALG {
        return CTR_CODE;
    }
    INVALID_CODE
}

/// An all-zero session key disables the codec.
pub fn is_all_zero(key: &[u8]) -> bool {
    key.iter().all(|&b| b == 0)
}

fn random_iv() -> [u8; AES_IV_LEN] {
    let mut iv = [0u8; AES_IV_LEN];
    rand::rng().fill_bytes(&mut iv);
    iv
}

/// Encrypt `input` under `key`, producing `IV ‖ ciphertext`.
///
/// Only [`CTR_CODE`] is accepted here; GCM is reserved for the data path.
pub fn encrypt_data(alg: i32, key: &[u8], input: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if alg != CTR_CODE {
        return Err(CryptoError::NotCtr);
    }
    if key.len() != AES_KEY_LEN {
        return Err(CryptoError::InvalidKey);
    }

    let iv = random_iv();
    let mut cipher =
        Aes128Ctr::new_from_slices(key, &iv).map_err(|_| CryptoError::CipherFailure)?;

    let mut out = Vec::with_capacity(AES_IV_LEN + input.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(input);
    cipher.apply_keystream(&mut out[AES_IV_LEN..]);

    Ok(out)
}

/// Invert [`encrypt_data`]: split the IV prefix and decrypt the tail.
pub fn decrypt_data(alg: i32, key: &[u8], input: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if alg != CTR_CODE {
        return Err(CryptoError::NotCtr);
    }
    if key.len() != AES_KEY_LEN {
        return Err(CryptoError::InvalidKey);
    }
    if input.len() <= AES_IV_LEN {
        return Err(CryptoError::InputTooShort);
    }

    let (iv, payload) = input.split_at(AES_IV_LEN);
    let mut cipher = Aes128Ctr::new_from_slices(key, iv).map_err(|_| CryptoError::CipherFailure)?;

    let mut out = payload.to_vec();
    cipher.apply_keystream(&mut out);

    Ok(out)
}

/// Key material for one GCM operation.
pub struct GcmInfo<'a> {
    pub key: &'a [u8],
    pub iv: &'a [u8],
    pub aad: &'a [u8],
}

fn check_gcm_info(info: &GcmInfo<'_>) -> Result<(), CryptoError> {
    if info.key.len() != AES_KEY_LEN {
        return Err(CryptoError::InvalidKey);
    }
    if info.iv.len() < GCM_MIN_IV_LEN {
        return Err(CryptoError::InvalidIv);
    }
    Ok(())
}

/// AES-128-GCM encryption. Reserved: validated and functional, but not wired
/// into the control channel.
pub fn gcm_encrypt(input: &[u8], info: &GcmInfo<'_>) -> Result<Vec<u8>, CryptoError> {
    check_gcm_info(info)?;

    let cipher = Aes128Gcm::new_from_slice(info.key).map_err(|_| CryptoError::InvalidKey)?;
    let nonce = Nonce::from_slice(&info.iv[..GCM_MIN_IV_LEN]);

    cipher
        .encrypt(
            nonce,
            Payload {
                msg: input,
                aad: info.aad,
            },
        )
        .map_err(|_| CryptoError::CipherFailure)
}

/// AES-128-GCM decryption of `ciphertext ‖ tag`.
pub fn gcm_decrypt(input: &[u8], info: &GcmInfo<'_>) -> Result<Vec<u8>, CryptoError> {
    check_gcm_info(info)?;
    if input.len() < GCM_TAG_LEN {
        return Err(CryptoError::InvalidTag);
    }

    let cipher = Aes128Gcm::new_from_slice(info.key).map_err(|_| CryptoError::InvalidKey)?;
    let nonce = Nonce::from_slice(&info.iv[..GCM_MIN_IV_LEN]);

    cipher
        .decrypt(
            nonce,
            Payload {
                msg: input,
                aad: info.aad,
            },
        )
        .map_err(|_| CryptoError::CipherFailure)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ctr_round_trip() {
        let mut key = [0u8; AES_KEY_LEN];
        key[15] = 0x5a;

        let out = encrypt_data(CTR_CODE, &key, b"hello").unwrap();
        assert_eq!(out.len(), AES_IV_LEN + 5);

        let plain = decrypt_data(CTR_CODE, &key, &out).unwrap();
        assert_eq!(plain, b"hello");
    }

    #[test]
    fn iv_is_fresh_per_message() {
        let key = [7u8; AES_KEY_LEN];

        let a = encrypt_data(CTR_CODE, &key, b"payload").unwrap();
        let b = encrypt_data(CTR_CODE, &key, b"payload").unwrap();

        assert_ne!(a[..AES_IV_LEN], b[..AES_IV_LEN]);
    }

    #[test]
    fn rejects_non_ctr_and_bad_key() {
        assert_eq!(
            encrypt_data(GCM_CODE, &[0u8; 16], b"x"),
            Err(CryptoError::NotCtr)
        );
        assert_eq!(
            encrypt_data(CTR_CODE, &[0u8; 8], b"x"),
            Err(CryptoError::InvalidKey)
        );
        assert_eq!(
            decrypt_data(CTR_CODE, &[0u8; 16], &[0u8; AES_IV_LEN]),
            Err(CryptoError::InputTooShort)
        );
    }

    #[test]
    fn algorithm_matching() {
        assert_eq!(match_algorithm("aes128ctr"), CTR_CODE);
        assert_eq!(match_algorithm("aes128gcm"), INVALID_CODE);
        assert_eq!(match_algorithm(&"x".repeat(64)), INVALID_CODE);
        assert_eq!(version(), 1);
    }

    #[test]
    fn gcm_round_trip() {
        let info = GcmInfo {
            key: &[3u8; AES_KEY_LEN],
            iv: &[9u8; GCM_MIN_IV_LEN],
            aad: b"header",
        };

        let sealed = gcm_encrypt(b"secret", &info).unwrap();
        assert_eq!(sealed.len(), 6 + GCM_TAG_LEN);

        let opened = gcm_decrypt(&sealed, &info).unwrap();
        assert_eq!(opened, b"secret");
    }

    #[test]
    fn zero_key_detection() {
        assert!(is_all_zero(&[0u8; 16]));
        assert!(!is_all_zero(&[0, 0, 1, 0]));
    }
}
