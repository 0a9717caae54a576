//! Decryption of end-to-end encrypted Matrix attachments (`EncryptedFile`, v2).
//!
//! The ciphertext is AES-256 in counter mode with a 128-bit big-endian counter
//! seeded from the IV. The SHA-256 of the ciphertext must match the hash
//! carried in the event before anything is decrypted.

use aes::Aes256;
use base64::{
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine as _,
};
use ctr::cipher::{KeyIvInit, StreamCipher};
use sha2::{Digest, Sha256};
use shared::events::EncryptedFile;
use thiserror::Error;
use zeroize::Zeroize;

type Aes256Ctr = ctr::Ctr128BE<Aes256>;

const SUPPORTED_ALGORITHM: &str = "A256CTR";
const SUPPORTED_KEY_TYPE: &str = "oct";
const KEY_LEN: usize = 32;
const IV_LEN: usize = 16;

const LENIENT_PADDING: GeneralPurposeConfig =
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent);
const STANDARD_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::STANDARD, LENIENT_PADDING);
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::URL_SAFE, LENIENT_PADDING);

#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("unsupported attachment key algorithm '{0}'")]
    UnsupportedAlgorithm(String),
    #[error("unsupported attachment key type '{0}'")]
    UnsupportedKeyType(String),
    #[error("attachment is missing a sha256 hash")]
    MissingHash,
    #[error("attachment sha256 does not match the downloaded ciphertext")]
    HashMismatch,
    #[error("invalid base64 in attachment {field}: {source}")]
    Encoding {
        field: &'static str,
        source: base64::DecodeError,
    },
    #[error("attachment key must be {KEY_LEN} bytes, got {0}")]
    KeyLength(usize),
    #[error("attachment iv must be {IV_LEN} bytes, got {0}")]
    IvLength(usize),
}

pub fn decrypt_attachment(
    ciphertext: &[u8],
    file: &EncryptedFile,
) -> Result<Vec<u8>, AttachmentError> {
    if file.key.alg != SUPPORTED_ALGORITHM {
        return Err(AttachmentError::UnsupportedAlgorithm(file.key.alg.clone()));
    }
    if file.key.kty != SUPPORTED_KEY_TYPE {
        return Err(AttachmentError::UnsupportedKeyType(file.key.kty.clone()));
    }

    let expected_hash = file
        .hashes
        .get("sha256")
        .ok_or(AttachmentError::MissingHash)?;
    let expected_hash = decode(&STANDARD_LENIENT, "hashes.sha256", expected_hash)?;
    if Sha256::digest(ciphertext).as_slice() != expected_hash.as_slice() {
        return Err(AttachmentError::HashMismatch);
    }

    let iv = decode(&STANDARD_LENIENT, "iv", &file.iv)?;
    if iv.len() != IV_LEN {
        return Err(AttachmentError::IvLength(iv.len()));
    }

    let mut key = decode(&URL_SAFE_LENIENT, "key.k", &file.key.k)?;
    if key.len() != KEY_LEN {
        let len = key.len();
        key.zeroize();
        return Err(AttachmentError::KeyLength(len));
    }

    let cipher = Aes256Ctr::new_from_slices(&key, &iv);
    key.zeroize();
    let mut cipher = cipher.map_err(|_| AttachmentError::KeyLength(KEY_LEN))?;

    let mut plaintext = ciphertext.to_vec();
    cipher.apply_keystream(&mut plaintext);
    Ok(plaintext)
}

fn decode(
    engine: &GeneralPurpose,
    field: &'static str,
    value: &str,
) -> Result<Vec<u8>, AttachmentError> {
    engine
        .decode(value)
        .map_err(|source| AttachmentError::Encoding { field, source })
}

#[cfg(test)]
#[path = "tests/attachment_tests.rs"]
mod tests;
