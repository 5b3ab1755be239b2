//! Passphrase-based encryption of single string secrets.
//!
//! A package is base64 of a JSON object with exactly four fields:
//!
//! ```text
//! {"cipher": "AES-CFB", "iv": "<base64>", "salt": "$2b$12$...", "message": "<base64>"}
//! ```
//!
//! The key is derived by running bcrypt over each 72-byte chunk of the
//! passphrase with the embedded salt, then hashing the concatenated bcrypt
//! strings with SHA-256. The encrypted message is `sha256(plaintext) ||
//! plaintext`, so a wrong passphrase is detected on decrypt.

use aes::cipher::{AsyncStreamCipher, KeyIvInit};
use base64::alphabet;
use base64::engine::{general_purpose, GeneralPurpose};
use base64::Engine;
use rand::RngCore;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

type Aes256CfbEnc = cfb_mode::Encryptor<aes::Aes256>;
type Aes256CfbDec = cfb_mode::Decryptor<aes::Aes256>;

/// Identifier stored in the `cipher` field.
pub const CIPHER_ID: &str = "AES-CFB";

const IV_LEN: usize = 16;
const DIGEST_LEN: usize = 32;
const BCRYPT_CHUNK: usize = 72;
const DEFAULT_COST: u32 = 12;
const MAX_COST: u32 = 16;

const BCRYPT_B64: GeneralPurpose = GeneralPurpose::new(&alphabet::BCRYPT, general_purpose::NO_PAD);

/// Errors from [`decrypt`].
///
/// `Malformed` means the package itself is broken; `IncorrectPassPhrase`
/// means the package is intact but the passphrase does not open it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Structural problem with the package.
    #[error("{0}")]
    Malformed(String),

    /// Integrity check failed after decryption.
    #[error("incorrect pass phrase")]
    IncorrectPassPhrase,
}

impl CryptoError {
    fn malformed(message: &str) -> Self {
        Self::Malformed(message.to_string())
    }

    /// True for the authentication failure kind.
    pub fn is_key_error(&self) -> bool {
        matches!(self, Self::IncorrectPassPhrase)
    }
}

/// Encrypt `plaintext` with `secret`, returning a self-describing package.
pub fn encrypt(plaintext: &str, secret: &str) -> Result<String, CryptoError> {
    encrypt_with_cost(plaintext, secret, DEFAULT_COST)
}

pub(crate) fn encrypt_with_cost(
    plaintext: &str,
    secret: &str,
    cost: u32,
) -> Result<String, CryptoError> {
    let mut rng = rand::thread_rng();

    let mut salt_bytes = [0u8; 16];
    rng.fill_bytes(&mut salt_bytes);
    let salt = format!("$2b${:02}${}", cost, BCRYPT_B64.encode(salt_bytes));

    let mut iv = [0u8; IV_LEN];
    rng.fill_bytes(&mut iv);

    let key = derive_key(secret, cost, salt_bytes)?;

    let mut message = Sha256::digest(plaintext.as_bytes()).to_vec();
    message.extend_from_slice(plaintext.as_bytes());

    Aes256CfbEnc::new_from_slices(&key, &iv)
        .map_err(|_| CryptoError::malformed("bad iv length in json"))?
        .encrypt(&mut message);

    let package = json!({
        "cipher": CIPHER_ID,
        "iv": general_purpose::STANDARD.encode(iv),
        "salt": salt,
        "message": general_purpose::STANDARD.encode(&message),
    });

    Ok(general_purpose::STANDARD.encode(package.to_string()))
}

/// Decrypt a package produced by [`encrypt`].
pub fn decrypt(package: &str, secret: &str) -> Result<String, CryptoError> {
    let raw = general_purpose::STANDARD
        .decode(package.trim())
        .map_err(|_| CryptoError::malformed("base64 decoding error"))?;

    let fields: Value =
        serde_json::from_slice(&raw).map_err(|_| CryptoError::malformed("bad json"))?;
    let fields = fields
        .as_object()
        .ok_or_else(|| CryptoError::malformed("bad json"))?;

    match fields.get("cipher").and_then(Value::as_str) {
        Some(CIPHER_ID) => {}
        _ => return Err(CryptoError::malformed("bad cipher in json")),
    }

    let iv = fields
        .get("iv")
        .and_then(Value::as_str)
        .and_then(|s| general_purpose::STANDARD.decode(s).ok())
        .ok_or_else(|| CryptoError::malformed("bad iv in json"))?;
    if iv.len() != IV_LEN {
        return Err(CryptoError::malformed("bad iv length in json"));
    }

    let (cost, salt_bytes) = fields
        .get("salt")
        .and_then(Value::as_str)
        .and_then(parse_salt)
        .ok_or_else(|| CryptoError::malformed("bad salt in json"))?;

    let mut message = fields
        .get("message")
        .and_then(Value::as_str)
        .ok_or_else(|| CryptoError::malformed("no message in json"))
        .and_then(|s| {
            general_purpose::STANDARD
                .decode(s)
                .map_err(|_| CryptoError::malformed("base64 decoding error"))
        })?;

    let key = derive_key(secret, cost, salt_bytes)?;
    Aes256CfbDec::new_from_slices(&key, &iv)
        .map_err(|_| CryptoError::malformed("bad iv length in json"))?
        .decrypt(&mut message);

    if message.len() < DIGEST_LEN {
        return Err(CryptoError::IncorrectPassPhrase);
    }
    let (digest, plaintext) = message.split_at(DIGEST_LEN);
    if Sha256::digest(plaintext)[..] != *digest {
        return Err(CryptoError::IncorrectPassPhrase);
    }

    String::from_utf8(plaintext.to_vec()).map_err(|_| CryptoError::malformed("invalid Unicode"))
}

/// Stretch `secret` into a 32-byte AES key.
fn derive_key(secret: &str, cost: u32, salt: [u8; 16]) -> Result<Vec<u8>, CryptoError> {
    let mut stretched = String::new();
    for chunk in secret.as_bytes().chunks(BCRYPT_CHUNK) {
        let parts = bcrypt::hash_with_salt(chunk, cost, salt)
            .map_err(|_| CryptoError::malformed("bad salt in json"))?;
        stretched.push_str(&parts.format_for_version(bcrypt::Version::TwoB));
    }
    Ok(Sha256::digest(stretched.as_bytes()).to_vec())
}

/// Parse `$2b$NN$<22 chars>` into its cost and raw salt bytes.
fn parse_salt(salt: &str) -> Option<(u32, [u8; 16])> {
    let mut parts = salt.split('$');
    if !parts.next()?.is_empty() {
        return None;
    }
    if !matches!(parts.next()?, "2a" | "2b" | "2y") {
        return None;
    }
    let cost: u32 = parts.next()?.parse().ok()?;
    if !(4..=MAX_COST).contains(&cost) {
        return None;
    }
    let encoded = parts.next()?;
    if parts.next().is_some() || encoded.len() != 22 {
        return None;
    }
    let bytes = BCRYPT_B64.decode(encoded).ok()?;
    let salt: [u8; 16] = bytes.try_into().ok()?;
    Some((cost, salt))
}
