//! Device-info transport encryption and small hashing helpers.
//!
//! Clients encrypt their device fingerprint with the project secret before
//! sending it. Format on the wire:
//!
//! ```text
//! base64(iv) ":" base64(ciphertext)
//! ```
//!
//! The cipher is AES-256-CBC with PKCS#7 padding and a fresh 16-byte IV per
//! message. The 32-byte key comes from the project secret through one of the
//! [`KeyDerivation`] modes. `Legacy` is what deployed clients do (pad the
//! secret with ASCII `0`, cut at 32 bytes); `Hkdf` runs the secret through
//! HKDF-SHA256 and keeps the same transport format.

use std::fmt;
use std::str::FromStr;

use aes::Aes256;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use hkdf::Hkdf;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use sha2::{Digest, Sha256};
use thiserror::Error;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// AES-256 key size
const KEY_SIZE: usize = 32;

/// CBC IV size (one AES block)
const IV_SIZE: usize = 16;

/// Byte used to right-pad short secrets in legacy derivation
const LEGACY_PAD: u8 = b'0';

const HKDF_SALT: &[u8] = b"licensor-device-info-v1";
const HKDF_INFO: &[u8] = b"device-info";

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed transport string")]
    MalformedTransport,

    #[error("decryption failed")]
    DecryptionFailed,

    #[error("decrypted payload is not valid JSON: {0}")]
    PayloadNotJson(#[source] serde_json::Error),

    #[error("failed to serialize payload: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// How the 32-byte cipher key is obtained from a project secret.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyDerivation {
    /// Pad with ASCII `0` / truncate to 32 bytes. Wire-compatible with
    /// existing clients, but not a real KDF.
    #[default]
    Legacy,
    /// HKDF-SHA256 over the secret.
    Hkdf,
}

impl KeyDerivation {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyDerivation::Legacy => "legacy",
            KeyDerivation::Hkdf => "hkdf",
        }
    }

    pub fn derive(&self, secret: &str) -> [u8; KEY_SIZE] {
        match self {
            KeyDerivation::Legacy => {
                let mut key = [LEGACY_PAD; KEY_SIZE];
                let bytes = secret.as_bytes();
                let len = bytes.len().min(KEY_SIZE);
                key[..len].copy_from_slice(&bytes[..len]);
                key
            }
            KeyDerivation::Hkdf => {
                let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), secret.as_bytes());
                let mut key = [0u8; KEY_SIZE];
                hk.expand(HKDF_INFO, &mut key)
                    .expect("HKDF expand should not fail with valid length");
                key
            }
        }
    }
}

impl fmt::Display for KeyDerivation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyDerivation {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "legacy" => Ok(KeyDerivation::Legacy),
            "hkdf" => Ok(KeyDerivation::Hkdf),
            _ => Err(()),
        }
    }
}

/// Symmetric codec for device-info payloads, bound to one project secret.
#[derive(Clone)]
pub struct DeviceCipher {
    key: [u8; KEY_SIZE],
}

impl fmt::Debug for DeviceCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceCipher").finish_non_exhaustive()
    }
}

impl DeviceCipher {
    pub fn new(secret: &str, derivation: KeyDerivation) -> Self {
        Self {
            key: derivation.derive(secret),
        }
    }

    /// Serialize `payload` as JSON and encrypt it into a transport string.
    pub fn encrypt<T: Serialize + ?Sized>(&self, payload: &T) -> Result<String, CodecError> {
        let plaintext = serde_json::to_vec(payload).map_err(CodecError::Serialize)?;

        let mut iv = [0u8; IV_SIZE];
        OsRng.fill_bytes(&mut iv);

        let ciphertext = Aes256CbcEnc::new(&self.key.into(), &iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(&plaintext);

        Ok(format!("{}:{}", BASE64.encode(iv), BASE64.encode(ciphertext)))
    }

    /// Decrypt a transport string and parse the plaintext as `T`.
    pub fn decrypt<T: DeserializeOwned>(&self, transport: &str) -> Result<T, CodecError> {
        let mut parts = transport.split(':');
        let (Some(iv_b64), Some(ct_b64), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(CodecError::MalformedTransport);
        };

        let iv = BASE64
            .decode(iv_b64)
            .map_err(|_| CodecError::MalformedTransport)?;
        let ciphertext = BASE64
            .decode(ct_b64)
            .map_err(|_| CodecError::MalformedTransport)?;

        let plaintext = Aes256CbcDec::new_from_slices(&self.key, &iv)
            .map_err(|_| CodecError::DecryptionFailed)?
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|_| CodecError::DecryptionFailed)?;

        serde_json::from_slice(&plaintext).map_err(CodecError::PayloadNotJson)
    }
}

/// Encrypt with legacy key derivation (what deployed clients speak).
pub fn encrypt<T: Serialize + ?Sized>(payload: &T, secret: &str) -> Result<String, CodecError> {
    DeviceCipher::new(secret, KeyDerivation::Legacy).encrypt(payload)
}

/// Decrypt with legacy key derivation.
pub fn decrypt<T: DeserializeOwned>(transport: &str, secret: &str) -> Result<T, CodecError> {
    DeviceCipher::new(secret, KeyDerivation::Legacy).decrypt(transport)
}

/// Generate a new random project secret (32 bytes, hex encoded).
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// SHA-256 of `input`, lowercase hex.
pub fn sha256_hex(input: impl AsRef<[u8]>) -> String {
    hex::encode(Sha256::digest(input.as_ref()))
}
