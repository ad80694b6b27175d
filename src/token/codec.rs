//! Token encryption: `Base64(salt || iv || AES-128-CTR(payload) || tag)`.
//!
//! Key material is derived per token from the shared secret and a fresh random salt
//! with PBKDF2-HMAC-SHA1. The first 16 bytes key AES, the rest key an HMAC-SHA256
//! tag over `salt || iv || ciphertext`. The tag is checked before anything is
//! decrypted.

use std::fmt;

use aes::Aes128;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ctr::cipher::{KeyIvInit, StreamCipher};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::payload::TokenPayload;
use crate::error::{AuthError, AuthResult};
use crate::identity::password::{fill_random, pbkdf2_sha1};

type Aes128Ctr = ctr::Ctr128BE<Aes128>;
type HmacSha256 = Hmac<Sha256>;

pub const SALT_LEN: usize = 24;
pub const IV_LEN: usize = 16;
pub const KEY_LEN: usize = 16;
pub const MAC_KEY_LEN: usize = 32;
pub const TAG_LEN: usize = 32;
pub const KEY_ITERATIONS: u32 = 1000;
pub const MIN_SECRET_LEN: usize = 16;

/// Symmetric key material shared by issuer and verifiers. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct SharedSecret(Vec<u8>);

impl SharedSecret {
    pub fn new(bytes: impl Into<Vec<u8>>) -> AuthResult<Self> {
        let bytes = bytes.into();
        if bytes.len() < MIN_SECRET_LEN {
            return Err(AuthError::InvalidSharedSecret(format!(
                "shared secret must be at least {MIN_SECRET_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] { &self.0 }
}

impl std::str::FromStr for SharedSecret {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> { SharedSecret::new(s.as_bytes()) }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "SharedSecret(<{} bytes>)", self.0.len()) }
}

#[derive(Debug, Clone)]
pub struct TokenCodec {
    secret: SharedSecret,
}

impl TokenCodec {
    pub fn new(secret: SharedSecret) -> Self { Self { secret } }

    pub fn issue(&self, payload: &TokenPayload) -> AuthResult<String> {
        payload.check()?;
        let mut salt = [0u8; SALT_LEN];
        let mut iv = [0u8; IV_LEN];
        fill_random(&mut salt)?;
        fill_random(&mut iv)?;

        let keys = self.keys(&salt);
        let text = payload.encode();
        let mut raw = Vec::with_capacity(SALT_LEN + IV_LEN + text.len() + TAG_LEN);
        raw.extend_from_slice(&salt);
        raw.extend_from_slice(&iv);
        let body_start = raw.len();
        raw.extend_from_slice(text.as_bytes());
        keys.cipher(&iv)?.apply_keystream(&mut raw[body_start..]);
        let tag = keys.mac()?.chain_update(&raw).finalize().into_bytes();
        raw.extend_from_slice(&tag);
        Ok(STANDARD.encode(raw))
    }

    pub fn consume(&self, token: &str) -> AuthResult<TokenPayload> {
        let raw = STANDARD
            .decode(token.trim())
            .map_err(|e| AuthError::DecodeError(format!("invalid base64: {e}")))?;
        if raw.len() <= SALT_LEN + IV_LEN + TAG_LEN {
            return Err(AuthError::DecodeError("token too short".into()));
        }
        let (signed, tag) = raw.split_at(raw.len() - TAG_LEN);
        let (salt, rest) = signed.split_at(SALT_LEN);
        let (iv, ciphertext) = rest.split_at(IV_LEN);

        let keys = self.keys(salt);
        keys.mac()?
            .chain_update(signed)
            .verify_slice(tag)
            .map_err(|_| AuthError::DecodeError("integrity check failed".into()))?;

        let mut body = ciphertext.to_vec();
        keys.cipher(iv)?.apply_keystream(&mut body);
        let text = String::from_utf8(body).map_err(|_| AuthError::DecodeError("plaintext is not utf-8".into()))?;
        TokenPayload::decode(&text)
    }

    fn keys(&self, salt: &[u8]) -> DerivedKeys {
        DerivedKeys(pbkdf2_sha1(self.secret.as_bytes(), salt, KEY_ITERATIONS, KEY_LEN + MAC_KEY_LEN))
    }
}

/// `KEY_LEN` bytes of AES key followed by `MAC_KEY_LEN` bytes of HMAC key.
struct DerivedKeys(Vec<u8>);

impl DerivedKeys {
    fn cipher(&self, iv: &[u8]) -> AuthResult<Aes128Ctr> {
        Aes128Ctr::new_from_slices(&self.0[..KEY_LEN], iv).map_err(|e| AuthError::DecodeError(e.to_string()))
    }

    fn mac(&self) -> AuthResult<HmacSha256> {
        <HmacSha256 as Mac>::new_from_slice(&self.0[KEY_LEN..]).map_err(|e| AuthError::DecodeError(e.to_string()))
    }
}
