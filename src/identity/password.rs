//! Salted, iterated password hashing.
//!
//! Stored hashes are self-describing: `iterations:hex(salt):hex(digest)` for
//! PBKDF2-HMAC-SHA1, or an Argon2 PHC string (`$argon2id$...`). Verification needs
//! nothing beyond the stored string itself.

use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use password_hash::{PasswordHash, SaltString};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use subtle::ConstantTimeEq;

use crate::error::{AuthError, AuthResult};

pub const SALT_BYTE_SIZE: usize = 24;
pub const HASH_BYTE_SIZE: usize = 24;
pub const PBKDF2_ITERATIONS: u32 = 1000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PasswordScheme {
    #[default]
    Pbkdf2,
    Argon2,
}

pub(crate) fn fill_random(buf: &mut [u8]) -> AuthResult<()> {
    getrandom::getrandom(buf).map_err(|e| AuthError::Config(format!("system random source unavailable: {e}")))
}

/// PBKDF2-HMAC-SHA1 of `secret` over `salt`, producing `len` bytes.
pub fn pbkdf2_sha1(secret: &[u8], salt: &[u8], rounds: u32, len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len];
    pbkdf2::pbkdf2_hmac::<Sha1>(secret, salt, rounds, &mut out);
    out
}

pub fn hash_password(password: &str) -> AuthResult<String> {
    hash_password_with(password, PasswordScheme::Pbkdf2)
}

pub fn hash_password_with(password: &str, scheme: PasswordScheme) -> AuthResult<String> {
    match scheme {
        PasswordScheme::Pbkdf2 => {
            let mut salt = [0u8; SALT_BYTE_SIZE];
            fill_random(&mut salt)?;
            let digest = pbkdf2_sha1(password.as_bytes(), &salt, PBKDF2_ITERATIONS, HASH_BYTE_SIZE);
            Ok(format!("{}:{}:{}", PBKDF2_ITERATIONS, hex::encode(salt), hex::encode(digest)))
        }
        PasswordScheme::Argon2 => {
            let mut salt_bytes = [0u8; 16];
            fill_random(&mut salt_bytes)?;
            let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| AuthError::InvalidHashFormat(e.to_string()))?;
            let phc = Argon2::default()
                .hash_password(password.as_bytes(), &salt)
                .map_err(|e| AuthError::InvalidHashFormat(e.to_string()))?;
            Ok(phc.to_string())
        }
    }
}

/// Check `password` against a stored hash. A corrupt hash is an error, never a
/// plain `false`.
pub fn verify_password(password: &str, stored: &str) -> AuthResult<bool> {
    if stored.starts_with("$argon2") {
        let parsed = PasswordHash::new(stored).map_err(|e| AuthError::InvalidHashFormat(e.to_string()))?;
        return match Argon2::default().verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(password_hash::Error::Password) => Ok(false),
            Err(e) => Err(AuthError::InvalidHashFormat(e.to_string())),
        };
    }

    let parts: Vec<&str> = stored.split(':').collect();
    let [iterations, salt, digest] = parts.as_slice() else {
        return Err(AuthError::InvalidHashFormat("expected iterations:salt:digest".into()));
    };
    let iterations: u32 = iterations
        .parse()
        .map_err(|_| AuthError::InvalidHashFormat(format!("bad iteration count '{iterations}'")))?;
    if iterations == 0 {
        return Err(AuthError::InvalidHashFormat("iteration count must be positive".into()));
    }
    let salt = hex::decode(salt).map_err(|e| AuthError::InvalidHashFormat(format!("salt: {e}")))?;
    let expected = hex::decode(digest).map_err(|e| AuthError::InvalidHashFormat(format!("digest: {e}")))?;
    if salt.is_empty() || expected.is_empty() {
        return Err(AuthError::InvalidHashFormat("empty salt or digest".into()));
    }

    let actual = pbkdf2_sha1(password.as_bytes(), &salt, iterations, expected.len());
    Ok(actual.ct_eq(&expected).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify() {
        let h = hash_password("MyVerySecretPassword").unwrap();
        assert!(verify_password("MyVerySecretPassword", &h).unwrap());
        assert!(!verify_password("MyVerySecretPassword", &hash_password("Wrong").unwrap()).unwrap());
    }

    #[test]
    fn hash_layout() {
        let h = hash_password("br").unwrap();
        let parts: Vec<&str> = h.split(':').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "1000");
        assert_eq!(parts[1].len(), SALT_BYTE_SIZE * 2);
        assert_eq!(parts[2].len(), HASH_BYTE_SIZE * 2);
        assert_ne!(h, hash_password("br").unwrap());
    }

    #[test]
    fn known_vector_verifies() {
        // RFC 6070, PBKDF2-HMAC-SHA1 "password"/"salt", 2 rounds, 20 bytes
        let stored = format!("2:{}:ea6c014dc72d6f8ccd1ed92ace1d41f0d8de8957", hex::encode("salt"));
        assert!(verify_password("password", &stored).unwrap());
        assert!(!verify_password("passwort", &stored).unwrap());
    }

    #[test]
    fn corrupt_hashes_are_errors() {
        for bad in ["", "1000", "abc:00:00", "0:00:00", "1000:zz:00", "1000:00:", "1000:00:00:00"] {
            assert!(matches!(verify_password("pw", bad), Err(AuthError::InvalidHashFormat(_))), "{bad}");
        }
        assert!(matches!(verify_password("pw", "$argon2id$garbage"), Err(AuthError::InvalidHashFormat(_))));
    }

    #[test]
    fn argon2_hashes_verify() {
        let h = hash_password_with("clarion", PasswordScheme::Argon2).unwrap();
        assert!(h.starts_with("$argon2"));
        assert!(verify_password("clarion", &h).unwrap());
        assert!(!verify_password("clarinet", &h).unwrap());
    }
}
