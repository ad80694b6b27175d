//! Transport-agnostic credential parsing.
//!
//! Callers hand over the raw blob exactly as it arrived (for HTTP, the part of the
//! `Authorization` header after the scheme) together with a type tag.

use std::fmt;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::{AuthError, AuthResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialType {
    /// Base64 `user:password`, as in HTTP Basic authentication.
    Basic,
    /// Base64 `name:opaque_token`, presented to a resource server.
    Token,
}

impl CredentialType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialType::Basic => "Basic",
            CredentialType::Token => "Token",
        }
    }
}

impl fmt::Display for CredentialType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for CredentialType {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "basic" => Ok(CredentialType::Basic),
            "token" => Ok(CredentialType::Token),
            other => Err(AuthError::MalformedCredential(format!("unsupported credential type '{other}'"))),
        }
    }
}

/// A parsed credential. `Debug` never prints the secret half.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    Basic { username: String, password: String },
    Token { name: String, token: String },
}

impl Credential {
    pub fn credential_type(&self) -> CredentialType {
        match self {
            Credential::Basic { .. } => CredentialType::Basic,
            Credential::Token { .. } => CredentialType::Token,
        }
    }

    pub fn claimed_name(&self) -> &str {
        match self {
            Credential::Basic { username, .. } => username,
            Credential::Token { name, .. } => name,
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Basic { username, .. } => f.debug_struct("Basic").field("username", username).finish_non_exhaustive(),
            Credential::Token { name, .. } => f.debug_struct("Token").field("name", name).finish_non_exhaustive(),
        }
    }
}

/// Decode a Base64 `user:pass` blob. The decoded text must contain exactly one colon.
pub fn parse_basic(raw: &[u8]) -> AuthResult<(String, String)> {
    let trimmed = raw.trim_ascii();
    let decoded = STANDARD
        .decode(trimmed)
        .map_err(|e| AuthError::MalformedCredential(format!("invalid base64: {e}")))?;
    let text = String::from_utf8(decoded).map_err(|_| AuthError::MalformedCredential("credential is not utf-8".into()))?;
    let mut parts = text.split(':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(user), Some(pass), None) => Ok((user.to_string(), pass.to_string())),
        _ => Err(AuthError::MalformedCredential("expected exactly one ':' separator".into())),
    }
}

pub fn parse_credential(kind: CredentialType, raw: &[u8]) -> AuthResult<Credential> {
    let (first, second) = parse_basic(raw)?;
    Ok(match kind {
        CredentialType::Basic => Credential::Basic { username: first, password: second },
        CredentialType::Token => Credential::Token { name: first, token: second },
    })
}

/// Split an `Authorization` header value into its scheme and raw credential blob.
pub fn parse_authorization_header(value: &str) -> AuthResult<(CredentialType, &[u8])> {
    let (scheme, rest) = value
        .trim()
        .split_once(' ')
        .ok_or_else(|| AuthError::MalformedCredential("missing authorization scheme".into()))?;
    Ok((scheme.parse()?, rest.trim().as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b64(s: &str) -> Vec<u8> { STANDARD.encode(s).into_bytes() }

    #[test]
    fn basic_round_trip() {
        assert_eq!(parse_basic(&b64("fii:br")).unwrap(), ("fii".to_string(), "br".to_string()));
    }

    #[test]
    fn basic_rejects_wrong_separator_count() {
        assert!(matches!(parse_basic(&b64("fiibr")), Err(AuthError::MalformedCredential(_))));
        assert!(matches!(parse_basic(&b64("fii:b:r")), Err(AuthError::MalformedCredential(_))));
    }

    #[test]
    fn basic_rejects_bad_base64() {
        assert!(matches!(parse_basic(b"!!not base64!!"), Err(AuthError::MalformedCredential(_))));
    }

    #[test]
    fn header_splits_scheme() {
        let header = format!("Basic {}", STANDARD.encode("fii:br"));
        let (kind, raw) = parse_authorization_header(&header).unwrap();
        assert_eq!(kind, CredentialType::Basic);
        let cred = parse_credential(kind, raw).unwrap();
        assert_eq!(cred.claimed_name(), "fii");
        assert!(!format!("{cred:?}").contains("br\""));
        assert!(parse_authorization_header("Bearer abc").is_err());
        assert!(parse_authorization_header("Basic").is_err());
    }
}
