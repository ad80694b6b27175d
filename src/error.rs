//! Unified error model for the identity core and its HTTP frontend.
//! Core operations return `AuthResult<T>`; the server maps each kind to a status
//! code and a stable snake_case code string.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("malformed credential: {0}")]
    MalformedCredential(String),
    #[error("authentication failed")]
    AuthenticationFailed,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid identifier path '{0}'")]
    InvalidIdentifier(String),
    #[error("invalid entity label '{0}'")]
    InvalidLabel(String),
    #[error("token issuance failed: {0}")]
    TokenIssuanceFailed(String),
    #[error("token decode error: {0}")]
    DecodeError(String),
    #[error("malformed token payload: {0}")]
    MalformedPayload(String),
    #[error("invalid password hash format: {0}")]
    InvalidHashFormat(String),
    #[error("cache capacity must be greater than zero")]
    CacheCapacityMisconfigured,
    #[error("invalid shared secret: {0}")]
    InvalidSharedSecret(String),
    #[error("forbidden")]
    Forbidden,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("configuration error: {0}")]
    Config(String),
}

impl AuthError {
    pub fn code_str(&self) -> &'static str {
        match self {
            AuthError::MalformedCredential(_) => "malformed_credential",
            AuthError::AuthenticationFailed => "authentication_failed",
            AuthError::NotFound(_) => "not_found",
            AuthError::InvalidIdentifier(_) => "invalid_identifier",
            AuthError::InvalidLabel(_) => "invalid_label",
            AuthError::TokenIssuanceFailed(_) => "token_issuance_failed",
            AuthError::DecodeError(_) => "decode_error",
            AuthError::MalformedPayload(_) => "malformed_payload",
            AuthError::InvalidHashFormat(_) => "invalid_hash_format",
            AuthError::CacheCapacityMisconfigured => "cache_capacity_misconfigured",
            AuthError::InvalidSharedSecret(_) => "invalid_shared_secret",
            AuthError::Forbidden => "forbidden",
            AuthError::Conflict(_) => "conflict",
            AuthError::Storage(_) => "storage_error",
            AuthError::Config(_) => "config_error",
        }
    }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            AuthError::MalformedCredential(_)
            | AuthError::InvalidIdentifier(_)
            | AuthError::InvalidLabel(_)
            | AuthError::DecodeError(_)
            | AuthError::MalformedPayload(_) => 400,
            AuthError::AuthenticationFailed => 401,
            AuthError::Forbidden => 403,
            AuthError::NotFound(_) => 404,
            AuthError::Conflict(_) => 409,
            AuthError::TokenIssuanceFailed(_) | AuthError::Storage(_) => 503,
            AuthError::InvalidHashFormat(_)
            | AuthError::CacheCapacityMisconfigured
            | AuthError::InvalidSharedSecret(_)
            | AuthError::Config(_) => 500,
        }
    }

    pub fn storage<E: std::fmt::Display>(err: E) -> Self { AuthError::Storage(err.to_string()) }
}

pub type AuthResult<T> = Result<T, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_mapping() {
        assert_eq!(AuthError::MalformedCredential("x".into()).http_status(), 400);
        assert_eq!(AuthError::AuthenticationFailed.http_status(), 401);
        assert_eq!(AuthError::Forbidden.http_status(), 403);
        assert_eq!(AuthError::NotFound("LotR".into()).http_status(), 404);
        assert_eq!(AuthError::Conflict("dup".into()).http_status(), 409);
        assert_eq!(AuthError::TokenIssuanceFailed("no secret".into()).http_status(), 503);
        assert_eq!(AuthError::InvalidHashFormat("bad".into()).http_status(), 500);
        assert_eq!(AuthError::CacheCapacityMisconfigured.http_status(), 500);
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(AuthError::DecodeError("b64".into()).code_str(), "decode_error");
        assert_eq!(AuthError::MalformedPayload("fields".into()).code_str(), "malformed_payload");
        assert_eq!(AuthError::storage("disk full").code_str(), "storage_error");
        assert_eq!(AuthError::storage("disk full").to_string(), "storage error: disk full");
    }
}
