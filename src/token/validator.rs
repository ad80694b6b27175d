//! Resource-server side token checks: decrypt, freshness window, origin binding,
//! session key extraction. Each call is a pure function of the token, the clock and
//! the host identity.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, warn};

use super::codec::TokenCodec;
use super::origin::{HostIdentity, LocalHostIdentity};
use crate::error::AuthError;
use crate::identity::principal::Principal;

pub const DEFAULT_GRACE_SECS: i64 = 60;

pub trait Clock: Send + Sync {
    /// Seconds since the Unix epoch.
    fn now_secs(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> i64 { Utc::now().timestamp() }
}

/// Manually driven clock for tests and replay tooling.
#[derive(Debug, Default)]
pub struct FixedClock(AtomicI64);

impl FixedClock {
    pub fn new(secs: i64) -> Self { Self(AtomicI64::new(secs)) }
    pub fn set(&self, secs: i64) { self.0.store(secs, Ordering::SeqCst) }
    pub fn advance(&self, secs: i64) { self.0.fetch_add(secs, Ordering::SeqCst); }
}

impl Clock for FixedClock {
    fn now_secs(&self) -> i64 { self.0.load(Ordering::SeqCst) }
}

/// Why a token was refused. Only ever logged locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Undecodable,
    Expired,
    FromFuture,
    OriginMismatch,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RejectReason::Undecodable => "undecodable",
            RejectReason::Expired => "expired",
            RejectReason::FromFuture => "issued in the future",
            RejectReason::OriginMismatch => "origin mismatch",
        })
    }
}

/// Opaque rejection. The message is identical for every cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("token rejected")]
pub struct TokenRejected {
    reason: RejectReason,
}

impl TokenRejected {
    pub fn reason(&self) -> RejectReason { self.reason }
}

impl From<TokenRejected> for AuthError {
    fn from(_: TokenRejected) -> Self { AuthError::AuthenticationFailed }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedToken {
    pub principal: Principal,
    pub entity: String,
    pub issued_at: i64,
    pub origin: Option<String>,
    pub session_key: Option<Vec<u8>>,
}

#[derive(Clone)]
pub struct TokenValidator {
    codec: TokenCodec,
    grace_secs: i64,
    clock: Arc<dyn Clock>,
    host: Arc<dyn HostIdentity>,
}

impl fmt::Debug for TokenValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenValidator").field("grace_secs", &self.grace_secs).finish_non_exhaustive()
    }
}

impl TokenValidator {
    pub fn new(codec: TokenCodec) -> Self {
        Self {
            codec,
            grace_secs: DEFAULT_GRACE_SECS,
            clock: Arc::new(SystemClock),
            host: Arc::new(LocalHostIdentity::new()),
        }
    }

    pub fn with_grace_secs(mut self, secs: i64) -> Self {
        self.grace_secs = secs;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_host_identity(mut self, host: Arc<dyn HostIdentity>) -> Self {
        self.host = host;
        self
    }

    pub fn grace_secs(&self) -> i64 { self.grace_secs }

    pub fn validate(&self, token: &str) -> Result<ValidatedToken, TokenRejected> {
        let payload = match self.codec.consume(token) {
            Ok(p) => p,
            Err(e) => {
                debug!(target: "token", error = %e, "token did not decode");
                return Err(self.reject(RejectReason::Undecodable, None));
            }
        };

        let age = self.clock.now_secs() - payload.issued_at;
        if age < 0 {
            return Err(self.reject(RejectReason::FromFuture, Some(&payload.principal)));
        }
        if age > self.grace_secs {
            return Err(self.reject(RejectReason::Expired, Some(&payload.principal)));
        }

        if let Some(origin) = payload.origin.as_deref() {
            if !self.host.is_local(origin) {
                return Err(self.reject(RejectReason::OriginMismatch, Some(&payload.principal)));
            }
        }

        debug!(target: "token", principal = %payload.principal, entity = %payload.entity, age, "token accepted");
        Ok(ValidatedToken {
            principal: Principal::new(payload.principal),
            entity: payload.entity,
            issued_at: payload.issued_at,
            origin: payload.origin,
            session_key: payload.session_key,
        })
    }

    fn reject(&self, reason: RejectReason, principal: Option<&str>) -> TokenRejected {
        warn!(target: "token", %reason, principal = principal.unwrap_or("-"), "token rejected");
        TokenRejected { reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::codec::SharedSecret;
    use crate::token::origin::StaticHostIdentity;
    use crate::token::payload::TokenPayload;

    const NOW: i64 = 1_700_000_000;

    fn codec() -> TokenCodec { TokenCodec::new(SharedSecret::new("0123456789abcdef").unwrap()) }

    fn validator(clock: Arc<FixedClock>) -> TokenValidator {
        TokenValidator::new(codec()).with_clock(clock).with_host_identity(Arc::new(StaticHostIdentity::new(["gs1"])))
    }

    fn issue(at: i64) -> String { codec().issue(&TokenPayload::new("fii", "LotR:Two_Towers:Eowin", at)).unwrap() }

    #[test]
    fn freshness_window() {
        let v = validator(Arc::new(FixedClock::new(NOW)));
        let ok = v.validate(&issue(NOW)).unwrap();
        assert_eq!(ok.principal.name(), "fii");
        assert_eq!(ok.entity, "LotR:Two_Towers:Eowin");
        assert!(v.validate(&issue(NOW - DEFAULT_GRACE_SECS)).is_ok());
        assert_eq!(v.validate(&issue(NOW - DEFAULT_GRACE_SECS - 1)).unwrap_err().reason(), RejectReason::Expired);
        assert_eq!(v.validate(&issue(NOW + 1)).unwrap_err().reason(), RejectReason::FromFuture);
    }

    #[test]
    fn clock_moves_tokens_out_of_window() {
        let clock = Arc::new(FixedClock::new(NOW));
        let v = validator(clock.clone()).with_grace_secs(5);
        let token = issue(NOW);
        assert!(v.validate(&token).is_ok());
        clock.advance(6);
        assert!(v.validate(&token).is_err());
    }

    #[test]
    fn origin_must_be_local() {
        let v = validator(Arc::new(FixedClock::new(NOW)));
        let mine = codec().issue(&TokenPayload::new("fii", "Eowin", NOW).with_origin("gs1")).unwrap();
        let theirs = codec().issue(&TokenPayload::new("fii", "Eowin", NOW).with_origin("gs2")).unwrap();
        assert_eq!(v.validate(&mine).unwrap().origin.as_deref(), Some("gs1"));
        assert_eq!(v.validate(&theirs).unwrap_err().reason(), RejectReason::OriginMismatch);
    }

    #[test]
    fn session_key_is_extracted() {
        let v = validator(Arc::new(FixedClock::new(NOW)));
        let token = codec().issue(&TokenPayload::new("fii", "Eowin", NOW).with_session_key(vec![9; 16])).unwrap();
        assert_eq!(v.validate(&token).unwrap().session_key, Some(vec![9; 16]));
    }

    #[test]
    fn rejection_message_is_opaque() {
        let v = validator(Arc::new(FixedClock::new(NOW)));
        let undecodable = v.validate("garbage").unwrap_err();
        let expired = v.validate(&issue(0)).unwrap_err();
        assert_eq!(undecodable.reason(), RejectReason::Undecodable);
        assert_eq!(undecodable.to_string(), expired.to_string());
        assert_eq!(AuthError::from(expired), AuthError::AuthenticationFailed);
    }
}
