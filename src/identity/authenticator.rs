use std::collections::HashMap;

use chrono::Utc;
use tracing::{debug, warn};

use super::credentials::{Credential, CredentialType};
use super::password::{PasswordScheme, hash_password_with, verify_password};
use super::principal::Principal;
use crate::error::{AuthError, AuthResult};
use crate::store::SharedStore;
use crate::token::validator::{TokenValidator, ValidatedToken};

/// Turns a parsed credential into a principal, or fails.
pub trait Authenticator: Send + Sync {
    /// The credential type this authenticator is registered under.
    fn credential_type(&self) -> CredentialType;

    fn authenticate(&self, credential: &Credential) -> AuthResult<Principal>;
}

fn basic_parts(credential: &Credential) -> AuthResult<(&str, &str)> {
    match credential {
        Credential::Basic { username, password } => Ok((username.as_str(), password.as_str())),
        Credential::Token { .. } => Err(AuthError::AuthenticationFailed),
    }
}

/// Fixed user table held in memory, for bootstrap accounts and tests.
#[derive(Debug, Default, Clone)]
pub struct StaticPasswordAuthenticator {
    users: HashMap<String, String>,
}

impl StaticPasswordAuthenticator {
    pub fn new() -> Self { Self::default() }

    pub fn with_user(mut self, name: &str, password: &str) -> AuthResult<Self> {
        self.users.insert(name.to_string(), hash_password_with(password, PasswordScheme::Pbkdf2)?);
        Ok(self)
    }

    pub fn insert_hash(&mut self, name: impl Into<String>, hash: impl Into<String>) {
        self.users.insert(name.into(), hash.into());
    }
}

impl Authenticator for StaticPasswordAuthenticator {
    fn credential_type(&self) -> CredentialType { CredentialType::Basic }

    fn authenticate(&self, credential: &Credential) -> AuthResult<Principal> {
        let (username, password) = basic_parts(credential)?;
        let hash = self.users.get(username).ok_or(AuthError::AuthenticationFailed)?;
        if verify_password(password, hash)? {
            Ok(Principal::new(username))
        } else {
            Err(AuthError::AuthenticationFailed)
        }
    }
}

/// Verifies Basic credentials against user records in the store.
pub struct StorePasswordAuthenticator {
    store: SharedStore,
    record_logins: bool,
}

impl StorePasswordAuthenticator {
    pub fn new(store: SharedStore) -> Self { Self { store, record_logins: true } }

    pub fn record_logins(mut self, on: bool) -> Self {
        self.record_logins = on;
        self
    }
}

impl Authenticator for StorePasswordAuthenticator {
    fn credential_type(&self) -> CredentialType { CredentialType::Basic }

    fn authenticate(&self, credential: &Credential) -> AuthResult<Principal> {
        let (username, password) = basic_parts(credential)?;
        let Some(user) = self.store.get_user(username)? else {
            debug!(target: "auth", user = username, "unknown user");
            return Err(AuthError::AuthenticationFailed);
        };
        if !verify_password(password, &user.password_hash)? {
            return Err(AuthError::AuthenticationFailed);
        }
        if self.record_logins {
            if let Err(e) = self.store.record_login(username, Utc::now()) {
                warn!(target: "auth", user = username, error = %e, "could not record login time");
            }
        }
        Ok(Principal::new(username))
    }
}

/// Accepts `Token` credentials on a resource server. The principal inside the token
/// must be the name the client claimed.
#[derive(Debug, Clone)]
pub struct TokenAuthenticator {
    validator: TokenValidator,
}

impl TokenAuthenticator {
    pub fn new(validator: TokenValidator) -> Self { Self { validator } }

    /// Full validation result, for callers that also need the entity or session key.
    pub fn verify(&self, name: &str, token: &str) -> AuthResult<ValidatedToken> {
        let validated = self.validator.validate(token)?;
        if validated.principal.name() != name {
            warn!(target: "token", claimed = name, actual = %validated.principal, "token presented under another name");
            return Err(AuthError::AuthenticationFailed);
        }
        Ok(validated)
    }
}

impl Authenticator for TokenAuthenticator {
    fn credential_type(&self) -> CredentialType { CredentialType::Token }

    fn authenticate(&self, credential: &Credential) -> AuthResult<Principal> {
        match credential {
            Credential::Token { name, token } => Ok(self.verify(name, token)?.principal),
            Credential::Basic { .. } => Err(AuthError::AuthenticationFailed),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::store::{MemoryStore, Store, UserRecord};
    use crate::token::{FixedClock, SharedSecret, StaticHostIdentity, TokenCodec, TokenPayload};

    fn basic(u: &str, p: &str) -> Credential { Credential::Basic { username: u.into(), password: p.into() } }

    #[test]
    fn static_users() {
        let a = StaticPasswordAuthenticator::new().with_user("fii", "br").unwrap();
        assert_eq!(a.authenticate(&basic("fii", "br")).unwrap().name(), "fii");
        assert_eq!(a.authenticate(&basic("fii", "bz")), Err(AuthError::AuthenticationFailed));
        assert_eq!(a.authenticate(&basic("foo", "br")), Err(AuthError::AuthenticationFailed));
    }

    #[test]
    fn corrupt_stored_hash_is_not_a_plain_failure() {
        let mut a = StaticPasswordAuthenticator::new();
        a.insert_hash("fii", "not-a-hash");
        assert!(matches!(a.authenticate(&basic("fii", "br")), Err(AuthError::InvalidHashFormat(_))));
    }

    #[test]
    fn store_users_and_login_time() {
        let store = Arc::new(MemoryStore::new());
        store.create_user(UserRecord::new("fii", crate::identity::password::hash_password("br").unwrap())).unwrap();
        let a = StorePasswordAuthenticator::new(store.clone());
        assert!(a.authenticate(&basic("fii", "br")).is_ok());
        assert!(store.get_user("fii").unwrap().unwrap().last_login.is_some());
        assert_eq!(a.authenticate(&basic("fii", "x")), Err(AuthError::AuthenticationFailed));
        assert_eq!(a.authenticate(&basic("nobody", "x")), Err(AuthError::AuthenticationFailed));
    }

    #[test]
    fn token_name_must_match() {
        let codec = TokenCodec::new(SharedSecret::new("0123456789abcdef").unwrap());
        let token = codec.issue(&TokenPayload::new("fii", "LotR:Two_Towers:Eowin", 100)).unwrap();
        let validator = TokenValidator::new(codec)
            .with_clock(Arc::new(FixedClock::new(100)))
            .with_host_identity(Arc::new(StaticHostIdentity::default()));
        let a = TokenAuthenticator::new(validator);
        let good = Credential::Token { name: "fii".into(), token: token.clone() };
        let stolen = Credential::Token { name: "foo".into(), token };
        assert_eq!(a.authenticate(&good).unwrap().name(), "fii");
        assert_eq!(a.authenticate(&stolen), Err(AuthError::AuthenticationFailed));
    }
}
