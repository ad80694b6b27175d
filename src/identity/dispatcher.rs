//! Composition root for authentication and authorization.
//!
//! Built once at startup through [`AuthDispatcherBuilder`] and shared by handle
//! (`Arc<AuthDispatcher>`) afterwards. Registrations are fixed at `build()`, so the
//! dispatcher itself needs no locking.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::authenticator::Authenticator;
use super::authorizer::{Authorizer, TokenOptions};
use super::credentials::{CredentialType, parse_credential};
use super::entity::Entity;
use super::principal::Principal;
use crate::error::{AuthError, AuthResult};

#[derive(Default)]
pub struct AuthDispatcherBuilder {
    authenticators: HashMap<CredentialType, Vec<Arc<dyn Authenticator>>>,
    authorizers: Vec<Arc<dyn Authorizer>>,
}

impl AuthDispatcherBuilder {
    pub fn new() -> Self { Self::default() }

    /// Register under the authenticator's own credential type, after any already
    /// registered for that type.
    pub fn authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticators.entry(authenticator.credential_type()).or_default().push(authenticator);
        self
    }

    pub fn authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizers.push(authorizer);
        self
    }

    pub fn build(self) -> AuthDispatcher {
        let count: usize = self.authenticators.values().map(Vec::len).sum();
        info!(target: "startup", authenticators = count, authorizers = self.authorizers.len(), "auth dispatcher ready");
        AuthDispatcher { authenticators: self.authenticators, authorizers: self.authorizers }
    }
}

pub struct AuthDispatcher {
    authenticators: HashMap<CredentialType, Vec<Arc<dyn Authenticator>>>,
    authorizers: Vec<Arc<dyn Authorizer>>,
}

impl fmt::Debug for AuthDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kinds: Vec<_> = self.authenticators.iter().map(|(k, v)| (k.as_str(), v.len())).collect();
        f.debug_struct("AuthDispatcher").field("authenticators", &kinds).field("authorizers", &self.authorizers.len()).finish()
    }
}

impl AuthDispatcher {
    pub fn builder() -> AuthDispatcherBuilder { AuthDispatcherBuilder::new() }

    /// Parse `raw` as a credential of type `kind` and try each authenticator for
    /// that type in registration order. First success wins.
    pub fn authenticate(&self, kind: CredentialType, raw: &[u8]) -> AuthResult<Principal> {
        let credential = parse_credential(kind, raw)?;
        let Some(candidates) = self.authenticators.get(&kind) else {
            debug!(target: "auth", kind = %kind, "no authenticator registered");
            return Err(AuthError::AuthenticationFailed);
        };
        for (idx, authenticator) in candidates.iter().enumerate() {
            match authenticator.authenticate(&credential) {
                Ok(principal) => {
                    debug!(target: "auth", kind = %kind, principal = %principal, authenticator = idx, "authenticated");
                    return Ok(principal);
                }
                Err(AuthError::AuthenticationFailed) => {}
                Err(e) => warn!(target: "auth", kind = %kind, user = credential.claimed_name(), authenticator = idx, error = %e, "authenticator failed"),
            }
        }
        info!(target: "auth", kind = %kind, user = credential.claimed_name(), "authentication failed");
        Err(AuthError::AuthenticationFailed)
    }

    /// Union of every authorizer's answer, in registration order, without repeats.
    pub fn entities_for(&self, principal: &Principal, parent: Option<&Entity>) -> AuthResult<Vec<Entity>> {
        let mut out: Vec<Entity> = Vec::new();
        for authorizer in &self.authorizers {
            for entity in authorizer.entities_of(principal, parent)? {
                if !out.iter().any(|e| e.same_path(&entity)) {
                    out.push(entity);
                }
            }
        }
        Ok(out)
    }

    pub fn resolve_identifier(&self, path: &str) -> AuthResult<Entity> {
        let mut last = None;
        for authorizer in &self.authorizers {
            match authorizer.resolve(path) {
                Ok(entity) => return Ok(entity),
                Err(e) => last = Some(e),
            }
        }
        match last {
            Some(e @ AuthError::InvalidIdentifier(_)) => Err(e),
            _ => Err(AuthError::NotFound(path.to_string())),
        }
    }

    pub fn issue_token(&self, principal: &Principal, entity: &Entity) -> AuthResult<String> {
        self.issue_token_with(principal, entity, &TokenOptions::default())
    }

    /// First authorizer to produce a token wins.
    pub fn issue_token_with(&self, principal: &Principal, entity: &Entity, options: &TokenOptions) -> AuthResult<String> {
        for authorizer in &self.authorizers {
            match authorizer.issue_token(principal, entity, options) {
                Ok(Some(token)) => return Ok(token),
                Ok(None) => {}
                Err(e) => warn!(target: "auth", principal = %principal, entity = %entity, error = %e, "authorizer failed to issue token"),
            }
        }
        Err(AuthError::TokenIssuanceFailed(format!("no authorizer issued a token for '{entity}'")))
    }
}

#[cfg(test)]
mod tests {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;

    use super::*;
    use crate::identity::authenticator::StaticPasswordAuthenticator;
    use crate::identity::authorizer::EntityAuthorizer;
    use crate::identity::credentials::Credential;
    use crate::token::{SharedSecret, TokenCodec};

    struct Refuses;

    impl Authenticator for Refuses {
        fn credential_type(&self) -> CredentialType { CredentialType::Basic }
        fn authenticate(&self, _: &Credential) -> AuthResult<Principal> { Err(AuthError::Storage("down".into())) }
    }

    fn raw(s: &str) -> Vec<u8> { STANDARD.encode(s).into_bytes() }

    #[test]
    fn first_successful_authenticator_wins() {
        let d = AuthDispatcher::builder()
            .authenticator(Arc::new(Refuses))
            .authenticator(Arc::new(StaticPasswordAuthenticator::new().with_user("fii", "br").unwrap()))
            .build();
        assert_eq!(d.authenticate(CredentialType::Basic, &raw("fii:br")).unwrap().name(), "fii");
        assert_eq!(d.authenticate(CredentialType::Basic, &raw("fii:no")), Err(AuthError::AuthenticationFailed));
        assert_eq!(d.authenticate(CredentialType::Token, &raw("fii:tok")), Err(AuthError::AuthenticationFailed));
        assert!(matches!(d.authenticate(CredentialType::Basic, b"@@"), Err(AuthError::MalformedCredential(_))));
    }

    #[test]
    fn entities_are_aggregated() {
        let fii = Principal::new("fii");
        let a = Arc::new(EntityAuthorizer::new());
        let b = Arc::new(EntityAuthorizer::new());
        a.grant_path(&fii, "LotR:Fellowship").unwrap();
        b.grant_path(&fii, "LotR:Two_Towers").unwrap();
        let d = AuthDispatcher::builder().authorizer(a).authorizer(b).build();
        let lotr = d.resolve_identifier("LotR").unwrap();
        let names: Vec<String> = d.entities_for(&fii, Some(&lotr)).unwrap().iter().map(|e| e.label().to_string()).collect();
        assert_eq!(names, vec!["Fellowship", "Two_Towers"]);
        assert_eq!(d.entities_for(&fii, None).unwrap().len(), 1);
    }

    #[test]
    fn resolution_and_issuance_failures() {
        let d = AuthDispatcher::builder().build();
        assert!(matches!(d.resolve_identifier("LotR"), Err(AuthError::NotFound(_))));

        let fii = Principal::new("fii");
        let plain = Arc::new(EntityAuthorizer::new());
        let eowin = plain.grant_path(&fii, "LotR:Two_Towers:Eowin").unwrap();
        let d = AuthDispatcher::builder().authorizer(plain.clone()).build();
        assert!(matches!(d.resolve_identifier("LotR::x"), Err(AuthError::InvalidIdentifier(_))));
        assert!(matches!(d.issue_token(&fii, &eowin), Err(AuthError::TokenIssuanceFailed(_))));

        let keyed = Arc::new(EntityAuthorizer::new().with_codec(TokenCodec::new(SharedSecret::new("0123456789abcdef").unwrap())));
        keyed.grant_path(&fii, "LotR:Two_Towers:Eowin").unwrap();
        let d = AuthDispatcher::builder().authorizer(plain).authorizer(keyed).build();
        assert!(d.issue_token(&fii, &eowin).is_ok());
    }
}
