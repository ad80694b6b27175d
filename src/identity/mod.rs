//! Principals, credentials, the entity forest and the dispatcher that ties
//! authenticators and authorizers together.

pub mod authenticator;
pub mod authorizer;
pub mod credentials;
pub mod dispatcher;
pub mod entity;
pub mod password;
pub mod principal;

pub use authenticator::{Authenticator, StaticPasswordAuthenticator, StorePasswordAuthenticator, TokenAuthenticator};
pub use authorizer::{Authorizer, EntityAuthorizer, StoreAuthorizer, TokenOptions};
pub use credentials::{Credential, CredentialType, parse_authorization_header, parse_basic, parse_credential};
pub use dispatcher::{AuthDispatcher, AuthDispatcherBuilder};
pub use entity::{Entity, EntityTree};
pub use password::{PasswordScheme, hash_password, hash_password_with, verify_password};
pub use principal::Principal;
