pub mod cache;
pub mod config;
pub mod error;
pub mod identity;
pub mod server;
pub mod store;
pub mod token;

pub use error::{AuthError, AuthResult};
