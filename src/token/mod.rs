pub mod codec;
pub mod origin;
pub mod payload;
pub mod validator;

pub use codec::{SharedSecret, TokenCodec};
pub use origin::{HostIdentity, LocalHostIdentity, StaticHostIdentity};
pub use payload::TokenPayload;
pub use validator::{Clock, FixedClock, RejectReason, SystemClock, TokenRejected, TokenValidator, ValidatedToken};
