//! Authentication: bearer tokens, reset tokens, password hashes, and the
//! request extractor that turns a bearer token into a `Caller`.

mod extract;
mod service;

pub use extract::AuthenticatedCaller;
pub use service::{hash_password, verify_password, AuthService, ResetGrant};
