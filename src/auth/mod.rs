//! Authentication module.
//!
//! Token issuance lives with the identity provider; this module only
//! validates inbound JWTs, resolves the caller's profile, and injects it
//! into the request. Dev mode accepts `dev:<user_id>` tokens for local work.

mod claims;
mod config;
mod error;
mod middleware;

pub use claims::Claims;
pub use config::AuthConfig;
pub use error::AuthError;
pub use middleware::{AuthState, CurrentUser, auth_middleware};
