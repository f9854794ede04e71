//! Caller identity, sessions and credential checks.
//! Keep the public surface thin and split implementation across sub-modules.

mod principal;
mod session;
mod provider;
mod request_context;

pub use principal::{IdentityContext, SERVER_ADMIN_ROLE};
pub use session::{Session, SessionToken, SessionManager, TokenError};
pub use provider::{AuthProvider, UserDirectory, LoginRequest, LoginResponse};
pub use request_context::RequestContext;
