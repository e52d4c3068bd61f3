//! JWT authentication with role-based access control.
//!
//! Dual-token system: short-lived access tokens (5 min, stateless) and
//! long-lived refresh tokens (30 days, database-tracked). Access tokens
//! are automatically refreshed when expired, re-deriving role and tier.

mod cookie;
mod errors;
mod extractors;
mod ip;
mod state;
mod types;

pub use cookie::{
    ACCESS_COOKIE_NAME, REFRESH_COOKIE_NAME, clear_cookie, get_cookie, session_cookie,
};
pub use errors::{ApiAuthError, AuthErrorKind};
pub(crate) use extractors::authenticate_request;
pub use extractors::{
    AnyRole, Auth, NEW_ACCESS_TOKEN_COOKIE, OptionalAuth, RoleConstraint, StaffOnly,
    SuperadminOnly, add_access_token_cookie,
};
pub use ip::{ClientIp, HasHeadersAndExtensions, extract_client_ip};
pub use state::HasAuthBackend;
pub use types::AuthenticatedUser;
