//! Authentication user types.

use crate::db::{Database, Tier, User, UserRole};
use crate::jwt::AccessClaims;

/// Authenticated user information extracted from JWT.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    /// JWT claims from the access token
    pub claims: AccessClaims,
    /// Database user ID (only set when token was refreshed)
    pub user_id: Option<i64>,
}

impl AuthenticatedUser {
    pub fn role(&self) -> UserRole {
        self.claims.role
    }

    pub fn tier(&self) -> Tier {
        self.claims.tier
    }

    /// Load the user row behind this session.
    pub async fn load_user(&self, db: &Database) -> Result<Option<User>, sqlx::Error> {
        match self.user_id {
            Some(id) => db.users().get_by_id(id).await,
            None => db.users().get_by_uuid(&self.claims.sub).await,
        }
    }
}
