//! Identity provider trait and its discriminated outcomes

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::password::PasswordError;
use crate::session::SessionError;

/// A registered user
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserAccount {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

/// An authenticated session: the user plus a signed token
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub user: UserAccount,
    pub access_token: String,
}

/// Outcome of a sign-up attempt.
///
/// Conflicts are ordinary outcomes here, not errors: the HTTP layer maps
/// each to its own response.
#[derive(Debug, Clone, PartialEq)]
pub enum SignUp {
    Created(Session),
    UsernameTaken,
    EmailTaken,
}

/// Identity provider failures
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error(transparent)]
    Password(#[from] PasswordError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Identity provider failure: {0}")]
    Provider(String),
}

/// External identity provider consumed by the HTTP surface
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Register a new user
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        username: &str,
    ) -> Result<SignUp, IdentityError>;

    /// Authenticate an existing user
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, IdentityError>;
}
