//! In-memory identity provider

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::password::{hash_password, verify_password};
use crate::provider::{IdentityError, IdentityProvider, Session, SignUp, UserAccount};
use crate::session::{issue_token, SessionClaims};

/// Default session token validity
const TOKEN_VALIDITY_HOURS: i64 = 24;

struct StoredUser {
    id: Uuid,
    email: String,
    username: String,
    password_hash: String,
    created_at: chrono::DateTime<Utc>,
}

impl StoredUser {
    fn account(&self) -> UserAccount {
        UserAccount {
            id: self.id,
            email: self.email.clone(),
            username: self.username.clone(),
            created_at: self.created_at,
        }
    }
}

/// Identity provider backed by a process-local user table
pub struct MemoryIdentityProvider {
    /// Keyed by lowercased email
    users: RwLock<HashMap<String, StoredUser>>,
    secret: Vec<u8>,
    token_validity: Duration,
}

impl MemoryIdentityProvider {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            secret: secret.to_vec(),
            token_validity: Duration::hours(TOKEN_VALIDITY_HOURS),
        }
    }

    fn session_for(&self, user: UserAccount) -> Result<Session, IdentityError> {
        let claims = SessionClaims::new(
            user.id.to_string(),
            user.email.clone(),
            self.token_validity,
        );
        let access_token = issue_token(&self.secret, &claims)?;

        Ok(Session { user, access_token })
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentityProvider {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        username: &str,
    ) -> Result<SignUp, IdentityError> {
        let email_key = email.to_lowercase();
        let password_hash = hash_password(password)?;

        let mut users = self.users.write().unwrap();

        if users.values().any(|u| u.username == username) {
            return Ok(SignUp::UsernameTaken);
        }
        if users.contains_key(&email_key) {
            return Ok(SignUp::EmailTaken);
        }

        let stored = StoredUser {
            id: Uuid::new_v4(),
            email: email.to_string(),
            username: username.to_string(),
            password_hash,
            created_at: Utc::now(),
        };
        let account = stored.account();
        users.insert(email_key, stored);
        drop(users);

        info!(username = %username, "Registered new user");
        Ok(SignUp::Created(self.session_for(account)?))
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, IdentityError> {
        let account = {
            let users = self.users.read().unwrap();
            let stored = users
                .get(&email.to_lowercase())
                .ok_or(IdentityError::InvalidCredentials)?;

            if !verify_password(password, &stored.password_hash)? {
                return Err(IdentityError::InvalidCredentials);
            }
            stored.account()
        };

        self.session_for(account)
    }
}
