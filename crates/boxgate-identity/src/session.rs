//! JWT session tokens for authenticated users

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Token issuer name
const ISSUER: &str = "boxgate";

/// Session token errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Token encoding error: {0}")]
    Encoding(String),

    #[error("Invalid or expired token")]
    InvalidToken,
}

/// Claims carried by a session token
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionClaims {
    /// Subject (user id)
    pub sub: String,
    /// User email
    pub email: String,
    /// Issued at (timestamp)
    pub iat: i64,
    /// Expiration time (timestamp)
    pub exp: i64,
    /// Issuer
    pub iss: String,
}

impl SessionClaims {
    pub fn new(user_id: String, email: String, validity: Duration) -> Self {
        let now = Utc::now();

        Self {
            sub: user_id,
            email,
            iat: now.timestamp(),
            exp: (now + validity).timestamp(),
            iss: ISSUER.to_string(),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() > self.exp
    }
}

/// Sign session claims into an HS256 token
pub fn issue_token(secret: &[u8], claims: &SessionClaims) -> Result<String, SessionError> {
    let header = Header::new(Algorithm::HS256);
    let key = EncodingKey::from_secret(secret);

    encode(&header, claims, &key).map_err(|e| SessionError::Encoding(e.to_string()))
}

/// Verify a session token's signature and expiration
pub fn verify_token(secret: &[u8], token: &str) -> Result<SessionClaims, SessionError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    validation.validate_aud = false;

    decode::<SessionClaims>(token, &DecodingKey::from_secret(secret), &validation)
        .map(|data| data.claims)
        .map_err(|_| SessionError::InvalidToken)
}
