//! Identity provider capability for the box gateway
//!
//! User registration and login live outside the gateway core; the HTTP
//! surface consumes them through the [`IdentityProvider`] trait. This crate
//! ships the trait, its discriminated outcomes, and an in-memory
//! implementation with Argon2id password hashing and JWT session tokens.

pub mod memory;
pub mod password;
pub mod provider;
pub mod session;

pub use memory::MemoryIdentityProvider;
pub use password::{hash_password, verify_password, PasswordError};
pub use provider::{IdentityError, IdentityProvider, Session, SignUp, UserAccount};
pub use session::{issue_token, verify_token, SessionClaims, SessionError};
