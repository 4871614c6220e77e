//! Password hashing and session token primitives.

pub mod password;
pub mod token;

pub use password::{CredentialHasher, PasswordScheme};
