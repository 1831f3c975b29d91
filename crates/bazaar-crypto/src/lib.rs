//! Bazaar crypto primitives.
//!
//! Password hashing for the credential store, plus the random tokens used
//! for session identifiers and anti-forgery tokens. Every comparison of
//! secret material is constant-time.

pub mod password;
pub mod token;
