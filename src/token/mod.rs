//! JWT provider — signing identities, claim assembly and verification
//! material.
//!
//! The provider owns a set of signing identities selected by audience,
//! mints compact JWS tokens with deterministic (sorted-key) header and
//! payload JSON, and publishes a kid-indexed read-only verification index
//! plus a standard JWKS document so downstream services can verify
//! offline. Rotation adds identities behind a copy-on-write map swap;
//! retired kids drop out of the verification index.

pub mod identity;
pub mod jwks;
pub mod provider;

pub use identity::{SigningAlgorithm, SigningIdentity, VerificationKey};
pub use jwks::JwksDocument;
pub use provider::{
    Clock, FixedClock, SignedToken, SystemClock, TokenClaims, TokenProvider, TokenVerifyError,
};
