//! Grantor — identity-and-access token service.
//!
//! Grantor maintains an administrator-configured RBAC database over a
//! single wide-column table, computes the effective access a principal
//! holds on a resource, and mints signed JWTs that downstream services
//! verify offline against a kid-indexed JWKS.
//!
//! # Core flow
//!
//! ```text
//! Token request (callerIdentity, resourceName, scopeName?)
//!   -> CallerBinding        caller identity -> principal id
//!   -> AccessEvaluator      scopes ∩ request scope, role gate
//!   -> TokenProvider        claims + kid-selected signature
//!   -> AccessToken { token, expires_at }
//! ```
//!
//! A role only takes effect when the principal also holds at least one
//! scope on the resource; that rule lives on the read path, so
//! administrators may bind roles and scopes in either order.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod admin;
pub mod cli;
pub mod config;
pub mod error;
pub mod names;
pub mod pipeline;
pub mod rbac;
pub mod store;
pub mod token;

pub use error::{Error, Result};

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
