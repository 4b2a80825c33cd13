//! Configuration management.
//!
//! Loaded once at startup from an optional YAML file merged with
//! `GRANTOR_`-prefixed environment variables (`__` separates nesting).
//! Unknown keys are rejected so a typo fails fast instead of silently
//! running with defaults. Credentials for the key–value store are *not*
//! configured here — they come from the deployment's default chain.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::store::adapter::RetryPolicy;
use crate::token::{SigningAlgorithm, SigningIdentity};
use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// RBAC store configuration
    pub rbac: RbacConfig,
    /// JWT signing configuration
    pub jwt: JwtConfig,
    /// Map from resource name to the audience its tokens are minted under
    pub audiences: HashMap<String, String>,
    /// Request deadline budgeting
    pub deadline: DeadlineConfig,
    /// Retry schedule for throttled store calls
    pub retry: RetryConfig,
}

/// RBAC store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RbacConfig {
    /// Store region (required)
    pub region: String,
    /// Wide table name (required)
    pub table_name: String,
    /// Which table backend the host runner constructs
    pub store: StoreBackend,
}

/// Table backend selector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process table, for local development and tests
    #[default]
    Memory,
}

/// JWT signing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JwtConfig {
    /// Default token lifetime in minutes
    pub expiration_minutes: u64,
    /// Signing identities, one active per audience
    pub identities: Vec<IdentityConfig>,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            expiration_minutes: 60,
            identities: Vec::new(),
        }
    }
}

/// One signing identity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IdentityConfig {
    /// Audience this identity signs for
    pub audience: String,
    /// `iss` claim value
    pub issuer: String,
    /// Key id emitted in token headers
    pub key_id: String,
    /// Signature algorithm
    pub algorithm: SigningAlgorithm,
    /// Key material: PEM private key (RSA) or base64 secret (HS256)
    pub key: String,
    /// Lifetime override for this identity's tokens
    #[serde(default)]
    pub expiration_minutes: Option<u64>,
}

/// Request deadline budgeting
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeadlineConfig {
    /// Total per-request budget
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Reserve subtracted from the remaining budget per store call
    #[serde(with = "humantime_serde")]
    pub call_overhead: Duration,
}

impl Default for DeadlineConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            call_overhead: Duration::from_millis(250),
        }
    }
}

/// Retry schedule for throttled store calls
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// First backoff delay
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,
    /// Backoff ceiling
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryConfig {
    /// The adapter's retry policy.
    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: self.initial_backoff,
            max_backoff: self.max_backoff,
        }
    }
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist, cannot be
    /// parsed, contains unknown keys, or fails [`Config::validate`].
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // CLI-owned variables share the prefix; they are not config keys.
        figment = figment.merge(
            Env::prefixed("GRANTOR_")
                .ignore(&["config", "log_level", "log_format"])
                .split("__"),
        );

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field requirements.
    ///
    /// Every configured audience must map to a signing identity — a token
    /// request for a resource whose audience has no key must be impossible
    /// at runtime, so the gap fails fatally here.
    pub fn validate(&self) -> Result<()> {
        if self.rbac.region.is_empty() {
            return Err(Error::Config("rbac.region is required".to_string()));
        }
        if self.rbac.table_name.is_empty() {
            return Err(Error::Config("rbac.table_name is required".to_string()));
        }
        if self.jwt.expiration_minutes == 0 {
            return Err(Error::Config(
                "jwt.expiration_minutes must be positive".to_string(),
            ));
        }

        for (resource, audience) in &self.audiences {
            if !self.jwt.identities.iter().any(|i| &i.audience == audience) {
                return Err(Error::Config(format!(
                    "audience {audience} (for resource {resource}) has no signing identity"
                )));
            }
        }

        Ok(())
    }

    /// Build the signing identities from their configured key material.
    pub fn signing_identities(&self) -> Result<Vec<SigningIdentity>> {
        self.jwt
            .identities
            .iter()
            .map(|identity| {
                SigningIdentity::from_key_material(
                    &identity.key_id,
                    &identity.issuer,
                    &identity.audience,
                    identity.algorithm,
                    &identity.key,
                    identity
                        .expiration_minutes
                        .unwrap_or(self.jwt.expiration_minutes),
                )
            })
            .collect()
    }
}
