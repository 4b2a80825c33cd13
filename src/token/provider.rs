//! Token provider — claim assembly, signing and kid-indexed verification.
//!
//! # Determinism
//!
//! Header and payload are serialized from `BTreeMap`s so their JSON keys
//! are sorted, and signing goes through `jsonwebtoken::crypto::sign` over
//! the standard JWS signing input. Given a fixed clock and jti source, two
//! encodes of the same `(principal, audience, scopes, roles)` are
//! byte-identical. Issuance is pure after identity selection: no I/O, no
//! database.
//!
//! # Rotation
//!
//! The identity map is read-mostly. Rotation clones the map, applies the
//! change and swaps the `Arc` behind a write lock; readers take one read
//! lock, clone the `Arc` and never block on each other.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rand::RngExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::{Error, Result};

use super::identity::{SigningIdentity, VerificationKey};
use super::jwks::JwksDocument;

/// Clock skew tolerated when validating `nbf`/`exp`, in seconds.
const VERIFY_LEEWAY_SECS: i64 = 60;

/// Wall-clock source injected at construction so issuance is reproducible.
pub trait Clock: Send + Sync + 'static {
    /// Current time.
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock pinned to one instant. Deterministic issuance for tests.
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Source of 128-bit `jti` values. Random in production; fixed in tests so
/// tokens are reproducible.
type JtiSource = Box<dyn Fn() -> u128 + Send + Sync>;

/// Error variants for token verification failures.
#[derive(Debug, thiserror::Error)]
pub enum TokenVerifyError {
    /// The token is not three base64url segments of JSON.
    #[error("Malformed token: {0}")]
    Malformed(String),

    /// The header carries no `kid`.
    #[error("Token header missing 'kid'")]
    MissingKeyId,

    /// No verification key is indexed under the header's `kid`.
    #[error("Unknown key id: {0}")]
    UnknownKeyId(String),

    /// The header's `alg` does not match the key indexed by `kid`.
    #[error("Algorithm mismatch: expected {expected}, got {actual}")]
    AlgorithmMismatch {
        /// Algorithm the key signs with
        expected: &'static str,
        /// Algorithm the header claims
        actual: String,
    },

    /// The signature does not verify against the key.
    #[error("Signature verification failed")]
    InvalidSignature,

    /// The token's `iss` does not match the key's issuer.
    #[error("Issuer mismatch: expected {expected}, got {actual}")]
    IssuerMismatch {
        /// Configured issuer
        expected: String,
        /// Issuer found in the token
        actual: String,
    },

    /// The token's `aud` does not match the key's audience.
    #[error("Audience mismatch: expected {expected}, got {actual}")]
    AudienceMismatch {
        /// Configured audience
        expected: String,
        /// Audience found in the token
        actual: String,
    },

    /// `exp` has passed.
    #[error("Token expired")]
    Expired,

    /// `nbf` is in the future.
    #[error("Token not yet valid")]
    NotYetValid,

    /// The signing primitive failed.
    #[error("Crypto error: {0}")]
    Crypto(#[from] jsonwebtoken::errors::Error),
}

/// Claims carried by every issued token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Issuer
    pub iss: String,
    /// Principal id
    pub sub: String,
    /// Audience
    pub aud: String,
    /// Issued-at (Unix seconds)
    pub iat: i64,
    /// Not-before; always equals `iat`
    pub nbf: i64,
    /// Expiry (Unix seconds)
    pub exp: i64,
    /// 128-bit token id, lowercase hex
    pub jti: String,
    /// Space-separated scope names
    pub scp: String,
    /// Role names
    pub roles: Vec<String>,
}

/// A minted token and its expiry.
#[derive(Debug, Clone, Serialize)]
pub struct SignedToken {
    /// Compact JWS
    pub token: String,
    /// When the token expires
    pub expires_at: DateTime<Utc>,
    /// Key id that signed it
    pub kid: String,
}

struct IdentityMap {
    /// audience → active signing identity
    signers: HashMap<String, Arc<SigningIdentity>>,
    /// kid → verification material, ascending by kid
    verifiers: BTreeMap<String, Arc<SigningIdentity>>,
}

/// The JWT provider.
pub struct TokenProvider {
    identities: RwLock<Arc<IdentityMap>>,
    clock: Arc<dyn Clock>,
    jti_source: JtiSource,
}

impl TokenProvider {
    /// Build a provider from startup-loaded identities.
    ///
    /// Duplicate kids or duplicate audiences are configuration errors:
    /// identity selection must be unambiguous.
    pub fn new(identities: Vec<SigningIdentity>, clock: Arc<dyn Clock>) -> Result<Self> {
        let mut signers = HashMap::new();
        let mut verifiers = BTreeMap::new();

        for identity in identities {
            let identity = Arc::new(identity);
            if verifiers
                .insert(identity.kid.clone(), identity.clone())
                .is_some()
            {
                return Err(Error::Config(format!(
                    "duplicate signing key id: {}",
                    identity.kid
                )));
            }
            if signers
                .insert(identity.audience.clone(), identity.clone())
                .is_some()
            {
                return Err(Error::Config(format!(
                    "duplicate signing audience: {}",
                    identity.audience
                )));
            }
        }

        Ok(Self {
            identities: RwLock::new(Arc::new(IdentityMap { signers, verifiers })),
            clock,
            jti_source: Box::new(|| rand::rng().random()),
        })
    }

    /// Replace the jti source. Tests inject a fixed one for reproducible
    /// tokens.
    #[must_use]
    pub fn with_jti_source(
        mut self,
        source: impl Fn() -> u128 + Send + Sync + 'static,
    ) -> Self {
        self.jti_source = Box::new(source);
        self
    }

    /// Mint a token for `audience` carrying the principal's effective
    /// scopes and roles.
    ///
    /// Scopes and roles are emitted exactly as given; the access evaluator
    /// already returns them sorted. Empty access still mints: the
    /// downstream verifier enforces required scopes and roles per
    /// endpoint.
    pub fn encode(
        &self,
        principal_id: &str,
        audience: &str,
        scopes: &[String],
        roles: &[String],
    ) -> Result<SignedToken> {
        let map = self.identities.read().clone();
        let identity = map.signers.get(audience).ok_or_else(|| {
            // The audience map is validated at startup, so this is a bug
            // or a rotation that removed an audience mid-flight.
            Error::internal(format!("no signing identity for audience {audience}"))
        })?;

        let now = self.clock.now();
        let iat = now.timestamp();
        let lifetime = chrono::Duration::minutes(identity.expiration_minutes as i64);
        let expires_at = now + lifetime;
        let jti = format!("{:032x}", (self.jti_source)());

        let header = BTreeMap::from([
            ("alg", Value::from(identity.algorithm.name())),
            ("kid", Value::from(identity.kid.as_str())),
            ("typ", Value::from("JWT")),
        ]);
        let payload = BTreeMap::from([
            ("aud", Value::from(identity.audience.as_str())),
            ("exp", Value::from(expires_at.timestamp())),
            ("iat", Value::from(iat)),
            ("iss", Value::from(identity.issuer.as_str())),
            ("jti", Value::from(jti)),
            ("nbf", Value::from(iat)),
            ("roles", json!(roles)),
            ("scp", Value::from(scopes.join(" "))),
            ("sub", Value::from(principal_id)),
        ]);

        let signing_input = format!(
            "{}.{}",
            encode_segment(&header)?,
            encode_segment(&payload)?
        );
        let signature = jsonwebtoken::crypto::sign(
            signing_input.as_bytes(),
            identity.encoding_key(),
            identity.algorithm.to_jwt(),
        )
        .map_err(|e| Error::internal(format!("token signing failed: {e}")))?;

        debug!(
            kid = %identity.kid,
            audience,
            principal = principal_id,
            "Token minted"
        );

        Ok(SignedToken {
            token: format!("{signing_input}.{signature}"),
            expires_at,
            kid: identity.kid.clone(),
        })
    }

    /// Verify a compact JWS against the identity its `kid` header indexes.
    ///
    /// Signature, issuer, audience and the time window (with a small
    /// leeway) are all checked against the provider's injected clock.
    pub fn verify(&self, token: &str) -> std::result::Result<TokenClaims, TokenVerifyError> {
        let mut segments = token.split('.');
        let (Some(header_b64), Some(payload_b64), Some(signature), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(TokenVerifyError::Malformed(
                "expected three dot-separated segments".to_string(),
            ));
        };

        #[derive(Deserialize)]
        struct Header {
            alg: String,
            kid: Option<String>,
        }
        let header: Header = decode_segment(header_b64)?;
        let kid = header.kid.ok_or(TokenVerifyError::MissingKeyId)?;

        let map = self.identities.read().clone();
        let identity = map
            .verifiers
            .get(&kid)
            .ok_or_else(|| TokenVerifyError::UnknownKeyId(kid.clone()))?;
        let key = identity.verification();

        if header.alg != key.algorithm.name() {
            return Err(TokenVerifyError::AlgorithmMismatch {
                expected: key.algorithm.name(),
                actual: header.alg,
            });
        }

        let signing_input = format!("{header_b64}.{payload_b64}");
        let valid = jsonwebtoken::crypto::verify(
            signature,
            signing_input.as_bytes(),
            key.decoding_key(),
            key.algorithm.to_jwt(),
        )?;
        if !valid {
            return Err(TokenVerifyError::InvalidSignature);
        }

        let claims: TokenClaims = decode_segment(payload_b64)?;
        if claims.iss != key.issuer {
            return Err(TokenVerifyError::IssuerMismatch {
                expected: key.issuer.clone(),
                actual: claims.iss,
            });
        }
        if claims.aud != key.audience {
            return Err(TokenVerifyError::AudienceMismatch {
                expected: key.audience.clone(),
                actual: claims.aud,
            });
        }

        let now = self.clock.now().timestamp();
        if claims.nbf > now + VERIFY_LEEWAY_SECS {
            return Err(TokenVerifyError::NotYetValid);
        }
        if claims.exp <= now - VERIFY_LEEWAY_SECS {
            return Err(TokenVerifyError::Expired);
        }

        Ok(claims)
    }

    /// The read-only verification index, ascending by kid. Only public
    /// material leaves the provider.
    #[must_use]
    pub fn verification_keys(&self) -> Vec<VerificationKey> {
        let map = self.identities.read().clone();
        map.verifiers
            .values()
            .map(|identity| identity.verification().clone())
            .collect()
    }

    /// The JWKS document of publishable verification keys.
    #[must_use]
    pub fn jwks(&self) -> JwksDocument {
        let map = self.identities.read().clone();
        JwksDocument::from_keys(map.verifiers.values().map(|i| i.verification()))
    }

    /// Rotate a new identity in.
    ///
    /// The identity becomes the active signer for its audience; the
    /// previous signer's kid stays in the verification index until
    /// explicitly retired. A kid collision is refused — kids name key
    /// material immutably.
    pub fn rotate_in(&self, identity: SigningIdentity) -> Result<()> {
        let mut guard = self.identities.write();
        if guard.verifiers.contains_key(&identity.kid) {
            return Err(Error::Config(format!(
                "key id already registered: {}",
                identity.kid
            )));
        }

        let identity = Arc::new(identity);
        let mut signers = guard.signers.clone();
        let mut verifiers = guard.verifiers.clone();
        signers.insert(identity.audience.clone(), identity.clone());
        verifiers.insert(identity.kid.clone(), identity.clone());
        *guard = Arc::new(IdentityMap { signers, verifiers });

        debug!(kid = %identity.kid, audience = %identity.audience, "Signing identity rotated in");
        Ok(())
    }

    /// Retire a kid from the verification index.
    ///
    /// Returns `true` if the kid was removed. The active signer of an
    /// audience cannot be retired — rotate a replacement in first.
    pub fn retire(&self, kid: &str) -> bool {
        let mut guard = self.identities.write();
        if !guard.verifiers.contains_key(kid) {
            return false;
        }
        if guard.signers.values().any(|s| s.kid == kid) {
            warn!(kid, "Refusing to retire the active signing identity");
            return false;
        }

        let signers = guard.signers.clone();
        let mut verifiers = guard.verifiers.clone();
        verifiers.remove(kid);
        *guard = Arc::new(IdentityMap { signers, verifiers });

        debug!(kid, "Verification key retired");
        true
    }
}

fn encode_segment(value: &BTreeMap<&str, Value>) -> Result<String> {
    let json = serde_json::to_vec(value)
        .map_err(|e| Error::internal(format!("claim serialization failed: {e}")))?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

fn decode_segment<T: serde::de::DeserializeOwned>(
    segment: &str,
) -> std::result::Result<T, TokenVerifyError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| TokenVerifyError::Malformed(format!("invalid base64url: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| TokenVerifyError::Malformed(format!("invalid JSON segment: {e}")))
}
