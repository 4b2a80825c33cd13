//! The token-request pipeline.
//!
//! `issue_token(callerIdentity, resourceName, scopeName?)` is the one
//! public operation a transport exposes: bind the caller to a principal,
//! evaluate access with strongly consistent reads, map the resource to its
//! configured audience, and mint. A principal with no grants still gets a
//! token — an empty-claims token is observable evidence of authentication
//! without authorization, and the downstream verifier enforces required
//! scopes and roles per endpoint.
//!
//! The pipeline never retries; retries are the caller's responsibility.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::rbac::AccessEvaluator;
use crate::store::OpContext;
use crate::token::TokenProvider;
use crate::{Error, Result};

/// Maps a deployment caller identity to a principal id.
///
/// A pure function of its input: the deployment environment decides what a
/// caller identity looks like (an mTLS subject, an instance role ARN, a
/// platform user id) and how it names a principal.
pub trait CallerBinding: Send + Sync + 'static {
    /// Resolve the principal a caller acts as.
    fn principal_id(&self, caller_identity: &str) -> Result<String>;
}

/// The deployment default: callers are named by their principal id.
pub struct IdentityCallerBinding;

impl CallerBinding for IdentityCallerBinding {
    fn principal_id(&self, caller_identity: &str) -> Result<String> {
        Ok(caller_identity.to_string())
    }
}

/// Startup-loaded map from resource name to token audience.
pub struct AudienceMap {
    map: HashMap<String, String>,
}

impl AudienceMap {
    /// Build from configured `resourceName → audience` pairs.
    pub fn new(map: HashMap<String, String>) -> Self {
        Self { map }
    }

    /// The audience tokens for `resource_name` are minted under.
    ///
    /// Resources are only issuable when configured, so a missing entry is
    /// the resource's not-found error.
    pub fn resolve(&self, resource_name: &str) -> Result<&str> {
        self.map
            .get(resource_name)
            .map(String::as_str)
            .ok_or_else(|| Error::ResourceNotFound(resource_name.to_string()))
    }

    /// Every configured audience, for startup validation against the
    /// provider's identities.
    pub fn audiences(&self) -> impl Iterator<Item = &str> {
        self.map.values().map(String::as_str)
    }
}

/// A minted access token as returned to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct AccessToken {
    /// Compact JWS bearer token
    pub token: String,
    /// Expiry of the token
    pub expires_at: DateTime<Utc>,
}

/// The request pipeline.
pub struct TokenPipeline {
    binding: Arc<dyn CallerBinding>,
    evaluator: AccessEvaluator,
    provider: Arc<TokenProvider>,
    audiences: AudienceMap,
}

impl TokenPipeline {
    /// Assemble the pipeline.
    pub fn new(
        binding: Arc<dyn CallerBinding>,
        evaluator: AccessEvaluator,
        provider: Arc<TokenProvider>,
        audiences: AudienceMap,
    ) -> Self {
        Self {
            binding,
            evaluator,
            provider,
            audiences,
        }
    }

    /// Issue a token for `caller_identity` on `resource_name`, optionally
    /// narrowed to `scope_name`.
    pub async fn issue_token(
        &self,
        ctx: &OpContext,
        caller_identity: &str,
        resource_name: &str,
        scope_name: Option<&str>,
    ) -> Result<AccessToken> {
        let principal_id = self.binding.principal_id(caller_identity)?;

        let access = self
            .evaluator
            .principal_access(ctx, &principal_id, resource_name, scope_name)
            .await?;

        let audience = self.audiences.resolve(&access.resource_name)?;
        let signed = self
            .provider
            .encode(&principal_id, audience, &access.scopes, &access.roles)?;

        debug!(
            principal = %principal_id,
            resource = %access.resource_name,
            audience,
            empty = access.is_empty(),
            "Token issued"
        );

        Ok(AccessToken {
            token: signed.token,
            expires_at: signed.expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::rbac::{RbacRepository, TableRbacRepository};
    use crate::store::{InMemoryTable, KvAdapter};
    use crate::token::{Clock, FixedClock, SigningAlgorithm, SigningIdentity};

    const SECRET_B64: &str = "cGlwZWxpbmUtdGVzdC1zZWNyZXQtbWF0ZXJpYWw=";

    async fn pipeline() -> (TokenPipeline, Arc<dyn RbacRepository>) {
        let repo: Arc<dyn RbacRepository> = Arc::new(TableRbacRepository::new(KvAdapter::new(
            Arc::new(InMemoryTable::new()),
        )));
        let clock: Arc<dyn Clock> = Arc::new(FixedClock(
            Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, 0).unwrap(),
        ));
        let identity = SigningIdentity::from_key_material(
            "kid-1",
            "https://issuer.test",
            "aud://r1",
            SigningAlgorithm::HS256,
            SECRET_B64,
            60,
        )
        .unwrap();
        let provider = Arc::new(TokenProvider::new(vec![identity], clock).unwrap());
        let audiences = AudienceMap::new(HashMap::from([(
            "urn://r1".to_string(),
            "aud://r1".to_string(),
        )]));
        let pipeline = TokenPipeline::new(
            Arc::new(IdentityCallerBinding),
            AccessEvaluator::new(repo.clone()),
            provider,
            audiences,
        );
        (pipeline, repo)
    }

    #[tokio::test]
    async fn issues_token_with_evaluated_access() {
        // GIVEN: p1 holds s1 and role1 on urn://r1
        let (pipeline, repo) = pipeline().await;
        let ctx = OpContext::detached();
        repo.create_resource(&ctx, "urn://r1").await.unwrap();
        repo.create_scope(&ctx, "urn://r1", "s1").await.unwrap();
        repo.create_role(&ctx, "urn://r1", "role1").await.unwrap();
        repo.create_scope_assignment(&ctx, "urn://r1", "s1", "p1").await.unwrap();
        repo.create_role_assignment(&ctx, "urn://r1", "role1", "p1").await.unwrap();

        // WHEN: a token is issued
        let token = pipeline
            .issue_token(&ctx, "p1", "urn://r1", None)
            .await
            .unwrap();

        // THEN: the token is a three-segment JWS with a future expiry
        assert_eq!(token.token.split('.').count(), 3);
        assert_eq!(
            token.expires_at,
            Utc.with_ymd_and_hms(2026, 7, 1, 13, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn empty_access_still_mints() {
        // GIVEN: a resource p1 holds nothing on
        let (pipeline, repo) = pipeline().await;
        let ctx = OpContext::detached();
        repo.create_resource(&ctx, "urn://r1").await.unwrap();

        // WHEN: a token is issued
        let token = pipeline.issue_token(&ctx, "p1", "urn://r1", None).await;

        // THEN: authentication without authorization still yields a token
        assert!(token.is_ok());
    }

    #[tokio::test]
    async fn missing_resource_fails_before_minting() {
        let (pipeline, _repo) = pipeline().await;
        let ctx = OpContext::detached();

        let result = pipeline.issue_token(&ctx, "p1", "urn://ghost", None).await;
        assert!(matches!(result, Err(Error::ResourceNotFound(_))));
    }

    #[tokio::test]
    async fn unconfigured_resource_has_no_audience() {
        // GIVEN: a resource in the database but not in the audience map
        let (pipeline, repo) = pipeline().await;
        let ctx = OpContext::detached();
        repo.create_resource(&ctx, "urn://unmapped").await.unwrap();

        // WHEN: a token is requested for it
        let result = pipeline
            .issue_token(&ctx, "p1", "urn://unmapped", None)
            .await;

        // THEN: the resource is not issuable
        assert!(matches!(result, Err(Error::ResourceNotFound(_))));
    }
}
