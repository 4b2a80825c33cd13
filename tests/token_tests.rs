//! End-to-end token issuance tests
//!
//! Exercises the full pipeline — RBAC state, access evaluation, claim
//! assembly, signing — and the offline verification contract: a verifier
//! holding the kid-indexed material accepts genuine tokens and rejects any
//! tampering.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{TimeZone, Utc};
use tokio_util::sync::CancellationToken;

use grantor::pipeline::{AudienceMap, CallerBinding, IdentityCallerBinding, TokenPipeline};
use grantor::rbac::{AccessEvaluator, RbacRepository, TableRbacRepository};
use grantor::store::{InMemoryTable, KvAdapter, OpContext};
use grantor::token::{
    Clock, FixedClock, SigningAlgorithm, SigningIdentity, TokenProvider, TokenVerifyError,
};
use grantor::{Error, Result};

const R1: &str = "urn://r1";
const AUD_R1: &str = "aud://r1";
const SECRET_B64: &str = "ZW5kLXRvLWVuZC10b2tlbi10ZXN0LXNlY3JldC1tYXRlcmlhbA==";

struct Fixture {
    repo: Arc<dyn RbacRepository>,
    provider: Arc<TokenProvider>,
    pipeline: TokenPipeline,
    ctx: OpContext,
}

fn test_identity(kid: &str) -> SigningIdentity {
    SigningIdentity::from_key_material(
        kid,
        "https://issuer.test",
        AUD_R1,
        SigningAlgorithm::HS256,
        SECRET_B64,
        60,
    )
    .unwrap()
}

async fn fixture() -> Fixture {
    let repo: Arc<dyn RbacRepository> = Arc::new(TableRbacRepository::new(KvAdapter::new(
        Arc::new(InMemoryTable::new()),
    )));
    let clock: Arc<dyn Clock> = Arc::new(FixedClock(
        Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, 0).unwrap(),
    ));
    let provider = Arc::new(
        TokenProvider::new(vec![test_identity("2026-07-primary")], clock)
            .unwrap()
            .with_jti_source(|| 0x00c0_ffee_00c0_ffee_00c0_ffee_00c0_ffee),
    );
    let pipeline = TokenPipeline::new(
        Arc::new(IdentityCallerBinding),
        AccessEvaluator::new(repo.clone()),
        provider.clone(),
        AudienceMap::new(HashMap::from([(R1.to_string(), AUD_R1.to_string())])),
    );

    let ctx = OpContext::detached();
    repo.create_resource(&ctx, R1).await.unwrap();
    repo.create_scope(&ctx, R1, "s1").await.unwrap();
    repo.create_role(&ctx, R1, "role1").await.unwrap();
    repo.create_scope_assignment(&ctx, R1, "s1", "p1").await.unwrap();
    repo.create_role_assignment(&ctx, R1, "role1", "p1").await.unwrap();

    Fixture {
        repo,
        provider,
        pipeline,
        ctx,
    }
}

/// The happy-path token carries the evaluated access, and the verifier
/// configured with the matching kid accepts it.
#[tokio::test]
async fn issued_token_round_trips_through_verification() {
    let f = fixture().await;

    let token = f
        .pipeline
        .issue_token(&f.ctx, "p1", R1, None)
        .await
        .unwrap();

    let claims = f.provider.verify(&token.token).unwrap();
    assert_eq!(claims.sub, "p1");
    assert_eq!(claims.aud, AUD_R1);
    assert_eq!(claims.iss, "https://issuer.test");
    assert_eq!(claims.scp, "s1");
    assert_eq!(claims.roles, vec!["role1"]);
    assert_eq!(claims.nbf, claims.iat);
    assert_eq!(claims.exp, token.expires_at.timestamp());
}

/// Altering any single byte of the payload segment breaks verification.
#[tokio::test]
async fn any_payload_byte_flip_fails_verification() {
    let f = fixture().await;
    let token = f
        .pipeline
        .issue_token(&f.ctx, "p1", R1, None)
        .await
        .unwrap();

    let parts: Vec<&str> = token.token.split('.').collect();
    let payload = parts[1];

    for i in 0..payload.len() {
        let mut bytes = payload.as_bytes().to_vec();
        bytes[i] = if bytes[i] == b'A' { b'B' } else { b'A' };
        let tampered = format!(
            "{}.{}.{}",
            parts[0],
            String::from_utf8(bytes).unwrap(),
            parts[2]
        );
        assert!(
            f.provider.verify(&tampered).is_err(),
            "byte {i} flip was accepted"
        );
    }
}

/// A scope-narrowed request mints a token with exactly that scope.
#[tokio::test]
async fn narrowed_request_narrows_the_scp_claim() {
    let f = fixture().await;
    f.repo.create_scope(&f.ctx, R1, "s2").await.unwrap();
    f.repo.create_scope_assignment(&f.ctx, R1, "s2", "p1").await.unwrap();

    let token = f
        .pipeline
        .issue_token(&f.ctx, "p1", R1, Some("s2"))
        .await
        .unwrap();

    let claims = f.provider.verify(&token.token).unwrap();
    assert_eq!(claims.scp, "s2");
    assert_eq!(claims.roles, vec!["role1"]);
}

/// A principal with no grants still authenticates: the token carries
/// empty scp and roles.
#[tokio::test]
async fn unauthorized_principal_gets_an_empty_claims_token() {
    let f = fixture().await;

    let token = f
        .pipeline
        .issue_token(&f.ctx, "stranger", R1, None)
        .await
        .unwrap();

    let claims = f.provider.verify(&token.token).unwrap();
    assert_eq!(claims.sub, "stranger");
    assert_eq!(claims.scp, "");
    assert!(claims.roles.is_empty());
}

/// Two issuances under a fixed clock and jti source are byte-identical.
#[tokio::test]
async fn issuance_is_reproducible() {
    let f = fixture().await;

    let first = f.pipeline.issue_token(&f.ctx, "p1", R1, None).await.unwrap();
    let second = f.pipeline.issue_token(&f.ctx, "p1", R1, None).await.unwrap();

    assert_eq!(first.token, second.token);
}

/// Tokens reflect the database state at issuance, not a cached view.
#[tokio::test]
async fn issuance_reads_current_state() {
    let f = fixture().await;

    let before = f.pipeline.issue_token(&f.ctx, "p1", R1, None).await.unwrap();
    assert_eq!(f.provider.verify(&before.token).unwrap().scp, "s1");

    f.repo.delete_scope_assignment(&f.ctx, R1, "s1", "p1").await.unwrap();

    let after = f.pipeline.issue_token(&f.ctx, "p1", R1, None).await.unwrap();
    let claims = f.provider.verify(&after.token).unwrap();
    assert_eq!(claims.scp, "");
    assert!(claims.roles.is_empty());
}

/// Rotation: tokens signed before a rotation verify via their old kid
/// until it is retired.
#[tokio::test]
async fn rotation_preserves_old_tokens_until_retirement() {
    let f = fixture().await;
    let old = f.pipeline.issue_token(&f.ctx, "p1", R1, None).await.unwrap();

    f.provider.rotate_in(test_identity("2026-08-next")).unwrap();
    let fresh = f.pipeline.issue_token(&f.ctx, "p1", R1, None).await.unwrap();

    assert!(f.provider.verify(&old.token).is_ok());
    assert!(f.provider.verify(&fresh.token).is_ok());

    assert!(f.provider.retire("2026-07-primary"));
    assert!(matches!(
        f.provider.verify(&old.token),
        Err(TokenVerifyError::UnknownKeyId(_))
    ));
    assert!(f.provider.verify(&fresh.token).is_ok());
}

/// The kid header selects the verification material; a header pointing at
/// a different kid fails even with an otherwise valid signature.
#[tokio::test]
async fn kid_header_drives_key_selection() {
    let f = fixture().await;
    let token = f.pipeline.issue_token(&f.ctx, "p1", R1, None).await.unwrap();

    let parts: Vec<&str> = token.token.split('.').collect();
    let header = String::from_utf8(URL_SAFE_NO_PAD.decode(parts[0]).unwrap()).unwrap();
    let forged_header =
        URL_SAFE_NO_PAD.encode(header.replace("2026-07-primary", "2026-99-ghost"));
    let forged = format!("{forged_header}.{}.{}", parts[1], parts[2]);

    assert!(matches!(
        f.provider.verify(&forged),
        Err(TokenVerifyError::UnknownKeyId(_))
    ));
}

/// A cancelled request returns `Cancelled` without issuing a token.
#[tokio::test]
async fn cancellation_prevents_issuance() {
    let f = fixture().await;
    let cancel = CancellationToken::new();
    cancel.cancel();
    let ctx = OpContext::with_timeout(cancel, Duration::from_secs(10));

    let result = f.pipeline.issue_token(&ctx, "p1", R1, None).await;

    assert!(matches!(result, Err(Error::Cancelled)));
}

/// An exhausted deadline surfaces as `Timeout`.
#[tokio::test]
async fn exhausted_deadline_surfaces_timeout() {
    // A repository whose adapter reserves more overhead than the deadline
    // allows
    let table = Arc::new(InMemoryTable::new());
    let adapter = KvAdapter::new(table).with_call_overhead(Duration::from_millis(50));
    let repo: Arc<dyn RbacRepository> = Arc::new(TableRbacRepository::new(adapter));
    let ctx = OpContext::with_timeout(CancellationToken::new(), Duration::from_millis(1));

    let result = repo.get_resource(&ctx, R1).await;

    assert!(matches!(result, Err(Error::Timeout)));
}

/// A custom caller binding resolves the principal before evaluation.
#[tokio::test]
async fn caller_binding_maps_identity_to_principal() {
    struct SuffixBinding;
    impl CallerBinding for SuffixBinding {
        fn principal_id(&self, caller_identity: &str) -> Result<String> {
            Ok(format!("{caller_identity}@deploy"))
        }
    }

    let f = fixture().await;
    f.repo
        .create_scope_assignment(&f.ctx, R1, "s1", "svc@deploy")
        .await
        .unwrap();
    let pipeline = TokenPipeline::new(
        Arc::new(SuffixBinding),
        AccessEvaluator::new(f.repo.clone()),
        f.provider.clone(),
        AudienceMap::new(HashMap::from([(R1.to_string(), AUD_R1.to_string())])),
    );

    let token = pipeline.issue_token(&f.ctx, "svc", R1, None).await.unwrap();

    let claims = f.provider.verify(&token.token).unwrap();
    assert_eq!(claims.sub, "svc@deploy");
    assert_eq!(claims.scp, "s1");
}

/// The JWKS document publishes no symmetric material.
#[tokio::test]
async fn jwks_omits_symmetric_identities() {
    let f = fixture().await;
    let jwks = f.provider.jwks();
    assert!(jwks.keys.is_empty());
}
