//! End-to-end grant-flow scenarios driven through the full engine stack

use warden_core::error::AuthError;
use warden_core::oauth::{AuthorizeOutcome, AuthorizeRequest, CodeExchangeRequest, RefreshRequest};
use warden_core::token::pkce_challenge_s256;
use warden_tests::test_auth;

/// Scenario 1: a parentless client-credentials token carries exactly the
/// requested scope
#[tokio::test]
async fn issue_client_credentials_token_with_exact_scope() {
    let auth = test_auth().await;

    let response = auth
        .engine
        .client_credentials(auth.request(&["read:a", "write:b"]))
        .await
        .unwrap();

    assert_eq!(response.token_type, "Bearer");
    assert_eq!(response.scope, vec!["read:a", "write:b"]);
    assert!(response.expires_in > 0);
    assert!(!response.task_id.is_empty());
}

/// Scenario 2: a child requesting scope its parent lacks is refused with
/// insufficient_scope
#[tokio::test]
async fn child_token_cannot_escalate_beyond_parent() {
    let auth = test_auth().await;

    let parent = auth
        .engine
        .client_credentials(auth.request(&["read:a", "write:b"]))
        .await
        .unwrap();

    let mut child = auth.request(&["write:b", "admin:c"]);
    child.parent_token = Some(parent.access_token);

    let err = auth.engine.client_credentials(child).await.unwrap_err();
    assert!(matches!(err, AuthError::InsufficientScope(_)));
    assert_eq!(err.status_code(), 403);
}

/// Scenario 3: revoking a parent makes an otherwise valid, unexpired child
/// introspect as inactive
#[tokio::test]
async fn revoking_parent_invalidates_child() {
    let auth = test_auth().await;

    let parent = auth
        .engine
        .client_credentials(auth.request(&["read:a", "write:b"]))
        .await
        .unwrap();

    let mut child_req = auth.request(&["read:a"]);
    child_req.parent_token = Some(parent.access_token.clone());
    let child = auth.engine.client_credentials(child_req).await.unwrap();

    let before = auth.engine.introspect(&child.access_token).await.unwrap();
    assert!(before.active);

    auth.engine.revoke(&parent.access_token, true).await.unwrap();

    let after = auth.engine.introspect(&child.access_token).await.unwrap();
    assert!(!after.active);
}

/// Scenario 4: a correct S256 exchange succeeds once; an identical replay
/// is invalid_grant and the first token stays valid
#[tokio::test]
async fn authorization_code_is_single_use() {
    let auth = test_auth().await;
    let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";

    let outcome = auth
        .engine
        .authorize(AuthorizeRequest {
            client_id: auth.client_id.clone(),
            redirect_uri: "https://app.example/cb".to_string(),
            scope: vec!["read:a".to_string()],
            state: Some("s1".to_string()),
            code_challenge: pkce_challenge_s256(verifier),
            code_challenge_method: "S256".to_string(),
            consent_approved: false,
        })
        .await
        .unwrap();

    let AuthorizeOutcome::Redirect { code, .. } = outcome else {
        panic!("expected a redirect with a code");
    };

    let exchange = CodeExchangeRequest {
        code: code.clone(),
        code_verifier: verifier.to_string(),
        client_id: auth.client_id.clone(),
        redirect_uri: "https://app.example/cb".to_string(),
    };

    let first = auth.engine.exchange_code(exchange.clone()).await.unwrap();
    assert_eq!(first.scope, vec!["read:a"]);

    let err = auth.engine.exchange_code(exchange).await.unwrap_err();
    assert!(matches!(err, AuthError::InvalidGrant(_)));
    assert_eq!(err.status_code(), 400);

    // The token from the first exchange is unharmed by the replay attempt
    let introspection = auth.engine.introspect(&first.access_token).await.unwrap();
    assert!(introspection.active);
}

/// Scenario 5: refresh rotation mints a new token and retires the consumed
/// refresh token; reuse is invalid_grant
#[tokio::test]
async fn refresh_token_rotation_is_single_use() {
    let auth = test_auth().await;

    let original = auth
        .engine
        .client_credentials(auth.request(&["read:a", "write:b"]))
        .await
        .unwrap();
    let old_refresh = original.refresh_token.clone().unwrap();

    let rotated = auth
        .engine
        .refresh(RefreshRequest {
            refresh_token: old_refresh.clone(),
            scope: vec![],
        })
        .await
        .unwrap();

    assert_ne!(rotated.token_id, original.token_id);
    assert_eq!(rotated.scope, original.scope);
    assert_eq!(rotated.task_id, original.task_id);

    let err = auth
        .engine
        .refresh(RefreshRequest {
            refresh_token: old_refresh,
            scope: vec![],
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidGrant(_)));
    assert_eq!(err.status_code(), 400);
}

/// PKCE rejection path: any verifier that does not hash to the challenge is
/// refused and the code survives for the legitimate holder
#[tokio::test]
async fn wrong_pkce_verifier_is_rejected() {
    let auth = test_auth().await;
    let verifier = "correct-verifier-correct-verifier-correct";

    let outcome = auth
        .engine
        .authorize(AuthorizeRequest {
            client_id: auth.client_id.clone(),
            redirect_uri: "https://app.example/cb".to_string(),
            scope: vec!["read:a".to_string()],
            state: None,
            code_challenge: pkce_challenge_s256(verifier),
            code_challenge_method: "S256".to_string(),
            consent_approved: false,
        })
        .await
        .unwrap();
    let AuthorizeOutcome::Redirect { code, .. } = outcome else {
        panic!("expected a redirect with a code");
    };

    let err = auth
        .engine
        .exchange_code(CodeExchangeRequest {
            code: code.clone(),
            code_verifier: "wrong-verifier-wrong-verifier-wrong-ver".to_string(),
            client_id: auth.client_id.clone(),
            redirect_uri: "https://app.example/cb".to_string(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidGrant(_)));

    // The correct verifier still works
    let response = auth
        .engine
        .exchange_code(CodeExchangeRequest {
            code,
            code_verifier: verifier.to_string(),
            client_id: auth.client_id.clone(),
            redirect_uri: "https://app.example/cb".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(response.scope, vec!["read:a"]);
}

/// Refresh lineage survives verification even after the consumed parent's
/// access token has naturally expired from the lineage's point of view
#[tokio::test]
async fn verify_accepts_refresh_lineage() {
    let auth = test_auth().await;

    let original = auth
        .engine
        .client_credentials(auth.request(&["write:files"]))
        .await
        .unwrap();
    let rotated = auth
        .engine
        .refresh(RefreshRequest {
            refresh_token: original.refresh_token.unwrap(),
            scope: vec!["read:files".to_string()],
        })
        .await
        .unwrap();

    let outcome = auth
        .engine
        .verify(warden_core::oauth::VerifyRequest {
            token: rotated.access_token,
            task_id: Some(rotated.task_id.clone()),
            parent_task_id: None,
            parent_token: None,
            allow_clock_skew: true,
            max_clock_skew_seconds: Some(30),
        })
        .await
        .unwrap();
    assert!(outcome.verified);
}
