//! Invariant-level properties exercised through the full engine stack

use std::collections::BTreeSet;
use warden_core::delegation::{CreateGrantRequest, PrincipalKind, PrincipalRef};
use warden_core::error::AuthError;
use warden_core::oauth::TokenResponse;
use warden_core::scope::ScopeCatalog;
use warden_core::store::CredentialStore;
use warden_tests::{test_auth, test_scopes, TestAuth};

async fn issue_chain(auth: &TestAuth, scopes: &[&[&str]]) -> Vec<TokenResponse> {
    let mut tokens: Vec<TokenResponse> = Vec::new();
    for scope in scopes {
        let mut request = auth.request(scope);
        if let Some(parent) = tokens.last() {
            request.parent_token = Some(parent.access_token.clone());
        }
        tokens.push(auth.engine.client_credentials(request).await.unwrap());
    }
    tokens
}

/// Scope monotonicity: every restricted child's expanded scope is contained
/// in its parent's expanded scope, at every link of a deep chain
#[tokio::test]
async fn scope_sets_shrink_down_the_chain() {
    let auth = test_auth().await;
    let chain = issue_chain(
        &auth,
        &[
            &["write:files", "write:b", "read:a"],
            &["write:files", "read:a"],
            &["read:files"],
        ],
    )
    .await;

    let catalog = ScopeCatalog::new(test_scopes()).unwrap();
    for pair in chain.windows(2) {
        let parent: Vec<&str> = pair[0].scope.iter().map(String::as_str).collect();
        let child: Vec<&str> = pair[1].scope.iter().map(String::as_str).collect();
        assert!(catalog.is_subset(child, parent).unwrap());
    }
}

/// Lineage acyclicity: walking parent pointers from any issued token
/// terminates at a root
#[tokio::test]
async fn parent_walk_always_terminates() {
    let auth = test_auth().await;
    let chain = issue_chain(&auth, &[&["write:b", "read:a"], &["read:a"], &["read:a"]]).await;

    for response in &chain {
        let ancestors = auth.store.ancestor_chain(response.token_id).await.unwrap();
        // Root first, the token itself last, every id distinct
        assert_eq!(ancestors.last().unwrap().id, response.token_id);
        assert!(ancestors.first().unwrap().parent_token_id.is_none());
        let ids: BTreeSet<_> = ancestors.iter().map(|t| t.id).collect();
        assert_eq!(ids.len(), ancestors.len());
    }
}

/// Cascading revocation reaches grandchildren, not just direct children
#[tokio::test]
async fn revocation_cascade_is_transitive() {
    let auth = test_auth().await;
    let chain = issue_chain(
        &auth,
        &[&["write:b", "read:a"], &["read:a"], &["read:a"], &["read:a"]],
    )
    .await;

    auth.engine
        .revoke(&chain[0].access_token, true)
        .await
        .unwrap();

    for response in &chain[1..] {
        let introspection = auth.engine.introspect(&response.access_token).await.unwrap();
        assert!(!introspection.active);

        let row = auth.store.token(response.token_id).await.unwrap().unwrap();
        assert_eq!(row.revocation_reason.as_deref(), Some("ancestor_revoked"));
    }
}

/// Deny-override: a matching deny wins over a matching allow regardless of
/// the rules' relative priorities or insertion order
#[tokio::test]
async fn deny_beats_allow_for_forbidden_scope() {
    let auth = test_auth().await;

    let err = auth
        .engine
        .client_credentials(auth.request(&["forbidden:x", "read:a"]))
        .await
        .unwrap_err();

    match err {
        AuthError::PolicyDenied { policy } => {
            assert_eq!(policy.as_deref(), Some("deny-forbidden"));
        }
        other => panic!("expected policy denial, got {other}"),
    }
}

/// Delegation depth: a grant with max_depth = 1 refuses a token whose
/// ancestor chain already holds one delegated hop beneath the grant root
#[tokio::test]
async fn grant_depth_limit_is_enforced() {
    let auth = test_auth().await;

    let grant = auth
        .engine
        .delegation()
        .create_grant(CreateGrantRequest {
            principal: PrincipalRef {
                kind: PrincipalKind::User,
                id: "alice".to_string(),
            },
            delegate_id: auth.client_id.clone(),
            scope: vec!["read:a".to_string(), "write:b".to_string()],
            max_depth: 1,
            constraints: Default::default(),
            parent_grant_id: None,
            expires_at: None,
        })
        .await
        .unwrap();

    let mut first = auth.request(&["read:a"]);
    first.grant_id = Some(grant.id);
    let hop_one = auth.engine.client_credentials(first).await.unwrap();

    let mut second = auth.request(&["read:a"]);
    second.grant_id = Some(grant.id);
    second.parent_token = Some(hop_one.access_token);
    let err = auth.engine.client_credentials(second).await.unwrap_err();

    assert!(matches!(err, AuthError::DepthExceeded { current: 1, max: 1 }));
}

/// Audit completeness: every token in a revocation cascade produces its own
/// audit record, so the cascade is reconstructable
#[tokio::test]
async fn cascade_audit_trail_is_complete() {
    let auth = test_auth().await;
    let chain = issue_chain(&auth, &[&["write:b", "read:a"], &["read:a"], &["read:a"]]).await;

    auth.engine
        .revoke(&chain[0].access_token, true)
        .await
        .unwrap();

    let revocations: Vec<_> = auth
        .audit
        .events()
        .into_iter()
        .filter(|e| e.kind == warden_core::audit::AuditKind::TokenRevoked)
        .collect();
    assert_eq!(revocations.len(), 3);

    let audited: BTreeSet<_> = revocations.iter().filter_map(|e| e.token_id).collect();
    let expected: BTreeSet<_> = chain.iter().map(|t| t.token_id).collect();
    assert_eq!(audited, expected);
}
