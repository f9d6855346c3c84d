//! Integration tests for the authorization guard.
//!
//! # Purpose
//! Verify that the guard returns the policy checker's verdict unchanged, and
//! that a verified token flows through authorization into a session that
//! downstream async code can read.
//!
//! # Key invariants
//! - `allow` succeeds iff the checker succeeds for the identical tuple.
//! - Denials stay typed; boundary code only ever shows the opaque message.
//!
//! # Concurrency + ordering guarantees
//! - One guard is shared across tasks without locking.
//!
//! # How to use
//! Run with `cargo test -p tollgate-authz --test guard_flow`.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tollgate_authz::session;
use tollgate_authz::{
    AuthError, AuthResult, AuthorityConfig, AuthorizationRequest, CasbinPolicyChecker,
    DefaultClaims, Guard, GroupingRule, KeyPair, KeySet, Metadata, PolicyChecker, PolicyRule,
    SessionContext, TokenAuthority,
};

/// Registry checker: subject -> resource -> allowed actions.
struct RegistryChecker {
    registry: HashMap<String, HashMap<String, Vec<String>>>,
}

impl RegistryChecker {
    fn new() -> Self {
        let mut resources = HashMap::new();
        resources.insert("bar".to_string(), vec!["qux".to_string()]);
        let mut registry = HashMap::new();
        registry.insert("foo".to_string(), resources);
        Self { registry }
    }
}

impl PolicyChecker for RegistryChecker {
    fn is_allowed(&self, request: &AuthorizationRequest<'_>) -> AuthResult<()> {
        let allowed = self
            .registry
            .get(request.subject)
            .and_then(|resources| resources.get(request.resource))
            .is_some_and(|actions| actions.iter().any(|action| action == request.action));
        if allowed {
            Ok(())
        } else {
            Err(AuthError::PolicyDenied {
                reason: "not allowed".to_string(),
            })
        }
    }
}

fn authority() -> TokenAuthority {
    TokenAuthority::new(
        AuthorityConfig::new("svc-a", Duration::from_secs(60)),
        KeyPair::from_seed(&[21u8; 32]),
    )
    .expect("authority")
}

#[test]
fn allow_mirrors_checker() {
    let guard: Guard<DefaultClaims, KeySet, RegistryChecker> =
        Guard::new(Arc::new(KeySet::default()), Arc::new(RegistryChecker::new()));
    let context = Metadata::new();

    assert!(guard.allow("foo", "bar", "qux", &context).is_ok());
    let err = guard
        .allow("foo", "bar", "quxx", &context)
        .expect_err("wrong action");
    assert!(matches!(err, AuthError::PolicyDenied { .. }));
    assert_eq!(err.opaque_message(), "forbidden");
    assert!(guard.allow("nobody", "bar", "qux", &context).is_err());
}

#[test]
fn checker_errors_pass_through_unchanged() {
    let checker = |_: &AuthorizationRequest<'_>| -> AuthResult<()> {
        Err(AuthError::PolicyForcefullyDenied {
            reason: "maintenance".to_string(),
        })
    };
    let guard: Guard<DefaultClaims, KeySet, _> =
        Guard::new(Arc::new(KeySet::default()), Arc::new(checker));
    match guard.allow("foo", "bar", "qux", &Metadata::new()) {
        Err(AuthError::PolicyForcefullyDenied { reason }) => assert_eq!(reason, "maintenance"),
        other => panic!("unexpected verdict: {other:?}"),
    }
}

#[tokio::test]
async fn authorized_session_reaches_downstream_code() {
    let authority = authority();
    let guard: Guard<DefaultClaims, KeySet, RegistryChecker> = Guard::new(
        Arc::new(KeySet::from_jwks(&authority.publish_jwks()).expect("set")),
        Arc::new(RegistryChecker::new()),
    );
    let token = authority
        .issue_token("foo", ["svc-b"], DefaultClaims::default())
        .expect("issue")
        .token;

    let session = guard
        .authenticate(&token)
        .expect("authenticated")
        .authorize(&guard, "bar", "qux", &Metadata::new())
        .expect("authorized")
        .into_session();

    let subject = session::scope(session, async {
        downstream().await
    })
    .await
    .expect("subject");
    assert_eq!(subject, "foo");
}

async fn downstream() -> AuthResult<String> {
    tokio::task::yield_now().await;
    let session = session::current();
    let claims = session.resolve_valid_claims::<DefaultClaims>()?;
    assert_eq!(claims.registered.iss, "svc-a");
    session.resolve_valid_subject().map(str::to_string)
}

#[tokio::test]
async fn missing_session_is_invalid() {
    let err = downstream().await.expect_err("no session");
    assert!(matches!(err, AuthError::InvalidSession));
    assert_eq!(err.opaque_message(), "unauthorized");
    assert_eq!(SessionContext::new().resolve_subject(), "");
}

#[tokio::test]
async fn shared_guard_across_tasks() {
    let authority = Arc::new(authority());
    let guard: Arc<Guard<DefaultClaims, KeySet, RegistryChecker>> = Arc::new(Guard::new(
        Arc::new(authority.key_set()),
        Arc::new(RegistryChecker::new()),
    ));

    let mut handles = Vec::new();
    for i in 0..8 {
        let guard = guard.clone();
        let authority = authority.clone();
        handles.push(tokio::spawn(async move {
            let subject = if i % 2 == 0 { "foo" } else { "other" };
            let token = authority
                .issue_token(subject, ["svc-b"], DefaultClaims::default())
                .expect("issue")
                .token;
            guard
                .authenticate(&token)
                .and_then(|identity| identity.authorize(&guard, "bar", "qux", &Metadata::new()))
                .is_ok()
        }));
    }

    let mut allowed = 0;
    for handle in handles {
        if handle.await.expect("task") {
            allowed += 1;
        }
    }
    assert_eq!(allowed, 4);
}

#[tokio::test]
async fn casbin_checker_behind_guard() {
    let authority = authority();
    let checker = CasbinPolicyChecker::new(
        &[PolicyRule {
            subject: "role:reader".to_string(),
            object: "/articles/*".to_string(),
            action: "read".to_string(),
        }],
        &[GroupingRule {
            user: "user-1".to_string(),
            role: "role:reader".to_string(),
        }],
    )
    .await
    .expect("checker");
    let guard: Guard<DefaultClaims, KeySet, CasbinPolicyChecker> =
        Guard::new(Arc::new(authority.key_set()), Arc::new(checker));
    let token = authority
        .issue_token("user-1", ["svc-b"], DefaultClaims::default())
        .expect("issue")
        .token;

    let identity = guard.authenticate(&token).expect("authenticated");
    let authorized = identity
        .clone()
        .authorize(&guard, "/articles/7", "read", &Metadata::new())
        .expect("read");
    assert_eq!(authorized.subject(), "user-1");
    assert!(
        identity
            .authorize(&guard, "/articles/7", "delete", &Metadata::new())
            .expect_err("delete")
            .is_denied()
    );
}
