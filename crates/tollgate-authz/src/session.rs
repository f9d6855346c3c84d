//! Authenticated identity carried through a request.
//!
//! A [`SessionContext`] holds the raw token, the decoded claims and, when the
//! subject is a UUID, its parsed form. Contexts are immutable values; the
//! `with_*` builders return a new context.
//!
//! Two accessor families:
//! - `resolve_*` never fail. Missing or wrongly typed values come back as
//!   `""` or `None`.
//! - `resolve_valid_*` turn those sentinels into `AuthError::InvalidSession`
//!   so handlers can bail out with `?`.
//!
//! Within async code the context travels in a tokio task-local: wrap the
//! handler future with [`scope`] and read it anywhere below with [`current`].
use crate::claims::Claims;
use crate::{AuthError, AuthResult};
use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

tokio::task_local! {
    static CURRENT: SessionContext;
}

#[derive(Clone, Default)]
pub struct SessionContext {
    jwt: Option<String>,
    subject: Option<String>,
    subject_uuid: Option<Uuid>,
    claims: Option<Arc<dyn Any + Send + Sync>>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_auth_jwt(mut self, jwt: impl Into<String>) -> Self {
        self.jwt = Some(jwt.into());
        self
    }

    pub fn with_auth_claims<C: Claims>(mut self, claims: C) -> Self {
        let subject = claims.subject().to_string();
        self.subject_uuid = Uuid::parse_str(&subject).ok();
        self.subject = Some(subject);
        self.claims = Some(Arc::new(claims));
        self
    }

    pub fn resolve_jwt(&self) -> &str {
        self.jwt.as_deref().unwrap_or_default()
    }

    pub fn resolve_subject(&self) -> &str {
        self.subject.as_deref().unwrap_or_default()
    }

    pub fn resolve_subject_uuid(&self) -> Option<Uuid> {
        self.subject_uuid
    }

    /// Claims stored by [`with_auth_claims`](Self::with_auth_claims), if they
    /// are of type `C`.
    pub fn resolve_claims<C: Claims>(&self) -> Option<&C> {
        self.claims.as_deref()?.downcast_ref::<C>()
    }

    pub fn resolve_valid_jwt(&self) -> AuthResult<&str> {
        non_empty(self.resolve_jwt())
    }

    pub fn resolve_valid_subject(&self) -> AuthResult<&str> {
        non_empty(self.resolve_subject())
    }

    pub fn resolve_valid_subject_uuid(&self) -> AuthResult<Uuid> {
        self.resolve_subject_uuid().ok_or(AuthError::InvalidSession)
    }

    pub fn resolve_valid_claims<C: Claims>(&self) -> AuthResult<&C> {
        self.resolve_claims().ok_or(AuthError::InvalidSession)
    }
}

fn non_empty(value: &str) -> AuthResult<&str> {
    if value.is_empty() {
        Err(AuthError::InvalidSession)
    } else {
        Ok(value)
    }
}

// Hand-written so the token and claims never reach logs.
impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("subject", &self.subject)
            .field("has_jwt", &self.jwt.is_some())
            .field("has_claims", &self.claims.is_some())
            .finish()
    }
}

/// Run `future` with `session` as the current context.
pub async fn scope<F: Future>(session: SessionContext, future: F) -> F::Output {
    CURRENT.scope(session, future).await
}

/// The context installed by the innermost enclosing [`scope`], or an empty one.
pub fn current() -> SessionContext {
    CURRENT.try_with(Clone::clone).unwrap_or_default()
}
