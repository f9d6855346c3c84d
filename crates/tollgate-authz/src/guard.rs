//! Authentication and authorization composed.
//!
//! # Purpose
//! [`Authenticator`] turns a compact token into verified claims using a shared
//! key resolver. [`Guard`] adds a [`PolicyChecker`] on top so a request can be
//! authenticated and then authorized in one place.
//!
//! # Request flow
//! ```text
//! token --authenticate--> Authenticated<C> --authorize--> Authorized<C>
//!            |                                  |
//!            +-- Unparseable / InvalidClaims    +-- PolicyDenied / PolicyForcefullyDenied
//! ```
//! Each stage is a distinct type, so code holding an [`Authorized`] value can
//! only have obtained it through both checks. Nothing is persisted between
//! requests.
//!
//! # Concurrency
//! Guards only hold `Arc`s to their collaborators plus immutable settings and
//! can be shared freely across tasks.
use crate::claims::{Claims, Metadata, now_epoch_seconds};
use crate::policy::{AuthorizationRequest, PolicyChecker};
use crate::resolver::KeyResolver;
use crate::session::SessionContext;
use crate::verifier::TokenVerifier;
use crate::AuthResult;
use std::sync::Arc;

type ClaimsFactory<C> = Arc<dyn Fn() -> C + Send + Sync>;

/// Token authentication without an authorization step.
pub struct Authenticator<C, R: ?Sized> {
    resolver: Arc<R>,
    verifier: TokenVerifier,
    factory: ClaimsFactory<C>,
}

impl<C, R> Authenticator<C, R>
where
    C: Claims,
    R: KeyResolver + ?Sized,
{
    pub fn new(resolver: Arc<R>) -> Self
    where
        C: Default,
    {
        Self::with_claims_factory(resolver, C::default)
    }

    pub fn with_claims_factory<F>(resolver: Arc<R>, factory: F) -> Self
    where
        F: Fn() -> C + Send + Sync + 'static,
    {
        Self {
            resolver,
            verifier: TokenVerifier::new(),
            factory: Arc::new(factory),
        }
    }

    /// Replace the verifier, e.g. to require an issuer or audience.
    pub fn with_verifier(mut self, verifier: TokenVerifier) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn new_claims(&self) -> C {
        (self.factory)()
    }

    pub fn authenticate_jwt(&self, token: &str) -> AuthResult<C> {
        self.authenticate_jwt_at(token, now_epoch_seconds())
    }

    /// Like [`Authenticator::authenticate_jwt`] with the time window checked at
    /// `now` (epoch seconds).
    pub fn authenticate_jwt_at(&self, token: &str, now: i64) -> AuthResult<C> {
        let mut claims = self.new_claims();
        self.verifier
            .validate_into_at(token, self.resolver.as_ref(), now, &mut claims)?;
        Ok(claims)
    }

    pub fn authenticate(&self, token: &str) -> AuthResult<Authenticated<C>> {
        let claims = self.authenticate_jwt(token)?;
        Ok(Authenticated {
            token: token.to_string(),
            claims,
        })
    }
}

impl<C, R: ?Sized> Clone for Authenticator<C, R> {
    fn clone(&self) -> Self {
        Self {
            resolver: Arc::clone(&self.resolver),
            verifier: self.verifier.clone(),
            factory: Arc::clone(&self.factory),
        }
    }
}

impl<C, R: ?Sized> std::fmt::Debug for Authenticator<C, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("verifier", &self.verifier)
            .finish_non_exhaustive()
    }
}

pub struct Guard<C, R: ?Sized, P: ?Sized> {
    authn: Authenticator<C, R>,
    authz: Arc<P>,
}

impl<C, R, P> Guard<C, R, P>
where
    C: Claims,
    R: KeyResolver + ?Sized,
    P: PolicyChecker + ?Sized,
{
    pub fn new(resolver: Arc<R>, checker: Arc<P>) -> Self
    where
        C: Default,
    {
        Self::from_parts(Authenticator::new(resolver), checker)
    }

    pub fn from_parts(authn: Authenticator<C, R>, checker: Arc<P>) -> Self {
        Self {
            authn,
            authz: checker,
        }
    }

    pub fn authenticator(&self) -> &Authenticator<C, R> {
        &self.authn
    }

    /// Ask the policy checker directly. Its verdict is returned unchanged.
    pub fn allow(
        &self,
        subject: &str,
        resource: &str,
        action: &str,
        context: &Metadata,
    ) -> AuthResult<()> {
        let request = AuthorizationRequest {
            subject,
            resource,
            action,
            context,
        };
        let verdict = self.authz.is_allowed(&request);
        if let Err(err) = &verdict {
            tracing::debug!(subject, resource, action, kind = %err.kind(), "request denied");
        }
        verdict
    }

    pub fn authenticate_jwt(&self, token: &str) -> AuthResult<C> {
        self.authn.authenticate_jwt(token)
    }

    pub fn authenticate_jwt_at(&self, token: &str, now: i64) -> AuthResult<C> {
        self.authn.authenticate_jwt_at(token, now)
    }

    pub fn new_claims(&self) -> C {
        self.authn.new_claims()
    }

    pub fn authenticate(&self, token: &str) -> AuthResult<Authenticated<C>> {
        self.authn.authenticate(token)
    }
}

impl<C, R: ?Sized, P: ?Sized> Clone for Guard<C, R, P> {
    fn clone(&self) -> Self {
        Self {
            authn: self.authn.clone(),
            authz: Arc::clone(&self.authz),
        }
    }
}

impl<C, R: ?Sized, P: ?Sized> std::fmt::Debug for Guard<C, R, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Guard")
            .field("authn", &self.authn)
            .finish_non_exhaustive()
    }
}

/// A request whose token verified.
#[derive(Debug, Clone)]
pub struct Authenticated<C> {
    token: String,
    claims: C,
}

impl<C: Claims> Authenticated<C> {
    pub fn subject(&self) -> &str {
        self.claims.subject()
    }

    pub fn claims(&self) -> &C {
        &self.claims
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Authorize the authenticated subject for `action` on `resource`.
    pub fn authorize<R, P>(
        self,
        guard: &Guard<C, R, P>,
        resource: &str,
        action: &str,
        context: &Metadata,
    ) -> AuthResult<Authorized<C>>
    where
        R: KeyResolver + ?Sized,
        P: PolicyChecker + ?Sized,
    {
        guard.allow(self.subject(), resource, action, context)?;
        Ok(Authorized {
            identity: self,
            resource: resource.to_string(),
            action: action.to_string(),
        })
    }

    pub fn into_session(self) -> SessionContext {
        SessionContext::default()
            .with_auth_jwt(self.token)
            .with_auth_claims(self.claims)
    }
}

/// A request that passed both authentication and authorization.
#[derive(Debug, Clone)]
pub struct Authorized<C> {
    identity: Authenticated<C>,
    resource: String,
    action: String,
}

impl<C: Claims> Authorized<C> {
    pub fn subject(&self) -> &str {
        self.identity.subject()
    }

    pub fn claims(&self) -> &C {
        self.identity.claims()
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn into_session(self) -> SessionContext {
        self.identity.into_session()
    }
}
