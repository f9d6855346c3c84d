//! Authorization decisions.
//!
//! # Purpose
//! A [`PolicyChecker`] answers one question: may `subject` perform `action` on
//! `resource` given `context`? `Ok(())` means allowed; any error is a denial
//! and is surfaced to the caller unchanged.
//!
//! Two in-process engines ship with the crate:
//! - [`MemoryPolicyChecker`]: allow/deny policies with `*` wildcards and
//!   context conditions. An explicit deny always wins over any allow.
//! - [`CasbinPolicyChecker`]: RBAC over `(sub, obj, act)` with role groupings
//!   and `keyMatch2` resource patterns.
//!
//! Remote or custom engines plug in by implementing the trait, or by passing a
//! closure.
//!
//! # Security considerations
//! - Default is deny: no matching policy yields `PolicyDenied`.
//! - Policy inputs must be trusted or validated before building a checker.
use crate::claims::Metadata;
use crate::{AuthError, AuthResult};
use casbin::{CoreApi, DefaultModel, Enforcer, MemoryAdapter, MgmtApi};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, PoisonError};

const CASBIN_MODEL: &str = r#"
[request_definition]
r = sub, obj, act

[policy_definition]
p = sub, obj, act

[role_definition]
g = _, _

[policy_effect]
e = some(where (p.eft == allow))

[matchers]
m = g(r.sub, p.sub) && keyMatch2(r.obj, p.obj) && (r.act == p.act || p.act == "*")
"#;

/// One authorization question.
#[derive(Debug, Clone, Copy)]
pub struct AuthorizationRequest<'a> {
    pub subject: &'a str,
    pub resource: &'a str,
    pub action: &'a str,
    pub context: &'a Metadata,
}

pub trait PolicyChecker: Send + Sync {
    fn is_allowed(&self, request: &AuthorizationRequest<'_>) -> AuthResult<()>;
}

impl<F> PolicyChecker for F
where
    F: Fn(&AuthorizationRequest<'_>) -> AuthResult<()> + Send + Sync,
{
    fn is_allowed(&self, request: &AuthorizationRequest<'_>) -> AuthResult<()> {
        self(request)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    Allow,
    Deny,
}

/// A single allow or deny rule.
///
/// `subjects`, `resources` and `actions` are glob patterns where `*` matches
/// any run of characters. Every entry of `conditions` must equal the value
/// stored under the same key in the request context.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Policy {
    pub id: String,
    #[serde(default)]
    pub description: String,
    pub subjects: Vec<String>,
    pub resources: Vec<String>,
    pub actions: Vec<String>,
    pub effect: Effect,
    #[serde(default)]
    pub conditions: BTreeMap<String, Value>,
}

impl Policy {
    pub fn allow(id: impl Into<String>, subjects: &[&str], resources: &[&str], actions: &[&str]) -> Self {
        Self::with_effect(id, Effect::Allow, subjects, resources, actions)
    }

    pub fn deny(id: impl Into<String>, subjects: &[&str], resources: &[&str], actions: &[&str]) -> Self {
        Self::with_effect(id, Effect::Deny, subjects, resources, actions)
    }

    fn with_effect(
        id: impl Into<String>,
        effect: Effect,
        subjects: &[&str],
        resources: &[&str],
        actions: &[&str],
    ) -> Self {
        let owned = |values: &[&str]| -> Vec<String> {
            values.iter().map(|value| value.to_string()).collect()
        };
        Self {
            id: id.into(),
            description: String::new(),
            subjects: owned(subjects),
            resources: owned(resources),
            actions: owned(actions),
            effect,
            conditions: BTreeMap::new(),
        }
    }

    pub fn with_condition(mut self, key: impl Into<String>, value: Value) -> Self {
        self.conditions.insert(key.into(), value);
        self
    }

    fn matches(&self, request: &AuthorizationRequest<'_>) -> bool {
        let any = |patterns: &[String], value: &str| {
            patterns.iter().any(|pattern| wildcard_match(pattern, value))
        };
        any(&self.subjects, request.subject)
            && any(&self.resources, request.resource)
            && any(&self.actions, request.action)
            && self
                .conditions
                .iter()
                .all(|(key, expected)| request.context.get(key) == Some(expected))
    }
}

/// In-memory allow/deny warden.
#[derive(Debug, Clone, Default)]
pub struct MemoryPolicyChecker {
    policies: Vec<Policy>,
}

impl MemoryPolicyChecker {
    /// Policy ids must be unique.
    pub fn new(policies: Vec<Policy>) -> AuthResult<Self> {
        let mut seen = HashSet::new();
        for policy in &policies {
            if !seen.insert(policy.id.as_str()) {
                return Err(AuthError::InvalidConfig(format!(
                    "duplicate policy id {}",
                    policy.id
                )));
            }
        }
        Ok(Self { policies })
    }

    pub fn policies(&self) -> &[Policy] {
        &self.policies
    }
}

impl PolicyChecker for MemoryPolicyChecker {
    fn is_allowed(&self, request: &AuthorizationRequest<'_>) -> AuthResult<()> {
        let mut allowed = false;
        for policy in self.policies.iter().filter(|policy| policy.matches(request)) {
            match policy.effect {
                Effect::Deny => {
                    return Err(AuthError::PolicyForcefullyDenied {
                        reason: format!("denied by policy {}", policy.id),
                    });
                }
                Effect::Allow => allowed = true,
            }
        }
        if allowed {
            Ok(())
        } else {
            Err(AuthError::PolicyDenied {
                reason: "no matching allow policy".to_string(),
            })
        }
    }
}

/// Glob match where `*` matches any (possibly empty) run of bytes.
pub fn wildcard_match(pattern: &str, value: &str) -> bool {
    if pattern == "*" {
        return true;
    }

    let pattern = pattern.as_bytes();
    let value = value.as_bytes();
    let (mut p_idx, mut v_idx) = (0usize, 0usize);
    let (mut star_idx, mut match_idx) = (None, 0usize);

    while v_idx < value.len() {
        match pattern.get(p_idx).copied() {
            Some(b'*') => {
                star_idx = Some(p_idx);
                match_idx = v_idx;
                p_idx += 1;
            }
            Some(byte) if byte == value[v_idx] => {
                p_idx += 1;
                v_idx += 1;
            }
            _ => match star_idx {
                Some(star) => {
                    p_idx = star + 1;
                    match_idx += 1;
                    v_idx = match_idx;
                }
                None => return false,
            },
        }
    }

    pattern[p_idx..].iter().all(|&byte| byte == b'*')
}

/// `p, sub, obj, act` rule.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PolicyRule {
    pub subject: String,
    pub object: String,
    pub action: String,
}

/// `g, user, role` rule.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GroupingRule {
    pub user: String,
    pub role: String,
}

/// RBAC checker backed by an in-memory casbin enforcer.
///
/// The request context is not consulted; casbin decides on `(sub, obj, act)`
/// alone. A policy action of `*` matches every action.
pub struct CasbinPolicyChecker {
    enforcer: Mutex<Enforcer>,
}

impl CasbinPolicyChecker {
    pub async fn new(policies: &[PolicyRule], groupings: &[GroupingRule]) -> AuthResult<Self> {
        let enforcer = build_enforcer(policies, groupings)
            .await
            .map_err(|err| AuthError::InvalidConfig(format!("casbin: {err}")))?;
        Ok(Self {
            enforcer: Mutex::new(enforcer),
        })
    }
}

async fn build_enforcer(
    policies: &[PolicyRule],
    groupings: &[GroupingRule],
) -> casbin::Result<Enforcer> {
    let model = DefaultModel::from_str(CASBIN_MODEL).await?;
    let mut enforcer = Enforcer::new(model, MemoryAdapter::default()).await?;

    for policy in policies {
        enforcer
            .add_policy(vec![
                policy.subject.clone(),
                policy.object.clone(),
                policy.action.clone(),
            ])
            .await?;
    }

    for grouping in groupings {
        enforcer
            .add_grouping_policy(vec![grouping.user.clone(), grouping.role.clone()])
            .await?;
    }

    // Role links must be rebuilt once every grouping is loaded.
    enforcer.build_role_links()?;
    Ok(enforcer)
}

impl PolicyChecker for CasbinPolicyChecker {
    fn is_allowed(&self, request: &AuthorizationRequest<'_>) -> AuthResult<()> {
        let enforcer = self.enforcer.lock().unwrap_or_else(PoisonError::into_inner);
        let allowed = enforcer
            .enforce((request.subject, request.resource, request.action))
            .map_err(|err| {
                tracing::warn!(error = %err, "casbin enforcement failed");
                AuthError::PolicyDenied {
                    reason: "policy evaluation failed".to_string(),
                }
            })?;
        if allowed {
            Ok(())
        } else {
            Err(AuthError::PolicyDenied {
                reason: format!("{} may not {} {}", request.subject, request.action, request.resource),
            })
        }
    }
}

impl std::fmt::Debug for CasbinPolicyChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CasbinPolicyChecker").finish_non_exhaustive()
    }
}
