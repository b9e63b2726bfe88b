//! Check contract: the named predicates permission expressions are built from.
//!
//! A check is either a user check (consults the requesting user alone, may
//! run before any resource is loaded) or a resource check (consults a bound
//! resource, the request context and an optional change descriptor). Resource
//! checks split further into operation checks, which run inline during the
//! request, and commit checks, which are deferred until the commit phase.

pub mod context;

pub use context::{ChangeDescriptor, RequestContext, Resource, User};

use std::fmt;
use std::sync::Arc;

use crate::error::{DomainError, DomainResult};
use crate::expression::EvaluationMode;

/// A predicate over the requesting user alone. Runs in every evaluation
/// mode, including the resource-less pre-flight pass.
pub trait UserCheck: Send + Sync {
    fn ok(&self, user: &User) -> anyhow::Result<bool>;
}

impl<F> UserCheck for F
where
    F: Fn(&User) -> anyhow::Result<bool> + Send + Sync,
{
    fn ok(&self, user: &User) -> anyhow::Result<bool> {
        self(user)
    }
}

/// A predicate over a candidate resource. The contract for both operation
/// and commit checks; the change descriptor is present only for mutations.
pub trait ResourceCheck: Send + Sync {
    fn ok(
        &self,
        resource: &Resource,
        ctx: &RequestContext,
        change: Option<&ChangeDescriptor>,
    ) -> anyhow::Result<bool>;
}

impl<F> ResourceCheck for F
where
    F: Fn(&Resource, &RequestContext, Option<&ChangeDescriptor>) -> anyhow::Result<bool>
        + Send
        + Sync,
{
    fn ok(
        &self,
        resource: &Resource,
        ctx: &RequestContext,
        change: Option<&ChangeDescriptor>,
    ) -> anyhow::Result<bool> {
        self(resource, ctx, change)
    }
}

/// Which phase a check is allowed to run in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckKind {
    /// User-only predicate, runnable in every phase.
    User,
    /// Resource predicate evaluated inline during the request.
    Operation,
    /// Resource predicate deferred until the commit phase.
    Commit,
}

#[derive(Clone)]
enum CheckImpl {
    User(Arc<dyn UserCheck>),
    Resource(Arc<dyn ResourceCheck>),
}

/// A named, kind-tagged check resolved from the dictionary. The
/// constructors make an invalid kind/implementation pairing
/// unrepresentable.
#[derive(Clone)]
pub struct CheckInstance {
    name: Arc<str>,
    kind: CheckKind,
    implementation: CheckImpl,
}

impl fmt::Debug for CheckInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckInstance")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

impl CheckInstance {
    pub fn user(name: impl Into<String>, check: Arc<dyn UserCheck>) -> Self {
        Self {
            name: Arc::from(name.into()),
            kind: CheckKind::User,
            implementation: CheckImpl::User(check),
        }
    }

    pub fn operation(name: impl Into<String>, check: Arc<dyn ResourceCheck>) -> Self {
        Self {
            name: Arc::from(name.into()),
            kind: CheckKind::Operation,
            implementation: CheckImpl::Resource(check),
        }
    }

    pub fn commit(name: impl Into<String>, check: Arc<dyn ResourceCheck>) -> Self {
        Self {
            name: Arc::from(name.into()),
            kind: CheckKind::Commit,
            implementation: CheckImpl::Resource(check),
        }
    }

    /// The registered name. Appears in expression strings, trace output
    /// and result-cache keys.
    pub fn identifier(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> CheckKind {
        self.kind
    }

    /// Whether this check may be invoked under the given evaluation mode.
    pub fn runs_in(&self, mode: EvaluationMode) -> bool {
        match mode {
            EvaluationMode::UserChecksOnly => self.kind == CheckKind::User,
            EvaluationMode::InlineChecksOnly => self.kind != CheckKind::Commit,
            EvaluationMode::AllChecks => true,
        }
    }

    /// Invokes the check against the bound evaluation context. A check
    /// error is wrapped and propagated, never downgraded to a denial.
    pub fn evaluate(
        &self,
        resource: Option<&Resource>,
        ctx: &RequestContext,
        change: Option<&ChangeDescriptor>,
    ) -> DomainResult<bool> {
        let verdict = match &self.implementation {
            CheckImpl::User(check) => check.ok(ctx.user()),
            CheckImpl::Resource(check) => {
                let resource = resource.ok_or_else(|| DomainError::InvalidCheckContract {
                    name: self.name.to_string(),
                    message: "resource-level check invoked without a bound resource".to_string(),
                })?;
                check.ok(resource, ctx, change)
            }
        };
        verdict.map_err(|source| DomainError::CheckFailed {
            name: self.name.to_string(),
            source,
        })
    }
}
