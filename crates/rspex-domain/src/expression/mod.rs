//! Permission expression trees and their lazy evaluation.
//!
//! An expression is an immutable tree of boolean combinators over check
//! leaves, built per permission check with the evaluation context (resource,
//! request context, change descriptor) already bound into the leaves.
//! Evaluation is lazy in two senses: short-circuiting skips whole subtrees,
//! and the evaluation mode defers check classes that may not run yet,
//! yielding `Deferred` instead of invoking them.

pub mod cache;
pub mod parser;

#[cfg(test)]
mod result_proptest;

pub use cache::{register_expression_cache_metrics, CacheKey, ExpressionResultCache};
pub use parser::{parse_permission_expression, PermissionAst};

use std::fmt;
use std::sync::Arc;

use crate::check::{ChangeDescriptor, CheckInstance, CheckKind, RequestContext, Resource};
use crate::dictionary::PermissionKind;
use crate::error::DomainResult;

/// Outcome of evaluating a permission expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpressionResult {
    /// Granted.
    Pass,
    /// Denied. Final; a failed expression never becomes deferred.
    Fail,
    /// Not yet decidable: some check was excluded by the evaluation mode.
    Deferred,
}

impl ExpressionResult {
    /// Conjunction: FAIL dominates, then DEFERRED.
    pub fn and(self, other: Self) -> Self {
        match (self, other) {
            (Self::Fail, _) | (_, Self::Fail) => Self::Fail,
            (Self::Deferred, _) | (_, Self::Deferred) => Self::Deferred,
            _ => Self::Pass,
        }
    }

    /// Disjunction: PASS dominates, then DEFERRED.
    pub fn or(self, other: Self) -> Self {
        match (self, other) {
            (Self::Pass, _) | (_, Self::Pass) => Self::Pass,
            (Self::Deferred, _) | (_, Self::Deferred) => Self::Deferred,
            _ => Self::Fail,
        }
    }

    /// Negation. DEFERRED is a fixed point: unknown stays unknown.
    pub fn not(self) -> Self {
        match self {
            Self::Pass => Self::Fail,
            Self::Fail => Self::Pass,
            Self::Deferred => Self::Deferred,
        }
    }
}

impl fmt::Display for ExpressionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => write!(f, "PASS"),
            Self::Fail => write!(f, "FAIL"),
            Self::Deferred => write!(f, "DEFERRED"),
        }
    }
}

/// Which classes of checks an evaluation pass may invoke. Checks excluded
/// by the mode evaluate to `Deferred` without being run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvaluationMode {
    /// Pre-flight pass: user checks only, no resource bound yet.
    UserChecksOnly,
    /// The in-request pass: everything except commit checks.
    InlineChecksOnly,
    /// The commit-phase pass: every check class runs.
    AllChecks,
}

/// The permission, resource and optional field an expression decides on.
/// Carried for diagnostics and denial messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionCondition {
    pub permission: PermissionKind,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub field: Option<String>,
}

impl PermissionCondition {
    pub fn any_field(
        permission: PermissionKind,
        resource_type: impl Into<String>,
        resource_id: Option<String>,
    ) -> Self {
        Self {
            permission,
            resource_type: resource_type.into(),
            resource_id,
            field: None,
        }
    }

    pub fn specific_field(
        permission: PermissionKind,
        resource_type: impl Into<String>,
        resource_id: Option<String>,
        field: impl Into<String>,
    ) -> Self {
        Self {
            permission,
            resource_type: resource_type.into(),
            resource_id,
            field: Some(field.into()),
        }
    }
}

impl fmt::Display for PermissionCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} permission for ", self.permission)?;
        match &self.field {
            Some(field) => write!(f, "field '{field}' on ")?,
            None => write!(f, "any field on ")?,
        }
        match &self.resource_id {
            Some(id) => write!(f, "{}#{id}", self.resource_type),
            None => write!(f, "{}", self.resource_type),
        }
    }
}

/// A leaf expression: one check bound to its evaluation context.
#[derive(Debug, Clone)]
pub struct CheckExpression {
    check: CheckInstance,
    resource: Option<Arc<Resource>>,
    ctx: Arc<RequestContext>,
    change: Option<Arc<ChangeDescriptor>>,
}

impl CheckExpression {
    fn evaluate(
        &self,
        mode: EvaluationMode,
        cache: &mut ExpressionResultCache,
    ) -> DomainResult<ExpressionResult> {
        if !self.check.runs_in(mode) {
            return Ok(ExpressionResult::Deferred);
        }
        let key = CacheKey::new(
            self.check.identifier(),
            self.resource.as_deref(),
            self.change.as_deref(),
        );
        if let Some(result) = cache.get(&key) {
            return Ok(result);
        }
        let verdict = self
            .check
            .evaluate(self.resource.as_deref(), &self.ctx, self.change.as_deref())?;
        let result = if verdict {
            ExpressionResult::Pass
        } else {
            ExpressionResult::Fail
        };
        cache.insert(key, result);
        Ok(result)
    }
}

/// Entity-level fallback wrapper for one field: the field's own expression
/// overrides the entity expression entirely when present.
#[derive(Debug, Clone)]
pub struct SpecificFieldExpression {
    condition: PermissionCondition,
    entity: Option<Arc<Expression>>,
    field: Option<Arc<Expression>>,
}

/// Tags the any-field disjunction with the condition that produced it.
#[derive(Debug, Clone)]
pub struct AnyFieldExpression {
    condition: PermissionCondition,
    expr: Arc<Expression>,
}

/// An immutable permission expression tree. Built per permission check by
/// the builder; evaluated against a request-scoped result cache.
#[derive(Debug, Clone)]
pub enum Expression {
    /// Constant PASS (`true`) or FAIL (`false`).
    Boolean(bool),
    Check(CheckExpression),
    And(Arc<Expression>, Arc<Expression>),
    Or(Arc<Expression>, Arc<Expression>),
    Not(Arc<Expression>),
    SpecificField(SpecificFieldExpression),
    AnyField(AnyFieldExpression),
}

impl Expression {
    pub fn pass() -> Self {
        Expression::Boolean(true)
    }

    pub fn fail() -> Self {
        Expression::Boolean(false)
    }

    pub fn check(
        check: CheckInstance,
        resource: Option<Arc<Resource>>,
        ctx: Arc<RequestContext>,
        change: Option<Arc<ChangeDescriptor>>,
    ) -> Self {
        Expression::Check(CheckExpression {
            check,
            resource,
            ctx,
            change,
        })
    }

    pub fn and(left: Expression, right: Expression) -> Self {
        Expression::And(Arc::new(left), Arc::new(right))
    }

    pub fn or(left: Expression, right: Expression) -> Self {
        Expression::Or(Arc::new(left), Arc::new(right))
    }

    pub fn not(inner: Expression) -> Self {
        Expression::Not(Arc::new(inner))
    }

    pub fn specific_field(
        condition: PermissionCondition,
        entity: Option<Expression>,
        field: Option<Expression>,
    ) -> Self {
        Expression::SpecificField(SpecificFieldExpression {
            condition,
            entity: entity.map(Arc::new),
            field: field.map(Arc::new),
        })
    }

    pub fn any_field(condition: PermissionCondition, expr: Expression) -> Self {
        Expression::AnyField(AnyFieldExpression {
            condition,
            expr: Arc::new(expr),
        })
    }

    /// The condition attached to a field wrapper, if this is one.
    pub fn condition(&self) -> Option<&PermissionCondition> {
        match self {
            Expression::SpecificField(e) => Some(&e.condition),
            Expression::AnyField(e) => Some(&e.condition),
            _ => None,
        }
    }

    /// Whether any commit check appears anywhere in the tree.
    pub fn has_commit_checks(&self) -> bool {
        match self {
            Expression::Boolean(_) => false,
            Expression::Check(leaf) => leaf.check.kind() == CheckKind::Commit,
            Expression::And(left, right) | Expression::Or(left, right) => {
                left.has_commit_checks() || right.has_commit_checks()
            }
            Expression::Not(inner) => inner.has_commit_checks(),
            Expression::SpecificField(e) => {
                e.entity.as_ref().is_some_and(|x| x.has_commit_checks())
                    || e.field.as_ref().is_some_and(|x| x.has_commit_checks())
            }
            Expression::AnyField(e) => e.expr.has_commit_checks(),
        }
    }

    /// Evaluates the tree under the given mode. Short-circuits: an AND
    /// stops at the first FAIL, an OR at the first PASS, and the skipped
    /// subtree's checks are never invoked.
    pub fn evaluate(
        &self,
        mode: EvaluationMode,
        cache: &mut ExpressionResultCache,
    ) -> DomainResult<ExpressionResult> {
        match self {
            Expression::Boolean(true) => Ok(ExpressionResult::Pass),
            Expression::Boolean(false) => Ok(ExpressionResult::Fail),
            Expression::Check(leaf) => leaf.evaluate(mode, cache),
            Expression::And(left, right) => {
                let lhs = left.evaluate(mode, cache)?;
                if lhs == ExpressionResult::Fail {
                    return Ok(ExpressionResult::Fail);
                }
                Ok(lhs.and(right.evaluate(mode, cache)?))
            }
            Expression::Or(left, right) => {
                let lhs = left.evaluate(mode, cache)?;
                if lhs == ExpressionResult::Pass {
                    return Ok(ExpressionResult::Pass);
                }
                Ok(lhs.or(right.evaluate(mode, cache)?))
            }
            Expression::Not(inner) => Ok(inner.evaluate(mode, cache)?.not()),
            Expression::SpecificField(e) => match (&e.field, &e.entity) {
                (Some(field), _) => field.evaluate(mode, cache),
                (None, Some(entity)) => entity.evaluate(mode, cache),
                // a field with no expression at either level is open
                (None, None) => Ok(ExpressionResult::Pass),
            },
            Expression::AnyField(e) => e.expr.evaluate(mode, cache),
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Boolean(true) => write!(f, "SUCCESS"),
            Expression::Boolean(false) => write!(f, "FAILURE"),
            Expression::Check(leaf) => write!(f, "{}", leaf.check.identifier()),
            Expression::And(left, right) => write!(f, "({left} AND {right})"),
            Expression::Or(left, right) => write!(f, "({left} OR {right})"),
            Expression::Not(inner) => write!(f, "NOT ({inner})"),
            Expression::SpecificField(e) => {
                write!(f, "{} [", e.condition)?;
                match (&e.field, &e.entity) {
                    (Some(field), _) => write!(f, "{field}")?,
                    (None, Some(entity)) => write!(f, "{entity}")?,
                    (None, None) => write!(f, "SUCCESS")?,
                }
                write!(f, "]")
            }
            Expression::AnyField(e) => write!(f, "{} [{}]", e.condition, e.expr),
        }
    }
}
