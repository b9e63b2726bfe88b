//! Request-scoped permission executor.
//!
//! One executor per request. It owns the expression result cache, the
//! commit-check queue, a fast-path cache for user-checks-only verdicts and
//! trace-level evaluation statistics. Checks run in up to three passes:
//! a resource-less user pre-flight, the inline strategy scan, and the
//! commit-phase drain of deferred expressions.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, trace, Level};

use crate::builder::{FieldAwareExpressions, PermissionExpressionBuilder};
use crate::check::{ChangeDescriptor, RequestContext, Resource};
use crate::dictionary::{MetadataDictionary, PermissionKind};
use crate::error::{DomainError, DomainResult};
use crate::expression::{
    EvaluationMode, Expression, ExpressionResult, ExpressionResultCache, PermissionCondition,
};
use crate::strategy::{CheckMode, ScanOutcome, Strategy};

/// A deferred expression waiting for the commit-phase signal.
#[derive(Debug, Clone)]
struct QueuedCheck {
    expression: Expression,
    condition: PermissionCondition,
}

/// Key for the user-checks-only fast path: permission class, resource
/// type and the requested field set.
type UserCheckKey = (PermissionKind, String, Option<BTreeSet<String>>);

/// Evaluates permission checks for one request.
pub struct PermissionExecutor {
    builder: PermissionExpressionBuilder,
    ctx: Arc<RequestContext>,
    cache: ExpressionResultCache,
    commit_check_queue: Vec<QueuedCheck>,
    user_permission_results: HashMap<UserCheckKey, ExpressionResult>,
    check_stats: HashMap<String, u64>,
}

impl PermissionExecutor {
    pub fn new(dictionary: Arc<MetadataDictionary>, ctx: RequestContext) -> Self {
        Self {
            builder: PermissionExpressionBuilder::new(dictionary),
            ctx: Arc::new(ctx),
            cache: ExpressionResultCache::new(),
            commit_check_queue: Vec::new(),
            user_permission_results: HashMap::new(),
            check_stats: HashMap::new(),
        }
    }

    pub fn context(&self) -> &RequestContext {
        &self.ctx
    }

    /// Number of expressions currently waiting for the commit phase.
    pub fn pending_commit_checks(&self) -> usize {
        self.commit_check_queue.len()
    }

    /// Any-field permission check for one resource: may the requester
    /// touch the resource through at least one exposed field.
    ///
    /// Runs the user-checks-only pre-flight first; a PASS there settles
    /// the verdict for every resource of this type and field set without
    /// loading resource state.
    pub fn check_permission(
        &mut self,
        kind: PermissionKind,
        resource: &Arc<Resource>,
        requested_fields: Option<&HashSet<String>>,
    ) -> DomainResult<ExpressionResult> {
        let key = user_check_key(kind, resource.type_name(), requested_fields);
        if let Some(ExpressionResult::Pass) = self.user_permission_results.get(&key) {
            return Ok(ExpressionResult::Pass);
        }

        let expressions = self.builder.build_any_field_expressions(
            resource,
            kind,
            requested_fields,
            None,
            &self.ctx,
        )?;

        // a cached non-PASS verdict skips the pre-flight and goes straight
        // to the inline scan
        if !self.user_permission_results.contains_key(&key) {
            if let Some(result) = self.preflight(key, &expressions)? {
                return Ok(result);
            }
        }

        self.execute_field_aware(expressions, Strategy::AnyField, kind)
    }

    /// Single-field permission check, with the entity expression as the
    /// fallback when the field declares none of its own.
    pub fn check_specific_field_permissions(
        &mut self,
        resource: &Arc<Resource>,
        change: Option<ChangeDescriptor>,
        kind: PermissionKind,
        field: &str,
    ) -> DomainResult<ExpressionResult> {
        let key = (
            kind,
            resource.type_name().to_string(),
            Some(BTreeSet::from([field.to_string()])),
        );
        if let Some(ExpressionResult::Pass) = self.user_permission_results.get(&key) {
            return Ok(ExpressionResult::Pass);
        }

        let expressions = self.builder.build_specific_field_expressions(
            resource,
            kind,
            field,
            change.map(Arc::new),
            &self.ctx,
        )?;

        if !self.user_permission_results.contains_key(&key) {
            if let Some(result) = self.preflight(key, &expressions)? {
                return Ok(result);
            }
        }

        self.execute_field_aware(expressions, Strategy::SpecificField, kind)
    }

    /// Strictly the user checks for a resource type, without any resource
    /// bound and without queueing commit checks. Used to reject requests
    /// before touching the data store.
    pub fn check_user_permissions(
        &mut self,
        resource_type: &str,
        kind: PermissionKind,
        requested_fields: Option<&HashSet<String>>,
    ) -> DomainResult<ExpressionResult> {
        let key = user_check_key(kind, resource_type, requested_fields);
        if let Some(ExpressionResult::Pass) = self.user_permission_results.get(&key) {
            return Ok(ExpressionResult::Pass);
        }

        let expression = self.builder.build_user_check_any_expression(
            resource_type,
            kind,
            requested_fields,
            &self.ctx,
        )?;
        let result = expression.evaluate(EvaluationMode::UserChecksOnly, &mut self.cache)?;
        self.record_stat(&expression);
        self.user_permission_results.insert(key, result);

        if result == ExpressionResult::Fail {
            let condition = PermissionCondition::any_field(kind, resource_type, None);
            debug!(%condition, "user checks denied access");
            return Err(DomainError::Forbidden { condition });
        }
        Ok(result)
    }

    /// Commit-phase signal: drains the queue and re-evaluates every
    /// deferred expression with all check classes runnable.
    pub fn execute_commit_checks(&mut self) -> DomainResult<()> {
        let queued = std::mem::take(&mut self.commit_check_queue);
        for check in queued {
            let result = check
                .expression
                .evaluate(EvaluationMode::AllChecks, &mut self.cache)?;
            self.record_stat(&check.expression);
            match result {
                ExpressionResult::Pass => {}
                ExpressionResult::Fail => {
                    debug!(condition = %check.condition, "commit check denied access");
                    return Err(DomainError::Forbidden {
                        condition: check.condition,
                    });
                }
                // every check class is runnable under AllChecks, so a
                // surviving deferral means broken expression wiring
                ExpressionResult::Deferred => {
                    return Err(DomainError::UnresolvedDeferred {
                        condition: check.condition,
                    });
                }
            }
        }
        Ok(())
    }

    /// Logs how often each expression was evaluated, cheapest first.
    pub fn log_check_stats(&self) {
        if self.check_stats.is_empty() {
            return;
        }
        let mut entries: Vec<_> = self.check_stats.iter().collect();
        entries.sort_by(|a, b| a.1.cmp(b.1).then_with(|| a.0.cmp(b.0)));
        for (expression, count) in entries {
            trace!(%expression, count, "permission check statistics");
        }
    }

    /// The user-checks-only pass over the composite expression. `Some`
    /// means the verdict is settled; `None` falls through to the inline
    /// scan.
    fn preflight(
        &mut self,
        key: UserCheckKey,
        expressions: &FieldAwareExpressions,
    ) -> DomainResult<Option<ExpressionResult>> {
        let result = expressions
            .composite
            .evaluate(EvaluationMode::UserChecksOnly, &mut self.cache)?;
        self.record_stat(&expressions.composite);
        self.user_permission_results.insert(key, result);
        match result {
            ExpressionResult::Pass => Ok(Some(ExpressionResult::Pass)),
            ExpressionResult::Fail => {
                debug!(condition = %expressions.condition, "user checks denied access");
                Err(DomainError::Forbidden {
                    condition: expressions.condition.clone(),
                })
            }
            ExpressionResult::Deferred => Ok(None),
        }
    }

    /// The strategy-driven scan: entity expression first, then each
    /// field expression, consulting the strategy after every step.
    fn execute_field_aware(
        &mut self,
        expressions: FieldAwareExpressions,
        strategy: Strategy,
        kind: PermissionKind,
    ) -> DomainResult<ExpressionResult> {
        let FieldAwareExpressions {
            condition,
            entity,
            fields,
            composite,
        } = expressions;

        let mut outcome = ScanOutcome {
            // entity checks count as passing until one fails; with no
            // checks anywhere the permission is open
            has_passing_check: entity.is_some() || fields.is_empty(),
            has_deferred_check: false,
            has_field_checks: !fields.is_empty(),
            entity_failed: false,
        };

        if let Some((entity_mode, entity_expr)) = &entity {
            let result = entity_expr.evaluate(EvaluationMode::InlineChecksOnly, &mut self.cache)?;
            self.record_stat(entity_expr);
            match result {
                ExpressionResult::Pass => {
                    if !strategy.continue_on_entity_success(*entity_mode) {
                        return Ok(ExpressionResult::Pass);
                    }
                }
                ExpressionResult::Fail => {
                    outcome.has_passing_check = false;
                    outcome.entity_failed = true;
                }
                ExpressionResult::Deferred => {
                    outcome.has_deferred_check = true;
                }
            }
        }

        for field in &fields {
            let result = field
                .expr
                .evaluate(EvaluationMode::InlineChecksOnly, &mut self.cache)?;
            self.record_stat(&field.expr);
            match result {
                ExpressionResult::Pass => {
                    if field.mode == CheckMode::Any {
                        return Ok(ExpressionResult::Pass);
                    }
                    outcome.has_passing_check = true;
                }
                ExpressionResult::Fail => {
                    if !strategy
                        .continue_on_field_failure(field.mode, outcome.has_deferred_check)
                    {
                        debug!(condition = %condition, field = %field.field, "field-level check denied access");
                        return Err(DomainError::Forbidden { condition });
                    }
                }
                ExpressionResult::Deferred => {
                    outcome.has_deferred_check = true;
                }
            }
        }

        if !strategy.finalize(&outcome) {
            debug!(condition = %condition, "permission denied");
            return Err(DomainError::Forbidden { condition });
        }

        if outcome.has_deferred_check {
            return self.resolve_deferred(composite, condition, kind);
        }
        Ok(ExpressionResult::Pass)
    }

    /// Deferred scans either queue for the commit phase or, for
    /// inline-only permissions, force an immediate full evaluation.
    fn resolve_deferred(
        &mut self,
        expression: Expression,
        condition: PermissionCondition,
        kind: PermissionKind,
    ) -> DomainResult<ExpressionResult> {
        if kind.is_inline_only() {
            let result = expression.evaluate(EvaluationMode::AllChecks, &mut self.cache)?;
            self.record_stat(&expression);
            if result == ExpressionResult::Fail {
                debug!(%condition, "forced commit-check evaluation denied access");
                return Err(DomainError::Forbidden { condition });
            }
            return Ok(result);
        }

        trace!(%condition, "queueing deferred checks for commit");
        self.commit_check_queue.push(QueuedCheck {
            expression,
            condition,
        });
        Ok(ExpressionResult::Deferred)
    }

    fn record_stat(&mut self, expression: &Expression) {
        if tracing::enabled!(Level::TRACE) {
            *self.check_stats.entry(expression.to_string()).or_default() += 1;
        }
    }
}

fn user_check_key(
    kind: PermissionKind,
    resource_type: &str,
    requested_fields: Option<&HashSet<String>>,
) -> UserCheckKey {
    (
        kind,
        resource_type.to_string(),
        requested_fields.map(|fields| fields.iter().cloned().collect()),
    )
}
