//! Compiles declared permission expressions into evaluable trees.
//!
//! The builder resolves expression strings from the dictionary, binds the
//! evaluation context (resource, request context, change descriptor) into
//! the check leaves and assembles the field wrappers. It returns both the
//! granular entity/field pieces the strategy scan walks and a composite
//! expression used for pre-flight evaluation and commit re-evaluation.

use std::collections::HashSet;
use std::sync::Arc;

use crate::check::{ChangeDescriptor, CheckInstance, RequestContext, Resource};
use crate::dictionary::{MetadataDictionary, PermissionKind};
use crate::error::DomainResult;
use crate::expression::parser::{parse_permission_expression, PermissionAst};
use crate::expression::{Expression, PermissionCondition};
use crate::strategy::CheckMode;

type LeafFn<'a> = &'a dyn Fn(CheckInstance) -> Expression;

/// One field's resolved expression together with its combination mode.
#[derive(Debug, Clone)]
pub struct FieldExpression {
    pub field: String,
    pub mode: CheckMode,
    pub expr: Expression,
}

/// Everything one permission scan needs: the granular entity- and
/// field-level pieces plus the composite used for pre-flight and commit
/// evaluation.
#[derive(Debug, Clone)]
pub struct FieldAwareExpressions {
    pub condition: PermissionCondition,
    pub entity: Option<(CheckMode, Expression)>,
    pub fields: Vec<FieldExpression>,
    pub composite: Expression,
}

impl FieldAwareExpressions {
    /// No expressions are bound for this permission: it is open.
    fn open(condition: PermissionCondition) -> Self {
        Self {
            condition,
            entity: None,
            fields: Vec::new(),
            composite: Expression::pass(),
        }
    }
}

/// Builds expression trees for permission checks against one dictionary.
#[derive(Debug, Clone)]
pub struct PermissionExpressionBuilder {
    dictionary: Arc<MetadataDictionary>,
}

impl PermissionExpressionBuilder {
    pub fn new(dictionary: Arc<MetadataDictionary>) -> Self {
        Self { dictionary }
    }

    pub fn dictionary(&self) -> &Arc<MetadataDictionary> {
        &self.dictionary
    }

    /// Any-field expressions for one resource: the entity expression OR'd
    /// across the exposed fields, with per-field overrides.
    pub fn build_any_field_expressions(
        &self,
        resource: &Arc<Resource>,
        kind: PermissionKind,
        requested_fields: Option<&HashSet<String>>,
        change: Option<Arc<ChangeDescriptor>>,
        ctx: &Arc<RequestContext>,
    ) -> DomainResult<FieldAwareExpressions> {
        let condition = PermissionCondition::any_field(
            kind,
            resource.type_name(),
            Some(resource.id().to_string()),
        );
        let resource = resource.clone();
        let ctx = ctx.clone();
        let leaf = move |check: CheckInstance| {
            Expression::check(check, Some(resource.clone()), ctx.clone(), change.clone())
        };
        self.build_any_field(condition, requested_fields, &leaf)
    }

    /// The entity-level fallback wrapper for one field of one resource.
    pub fn build_specific_field_expressions(
        &self,
        resource: &Arc<Resource>,
        kind: PermissionKind,
        field: &str,
        change: Option<Arc<ChangeDescriptor>>,
        ctx: &Arc<RequestContext>,
    ) -> DomainResult<FieldAwareExpressions> {
        let condition = PermissionCondition::specific_field(
            kind,
            resource.type_name(),
            Some(resource.id().to_string()),
            field,
        );
        let bound = resource.clone();
        let ctx = ctx.clone();
        let leaf = move |check: CheckInstance| {
            Expression::check(check, Some(bound.clone()), ctx.clone(), change.clone())
        };
        self.build_specific_field(condition, resource.type_name(), kind, field, &leaf)
    }

    /// Resource-less any-field expression for the user-checks-only
    /// pre-flight pass.
    pub fn build_user_check_any_expression(
        &self,
        resource_type: &str,
        kind: PermissionKind,
        requested_fields: Option<&HashSet<String>>,
        ctx: &Arc<RequestContext>,
    ) -> DomainResult<Expression> {
        let condition = PermissionCondition::any_field(kind, resource_type, None);
        let ctx = ctx.clone();
        let leaf = move |check: CheckInstance| Expression::check(check, None, ctx.clone(), None);
        Ok(self
            .build_any_field_for(condition, resource_type, kind, requested_fields, &leaf)?
            .composite)
    }

    /// Resource-less specific-field expression for the pre-flight pass.
    pub fn build_user_check_field_expression(
        &self,
        resource_type: &str,
        kind: PermissionKind,
        field: &str,
        ctx: &Arc<RequestContext>,
    ) -> DomainResult<Expression> {
        let condition = PermissionCondition::specific_field(kind, resource_type, None, field);
        let ctx = ctx.clone();
        let leaf = move |check: CheckInstance| Expression::check(check, None, ctx.clone(), None);
        Ok(self
            .build_specific_field(condition, resource_type, kind, field, &leaf)?
            .composite)
    }

    fn build_any_field(
        &self,
        condition: PermissionCondition,
        requested_fields: Option<&HashSet<String>>,
        leaf: LeafFn<'_>,
    ) -> DomainResult<FieldAwareExpressions> {
        let resource_type = condition.resource_type.clone();
        let kind = condition.permission;
        self.build_any_field_for(condition, &resource_type, kind, requested_fields, leaf)
    }

    fn build_any_field_for(
        &self,
        condition: PermissionCondition,
        resource_type: &str,
        kind: PermissionKind,
        requested_fields: Option<&HashSet<String>>,
        leaf: LeafFn<'_>,
    ) -> DomainResult<FieldAwareExpressions> {
        if !self.dictionary.entity_has_checks(resource_type, kind) {
            return Ok(FieldAwareExpressions::open(condition));
        }

        let entity = self
            .dictionary
            .expression_for_entity(resource_type, kind)
            .map(|raw| self.resolve(raw, leaf))
            .transpose()?;

        let mut fields = Vec::new();
        let mut branches: Vec<Expression> = Vec::new();
        if let Some((_, entity_expr)) = &entity {
            branches.push(entity_expr.clone());
        }

        for field in self.dictionary.exposed_fields(resource_type) {
            if let Some(requested) = requested_fields {
                if !requested.contains(field) {
                    continue;
                }
            }
            match self.dictionary.expression_for_field(resource_type, field, kind) {
                Some(raw) => {
                    let (mode, expr) = self.resolve(raw, leaf)?;
                    branches.push(expr.clone());
                    fields.push(FieldExpression {
                        field: field.clone(),
                        mode,
                        expr,
                    });
                }
                // An expression-less field inherits the entity expression,
                // already a branch. With no entity expression either, the
                // field is unconditionally accessible and the whole
                // disjunction collapses to PASS.
                None => {
                    if entity.is_none() {
                        return Ok(FieldAwareExpressions::open(condition));
                    }
                }
            }
        }

        let Some(disjunction) = branches.into_iter().reduce(Expression::or) else {
            // every expression-bearing field was filtered out
            return Ok(FieldAwareExpressions::open(condition));
        };

        Ok(FieldAwareExpressions {
            composite: Expression::any_field(condition.clone(), disjunction),
            condition,
            entity,
            fields,
        })
    }

    fn build_specific_field(
        &self,
        condition: PermissionCondition,
        resource_type: &str,
        kind: PermissionKind,
        field: &str,
        leaf: LeafFn<'_>,
    ) -> DomainResult<FieldAwareExpressions> {
        if !self.dictionary.entity_has_checks(resource_type, kind) {
            return Ok(FieldAwareExpressions::open(condition));
        }

        let entity = self
            .dictionary
            .expression_for_entity(resource_type, kind)
            .map(|raw| self.resolve(raw, leaf))
            .transpose()?;
        let field_expr = self
            .dictionary
            .expression_for_field(resource_type, field, kind)
            .map(|raw| self.resolve(raw, leaf))
            .transpose()?;

        let fields = field_expr
            .clone()
            .map(|(mode, expr)| {
                vec![FieldExpression {
                    field: field.to_string(),
                    mode,
                    expr,
                }]
            })
            .unwrap_or_default();

        let composite = Expression::specific_field(
            condition.clone(),
            entity.clone().map(|(_, expr)| expr),
            field_expr.map(|(_, expr)| expr),
        );

        Ok(FieldAwareExpressions {
            condition,
            entity,
            fields,
            composite,
        })
    }

    /// Parses an expression string and replaces every named check with a
    /// bound leaf. Unknown names are fatal here, at build time.
    fn resolve(&self, raw: &str, leaf: LeafFn<'_>) -> DomainResult<(CheckMode, Expression)> {
        let ast = parse_permission_expression(raw)?;
        let mode = ast.check_mode();
        let expr = self.resolve_ast(&ast, leaf)?;
        Ok((mode, expr))
    }

    fn resolve_ast(&self, ast: &PermissionAst, leaf: LeafFn<'_>) -> DomainResult<Expression> {
        Ok(match ast {
            PermissionAst::Check(name) => leaf(self.dictionary.resolve_check(name)?),
            PermissionAst::Not(inner) => Expression::not(self.resolve_ast(inner, leaf)?),
            PermissionAst::And(left, right) => Expression::and(
                self.resolve_ast(left, leaf)?,
                self.resolve_ast(right, leaf)?,
            ),
            PermissionAst::Or(left, right) => Expression::or(
                self.resolve_ast(left, leaf)?,
                self.resolve_ast(right, leaf)?,
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::{User, UserCheck};
    use crate::error::DomainError;
    use crate::expression::{EvaluationMode, ExpressionResult, ExpressionResultCache};

    struct Fixed(bool);

    impl UserCheck for Fixed {
        fn ok(&self, _user: &User) -> anyhow::Result<bool> {
            Ok(self.0)
        }
    }

    fn dictionary() -> MetadataDictionary {
        let mut dict = MetadataDictionary::new();
        dict.register_shared_check(CheckInstance::user("always true", Arc::new(Fixed(true))));
        dict.register_shared_check(CheckInstance::user("always false", Arc::new(Fixed(false))));
        dict
    }

    fn builder(dict: MetadataDictionary) -> PermissionExpressionBuilder {
        PermissionExpressionBuilder::new(Arc::new(dict))
    }

    fn ctx() -> Arc<RequestContext> {
        Arc::new(RequestContext::new(User::new("alice")))
    }

    fn resource() -> Arc<Resource> {
        Arc::new(Resource::new("article", "1"))
    }

    fn evaluate(expr: &Expression) -> ExpressionResult {
        let mut cache = ExpressionResultCache::new();
        expr.evaluate(EvaluationMode::AllChecks, &mut cache).unwrap()
    }

    #[test]
    fn test_no_bound_expressions_is_open() {
        let built = builder(dictionary())
            .build_any_field_expressions(&resource(), PermissionKind::Read, None, None, &ctx())
            .unwrap();

        assert!(built.entity.is_none());
        assert!(built.fields.is_empty());
        assert_eq!(evaluate(&built.composite), ExpressionResult::Pass);
    }

    #[test]
    fn test_unknown_check_name_fails_at_build_time() {
        let mut dict = dictionary();
        dict.bind_entity_permission("article", PermissionKind::Read, "no such check");

        let result = builder(dict).build_any_field_expressions(
            &resource(),
            PermissionKind::Read,
            None,
            None,
            &ctx(),
        );
        assert!(matches!(
            result,
            Err(DomainError::MissingCheck { name }) if name == "no such check"
        ));
    }

    #[test]
    fn test_any_field_ors_entity_and_field_expressions() {
        let mut dict = dictionary();
        dict.bind_entity_permission("article", PermissionKind::Update, "always false");
        dict.bind_field_permission("article", "title", PermissionKind::Update, "always true");

        let built = builder(dict)
            .build_any_field_expressions(&resource(), PermissionKind::Update, None, None, &ctx())
            .unwrap();

        assert!(built.entity.is_some());
        assert_eq!(built.fields.len(), 1);
        assert_eq!(built.fields[0].field, "title");
        // entity fails but the field branch grants
        assert_eq!(evaluate(&built.composite), ExpressionResult::Pass);
    }

    #[test]
    fn test_expression_less_field_without_entity_collapses_to_pass() {
        let mut dict = dictionary();
        dict.bind_field_permission("article", "title", PermissionKind::Update, "always false");
        dict.expose_field("article", "views");

        let built = builder(dict)
            .build_any_field_expressions(&resource(), PermissionKind::Update, None, None, &ctx())
            .unwrap();

        assert_eq!(evaluate(&built.composite), ExpressionResult::Pass);
    }

    #[test]
    fn test_requested_fields_narrow_the_disjunction() {
        let mut dict = dictionary();
        dict.bind_field_permission("article", "title", PermissionKind::Update, "always false");
        dict.bind_field_permission("article", "body", PermissionKind::Update, "always true");

        let only_title: HashSet<String> = ["title".to_string()].into();
        let built = builder(dict)
            .build_any_field_expressions(
                &resource(),
                PermissionKind::Update,
                Some(&only_title),
                None,
                &ctx(),
            )
            .unwrap();

        assert_eq!(built.fields.len(), 1);
        assert_eq!(evaluate(&built.composite), ExpressionResult::Fail);
    }

    #[test]
    fn test_check_mode_reflects_each_expression_root() {
        let mut dict = dictionary();
        dict.bind_entity_permission("article", PermissionKind::Update, "always true AND always true");
        dict.bind_field_permission(
            "article",
            "title",
            PermissionKind::Update,
            "always true OR always false",
        );

        let built = builder(dict)
            .build_any_field_expressions(&resource(), PermissionKind::Update, None, None, &ctx())
            .unwrap();

        assert_eq!(built.entity.as_ref().unwrap().0, CheckMode::All);
        assert_eq!(built.fields[0].mode, CheckMode::Any);
    }

    #[test]
    fn test_specific_field_wrapper_prefers_the_field_expression() {
        let mut dict = dictionary();
        dict.bind_entity_permission("article", PermissionKind::Update, "always false");
        dict.bind_field_permission("article", "title", PermissionKind::Update, "always true");

        let b = builder(dict);
        let with_override = b
            .build_specific_field_expressions(&resource(), PermissionKind::Update, "title", None, &ctx())
            .unwrap();
        assert_eq!(evaluate(&with_override.composite), ExpressionResult::Pass);

        let fallback = b
            .build_specific_field_expressions(&resource(), PermissionKind::Update, "body", None, &ctx())
            .unwrap();
        assert!(fallback.fields.is_empty());
        assert_eq!(evaluate(&fallback.composite), ExpressionResult::Fail);
    }

    #[test]
    fn test_user_check_expression_has_no_bound_resource() {
        let mut dict = dictionary();
        dict.bind_entity_permission("article", PermissionKind::Read, "always true");

        let expr = builder(dict)
            .build_user_check_any_expression("article", PermissionKind::Read, None, &ctx())
            .unwrap();

        let mut cache = ExpressionResultCache::new();
        assert_eq!(
            expr.evaluate(EvaluationMode::UserChecksOnly, &mut cache).unwrap(),
            ExpressionResult::Pass
        );
    }
}
