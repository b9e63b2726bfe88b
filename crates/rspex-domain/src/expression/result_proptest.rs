//! Property-based tests for result combinators and the expression grammar.

use proptest::prelude::*;

use super::parser::{parse_permission_expression, PermissionAst};
use super::ExpressionResult;

fn result_strategy() -> impl Strategy<Value = ExpressionResult> {
    prop_oneof![
        Just(ExpressionResult::Pass),
        Just(ExpressionResult::Fail),
        Just(ExpressionResult::Deferred),
    ]
}

fn ast_strategy() -> impl Strategy<Value = PermissionAst> {
    let word = "[a-z][a-z0-9_]{0,7}"
        .prop_filter("operator keywords are reserved", |w: &String| {
            !["and", "or", "not"].contains(&w.as_str())
        });
    let name = prop::collection::vec(word, 1..4).prop_map(|words| words.join(" "));
    let leaf = name.prop_map(PermissionAst::Check);
    leaf.prop_recursive(4, 32, 2, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone())
                .prop_map(|(l, r)| PermissionAst::And(Box::new(l), Box::new(r))),
            (inner.clone(), inner.clone())
                .prop_map(|(l, r)| PermissionAst::Or(Box::new(l), Box::new(r))),
            inner.prop_map(|e| PermissionAst::Not(Box::new(e))),
        ]
    })
}

proptest! {
    #[test]
    fn prop_and_is_commutative_and_associative(
        a in result_strategy(),
        b in result_strategy(),
        c in result_strategy(),
    ) {
        prop_assert_eq!(a.and(b), b.and(a));
        prop_assert_eq!(a.and(b).and(c), a.and(b.and(c)));
    }

    #[test]
    fn prop_or_is_commutative_and_associative(
        a in result_strategy(),
        b in result_strategy(),
        c in result_strategy(),
    ) {
        prop_assert_eq!(a.or(b), b.or(a));
        prop_assert_eq!(a.or(b).or(c), a.or(b.or(c)));
    }

    #[test]
    fn prop_identities_and_dominators(a in result_strategy()) {
        prop_assert_eq!(ExpressionResult::Pass.and(a), a);
        prop_assert_eq!(ExpressionResult::Fail.or(a), a);
        prop_assert_eq!(ExpressionResult::Fail.and(a), ExpressionResult::Fail);
        prop_assert_eq!(ExpressionResult::Pass.or(a), ExpressionResult::Pass);
    }

    #[test]
    fn prop_de_morgan_holds_with_deferred(
        a in result_strategy(),
        b in result_strategy(),
    ) {
        prop_assert_eq!(a.and(b).not(), a.not().or(b.not()));
        prop_assert_eq!(a.or(b).not(), a.not().and(b.not()));
    }

    #[test]
    fn prop_double_negation_is_identity(a in result_strategy()) {
        prop_assert_eq!(a.not().not(), a);
    }

    #[test]
    fn prop_rendered_ast_reparses_identically(ast in ast_strategy()) {
        let rendered = ast.to_string();
        let reparsed = parse_permission_expression(&rendered)
            .expect("rendered expressions always parse");
        prop_assert_eq!(reparsed, ast);
    }
}
