//! Parser for boolean permission expressions.
//!
//! Grammar (AND binds tighter than OR, both left-associative):
//!
//! ```text
//! expression := or_level
//! or_level   := and_level ( OR and_level )*
//! and_level  := unary ( AND unary )*
//! unary      := NOT unary | '(' expression ')' | check-name
//! check-name := word ( word )*          e.g. "user has all access"
//! ```
//!
//! The operator keywords are case-insensitive and reserved: they cannot
//! appear as words inside a check name.

use std::fmt;

use nom::{
    branch::alt,
    bytes::complete::take_while1,
    character::complete::{char, multispace0, multispace1},
    combinator::{all_consuming, map, verify},
    multi::{many0, separated_list1},
    sequence::{delimited, preceded, tuple},
    IResult,
};

use crate::error::{DomainError, DomainResult};
use crate::strategy::CheckMode;

/// Reserved operator keywords, matched case-insensitively.
const RESERVED_KEYWORDS: &[&str] = &["and", "or", "not"];

fn is_reserved(word: &str) -> bool {
    RESERVED_KEYWORDS
        .iter()
        .any(|kw| word.eq_ignore_ascii_case(kw))
}

/// Parsed form of a permission expression string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionAst {
    Check(String),
    Not(Box<PermissionAst>),
    And(Box<PermissionAst>, Box<PermissionAst>),
    Or(Box<PermissionAst>, Box<PermissionAst>),
}

impl PermissionAst {
    /// Combination mode implied by the root operator: a top-level OR means
    /// any single branch may grant access, everything else demands all.
    pub fn check_mode(&self) -> CheckMode {
        match self {
            PermissionAst::Or(_, _) => CheckMode::Any,
            _ => CheckMode::All,
        }
    }

    /// Collects every check name referenced by the expression.
    pub fn check_names<'a>(&'a self, names: &mut Vec<&'a str>) {
        match self {
            PermissionAst::Check(name) => names.push(name),
            PermissionAst::Not(inner) => inner.check_names(names),
            PermissionAst::And(left, right) | PermissionAst::Or(left, right) => {
                left.check_names(names);
                right.check_names(names);
            }
        }
    }
}

impl fmt::Display for PermissionAst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PermissionAst::Check(name) => write!(f, "{name}"),
            PermissionAst::Not(inner) => write!(f, "NOT ({inner})"),
            PermissionAst::And(left, right) => write!(f, "({left} AND {right})"),
            PermissionAst::Or(left, right) => write!(f, "({left} OR {right})"),
        }
    }
}

fn bare_word(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || c == '_')(input)
}

/// A single word of a check name; operator keywords are rejected.
fn name_word(input: &str) -> IResult<&str, &str> {
    verify(bare_word, |word: &str| !is_reserved(word))(input)
}

/// A specific operator keyword, matched as a whole word so that check
/// names like "nothing" or "order" never shadow an operator.
fn keyword(kw: &'static str) -> impl Fn(&str) -> IResult<&str, &str> {
    move |input| verify(bare_word, |word: &str| word.eq_ignore_ascii_case(kw))(input)
}

fn check_name(input: &str) -> IResult<&str, PermissionAst> {
    map(separated_list1(multispace1, name_word), |words| {
        PermissionAst::Check(words.join(" "))
    })(input)
}

fn parens(input: &str) -> IResult<&str, PermissionAst> {
    delimited(
        tuple((char('('), multispace0)),
        expression,
        tuple((multispace0, char(')'))),
    )(input)
}

fn primary(input: &str) -> IResult<&str, PermissionAst> {
    alt((parens, check_name))(input)
}

fn unary(input: &str) -> IResult<&str, PermissionAst> {
    alt((
        map(
            preceded(tuple((keyword("not"), multispace0)), unary),
            |inner| PermissionAst::Not(Box::new(inner)),
        ),
        primary,
    ))(input)
}

fn and_level(input: &str) -> IResult<&str, PermissionAst> {
    let (input, first) = unary(input)?;
    let (input, rest) = many0(preceded(
        tuple((multispace0, keyword("and"), multispace0)),
        unary,
    ))(input)?;
    Ok((input, fold_binary(first, rest, PermissionAst::And)))
}

fn or_level(input: &str) -> IResult<&str, PermissionAst> {
    let (input, first) = and_level(input)?;
    let (input, rest) = many0(preceded(
        tuple((multispace0, keyword("or"), multispace0)),
        and_level,
    ))(input)?;
    Ok((input, fold_binary(first, rest, PermissionAst::Or)))
}

fn expression(input: &str) -> IResult<&str, PermissionAst> {
    or_level(input)
}

fn fold_binary(
    first: PermissionAst,
    rest: Vec<PermissionAst>,
    combine: fn(Box<PermissionAst>, Box<PermissionAst>) -> PermissionAst,
) -> PermissionAst {
    rest.into_iter()
        .fold(first, |acc, rhs| combine(Box::new(acc), Box::new(rhs)))
}

/// Parses a complete permission expression string.
pub fn parse_permission_expression(input: &str) -> DomainResult<PermissionAst> {
    let (_, ast) = all_consuming(delimited(multispace0, expression, multispace0))(input)
        .map_err(|err| DomainError::ExpressionParse {
            message: format!("failed to parse '{input}': {err:?}"),
        })?;
    Ok(ast)
}
