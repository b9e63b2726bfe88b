//! Domain error types for permission evaluation.

use thiserror::Error;

use crate::expression::PermissionCondition;

/// Domain-specific errors for permission evaluation.
#[derive(Debug, Error)]
pub enum DomainError {
    /// A permission expression string failed to parse.
    #[error("expression parse error: {message}")]
    ExpressionParse { message: String },

    /// An expression references a check name that was never registered.
    #[error("missing or unregistered permission check: {name}")]
    MissingCheck { name: String },

    /// A check was invoked against the wrong calling convention, for
    /// example a resource-level check without a bound resource.
    #[error("check '{name}' violates its contract: {message}")]
    InvalidCheckContract { name: String, message: String },

    /// A user-supplied check returned an error instead of a verdict.
    /// Propagated as-is rather than coerced into a denial.
    #[error("permission check '{name}' failed to evaluate")]
    CheckFailed {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    /// Access denied. The expected negative outcome of a permission check.
    #[error("access forbidden: {condition}")]
    Forbidden { condition: PermissionCondition },

    /// A deferred result survived commit-phase evaluation, where every
    /// check class is runnable. Indicates broken expression wiring.
    #[error("deferred checks left unresolved after commit evaluation: {condition}")]
    UnresolvedDeferred { condition: PermissionCondition },

    /// The permission configuration table is malformed.
    #[error("invalid permission configuration: {message}")]
    InvalidConfig { message: String },
}

/// Result type alias for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
