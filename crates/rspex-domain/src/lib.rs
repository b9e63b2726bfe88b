//! rspex-domain: Core permission-expression evaluation logic
//!
//! This crate contains the permission engine core including:
//! - The check contract and request-scoped evaluation context
//! - Expression trees with lazy, mode-aware, result-caching evaluation
//! - The metadata dictionary and expression builder
//! - The request-scoped executor with commit-check deferral
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                rspex-domain                  │
//! ├─────────────────────────────────────────────┤
//! │  check/      - Check contract & context     │
//! │  expression/ - Tree, parser, result cache   │
//! │  dictionary/ - Permission table & registry  │
//! │  builder     - Expression assembly          │
//! │  strategy    - Any/specific field policies  │
//! │  executor/   - Request evaluation lifecycle │
//! └─────────────────────────────────────────────┘
//! ```

pub mod builder;
pub mod check;
pub mod dictionary;
pub mod error;
pub mod executor;
pub mod expression;
pub mod strategy;

// Re-export commonly used types at the crate root
pub use check::{ChangeDescriptor, CheckInstance, CheckKind, RequestContext, Resource, User};
pub use dictionary::{MetadataDictionary, PermissionConfig, PermissionKind};
pub use error::{DomainError, DomainResult};
pub use executor::PermissionExecutor;
pub use expression::{
    EvaluationMode, Expression, ExpressionResult, ExpressionResultCache, PermissionCondition,
};
