//! Metadata dictionary: the permission table and the check registry.
//!
//! Built once at startup, validated, then shared immutably (`Arc`) across
//! requests. Checks are registered explicitly by name; expressions refer to
//! those names and an unknown name is a fatal configuration error, never a
//! silent denial.

pub mod config;

pub use config::{FieldPermissions, PermissionConfig, ResourcePermissions};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::check::CheckInstance;
use crate::error::{DomainError, DomainResult};
use crate::expression::parser::parse_permission_expression;

/// The four CRUD permission classes an expression can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionKind {
    Read,
    Create,
    Update,
    Delete,
}

impl PermissionKind {
    /// Read and delete decisions cannot wait for the commit phase: the
    /// data has already been exposed or destroyed by then.
    pub fn is_inline_only(self) -> bool {
        matches!(self, PermissionKind::Read | PermissionKind::Delete)
    }
}

impl fmt::Display for PermissionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PermissionKind::Read => write!(f, "read"),
            PermissionKind::Create => write!(f, "create"),
            PermissionKind::Update => write!(f, "update"),
            PermissionKind::Delete => write!(f, "delete"),
        }
    }
}

/// Produces a check instance each time an expression leaf is resolved.
#[derive(Clone)]
enum CheckFactory {
    /// Fresh instance per resolution.
    Fresh(Arc<dyn Fn() -> CheckInstance + Send + Sync>),
    /// One shared instance, for checks that carry no per-request state.
    Shared(CheckInstance),
}

#[derive(Debug, Default, Clone)]
struct EntityPermissions {
    entity: HashMap<PermissionKind, String>,
    fields: HashMap<(String, PermissionKind), String>,
    /// Field names in declaration order; drives the any-field scan.
    exposed_fields: Vec<String>,
}

/// Startup-built mapping from resource types to their declared permission
/// expressions, plus the registry of named checks.
#[derive(Default, Clone)]
pub struct MetadataDictionary {
    entities: HashMap<String, EntityPermissions>,
    checks: HashMap<String, CheckFactory>,
}

impl fmt::Debug for MetadataDictionary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataDictionary")
            .field("entities", &self.entities.keys().collect::<Vec<_>>())
            .field("checks", &self.checks.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl MetadataDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory producing a fresh check instance per resolution.
    pub fn register_check<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> CheckInstance + Send + Sync + 'static,
    {
        self.checks
            .insert(name.into(), CheckFactory::Fresh(Arc::new(factory)));
    }

    /// Registers one shared instance under its own identifier. Only for
    /// checks that declare themselves stateless.
    pub fn register_shared_check(&mut self, check: CheckInstance) {
        self.checks.insert(
            check.identifier().to_string(),
            CheckFactory::Shared(check),
        );
    }

    /// Binds an entity-level expression for one permission class.
    pub fn bind_entity_permission(
        &mut self,
        resource_type: impl Into<String>,
        kind: PermissionKind,
        expression: impl Into<String>,
    ) {
        self.entities
            .entry(resource_type.into())
            .or_default()
            .entity
            .insert(kind, expression.into());
    }

    /// Binds a field-level expression, exposing the field if it was not
    /// already exposed.
    pub fn bind_field_permission(
        &mut self,
        resource_type: impl Into<String>,
        field: impl Into<String>,
        kind: PermissionKind,
        expression: impl Into<String>,
    ) {
        let resource_type = resource_type.into();
        let field = field.into();
        self.expose_field(resource_type.clone(), field.clone());
        self.entities
            .entry(resource_type)
            .or_default()
            .fields
            .insert((field, kind), expression.into());
    }

    /// Exposes a field that carries no expressions of its own.
    pub fn expose_field(&mut self, resource_type: impl Into<String>, field: impl Into<String>) {
        let entry = self.entities.entry(resource_type.into()).or_default();
        let field = field.into();
        if !entry.exposed_fields.contains(&field) {
            entry.exposed_fields.push(field);
        }
    }

    pub fn exposed_fields(&self, resource_type: &str) -> &[String] {
        self.entities
            .get(resource_type)
            .map(|e| e.exposed_fields.as_slice())
            .unwrap_or(&[])
    }

    pub fn expression_for_entity(
        &self,
        resource_type: &str,
        kind: PermissionKind,
    ) -> Option<&str> {
        self.entities
            .get(resource_type)?
            .entity
            .get(&kind)
            .map(String::as_str)
    }

    pub fn expression_for_field(
        &self,
        resource_type: &str,
        field: &str,
        kind: PermissionKind,
    ) -> Option<&str> {
        self.entities
            .get(resource_type)?
            .fields
            .get(&(field.to_string(), kind))
            .map(String::as_str)
    }

    /// Whether any expression, entity- or field-level, is bound for this
    /// permission class. When false the permission is open.
    pub fn entity_has_checks(&self, resource_type: &str, kind: PermissionKind) -> bool {
        let Some(entry) = self.entities.get(resource_type) else {
            return false;
        };
        entry.entity.contains_key(&kind) || entry.fields.keys().any(|(_, k)| *k == kind)
    }

    /// Resolves a registered check by name.
    pub fn resolve_check(&self, name: &str) -> DomainResult<CheckInstance> {
        match self.checks.get(name) {
            Some(CheckFactory::Fresh(factory)) => Ok(factory()),
            Some(CheckFactory::Shared(check)) => Ok(check.clone()),
            None => Err(DomainError::MissingCheck {
                name: name.to_string(),
            }),
        }
    }

    /// Parses every bound expression and resolves every referenced check
    /// name, so misconfiguration surfaces at startup rather than on the
    /// first request that happens to hit it.
    pub fn validate(&self) -> DomainResult<()> {
        for entry in self.entities.values() {
            for expression in entry.entity.values().chain(entry.fields.values()) {
                let ast = parse_permission_expression(expression)?;
                let mut names = Vec::new();
                ast.check_names(&mut names);
                for name in names {
                    self.resolve_check(name)?;
                }
            }
        }
        Ok(())
    }
}
