//! Typed permission-table configuration.
//!
//! The host application declares its permission table as data (JSON or any
//! serde source) and applies it onto a dictionary, keeping the security
//! rules auditable in one place.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{MetadataDictionary, PermissionKind};
use crate::error::{DomainError, DomainResult};

/// Expressions declared for one field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldPermissions {
    pub field: String,
    #[serde(default)]
    pub permissions: HashMap<PermissionKind, String>,
}

/// Expressions declared for one resource type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourcePermissions {
    pub resource: String,
    /// Entity-level expressions by permission class.
    #[serde(default)]
    pub permissions: HashMap<PermissionKind, String>,
    #[serde(default)]
    pub fields: Vec<FieldPermissions>,
    /// Fields exposed without expressions of their own.
    #[serde(default)]
    pub exposed_fields: Vec<String>,
}

/// The full permission table for an application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PermissionConfig {
    pub resources: Vec<ResourcePermissions>,
}

impl PermissionConfig {
    pub fn from_json(raw: &str) -> DomainResult<Self> {
        serde_json::from_str(raw).map_err(|err| DomainError::InvalidConfig {
            message: err.to_string(),
        })
    }
}

impl MetadataDictionary {
    /// Applies a configuration table onto this dictionary. Call
    /// [`MetadataDictionary::validate`] afterwards to surface unknown
    /// check names and parse errors.
    pub fn apply_config(&mut self, config: &PermissionConfig) {
        for resource in &config.resources {
            for (kind, expression) in &resource.permissions {
                self.bind_entity_permission(&resource.resource, *kind, expression.clone());
            }
            for field in &resource.fields {
                for (kind, expression) in &field.permissions {
                    self.bind_field_permission(
                        &resource.resource,
                        &field.field,
                        *kind,
                        expression.clone(),
                    );
                }
                if field.permissions.is_empty() {
                    self.expose_field(&resource.resource, &field.field);
                }
            }
            for field in &resource.exposed_fields {
                self.expose_field(&resource.resource, field);
            }
        }
    }
}
