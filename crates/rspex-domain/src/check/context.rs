//! Request-scoped value objects handed to permission checks.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

/// The principal a request runs on behalf of.
#[derive(Debug, Clone, Default)]
pub struct User {
    name: String,
    roles: HashSet<String>,
    claims: HashMap<String, Value>,
}

impl User {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            roles: HashSet::new(),
            claims: HashMap::new(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }

    pub fn with_claim(mut self, key: impl Into<String>, value: Value) -> Self {
        self.claims.insert(key.into(), value);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    pub fn claim(&self, key: &str) -> Option<&Value> {
        self.claims.get(key)
    }
}

/// Everything a check may consult about the current request: the user
/// plus a free-form context bag populated by the host application.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    user: User,
    context: HashMap<String, Value>,
}

impl RequestContext {
    pub fn new(user: User) -> Self {
        Self {
            user,
            context: HashMap::new(),
        }
    }

    pub fn with_value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn value(&self, key: &str) -> Option<&Value> {
        self.context.get(key)
    }
}

/// A candidate object a permission decision is being made about.
/// Identity for result caching is the `(type_name, id)` pair.
#[derive(Debug, Clone)]
pub struct Resource {
    type_name: String,
    id: String,
    attributes: HashMap<String, Value>,
}

impl Resource {
    pub fn new(type_name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            id: id.into(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }
}

/// A single proposed field mutation, produced by the data layer before
/// update checks run. Read-only to the engine; identity for result
/// caching is the field name.
#[derive(Debug, Clone)]
pub struct ChangeDescriptor {
    resource_type: String,
    resource_id: String,
    field: String,
    original: Option<Value>,
    modified: Option<Value>,
}

impl ChangeDescriptor {
    pub fn new(
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
        field: impl Into<String>,
        original: Option<Value>,
        modified: Option<Value>,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            field: field.into(),
            original,
            modified,
        }
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn original(&self) -> Option<&Value> {
        self.original.as_ref()
    }

    pub fn modified(&self) -> Option<&Value> {
        self.modified.as_ref()
    }
}
