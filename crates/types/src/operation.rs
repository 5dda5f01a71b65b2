//! Callable provider operations and their schemas.
//!
//! An [`Operation`] is the unit the registry catalogs and the engine
//! invokes. Qualified names are provider-prefixed (`{provider}_{name}`) so
//! two providers exposing identically named operations never collide.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A callable operation exposed by a connected provider.
///
/// Operations are immutable once registered; re-registration under the same
/// qualified name is only accepted when the payload is identical.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Operation {
    /// Provider-prefixed identifier, unique across the whole registry.
    pub qualified_name: String,
    /// Identifier of the provider that exposes this operation.
    pub provider_id: String,
    /// Bare operation name within the provider (for example, `create_card`).
    pub name: String,
    /// Short free-text description used by search and planner prompts.
    #[serde(default)]
    pub summary: String,
    /// Declared input fields.
    #[serde(default)]
    pub input_schema: OperationSchema,
    /// Declared output fields.
    #[serde(default)]
    pub output_schema: OperationSchema,
    /// HTTP endpoint binding, absent for operations the engine evaluates
    /// locally (triggers, transforms, conditions).
    #[serde(default)]
    pub http: Option<HttpBinding>,
}

/// HTTP endpoint metadata for an operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HttpBinding {
    /// Request method (`GET`, `POST`, ...).
    pub method: String,
    /// Path template relative to the provider base URL. Segments wrapped in
    /// braces (`/cards/{card_id}`) are filled from bound parameters.
    pub path: String,
}

/// Ordered collection of named fields describing an operation's input or
/// output payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct OperationSchema {
    /// Fields keyed by name, preserving declaration order.
    #[serde(default)]
    pub fields: IndexMap<String, FieldSpec>,
}

impl OperationSchema {
    /// Returns true when a field with the given name is declared.
    pub fn contains(&self, field_name: &str) -> bool {
        self.fields.contains_key(field_name)
    }

    /// Iterates over the required fields in declaration order.
    pub fn required_fields(&self) -> impl Iterator<Item = (&String, &FieldSpec)> {
        self.fields.iter().filter(|(_, spec)| spec.required)
    }

    /// Builder-style helper to declare a field; used heavily in tests and
    /// catalog construction code.
    pub fn with_field(mut self, name: &str, kind: FieldKind, required: bool) -> Self {
        self.fields.insert(
            name.to_string(),
            FieldSpec {
                kind,
                required,
                description: None,
            },
        );
        self
    }
}

/// Declared type of a schema field.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

/// Metadata for a single schema field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldSpec {
    /// Declared value type.
    pub kind: FieldKind,
    /// Whether a binding for this field must exist before validation passes.
    #[serde(default)]
    pub required: bool,
    /// Optional descriptive copy surfaced in prompts and reports.
    #[serde(default)]
    pub description: Option<String>,
}
