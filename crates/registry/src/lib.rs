//! Operation registry: the catalog of callable provider operations.
//!
//! Every component consults the registry before trusting an operation name.
//! The planner bounds its prompt to registered operations, the graph
//! builder verifies bindings against registered schemas, and the engine
//! resolves qualified names back to invocable definitions. The catalog is
//! read-mostly; share it across components as a [`SharedRegistry`].

use std::sync::{Arc, RwLock};

use heck::ToSnakeCase;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use skein_types::{HttpBinding, Operation, OperationSchema};
use tracing::debug;

pub mod error;
pub mod persistence;
pub mod search;

pub use error::RegistryError;
pub use search::SearchHit;

/// Read-mostly shared handle used across planner, graph, and engine.
pub type SharedRegistry = Arc<RwLock<OperationRegistry>>;

/// Provider-submitted operation payload, before qualification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OperationDefinition {
    /// Bare operation name within the provider.
    pub name: String,
    /// Short description used by search and planner prompts.
    #[serde(default)]
    pub summary: String,
    /// Declared input fields.
    #[serde(default)]
    pub input_schema: OperationSchema,
    /// Declared output fields.
    #[serde(default)]
    pub output_schema: OperationSchema,
    /// HTTP endpoint binding, when the operation is remotely invocable.
    #[serde(default)]
    pub http: Option<HttpBinding>,
}

/// In-memory catalog of registered operations keyed by qualified name.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OperationRegistry {
    /// Operations in registration order.
    operations: IndexMap<String, Operation>,
}

impl OperationRegistry {
    /// Builds the provider-prefixed qualified name for an operation.
    ///
    /// Both components are normalized to `snake_case` so qualified names are
    /// stable regardless of how a provider styles its identifiers.
    pub fn qualified_name(provider_id: &str, operation_name: &str) -> String {
        format!("{}_{}", provider_id.to_snake_case(), operation_name.to_snake_case())
    }

    /// Registers a provider's operations under collision-free qualified
    /// names.
    ///
    /// The call is transactional: if any definition collides with an
    /// existing operation under the same qualified name but a different
    /// payload, nothing from the call is admitted. Re-registering an
    /// identical payload is idempotent.
    pub fn register(&mut self, provider_id: &str, definitions: Vec<OperationDefinition>) -> Result<(), RegistryError> {
        let mut admitted: Vec<Operation> = Vec::with_capacity(definitions.len());

        for definition in definitions {
            let qualified_name = Self::qualified_name(provider_id, &definition.name);
            let candidate = Operation {
                qualified_name: qualified_name.clone(),
                provider_id: provider_id.to_snake_case(),
                name: definition.name.to_snake_case(),
                summary: definition.summary,
                input_schema: definition.input_schema,
                output_schema: definition.output_schema,
                http: definition.http,
            };

            if let Some(existing) = self.operations.get(&qualified_name) {
                if *existing == candidate {
                    debug!(qualified_name, "identical re-registration ignored");
                    continue;
                }
                return Err(RegistryError::DuplicateOperation { qualified_name });
            }
            if let Some(previous) = admitted.iter().find(|operation| operation.qualified_name == qualified_name) {
                if *previous != candidate {
                    return Err(RegistryError::DuplicateOperation { qualified_name });
                }
                continue;
            }
            admitted.push(candidate);
        }

        for operation in admitted {
            debug!(qualified_name = %operation.qualified_name, "operation registered");
            self.operations.insert(operation.qualified_name.clone(), operation);
        }
        Ok(())
    }

    /// Resolves a qualified name to its operation.
    pub fn lookup(&self, qualified_name: &str) -> Result<&Operation, RegistryError> {
        self.operations.get(qualified_name).ok_or_else(|| RegistryError::NotFound {
            qualified_name: qualified_name.to_string(),
        })
    }

    /// True when the qualified name is registered.
    pub fn contains(&self, qualified_name: &str) -> bool {
        self.operations.contains_key(qualified_name)
    }

    /// Operations exposed by a single provider, in registration order.
    pub fn list_by_provider(&self, provider_id: &str) -> Vec<&Operation> {
        let normalized = provider_id.to_snake_case();
        self.operations
            .values()
            .filter(|operation| operation.provider_id == normalized)
            .collect()
    }

    /// All registered operations in registration order.
    pub fn operations(&self) -> impl Iterator<Item = &Operation> {
        self.operations.values()
    }

    /// Number of registered operations.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// True when no operation is registered.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Wraps a registry for shared, read-mostly use.
pub fn into_shared(registry: OperationRegistry) -> SharedRegistry {
    Arc::new(RwLock::new(registry))
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_types::FieldKind;

    fn create_card_definition() -> OperationDefinition {
        OperationDefinition {
            name: "create_card".into(),
            summary: "Create a card on a board".into(),
            input_schema: OperationSchema::default().with_field("board", FieldKind::String, true),
            output_schema: OperationSchema::default().with_field("card_id", FieldKind::String, false),
            http: None,
        }
    }

    #[test]
    fn qualified_names_are_provider_prefixed_and_distinct() {
        let mut registry = OperationRegistry::default();
        registry.register("boards", vec![create_card_definition()]).expect("register boards");
        registry.register("tracker", vec![create_card_definition()]).expect("register tracker");

        assert!(registry.contains("boards_create_card"));
        assert!(registry.contains("tracker_create_card"));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn identical_re_registration_is_idempotent() {
        let mut registry = OperationRegistry::default();
        registry.register("boards", vec![create_card_definition()]).expect("first registration");
        registry.register("boards", vec![create_card_definition()]).expect("identical re-registration");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn conflicting_re_registration_is_rejected() {
        let mut registry = OperationRegistry::default();
        registry.register("boards", vec![create_card_definition()]).expect("first registration");

        let mut conflicting = create_card_definition();
        conflicting.input_schema = OperationSchema::default().with_field("list", FieldKind::String, true);
        let error = registry.register("boards", vec![conflicting]).expect_err("schema conflict");
        assert!(matches!(error, RegistryError::DuplicateOperation { ref qualified_name } if qualified_name == "boards_create_card"));
    }

    #[test]
    fn conflicting_registration_admits_nothing_from_the_call() {
        let mut registry = OperationRegistry::default();
        registry.register("boards", vec![create_card_definition()]).expect("seed registration");

        let mut conflicting = create_card_definition();
        conflicting.summary = "different".into();
        let fresh = OperationDefinition {
            name: "archive_card".into(),
            summary: "Archive a card".into(),
            input_schema: OperationSchema::default(),
            output_schema: OperationSchema::default(),
            http: None,
        };

        registry
            .register("boards", vec![fresh, conflicting])
            .expect_err("conflict rejects the batch");
        assert!(!registry.contains("boards_archive_card"), "transactional register must admit nothing");
    }

    #[test]
    fn provider_listing_uses_normalized_ids() {
        let mut registry = OperationRegistry::default();
        registry.register("MyBoards", vec![create_card_definition()]).expect("register");

        let listed = registry.list_by_provider("my_boards");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].qualified_name, "my_boards_create_card");
    }

    #[test]
    fn lookup_reports_missing_operations() {
        let registry = OperationRegistry::default();
        let error = registry.lookup("nowhere_nothing").expect_err("missing operation");
        assert!(matches!(error, RegistryError::NotFound { .. }));
    }
}
