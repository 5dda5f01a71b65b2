//! Parameter binding resolution at invocation time.
//!
//! Literal bindings may embed `${{ steps.<id>.<field> }}` references that
//! interpolate against recorded outputs; reference bindings navigate the
//! upstream output directly. Secret placeholders are resolved last and only
//! into the invocation copy: the snapshot persisted on the
//! `StepExecution` keeps the placeholder.

use std::collections::HashMap;

use serde_json::{Map as JsonMap, Value as JsonValue};
use skein_types::{BoundValue, Step};
use skein_util::{interpolate_references, navigate_output_path, parse_secret_refs};

use crate::traits::SecretsResolver;

/// Arguments prepared for one step invocation.
#[derive(Debug, Clone)]
pub struct ResolvedArguments {
    /// Persisted form: references interpolated, secrets still placeholders.
    pub snapshot: JsonMap<String, JsonValue>,
    /// Invocation form: secrets resolved; must not outlive the invocation.
    pub invocation: JsonMap<String, JsonValue>,
}

/// Resolves a step's parameter bindings against upstream outputs.
pub async fn resolve_arguments(
    step: &Step,
    outputs: &HashMap<String, JsonValue>,
    secrets: &dyn SecretsResolver,
    purpose: &str,
) -> Result<ResolvedArguments, String> {
    let mut snapshot = JsonMap::new();
    for (parameter_name, bound_value) in &step.parameters {
        let resolved = match bound_value {
            BoundValue::Literal { value } => interpolate_embedded(value, outputs),
            BoundValue::Reference { step_id, field } => {
                let output = outputs
                    .get(step_id)
                    .ok_or_else(|| format!("step '{}' has no recorded output for binding '{}'", step_id, parameter_name))?;
                navigate_output_path(output, field)
                    .ok_or_else(|| format!("output field '{}' of step '{}' is missing at run time", field, step_id))?
            }
        };
        snapshot.insert(parameter_name.clone(), resolved);
    }

    let mut invocation = snapshot.clone();
    resolve_secret_placeholders(&mut invocation, secrets, purpose).await?;

    Ok(ResolvedArguments { snapshot, invocation })
}

fn interpolate_embedded(value: &JsonValue, outputs: &HashMap<String, JsonValue>) -> JsonValue {
    match value {
        JsonValue::String(text) => JsonValue::String(interpolate_references(text, outputs)),
        JsonValue::Array(items) => JsonValue::Array(items.iter().map(|item| interpolate_embedded(item, outputs)).collect()),
        JsonValue::Object(map) => {
            let mut interpolated = JsonMap::new();
            for (key, nested) in map {
                interpolated.insert(key.clone(), interpolate_embedded(nested, outputs));
            }
            JsonValue::Object(interpolated)
        }
        other => other.clone(),
    }
}

async fn resolve_secret_placeholders(
    arguments: &mut JsonMap<String, JsonValue>,
    secrets: &dyn SecretsResolver,
    purpose: &str,
) -> Result<(), String> {
    for value in arguments.values_mut() {
        resolve_secrets_in_value(value, secrets, purpose).await?;
    }
    Ok(())
}

async fn resolve_secrets_in_value(value: &mut JsonValue, secrets: &dyn SecretsResolver, purpose: &str) -> Result<(), String> {
    match value {
        JsonValue::String(text) => {
            for secret_name in parse_secret_refs(text) {
                let material = secrets
                    .resolve(&secret_name, purpose)
                    .await
                    .map_err(|error| error.to_string())?;
                *text = text.replace(&format!("${{secret:{secret_name}}}"), &material);
            }
            Ok(())
        }
        JsonValue::Array(items) => {
            for item in items {
                Box::pin(resolve_secrets_in_value(item, secrets, purpose)).await?;
            }
            Ok(())
        }
        JsonValue::Object(map) => {
            for nested in map.values_mut() {
                Box::pin(resolve_secrets_in_value(nested, secrets, purpose)).await?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}
