//! Normalizes planner candidates into a validated workflow.
//!
//! Stable ids are `step-1`, `step-2`, ... in declaration order. Dependencies
//! come from the candidates' declared lists plus any parameter that
//! textually references another step's output; each such reference also
//! derives a [`DataFlowEdge`]. Nothing from the candidate list is trusted
//! until it has passed through here.

use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use skein_planner::CandidateStep;
use skein_registry::OperationRegistry;
use skein_types::{BoundValue, DataFlowEdge, Step, StepKind, ValidationIssue, ValidationReport, Workflow, WorkflowStatus};
use skein_util::{StepFieldRef, parse_step_references, pure_reference};
use tracing::debug;

use crate::conditional::resolve_branches;
use crate::schedule::compute_schedule;
use crate::validate::validate_workflow;

/// Identity fields for the workflow under construction.
#[derive(Debug, Clone, Default)]
pub struct WorkflowMeta {
    /// Stable workflow identifier.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Optional descriptive copy.
    pub description: Option<String>,
    /// Owning user, when known.
    pub owner_id: Option<String>,
}

/// Result of building: the draft plus everything validation found.
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    /// The normalized workflow. Status is `Validated` only when the report
    /// has no blocking errors.
    pub workflow: Workflow,
    /// Full validation report for the build.
    pub report: ValidationReport,
}

/// Builds a workflow from planner candidates and validates it in full.
pub fn build_workflow(meta: WorkflowMeta, candidates: &[CandidateStep], registry: &OperationRegistry) -> BuildOutcome {
    let mut report = ValidationReport::default();

    // Stable id assignment in declaration order; duplicate refs are
    // reported and only the first occurrence is kept.
    let mut id_by_ref: IndexMap<String, String> = IndexMap::new();
    for (index, candidate) in candidates.iter().enumerate() {
        if id_by_ref.contains_key(&candidate.reference) {
            report.push(ValidationIssue::DuplicateStepId {
                step_id: candidate.reference.clone(),
            });
            continue;
        }
        id_by_ref.insert(candidate.reference.clone(), format!("step-{}", index + 1));
    }

    let mut steps: Vec<Step> = Vec::with_capacity(id_by_ref.len());
    let mut edges: Vec<DataFlowEdge> = Vec::new();
    let mut built_refs: Vec<&str> = Vec::new();

    for candidate in candidates {
        let Some(step_id) = id_by_ref.get(&candidate.reference) else {
            continue;
        };
        if built_refs.contains(&candidate.reference.as_str()) {
            continue;
        }
        built_refs.push(&candidate.reference);

        let mut depends_on: Vec<String> = Vec::new();
        for dependency_ref in &candidate.depends_on {
            match id_by_ref.get(dependency_ref) {
                Some(dependency_id) if dependency_id == step_id => {
                    report.push(ValidationIssue::SelfDependency { step_id: step_id.clone() });
                }
                Some(dependency_id) => push_unique(&mut depends_on, dependency_id.clone()),
                None => report.push(ValidationIssue::UnknownDependency {
                    step_id: step_id.clone(),
                    dependency: dependency_ref.clone(),
                }),
            }
        }

        let mut parameters: IndexMap<String, BoundValue> = IndexMap::new();
        for (parameter_name, suggested_value) in &candidate.parameters {
            let bound = bind_parameter(
                step_id,
                parameter_name,
                suggested_value,
                &id_by_ref,
                &mut depends_on,
                &mut edges,
                &mut report,
            );
            parameters.insert(parameter_name.clone(), bound);
        }

        let kind = infer_kind(candidate, &depends_on, registry);
        steps.push(Step {
            id: step_id.clone(),
            kind,
            qualified_operation: Some(candidate.operation.clone()),
            order_token: 0,
            parameters,
            depends_on,
            then_steps: Vec::new(),
            else_steps: Vec::new(),
        });
    }

    resolve_branches(candidates, &id_by_ref, &mut steps, &mut report);

    let mut workflow = Workflow {
        id: meta.id,
        name: meta.name,
        description: meta.description,
        steps,
        edges,
        status: WorkflowStatus::Draft,
        version: 0,
        owner_id: meta.owner_id,
    };

    report.merge(validate_workflow(&workflow, registry));

    if !has_cycle_error(&report) {
        if let Ok(schedule) = compute_schedule(&workflow) {
            for step in &mut workflow.steps {
                if let Some(order_token) = schedule.order_token(&step.id) {
                    step.order_token = order_token;
                }
            }
        }
    }

    if report.is_valid() {
        workflow.status = WorkflowStatus::Validated;
    }
    debug!(
        workflow_id = %workflow.id,
        steps = workflow.steps.len(),
        edges = workflow.edges.len(),
        errors = report.errors.len(),
        warnings = report.warnings.len(),
        "workflow built"
    );

    BuildOutcome { workflow, report }
}

/// Converts one suggested parameter into a typed binding, deriving
/// dependencies and edges from any step references it carries.
fn bind_parameter(
    step_id: &str,
    parameter_name: &str,
    suggested_value: &JsonValue,
    id_by_ref: &IndexMap<String, String>,
    depends_on: &mut Vec<String>,
    edges: &mut Vec<DataFlowEdge>,
    report: &mut ValidationReport,
) -> BoundValue {
    if let Some(text) = suggested_value.as_str()
        && let Some(reference) = pure_reference(text)
    {
        if let Some(from_id) = id_by_ref.get(&reference.step_id) {
            record_edge(step_id, parameter_name, from_id, &reference, depends_on, edges, report);
            return BoundValue::Reference {
                step_id: from_id.clone(),
                field: reference.field.clone(),
            };
        }
        report.push(ValidationIssue::UnknownDependency {
            step_id: step_id.to_string(),
            dependency: reference.step_id.clone(),
        });
        return BoundValue::Literal {
            value: suggested_value.clone(),
        };
    }

    // Literal values may still embed references ("issue ${{ steps.a.id }}"),
    // anywhere in a nested structure; each one implies a dependency and an
    // edge even though the value itself stays literal.
    for reference in collect_embedded_references(suggested_value) {
        match id_by_ref.get(&reference.step_id) {
            Some(from_id) => record_edge(step_id, parameter_name, from_id, &reference, depends_on, edges, report),
            None => report.push(ValidationIssue::UnknownDependency {
                step_id: step_id.to_string(),
                dependency: reference.step_id.clone(),
            }),
        }
    }

    BoundValue::Literal {
        value: suggested_value.clone(),
    }
}

/// Appends an edge for a reference, applying the ambiguity tie-break: the
/// earliest-declared edge for a given target field wins, later edges from a
/// different producer are dropped with a warning.
fn record_edge(
    step_id: &str,
    parameter_name: &str,
    from_id: &str,
    reference: &StepFieldRef,
    depends_on: &mut Vec<String>,
    edges: &mut Vec<DataFlowEdge>,
    report: &mut ValidationReport,
) {
    if from_id != step_id {
        push_unique(depends_on, from_id.to_string());
    } else {
        report.push(ValidationIssue::SelfDependency {
            step_id: step_id.to_string(),
        });
        return;
    }

    let candidate_edge = DataFlowEdge {
        from_step_id: from_id.to_string(),
        output_field: reference.root_field().to_string(),
        to_step_id: step_id.to_string(),
        input_field: parameter_name.to_string(),
    };

    if let Some(existing) = edges
        .iter()
        .find(|edge| edge.to_step_id == candidate_edge.to_step_id && edge.input_field == candidate_edge.input_field)
    {
        if *existing == candidate_edge {
            return;
        }
        report.push(ValidationIssue::AmbiguousBinding {
            step_id: step_id.to_string(),
            field: parameter_name.to_string(),
            dropped_from: from_id.to_string(),
        });
        return;
    }
    edges.push(candidate_edge);
}

fn collect_embedded_references(value: &JsonValue) -> Vec<StepFieldRef> {
    match value {
        JsonValue::String(text) => parse_step_references(text),
        JsonValue::Array(items) => items.iter().flat_map(collect_embedded_references).collect(),
        JsonValue::Object(map) => map.values().flat_map(collect_embedded_references).collect(),
        _ => Vec::new(),
    }
}

/// Infers the step kind.
///
/// Branch markers make a condition. A step with no upstream dependencies
/// whose operation has no HTTP binding is treated as the trigger (event
/// subscriptions are not invocable endpoints). Dependent steps without an
/// HTTP binding are local transforms; everything else is an API call.
fn infer_kind(candidate: &CandidateStep, depends_on: &[String], registry: &OperationRegistry) -> StepKind {
    if candidate.branch.is_some() {
        return StepKind::Condition;
    }
    let has_http = registry
        .lookup(&candidate.operation)
        .map(|operation| operation.http.is_some())
        .unwrap_or(true);
    if has_http {
        StepKind::ApiCall
    } else if depends_on.is_empty() {
        StepKind::Trigger
    } else {
        StepKind::Transform
    }
}

fn push_unique(list: &mut Vec<String>, item: String) {
    if !list.contains(&item) {
        list.push(item);
    }
}

fn has_cycle_error(report: &ValidationReport) -> bool {
    report
        .errors
        .iter()
        .any(|issue| matches!(issue, ValidationIssue::CircularDependency { .. }))
}
