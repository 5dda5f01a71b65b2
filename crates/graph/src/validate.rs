//! Whole-graph validation.
//!
//! Always runs over the full workflow (there is no incremental path) and
//! collects every finding into a [`ValidationReport`] instead of stopping
//! at the first problem. Re-validating an unchanged valid workflow yields
//! an empty error list.

use std::collections::HashSet;

use skein_registry::OperationRegistry;
use skein_types::{BoundValue, Operation, Step, StepKind, ValidationIssue, ValidationReport, Workflow};

use crate::schedule::topo_levels;

/// Comparison parameters every condition step must carry.
const CONDITION_PARAMETERS: [&str; 3] = ["left", "op", "right"];

/// Validates a workflow against the registry.
pub fn validate_workflow(workflow: &Workflow, registry: &OperationRegistry) -> ValidationReport {
    let mut collector = IssueCollector::default();

    check_step_identities(workflow, &mut collector);
    check_dependencies(workflow, &mut collector);
    check_cycles(workflow, &mut collector);
    check_operations(workflow, registry, &mut collector);
    check_edges(workflow, registry, &mut collector);
    check_reference_parameters(workflow, registry, &mut collector);
    check_required_bindings(workflow, registry, &mut collector);
    check_conditions(workflow, &mut collector);
    check_trigger_presence(workflow, &mut collector);

    collector.report
}

/// Deduplicating wrapper so overlapping checks (edges are derived from
/// reference parameters) do not double-report the same finding.
#[derive(Default)]
struct IssueCollector {
    report: ValidationReport,
}

impl IssueCollector {
    fn push(&mut self, issue: ValidationIssue) {
        let bucket = match issue.severity() {
            skein_types::Severity::Error => &self.report.errors,
            skein_types::Severity::Warning => &self.report.warnings,
        };
        if bucket.contains(&issue) {
            return;
        }
        self.report.push(issue);
    }
}

fn check_step_identities(workflow: &Workflow, collector: &mut IssueCollector) {
    let mut seen: HashSet<&str> = HashSet::new();
    for step in &workflow.steps {
        if !seen.insert(step.id.as_str()) {
            collector.push(ValidationIssue::DuplicateStepId { step_id: step.id.clone() });
        }
    }
}

fn check_dependencies(workflow: &Workflow, collector: &mut IssueCollector) {
    for step in &workflow.steps {
        for dependency in &step.depends_on {
            if dependency == &step.id {
                collector.push(ValidationIssue::SelfDependency { step_id: step.id.clone() });
            } else if workflow.step(dependency).is_none() {
                collector.push(ValidationIssue::UnknownDependency {
                    step_id: step.id.clone(),
                    dependency: dependency.clone(),
                });
            }
        }
    }
}

fn check_cycles(workflow: &Workflow, collector: &mut IssueCollector) {
    if let Err(step_ids) = topo_levels(&workflow.steps) {
        collector.push(ValidationIssue::CircularDependency { step_ids });
    }
}

fn check_operations(workflow: &Workflow, registry: &OperationRegistry, collector: &mut IssueCollector) {
    for step in &workflow.steps {
        if let Some(qualified_name) = &step.qualified_operation
            && !registry.contains(qualified_name)
        {
            collector.push(ValidationIssue::UnknownOperation {
                step_id: step.id.clone(),
                qualified_name: qualified_name.clone(),
            });
        }
    }
}

fn check_edges(workflow: &Workflow, registry: &OperationRegistry, collector: &mut IssueCollector) {
    for edge in &workflow.edges {
        let Some(target_step) = workflow.step(&edge.to_step_id) else {
            collector.push(ValidationIssue::UnknownDependency {
                step_id: edge.to_step_id.clone(),
                dependency: edge.from_step_id.clone(),
            });
            continue;
        };
        let Some(source_step) = workflow.step(&edge.from_step_id) else {
            collector.push(ValidationIssue::UnknownDependency {
                step_id: edge.to_step_id.clone(),
                dependency: edge.from_step_id.clone(),
            });
            continue;
        };

        // Invariant: every edge's target lists the source as a dependency.
        if !target_step.depends_on.contains(&edge.from_step_id) {
            collector.push(ValidationIssue::EdgeWithoutDependency {
                from_step_id: edge.from_step_id.clone(),
                to_step_id: edge.to_step_id.clone(),
            });
        }

        if let Some(source_operation) = operation_for(source_step, registry)
            && !source_operation.output_schema.contains(&edge.output_field)
        {
            collector.push(ValidationIssue::UnknownOutputField {
                step_id: edge.to_step_id.clone(),
                from_step_id: edge.from_step_id.clone(),
                field: edge.output_field.clone(),
            });
        }
        if let Some(target_operation) = operation_for(target_step, registry)
            && !target_operation.input_schema.contains(&edge.input_field)
            && !matches!(target_step.kind, StepKind::Condition)
        {
            collector.push(ValidationIssue::UnknownInputField {
                step_id: edge.to_step_id.clone(),
                field: edge.input_field.clone(),
            });
        }
    }
}

fn check_reference_parameters(workflow: &Workflow, registry: &OperationRegistry, collector: &mut IssueCollector) {
    for step in &workflow.steps {
        for bound_value in step.parameters.values() {
            let BoundValue::Reference { step_id: from_id, field } = bound_value else {
                continue;
            };
            let Some(source_step) = workflow.step(from_id) else {
                collector.push(ValidationIssue::UnknownDependency {
                    step_id: step.id.clone(),
                    dependency: from_id.clone(),
                });
                continue;
            };
            if !step.depends_on.contains(from_id) {
                collector.push(ValidationIssue::EdgeWithoutDependency {
                    from_step_id: from_id.clone(),
                    to_step_id: step.id.clone(),
                });
            }
            let root_field = field.split('.').next().unwrap_or(field);
            if let Some(source_operation) = operation_for(source_step, registry)
                && !source_operation.output_schema.contains(root_field)
            {
                collector.push(ValidationIssue::UnknownOutputField {
                    step_id: step.id.clone(),
                    from_step_id: from_id.clone(),
                    field: root_field.to_string(),
                });
            }
        }
    }
}

fn check_required_bindings(workflow: &Workflow, registry: &OperationRegistry, collector: &mut IssueCollector) {
    for step in &workflow.steps {
        let Some(operation) = operation_for(step, registry) else {
            continue;
        };
        let incoming_fields: HashSet<&str> = workflow.edges_into(&step.id).map(|edge| edge.input_field.as_str()).collect();
        for (field_name, _) in operation.input_schema.required_fields() {
            let bound = step.parameters.contains_key(field_name) || incoming_fields.contains(field_name.as_str());
            if !bound {
                collector.push(ValidationIssue::UnboundRequiredField {
                    step_id: step.id.clone(),
                    field: field_name.clone(),
                });
            }
        }
    }
}

fn check_conditions(workflow: &Workflow, collector: &mut IssueCollector) {
    for step in &workflow.steps {
        if !step.is_condition() {
            continue;
        }
        if step.then_steps.is_empty() || step.else_steps.is_empty() {
            collector.push(ValidationIssue::ConditionMissingBranch { step_id: step.id.clone() });
        }
        for member_id in step.then_steps.iter().chain(step.else_steps.iter()) {
            if workflow.step(member_id).is_none() {
                collector.push(ValidationIssue::UnknownDependency {
                    step_id: step.id.clone(),
                    dependency: member_id.clone(),
                });
            }
        }
        for parameter_name in CONDITION_PARAMETERS {
            if !step.parameters.contains_key(parameter_name) {
                collector.push(ValidationIssue::UnboundRequiredField {
                    step_id: step.id.clone(),
                    field: parameter_name.to_string(),
                });
            }
        }
    }
}

fn check_trigger_presence(workflow: &Workflow, collector: &mut IssueCollector) {
    if !workflow.steps.iter().any(|step| matches!(step.kind, StepKind::Trigger)) {
        collector.push(ValidationIssue::NoTriggerStep);
    }
}

fn operation_for<'registry>(step: &Step, registry: &'registry OperationRegistry) -> Option<&'registry Operation> {
    step.qualified_operation
        .as_deref()
        .and_then(|qualified_name| registry.lookup(qualified_name).ok())
}
