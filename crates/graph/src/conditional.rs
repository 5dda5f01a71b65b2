//! Conditional resolver: expands planner branch markers into condition
//! steps with two successor sets.
//!
//! A condition step owns `then_steps` and `else_steps` instead of feeding a
//! single successor chain. Both branches are validated like any other part
//! of the graph; only one executes at run time. Branch membership is
//! transitive, so steps reachable only through a branch inherit its
//! selection constraint and never share a parallel group with the opposite
//! branch.

use std::collections::HashMap;

use indexmap::IndexMap;
use skein_planner::CandidateStep;
use skein_types::{Step, ValidationIssue, ValidationReport, Workflow};

/// A branch-selection constraint: the step only runs when `condition_id`
/// resolved to `selected`.
pub type BranchConstraint = (String, bool);

/// Applies candidate branch markers to the built steps.
///
/// Branch members gain the condition step as a dependency so ordering and
/// cycle checks see the edge; refs that map to no step are reported, and a
/// branch left empty after mapping is a blocking issue.
pub fn resolve_branches(
    candidates: &[CandidateStep],
    id_by_ref: &IndexMap<String, String>,
    steps: &mut [Step],
    report: &mut ValidationReport,
) {
    for candidate in candidates {
        let Some(branch) = &candidate.branch else {
            continue;
        };
        let Some(condition_id) = id_by_ref.get(&candidate.reference).cloned() else {
            continue;
        };

        let then_ids = map_branch_refs(&condition_id, &branch.then_refs, id_by_ref, report);
        let else_ids = map_branch_refs(&condition_id, &branch.else_refs, id_by_ref, report);

        if then_ids.is_empty() || else_ids.is_empty() {
            report.push(ValidationIssue::ConditionMissingBranch {
                step_id: condition_id.clone(),
            });
        }

        for member_id in then_ids.iter().chain(else_ids.iter()) {
            if let Some(member) = steps.iter_mut().find(|step| &step.id == member_id)
                && !member.depends_on.contains(&condition_id)
            {
                member.depends_on.push(condition_id.clone());
            }
        }

        if let Some(condition_step) = steps.iter_mut().find(|step| step.id == condition_id) {
            condition_step.then_steps = then_ids;
            condition_step.else_steps = else_ids;
        }
    }
}

fn map_branch_refs(
    condition_id: &str,
    branch_refs: &[String],
    id_by_ref: &IndexMap<String, String>,
    report: &mut ValidationReport,
) -> Vec<String> {
    let mut mapped = Vec::with_capacity(branch_refs.len());
    for branch_ref in branch_refs {
        match id_by_ref.get(branch_ref) {
            Some(member_id) => mapped.push(member_id.clone()),
            None => report.push(ValidationIssue::UnknownDependency {
                step_id: condition_id.to_string(),
                dependency: branch_ref.clone(),
            }),
        }
    }
    mapped
}

/// Computes the transitive branch constraints for every step.
///
/// Explicit members carry their condition's constraint; any step depending
/// on a constrained step inherits it. The fixpoint loop is bounded because
/// constraints only ever grow.
pub fn branch_membership(workflow: &Workflow) -> HashMap<String, Vec<BranchConstraint>> {
    let mut membership: HashMap<String, Vec<BranchConstraint>> = HashMap::new();

    for step in &workflow.steps {
        if !step.is_condition() {
            continue;
        }
        for member_id in &step.then_steps {
            add_constraint(&mut membership, member_id, (step.id.clone(), true));
        }
        for member_id in &step.else_steps {
            add_constraint(&mut membership, member_id, (step.id.clone(), false));
        }
    }

    loop {
        let mut changed = false;
        for step in &workflow.steps {
            let inherited: Vec<BranchConstraint> = step
                .depends_on
                .iter()
                .flat_map(|dependency| membership.get(dependency).cloned().unwrap_or_default())
                .collect();
            for constraint in inherited {
                if add_constraint(&mut membership, &step.id, constraint) {
                    changed = true;
                }
            }
        }
        if !changed {
            break;
        }
    }

    membership
}

fn add_constraint(membership: &mut HashMap<String, Vec<BranchConstraint>>, step_id: &str, constraint: BranchConstraint) -> bool {
    let constraints = membership.entry(step_id.to_string()).or_default();
    if constraints.contains(&constraint) {
        return false;
    }
    constraints.push(constraint);
    true
}

/// True when two steps can never both execute in the same run.
pub fn mutually_exclusive(membership: &HashMap<String, Vec<BranchConstraint>>, left_id: &str, right_id: &str) -> bool {
    let Some(left_constraints) = membership.get(left_id) else {
        return false;
    };
    let Some(right_constraints) = membership.get(right_id) else {
        return false;
    };
    left_constraints.iter().any(|(condition, selected)| {
        right_constraints
            .iter()
            .any(|(other_condition, other_selected)| condition == other_condition && selected != other_selected)
    })
}
