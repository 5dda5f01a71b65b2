//! Topological ordering and parallel-group classification.
//!
//! `order_token` is a topological depth, not a strict sequence number:
//! steps sharing a depth with no edge between them are eligible to run
//! concurrently. Mutually exclusive condition branches are kept out of the
//! same group even when they share a depth.

use std::collections::{HashMap, HashSet, VecDeque};

use skein_types::{Step, Workflow};

use crate::conditional::{branch_membership, mutually_exclusive};

/// Ordering metadata derived from a validated workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionSchedule {
    /// Step ids grouped by topological depth, shallowest first.
    pub levels: Vec<Vec<String>>,
    /// Groups of two or more steps eligible for concurrent execution.
    pub parallel_groups: Vec<Vec<String>>,
}

impl ExecutionSchedule {
    /// Topological depth of a step, if it is part of the schedule.
    pub fn order_token(&self, step_id: &str) -> Option<u32> {
        self.levels
            .iter()
            .position(|level| level.iter().any(|id| id == step_id))
            .map(|depth| depth as u32)
    }
}

/// Kahn's algorithm by level.
///
/// Unknown and self dependencies are ignored here; the validator reports
/// them separately and they must not masquerade as cycles. On a cycle the
/// offending step ids are returned, sorted for stable messages.
pub fn topo_levels(steps: &[Step]) -> Result<Vec<Vec<String>>, Vec<String>> {
    let known_ids: HashSet<&str> = steps.iter().map(|step| step.id.as_str()).collect();

    let mut in_degrees: HashMap<&str, usize> = steps.iter().map(|step| (step.id.as_str(), 0)).collect();
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();

    for step in steps {
        let mut seen: HashSet<&str> = HashSet::new();
        for dependency in &step.depends_on {
            let dependency = dependency.as_str();
            if !known_ids.contains(dependency) || dependency == step.id || !seen.insert(dependency) {
                continue;
            }
            *in_degrees.get_mut(step.id.as_str()).expect("in-degree entry exists") += 1;
            adjacency.entry(dependency).or_default().push(step.id.as_str());
        }
    }

    let mut current_level: VecDeque<&str> = steps
        .iter()
        .map(|step| step.id.as_str())
        .filter(|id| in_degrees.get(id).copied().unwrap_or(0) == 0)
        .collect();

    let mut levels: Vec<Vec<String>> = Vec::new();
    let mut ordered_count = 0usize;

    while !current_level.is_empty() {
        let mut next_level: VecDeque<&str> = VecDeque::new();
        let mut level_ids: Vec<String> = Vec::with_capacity(current_level.len());

        for step_id in current_level.drain(..) {
            level_ids.push(step_id.to_string());
            ordered_count += 1;
            if let Some(children) = adjacency.get(step_id) {
                for child in children {
                    let degree = in_degrees.get_mut(child).expect("dependent step has a degree entry");
                    *degree -= 1;
                    if *degree == 0 {
                        next_level.push_back(child);
                    }
                }
            }
        }

        levels.push(level_ids);
        current_level = next_level;
    }

    if ordered_count != steps.len() {
        let mut remaining: Vec<String> = in_degrees
            .into_iter()
            .filter(|(_, degree)| *degree > 0)
            .map(|(id, _)| id.to_string())
            .collect();
        remaining.sort();
        return Err(remaining);
    }

    Ok(levels)
}

/// Computes levels and parallel groups for a workflow.
///
/// Returns the cyclic step ids when ordering is impossible.
pub fn compute_schedule(workflow: &Workflow) -> Result<ExecutionSchedule, Vec<String>> {
    let levels = topo_levels(&workflow.steps)?;
    let membership = branch_membership(workflow);

    let mut parallel_groups: Vec<Vec<String>> = Vec::new();
    for level in &levels {
        let mut level_groups: Vec<Vec<String>> = Vec::new();
        for step_id in level {
            let compatible_group = level_groups
                .iter_mut()
                .find(|group| group.iter().all(|member| !mutually_exclusive(&membership, member, step_id)));
            match compatible_group {
                Some(group) => group.push(step_id.clone()),
                None => level_groups.push(vec![step_id.clone()]),
            }
        }
        parallel_groups.extend(level_groups.into_iter().filter(|group| group.len() >= 2));
    }

    Ok(ExecutionSchedule { levels, parallel_groups })
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;
    use skein_types::{StepKind, WorkflowStatus};

    fn bare_step(id: &str, depends_on: Vec<&str>) -> Step {
        Step {
            id: id.into(),
            kind: StepKind::ApiCall,
            qualified_operation: None,
            order_token: 0,
            parameters: IndexMap::new(),
            depends_on: depends_on.into_iter().map(String::from).collect(),
            then_steps: Vec::new(),
            else_steps: Vec::new(),
        }
    }

    fn workflow_with(steps: Vec<Step>) -> Workflow {
        Workflow {
            id: "wf-1".into(),
            name: "test".into(),
            description: None,
            steps,
            edges: vec![],
            status: WorkflowStatus::Draft,
            version: 0,
            owner_id: None,
        }
    }

    #[test]
    fn diamond_levels_and_parallel_group() {
        let workflow = workflow_with(vec![
            bare_step("a", vec![]),
            bare_step("b", vec!["a"]),
            bare_step("c", vec!["a"]),
            bare_step("d", vec!["b", "c"]),
        ]);

        let schedule = compute_schedule(&workflow).expect("acyclic");
        assert_eq!(schedule.levels, vec![vec!["a".to_string()], vec!["b".into(), "c".into()], vec!["d".into()]]);
        assert_eq!(schedule.parallel_groups, vec![vec!["b".to_string(), "c".into()]]);
        assert_eq!(schedule.order_token("a"), Some(0));
        assert_eq!(schedule.order_token("c"), Some(1));
        assert_eq!(schedule.order_token("d"), Some(2));
    }

    #[test]
    fn cycles_report_the_offending_steps() {
        let workflow = workflow_with(vec![
            bare_step("a", vec!["c"]),
            bare_step("b", vec!["a"]),
            bare_step("c", vec!["b"]),
        ]);

        let offenders = compute_schedule(&workflow).expect_err("cycle detected");
        assert_eq!(offenders, vec!["a".to_string(), "b".into(), "c".into()]);
    }

    #[test]
    fn opposite_branches_never_share_a_parallel_group() {
        let mut condition = bare_step("cond", vec![]);
        condition.kind = StepKind::Condition;
        condition.then_steps = vec!["then-side".into()];
        condition.else_steps = vec!["else-side".into()];

        let workflow = workflow_with(vec![
            condition,
            bare_step("then-side", vec!["cond"]),
            bare_step("else-side", vec!["cond"]),
        ]);

        let schedule = compute_schedule(&workflow).expect("acyclic");
        assert_eq!(schedule.levels[1], vec!["then-side".to_string(), "else-side".to_string()]);
        assert!(
            schedule.parallel_groups.is_empty(),
            "mutually exclusive branches must not form a group: {:?}",
            schedule.parallel_groups
        );
    }

    #[test]
    fn unknown_and_self_dependencies_do_not_fake_cycles() {
        let workflow = workflow_with(vec![bare_step("a", vec!["ghost", "a"]), bare_step("b", vec!["a"])]);
        let schedule = compute_schedule(&workflow).expect("ignores unknown and self deps");
        assert_eq!(schedule.levels.len(), 2);
    }

    // Deterministic pseudo-random dependency sets: the validator must
    // reject exactly the cyclic ones. Cyclicity is checked independently
    // with a DFS.
    #[test]
    fn random_dependency_sets_are_rejected_exactly_when_cyclic() {
        let mut seed: u64 = 0x2545F4914F6CDD1D;
        for _ in 0..200 {
            let step_count = 3 + (next_random(&mut seed) % 5) as usize;
            let mut steps: Vec<Step> = (0..step_count).map(|index| bare_step(&format!("s{index}"), vec![])).collect();
            for index in 0..step_count {
                let dependency_count = (next_random(&mut seed) % 3) as usize;
                for _ in 0..dependency_count {
                    let target = (next_random(&mut seed) % step_count as u64) as usize;
                    if target != index {
                        let dependency = format!("s{target}");
                        if !steps[index].depends_on.contains(&dependency) {
                            steps[index].depends_on.push(dependency);
                        }
                    }
                }
            }

            let cyclic = has_cycle_dfs(&steps);
            let result = topo_levels(&steps);
            assert_eq!(result.is_err(), cyclic, "toposort disagrees with DFS for {steps:?}");
        }
    }

    fn next_random(state: &mut u64) -> u64 {
        // xorshift64*
        let mut value = *state;
        value ^= value >> 12;
        value ^= value << 25;
        value ^= value >> 27;
        *state = value;
        value.wrapping_mul(0x2545F4914F6CDD1D)
    }

    fn has_cycle_dfs(steps: &[Step]) -> bool {
        fn visit(
            step_id: &str,
            steps: &[Step],
            visiting: &mut std::collections::HashSet<String>,
            done: &mut std::collections::HashSet<String>,
        ) -> bool {
            if done.contains(step_id) {
                return false;
            }
            if !visiting.insert(step_id.to_string()) {
                return true;
            }
            let dependencies = steps
                .iter()
                .find(|step| step.id == step_id)
                .map(|step| step.depends_on.clone())
                .unwrap_or_default();
            for dependency in dependencies {
                if steps.iter().any(|step| step.id == dependency) && visit(&dependency, steps, visiting, done) {
                    return true;
                }
            }
            visiting.remove(step_id);
            done.insert(step_id.to_string());
            false
        }

        let mut visiting = std::collections::HashSet::new();
        let mut done = std::collections::HashSet::new();
        steps.iter().any(|step| visit(&step.id, steps, &mut visiting, &mut done))
    }
}
