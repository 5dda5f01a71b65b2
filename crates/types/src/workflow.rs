//! Workflow, step, and data-flow edge definitions.
//!
//! A [`Workflow`] is only ever produced by the planner + graph builder
//! pipeline and mutated through full re-validation; nothing edits a graph
//! in place. Steps reference each other through `depends_on` lists and
//! derived [`DataFlowEdge`]s, and condition steps own two successor sets
//! instead of feeding a single chain.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A validated, executable automation graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Workflow {
    /// Stable workflow identifier.
    pub id: String,
    /// Human-readable name shown in listings.
    pub name: String,
    /// Optional descriptive copy.
    #[serde(default)]
    pub description: Option<String>,
    /// Steps in stable-id order (`step-1`, `step-2`, ...).
    pub steps: Vec<Step>,
    /// Derived data-flow edges; never hand-authored.
    #[serde(default)]
    pub edges: Vec<DataFlowEdge>,
    /// Lifecycle status.
    #[serde(default)]
    pub status: WorkflowStatus,
    /// Incremented on every successful save.
    #[serde(default)]
    pub version: u32,
    /// Owning user, when known.
    #[serde(default)]
    pub owner_id: Option<String>,
}

impl Workflow {
    /// Looks up a step by id.
    pub fn step(&self, step_id: &str) -> Option<&Step> {
        self.steps.iter().find(|step| step.id == step_id)
    }

    /// Edges targeting the given step.
    pub fn edges_into(&self, step_id: &str) -> impl Iterator<Item = &DataFlowEdge> {
        self.edges.iter().filter(move |edge| edge.to_step_id == step_id)
    }
}

/// Lifecycle status of a workflow definition.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Produced by the pipeline but not yet free of blocking issues.
    #[default]
    Draft,
    /// Passed full validation; eligible for execution.
    Validated,
    /// Soft-deleted on user request; retained for run history.
    Archived,
}

/// Discriminates what a step does at run time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Entry point; its output is the run's trigger payload.
    Trigger,
    /// Local data reshaping with no provider call.
    Transform,
    /// Invocation of a registered provider operation.
    ApiCall,
    /// Boolean decision point owning `then_steps` / `else_steps`.
    Condition,
    /// Explicit grouping marker for steps scheduled together.
    ParallelGroup,
}

/// A single node in the workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Step {
    /// Stable identifier assigned by the graph builder.
    pub id: String,
    /// What this step does.
    pub kind: StepKind,
    /// Registered operation this step invokes, when applicable.
    #[serde(default)]
    pub qualified_operation: Option<String>,
    /// Topological rank. Steps sharing a rank with no edge between them are
    /// eligible for concurrent execution; this is not a strict sequence
    /// number.
    #[serde(default)]
    pub order_token: u32,
    /// Named parameter bindings, preserving declaration order.
    #[serde(default)]
    pub parameters: IndexMap<String, BoundValue>,
    /// Steps that must reach `succeeded` before this one starts.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Successor set executed when a condition step resolves true.
    #[serde(default)]
    pub then_steps: Vec<String>,
    /// Successor set executed when a condition step resolves false.
    #[serde(default)]
    pub else_steps: Vec<String>,
}

impl Step {
    /// True for condition steps, which own branch successor sets.
    pub fn is_condition(&self) -> bool {
        matches!(self.kind, StepKind::Condition)
    }
}

/// A parameter binding: either a literal or a reference to an upstream
/// step's output field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BoundValue {
    /// Inline JSON value.
    Literal {
        /// The bound value.
        value: JsonValue,
    },
    /// Binding to an upstream output field, backed by a [`DataFlowEdge`].
    Reference {
        /// Producing step.
        step_id: String,
        /// Output field on the producing step's operation.
        field: String,
    },
}

impl BoundValue {
    /// Convenience constructor for literal bindings.
    pub fn literal(value: impl Into<JsonValue>) -> Self {
        BoundValue::Literal { value: value.into() }
    }

    /// Returns the literal payload, when this is a literal binding.
    pub fn as_literal(&self) -> Option<&JsonValue> {
        match self {
            BoundValue::Literal { value } => Some(value),
            BoundValue::Reference { .. } => None,
        }
    }
}

/// Derived record that one step's output field feeds another step's input.
///
/// Every edge's target step lists the source step in `depends_on`; the
/// validator enforces this invariant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DataFlowEdge {
    /// Producing step.
    pub from_step_id: String,
    /// Field on the producer's output schema.
    pub output_field: String,
    /// Consuming step.
    pub to_step_id: String,
    /// Field on the consumer's input schema.
    pub input_field: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_workflow() -> Workflow {
        Workflow {
            id: "wf-1".into(),
            name: "notify on issue".into(),
            description: None,
            steps: vec![
                Step {
                    id: "step-1".into(),
                    kind: StepKind::Trigger,
                    qualified_operation: Some("tracker_issue_created".into()),
                    order_token: 0,
                    parameters: IndexMap::new(),
                    depends_on: vec![],
                    then_steps: vec![],
                    else_steps: vec![],
                },
                Step {
                    id: "step-2".into(),
                    kind: StepKind::ApiCall,
                    qualified_operation: Some("chat_post_message".into()),
                    order_token: 1,
                    parameters: IndexMap::from([(
                        "message".to_string(),
                        BoundValue::Reference {
                            step_id: "step-1".into(),
                            field: "title".into(),
                        },
                    )]),
                    depends_on: vec!["step-1".into()],
                    then_steps: vec![],
                    else_steps: vec![],
                },
            ],
            edges: vec![DataFlowEdge {
                from_step_id: "step-1".into(),
                output_field: "title".into(),
                to_step_id: "step-2".into(),
                input_field: "message".into(),
            }],
            status: WorkflowStatus::Validated,
            version: 1,
            owner_id: None,
        }
    }

    #[test]
    fn step_lookup_and_edge_filtering() {
        let workflow = sample_workflow();
        assert!(workflow.step("step-2").is_some());
        assert!(workflow.step("step-9").is_none());

        let incoming: Vec<&DataFlowEdge> = workflow.edges_into("step-2").collect();
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].output_field, "title");
    }

    #[test]
    fn bound_value_serialization_is_tagged() {
        let reference = BoundValue::Reference {
            step_id: "step-1".into(),
            field: "title".into(),
        };
        let encoded = serde_json::to_value(&reference).expect("serialize binding");
        assert_eq!(encoded["type"], "reference");
        assert_eq!(encoded["step_id"], "step-1");

        let literal = BoundValue::literal("general");
        let encoded = serde_json::to_value(&literal).expect("serialize literal");
        assert_eq!(encoded["type"], "literal");
        assert_eq!(encoded["value"], "general");
    }

    #[test]
    fn workflow_round_trips_through_yaml() {
        let workflow = sample_workflow();
        let text = serde_yaml::to_string(&workflow).expect("serialize workflow");
        let decoded: Workflow = serde_yaml::from_str(&text).expect("deserialize workflow");
        assert_eq!(decoded, workflow);
    }
}
