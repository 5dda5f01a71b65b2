//! The planning pipeline: prompt, call, parse, vet.

use std::sync::Arc;
use std::time::Duration;

use skein_registry::SharedRegistry;
use skein_util::retry_delay;
use tracing::{debug, warn};

use crate::candidate::{CandidateStep, parse_candidates};
use crate::client::CompletionClient;
use crate::error::PlannerError;
use crate::prompt::{build_prompt, candidate_operations};

/// Retry and backoff settings for completion calls.
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// Retries after the initial attempt; transient failures only.
    pub max_retries: u32,
    /// Base backoff delay, doubled per attempt.
    pub base_delay: Duration,
    /// Backoff ceiling.
    pub max_delay: Duration,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(2),
        }
    }
}

/// Converts natural-language requests into candidate step lists.
pub struct Planner {
    completion_client: Arc<dyn CompletionClient>,
    registry: SharedRegistry,
    config: PlannerConfig,
}

impl Planner {
    /// Creates a planner with default retry settings.
    pub fn new(completion_client: Arc<dyn CompletionClient>, registry: SharedRegistry) -> Self {
        Self::with_config(completion_client, registry, PlannerConfig::default())
    }

    /// Creates a planner with explicit retry settings.
    pub fn with_config(completion_client: Arc<dyn CompletionClient>, registry: SharedRegistry, config: PlannerConfig) -> Self {
        Self {
            completion_client,
            registry,
            config,
        }
    }

    /// Plans candidate steps for a request.
    ///
    /// The candidate list is unvalidated structure: the graph builder owns
    /// id assignment, dependency derivation, and every structural check.
    pub async fn plan(&self, request_text: &str) -> Result<Vec<CandidateStep>, PlannerError> {
        let trimmed_request = request_text.trim();
        if trimmed_request.is_empty() {
            return Err(PlannerError::IncompleteRequest {
                suggestions: vec!["describe what should happen, including the triggering event and the actions to take".into()],
            });
        }

        // Assemble the prompt under the read guard, then drop it before any
        // await point.
        let prompt = {
            let registry = self.registry.read().map_err(|error| PlannerError::Unavailable {
                attempts: 0,
                message: format!("operation catalog unavailable: {error}"),
            })?;
            let operations = candidate_operations(&registry, trimmed_request);
            build_prompt(trimmed_request, &operations)
        };

        let completion_text = self.complete_with_retry(&prompt).await?;
        let candidates = parse_candidates(&completion_text).map_err(|message| PlannerError::MalformedResponse { message })?;
        self.vet(candidates)
    }

    async fn complete_with_retry(&self, prompt: &str) -> Result<String, PlannerError> {
        let total_attempts = self.config.max_retries + 1;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.completion_client.complete(prompt).await {
                Ok(text) => {
                    debug!(attempt, "completion call succeeded");
                    return Ok(text);
                }
                Err(error) if error.is_transient() && attempt < total_attempts => {
                    let delay = retry_delay(attempt, self.config.base_delay, self.config.max_delay);
                    warn!(attempt, delay_ms = delay.as_millis() as u64, %error, "transient completion failure; backing off");
                    tokio::time::sleep(delay).await;
                }
                Err(error) => {
                    return Err(PlannerError::Unavailable {
                        attempts: attempt,
                        message: error.to_string(),
                    });
                }
            }
        }
    }

    /// Rejects candidate lists that cannot become a workflow, with concrete
    /// suggestions instead of silently dropping anything.
    fn vet(&self, candidates: Vec<CandidateStep>) -> Result<Vec<CandidateStep>, PlannerError> {
        if candidates.is_empty() {
            return Err(PlannerError::IncompleteRequest {
                suggestions: vec![
                    "specify the triggering event that should start the automation".into(),
                    "name at least one action to perform, such as a notification target".into(),
                ],
            });
        }

        let registry = self.registry.read().map_err(|error| PlannerError::Unavailable {
            attempts: 0,
            message: format!("operation catalog unavailable: {error}"),
        })?;

        let mut suggestions = Vec::new();
        for candidate in &candidates {
            if registry.contains(&candidate.operation) {
                continue;
            }
            let nearest = registry
                .search(&candidate.operation.replace('_', " "), 1)
                .into_iter()
                .next()
                .map(|hit| hit.qualified_name);
            match nearest {
                Some(qualified_name) => {
                    suggestions.push(format!(
                        "operation '{}' is not connected; did you mean '{}'?",
                        candidate.operation, qualified_name
                    ));
                }
                None => suggestions.push(format!(
                    "operation '{}' is not connected; connect the provider or rephrase the action",
                    candidate.operation
                )),
            }
        }

        if suggestions.is_empty() {
            Ok(candidates)
        } else {
            Err(PlannerError::IncompleteRequest { suggestions })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::CompletionError;
    use async_trait::async_trait;
    use skein_registry::{OperationDefinition, OperationRegistry, into_shared};
    use skein_types::{FieldKind, OperationSchema};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedClient {
        responses: Mutex<VecDeque<Result<String, CompletionError>>>,
    }

    impl ScriptedClient {
        fn new(responses: Vec<Result<String, CompletionError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
            })
        }

        fn remaining(&self) -> usize {
            self.responses.lock().expect("responses lock").len()
        }
    }

    #[async_trait]
    impl CompletionClient for ScriptedClient {
        async fn complete(&self, _prompt: &str) -> Result<String, CompletionError> {
            self.responses
                .lock()
                .expect("responses lock")
                .pop_front()
                .unwrap_or_else(|| Err(CompletionError::Network("script exhausted".into())))
        }
    }

    fn seeded_registry() -> SharedRegistry {
        let mut registry = OperationRegistry::default();
        registry
            .register(
                "tracker",
                vec![OperationDefinition {
                    name: "issue_created".into(),
                    summary: "Fires when a new issue is created".into(),
                    input_schema: OperationSchema::default(),
                    output_schema: OperationSchema::default()
                        .with_field("title", FieldKind::String, false)
                        .with_field("id", FieldKind::String, false),
                    http: None,
                }],
            )
            .expect("register tracker");
        registry
            .register(
                "chat",
                vec![OperationDefinition {
                    name: "post_message".into(),
                    summary: "Post a message to a channel".into(),
                    input_schema: OperationSchema::default()
                        .with_field("channel", FieldKind::String, true)
                        .with_field("message", FieldKind::String, true),
                    output_schema: OperationSchema::default(),
                    http: None,
                }],
            )
            .expect("register chat");
        into_shared(registry)
    }

    fn fast_config() -> PlannerConfig {
        PlannerConfig {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    fn valid_completion() -> String {
        r##"[
            {"ref": "on_issue", "operation": "tracker_issue_created"},
            {"ref": "notify", "operation": "chat_post_message",
             "parameters": {"channel": "#eng", "message": "${{ steps.on_issue.title }}"},
             "depends_on": ["on_issue"]}
        ]"##
        .to_string()
    }

    #[tokio::test]
    async fn transient_failures_are_retried_until_success() {
        let client = ScriptedClient::new(vec![
            Err(CompletionError::Status(503)),
            Err(CompletionError::Timeout),
            Ok(valid_completion()),
        ]);
        let planner = Planner::with_config(client.clone(), seeded_registry(), fast_config());

        let candidates = planner.plan("when an issue is created, notify the channel").await.expect("plan succeeds");
        assert_eq!(candidates.len(), 2);
        assert_eq!(client.remaining(), 0, "all scripted responses must be consumed");
    }

    #[tokio::test]
    async fn persistent_transient_failure_surfaces_unavailable() {
        let client = ScriptedClient::new(vec![
            Err(CompletionError::Status(500)),
            Err(CompletionError::Status(500)),
            Err(CompletionError::Status(500)),
        ]);
        let planner = Planner::with_config(client, seeded_registry(), fast_config());

        let error = planner.plan("notify the channel").await.expect_err("planner gives up");
        match error {
            PlannerError::Unavailable { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("expected Unavailable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_transient_failure_does_not_retry() {
        let client = ScriptedClient::new(vec![Err(CompletionError::Status(400)), Ok(valid_completion())]);
        let planner = Planner::with_config(client.clone(), seeded_registry(), fast_config());

        let error = planner.plan("notify the channel").await.expect_err("fails fast");
        assert!(matches!(error, PlannerError::Unavailable { attempts: 1, .. }));
        assert_eq!(client.remaining(), 1, "no retry after a non-transient failure");
    }

    #[tokio::test]
    async fn unknown_operations_are_rejected_with_a_suggestion() {
        let completion = r#"[{"ref": "notify", "operation": "chat_send_message"}]"#;
        let client = ScriptedClient::new(vec![Ok(completion.to_string())]);
        let planner = Planner::with_config(client, seeded_registry(), fast_config());

        let error = planner.plan("send a chat message").await.expect_err("unknown operation");
        match error {
            PlannerError::IncompleteRequest { suggestions } => {
                assert_eq!(suggestions.len(), 1);
                assert!(
                    suggestions[0].contains("chat_post_message"),
                    "suggestion should name the nearest operation: {suggestions:?}"
                );
            }
            other => panic!("expected IncompleteRequest, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_step_lists_are_rejected_with_suggestions() {
        let client = ScriptedClient::new(vec![Ok("[]".to_string())]);
        let planner = Planner::with_config(client, seeded_registry(), fast_config());

        let error = planner.plan("do something").await.expect_err("empty candidate list");
        match error {
            PlannerError::IncompleteRequest { suggestions } => {
                assert!(suggestions.iter().any(|suggestion| suggestion.contains("triggering event")));
            }
            other => panic!("expected IncompleteRequest, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn blank_requests_never_reach_the_service() {
        let client = ScriptedClient::new(vec![]);
        let planner = Planner::with_config(client.clone(), seeded_registry(), fast_config());

        let error = planner.plan("   ").await.expect_err("blank request");
        assert!(matches!(error, PlannerError::IncompleteRequest { .. }));
        assert_eq!(client.remaining(), 0);
    }

    #[tokio::test]
    async fn unparseable_completions_surface_malformed_response() {
        let client = ScriptedClient::new(vec![Ok("no steps for you".to_string())]);
        let planner = Planner::with_config(client, seeded_registry(), fast_config());

        let error = planner.plan("notify the channel").await.expect_err("malformed completion");
        assert!(matches!(error, PlannerError::MalformedResponse { .. }));
    }
}
