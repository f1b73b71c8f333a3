//! The orchestrator: sequences every node, applies `StateDelta` merge
//! semantics, evaluates conditional edges, and enforces the step budget.
//!
//! Grounded on the fan-out orchestrator's `Orchestrator::query` pipeline
//! (sequential staged pipeline, `Arc`-shared collaborators) and the CRAG
//! agent's cyclic conditional-routing shape (`route_by_quality`'s
//! threshold-gated loop back to `search`), generalized here into a full
//! directed graph with ten node kinds instead of four.

use std::collections::VecDeque;
use std::sync::Arc;

use futures_util::stream::{self, Stream};
use tracing::{debug, info_span, warn};

use crate::config::OrchestratorConfig;
use crate::embedding::Embedder;
use crate::error::{OrchestrationError, Result};
use crate::executor::SubtaskExecutor;
use crate::filter::FilterGenerator;
use crate::model::ModelProvider;
use crate::planner::Planner;
use crate::quality::{AnswerGrader, HallucinationChecker};
use crate::router::{ContextResolver, DirectResponder, Router};
use crate::search::{HybridRetriever, RetrieverConfig};
use crate::state::{QueryType, SubtaskStatus, TurnState, StateDelta, WorkflowStatus};
use crate::store::Store;
use crate::synthesizer::{Synthesizer, next_retry_mode, RetryMode};
use crate::web::{WebFallback, WebSearchTool};

/// One event emitted by [`Orchestrator::stream`] per node transition.
///
/// Payloads are kept to owned, serializable primitives (node names as
/// strings, the turn id, the step ordinal, and a [`StateDelta`] snapshot)
/// since no specific transport is mandated for this surface — a caller
/// wiring this onto SSE, a websocket, or NDJSON only needs to serialize
/// each variant.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TurnEvent {
    /// A node began executing.
    NodeEntered {
        /// Debug name of the node (e.g. `"Planner"`).
        node: String,
        /// The turn this event belongs to.
        turn_id: String,
        /// Step ordinal, matching [`TurnState::iteration_count`] before
        /// this node ran.
        step: usize,
    },
    /// A node finished executing and its delta was merged into the turn
    /// state.
    NodeCompleted {
        /// Debug name of the node that just completed.
        node: String,
        /// The turn this event belongs to.
        turn_id: String,
        /// Step ordinal, matching the paired `NodeEntered` event.
        step: usize,
    },
    /// The [`StateDelta`] a node produced, emitted between its `NodeEntered`
    /// and `NodeCompleted` events.
    StateDelta {
        /// The turn this event belongs to.
        turn_id: String,
        /// Step ordinal this delta was produced at.
        step: usize,
        /// The delta itself.
        delta: StateDelta,
    },
    /// The turn reached a terminal status; no further events follow.
    Terminal {
        /// The turn this event belongs to.
        turn_id: String,
        /// The final workflow status.
        status: WorkflowStatus,
    },
}

/// A node in the orchestrator's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Node {
    Router,
    ContextResolver,
    DirectResponder,
    Planner,
    SubtaskExecutor,
    Retriever,
    WebFallback,
    Synthesizer,
    HallucinationChecker,
    AnswerGrader,
}

/// Where control flows after a node finishes.
enum Route {
    Next(Node),
    Terminal(WorkflowStatus),
}

/// Generator state threaded through [`Orchestrator::stream`]'s
/// `stream::unfold`: the evolving turn state, the next node to run (`None`
/// once terminal), the step budget, and a small queue of events already
/// produced but not yet yielded to the caller.
struct StreamCtx {
    state: TurnState,
    node: Option<Node>,
    step_budget: usize,
    pending: VecDeque<TurnEvent>,
}

/// Words that mark a query as time-sensitive, gating the direct responder's
/// optional web-search assist.
const TIME_SENSITIVE_CUES: &[&str] = &["today", "now", "currently", "latest", "this week", "right now"];

/// Coordinates the full retrieval-and-synthesis pipeline for one turn.
pub struct Orchestrator {
    config: OrchestratorConfig,
    router: Router,
    context_resolver: ContextResolver,
    direct_responder: DirectResponder,
    planner: Planner,
    executor: SubtaskExecutor,
    retriever: HybridRetriever,
    web: Option<Arc<WebFallback>>,
    synthesizer: Synthesizer,
    hallucination_checker: HallucinationChecker,
    grader: AnswerGrader,
}

impl Orchestrator {
    /// Builds an orchestrator over the given collaborators.
    ///
    /// `web_tool` is only consulted when `config.web_enabled` is `true`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::ConfigError::OutOfRange`] if `config` fails
    /// [`OrchestratorConfig::validate`].
    pub fn new(
        config: OrchestratorConfig,
        store: Arc<dyn Store>,
        embedder: Arc<dyn Embedder>,
        provider: Arc<dyn ModelProvider>,
        web_tool: Option<Arc<dyn WebSearchTool>>,
    ) -> Result<Self> {
        config.validate()?;

        let filter_generator = FilterGenerator::new(Arc::clone(&provider), Arc::clone(&store), config.filter_entity_aggressive);
        let retriever = HybridRetriever::new(store, embedder, RetrieverConfig::from(&config));
        let web = if config.web_enabled {
            web_tool.map(|tool| Arc::new(WebFallback::new(tool, config.web_daily_quota)))
        } else {
            None
        };

        Ok(Self {
            router: Router::new(Arc::clone(&provider)),
            context_resolver: ContextResolver::new(Arc::clone(&provider)),
            direct_responder: DirectResponder::new(Arc::clone(&provider)),
            planner: Planner::new(Arc::clone(&provider), config.max_subtasks),
            executor: SubtaskExecutor::new(Arc::clone(&provider), filter_generator),
            retriever,
            web,
            synthesizer: Synthesizer::new(Arc::clone(&provider)),
            hallucination_checker: HallucinationChecker::new(Arc::clone(&provider), config.threshold_hallucination),
            grader: AnswerGrader::new(provider, config.threshold_grade),
            config,
        })
    }

    /// Runs the full pipeline for `query` to a terminal [`TurnState`].
    ///
    /// Node-local failures are captured as `TurnState::error` and a
    /// `failed` workflow status rather than propagated; this only returns
    /// `Err` for invalid input (an empty query) before any state exists.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestrationError::InvalidInput`] if `query` is empty.
    pub async fn run(&self, query: &str) -> Result<TurnState> {
        if query.trim().is_empty() {
            return Err(OrchestrationError::InvalidInput {
                message: "query must not be empty".to_string(),
            }
            .into());
        }

        let mut state = TurnState::new(query, self.config.max_retries);
        let step_budget = self.config.step_budget();
        let mut node = if self.config.routing_enabled { Node::Router } else { Node::Planner };

        loop {
            if state.iteration_count >= step_budget {
                warn!(step = state.iteration_count, step_budget, "step budget exceeded");
                state.workflow_status = WorkflowStatus::Failed;
                state.error = Some("step_budget_exceeded".to_string());
                break;
            }

            let span = info_span!("node", name = ?node, turn_id = %state.turn_id, step = state.iteration_count);
            let _enter = span.enter();

            let delta = self.run_node(node, &state).await;
            state.apply_delta(delta);

            match self.next_node(node, &state) {
                Route::Next(next) => node = next,
                Route::Terminal(status) => {
                    debug!(?status, "turn reached terminal state");
                    if state.workflow_status == WorkflowStatus::Running {
                        state.workflow_status = status;
                    }
                    break;
                }
            }
        }

        Ok(state)
    }

    /// Runs the same pipeline as [`Orchestrator::run`], but returns a
    /// [`Stream`] of [`TurnEvent`]s — one `node_entered`/`state_delta`/
    /// `node_completed` triple per node, followed by a single `terminal`
    /// event — instead of only the final [`TurnState`].
    ///
    /// # Errors
    ///
    /// Returns [`OrchestrationError::InvalidInput`] if `query` is empty,
    /// before the stream is constructed.
    pub fn stream<'a>(&'a self, query: &str) -> Result<impl Stream<Item = TurnEvent> + 'a> {
        if query.trim().is_empty() {
            return Err(OrchestrationError::InvalidInput {
                message: "query must not be empty".to_string(),
            }
            .into());
        }

        let state = TurnState::new(query, self.config.max_retries);
        let step_budget = self.config.step_budget();
        let node = if self.config.routing_enabled { Node::Router } else { Node::Planner };

        let ctx = StreamCtx {
            state,
            node: Some(node),
            step_budget,
            pending: VecDeque::new(),
        };

        Ok(stream::unfold(ctx, move |mut ctx| async move {
            loop {
                if let Some(event) = ctx.pending.pop_front() {
                    return Some((event, ctx));
                }

                let Some(node) = ctx.node else { return None };
                let turn_id = ctx.state.turn_id.clone();

                if ctx.state.iteration_count >= ctx.step_budget {
                    warn!(step = ctx.state.iteration_count, step_budget = ctx.step_budget, "step budget exceeded");
                    ctx.state.workflow_status = WorkflowStatus::Failed;
                    ctx.state.error = Some("step_budget_exceeded".to_string());
                    ctx.node = None;
                    ctx.pending.push_back(TurnEvent::Terminal { turn_id, status: WorkflowStatus::Failed });
                    continue;
                }

                let step = ctx.state.iteration_count;
                let span = info_span!("node", name = ?node, turn_id = %turn_id, step);
                ctx.pending.push_back(TurnEvent::NodeEntered { node: format!("{node:?}"), turn_id: turn_id.clone(), step });

                let delta = {
                    let _enter = span.enter();
                    self.run_node(node, &ctx.state).await
                };
                ctx.pending.push_back(TurnEvent::StateDelta { turn_id: turn_id.clone(), step, delta: delta.clone() });
                ctx.state.apply_delta(delta);
                ctx.pending.push_back(TurnEvent::NodeCompleted { node: format!("{node:?}"), turn_id: turn_id.clone(), step });

                match self.next_node(node, &ctx.state) {
                    Route::Next(next) => ctx.node = Some(next),
                    Route::Terminal(status) => {
                        debug!(?status, "turn reached terminal state");
                        if ctx.state.workflow_status == WorkflowStatus::Running {
                            ctx.state.workflow_status = status;
                        }
                        ctx.node = None;
                        ctx.pending.push_back(TurnEvent::Terminal { turn_id, status: ctx.state.workflow_status });
                    }
                }
            }
        }))
    }

    async fn run_node(&self, node: Node, state: &TurnState) -> StateDelta {
        match node {
            Node::Router => self.router_node(state).await,
            Node::ContextResolver => self.context_resolver_node(state).await,
            Node::DirectResponder => self.direct_responder_node(state).await,
            Node::Planner => self.planner_node(state).await,
            Node::SubtaskExecutor => self.subtask_executor_node(state).await,
            Node::Retriever => self.retriever_node(state).await,
            Node::WebFallback => self.web_fallback_node(state).await,
            Node::Synthesizer => self.synthesizer_node(state).await,
            Node::HallucinationChecker => self.hallucination_checker_node(state).await,
            Node::AnswerGrader => self.answer_grader_node(state).await,
        }
    }

    fn next_node(&self, node: Node, state: &TurnState) -> Route {
        match node {
            Node::Router => match state.query_type {
                Some(QueryType::Simple) => Route::Next(Node::DirectResponder),
                Some(QueryType::HistoryRequired) => Route::Next(Node::ContextResolver),
                _ => Route::Next(Node::Planner),
            },
            Node::ContextResolver => Route::Next(Node::Planner),
            Node::DirectResponder => Route::Terminal(WorkflowStatus::Completed),
            Node::Planner => Route::Next(Node::SubtaskExecutor),
            Node::SubtaskExecutor => self.subtask_advance(state),
            Node::Retriever => {
                if self.needs_web(state) {
                    Route::Next(Node::WebFallback)
                } else {
                    Route::Next(Node::SubtaskExecutor)
                }
            }
            Node::WebFallback => Route::Next(Node::SubtaskExecutor),
            Node::Synthesizer => Route::Next(Node::HallucinationChecker),
            Node::HallucinationChecker => self.hallucination_decision(state),
            Node::AnswerGrader => self.grade_decision(state),
        }
    }

    // -- nodes ----------------------------------------------------------

    async fn router_node(&self, state: &TurnState) -> StateDelta {
        let query_type = self.router.classify(state.effective_query(), &state.messages).await;
        StateDelta { query_type: Some(query_type), ..StateDelta::empty() }
    }

    async fn context_resolver_node(&self, state: &TurnState) -> StateDelta {
        let enhanced = self.context_resolver.resolve(&state.query, &state.messages).await;
        StateDelta { enhanced_query: Some(enhanced), ..StateDelta::empty() }
    }

    async fn direct_responder_node(&self, state: &TurnState) -> StateDelta {
        let time_sensitive =
            TIME_SENSITIVE_CUES.iter().any(|cue| state.effective_query().to_lowercase().contains(cue));
        match self.direct_responder.respond(state.effective_query(), time_sensitive, self.web.as_deref()).await {
            Ok(answer) => StateDelta { final_answer: Some(answer), ..StateDelta::empty() },
            Err(err) => StateDelta {
                error: Some(err.to_string()),
                workflow_status: Some(WorkflowStatus::Failed),
                ..StateDelta::empty()
            },
        }
    }

    async fn planner_node(&self, state: &TurnState) -> StateDelta {
        match self.planner.plan(state.effective_query()).await {
            Ok(subtasks) => StateDelta {
                subtasks: Some(subtasks),
                current_subtask_idx: Some(0),
                ..StateDelta::empty()
            },
            Err(err) => StateDelta {
                error: Some(err.to_string()),
                workflow_status: Some(WorkflowStatus::Failed),
                ..StateDelta::empty()
            },
        }
    }

    async fn subtask_executor_node(&self, state: &TurnState) -> StateDelta {
        if state.error.is_some() {
            return StateDelta::empty();
        }

        let mut subtasks = state.subtasks.clone();
        let mut idx = state.current_subtask_idx;
        if idx < subtasks.len() && matches!(subtasks[idx].status, SubtaskStatus::Completed | SubtaskStatus::Failed) {
            idx += 1;
        }
        if idx >= subtasks.len() {
            return StateDelta { current_subtask_idx: Some(idx), ..StateDelta::empty() };
        }

        match self.executor.execute(&subtasks[idx]).await {
            Ok(plan) => {
                subtasks[idx].variations = plan.variations;
                subtasks[idx].filter = plan.filter;
                subtasks[idx].keyword_expression = plan.keyword_expression;
                subtasks[idx].status = SubtaskStatus::Executing;
                StateDelta {
                    subtasks: Some(subtasks),
                    current_subtask_idx: Some(idx),
                    warnings: plan.warnings,
                    ..StateDelta::empty()
                }
            }
            Err(err) => {
                subtasks[idx].status = SubtaskStatus::Failed;
                StateDelta {
                    subtasks: Some(subtasks),
                    current_subtask_idx: Some(idx),
                    error: Some(err.to_string()),
                    ..StateDelta::empty()
                }
            }
        }
    }

    fn subtask_advance(&self, state: &TurnState) -> Route {
        if state.error.is_some() {
            Route::Terminal(WorkflowStatus::Failed)
        } else if state.current_subtask_idx >= state.subtasks.len() || state.workflow_status == WorkflowStatus::Completed {
            Route::Next(Node::Synthesizer)
        } else {
            Route::Next(Node::Retriever)
        }
    }

    async fn retriever_node(&self, state: &TurnState) -> StateDelta {
        let idx = state.current_subtask_idx;
        let Some(subtask) = state.subtasks.get(idx) else {
            return StateDelta::empty();
        };

        match self.retriever.retrieve(&subtask.variations, &subtask.keyword_expression, &subtask.filter).await {
            Ok(documents) => {
                let mut subtasks = state.subtasks.clone();
                subtasks[idx].documents = documents.clone();
                subtasks[idx].status = SubtaskStatus::Completed;
                let mut warnings = Vec::new();
                if documents.is_empty() {
                    warnings.push(format!("subtask {} retrieval returned zero documents", subtask.id));
                }
                StateDelta { subtasks: Some(subtasks), documents, warnings, ..StateDelta::empty() }
            }
            Err(err) => {
                let mut subtasks = state.subtasks.clone();
                subtasks[idx].status = SubtaskStatus::Failed;
                StateDelta { subtasks: Some(subtasks), error: Some(err.to_string()), ..StateDelta::empty() }
            }
        }
    }

    fn needs_web(&self, state: &TurnState) -> bool {
        let Some(web) = self.web.as_ref() else { return false };
        let _ = web;
        if !self.config.web_enabled {
            return false;
        }
        let require_web = state
            .metadata
            .get("require_web")
            .and_then(crate::state::MetadataValue::as_bool)
            .unwrap_or(false);
        let Some(subtask) = state.subtasks.get(state.current_subtask_idx) else {
            return false;
        };
        subtask.documents.len() < self.config.web_fallback_threshold || require_web
    }

    async fn web_fallback_node(&self, state: &TurnState) -> StateDelta {
        let idx = state.current_subtask_idx;
        let (Some(web), Some(subtask)) = (self.web.as_ref(), state.subtasks.get(idx)) else {
            return StateDelta::empty();
        };

        let (documents, warning) = web.search(&subtask.query, self.config.top_k).await;
        if documents.is_empty() {
            return StateDelta { warnings: warning.into_iter().collect(), ..StateDelta::empty() };
        }

        let mut subtasks = state.subtasks.clone();
        subtasks[idx].documents.extend(documents.clone());
        StateDelta {
            subtasks: Some(subtasks),
            documents,
            clear_error: true,
            workflow_status: Some(WorkflowStatus::Running),
            ..StateDelta::empty()
        }
    }

    async fn synthesizer_node(&self, state: &TurnState) -> StateDelta {
        let retry = next_retry_mode(state.hallucination_report.as_ref(), state.grade_report.as_ref());
        let mode = retry.unwrap_or(RetryMode::Initial);
        let is_retry = retry.is_some();
        let suggestions = state.grade_report.as_ref().map(|r| r.suggestions.clone()).unwrap_or_default();

        match self.synthesizer.synthesize(state.effective_query(), &state.documents, mode, &suggestions).await {
            Ok(answer) => StateDelta {
                intermediate_answer: Some(answer.text.clone()),
                final_answer: Some(answer.text),
                confidence: Some(answer.confidence),
                increment_retry_count: is_retry,
                clear_error: true,
                ..StateDelta::empty()
            },
            Err(err) => StateDelta {
                error: Some(err.to_string()),
                workflow_status: Some(WorkflowStatus::Failed),
                increment_retry_count: is_retry,
                ..StateDelta::empty()
            },
        }
    }

    async fn hallucination_checker_node(&self, state: &TurnState) -> StateDelta {
        let answer = state.final_answer.clone().unwrap_or_default();
        match self.hallucination_checker.check(&answer, &state.documents).await {
            Ok(report) => StateDelta { hallucination_report: Some(report), ..StateDelta::empty() },
            Err(err) => StateDelta {
                error: Some(err.to_string()),
                workflow_status: Some(WorkflowStatus::Failed),
                ..StateDelta::empty()
            },
        }
    }

    fn hallucination_decision(&self, state: &TurnState) -> Route {
        let Some(report) = state.hallucination_report.as_ref() else {
            return Route::Terminal(WorkflowStatus::Failed);
        };
        if report.is_valid {
            Route::Next(Node::AnswerGrader)
        } else if report.needs_retry && state.retry_count < state.max_retries {
            Route::Next(Node::Synthesizer)
        } else {
            Route::Terminal(WorkflowStatus::Failed)
        }
    }

    async fn answer_grader_node(&self, state: &TurnState) -> StateDelta {
        let answer = state.final_answer.clone().unwrap_or_default();
        match self.grader.grade(state.effective_query(), &answer).await {
            Ok(report) => StateDelta { grade_report: Some(report), ..StateDelta::empty() },
            Err(err) => StateDelta {
                error: Some(err.to_string()),
                workflow_status: Some(WorkflowStatus::Failed),
                ..StateDelta::empty()
            },
        }
    }

    fn grade_decision(&self, state: &TurnState) -> Route {
        let Some(report) = state.grade_report.as_ref() else {
            return Route::Terminal(WorkflowStatus::Failed);
        };
        if report.is_valid {
            Route::Terminal(WorkflowStatus::Completed)
        } else if report.needs_retry && state.retry_count < state.max_retries {
            Route::Next(Node::Synthesizer)
        } else {
            Route::Terminal(WorkflowStatus::Failed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::FallbackEmbedder;
    use crate::model::mock::{MockModelProvider, ScriptedResponse};
    use crate::state::{Category, Document, DocumentMetadata};
    use crate::store::memory::InMemoryStore;
    use serde_json::json;

    fn doc(id: &str, content: &str) -> Document {
        Document::new(
            id,
            content,
            DocumentMetadata {
                source: "manual.pdf".to_string(),
                page: 1,
                category: Category::Paragraph,
                caption: None,
                entity: None,
                human_feedback: None,
                image_path: None,
            },
        )
    }

    fn seeded_store() -> Arc<dyn Store> {
        let mut store = InMemoryStore::new();
        store.insert(doc("a", "the warranty period is two years"), vec![1.0, 0.0, 0.0]);
        store.insert(doc("b", "the warranty covers manufacturing defects"), vec![0.9, 0.1, 0.0]);
        Arc::new(store)
    }

    fn config() -> OrchestratorConfig {
        OrchestratorConfig::default().with_routing_enabled(false).with_max_subtasks(1).with_max_retries(2)
    }

    #[tokio::test]
    async fn test_run_completes_with_valid_retrieval_and_synthesis() {
        let provider = Arc::new(MockModelProvider::new(vec![
            ScriptedResponse::Json(json!({"subtasks": [{"query": "warranty period"}]})),
            ScriptedResponse::Json(json!({"variations": ["how long is the warranty"]})),
            ScriptedResponse::Json(json!({})),
            ScriptedResponse::Json(json!({"text": "The warranty is two years [1].", "confidence": 0.9})),
            ScriptedResponse::Json(json!({"unsupported_claims": [], "total_claims": 1})),
            ScriptedResponse::Json(json!({
                "completeness": 0.9, "relevance": 0.9, "clarity": 0.9, "accuracy": 0.9,
            })),
        ]));
        let orchestrator = Orchestrator::new(
            config(),
            seeded_store(),
            Arc::new(FallbackEmbedder::new(3)),
            provider,
            None,
        )
        .unwrap();

        let state = orchestrator.run("what is the warranty period").await.unwrap();
        assert_eq!(state.workflow_status, WorkflowStatus::Completed);
        assert!(state.final_answer.unwrap().contains("two years"));
    }

    #[tokio::test]
    async fn test_run_retries_once_on_hallucination_then_accepts() {
        let provider = Arc::new(MockModelProvider::new(vec![
            ScriptedResponse::Json(json!({"subtasks": [{"query": "warranty period"}]})),
            ScriptedResponse::Json(json!({"variations": ["how long is the warranty"]})),
            ScriptedResponse::Json(json!({})),
            ScriptedResponse::Json(json!({"text": "Unsupported guess.", "confidence": 0.5})),
            ScriptedResponse::Json(json!({"unsupported_claims": ["guess"], "total_claims": 1})),
            ScriptedResponse::Json(json!({"text": "The warranty is two years [1].", "confidence": 0.9})),
            ScriptedResponse::Json(json!({"unsupported_claims": [], "total_claims": 1})),
            ScriptedResponse::Json(json!({
                "completeness": 0.9, "relevance": 0.9, "clarity": 0.9, "accuracy": 0.9,
            })),
        ]));
        let orchestrator = Orchestrator::new(
            config(),
            seeded_store(),
            Arc::new(FallbackEmbedder::new(3)),
            provider,
            None,
        )
        .unwrap();

        let state = orchestrator.run("what is the warranty period").await.unwrap();
        assert_eq!(state.workflow_status, WorkflowStatus::Completed);
        assert_eq!(state.retry_count, 1);
    }

    #[tokio::test]
    async fn test_run_fails_when_retries_exhausted() {
        let mut responses = vec![
            ScriptedResponse::Json(json!({"subtasks": [{"query": "warranty period"}]})),
            ScriptedResponse::Json(json!({"variations": ["how long is the warranty"]})),
            ScriptedResponse::Json(json!({})),
        ];
        for _ in 0..3 {
            responses.push(ScriptedResponse::Json(json!({"text": "Unsupported guess.", "confidence": 0.5})));
            responses.push(ScriptedResponse::Json(json!({"unsupported_claims": ["guess"], "total_claims": 1})));
        }
        let provider = Arc::new(MockModelProvider::new(responses));
        let orchestrator = Orchestrator::new(
            config().with_max_retries(2),
            seeded_store(),
            Arc::new(FallbackEmbedder::new(3)),
            provider,
            None,
        )
        .unwrap();

        let state = orchestrator.run("what is the warranty period").await.unwrap();
        assert_eq!(state.workflow_status, WorkflowStatus::Failed);
    }

    #[tokio::test]
    async fn test_run_empty_query_is_rejected() {
        let orchestrator = Orchestrator::new(
            config(),
            seeded_store(),
            Arc::new(FallbackEmbedder::new(3)),
            Arc::new(MockModelProvider::new(vec![])),
            None,
        )
        .unwrap();
        assert!(orchestrator.run("   ").await.is_err());
    }

    #[tokio::test]
    async fn test_run_sparse_retrieval_triggers_web_fallback() {
        let provider = Arc::new(MockModelProvider::new(vec![
            ScriptedResponse::Json(json!({"subtasks": [{"query": "rare topic"}]})),
            ScriptedResponse::Json(json!({"variations": ["rare topic details"]})),
            ScriptedResponse::Json(json!({})),
            ScriptedResponse::Json(json!({"text": "Answer from the web [1].", "confidence": 0.8})),
            ScriptedResponse::Json(json!({"unsupported_claims": [], "total_claims": 1})),
            ScriptedResponse::Json(json!({
                "completeness": 0.9, "relevance": 0.9, "clarity": 0.9, "accuracy": 0.9,
            })),
        ]));
        let empty_store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let web_tool = Arc::new(crate::web::mock::MockWebSearchTool::new(vec![(
            "https://example.com".to_string(),
            "Example".to_string(),
            "a relevant snippet".to_string(),
        )]));
        let orchestrator = Orchestrator::new(
            config().with_web_enabled(true),
            empty_store,
            Arc::new(FallbackEmbedder::new(3)),
            provider,
            Some(web_tool),
        )
        .unwrap();

        let state = orchestrator.run("rare topic").await.unwrap();
        assert_eq!(state.workflow_status, WorkflowStatus::Completed);
        assert!(state.documents.iter().any(|d| d.metadata.category == Category::Web));
    }

    #[tokio::test]
    async fn test_stream_emits_node_events_and_terminal() {
        use futures_util::StreamExt;

        let provider = Arc::new(MockModelProvider::new(vec![
            ScriptedResponse::Json(json!({"subtasks": [{"query": "warranty period"}]})),
            ScriptedResponse::Json(json!({"variations": ["how long is the warranty"]})),
            ScriptedResponse::Json(json!({})),
            ScriptedResponse::Json(json!({"text": "The warranty is two years [1].", "confidence": 0.9})),
            ScriptedResponse::Json(json!({"unsupported_claims": [], "total_claims": 1})),
            ScriptedResponse::Json(json!({
                "completeness": 0.9, "relevance": 0.9, "clarity": 0.9, "accuracy": 0.9,
            })),
        ]));
        let orchestrator = Orchestrator::new(
            config(),
            seeded_store(),
            Arc::new(FallbackEmbedder::new(3)),
            provider,
            None,
        )
        .unwrap();

        let events: Vec<TurnEvent> = orchestrator.stream("what is the warranty period").unwrap().collect().await;

        assert!(events.iter().any(|e| matches!(e, TurnEvent::NodeEntered { node, .. } if node == "Planner")));
        assert!(events.iter().any(|e| matches!(e, TurnEvent::StateDelta { .. })));
        let terminal = events.iter().filter(|e| matches!(e, TurnEvent::Terminal { .. })).count();
        assert_eq!(terminal, 1);
        assert!(matches!(events.last(), Some(TurnEvent::Terminal { status: WorkflowStatus::Completed, .. })));
    }

    #[tokio::test]
    async fn test_stream_rejects_empty_query() {
        let orchestrator = Orchestrator::new(
            config(),
            seeded_store(),
            Arc::new(FallbackEmbedder::new(3)),
            Arc::new(MockModelProvider::new(vec![])),
            None,
        )
        .unwrap();
        assert!(orchestrator.stream("   ").is_err());
    }
}
