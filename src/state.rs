//! The shared data model passed between orchestrator nodes.
//!
//! Mirrors the teacher's `core::context::Context`/`ContextValue` shape (a
//! serde-tagged enum for free-form metadata plus timestamp bookkeeping) and
//! `core::chunk::Chunk` (typed fields plus a nested metadata struct), but
//! models a single in-flight QA turn rather than a persistent REPL context.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

static TURN_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generates a process-unique turn id: a Unix-seconds timestamp plus a
/// monotonic counter, so concurrently started turns never collide.
fn generate_turn_id() -> String {
    let seconds = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
    let ordinal = TURN_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("turn-{seconds}-{ordinal}")
}

/// Language label attached to a query variation, selecting which
/// dense-vector column and lexical tokenizer a [`crate::store::Store`]
/// implementation should use for that variation. This crate's in-memory
/// reference store accepts and records the label but treats both
/// identically, since it keeps no language-specific columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    /// Korean text: content morphemes are extracted by a Hangul-vs-Latin
    /// script-ratio heuristic rather than a true morphological analyzer.
    Korean,
    /// English text.
    English,
}

/// A detected or generated query variation paired with its language label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variation {
    /// The variation's text.
    pub text: String,
    /// The language it was detected or generated in.
    pub language: Language,
}

/// One of the 14 fixed structural tags a [`Document`] may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Top-level heading.
    Heading1,
    /// Second-level heading.
    Heading2,
    /// Third-level heading.
    Heading3,
    /// Ordinary paragraph text.
    Paragraph,
    /// A list (ordered or unordered).
    List,
    /// A table.
    Table,
    /// A figure or image.
    Figure,
    /// A chart or graph.
    Chart,
    /// A mathematical equation.
    Equation,
    /// A caption attached to a figure/table/chart.
    Caption,
    /// A footnote.
    Footnote,
    /// A page header.
    Header,
    /// A page footer.
    Footer,
    /// A bibliographic reference entry.
    Reference,
    /// A result originating from the web fallback, not the document store.
    Web,
}

/// Free-form structured annotation attached to a [`Document`].
///
/// `type_` is not a closed Rust enum: the vocabulary is discovered from
/// live store metadata at runtime (see [`crate::store::StoreMetadata`]),
/// so it must remain an opaque owned string, including non-ASCII literals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// The entity type, as discovered from store metadata (e.g. `"image"`,
    /// `"table"`, `"embedded_doc"`, or any other live-discovered literal).
    #[serde(rename = "type")]
    pub type_: String,
    /// Human-readable title.
    pub title: String,
    /// Free-text details.
    pub details: String,
    /// Salient keywords.
    pub keywords: Vec<String>,
    /// Optional hypothetical questions this entity could answer.
    pub hypothetical_questions: Option<Vec<String>>,
}

/// Structured metadata carried by every [`Document`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Origin identifier (e.g. a source filename or document title).
    pub source: String,
    /// Page ordinal within the source.
    pub page: u32,
    /// Structural category of this document fragment.
    pub category: Category,
    /// Optional caption text.
    pub caption: Option<String>,
    /// Optional structured entity annotation.
    pub entity: Option<Entity>,
    /// Optional human-verified replacement/annotation text.
    pub human_feedback: Option<String>,
    /// Optional path to an associated image.
    pub image_path: Option<String>,
}

/// The unit returned by retrieval and consumed by synthesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Stable identifier, unique within the document store.
    pub id: String,
    /// Primary text content.
    pub content: String,
    /// Structured metadata.
    pub metadata: DocumentMetadata,
    /// Dense-search cosine similarity in `[0, 1]`, if this result came from
    /// a dense search pass.
    pub similarity: Option<f32>,
    /// Ordinal rank from a lexical search pass, if applicable.
    pub lexical_rank: Option<usize>,
    /// Fused score after Reciprocal Rank Fusion.
    pub rrf_score: Option<f64>,
    /// Set to `Some("entity")` when this result came from the dual-filter
    /// entity-scoped retrieval pass (see `search::retriever`).
    pub search_type: Option<String>,
}

impl Document {
    /// Creates a minimal document with no derived search fields set.
    #[must_use]
    pub fn new(id: impl Into<String>, content: impl Into<String>, metadata: DocumentMetadata) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            metadata,
            similarity: None,
            lexical_rank: None,
            rrf_score: None,
            search_type: None,
        }
    }
}

/// Conjunction of optional predicates restricting which documents a search
/// may return. An empty filter matches every document. Filters are
/// immutable once constructed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    /// Any-of match against [`DocumentMetadata::source`].
    pub sources: Option<Vec<String>>,
    /// Any-of match against [`DocumentMetadata::page`].
    pub pages: Option<Vec<u32>>,
    /// Any-of match against [`DocumentMetadata::category`].
    pub categories: Option<Vec<Category>>,
    /// Case-insensitive substring match against [`DocumentMetadata::caption`].
    pub caption_contains: Option<String>,
    /// Constraints on [`DocumentMetadata::entity`].
    pub entity: Option<EntityFilter>,
}

/// Entity-scoped predicate within a [`Filter`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityFilter {
    /// Exact entity-type literal, as discovered from live store metadata.
    #[serde(rename = "type")]
    pub type_: Option<String>,
    /// Any-of match against [`Entity::keywords`].
    pub keywords: Option<Vec<String>>,
    /// Substring match against [`Entity::title`].
    pub title_contains: Option<String>,
}

impl Filter {
    /// Returns `true` if no predicate is set (matches every document).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_none()
            && self.pages.is_none()
            && self.categories.is_none()
            && self.caption_contains.is_none()
            && self.entity.is_none()
    }

    /// Returns a copy of this filter with the `entity` predicate stripped.
    ///
    /// Used by the retriever's dual-filter strategy to run a pass across
    /// all applicable categories.
    #[must_use]
    pub fn without_entity(&self) -> Self {
        Self {
            entity: None,
            ..self.clone()
        }
    }
}

/// Execution status of a planned [`Subtask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskStatus {
    /// Not yet started.
    Pending,
    /// Currently being executed by the subtask executor/retriever.
    Executing,
    /// Retrieval finished successfully (possibly with zero documents).
    Completed,
    /// Retrieval failed fatally.
    Failed,
}

/// A unit of planned retrieval work produced by the planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtask {
    /// Stable identifier, unique within the turn.
    pub id: String,
    /// Focused sub-question.
    pub query: String,
    /// Priority in `1..=5` (higher is more important).
    pub priority: u8,
    /// Ids of earlier subtasks this one logically depends on. Informational
    /// only — execution is strictly sequential by index.
    pub dependencies: Vec<String>,
    /// Current execution status.
    pub status: SubtaskStatus,
    /// Documents accumulated from this subtask's retrieval.
    pub documents: Vec<Document>,
    /// Query-variation rewrites produced by the subtask executor, each
    /// paired with its detected or generated language.
    pub variations: Vec<Variation>,
    /// Filter derived for this subtask by the dynamic filter generator.
    pub filter: Filter,
    /// Boolean AND/OR keyword expression built from the query's extracted
    /// keywords, used in place of the raw variation text for lexical
    /// search. Empty until the executor has run.
    pub keyword_expression: String,
}

impl Subtask {
    /// Creates a new pending subtask with no variations or filter yet.
    #[must_use]
    pub fn new(id: impl Into<String>, query: impl Into<String>, priority: u8) -> Self {
        Self {
            id: id.into(),
            query: query.into(),
            priority,
            dependencies: Vec::new(),
            status: SubtaskStatus::Pending,
            documents: Vec::new(),
            variations: Vec::new(),
            filter: Filter::default(),
            keyword_expression: String::new(),
        }
    }
}

/// Output of a quality gate (hallucination checker or answer grader).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    /// Whether the answer passed this gate.
    pub is_valid: bool,
    /// Gate-specific score in `[0, 1]`.
    pub score: f64,
    /// Human-readable reasons supporting the verdict.
    pub reasons: Vec<String>,
    /// Suggestions the synthesizer can use to improve the answer on retry.
    pub suggestions: Vec<String>,
    /// Whether the orchestrator should route back to the synthesizer.
    pub needs_retry: bool,
}

/// Classification assigned by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    /// General-knowledge or social query; answered directly, no retrieval.
    Simple,
    /// Requires document retrieval.
    RagRequired,
    /// Contains unresolved references to prior conversation turns.
    HistoryRequired,
}

/// Overall workflow status of a [`TurnState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// The turn is still in progress.
    Running,
    /// The turn finished successfully; `final_answer` is authoritative.
    Completed,
    /// The turn terminated without producing a validated answer.
    Failed,
}

/// One entry in the turn's conversational log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Who produced this entry.
    pub role: MessageRole,
    /// Message text.
    pub content: String,
}

/// Author of a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// The end user.
    User,
    /// The assistant (this service).
    Assistant,
}

/// Free-form, JSON-serializable value used for per-run diagnostics in
/// [`TurnState::metadata`]. Mirrors the teacher's `ContextValue` shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum MetadataValue {
    /// String value.
    String(String),
    /// Integer value.
    Integer(i64),
    /// Floating-point value.
    Float(f64),
    /// Boolean value.
    Boolean(bool),
    /// Nested list of values.
    List(Vec<Self>),
}

impl MetadataValue {
    /// Returns `true` when this value is a boolean `true`.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

/// The single evolving record passed between orchestrator nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnState {
    /// Process-unique identifier for this turn, used as the `tracing` span
    /// field and the checkpoint store's key.
    pub turn_id: String,
    /// The original user query.
    pub query: String,
    /// Context-resolved variant of `query`, set by the context resolver.
    pub enhanced_query: Option<String>,
    /// Classification assigned by the router.
    pub query_type: Option<QueryType>,
    /// Ordered list of planned subtasks.
    pub subtasks: Vec<Subtask>,
    /// Index of the subtask currently being executed.
    pub current_subtask_idx: usize,
    /// Documents accumulated across all subtasks, deduplicated by id, in
    /// order of first appearance.
    pub documents: Vec<Document>,
    /// Answer produced by the most recent synthesizer invocation, prior to
    /// passing the quality gates.
    pub intermediate_answer: Option<String>,
    /// The validated final answer, set once both quality gates accept (or
    /// the turn fails with the latest attempt preserved).
    pub final_answer: Option<String>,
    /// Synthesizer-reported confidence in `[0, 1]`.
    pub confidence: f64,
    /// Latest hallucination-checker report.
    pub hallucination_report: Option<QualityReport>,
    /// Latest answer-grader report.
    pub grade_report: Option<QualityReport>,
    /// Number of synthesis retries performed so far. Incremented only by
    /// the synthesizer.
    pub retry_count: u32,
    /// Configured synthesis-retry cap for this turn.
    pub max_retries: u32,
    /// Total orchestrator node steps taken so far.
    pub iteration_count: usize,
    /// Overall workflow status.
    pub workflow_status: WorkflowStatus,
    /// Most recent unresolved error, if any.
    pub error: Option<String>,
    /// Accumulated non-fatal warnings, append-only.
    pub warnings: Vec<String>,
    /// Ordered conversational log.
    pub messages: Vec<Message>,
    /// Free-form per-run diagnostics.
    pub metadata: HashMap<String, MetadataValue>,
}

impl TurnState {
    /// Creates a fresh turn state for the given query.
    #[must_use]
    pub fn new(query: impl Into<String>, max_retries: u32) -> Self {
        let query = query.into();
        Self {
            turn_id: generate_turn_id(),
            messages: vec![Message {
                role: MessageRole::User,
                content: query.clone(),
            }],
            query,
            enhanced_query: None,
            query_type: None,
            subtasks: Vec::new(),
            current_subtask_idx: 0,
            documents: Vec::new(),
            intermediate_answer: None,
            final_answer: None,
            confidence: 0.0,
            hallucination_report: None,
            grade_report: None,
            retry_count: 0,
            max_retries,
            iteration_count: 0,
            workflow_status: WorkflowStatus::Running,
            error: None,
            warnings: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// The query the planner/executor should act on: `enhanced_query` when
    /// set, else `query`.
    #[must_use]
    pub fn effective_query(&self) -> &str {
        self.enhanced_query.as_deref().unwrap_or(&self.query)
    }

    /// Merges `doc` into `self.documents` if its id is not already present.
    /// Returns `true` if the document was newly added.
    pub fn merge_document(&mut self, doc: Document) -> bool {
        if self.documents.iter().any(|d| d.id == doc.id) {
            return false;
        }
        self.documents.push(doc);
        true
    }

    /// Merges each document in `docs`, preserving order of first appearance.
    pub fn merge_documents(&mut self, docs: impl IntoIterator<Item = Document>) {
        for doc in docs {
            self.merge_document(doc);
        }
    }

    /// Applies a [`StateDelta`] returned by a node, following the merge
    /// semantics documented on each field: additive-dedup for `documents`,
    /// append-only for `messages`/`warnings`, last-writer-wins for scalars.
    pub fn apply_delta(&mut self, delta: StateDelta) {
        if let Some(v) = delta.enhanced_query {
            self.enhanced_query = Some(v);
        }
        if let Some(v) = delta.query_type {
            self.query_type = Some(v);
        }
        if let Some(v) = delta.subtasks {
            self.subtasks = v;
        }
        if let Some(v) = delta.current_subtask_idx {
            self.current_subtask_idx = v;
        }
        self.merge_documents(delta.documents);
        if let Some(v) = delta.intermediate_answer {
            self.intermediate_answer = Some(v);
        }
        if let Some(v) = delta.final_answer {
            self.final_answer = Some(v);
        }
        if let Some(v) = delta.confidence {
            self.confidence = v;
        }
        if let Some(v) = delta.hallucination_report {
            self.hallucination_report = Some(v);
        }
        if let Some(v) = delta.grade_report {
            self.grade_report = Some(v);
        }
        if delta.increment_retry_count {
            self.retry_count += 1;
        }
        if let Some(v) = delta.workflow_status {
            self.workflow_status = v;
        }
        if delta.clear_error {
            self.error = None;
        } else if let Some(v) = delta.error {
            self.error = Some(v);
        }
        self.warnings.extend(delta.warnings);
        self.messages.extend(delta.messages);
        for (k, v) in delta.metadata {
            self.metadata.insert(k, v);
        }
        self.iteration_count += 1;
    }
}

/// Partial update produced by a single orchestrator node.
///
/// Every field is optional (or, for append-only collections, simply empty
/// when unused) so a node only has to describe what it changed. Merged into
/// a [`TurnState`] by [`TurnState::apply_delta`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct StateDelta {
    /// Overwrites `enhanced_query` when set.
    pub enhanced_query: Option<String>,
    /// Overwrites `query_type` when set.
    pub query_type: Option<QueryType>,
    /// Overwrites `subtasks` wholesale when set.
    pub subtasks: Option<Vec<Subtask>>,
    /// Overwrites `current_subtask_idx` when set.
    pub current_subtask_idx: Option<usize>,
    /// Documents to merge additively (deduplicated by id).
    pub documents: Vec<Document>,
    /// Overwrites `intermediate_answer` when set.
    pub intermediate_answer: Option<String>,
    /// Overwrites `final_answer` when set.
    pub final_answer: Option<String>,
    /// Overwrites `confidence` when set.
    pub confidence: Option<f64>,
    /// Overwrites `hallucination_report` when set.
    pub hallucination_report: Option<QualityReport>,
    /// Overwrites `grade_report` when set.
    pub grade_report: Option<QualityReport>,
    /// When `true`, increments `retry_count` by one. Only the synthesizer
    /// sets this, and only when it is re-synthesizing in response to a
    /// hallucination or grade failure, never on the initial synthesis.
    pub increment_retry_count: bool,
    /// Overwrites `workflow_status` when set.
    pub workflow_status: Option<WorkflowStatus>,
    /// Overwrites `error` when set.
    pub error: Option<String>,
    /// When `true`, clears `error` to `None`, taking precedence over `error`.
    pub clear_error: bool,
    /// Warnings to append.
    pub warnings: Vec<String>,
    /// Conversational entries to append.
    pub messages: Vec<Message>,
    /// Diagnostic metadata entries to upsert.
    pub metadata: HashMap<String, MetadataValue>,
}

impl StateDelta {
    /// An empty delta that changes nothing but still advances
    /// `iteration_count` when applied.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str) -> Document {
        Document::new(
            id,
            "content",
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

    #[test]
    fn test_turn_id_is_unique_per_state() {
        let a = TurnState::new("q", 3);
        let b = TurnState::new("q", 3);
        assert_ne!(a.turn_id, b.turn_id);
    }

    #[test]
    fn test_new_turn_state_defaults() {
        let state = TurnState::new("hello", 3);
        assert_eq!(state.query, "hello");
        assert_eq!(state.workflow_status, WorkflowStatus::Running);
        assert_eq!(state.retry_count, 0);
        assert_eq!(state.max_retries, 3);
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.messages[0].role, MessageRole::User);
    }

    #[test]
    fn test_effective_query_falls_back_to_original() {
        let state = TurnState::new("original", 3);
        assert_eq!(state.effective_query(), "original");
    }

    #[test]
    fn test_effective_query_prefers_enhanced() {
        let mut state = TurnState::new("original", 3);
        state.enhanced_query = Some("rewritten".to_string());
        assert_eq!(state.effective_query(), "rewritten");
    }

    #[test]
    fn test_merge_document_dedup_by_id() {
        let mut state = TurnState::new("q", 3);
        assert!(state.merge_document(doc("a")));
        assert!(!state.merge_document(doc("a")));
        assert_eq!(state.documents.len(), 1);
    }

    #[test]
    fn test_merge_documents_preserves_first_appearance_order() {
        let mut state = TurnState::new("q", 3);
        state.merge_documents([doc("b"), doc("a")]);
        state.merge_documents([doc("a"), doc("c")]);
        let ids: Vec<&str> = state.documents.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_filter_is_empty() {
        assert!(Filter::default().is_empty());
        let mut f = Filter::default();
        f.pages = Some(vec![5]);
        assert!(!f.is_empty());
    }

    #[test]
    fn test_filter_without_entity() {
        let mut f = Filter::default();
        f.entity = Some(EntityFilter {
            type_: Some("table".to_string()),
            keywords: None,
            title_contains: None,
        });
        f.pages = Some(vec![1]);
        let stripped = f.without_entity();
        assert!(stripped.entity.is_none());
        assert_eq!(stripped.pages, Some(vec![1]));
    }

    #[test]
    fn test_metadata_value_as_bool() {
        assert_eq!(MetadataValue::Boolean(true).as_bool(), Some(true));
        assert_eq!(MetadataValue::String("x".to_string()).as_bool(), None);
    }

    #[test]
    fn test_apply_delta_scalar_last_writer_wins() {
        let mut state = TurnState::new("q", 3);
        let mut delta = StateDelta::empty();
        delta.confidence = Some(0.8);
        delta.workflow_status = Some(WorkflowStatus::Completed);
        state.apply_delta(delta);
        assert_eq!(state.confidence, 0.8);
        assert_eq!(state.workflow_status, WorkflowStatus::Completed);
    }

    #[test]
    fn test_apply_delta_documents_additive_dedup() {
        let mut state = TurnState::new("q", 3);
        state.merge_document(doc("a"));
        let mut delta = StateDelta::empty();
        delta.documents = vec![doc("a"), doc("b")];
        state.apply_delta(delta);
        let ids: Vec<&str> = state.documents.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_apply_delta_warnings_and_messages_append_only() {
        let mut state = TurnState::new("q", 3);
        let mut delta = StateDelta::empty();
        delta.warnings.push("first".to_string());
        state.apply_delta(delta);
        let mut delta2 = StateDelta::empty();
        delta2.warnings.push("second".to_string());
        state.apply_delta(delta2);
        assert_eq!(state.warnings, vec!["first", "second"]);
    }

    #[test]
    fn test_apply_delta_increments_retry_count_only_when_requested() {
        let mut state = TurnState::new("q", 3);
        state.apply_delta(StateDelta::empty());
        assert_eq!(state.retry_count, 0);
        let mut delta = StateDelta::empty();
        delta.increment_retry_count = true;
        state.apply_delta(delta);
        assert_eq!(state.retry_count, 1);
    }

    #[test]
    fn test_apply_delta_advances_iteration_count() {
        let mut state = TurnState::new("q", 3);
        state.apply_delta(StateDelta::empty());
        state.apply_delta(StateDelta::empty());
        assert_eq!(state.iteration_count, 2);
    }

    #[test]
    fn test_apply_delta_clear_error_takes_precedence() {
        let mut state = TurnState::new("q", 3);
        let mut delta = StateDelta::empty();
        delta.error = Some("boom".to_string());
        state.apply_delta(delta);
        assert_eq!(state.error.as_deref(), Some("boom"));

        let mut clear = StateDelta::empty();
        clear.clear_error = true;
        clear.error = Some("ignored".to_string());
        state.apply_delta(clear);
        assert_eq!(state.error, None);
    }
}
