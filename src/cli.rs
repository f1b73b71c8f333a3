//! CLI layer for the `rag-turn` demonstrator binary.
//!
//! Grounded on the teacher's `cli::parser`/`cli::commands` split (clap
//! derive `Cli`/`Commands`, a single `execute` entry point returning a
//! formatted string) but narrowed to one subcommand: run a single turn
//! against an in-memory store seeded from a JSON fixture.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Deserialize;

use crate::config::OrchestratorConfig;
use crate::embedding::{Embedder, create_embedder};
use crate::error::{ConfigError, Result};
use crate::model::ModelProvider;
use crate::model::mock::MockModelProvider;
use crate::orchestrator::Orchestrator;
use crate::state::{Category, Document, DocumentMetadata, TurnState};
use crate::store::Store;
use crate::store::memory::InMemoryStore;

/// `rag-turn`: run a single question through the retrieval-and-orchestration
/// core.
#[derive(Parser, Debug)]
#[command(name = "rag-turn")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to a JSON fixture of documents to seed the in-memory store
    /// with. Defaults to an empty store.
    #[arg(short, long, env = "RAG_TURN_FIXTURE")]
    pub fixture: Option<PathBuf>,

    /// Output format (text, json).
    #[arg(long, default_value = "text", global = true)]
    pub format: String,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a single query through the orchestrator and print the final
    /// answer.
    Ask {
        /// The natural-language query.
        query: String,

        /// Maximum number of planner subtasks for this turn.
        #[arg(long, default_value = "3")]
        max_subtasks: usize,

        /// Maximum number of synthesis retries for this turn.
        #[arg(long, default_value = "2")]
        max_retries: u32,
    },
}

/// A document entry in a CLI fixture file.
#[derive(Debug, Deserialize)]
struct FixtureDocument {
    id: String,
    content: String,
    #[serde(default = "default_source")]
    source: String,
    #[serde(default = "default_page")]
    page: u32,
    #[serde(default = "default_category")]
    category: Category,
}

fn default_source() -> String {
    "fixture".to_string()
}

fn default_page() -> u32 {
    1
}

const fn default_category() -> Category {
    Category::Paragraph
}

/// Loads a JSON array of [`FixtureDocument`]s and indexes each one into a
/// fresh [`InMemoryStore`], embedding its content with `embedder`.
///
/// # Errors
///
/// Returns a [`ConfigError::OutOfRange`] if the fixture cannot be read or
/// parsed.
fn load_fixture(path: &Path, embedder: &dyn Embedder) -> Result<InMemoryStore> {
    let raw = std::fs::read_to_string(path)
        .map_err(|err| ConfigError::OutOfRange { field: "fixture", reason: format!("cannot read {}: {err}", path.display()) })?;
    let entries: Vec<FixtureDocument> = serde_json::from_str(&raw)
        .map_err(|err| ConfigError::OutOfRange { field: "fixture", reason: format!("invalid JSON: {err}") })?;

    let mut store = InMemoryStore::new();
    for entry in entries {
        let embedding = embedder
            .embed(&entry.content)
            .map_err(|err| ConfigError::OutOfRange { field: "fixture", reason: format!("embedding failed for {}: {err}", entry.id) })?;
        let document = Document::new(
            entry.id,
            entry.content,
            DocumentMetadata {
                source: entry.source,
                page: entry.page,
                category: entry.category,
                caption: None,
                entity: None,
                human_feedback: None,
                image_path: None,
            },
        );
        store.insert(document, embedding);
    }
    Ok(store)
}

/// Builds the `Store`/`Embedder`/`ModelProvider` collaborators for `cli` and
/// runs `command`, returning the formatted output.
///
/// Uses a deterministic [`MockModelProvider`] since no concrete model
/// backend ships without the `openai` feature; the demonstrator's purpose
/// is to exercise the pipeline wiring, not to produce real answers.
///
/// # Errors
///
/// Propagates any error from loading the fixture, constructing the
/// orchestrator, or running the turn.
pub async fn execute(cli: &Cli) -> Result<String> {
    let embedder: Arc<dyn Embedder> = Arc::from(create_embedder()?);
    let store: Arc<dyn Store> = match &cli.fixture {
        Some(path) => Arc::new(load_fixture(path, embedder.as_ref())?),
        None => Arc::new(InMemoryStore::new()),
    };
    let provider: Arc<dyn ModelProvider> = Arc::new(MockModelProvider::new(vec![]));

    match &cli.command {
        Commands::Ask { query, max_subtasks, max_retries } => {
            let config = OrchestratorConfig::default()
                .with_max_subtasks(*max_subtasks)
                .with_max_retries(*max_retries);
            let orchestrator = Orchestrator::new(config, store, embedder, provider, None)?;
            let state = orchestrator.run(query).await?;
            Ok(format_turn(&state))
        }
    }
}

fn format_turn(state: &TurnState) -> String {
    let mut output = String::new();
    output.push_str(&format!("turn:  {}\n", state.turn_id));
    output.push_str(&format!("query: {}\n", state.query));
    output.push_str(&format!("status: {:?}\n", state.workflow_status));
    if let Some(answer) = &state.final_answer {
        output.push_str(&format!("\n{answer}\n"));
    }
    if let Some(error) = &state.error {
        output.push_str(&format!("\nerror: {error}\n"));
    }
    for warning in &state.warnings {
        output.push_str(&format!("warning: {warning}\n"));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parse() {
        Cli::command().debug_assert();
    }

    #[tokio::test]
    async fn test_execute_ask_without_fixture_returns_output() {
        let cli = Cli {
            fixture: None,
            format: "text".to_string(),
            command: Commands::Ask { query: "hello there".to_string(), max_subtasks: 2, max_retries: 1 },
        };
        let output = execute(&cli).await.unwrap();
        assert!(output.contains("turn:"));
    }
}
