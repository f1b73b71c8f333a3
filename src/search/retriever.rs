//! The hybrid retriever: dense + lexical search per query variation,
//! merged by Reciprocal Rank Fusion, executed across a bounded worker pool.
//!
//! Grounded on the teacher's `search::hybrid_search` (semantic + BM25
//! combined via RRF) restructured around the sibling fan-out orchestrator's
//! idiom — a `tokio::sync::Semaphore` bounding concurrency, `Arc`-shared
//! read-only inputs (`Store`, `Embedder`), one `tokio::spawn` per unit of
//! work, collected with `futures_util::future::join_all`.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::Semaphore;

use crate::config::OrchestratorConfig;
use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::search::rrf::{RrfConfig, reciprocal_rank_fusion};
use crate::state::{Document, Filter, Variation};
use crate::store::Store;

/// Tunables for a [`HybridRetriever`]. Mirrors the retrieval-relevant
/// subset of [`OrchestratorConfig`] so the retriever can be constructed and
/// tested independently of the full orchestrator.
#[derive(Debug, Clone)]
pub struct RetrieverConfig {
    /// Documents returned per retrieval call, after RRF fusion.
    pub top_k: usize,
    /// Reciprocal Rank Fusion `k` parameter.
    pub rrf_k: u32,
    /// Maximum number of concurrent store calls in flight.
    pub concurrency: usize,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            rrf_k: 60,
            concurrency: 3,
        }
    }
}

impl From<&OrchestratorConfig> for RetrieverConfig {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            top_k: config.top_k,
            rrf_k: config.rrf_k,
            concurrency: config.retrieval_concurrency,
        }
    }
}

/// Backoff schedule for transient store failures: three attempts at 1s, 2s,
/// and 4s.
const RETRY_DELAYS: [Duration; 2] = [Duration::from_secs(1), Duration::from_secs(2)];
const MAX_ATTEMPTS: u32 = 3;

async fn call_with_retry<F, Fut, T>(mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut last_err = None;
    for attempt in 0..MAX_ATTEMPTS {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err @ Error::Store(_)) => {
                last_err = Some(err);
                if let Some(delay) = RETRY_DELAYS.get(attempt as usize) {
                    tokio::time::sleep(*delay).await;
                }
            }
            Err(err) => return Err(err),
        }
    }
    #[allow(clippy::unwrap_used)]
    Err(last_err.unwrap())
}

/// One of the two passes the retriever runs when a [`Filter`] carries an
/// entity predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    /// The entity predicate stripped; scans every applicable category.
    Broad,
    /// The filter used unmodified, scoped to entity-bearing documents.
    Entity,
}

/// Executes hybrid (dense + lexical) retrieval across query variations and
/// a shared worker pool, merging every ranked list with RRF.
pub struct HybridRetriever {
    store: Arc<dyn Store>,
    embedder: Arc<dyn Embedder>,
    config: RetrieverConfig,
}

impl HybridRetriever {
    /// Creates a retriever over `store`, embedding query text with `embedder`.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, embedder: Arc<dyn Embedder>, config: RetrieverConfig) -> Self {
        Self { store, embedder, config }
    }

    /// Runs dense + lexical search for every `(query variation, pass)` pair
    /// implied by `filter`, fans the calls out across a bounded worker
    /// pool, and fuses every resulting ranked list with RRF. Each variation
    /// carries its own `Language`, passed to the store so a real backend can
    /// route dense and lexical search to the right per-language index.
    /// `keyword_expression`, when non-empty, is used for every variation's
    /// lexical search in place of its raw text; each store call (dense and
    /// lexical) asks for `top_k * 2` candidates so the fused ranking has a
    /// full-width pool to draw from, truncating to `top_k` only after RRF.
    ///
    /// When `filter.entity` is set, two passes run per variation — one with
    /// the entity predicate stripped, one scoped to it (see module docs) —
    /// and documents surfaced only by the entity pass are tagged
    /// `search_type = "entity"` in the returned [`Document::search_type`].
    ///
    /// # Errors
    ///
    /// Returns the first non-transient [`crate::error::StoreError`], or a
    /// [`crate::error::StoreError::RetriesExhausted`] if every retry of a
    /// transient failure is exhausted.
    pub async fn retrieve(
        &self,
        variations: &[Variation],
        keyword_expression: &str,
        filter: &Filter,
    ) -> Result<Vec<Document>> {
        let passes: Vec<(Pass, Filter)> = if filter.entity.is_some() {
            vec![(Pass::Broad, filter.without_entity()), (Pass::Entity, filter.clone())]
        } else {
            vec![(Pass::Broad, filter.clone())]
        };

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut tasks = Vec::new();

        for variation in variations {
            for (pass, pass_filter) in &passes {
                let semaphore = Arc::clone(&semaphore);
                let store = Arc::clone(&self.store);
                let embedder = Arc::clone(&self.embedder);
                let variation = variation.clone();
                let keyword_expression = keyword_expression.to_string();
                let pass_filter = pass_filter.clone();
                let pass = *pass;
                let top_k = self.config.top_k;
                tasks.push(tokio::spawn(async move {
                    #[allow(clippy::unwrap_used)]
                    let _permit = semaphore.acquire_owned().await.unwrap();
                    run_pass(store, embedder, variation, keyword_expression, pass_filter, pass, top_k).await
                }));
            }
        }

        let joined = join_all(tasks).await;
        let mut dense_lists: Vec<Vec<String>> = Vec::new();
        let mut lexical_lists: Vec<Vec<String>> = Vec::new();
        let mut by_id: std::collections::HashMap<String, Document> = std::collections::HashMap::new();
        let mut entity_ids: std::collections::HashSet<String> = std::collections::HashSet::new();

        for joined_result in joined {
            let (dense, lexical) = match joined_result {
                Ok(inner) => inner?,
                Err(_join_err) => continue,
            };
            dense_lists.push(dense.iter().map(|d| d.id.clone()).collect());
            lexical_lists.push(lexical.iter().map(|d| d.id.clone()).collect());
            for doc in dense.into_iter().chain(lexical) {
                if doc.search_type.as_deref() == Some("entity") {
                    entity_ids.insert(doc.id.clone());
                }
                by_id.entry(doc.id.clone()).or_insert(doc);
            }
        }

        let dense_refs: Vec<&[String]> = dense_lists.iter().map(Vec::as_slice).collect();
        let lexical_refs: Vec<&[String]> = lexical_lists.iter().map(Vec::as_slice).collect();
        let mut all_lists = dense_refs;
        all_lists.extend(lexical_refs);

        let rrf_config = RrfConfig::new(self.config.rrf_k);
        let fused = reciprocal_rank_fusion(&all_lists, &rrf_config);

        let results = fused
            .into_iter()
            .take(self.config.top_k)
            .filter_map(|(id, score)| {
                by_id.get(&id).cloned().map(|mut doc| {
                    doc.rrf_score = Some(score);
                    if entity_ids.contains(&id) {
                        doc.search_type = Some("entity".to_string());
                    }
                    doc
                })
            })
            .collect();

        Ok(results)
    }
}

async fn run_pass(
    store: Arc<dyn Store>,
    embedder: Arc<dyn Embedder>,
    variation: Variation,
    keyword_expression: String,
    filter: Filter,
    pass: Pass,
    top_k: usize,
) -> Result<(Vec<Document>, Vec<Document>)> {
    let candidate_pool = top_k * 2;
    let expression = if keyword_expression.is_empty() { variation.text.clone() } else { keyword_expression };
    let embedding = embedder.embed(&variation.text)?;
    let dense = call_with_retry(|| {
        let store = Arc::clone(&store);
        let embedding = embedding.clone();
        let filter = filter.clone();
        let language = variation.language;
        async move { store.dense_search(&embedding, language, &filter, candidate_pool).await }
    })
    .await?;
    let lexical = call_with_retry(|| {
        let store = Arc::clone(&store);
        let expression = expression.clone();
        let filter = filter.clone();
        let language = variation.language;
        async move { store.lexical_search(&expression, language, &filter, candidate_pool).await }
    })
    .await?;

    let tag = |mut docs: Vec<Document>| {
        if pass == Pass::Entity {
            for doc in &mut docs {
                doc.search_type = Some("entity".to_string());
            }
        }
        docs
    };
    Ok((tag(dense), tag(lexical)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::FallbackEmbedder;
    use crate::state::{Category, DocumentMetadata, EntityFilter, Language};
    use crate::store::memory::InMemoryStore;

    fn variation(text: &str) -> Variation {
        Variation { text: text.to_string(), language: Language::English }
    }

    fn doc(id: &str, content: &str, category: Category) -> Document {
        Document::new(
            id,
            content,
            DocumentMetadata {
                source: "manual.pdf".to_string(),
                page: 1,
                category,
                caption: None,
                entity: Some(crate::state::Entity {
                    type_: "table".to_string(),
                    title: "Revenue".to_string(),
                    details: String::new(),
                    keywords: vec!["revenue".to_string()],
                    hypothetical_questions: None,
                }),
                human_feedback: None,
                image_path: None,
            },
        )
    }

    fn retriever() -> HybridRetriever {
        let mut store = InMemoryStore::new();
        store.insert(doc("a", "revenue table for q1", Category::Table), vec![1.0, 0.0, 0.0]);
        store.insert(doc("b", "unrelated paragraph text", Category::Paragraph), vec![0.0, 1.0, 0.0]);
        HybridRetriever::new(
            Arc::new(store),
            Arc::new(FallbackEmbedder::new(3)),
            RetrieverConfig {
                top_k: 10,
                rrf_k: 60,
                concurrency: 2,
            },
        )
    }

    #[tokio::test]
    async fn test_retrieve_single_pass_returns_fused_documents() {
        let retriever = retriever();
        let variations = vec![variation("revenue")];
        let results = retriever.retrieve(&variations, "", &Filter::default()).await.unwrap();
        assert!(!results.is_empty());
        assert!(results.iter().any(|d| d.id == "a"));
    }

    #[tokio::test]
    async fn test_retrieve_dual_pass_tags_entity_search_type() {
        let retriever = retriever();
        let mut filter = Filter::default();
        filter.entity = Some(EntityFilter {
            type_: Some("table".to_string()),
            keywords: None,
            title_contains: None,
        });
        let variations = vec![variation("revenue")];
        let results = retriever.retrieve(&variations, "", &filter).await.unwrap();
        let tagged = results.iter().find(|d| d.id == "a").unwrap();
        assert_eq!(tagged.search_type.as_deref(), Some("entity"));
    }

    #[tokio::test]
    async fn test_retrieve_sets_rrf_score() {
        let retriever = retriever();
        let variations = vec![variation("revenue"), variation("q1")];
        let results = retriever.retrieve(&variations, "", &Filter::default()).await.unwrap();
        assert!(results.iter().all(|d| d.rrf_score.is_some()));
    }

    #[tokio::test]
    async fn test_retrieve_respects_top_k() {
        let retriever = retriever();
        let mut cfg_retriever = retriever;
        cfg_retriever.config.top_k = 1;
        let variations = vec![variation("revenue")];
        let results = cfg_retriever.retrieve(&variations, "", &Filter::default()).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn test_retrieve_uses_keyword_expression_over_variation_text() {
        let retriever = retriever();
        let variations = vec![variation("some unrelated phrasing")];
        let results = retriever.retrieve(&variations, "revenue", &Filter::default()).await.unwrap();
        assert!(results.iter().any(|d| d.id == "a" && d.lexical_rank.is_some()));
    }
}
