//! In-memory [`Store`] reference implementation.
//!
//! Used by the CLI demonstrator and by every node's unit tests. Dense
//! search ranks by cosine similarity against a precomputed per-document
//! embedding (supplied at construction time, since embedding generation is
//! out of scope for this crate); lexical search ranks by a simple
//! term-overlap score, sufficient to exercise RRF fusion without pulling in
//! a real BM25 implementation.

use std::collections::HashSet;

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::{Result, StoreError};
use crate::state::{Category, Document, Entity, Filter, Language};
use crate::store::{Store, StoreMetadata};

/// A document paired with the dense embedding the store should rank it by.
#[derive(Debug, Clone)]
struct IndexedDocument {
    document: Document,
    embedding: Vec<f32>,
}

/// An in-memory document store, for tests and the CLI demonstrator.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    documents: Vec<IndexedDocument>,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a document with its dense embedding.
    pub fn insert(&mut self, document: Document, embedding: Vec<f32>) {
        self.documents.push(IndexedDocument { document, embedding });
    }

    fn matches(filter: &Filter, doc: &Document) -> bool {
        if let Some(sources) = &filter.sources
            && !sources.contains(&doc.metadata.source)
        {
            return false;
        }
        if let Some(pages) = &filter.pages
            && !pages.contains(&doc.metadata.page)
        {
            return false;
        }
        if let Some(categories) = &filter.categories
            && !categories.contains(&doc.metadata.category)
        {
            return false;
        }
        if let Some(needle) = &filter.caption_contains {
            let hay = doc.metadata.caption.as_deref().unwrap_or("");
            if !hay.to_lowercase().contains(&needle.to_lowercase()) {
                return false;
            }
        }
        if let Some(entity_filter) = &filter.entity {
            let Some(entity) = &doc.metadata.entity else {
                return false;
            };
            if !Self::entity_matches(entity_filter, entity) {
                return false;
            }
        }
        true
    }

    fn entity_matches(filter: &crate::state::EntityFilter, entity: &Entity) -> bool {
        if let Some(type_) = &filter.type_
            && &entity.type_ != type_
        {
            return false;
        }
        if let Some(keywords) = &filter.keywords
            && !keywords.iter().any(|k| entity.keywords.contains(k))
        {
            return false;
        }
        if let Some(needle) = &filter.title_contains
            && !entity.title.to_lowercase().contains(&needle.to_lowercase())
        {
            return false;
        }
        true
    }

    /// Scores `content` against a boolean keyword `expression` (e.g.
    /// `(warranty AND period) OR coverage`) by stripping the `AND`/`OR`
    /// operators and parentheses, then measuring plain term overlap. A real
    /// full-text backend would honor the conjunction/disjunction structure;
    /// this reference store only needs enough signal to exercise RRF
    /// fusion.
    fn lexical_score(expression: &str, content: &str) -> f32 {
        let query_terms: HashSet<String> = expression
            .to_lowercase()
            .replace(['(', ')'], " ")
            .split_whitespace()
            .filter(|term| *term != "and" && *term != "or")
            .map(String::from)
            .collect();
        if query_terms.is_empty() {
            return 0.0;
        }
        let content_lower = content.to_lowercase();
        let hits = query_terms.iter().filter(|t| content_lower.contains(t.as_str())).count();
        #[allow(clippy::cast_precision_loss)]
        let score = hits as f32 / query_terms.len() as f32;
        score
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn dense_search(
        &self,
        query_embedding: &[f32],
        _language: Language,
        filter: &Filter,
        top_k: usize,
    ) -> Result<Vec<Document>> {
        let mut scored: Vec<(f32, Document)> = self
            .documents
            .iter()
            .filter(|indexed| Self::matches(filter, &indexed.document))
            .map(|indexed| {
                let mut doc = indexed.document.clone();
                let similarity = cosine_similarity(query_embedding, &indexed.embedding);
                doc.similarity = Some(similarity);
                (similarity, doc)
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored.into_iter().map(|(_, doc)| doc).collect())
    }

    async fn lexical_search(
        &self,
        expression: &str,
        _language: Language,
        filter: &Filter,
        top_k: usize,
    ) -> Result<Vec<Document>> {
        let mut scored: Vec<(f32, Document)> = self
            .documents
            .iter()
            .filter(|indexed| Self::matches(filter, &indexed.document))
            .map(|indexed| (Self::lexical_score(expression, &indexed.document.content), indexed.document.clone()))
            .filter(|(score, _)| *score > 0.0)
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored
            .into_iter()
            .enumerate()
            .map(|(rank, (_, mut doc))| {
                doc.lexical_rank = Some(rank);
                doc
            })
            .collect())
    }

    async fn get_document(&self, id: &str) -> Result<Document> {
        self.documents
            .iter()
            .find(|indexed| indexed.document.id == id)
            .map(|indexed| indexed.document.clone())
            .ok_or_else(|| StoreError::DocumentNotFound { id: id.to_string() }.into())
    }

    async fn get_metadata(&self) -> Result<StoreMetadata> {
        let mut sources = Vec::new();
        let mut categories = Vec::new();
        let mut entity_types = Vec::new();
        let mut pages: Option<(u32, u32)> = None;
        for indexed in &self.documents {
            let source = indexed.document.metadata.source.clone();
            if !sources.contains(&source) {
                sources.push(source);
            }
            let category = category_name(indexed.document.metadata.category);
            if !categories.contains(&category) {
                categories.push(category);
            }
            if let Some(entity) = &indexed.document.metadata.entity
                && !entity_types.contains(&entity.type_)
            {
                entity_types.push(entity.type_.clone());
            }
            let page = indexed.document.metadata.page;
            pages = Some(pages.map_or((page, page), |(min, max)| (min.min(page), max.max(page))));
        }
        Ok(StoreMetadata {
            sources,
            pages,
            categories,
            entity_types,
        })
    }
}

fn category_name(category: Category) -> String {
    serde_json::to_value(category)
        .ok()
        .and_then(|v| v.as_str().map(ToString::to_string))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::DocumentMetadata;

    fn doc(id: &str, content: &str, category: Category, source: &str) -> Document {
        Document::new(
            id,
            content,
            DocumentMetadata {
                source: source.to_string(),
                page: 1,
                category,
                caption: None,
                entity: None,
                human_feedback: None,
                image_path: None,
            },
        )
    }

    fn store() -> InMemoryStore {
        let mut store = InMemoryStore::new();
        store.insert(
            doc("a", "the quarterly revenue table", Category::Table, "report.pdf"),
            vec![1.0, 0.0, 0.0],
        );
        store.insert(
            doc("b", "an unrelated paragraph about weather", Category::Paragraph, "report.pdf"),
            vec![0.0, 1.0, 0.0],
        );
        store
    }

    #[tokio::test]
    async fn test_dense_search_ranks_by_similarity() {
        let store = store();
        let results = store.dense_search(&[1.0, 0.0, 0.0], Language::English, &Filter::default(), 10).await.unwrap();
        assert_eq!(results[0].id, "a");
        assert!(results[0].similarity.unwrap() > results[1].similarity.unwrap());
    }

    #[tokio::test]
    async fn test_lexical_search_filters_zero_score() {
        let store = store();
        let results = store.lexical_search("revenue", Language::English, &Filter::default(), 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "a");
        assert_eq!(results[0].lexical_rank, Some(0));
    }

    #[tokio::test]
    async fn test_lexical_search_honors_boolean_expression() {
        let store = store();
        let results =
            store.lexical_search("(revenue AND table) OR weather", Language::English, &Filter::default(), 10).await.unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_filter_by_source_and_category() {
        let store = store();
        let mut filter = Filter::default();
        filter.categories = Some(vec![Category::Table]);
        let results = store.dense_search(&[1.0, 0.0, 0.0], Language::English, &filter, 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "a");
    }

    #[tokio::test]
    async fn test_get_document_not_found() {
        let store = store();
        let err = store.get_document("missing").await.unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[tokio::test]
    async fn test_get_metadata_collects_distinct_values() {
        let store = store();
        let meta = store.get_metadata().await.unwrap();
        assert_eq!(meta.sources, vec!["report.pdf"]);
        assert!(meta.categories.contains(&"table".to_string()));
        assert!(meta.categories.contains(&"paragraph".to_string()));
        assert_eq!(meta.pages, Some((1, 1)));
    }

    #[tokio::test]
    async fn test_get_metadata_reports_page_range() {
        let mut store = InMemoryStore::new();
        store.insert(
            Document::new(
                "a",
                "page three",
                DocumentMetadata {
                    source: "manual.pdf".to_string(),
                    page: 3,
                    category: Category::Paragraph,
                    caption: None,
                    entity: None,
                    human_feedback: None,
                    image_path: None,
                },
            ),
            vec![1.0],
        );
        store.insert(
            Document::new(
                "b",
                "page nine",
                DocumentMetadata {
                    source: "manual.pdf".to_string(),
                    page: 9,
                    category: Category::Paragraph,
                    caption: None,
                    entity: None,
                    human_feedback: None,
                    image_path: None,
                },
            ),
            vec![0.0],
        );
        let meta = store.get_metadata().await.unwrap();
        assert_eq!(meta.pages, Some((3, 9)));
    }

    #[tokio::test]
    async fn test_get_metadata_pages_none_for_empty_store() {
        let store = InMemoryStore::new();
        let meta = store.get_metadata().await.unwrap();
        assert_eq!(meta.pages, None);
    }
}
