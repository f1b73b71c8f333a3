//! The document store contract.
//!
//! Adapted from the teacher's `storage::traits::Storage` trait shape (one
//! `Send + Sync` trait, doc-commented `# Errors` sections per method) but
//! narrowed from buffer/chunk CRUD to the read-only dense/lexical retrieval
//! surface this crate actually needs. Production deployments supply their
//! own implementation backed by whatever vector/full-text engine they run;
//! [`memory::InMemoryStore`] is a reference implementation for tests and the
//! CLI demonstrator.

pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::state::{Document, Filter, Language};

/// Live metadata snapshot used by the dynamic filter generator to validate
/// model-proposed filter values against what the store actually contains.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreMetadata {
    /// Every distinct `DocumentMetadata::source` value present in the store.
    pub sources: Vec<String>,
    /// The `(min, max)` page ordinal present in the store, or `None` if the
    /// store holds no documents. Used to drop out-of-range page filters a
    /// query's "page N" cue would otherwise propose unjustified.
    pub pages: Option<(u32, u32)>,
    /// Every distinct `DocumentMetadata::category` value present, as its
    /// serialized snake_case name.
    pub categories: Vec<String>,
    /// Every distinct `Entity::type_` value present in the store.
    pub entity_types: Vec<String>,
}

/// Contract between the retriever and a document store.
///
/// All methods take `&self` (no interior mutability is assumed beyond what
/// an implementation wants) and are async to allow real implementations to
/// perform network I/O. Implementations must be `Send + Sync` so they can be
/// shared across the retriever's fan-out tasks behind an `Arc`.
#[async_trait]
pub trait Store: Send + Sync {
    /// Dense (embedding-similarity) search for `query_embedding` in
    /// `language`, restricted by `filter`, returning at most `top_k`
    /// documents ordered by descending `similarity`. `language` selects
    /// which dense-vector column a real backend indexes against; this
    /// crate's in-memory reference store keeps no language-specific
    /// columns and so ignores it beyond recording it for inspection.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::StoreError`] if the backend query fails.
    async fn dense_search(
        &self,
        query_embedding: &[f32],
        language: Language,
        filter: &Filter,
        top_k: usize,
    ) -> Result<Vec<Document>>;

    /// Lexical (full-text) search for `expression` in `language`, restricted
    /// by `filter`, returning at most `top_k` documents ordered by
    /// descending relevance (with `lexical_rank` set to the result's 0-based
    /// ordinal). `expression` is the boolean AND/OR keyword expression built
    /// by the retriever, not a raw sentence.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::StoreError`] if the backend query fails.
    async fn lexical_search(
        &self,
        expression: &str,
        language: Language,
        filter: &Filter,
        top_k: usize,
    ) -> Result<Vec<Document>>;

    /// Fetches a single document by id.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::StoreError::DocumentNotFound`] if no document
    /// with that id exists, or another `StoreError` if the lookup fails.
    async fn get_document(&self, id: &str) -> Result<Document>;

    /// Returns a live snapshot of the store's metadata vocabulary, used to
    /// validate and/or override model-proposed filters.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::StoreError::MetadataUnavailable`] if the
    /// snapshot cannot be produced.
    async fn get_metadata(&self) -> Result<StoreMetadata>;
}
