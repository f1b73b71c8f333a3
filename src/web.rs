//! Optional web-search fallback, invoked when local retrieval is sparse.
//!
//! Grounded on the teacher's `embedding::create_embedder` feature-
//! optionality pattern (a trait behind a safe, never-hard-failing
//! constructor) and the source spec's explicit "does not raise" contract:
//! [`WebFallback::search`] absorbs every failure mode — quota exhaustion,
//! upstream error, cache miss — into an empty result plus a warning string,
//! never a propagated [`crate::error::Error`].

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::Result;
use crate::state::{Category, Document, DocumentMetadata};

const CACHE_TTL: Duration = Duration::from_secs(3600);

/// Contract for an external web-search collaborator.
#[async_trait]
pub trait WebSearchTool: Send + Sync {
    /// Searches the web for `query`, returning at most `max_results` raw
    /// results as `(url, title, snippet)` triples.
    ///
    /// # Errors
    ///
    /// Returns an error for upstream/network failures; [`WebFallback`]
    /// absorbs these rather than propagating them.
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<(String, String, String)>>;
}

struct CacheEntry {
    documents: Vec<Document>,
    inserted_at: Instant,
}

struct QuotaState {
    used_today: u32,
    day_bucket: u64,
}

/// Wraps a [`WebSearchTool`] with a daily quota and a short-lived result
/// cache, both process-wide and mutex-guarded per the spec's shared-
/// resource model.
pub struct WebFallback {
    tool: std::sync::Arc<dyn WebSearchTool>,
    daily_quota: u32,
    quota: Mutex<QuotaState>,
    cache: Mutex<HashMap<String, CacheEntry>>,
}

impl WebFallback {
    /// Creates a fallback over `tool` with the given `daily_quota` (the
    /// spec's documented default is 100).
    #[must_use]
    pub fn new(tool: std::sync::Arc<dyn WebSearchTool>, daily_quota: u32) -> Self {
        Self {
            tool,
            daily_quota,
            quota: Mutex::new(QuotaState { used_today: 0, day_bucket: current_day_bucket() }),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Searches the web for `query`, consulting the cache first and the
    /// daily quota second.
    ///
    /// Never returns an error: quota exhaustion, a cache miss paired with
    /// an upstream failure, or an empty upstream result all surface as an
    /// empty document list plus a warning.
    pub async fn search(&self, query: &str, max_results: usize) -> (Vec<Document>, Option<String>) {
        if let Some(documents) = self.cached(query) {
            return (documents, None);
        }

        if !self.consume_quota() {
            return (Vec::new(), Some(crate::error::WebError::QuotaExhausted.to_string()));
        }

        match self.tool.search(query, max_results).await {
            Ok(raw) => {
                let documents = to_documents(raw);
                self.insert_cache(query, documents.clone());
                (documents, None)
            }
            Err(err) => (Vec::new(), Some(err.to_string())),
        }
    }

    fn cached(&self, query: &str) -> Option<Vec<Document>> {
        #[allow(clippy::unwrap_used)]
        let cache = self.cache.lock().unwrap();
        cache.get(query).filter(|entry| entry.inserted_at.elapsed() < CACHE_TTL).map(|entry| entry.documents.clone())
    }

    fn insert_cache(&self, query: &str, documents: Vec<Document>) {
        #[allow(clippy::unwrap_used)]
        let mut cache = self.cache.lock().unwrap();
        cache.insert(query.to_string(), CacheEntry { documents, inserted_at: Instant::now() });
    }

    fn consume_quota(&self) -> bool {
        #[allow(clippy::unwrap_used)]
        let mut quota = self.quota.lock().unwrap();
        let today = current_day_bucket();
        if quota.day_bucket != today {
            quota.day_bucket = today;
            quota.used_today = 0;
        }
        if quota.used_today >= self.daily_quota {
            return false;
        }
        quota.used_today += 1;
        true
    }
}

fn current_day_bucket() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() / 86_400)
        .unwrap_or(0)
}

fn to_documents(raw: Vec<(String, String, String)>) -> Vec<Document> {
    let total = raw.len().max(1);
    raw.into_iter()
        .enumerate()
        .map(|(rank, (url, title, snippet))| {
            #[allow(clippy::cast_precision_loss)]
            let similarity = 1.0 - (rank as f32 / total as f32);
            let mut document = Document::new(
                format!("web:{url}"),
                format!("{title}\n\n{snippet}"),
                DocumentMetadata {
                    source: url,
                    page: 0,
                    category: Category::Web,
                    caption: None,
                    entity: None,
                    human_feedback: None,
                    image_path: None,
                },
            );
            document.similarity = Some(similarity);
            document
        })
        .collect()
}

/// Scripted [`WebSearchTool`] for tests and the CLI demonstrator.
pub mod mock {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::WebSearchTool;
    use crate::error::Result;

    /// Returns a fixed list of results for every query, or fails once if
    /// `fail_once` is set.
    pub struct MockWebSearchTool {
        results: Vec<(String, String, String)>,
        fail_once: Mutex<bool>,
    }

    impl MockWebSearchTool {
        /// Creates a tool that always returns `results`.
        #[must_use]
        pub fn new(results: Vec<(String, String, String)>) -> Self {
            Self { results, fail_once: Mutex::new(false) }
        }

        /// Creates a tool whose first call fails, after which it returns
        /// `results`.
        #[must_use]
        pub fn failing_once(results: Vec<(String, String, String)>) -> Self {
            Self { results, fail_once: Mutex::new(true) }
        }
    }

    #[async_trait]
    impl WebSearchTool for MockWebSearchTool {
        async fn search(&self, _query: &str, max_results: usize) -> Result<Vec<(String, String, String)>> {
            #[allow(clippy::unwrap_used)]
            let mut fail_once = self.fail_once.lock().unwrap();
            if *fail_once {
                *fail_once = false;
                return Err(crate::error::WebError::SearchFailed("simulated failure".to_string()).into());
            }
            Ok(self.results.iter().take(max_results).cloned().collect())
        }
    }
}
