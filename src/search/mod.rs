//! Hybrid retrieval: dense + lexical search merged by Reciprocal Rank
//! Fusion, executed across a bounded fan-out worker pool.

pub mod retriever;
pub mod rrf;

pub use retriever::{HybridRetriever, RetrieverConfig};
pub use rrf::{RrfConfig, reciprocal_rank_fusion, weighted_rrf};
