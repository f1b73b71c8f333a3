//! The two independent quality gates: the hallucination checker and the
//! answer grader.
//!
//! Both are schema-constrained model calls translated into a shared
//! [`crate::state::QualityReport`] shape, grounded on the CRAG agent's
//! `grade_documents_node` relevance-scoring idiom (score against a
//! threshold, route to retry below it) generalized from a single
//! relevance score to this domain's two distinct gates.

pub mod grader;
pub mod hallucination;

pub use grader::AnswerGrader;
pub use hallucination::HallucinationChecker;
