//! Adaptive hybrid retrieval: question classification, strategy selection,
//! vector + BM25 fusion, relevance reranking and the orchestrating engine.
pub mod batch;
pub mod classify;
pub mod compare;
pub mod engine;
pub mod fusion;
pub mod model_output;
pub mod rerank;
pub mod retry;
pub mod strategy;

pub use batch::{BatchEntry, BatchItem, BatchOptions, BatchReport};
pub use classify::QuestionClassifier;
pub use compare::{MethodComparison, MethodReport, RetrievalStatistics, StrategyStats};
pub use engine::{PipelineState, RetrievalEngine, RetrievalOutcome, RetrieveOptions};
pub use fusion::{min_max_normalize, FusionEngine};
pub use rerank::{LlmRelevanceScorer, RerankOutcome, Reranker};
pub use retry::RetryPolicy;
pub use strategy::StrategySelector;
