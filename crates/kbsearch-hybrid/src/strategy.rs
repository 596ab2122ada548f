use kbsearch_core::{Category, RetrievalMethod, RetrievalStrategy};

/// Static category to strategy table.
pub struct StrategySelector;

impl StrategySelector {
    pub fn select(category: Category) -> RetrievalStrategy {
        use RetrievalMethod::*;
        #[rustfmt::skip]
        let (method, vector_weight, bm25_weight, use_rerank, top_k, rationale) = match category {
            Category::Concept => (Vector, 1.0, 0.0, false, 5,
                "concept questions match on meaning"),
            Category::Process => (Hybrid, 0.6, 0.4, false, 7,
                "process questions need semantic and keyword matches"),
            Category::Compare => (HybridRerank, 0.5, 0.5, true, 5,
                "comparisons need precise matches, reranked"),
            Category::Factual => (Bm25, 0.0, 1.0, false, 3,
                "factual questions hinge on exact keywords"),
            Category::Rule => (Vector, 1.0, 0.0, true, 5,
                "rules need deep understanding, reranked"),
            Category::Troubleshooting => (HybridRerank, 0.5, 0.5, true, 8,
                "troubleshooting needs broad matching, reranked"),
            Category::General => (Vector, 1.0, 0.0, false, 5,
                "general questions use semantic matching"),
        };
        let rationale = rationale.to_string();
        RetrievalStrategy { method, vector_weight, bm25_weight, use_rerank, top_k, rationale }
    }
}
