use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use kbsearch_core::config::RetrievalSettings;
use kbsearch_core::traits::VectorRetriever;
use kbsearch_core::{
    Backend, Chunk, Error, QueryClassification, RankedResult, Result, RetrievalMethod,
    RetrievalStrategy, ScoredCandidate,
};
use kbsearch_text::KeywordIndex;

use crate::classify::QuestionClassifier;
use crate::fusion::FusionEngine;
use crate::rerank::Reranker;
use crate::retry::{call_with_retry, RetryPolicy};
use crate::strategy::StrategySelector;

/// Stages a single `retrieve` call passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Start,
    Classified,
    StrategySelected,
    Retrieving,
    Fusing,
    Reranking,
    Done,
    Failed,
}

#[derive(Debug, Clone, Default)]
pub struct RetrieveOptions {
    /// Replaces the strategy's result count.
    pub top_k: Option<usize>,
    /// Skips classification and strategy selection.
    pub strategy: Option<RetrievalStrategy>,
    /// Keyword search ranks these chunks instead of the stored collection.
    pub documents: Option<Arc<Vec<Chunk>>>,
}

impl RetrieveOptions {
    pub fn top_k(top_k: usize) -> Self {
        Self { top_k: Some(top_k), ..Default::default() }
    }

    pub fn strategy(strategy: RetrievalStrategy) -> Self {
        Self { strategy: Some(strategy), ..Default::default() }
    }

    pub fn with_documents(mut self, documents: Vec<Chunk>) -> Self {
        self.documents = Some(Arc::new(documents));
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalOutcome {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<QueryClassification>,
    pub strategy: RetrievalStrategy,
    pub results: Vec<RankedResult>,
    /// One retriever of a hybrid strategy failed and the other's results were used.
    pub partial: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub trace: Vec<PipelineState>,
    pub elapsed_ms: u64,
}

impl RetrievalOutcome {
    pub fn top_score(&self) -> Option<f32> {
        self.results.first().map(|r| r.score)
    }
}

/// Adaptive hybrid retrieval over one collection.
pub struct RetrievalEngine {
    settings: RetrievalSettings,
    classifier: QuestionClassifier,
    vector: Arc<dyn VectorRetriever>,
    keyword: Arc<KeywordIndex>,
    fusion: FusionEngine,
    reranker: Reranker,
    retry: RetryPolicy,
}

impl RetrievalEngine {
    /// Rules-only classification and no rerank model until configured otherwise.
    pub fn new(
        settings: RetrievalSettings,
        vector: Arc<dyn VectorRetriever>,
        keyword: Arc<KeywordIndex>,
    ) -> Self {
        Self {
            fusion: FusionEngine::new(settings.fusion.rrf_k),
            retry: RetryPolicy::from_settings(&settings.backend),
            classifier: QuestionClassifier::rules_only(),
            reranker: Reranker::disabled(),
            settings,
            vector,
            keyword,
        }
    }

    pub fn with_classifier(mut self, classifier: QuestionClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_reranker(mut self, reranker: Reranker) -> Self {
        self.reranker = reranker;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn settings(&self) -> &RetrievalSettings {
        &self.settings
    }

    pub fn keyword_index(&self) -> &KeywordIndex {
        &self.keyword
    }

    pub async fn classify(&self, query: &str) -> Result<QueryClassification> {
        self.classifier.classify(query).await
    }

    /// Default plan for running `method` alone, using the configured hybrid weights.
    pub fn strategy_for(&self, method: RetrievalMethod, top_k: usize) -> Result<RetrievalStrategy> {
        let f = &self.settings.fusion;
        let rerank = method == RetrievalMethod::HybridRerank;
        RetrievalStrategy::new(method, f.vector_weight, f.bm25_weight, rerank, top_k)
            .map(|s| s.with_rationale(format!("explicit {method} retrieval")))
    }

    /// Candidate pool for fusion and rerank: `top_k * multiplier`, capped, never below `top_k`.
    pub fn pool_size(&self, top_k: usize) -> usize {
        let f = &self.settings.fusion;
        top_k.saturating_mul(f.candidate_multiplier).min(f.max_candidates).max(top_k)
    }

    pub async fn retrieve(
        &self,
        query: &str,
        options: RetrieveOptions,
    ) -> Result<RetrievalOutcome> {
        let started = Instant::now();
        let mut trace = vec![PipelineState::Start];
        if query.trim().is_empty() {
            trace.push(PipelineState::Failed);
            debug!(?trace, "rejected blank query");
            return Err(Error::Validation("query must not be empty".to_string()));
        }

        let (classification, strategy) = match options.strategy {
            Some(s) => (None, s),
            None => {
                let c = self.classifier.classify(query).await?;
                trace.push(PipelineState::Classified);
                let s = StrategySelector::select(c.category);
                (Some(c), s)
            }
        };
        let strategy = match options.top_k {
            Some(k) => strategy.with_top_k(k)?,
            None => strategy,
        };
        if strategy.top_k == 0 {
            return Err(Error::Validation("top_k must be at least 1".to_string()));
        }
        trace.push(PipelineState::StrategySelected);
        debug!(strategy = %strategy.label(), top_k = strategy.top_k, "strategy selected");

        let mut warnings = Vec::new();
        let fetch_k = if strategy.use_rerank || strategy.method.is_hybrid() {
            self.pool_size(strategy.top_k)
        } else {
            strategy.top_k
        };

        trace.push(PipelineState::Retrieving);
        let documents = options.documents.as_deref().map(Vec::as_slice);
        let (mut candidates, partial) = match strategy.method {
            RetrievalMethod::Vector => (self.vector_candidates(query, fetch_k).await?, false),
            RetrievalMethod::Bm25 => {
                let (hits, notice) = self.keyword_search(query, fetch_k, documents).await?;
                warnings.extend(notice);
                (bm25_to_candidates(hits), false)
            }
            RetrievalMethod::Hybrid | RetrievalMethod::HybridRerank => {
                let (vector, keyword) = tokio::join!(
                    self.vector_search(query, fetch_k),
                    self.keyword_search(query, fetch_k, documents)
                );
                match (vector, keyword) {
                    (Ok(v), Ok((b, notice))) => {
                        warnings.extend(notice);
                        trace.push(PipelineState::Fusing);
                        let fused = self.fusion.fuse(
                            &v,
                            &b,
                            strategy.vector_weight,
                            strategy.bm25_weight,
                            self.settings.fusion.method,
                        );
                        (fused, false)
                    }
                    (Ok(v), Err(e)) => {
                        warn!(error = %e, "keyword search failed, using vector results only");
                        warnings.push(format!("{e}; using vector results only"));
                        (vector_to_candidates(v), true)
                    }
                    (Err(e), Ok((b, notice))) => {
                        warn!(error = %e, "vector search failed, using keyword results only");
                        warnings.extend(notice);
                        warnings.push(format!("{e}; using keyword results only"));
                        (bm25_to_candidates(b), true)
                    }
                    (Err(e), Err(other)) => {
                        warn!(error = %other, "keyword search failed too");
                        return Err(e);
                    }
                }
            }
        };

        if strategy.use_rerank {
            trace.push(PipelineState::Reranking);
            candidates.truncate(self.pool_size(strategy.top_k));
            let out = self.reranker.rerank(query, candidates, strategy.top_k).await;
            warnings.extend(out.warning);
            candidates = out.candidates;
        }

        candidates.truncate(strategy.top_k);
        let results = rank(candidates);
        trace.push(PipelineState::Done);
        let elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            strategy = %strategy.label(),
            results = results.len(),
            partial,
            elapsed_ms,
            "retrieve finished"
        );

        Ok(RetrievalOutcome {
            query: query.to_string(),
            classification,
            strategy,
            results,
            partial,
            warnings,
            trace,
            elapsed_ms,
        })
    }

    async fn vector_search(&self, query: &str, k: usize) -> Result<Vec<(Chunk, f32)>> {
        let vector = &self.vector;
        let hits = call_with_retry(&self.retry, Backend::VectorStore, move || async move {
            vector.search(query, k).await
        })
        .await?;
        // similarity is reported higher-is-better in [0, 1]
        let clamp = |s: f32| if s.is_finite() { s.clamp(0.0, 1.0) } else { 0.0 };
        Ok(hits.into_iter().map(|(c, s)| (c, clamp(s))).collect())
    }

    async fn keyword_search(
        &self,
        query: &str,
        k: usize,
        documents: Option<&[Chunk]>,
    ) -> Result<(Vec<(Chunk, f32)>, Option<String>)> {
        let keyword = &self.keyword;
        let collection = self.settings.collection.as_str();
        let found = call_with_retry(&self.retry, Backend::KeywordIndex, move || async move {
            let found = match documents {
                Some(docs) => keyword.search_documents(query, docs.to_vec(), k).await,
                None => keyword.search(collection, query, k).await,
            };
            found.map_err(anyhow::Error::from)
        })
        .await?;
        Ok((found.hits.into_iter().map(|h| (h.chunk, h.score)).collect(), found.notice))
    }

    async fn vector_candidates(&self, query: &str, k: usize) -> Result<Vec<ScoredCandidate>> {
        Ok(vector_to_candidates(self.vector_search(query, k).await?))
    }
}

fn vector_to_candidates(hits: Vec<(Chunk, f32)>) -> Vec<ScoredCandidate> {
    hits.into_iter()
        .enumerate()
        .map(|(rank, (c, s))| ScoredCandidate::from_vector(c, s, rank))
        .collect()
}

fn bm25_to_candidates(hits: Vec<(Chunk, f32)>) -> Vec<ScoredCandidate> {
    hits.into_iter()
        .enumerate()
        .map(|(rank, (c, s))| ScoredCandidate::from_bm25(c, s, rank))
        .collect()
}

fn rank(candidates: Vec<ScoredCandidate>) -> Vec<RankedResult> {
    candidates
        .into_iter()
        .enumerate()
        .map(|(i, c)| {
            let (score, score_kind) = c.best_score();
            RankedResult { chunk: c.chunk, score, score_kind, rank: i + 1, reason: c.rerank_reason }
        })
        .collect()
}
