use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use kbsearch_core::{Chunk, Error, ErrorPayload, RankedResult, Result, RetrievalMethod};

use crate::engine::{RetrievalEngine, RetrieveOptions};

pub const DEFAULT_COMPARE_TOP_K: usize = 5;
/// Leading scores reported per method.
pub const REPORTED_TOP_SCORES: usize = 3;

#[derive(Debug, Clone, Serialize)]
pub struct MethodReport {
    pub results: Vec<RankedResult>,
    /// Mean score of all returned results, 0 when there are none.
    pub avg_score: f32,
    /// Scores of the best few results, best first.
    pub top_scores: Vec<f32>,
    pub elapsed_ms: u64,
    pub partial: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MethodComparison {
    pub query: String,
    pub methods: BTreeMap<String, MethodReport>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StrategyStats {
    pub count: usize,
    pub avg_docs: f32,
    pub avg_top_score: f32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RetrievalStatistics {
    pub total_queries: usize,
    pub failed: usize,
    pub strategies: BTreeMap<String, StrategyStats>,
    pub question_types: BTreeMap<String, usize>,
}

fn top_scores(results: &[RankedResult]) -> Vec<f32> {
    results.iter().take(REPORTED_TOP_SCORES).map(|r| r.score).collect()
}

fn mean(values: impl Iterator<Item = f32>) -> f32 {
    let (sum, n) = values.fold((0.0f32, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 { 0.0 } else { sum / n as f32 }
}

impl RetrievalEngine {
    /// Runs every method independently on `query`. A failing method is reported, not raised.
    pub async fn compare_methods(
        &self,
        query: &str,
        methods: &[RetrievalMethod],
        top_k: Option<usize>,
    ) -> Result<MethodComparison> {
        self.compare_methods_with(query, methods, top_k, None).await
    }

    /// As [`compare_methods`](Self::compare_methods); when `documents` is given the
    /// keyword side ranks those chunks instead of the stored collection.
    pub async fn compare_methods_with(
        &self,
        query: &str,
        methods: &[RetrievalMethod],
        top_k: Option<usize>,
        documents: Option<Vec<Chunk>>,
    ) -> Result<MethodComparison> {
        if query.trim().is_empty() {
            return Err(Error::Validation("query must not be empty".to_string()));
        }
        let top_k = top_k.unwrap_or(DEFAULT_COMPARE_TOP_K);
        let documents = documents.map(Arc::new);
        let mut reports = BTreeMap::new();
        for &method in methods {
            let options = RetrieveOptions {
                strategy: Some(self.strategy_for(method, top_k)?),
                documents: documents.clone(),
                ..Default::default()
            };
            let started = Instant::now();
            let report = match self.retrieve(query, options).await {
                Ok(o) => MethodReport {
                    avg_score: mean(o.results.iter().map(|r| r.score)),
                    top_scores: top_scores(&o.results),
                    elapsed_ms: o.elapsed_ms,
                    partial: o.partial,
                    results: o.results,
                    error: None,
                },
                Err(e) => MethodReport {
                    results: Vec::new(),
                    avg_score: 0.0,
                    top_scores: Vec::new(),
                    elapsed_ms: started.elapsed().as_millis() as u64,
                    partial: false,
                    error: Some(e.payload()),
                },
            };
            debug!(%method, avg_score = report.avg_score, "method compared");
            reports.insert(method.to_string(), report);
        }
        Ok(MethodComparison { query: query.to_string(), methods: reports })
    }

    /// Runs the adaptive pipeline over `queries` and aggregates per strategy label.
    pub async fn statistics(&self, queries: &[String]) -> RetrievalStatistics {
        let mut stats = RetrievalStatistics { total_queries: queries.len(), ..Default::default() };
        let mut per_label: BTreeMap<String, (usize, Vec<f32>, Vec<f32>)> = BTreeMap::new();

        for query in queries {
            match self.retrieve(query, RetrieveOptions::default()).await {
                Ok(o) => {
                    if let Some(c) = &o.classification {
                        *stats.question_types.entry(c.category.to_string()).or_insert(0) += 1;
                    }
                    let entry = per_label.entry(o.strategy.label()).or_default();
                    entry.0 += 1;
                    entry.1.push(o.results.len() as f32);
                    entry.2.push(o.top_score().unwrap_or(0.0));
                }
                Err(e) => {
                    debug!(error = %e, "statistics query failed");
                    stats.failed += 1;
                }
            }
        }

        stats.strategies = per_label
            .into_iter()
            .map(|(label, (count, docs, tops))| {
                let avg_docs = mean(docs.into_iter());
                (label, StrategyStats { count, avg_docs, avg_top_score: mean(tops.into_iter()) })
            })
            .collect();
        stats
    }
}
