use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use kbsearch_core::config::BatchSettings;
use kbsearch_core::{Error, ErrorPayload, RankedResult};

use crate::engine::{RetrievalEngine, RetrieveOptions};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOptions {
    pub top_k: Option<usize>,
    /// Limit for each query.
    pub item_timeout: Option<Duration>,
    /// Limit for the whole batch; queries not started by then are cancelled.
    pub deadline: Option<Duration>,
}

impl BatchOptions {
    pub fn from_settings(settings: &BatchSettings) -> Self {
        Self {
            top_k: None,
            item_timeout: settings.item_timeout_ms.map(Duration::from_millis),
            deadline: settings.deadline_ms.map(Duration::from_millis),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum BatchItem {
    Success {
        strategy: String,
        partial: bool,
        results: Vec<RankedResult>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        warnings: Vec<String>,
    },
    Failure {
        error: ErrorPayload,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchEntry {
    pub index: usize,
    pub query: String,
    #[serde(flatten)]
    pub item: BatchItem,
}

impl BatchEntry {
    pub fn is_success(&self) -> bool {
        matches!(self.item, BatchItem::Success { .. })
    }

    fn failure(index: usize, query: &str, err: &Error) -> Self {
        Self { index, query: query.to_string(), item: BatchItem::Failure { error: err.payload() } }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<BatchEntry>,
}

impl RetrievalEngine {
    pub async fn retrieve_batch(&self, queries: &[String], options: &BatchOptions) -> BatchReport {
        self.retrieve_batch_with(queries, options, |_| {}).await
    }

    /// Runs each query in order with per-item isolation; `on_entry` sees every entry as it completes.
    pub async fn retrieve_batch_with<F>(&self, queries: &[String], options: &BatchOptions, mut on_entry: F) -> BatchReport
    where
        F: FnMut(&BatchEntry),
    {
        let started = Instant::now();
        let mut results = Vec::with_capacity(queries.len());

        for (index, query) in queries.iter().enumerate() {
            let remaining = options.deadline.map(|d| d.saturating_sub(started.elapsed()));
            let entry = if remaining == Some(Duration::ZERO) {
                let err = Error::Cancelled("batch deadline passed before the query started".to_string());
                BatchEntry::failure(index, query, &err)
            } else {
                let limit = match (options.item_timeout, remaining) {
                    (Some(a), Some(b)) => Some(a.min(b)),
                    (a, b) => a.or(b),
                };
                let per_query = RetrieveOptions { top_k: options.top_k, ..Default::default() };
                let run = self.retrieve(query, per_query);
                let outcome = match limit {
                    Some(limit) => match tokio::time::timeout(limit, run).await {
                        Ok(r) => r,
                        Err(_) => Err(Error::Timeout { timeout_ms: limit.as_millis() as u64 }),
                    },
                    None => run.await,
                };
                match outcome {
                    Ok(o) => BatchEntry {
                        index,
                        query: query.clone(),
                        item: BatchItem::Success {
                            strategy: o.strategy.label(),
                            partial: o.partial,
                            results: o.results,
                            warnings: o.warnings,
                        },
                    },
                    Err(e) => {
                        warn!(index, error = %e, "batch query failed");
                        BatchEntry::failure(index, query, &e)
                    }
                }
            };
            on_entry(&entry);
            results.push(entry);
        }

        let succeeded = results.iter().filter(|e| e.is_success()).count();
        let report = BatchReport { total: queries.len(), succeeded, failed: results.len() - succeeded, results };
        info!(total = report.total, succeeded = report.succeeded, failed = report.failed, "batch finished");
        report
    }
}
