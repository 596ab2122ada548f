use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use kbsearch_core::traits::{CompletionModel, PairInput, PairScore, RelevanceScorer};
use kbsearch_core::{Backend, Error, ScoredCandidate};

use crate::model_output::{lenient_f32, lenient_id, parse_json_value};
use crate::retry::{call_with_retry, RetryPolicy};

pub const DEFAULT_UNSCORED: f32 = 0.3;
pub const UNSCORED_REASON: &str = "unscored";

#[derive(Debug, Clone)]
pub struct RerankOutcome {
    pub candidates: Vec<ScoredCandidate>,
    /// Set when the relevance model could not be used and input order was kept.
    pub warning: Option<String>,
}

pub struct Reranker {
    scorer: Option<Arc<dyn RelevanceScorer>>,
    retry: RetryPolicy,
    unscored_score: f32,
}

impl Reranker {
    pub fn new(scorer: Arc<dyn RelevanceScorer>, retry: RetryPolicy, unscored_score: f32) -> Self {
        Self { scorer: Some(scorer), retry, unscored_score }
    }

    /// A reranker with no model: every call keeps input order and reports a warning.
    pub fn disabled() -> Self {
        Self { scorer: None, retry: RetryPolicy::default(), unscored_score: DEFAULT_UNSCORED }
    }

    /// Scores candidates in one batched call and re-sorts them by relevance,
    /// keeping the incoming order as the tie-break. Never fails.
    pub async fn rerank(&self, query: &str, candidates: Vec<ScoredCandidate>, top_n: usize) -> RerankOutcome {
        if candidates.is_empty() {
            return RerankOutcome { candidates, warning: None };
        }
        let Some(scorer) = self.scorer.as_ref() else {
            return keep_order(candidates, top_n, "no rerank model configured; kept fused order".to_string());
        };

        let inputs: Vec<PairInput> =
            candidates.iter().map(|c| PairInput { id: c.chunk.id.clone(), content: c.chunk.content.clone() }).collect();
        let inputs = inputs.as_slice();
        let scored = call_with_retry(&self.retry, Backend::RerankModel, move || async move {
            scorer.score_pairs(query, inputs).await
        })
        .await;

        let scores = match scored {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "rerank failed, keeping fused order");
                return keep_order(candidates, top_n, format!("rerank skipped: {e}"));
            }
        };

        let by_id: HashMap<&str, &PairScore> = scores.iter().map(|s| (s.id.as_str(), s)).collect();
        let mut matched = 0usize;
        let mut ranked: Vec<(usize, ScoredCandidate)> = candidates
            .into_iter()
            .enumerate()
            .map(|(i, mut c)| {
                match by_id.get(c.chunk.id.as_str()).filter(|s| s.score.is_finite()) {
                    Some(s) => {
                        matched += 1;
                        c.rerank_score = Some(s.score.clamp(0.0, 1.0));
                        c.rerank_reason = Some(s.reason.clone());
                    }
                    None => {
                        c.rerank_score = Some(self.unscored_score);
                        c.rerank_reason = Some(UNSCORED_REASON.to_string());
                    }
                }
                (i, c)
            })
            .collect();
        ranked.sort_by(|(ia, a), (ib, b)| {
            let (sa, sb) = (a.rerank_score.unwrap_or(0.0), b.rerank_score.unwrap_or(0.0));
            sb.total_cmp(&sa).then(ia.cmp(ib))
        });
        ranked.truncate(top_n);
        debug!(matched, total = by_id.len(), "reranked candidates");

        let warning = (matched == 0).then(|| "rerank model scored none of the candidates".to_string());
        RerankOutcome { candidates: ranked.into_iter().map(|(_, c)| c).collect(), warning }
    }
}

fn keep_order(mut candidates: Vec<ScoredCandidate>, top_n: usize, warning: String) -> RerankOutcome {
    candidates.truncate(top_n);
    RerankOutcome { candidates, warning: Some(warning) }
}

const RERANK_SYSTEM_PROMPT: &str = r#"You grade how relevant passages are to a question.
For every passage give a score between 0 and 1 (1 = directly answers the question)
and a one-sentence reason.
Reply with a JSON array only: [{"id": "<passage id>", "score": <0-1>, "reason": "<reason>"}]"#;

/// Relevance scoring through a chat model prompted for a JSON array of scores.
pub struct LlmRelevanceScorer {
    model: Arc<dyn CompletionModel>,
    max_content_chars: usize,
}

impl LlmRelevanceScorer {
    pub fn new(model: Arc<dyn CompletionModel>, max_content_chars: usize) -> Self {
        Self { model, max_content_chars }
    }

    pub fn build_prompt(&self, query: &str, candidates: &[PairInput]) -> String {
        let mut prompt = format!("Question: {query}\n\nPassages:\n");
        for c in candidates {
            let content: String = c.content.chars().take(self.max_content_chars).collect();
            prompt.push_str(&format!("\n[id: {}]\n{}\n", c.id, content));
        }
        prompt
    }
}

/// Reads `[{id, score, reason}]`; malformed entries are skipped.
pub fn parse_scores(reply: &str) -> kbsearch_core::Result<Vec<PairScore>> {
    let value = parse_json_value(reply)?;
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("scores").or_else(|| obj.remove("results")) {
            Some(Value::Array(items)) => items,
            _ => return Err(Error::Parse("rerank reply has no score array".to_string())),
        },
        _ => return Err(Error::Parse("rerank reply is not a JSON array".to_string())),
    };
    Ok(items
        .iter()
        .filter_map(|item| {
            let id = item.get("id").and_then(lenient_id)?;
            let score = item.get("score").and_then(lenient_f32)?;
            let reason = item.get("reason").and_then(Value::as_str).unwrap_or_default().to_string();
            Some(PairScore { id, score, reason })
        })
        .collect())
}

#[async_trait]
impl RelevanceScorer for LlmRelevanceScorer {
    async fn score_pairs(&self, query: &str, candidates: &[PairInput]) -> anyhow::Result<Vec<PairScore>> {
        let reply = self.model.complete(RERANK_SYSTEM_PROMPT, &self.build_prompt(query, candidates)).await?;
        Ok(parse_scores(&reply)?)
    }
}
