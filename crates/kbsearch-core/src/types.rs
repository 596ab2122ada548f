//! Domain types shared by the keyword, vector and hybrid crates.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

pub type ChunkId = String;
pub type Meta = BTreeMap<String, String>;

/// A unit of indexed document text.
///
/// - `id`: stable identifier assigned by ingestion; fusion merges on it
/// - `content`: the text payload of the chunk
/// - `metadata`: source path, position and other facets
///
/// Chunks are read-only to the retrieval engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub content: String,
    #[serde(default)]
    pub metadata: Meta,
}

impl Chunk {
    pub fn new(id: impl Into<ChunkId>, content: impl Into<String>) -> Self {
        Self { id: id.into(), content: content.into(), metadata: Meta::new() }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Semantic category of a user question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Definitions and meanings.
    Concept,
    /// How-to questions and step sequences.
    Process,
    /// Differences between two or more things.
    Compare,
    /// Quantities, dates and other concrete facts.
    Factual,
    /// Regulations, requirements and policies.
    Rule,
    /// Errors and failures.
    Troubleshooting,
    General,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Category::Concept,
        Category::Process,
        Category::Compare,
        Category::Factual,
        Category::Rule,
        Category::Troubleshooting,
        Category::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Concept => "concept",
            Category::Process => "process",
            Category::Compare => "compare",
            Category::Factual => "factual",
            Category::Rule => "rule",
            Category::Troubleshooting => "troubleshooting",
            Category::General => "general",
        }
    }

    /// Lenient parse for labels coming from a model: anything unknown is `General`.
    pub fn from_label(label: &str) -> Self {
        label.parse().unwrap_or(Category::General)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == wanted)
            .ok_or_else(|| Error::Validation(format!("unknown question category '{s}'")))
    }
}

/// Output of the question classifier.
///
/// Serialized as `{type, confidence, reason}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryClassification {
    #[serde(rename = "type")]
    pub category: Category,
    pub confidence: f32,
    #[serde(rename = "reason")]
    pub rationale: String,
}

/// How candidates are retrieved for a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMethod {
    Vector,
    Bm25,
    Hybrid,
    HybridRerank,
}

impl RetrievalMethod {
    pub const ALL: [RetrievalMethod; 4] = [
        RetrievalMethod::Vector,
        RetrievalMethod::Bm25,
        RetrievalMethod::Hybrid,
        RetrievalMethod::HybridRerank,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalMethod::Vector => "vector",
            RetrievalMethod::Bm25 => "bm25",
            RetrievalMethod::Hybrid => "hybrid",
            RetrievalMethod::HybridRerank => "hybrid_rerank",
        }
    }

    /// Both retrievers run and their results are fused.
    pub fn is_hybrid(&self) -> bool {
        matches!(self, RetrievalMethod::Hybrid | RetrievalMethod::HybridRerank)
    }
}

impl fmt::Display for RetrievalMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RetrievalMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        RetrievalMethod::ALL
            .into_iter()
            .find(|m| m.as_str() == wanted)
            .ok_or_else(|| Error::Validation(format!("unknown retrieval method '{s}'")))
    }
}

/// Score combination used when both retrievers ran.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FusionMethod {
    /// Weighted sum of min-max normalized scores.
    #[default]
    Weighted,
    /// Reciprocal Rank Fusion.
    Rrf,
}

impl FromStr for FusionMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "weighted" => Ok(FusionMethod::Weighted),
            "rrf" => Ok(FusionMethod::Rrf),
            other => Err(Error::Validation(format!("unknown fusion method '{other}'"))),
        }
    }
}

/// Keyword tokenization policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenizerKind {
    /// CJK runs get n-grams, everything else gets word tokens.
    #[default]
    Auto,
    Cjk,
    Word,
}

/// A retrieval plan for one query.
///
/// For hybrid methods `vector_weight + bm25_weight == 1.0`. Single-method
/// strategies carry the weight of the retriever they use (1.0) and 0.0 for
/// the other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalStrategy {
    pub method: RetrievalMethod,
    pub vector_weight: f32,
    pub bm25_weight: f32,
    pub use_rerank: bool,
    pub top_k: usize,
    #[serde(default)]
    pub rationale: String,
}

impl RetrievalStrategy {
    /// Validates and normalizes a strategy.
    ///
    /// Hybrid weights with a positive total are rescaled to sum to 1.
    /// `HybridRerank` always reranks.
    pub fn new(
        method: RetrievalMethod,
        vector_weight: f32,
        bm25_weight: f32,
        use_rerank: bool,
        top_k: usize,
    ) -> Result<Self> {
        if top_k == 0 {
            return Err(Error::Validation("top_k must be at least 1".to_string()));
        }
        for w in [vector_weight, bm25_weight] {
            if !w.is_finite() || w < 0.0 {
                let msg = format!("weights must be finite and non-negative, got {w}");
                return Err(Error::Validation(msg));
            }
        }
        let (vector_weight, bm25_weight) = match method {
            RetrievalMethod::Vector => (1.0, 0.0),
            RetrievalMethod::Bm25 => (0.0, 1.0),
            RetrievalMethod::Hybrid | RetrievalMethod::HybridRerank => {
                let total = vector_weight + bm25_weight;
                if total <= 0.0 {
                    let msg = "hybrid weights must not both be zero".to_string();
                    return Err(Error::Validation(msg));
                }
                (vector_weight / total, bm25_weight / total)
            }
        };
        Ok(Self {
            method,
            vector_weight,
            bm25_weight,
            use_rerank: use_rerank || method == RetrievalMethod::HybridRerank,
            top_k,
            rationale: String::new(),
        })
    }

    /// Default plan for running `method` on its own (hybrid at 0.5/0.5).
    pub fn for_method(method: RetrievalMethod, top_k: usize) -> Result<Self> {
        Self::new(method, 0.5, 0.5, method == RetrievalMethod::HybridRerank, top_k)
            .map(|s| s.with_rationale(format!("explicit {method} retrieval")))
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = rationale.into();
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Result<Self> {
        if top_k == 0 {
            return Err(Error::Validation("top_k must be at least 1".to_string()));
        }
        self.top_k = top_k;
        Ok(self)
    }

    /// Stable label such as `hybrid`, `vector_rerank` or `hybrid_rerank`.
    pub fn label(&self) -> String {
        if self.use_rerank && self.method != RetrievalMethod::HybridRerank {
            format!("{}_rerank", self.method)
        } else {
            self.method.to_string()
        }
    }
}

/// A candidate as it moves through fusion and reranking. Lives for one query.
///
/// A rank of `None` means the chunk did not appear in that source list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub chunk: Chunk,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_score: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bm25_score: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_rank: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bm25_rank: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hybrid_score: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerank_reason: Option<String>,
}

impl ScoredCandidate {
    pub fn new(chunk: Chunk) -> Self {
        Self {
            chunk,
            vector_score: None,
            bm25_score: None,
            vector_rank: None,
            bm25_rank: None,
            hybrid_score: None,
            rerank_score: None,
            rerank_reason: None,
        }
    }

    pub fn from_vector(chunk: Chunk, score: f32, rank: usize) -> Self {
        Self { vector_score: Some(score), vector_rank: Some(rank), ..Self::new(chunk) }
    }

    pub fn from_bm25(chunk: Chunk, score: f32, rank: usize) -> Self {
        Self { bm25_score: Some(score), bm25_rank: Some(rank), ..Self::new(chunk) }
    }

    /// The most refined score this candidate carries, with its kind.
    pub fn best_score(&self) -> (f32, ScoreKind) {
        if let Some(s) = self.rerank_score {
            (s, ScoreKind::Rerank)
        } else if let Some(s) = self.hybrid_score {
            (s, ScoreKind::Hybrid)
        } else if let Some(s) = self.vector_score {
            (s, ScoreKind::Vector)
        } else {
            (self.bm25_score.unwrap_or(0.0), ScoreKind::Bm25)
        }
    }
}

/// Which stage produced a result's score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreKind {
    Vector,
    Bm25,
    Hybrid,
    Rerank,
}

/// Final output unit, ranked from 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    #[serde(flatten)]
    pub chunk: Chunk,
    pub score: f32,
    pub score_kind: ScoreKind,
    pub rank: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hybrid_weights_are_rescaled() {
        let s = RetrievalStrategy::new(RetrievalMethod::Hybrid, 3.0, 1.0, false, 5).unwrap();
        assert!((s.vector_weight - 0.75).abs() < 1e-6);
        assert!((s.bm25_weight - 0.25).abs() < 1e-6);
        assert!((s.vector_weight + s.bm25_weight - 1.0).abs() < 1e-6);
    }

    #[test]
    fn invalid_strategies_are_rejected() {
        assert!(RetrievalStrategy::new(RetrievalMethod::Hybrid, 0.0, 0.0, false, 5).is_err());
        assert!(RetrievalStrategy::new(RetrievalMethod::Vector, 1.0, 0.0, false, 0).is_err());
        assert!(RetrievalStrategy::new(RetrievalMethod::Hybrid, -1.0, 2.0, false, 5).is_err());
    }

    #[test]
    fn hybrid_rerank_forces_rerank_and_labels() {
        let s = RetrievalStrategy::new(RetrievalMethod::HybridRerank, 0.5, 0.5, false, 5).unwrap();
        assert!(s.use_rerank);
        assert_eq!(s.label(), "hybrid_rerank");
        let v = RetrievalStrategy::new(RetrievalMethod::Vector, 0.3, 0.7, true, 5).unwrap();
        assert_eq!((v.vector_weight, v.bm25_weight), (1.0, 0.0));
        assert_eq!(v.label(), "vector_rerank");
    }

    #[test]
    fn method_and_category_parsing() {
        let method: RetrievalMethod = "hybrid-rerank".parse().unwrap();
        assert_eq!(method, RetrievalMethod::HybridRerank);
        assert_eq!(" BM25 ".parse::<RetrievalMethod>().unwrap(), RetrievalMethod::Bm25);
        assert!("semantic".parse::<RetrievalMethod>().is_err());
        assert_eq!(Category::from_label("Troubleshooting"), Category::Troubleshooting);
        assert_eq!(Category::from_label("chit-chat"), Category::General);
    }

    #[test]
    fn classification_serializes_with_external_names() {
        let c = QueryClassification {
            category: Category::Rule,
            confidence: 0.8,
            rationale: "policy".into(),
        };
        let v = serde_json::to_value(&c).unwrap();
        assert_eq!(v["type"], "rule");
        assert_eq!(v["reason"], "policy");
    }

    #[test]
    fn ranked_result_flattens_chunk() {
        let r = RankedResult {
            chunk: Chunk::new("c1", "text").with_meta("source", "a.txt"),
            score: 0.5,
            score_kind: ScoreKind::Hybrid,
            rank: 1,
            reason: None,
        };
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["content"], "text");
        assert_eq!(v["metadata"]["source"], "a.txt");
        assert_eq!(v["score_kind"], "hybrid");
        assert!(v.get("reason").is_none());
    }
}
