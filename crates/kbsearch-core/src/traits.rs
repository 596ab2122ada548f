use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{Chunk, ChunkId};

pub trait Embedder: Send + Sync {
    fn dim(&self) -> usize;
    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
}

/// Similarity search over an embedding-backed index.
///
/// Returns `(chunk, similarity)` pairs, best first. Similarity is
/// higher-is-better; adapters convert distances at the boundary.
#[async_trait]
pub trait VectorRetriever: Send + Sync {
    async fn search(&self, query: &str, k: usize) -> anyhow::Result<Vec<(Chunk, f32)>>;
}

/// Read-only supply of the chunks that make up a collection.
#[async_trait]
pub trait ChunkSource: Send + Sync {
    async fn load(&self, collection: &str) -> anyhow::Result<Vec<Chunk>>;
}

/// A chat model answering one system + user prompt with text.
#[async_trait]
pub trait CompletionModel: Send + Sync {
    fn model_id(&self) -> &str;
    async fn complete(&self, system: &str, user: &str) -> anyhow::Result<String>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairInput {
    pub id: ChunkId,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairScore {
    pub id: ChunkId,
    pub score: f32,
    #[serde(default)]
    pub reason: String,
}

/// Scores `(query, candidate)` pairs in one batched call.
///
/// Implementations may return fewer scores than candidates; ids not in the
/// input are ignored by callers.
#[async_trait]
pub trait RelevanceScorer: Send + Sync {
    async fn score_pairs(&self, query: &str, candidates: &[PairInput]) -> anyhow::Result<Vec<PairScore>>;
}
