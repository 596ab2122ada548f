use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::Arc;

use kbsearch_core::traits::{Embedder, VectorRetriever};
use kbsearch_core::Chunk;

use crate::embed::cosine;

/// Brute-force cosine search over chunks embedded up front.
pub struct InMemoryVectorRetriever {
    entries: Vec<(Chunk, Vec<f32>)>,
    embedder: Arc<dyn Embedder>,
}

impl InMemoryVectorRetriever {
    pub fn build(chunks: Vec<Chunk>, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = embedder.embed_batch(&texts)?;
        if vectors.len() != chunks.len() {
            return Err(anyhow!("embedder returned {} vectors for {} chunks", vectors.len(), chunks.len()));
        }
        Ok(Self { entries: chunks.into_iter().zip(vectors).collect(), embedder })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl VectorRetriever for InMemoryVectorRetriever {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<(Chunk, f32)>> {
        let q = self
            .embedder
            .embed_batch(&[query.to_string()])?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("embedder returned no vector"))?;
        let mut scored: Vec<(usize, f32)> = self.entries.iter().enumerate().map(|(i, (_, v))| (i, cosine(&q, v))).collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        Ok(scored.into_iter().take(k).map(|(i, s)| (self.entries[i].0.clone(), s)).collect())
    }
}
