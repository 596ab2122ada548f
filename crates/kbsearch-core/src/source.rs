//! Chunk sources that do not need a vector store.

use anyhow::Context;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::RwLock;

use crate::traits::ChunkSource;
use crate::types::Chunk;

/// Collections held in memory, keyed by name.
#[derive(Debug, Default)]
pub struct InMemoryChunkSource {
    collections: RwLock<HashMap<String, Vec<Chunk>>>,
}

impl InMemoryChunkSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_collection(collection: impl Into<String>, chunks: Vec<Chunk>) -> Self {
        let source = Self::new();
        source.replace(collection, chunks);
        source
    }

    /// Swaps in a new corpus for `collection`.
    pub fn replace(&self, collection: impl Into<String>, chunks: Vec<Chunk>) {
        let mut guard = self.collections.write().unwrap_or_else(|e| e.into_inner());
        guard.insert(collection.into(), chunks);
    }

    pub fn chunks(&self, collection: &str) -> Vec<Chunk> {
        let guard = self.collections.read().unwrap_or_else(|e| e.into_inner());
        guard.get(collection).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl ChunkSource for InMemoryChunkSource {
    async fn load(&self, collection: &str) -> anyhow::Result<Vec<Chunk>> {
        Ok(self.chunks(collection))
    }
}

/// Reads chunks from a JSON Lines file, one `{id, content, metadata?}` per line.
/// Blank lines are skipped.
pub fn load_jsonl(path: &Path) -> anyhow::Result<Vec<Chunk>> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let mut chunks = Vec::new();
    for (i, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let chunk: Chunk = serde_json::from_str(line)
            .with_context(|| format!("{}:{}: invalid chunk", path.display(), i + 1))?;
        chunks.push(chunk);
    }
    tracing::debug!(path = %path.display(), count = chunks.len(), "loaded chunks");
    Ok(chunks)
}
