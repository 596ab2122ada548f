#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use kbsearch_core::config::RetrievalSettings;
use kbsearch_core::source::InMemoryChunkSource;
use kbsearch_core::traits::{ChunkSource, CompletionModel, PairInput, PairScore, RelevanceScorer, VectorRetriever};
use kbsearch_core::{Chunk, TokenizerKind};
use kbsearch_hybrid::{RetrievalEngine, RetryPolicy};
use kbsearch_text::{Bm25Params, IndexCache, KeywordIndex};
use kbsearch_vector::{HashEmbedder, InMemoryVectorRetriever};

pub const COLLECTION: &str = "kb";

pub fn corpus() -> Vec<Chunk> {
    vec![
        Chunk::new("c1", "建账是指企业根据会计准则设置账簿的过程。"),
        Chunk::new("c2", "新办企业如何建账：第一步设置会计科目，第二步录入期初余额，第三步试算平衡。"),
        Chunk::new("c3", "现金日记账和银行存款日记账的区别在于登记依据和核对对象不同。"),
        Chunk::new("c4", "固定资产折旧率是多少取决于资产类别，一般按年限平均法计算。"),
        Chunk::new("c5", "会计核算的基本要求包括真实、准确、及时，建账有明确规定。"),
        Chunk::new("c6", "凭证审核失败通常因为借贷不平衡，应检查分录后重新提交。"),
        Chunk::new("c7", "Value added tax (VAT) is levied on the value added at each stage."),
        Chunk::new("c8", "If the tax control device fails, restart it and contact the service provider."),
    ]
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy { timeout: Duration::from_secs(5), max_retries: 0, backoff: Duration::ZERO }
}

/// In-memory vector search that can be switched off or fail on marked queries.
pub struct FlakyVector {
    inner: InMemoryVectorRetriever,
    pub down: AtomicBool,
}

impl FlakyVector {
    pub fn new(chunks: Vec<Chunk>) -> Self {
        let inner = InMemoryVectorRetriever::build(chunks, Arc::new(HashEmbedder::new(256))).expect("embed corpus");
        Self { inner, down: AtomicBool::new(false) }
    }
}

#[async_trait]
impl VectorRetriever for FlakyVector {
    async fn search(&self, query: &str, k: usize) -> anyhow::Result<Vec<(Chunk, f32)>> {
        if self.down.load(Ordering::SeqCst) || query.contains("boom") {
            anyhow::bail!("vector store connection refused");
        }
        self.inner.search(query, k).await
    }
}

pub struct FailingSource;

#[async_trait]
impl ChunkSource for FailingSource {
    async fn load(&self, _collection: &str) -> anyhow::Result<Vec<Chunk>> {
        anyhow::bail!("chunk store offline")
    }
}

/// Replies with a fixed text, or fails when `reply` is `None`.
pub struct ScriptedModel {
    pub reply: Option<String>,
}

#[async_trait]
impl CompletionModel for ScriptedModel {
    fn model_id(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _system: &str, _user: &str) -> anyhow::Result<String> {
        self.reply.clone().ok_or_else(|| anyhow::anyhow!("model backend unavailable"))
    }
}

/// Scores the last candidate 0.95 and the first 0.9, leaving the rest unscored.
#[derive(Default)]
pub struct EndsFirstScorer {
    pub seen: Mutex<Vec<PairInput>>,
    pub fail: bool,
}

#[async_trait]
impl RelevanceScorer for EndsFirstScorer {
    async fn score_pairs(&self, _query: &str, candidates: &[PairInput]) -> anyhow::Result<Vec<PairScore>> {
        *self.seen.lock().unwrap() = candidates.to_vec();
        if self.fail {
            anyhow::bail!("rerank model returned garbage");
        }
        let mut out = Vec::new();
        if let Some(last) = candidates.last() {
            out.push(PairScore { id: last.id.clone(), score: 0.95, reason: "best match".into() });
        }
        if candidates.len() > 1 {
            out.push(PairScore { id: candidates[0].id.clone(), score: 0.9, reason: "good match".into() });
        }
        out.push(PairScore { id: "not-a-candidate".into(), score: 1.0, reason: String::new() });
        Ok(out)
    }
}

pub struct Harness {
    pub engine: RetrievalEngine,
    pub vector: Arc<FlakyVector>,
    pub _dir: TempDir,
}

pub fn settings(dir: &TempDir) -> RetrievalSettings {
    RetrievalSettings {
        collection: COLLECTION.to_string(),
        cache_dir: dir.path().to_string_lossy().to_string(),
        ..RetrievalSettings::default()
    }
}

pub fn harness_with_source(source: Arc<dyn ChunkSource>) -> Harness {
    let dir = TempDir::new().expect("tempdir");
    let settings = settings(&dir);
    let cache = Arc::new(IndexCache::new(dir.path(), TokenizerKind::Auto, &[]));
    let keyword = Arc::new(KeywordIndex::new(cache, source, Bm25Params::default()));
    let vector = Arc::new(FlakyVector::new(corpus()));
    let engine = RetrievalEngine::new(settings, vector.clone(), keyword).with_retry(fast_retry());
    Harness { engine, vector, _dir: dir }
}

pub fn harness() -> Harness {
    harness_with_source(Arc::new(InMemoryChunkSource::with_collection(COLLECTION, corpus())))
}
