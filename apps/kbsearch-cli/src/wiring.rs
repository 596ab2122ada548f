//! Assembles a `RetrievalEngine` from settings and the chosen chunk store.
use anyhow::{bail, Context, Result};
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use kbsearch_core::config::RetrievalSettings;
use kbsearch_core::source::{load_jsonl, InMemoryChunkSource};
use kbsearch_core::traits::{ChunkSource, CompletionModel, Embedder, VectorRetriever};
use kbsearch_hybrid::{LlmRelevanceScorer, QuestionClassifier, Reranker, RetrievalEngine, RetryPolicy};
use kbsearch_llm::OpenAiChatModel;
use kbsearch_text::{Bm25Params, IndexCache, KeywordIndex};
use kbsearch_vector::schema::EMBEDDING_DIM;
use kbsearch_vector::{table, HashEmbedder, InMemoryVectorRetriever, LanceChunkSource, LanceVectorRetriever};

/// Where chunks come from.
pub enum Store {
	Corpus(PathBuf),
	Lance { uri: String, table: String },
}

pub fn embedder() -> Arc<dyn Embedder> {
	Arc::new(HashEmbedder::new(EMBEDDING_DIM as usize))
}

pub fn index_cache(settings: &RetrievalSettings) -> Arc<IndexCache> {
	Arc::new(IndexCache::new(settings.cache_path(), settings.bm25.tokenizer, &settings.bm25.stop_words))
}

pub async fn build_engine(mut settings: RetrievalSettings, store: &Store) -> Result<RetrievalEngine> {
	let (vector, source): (Arc<dyn VectorRetriever>, Arc<dyn ChunkSource>) = match store {
		Store::Corpus(path) => {
			let chunks = load_jsonl(path)?;
			info!(path = %path.display(), chunks = chunks.len(), "loaded corpus");
			let vector = InMemoryVectorRetriever::build(chunks.clone(), embedder())?;
			(Arc::new(vector), Arc::new(InMemoryChunkSource::with_collection(settings.collection.clone(), chunks)))
		}
		Store::Lance { uri, table: table_name } => {
			let db = table::open_db(uri).await?;
			// the Lance table doubles as the keyword collection
			settings.collection = table_name.clone();
			(
				Arc::new(LanceVectorRetriever::from_connection(db.clone(), table_name, embedder())),
				Arc::new(LanceChunkSource::new(db)),
			)
		}
	};

	let params = Bm25Params { k1: settings.bm25.k1, b: settings.bm25.b };
	let keyword = Arc::new(KeywordIndex::new(index_cache(&settings), source, params));
	let retry = RetryPolicy::from_settings(&settings.backend);
	let model = OpenAiChatModel::from_settings(&settings.llm)?;
	let rerank = settings.rerank.clone();
	let engine = RetrievalEngine::new(settings.clone(), vector, keyword);

	Ok(match model {
		Some(model) => {
			info!(endpoint = model.endpoint(), "model-backed classification and rerank enabled");
			let model: Arc<dyn CompletionModel> = Arc::new(model);
			let scorer = LlmRelevanceScorer::new(model.clone(), rerank.max_content_chars);
			engine
				.with_classifier(QuestionClassifier::with_model(model, retry))
				.with_reranker(Reranker::new(Arc::new(scorer), retry, rerank.unscored_score))
		}
		None => {
			info!(key_env = %settings.llm.api_key_env, "no API key set, using keyword rules and fused order");
			engine
		}
	})
}

/// Copies a JSONL corpus into a Lance table, embedding every chunk.
pub async fn import(corpus: &Path, uri: &str, table_name: &str) -> Result<usize> {
	let chunks = load_jsonl(corpus)?;
	let db = table::open_db(uri).await?;
	let written = table::write_chunks(&db, table_name, &chunks, embedder().as_ref()).await?;
	info!(table = table_name, written, "imported corpus");
	Ok(written)
}

/// One query per non-blank line; `-` reads stdin.
pub fn read_queries(path: &Path) -> Result<Vec<String>> {
	let lines: Vec<String> = if path == Path::new("-") {
		io::stdin().lock().lines().collect::<io::Result<_>>()?
	} else {
		let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
		text.lines().map(str::to_string).collect()
	};
	let queries: Vec<String> = lines.into_iter().map(|l| l.trim().to_string()).filter(|l| !l.is_empty()).collect();
	if queries.is_empty() {
		bail!("no queries in {}", path.display());
	}
	Ok(queries)
}
