//! kbsearch-text
//!
//! Keyword retrieval: CJK-aware tokenizers, an Okapi BM25 index and a
//! disk-backed per-collection index cache.
pub mod bm25;
pub mod cache;
pub mod tokenize;

use std::sync::Arc;

use tracing::debug;

use kbsearch_core::traits::ChunkSource;
use kbsearch_core::{Backend, Chunk, Error, Result};

pub use bm25::{Bm25Hit, Bm25Index, Bm25Params};
pub use cache::IndexCache;

#[derive(Debug, Clone, Default)]
pub struct KeywordSearch {
	pub hits: Vec<Bm25Hit>,
	/// Set when the collection has no documents.
	pub notice: Option<String>,
}

/// BM25 search over collections supplied by a [`ChunkSource`].
pub struct KeywordIndex {
	cache: Arc<IndexCache>,
	source: Arc<dyn ChunkSource>,
	params: Bm25Params,
}

impl KeywordIndex {
	pub fn new(cache: Arc<IndexCache>, source: Arc<dyn ChunkSource>, params: Bm25Params) -> Self {
		Self { cache, source, params }
	}

	pub fn cache(&self) -> &IndexCache { &self.cache }
	pub fn params(&self) -> Bm25Params { self.params }

	/// Loads the collection and returns a current index, rebuilding on corpus change or when forced.
	pub async fn build(&self, collection: &str, force: bool) -> Result<Arc<Bm25Index>> {
		let chunks = self
			.source
			.load(collection)
			.await
			.map_err(|e| Error::backend(Backend::ChunkSource, format!("{e:#}")))?;
		self.cache.get_or_build(collection, chunks, force).await
	}

	pub async fn search(&self, collection: &str, query: &str, k: usize) -> Result<KeywordSearch> {
		let index = self.build(collection, false).await?;
		if index.is_empty() {
			return Ok(KeywordSearch {
				hits: Vec::new(),
				notice: Some(format!("collection '{collection}' has no documents to search")),
			});
		}
		let terms = self.cache.tokenize(query);
		let hits = index.search(&terms, k, self.params);
		debug!(collection, terms = terms.len(), hits = hits.len(), "bm25 search");
		Ok(KeywordSearch { hits, notice: None })
	}

	/// Ranks caller-supplied chunks instead of a stored collection.
	/// The index is built for this call only and never touches the cache.
	pub async fn search_documents(
		&self,
		query: &str,
		documents: Vec<Chunk>,
		k: usize,
	) -> Result<KeywordSearch> {
		if documents.is_empty() {
			let notice = Some("no documents supplied to search".to_string());
			return Ok(KeywordSearch { hits: Vec::new(), notice });
		}
		let index = self.cache.build_transient(documents).await?;
		let terms = self.cache.tokenize(query);
		let hits = index.search(&terms, k, self.params);
		let docs = index.document_count();
		debug!(docs, terms = terms.len(), hits = hits.len(), "bm25 over supplied documents");
		Ok(KeywordSearch { hits, notice: None })
	}
}
