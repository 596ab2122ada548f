//! Okapi BM25 over pre-tokenized documents.
//!
//! `score(d, q) = Σ idf(t) · f(t,d)·(k1+1) / (f(t,d) + k1·(1 − b + b·|d|/avgdl))`
//! with `idf(t) = ln(1 + (N − n(t) + 0.5) / (n(t) + 0.5))`, which stays
//! positive for terms present in most documents.
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use kbsearch_core::Chunk;

use crate::tokenize::Tokenizer;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bm25Params {
	pub k1: f32,
	pub b: f32,
}

impl Default for Bm25Params {
	fn default() -> Self { Self { k1: 1.5, b: 0.75 } }
}

/// On-disk form of an index. Statistics are recomputed on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredIndex {
	pub collection: String,
	pub cache_key: String,
	pub tokenizer: String,
	pub chunks: Vec<Chunk>,
	pub tokenized_documents: Vec<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bm25Hit {
	/// Position of the document in the collection.
	pub index: usize,
	pub chunk: Chunk,
	pub score: f32,
}

#[derive(Debug)]
pub struct Bm25Index {
	stored: StoredIndex,
	doc_freq: HashMap<String, usize>,
	term_freqs: Vec<HashMap<String, u32>>,
	doc_lens: Vec<usize>,
	avgdl: f32,
}

impl Bm25Index {
	pub fn build(collection: &str, cache_key: &str, tokenizer: &dyn Tokenizer, chunks: Vec<Chunk>) -> Self {
		let tokenized_documents = chunks.iter().map(|c| tokenizer.tokenize(&c.content)).collect();
		Self::from_stored(StoredIndex {
			collection: collection.to_string(),
			cache_key: cache_key.to_string(),
			tokenizer: tokenizer.name().to_string(),
			chunks,
			tokenized_documents,
		})
	}

	pub fn from_stored(stored: StoredIndex) -> Self {
		let mut doc_freq: HashMap<String, usize> = HashMap::new();
		let mut term_freqs = Vec::with_capacity(stored.tokenized_documents.len());
		let mut doc_lens = Vec::with_capacity(stored.tokenized_documents.len());
		for tokens in &stored.tokenized_documents {
			let mut tf: HashMap<String, u32> = HashMap::new();
			for t in tokens { *tf.entry(t.clone()).or_insert(0) += 1; }
			for t in tf.keys() { *doc_freq.entry(t.clone()).or_insert(0) += 1; }
			term_freqs.push(tf);
			doc_lens.push(tokens.len());
		}
		let total: usize = doc_lens.iter().sum();
		let avgdl = if doc_lens.is_empty() { 0.0 } else { total as f32 / doc_lens.len() as f32 };
		Self { stored, doc_freq, term_freqs, doc_lens, avgdl }
	}

	pub fn stored(&self) -> &StoredIndex { &self.stored }
	pub fn cache_key(&self) -> &str { &self.stored.cache_key }
	pub fn document_count(&self) -> usize { self.doc_lens.len() }
	pub fn is_empty(&self) -> bool { self.doc_lens.is_empty() }
	pub fn avgdl(&self) -> f32 { self.avgdl }

	pub fn idf(&self, term: &str) -> f32 {
		let n = self.document_count() as f32;
		let df = self.doc_freq.get(term).copied().unwrap_or(0) as f32;
		(1.0 + (n - df + 0.5) / (df + 0.5)).ln()
	}

	pub fn score_document(&self, doc: usize, query_terms: &[String], params: Bm25Params) -> f32 {
		let Some(tf) = self.term_freqs.get(doc) else { return 0.0 };
		let len_ratio = if self.avgdl > 0.0 { self.doc_lens[doc] as f32 / self.avgdl } else { 0.0 };
		let norm = params.k1 * (1.0 - params.b + params.b * len_ratio);
		query_terms
			.iter()
			.filter_map(|t| tf.get(t).map(|&f| (t, f as f32)))
			.map(|(t, f)| self.idf(t) * f * (params.k1 + 1.0) / (f + norm))
			.sum()
	}

	/// Top `k` documents with a positive score, best first, ties by document index.
	pub fn search(&self, query_terms: &[String], k: usize, params: Bm25Params) -> Vec<Bm25Hit> {
		if k == 0 || query_terms.is_empty() { return Vec::new(); }
		let mut scored: Vec<(usize, f32)> = (0..self.document_count())
			.map(|i| (i, self.score_document(i, query_terms, params)))
			.filter(|(_, s)| *s > 0.0)
			.collect();
		scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
		scored.truncate(k);
		scored
			.into_iter()
			.map(|(index, score)| Bm25Hit { index, chunk: self.stored.chunks[index].clone(), score })
			.collect()
	}
}
