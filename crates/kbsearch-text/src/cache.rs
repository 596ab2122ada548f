//! Per-collection BM25 index cache.
//!
//! Indexes live in memory behind one `tokio::sync::RwLock` per collection and
//! are persisted as JSON under `dir`, keyed by a blake3 hash of the corpus and
//! the tokenizer configuration. A rebuild holds the write lock, so readers that
//! arrive meanwhile wait and then see the fresh index. Loading, building and
//! persisting run on the blocking pool.
use std::collections::HashMap;
use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use kbsearch_core::{Backend, Chunk, Error, Result, TokenizerKind};

use crate::bm25::{Bm25Index, StoredIndex};
use crate::tokenize::{build_tokenizer, Tokenizer};

const CACHE_SUFFIX: &str = ".bm25.json";

type Slot = Arc<RwLock<Option<Arc<Bm25Index>>>>;

pub struct IndexCache {
	dir: PathBuf,
	tokenizer: Arc<dyn Tokenizer>,
	fingerprint: String,
	slots: Mutex<HashMap<String, Slot>>,
}

impl IndexCache {
	pub fn new(dir: impl Into<PathBuf>, kind: TokenizerKind, stop_words: &[String]) -> Self {
		let tokenizer: Arc<dyn Tokenizer> = Arc::from(build_tokenizer(kind, stop_words));
		let fingerprint = format!("{}:{}", tokenizer.name(), stop_words.join(","));
		Self { dir: dir.into(), tokenizer, fingerprint, slots: Mutex::new(HashMap::new()) }
	}

	pub fn dir(&self) -> &Path { &self.dir }

	pub fn tokenize(&self, text: &str) -> Vec<String> { self.tokenizer.tokenize(text) }

	/// Hash of the tokenizer configuration and every chunk, in order.
	pub fn corpus_hash(&self, chunks: &[Chunk]) -> Result<String> {
		let mut hasher = blake3::Hasher::new();
		hasher.update(self.fingerprint.as_bytes());
		for chunk in chunks {
			hasher.update(&[0]);
			hasher.update(&serde_json::to_vec(chunk)?);
		}
		Ok(hasher.finalize().to_hex().to_string())
	}

	/// Sanitized name plus a short hash of the raw name, so `a/b` and `a_b` do not collide.
	pub fn cache_path(&self, collection: &str) -> PathBuf {
		let safe: String = collection
			.chars()
			.map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
			.collect();
		let tag = blake3::hash(collection.as_bytes()).to_hex();
		self.dir.join(format!("{safe}-{}{CACHE_SUFFIX}", &tag.as_str()[..8]))
	}

	fn slot(&self, collection: &str) -> Slot {
		let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
		slots.entry(collection.to_string()).or_default().clone()
	}

	/// Returns the index for `chunks`, building it when nothing cached matches.
	pub async fn get_or_build(&self, collection: &str, chunks: Vec<Chunk>, force: bool) -> Result<Arc<Bm25Index>> {
		let key = self.corpus_hash(&chunks)?;
		let slot = self.slot(collection);

		if !force {
			let guard = slot.read().await;
			if let Some(idx) = guard.as_ref().filter(|i| i.cache_key() == key) {
				debug!(collection, "bm25 index served from memory");
				return Ok(idx.clone());
			}
		}

		let mut guard = slot.write().await;
		if !force {
			// another task may have rebuilt while we waited
			if let Some(idx) = guard.as_ref().filter(|i| i.cache_key() == key) {
				return Ok(idx.clone());
			}
		}

		let (dir, path) = (self.dir.clone(), self.cache_path(collection));
		let tokenizer = self.tokenizer.clone();
		let name = collection.to_string();
		let idx = blocking(move || {
			if !force {
				match read_stored(&path, &name, &key) {
					Ok(Some(idx)) => {
						info!(collection = %name, docs = idx.document_count(), "bm25 index loaded");
						return Ok(Arc::new(idx));
					}
					Ok(None) => {}
					Err(Error::IndexStale { .. }) => info!(collection = %name, "bm25 cache stale"),
					Err(e) => warn!(collection = %name, error = %e, "unreadable bm25 cache"),
				}
			}
			let idx = Arc::new(Bm25Index::build(&name, &key, tokenizer.as_ref(), chunks));
			let docs = idx.document_count();
			info!(collection = %name, docs, avgdl = idx.avgdl(), force, "bm25 index built");
			if let Err(e) = write_stored(&dir, &path, idx.stored()) {
				warn!(collection = %name, error = %e, "failed to persist bm25 index");
			}
			Ok(idx)
		})
		.await?;
		*guard = Some(idx.clone());
		Ok(idx)
	}

	/// Builds an index over caller-supplied chunks. Nothing is cached or persisted.
	pub async fn build_transient(&self, chunks: Vec<Chunk>) -> Result<Arc<Bm25Index>> {
		let tokenizer = self.tokenizer.clone();
		let build = move || Ok(Arc::new(Bm25Index::build("documents", "", tokenizer.as_ref(), chunks)));
		blocking(build).await
	}

	/// Reads the cached index for `collection`. `IndexStale` when its key differs.
	pub fn load(&self, collection: &str, key: &str) -> Result<Option<Bm25Index>> {
		read_stored(&self.cache_path(collection), collection, key)
	}

	/// Drops cached indexes for one collection, or all of them. Returns files removed.
	pub async fn clear(&self, collection: Option<&str>) -> Result<usize> {
		let targets: Vec<Slot> = {
			let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
			match collection {
				Some(name) => slots.remove(name).into_iter().collect(),
				None => slots.drain().map(|(_, s)| s).collect(),
			}
		};
		for slot in targets { *slot.write().await = None; }

		let mut removed = 0;
		match collection {
			Some(name) => {
				let path = self.cache_path(name);
				if path.exists() { fs::remove_file(path)?; removed += 1; }
			}
			None if self.dir.exists() => {
				for entry in fs::read_dir(&self.dir)? {
					let path = entry?.path();
					if path.file_name().and_then(|n| n.to_str()).is_some_and(|n| n.ends_with(CACHE_SUFFIX)) {
						fs::remove_file(path)?;
						removed += 1;
					}
				}
			}
			None => {}
		}
		info!(collection = collection.unwrap_or("*"), removed, "bm25 cache cleared");
		Ok(removed)
	}
}

async fn blocking<T, F>(f: F) -> Result<T>
where
	F: FnOnce() -> Result<T> + Send + 'static,
	T: Send + 'static,
{
	tokio::task::spawn_blocking(f)
		.await
		.map_err(|e| Error::backend(Backend::KeywordIndex, format!("index task failed: {e}")))?
}

fn read_stored(path: &Path, collection: &str, key: &str) -> Result<Option<Bm25Index>> {
	if !path.exists() { return Ok(None); }
	let file = fs::File::open(path)?;
	let stored: StoredIndex = serde_json::from_reader(std::io::BufReader::new(file))?;
	if stored.cache_key != key {
		return Err(Error::IndexStale { collection: collection.to_string() });
	}
	Ok(Some(Bm25Index::from_stored(stored)))
}

fn write_stored(dir: &Path, path: &Path, stored: &StoredIndex) -> Result<()> {
	fs::create_dir_all(dir)?;
	let tmp = tempfile::NamedTempFile::new_in(dir)?;
	{
		let mut writer = BufWriter::new(tmp.as_file());
		serde_json::to_writer(&mut writer, stored)?;
		std::io::Write::flush(&mut writer)?;
	}
	tmp.persist(path).map_err(|e| Error::Io(e.error))?;
	Ok(())
}
