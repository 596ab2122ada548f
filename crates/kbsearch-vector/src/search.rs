use anyhow::{anyhow, Result};
use arrow_array::{Array, Float32Array};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{Connection, DistanceType};
use std::sync::Arc;
use tracing::debug;

use kbsearch_core::traits::{ChunkSource, Embedder, VectorRetriever};
use kbsearch_core::Chunk;

use crate::schema::batch_to_chunks;
use crate::table::open_db;

/// Cosine search over a LanceDB chunk table. Similarity is `1 - distance`.
pub struct LanceVectorRetriever {
	db: Connection,
	table_name: String,
	embedder: Arc<dyn Embedder>,
}

impl LanceVectorRetriever {
	pub async fn new(db_uri: &str, table_name: &str, embedder: Arc<dyn Embedder>) -> Result<Self> {
		let db = open_db(db_uri).await?;
		Ok(Self { db, table_name: table_name.to_string(), embedder })
	}

	pub fn from_connection(db: Connection, table_name: &str, embedder: Arc<dyn Embedder>) -> Self {
		Self { db, table_name: table_name.to_string(), embedder }
	}
}

#[async_trait]
impl VectorRetriever for LanceVectorRetriever {
	async fn search(&self, query: &str, k: usize) -> Result<Vec<(Chunk, f32)>> {
		let query_vec = self
			.embedder
			.embed_batch(&[query.to_string()])?
			.into_iter()
			.next()
			.ok_or_else(|| anyhow!("embedder returned no vector"))?;
		let table = self.db.open_table(&self.table_name).execute().await?;
		let mut stream = table.vector_search(query_vec)?.distance_type(DistanceType::Cosine).limit(k).execute().await?;

		let mut out = Vec::new();
		while let Some(batch) = stream.try_next().await? {
			let chunks = batch_to_chunks(&batch)?;
			let distances = batch.column_by_name("_distance").and_then(|c| c.as_any().downcast_ref::<Float32Array>());
			for (i, chunk) in chunks.into_iter().enumerate() {
				let similarity = match distances {
					Some(d) if !d.is_null(i) => 1.0 - d.value(i),
					_ => 0.0,
				};
				out.push((chunk, similarity));
			}
		}
		out.sort_by(|a, b| b.1.total_cmp(&a.1));
		out.truncate(k);
		debug!(table = %self.table_name, hits = out.len(), "lance vector search");
		Ok(out)
	}
}

/// Serves a collection by scanning the LanceDB table of the same name.
pub struct LanceChunkSource {
	db: Connection,
}

impl LanceChunkSource {
	pub fn new(db: Connection) -> Self { Self { db } }
}

#[async_trait]
impl ChunkSource for LanceChunkSource {
	async fn load(&self, collection: &str) -> Result<Vec<Chunk>> {
		let names = self.db.table_names().execute().await?;
		if !names.iter().any(|n| n == collection) { return Ok(Vec::new()); }
		let table = self.db.open_table(collection).execute().await?;
		let mut stream = table.query().execute().await?;
		let mut chunks = Vec::new();
		while let Some(batch) = stream.try_next().await? { chunks.extend(batch_to_chunks(&batch)?); }
		// scan order is not guaranteed; the keyword index hashes the corpus in order
		chunks.sort_by(|a, b| a.id.cmp(&b.id));
		Ok(chunks)
	}
}
