use anyhow::Result;
use arrow_array::RecordBatchIterator;
use lancedb::{connect, Connection};
use std::sync::Arc;
use tracing::info;

use kbsearch_core::traits::Embedder;
use kbsearch_core::Chunk;

use crate::schema::{build_chunk_schema, chunks_to_record_batch};

pub async fn open_db(uri: &str) -> Result<Connection> {
    Ok(connect(uri).execute().await?)
}

pub async fn ensure_table(conn: &Connection, name: &str, schema: Arc<arrow_schema::Schema>) -> Result<()> {
    let names = conn.table_names().execute().await?;
    if names.contains(&name.to_string()) {
        return Ok(());
    }
    // create empty table with 0 rows
    let iter = RecordBatchIterator::new(vec![].into_iter(), schema.clone());
    conn.create_table(name, Box::new(iter)).execute().await?;
    Ok(())
}

/// Embeds `chunks` and appends them to `name`, creating the table on first use.
pub async fn write_chunks(conn: &Connection, name: &str, chunks: &[Chunk], embedder: &dyn Embedder) -> Result<usize> {
    if chunks.is_empty() {
        return Ok(0);
    }
    let dim = i32::try_from(embedder.dim())?;
    ensure_table(conn, name, build_chunk_schema(dim)).await?;
    let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
    let vectors = embedder.embed_batch(&texts)?;
    let rb = chunks_to_record_batch(chunks, &vectors, dim)?;
    let schema = rb.schema();
    let reader = Box::new(RecordBatchIterator::new(vec![Ok(rb)].into_iter(), schema));
    conn.open_table(name).execute().await?.add(reader).execute().await?;
    info!(table = name, rows = chunks.len(), "chunks written");
    Ok(chunks.len())
}
