use anyhow::{anyhow, Result};
use arrow_array::types::Float32Type;
use arrow_array::{Array, FixedSizeListArray, Int32Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema};
use std::sync::Arc;

use kbsearch_core::{Chunk, Meta};

pub const EMBEDDING_DIM: i32 = 1024;

/// Metadata keys mapped onto dedicated columns; everything else is dropped on write.
pub const META_DOC_ID: &str = "doc_id";
pub const META_SOURCE: &str = "source";
pub const META_CATEGORY: &str = "category";
pub const META_CHUNK_INDEX: &str = "chunk_index";
pub const META_TOTAL_CHUNKS: &str = "total_chunks";

pub fn build_chunk_schema(dim: i32) -> Arc<Schema> {
	Arc::new(Schema::new(vec![
		Field::new("id", DataType::Utf8, false),
		Field::new("doc_id", DataType::Utf8, false),
		Field::new("doc_path", DataType::Utf8, false),
		Field::new("category", DataType::Utf8, false),
		Field::new("content", DataType::Utf8, false),
		Field::new("chunk_index", DataType::Int32, false),
		Field::new("total_chunks", DataType::Int32, false),
		Field::new("vector", DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim), true),
	]))
}

fn meta_str(meta: &Meta, key: &str) -> String { meta.get(key).cloned().unwrap_or_default() }
fn strings(chunks: &[Chunk], f: impl Fn(&Chunk) -> String) -> StringArray {
	StringArray::from(chunks.iter().map(f).collect::<Vec<_>>())
}

fn meta_i32(meta: &Meta, key: &str) -> i32 { meta.get(key).and_then(|v| v.parse().ok()).unwrap_or(0) }

pub fn chunks_to_record_batch(chunks: &[Chunk], vectors: &[Vec<f32>], dim: i32) -> Result<RecordBatch> {
	if chunks.len() != vectors.len() {
		return Err(anyhow!("{} chunks but {} vectors", chunks.len(), vectors.len()));
	}
	if let Some(bad) = vectors.iter().find(|v| v.len() != dim as usize) {
		return Err(anyhow!("vector of length {} does not match dimension {dim}", bad.len()));
	}
	let rb = RecordBatch::try_new(build_chunk_schema(dim), vec![
		Arc::new(strings(chunks, |c| c.id.clone())),
		Arc::new(strings(chunks, |c| meta_str(&c.metadata, META_DOC_ID))),
		Arc::new(strings(chunks, |c| meta_str(&c.metadata, META_SOURCE))),
		Arc::new(strings(chunks, |c| meta_str(&c.metadata, META_CATEGORY))),
		Arc::new(strings(chunks, |c| c.content.clone())),
		Arc::new(Int32Array::from(chunks.iter().map(|c| meta_i32(&c.metadata, META_CHUNK_INDEX)).collect::<Vec<_>>())),
		Arc::new(Int32Array::from(chunks.iter().map(|c| meta_i32(&c.metadata, META_TOTAL_CHUNKS)).collect::<Vec<_>>())),
		Arc::new(FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(
			vectors.iter().map(|v| Some(v.iter().map(|&x| Some(x)).collect::<Vec<_>>())),
			dim,
		)),
	])?;
	Ok(rb)
}

fn string_col<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
	batch
		.column_by_name(name)
		.and_then(|c| c.as_any().downcast_ref::<StringArray>())
		.ok_or_else(|| anyhow!("missing or non-string column '{name}'"))
}

fn int_col<'a>(batch: &'a RecordBatch, name: &str) -> Option<&'a Int32Array> {
	batch.column_by_name(name).and_then(|c| c.as_any().downcast_ref::<Int32Array>())
}

/// Rebuilds chunks from a result batch. `id` and `content` are required, the rest optional.
pub fn batch_to_chunks(batch: &RecordBatch) -> Result<Vec<Chunk>> {
	let ids = string_col(batch, "id")?;
	let contents = string_col(batch, "content")?;
	let optional = [("doc_id", META_DOC_ID), ("doc_path", META_SOURCE), ("category", META_CATEGORY)]
		.map(|(col, key)| (string_col(batch, col).ok(), key));
	let ints = [("chunk_index", META_CHUNK_INDEX), ("total_chunks", META_TOTAL_CHUNKS)].map(|(col, key)| (int_col(batch, col), key));

	let mut out = Vec::with_capacity(batch.num_rows());
	for i in 0..batch.num_rows() {
		let mut chunk = Chunk::new(ids.value(i), contents.value(i));
		for (col, key) in &optional {
			if let Some(col) = col {
				if !col.is_null(i) && !col.value(i).is_empty() { chunk.metadata.insert(key.to_string(), col.value(i).to_string()); }
			}
		}
		for (col, key) in &ints {
			if let Some(col) = col {
				if !col.is_null(i) { chunk.metadata.insert(key.to_string(), col.value(i).to_string()); }
			}
		}
		out.push(chunk);
	}
	Ok(out)
}
