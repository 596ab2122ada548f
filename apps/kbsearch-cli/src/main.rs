//! `kbsearch`: adaptive hybrid retrieval over a chunk corpus.
//!
//! ```bash
//! kbsearch --corpus chunks.jsonl query "如何建账"
//! kbsearch --corpus chunks.jsonl compare "现金日记账的区别" -k 3
//! kbsearch --corpus chunks.jsonl query "发票丢失怎么办" --method bm25 --documents extra.jsonl
//! kbsearch --lance ./db --table kb batch queries.txt
//! kbsearch --corpus chunks.jsonl --lance ./db --table kb import
//! ```
//!
//! Results are printed as JSON on stdout; logs go to stderr (`RUST_LOG`).

mod wiring;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use kbsearch_core::config::{Config, RetrievalSettings};
use kbsearch_core::source::load_jsonl;
use kbsearch_core::RetrievalMethod;
use kbsearch_hybrid::compare::DEFAULT_COMPARE_TOP_K;
use kbsearch_hybrid::{BatchOptions, RetrievalEngine, RetrieveOptions};

use crate::wiring::Store;

#[derive(Parser)]
#[command(name = "kbsearch", version, about)]
struct Cli {
	#[command(flatten)]
	store: StoreArgs,

	/// Config file; relative paths inside it resolve against its directory
	#[arg(long, global = true, default_value = "config.toml")]
	config: PathBuf,

	/// Collection name (defaults to `retrieval.collection`)
	#[arg(long, global = true)]
	collection: Option<String>,

	/// Debug logging
	#[arg(short, long, global = true)]
	verbose: bool,

	#[command(subcommand)]
	command: Command,
}

#[derive(Args)]
struct StoreArgs {
	/// JSONL file with one chunk per line
	#[arg(long, global = true)]
	corpus: Option<PathBuf>,

	/// LanceDB directory
	#[arg(long, global = true)]
	lance: Option<String>,

	/// LanceDB table
	#[arg(long, global = true, default_value = "chunks")]
	table: String,
}

#[derive(Subcommand)]
enum Command {
	/// Classify a question
	Classify { query: String },
	/// Run the adaptive pipeline for one question
	Query {
		query: String,
		#[arg(short = 'k', long)]
		top_k: Option<usize>,
		/// Skip classification: vector, bm25, hybrid or hybrid_rerank
		#[arg(long)]
		method: Option<String>,
		/// JSONL chunks to rank by keyword instead of the stored collection
		#[arg(long)]
		documents: Option<PathBuf>,
	},
	/// Run every question in a file (one per line, `-` for stdin)
	Batch {
		file: PathBuf,
		#[arg(short = 'k', long)]
		top_k: Option<usize>,
	},
	/// Run one question through several methods side by side
	Compare {
		query: String,
		#[arg(short = 'k', long)]
		top_k: Option<usize>,
		/// Methods to run (default: all)
		#[arg(long, value_delimiter = ',')]
		methods: Vec<String>,
		/// JSONL chunks to rank by keyword instead of the stored collection
		#[arg(long)]
		documents: Option<PathBuf>,
	},
	/// Aggregate strategy statistics over a file of questions
	Stats { file: PathBuf },
	/// Remove persisted keyword indexes
	ClearCache {
		/// Every collection, not just the current one
		#[arg(long)]
		all: bool,
	},
	/// Write a JSONL corpus into a LanceDB table
	Import,
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();

	let default_level = if cli.verbose { "debug" } else { "info" };
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
		.with_writer(std::io::stderr)
		.with_target(false)
		.init();

	let mut settings = Config::load_from(&cli.config)?.retrieval()?;
	if let Some(collection) = &cli.collection {
		settings.collection = collection.clone();
	}

	match cli.command {
		Command::ClearCache { all } => {
			let scope = (!all).then_some(settings.collection.as_str());
			let removed = wiring::index_cache(&settings).clear(scope).await?;
			print_json(&serde_json::json!({ "removed": removed }))
		}
		Command::Import => {
			let (Some(corpus), Some(uri)) = (&cli.store.corpus, &cli.store.lance) else {
				bail!("import needs both --corpus and --lance");
			};
			let written = wiring::import(corpus, uri, &cli.store.table).await?;
			print_json(&serde_json::json!({ "table": cli.store.table, "written": written }))
		}
		Command::Classify { query } => {
			let engine = open(settings, &cli.store).await?;
			print_json(&engine.classify(&query).await?)
		}
		Command::Query { query, top_k, method, documents } => {
			let engine = open(settings, &cli.store).await?;
			let mut options = match method {
				Some(m) => {
					let method: RetrievalMethod = m.parse()?;
					let k = top_k.unwrap_or(DEFAULT_COMPARE_TOP_K);
					RetrieveOptions::strategy(engine.strategy_for(method, k)?)
				}
				None => RetrieveOptions { top_k, ..Default::default() },
			};
			if let Some(path) = documents {
				options = options.with_documents(load_jsonl(&path)?);
			}
			print_json(&engine.retrieve(&query, options).await?)
		}
		Command::Batch { file, top_k } => {
			let queries = wiring::read_queries(&file)?;
			let options = BatchOptions { top_k, ..BatchOptions::from_settings(&settings.batch) };
			let engine = open(settings, &cli.store).await?;
			let pb = ProgressBar::new(queries.len() as u64);
			pb.set_style(
				ProgressStyle::default_bar()
					.template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} queries {msg}")
					.context("progress template")?
					.progress_chars("#>-"),
			);
			let report = engine
				.retrieve_batch_with(&queries, &options, |entry| {
					pb.inc(1);
					pb.set_message(if entry.is_success() { "ok" } else { "failed" });
				})
				.await;
			pb.finish_and_clear();
			print_json(&report)
		}
		Command::Compare { query, top_k, methods, documents } => {
			let methods = if methods.is_empty() {
				RetrievalMethod::ALL.to_vec()
			} else {
				methods.iter().map(|m| m.parse()).collect::<kbsearch_core::Result<Vec<RetrievalMethod>>>()?
			};
			let engine = open(settings, &cli.store).await?;
			let documents = documents.map(|p| load_jsonl(&p)).transpose()?;
			print_json(&engine.compare_methods_with(&query, &methods, top_k, documents).await?)
		}
		Command::Stats { file } => {
			let queries = wiring::read_queries(&file)?;
			let engine = open(settings, &cli.store).await?;
			print_json(&engine.statistics(&queries).await)
		}
	}
}

async fn open(settings: RetrievalSettings, store: &StoreArgs) -> Result<RetrievalEngine> {
	let store = match (&store.corpus, &store.lance) {
		(Some(path), None) => Store::Corpus(path.clone()),
		(None, Some(uri)) => Store::Lance { uri: uri.clone(), table: store.table.clone() },
		(Some(_), Some(_)) => bail!("--corpus and --lance are exclusive outside import"),
		(None, None) => bail!("pass --corpus <chunks.jsonl> or --lance <dir>"),
	};
	wiring::build_engine(settings, &store).await
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
	println!("{}", serde_json::to_string_pretty(value)?);
	Ok(())
}
