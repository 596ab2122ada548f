use proptest::prelude::*;

use kbsearch_core::Chunk;
use kbsearch_text::bm25::StoredIndex;
use kbsearch_text::{Bm25Index, Bm25Params};

fn doc(term_count: usize, len: usize) -> Vec<String> {
	let mut tokens = vec!["target".to_string(); term_count];
	tokens.extend((term_count..len).map(|i| format!("filler{i}")));
	tokens
}

fn index(docs: Vec<Vec<String>>) -> Bm25Index {
	let chunks = (0..docs.len()).map(|i| Chunk::new(format!("c{i}"), "")).collect();
	Bm25Index::from_stored(StoredIndex {
		collection: "prop".into(),
		cache_key: "k".into(),
		tokenizer: "word".into(),
		chunks,
		tokenized_documents: docs,
	})
}

proptest! {
	#[test]
	fn score_grows_with_term_frequency(tf in 1usize..10, extra in 1usize..20, k1 in 0.5f32..3.0, b in 0.0f32..=1.0) {
		let len = tf + extra;
		let idx = index(vec![doc(tf, len), doc(tf + 1, len), doc(0, len)]);
		let terms = vec!["target".to_string()];
		let params = Bm25Params { k1, b };
		let lower = idx.score_document(0, &terms, params);
		let higher = idx.score_document(1, &terms, params);
		prop_assert!(higher > lower, "tf {} -> {}, tf {} -> {}", tf, lower, tf + 1, higher);
		prop_assert_eq!(idx.score_document(2, &terms, params), 0.0);
	}

	#[test]
	fn search_is_sorted_and_bounded(tfs in proptest::collection::vec(0usize..6, 1..12), k in 1usize..8) {
		let docs = tfs.iter().map(|&tf| doc(tf, 8)).collect();
		let idx = index(docs);
		let hits = idx.search(&["target".to_string()], k, Bm25Params::default());
		prop_assert!(hits.len() <= k);
		prop_assert_eq!(hits.len(), tfs.iter().filter(|&&tf| tf > 0).count().min(k));
		for w in hits.windows(2) {
			prop_assert!(w[0].score > w[1].score || (w[0].score == w[1].score && w[0].index < w[1].index));
		}
	}
}
