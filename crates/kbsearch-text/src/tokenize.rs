//! Tokenizers feeding the BM25 index.
//!
//! CJK text has no word boundaries, so it is indexed as overlapping character
//! n-grams (length 1-4 at every offset). Everything else goes through a
//! tantivy analyzer (`SimpleTokenizer` + `LowerCaser` + optional stop words).
use tantivy::tokenizer::{LowerCaser, SimpleTokenizer, StopWordFilter, TextAnalyzer, TokenStream};

use kbsearch_core::TokenizerKind;

pub const MAX_NGRAM: usize = 4;

pub trait Tokenizer: Send + Sync {
	fn name(&self) -> &'static str;
	fn tokenize(&self, text: &str) -> Vec<String>;
}

pub fn is_cjk(c: char) -> bool {
	matches!(c as u32,
		0x4E00..=0x9FFF
		| 0x3400..=0x4DBF
		| 0x20000..=0x2A6DF
		| 0xF900..=0xFAFF
		| 0x3040..=0x30FF
		| 0xAC00..=0xD7AF)
}

/// Overlapping 1..=4 character n-grams. Grams spanning whitespace are skipped.
#[derive(Debug, Clone, Default)]
pub struct CjkNgramTokenizer;

impl CjkNgramTokenizer {
	fn push_ngrams(chars: &[char], out: &mut Vec<String>) {
		for i in 0..chars.len() {
			for n in (1..=MAX_NGRAM).rev() {
				if i + n > chars.len() { continue; }
				let gram = &chars[i..i + n];
				if gram.iter().any(|c| c.is_whitespace()) { continue; }
				out.push(gram.iter().flat_map(|c| c.to_lowercase()).collect());
			}
		}
	}
}

impl Tokenizer for CjkNgramTokenizer {
	fn name(&self) -> &'static str { "cjk" }

	fn tokenize(&self, text: &str) -> Vec<String> {
		let chars: Vec<char> = text.chars().collect();
		let mut out = Vec::new();
		Self::push_ngrams(&chars, &mut out);
		out
	}
}

/// Word-boundary tokens on lowercased text.
#[derive(Clone)]
pub struct WordTokenizer {
	analyzer: TextAnalyzer,
}

impl WordTokenizer {
	pub fn new(stop_words: &[String]) -> Self {
		let analyzer = TextAnalyzer::builder(SimpleTokenizer::default())
			.filter(LowerCaser)
			.filter(StopWordFilter::remove(stop_words.iter().map(|s| s.to_lowercase())))
			.build();
		Self { analyzer }
	}
}

impl Default for WordTokenizer {
	fn default() -> Self { Self::new(&[]) }
}

impl Tokenizer for WordTokenizer {
	fn name(&self) -> &'static str { "word" }

	fn tokenize(&self, text: &str) -> Vec<String> {
		// token_stream needs &mut; analyzers are cheap to clone
		let mut analyzer = self.analyzer.clone();
		let mut stream = analyzer.token_stream(text);
		let mut out = Vec::new();
		while stream.advance() { out.push(stream.token().text.clone()); }
		out
	}
}

/// Splits text into CJK and non-CJK runs and tokenizes each with the matching policy.
#[derive(Clone, Default)]
pub struct MixedTokenizer {
	words: WordTokenizer,
}

impl MixedTokenizer {
	pub fn new(stop_words: &[String]) -> Self { Self { words: WordTokenizer::new(stop_words) } }
}

impl Tokenizer for MixedTokenizer {
	fn name(&self) -> &'static str { "auto" }

	fn tokenize(&self, text: &str) -> Vec<String> {
		let mut out = Vec::new();
		let mut cjk_run: Vec<char> = Vec::new();
		let mut other_run = String::new();
		for c in text.chars() {
			if is_cjk(c) {
				if !other_run.is_empty() { out.extend(self.words.tokenize(&other_run)); other_run.clear(); }
				cjk_run.push(c);
			} else {
				if !cjk_run.is_empty() { CjkNgramTokenizer::push_ngrams(&cjk_run, &mut out); cjk_run.clear(); }
				other_run.push(c);
			}
		}
		if !cjk_run.is_empty() { CjkNgramTokenizer::push_ngrams(&cjk_run, &mut out); }
		if !other_run.is_empty() { out.extend(self.words.tokenize(&other_run)); }
		out
	}
}

pub fn build_tokenizer(kind: TokenizerKind, stop_words: &[String]) -> Box<dyn Tokenizer> {
	match kind {
		TokenizerKind::Auto => Box::new(MixedTokenizer::new(stop_words)),
		TokenizerKind::Cjk => Box::new(CjkNgramTokenizer),
		TokenizerKind::Word => Box::new(WordTokenizer::new(stop_words)),
	}
}
