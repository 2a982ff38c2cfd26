use serde::Serialize;

use super::state::{FullScoreReturn, State, MAX_ORDER};
use crate::vocab::WordIndex;

/// Score of one word of a sentence.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct WordScore {
	pub word: String,
	pub index: WordIndex,
	/// Log10 probability.
	pub prob: f32,
	pub ngram_length: u8,
	pub oov: bool,
}

/// Query interface of a loaded n-gram model.
///
/// Probabilities are log10. Words are given by index; unknown words and
/// indices outside the vocabulary score as `<unk>`. Context slices are most
/// recent word first.
pub trait LanguageModel {
	fn order(&self) -> usize;

	/// Index of `word`, 0 when unknown.
	fn index(&self, word: &str) -> WordIndex;

	/// The word behind `index`, when vocabulary strings were kept.
	fn word(&self, index: WordIndex) -> Option<&str>;

	/// One past the largest word index.
	fn vocab_bound(&self) -> WordIndex;

	fn begin_sentence(&self) -> WordIndex;

	fn end_sentence(&self) -> WordIndex;

	/// State after `<s>`.
	fn begin_sentence_state(&self) -> State;

	/// State without any context.
	fn null_context_state(&self) -> State;

	/// Scores `word` after `in_state` and returns the state to continue from.
	fn full_score(&self, in_state: &State, word: WordIndex) -> (FullScoreReturn, State);

	/// Like [`full_score`](Self::full_score) with the context given as words.
	fn full_score_forgot_state(&self, context: &[WordIndex], word: WordIndex) -> (FullScoreReturn, State);

	/// State equivalent to having scored `context`.
	fn get_state(&self, context: &[WordIndex]) -> State;

	/// Extends an n-gram scored earlier without left context by the words
	/// `add_words` now known to precede it.
	///
	/// `extend_pointer` and `extend_length` identify the n-gram (from a
	/// previous [`FullScoreReturn::extend_left`]); `backoff_in` holds the
	/// backoffs of `add_words`. The returned probability is the correction to
	/// apply to the rest cost charged before. `backoff_out` receives the
	/// backoffs of the longer n-grams found, and `next_use` how many of
	/// `add_words` are still needed to extend further.
	fn extend_left(
		&self,
		add_words: &[WordIndex],
		backoff_in: &[f32],
		extend_pointer: u64,
		extend_length: u8,
		backoff_out: &mut [f32; MAX_ORDER - 1],
		next_use: &mut u8,
	) -> FullScoreReturn;

	/// Sum of `prob - rest` over the n-grams behind `pointers`, the first of
	/// which has `first_length` words and each next one word more.
	fn un_rest(&self, pointers: &[u64], first_length: u8) -> f32;

	/// Per-word scores of a whitespace-separated sentence.
	fn full_scores(&self, sentence: &str, bos: bool, eos: bool) -> Vec<WordScore> {
		let mut state = if bos { self.begin_sentence_state() } else { self.null_context_state() };
		let mut scores = Vec::new();
		let words = sentence.split_whitespace().map(|w| (w.to_owned(), self.index(w)));
		let end = eos.then(|| ("</s>".to_owned(), self.end_sentence()));
		for (word, index) in words.chain(end) {
			let (ret, next) = self.full_score(&state, index);
			scores.push(WordScore { word, index, prob: ret.prob, ngram_length: ret.ngram_length, oov: index == 0 });
			state = next;
		}
		scores
	}

	/// Total log10 probability of a whitespace-separated sentence.
	fn score_sentence(&self, sentence: &str, bos: bool, eos: bool) -> f32 {
		self.full_scores(sentence, bos, eos).iter().map(|s| s.prob).sum()
	}

	/// Perplexity of a sentence scored with `<s>` and `</s>`.
	fn perplexity(&self, sentence: &str) -> f64 {
		let scores = self.full_scores(sentence, true, true);
		let total: f64 = scores.iter().map(|s| f64::from(s.prob)).sum();
		10f64.powf(-total / scores.len() as f64)
	}
}
