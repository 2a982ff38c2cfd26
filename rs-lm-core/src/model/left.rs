//! Scoring of phrases whose left context is not known yet.
//!
//! A chart decoder scores a phrase once and reuses it under different left
//! contexts. [`RuleScore`] charges the words at the start of a phrase their
//! rest cost and records, in a [`Left`] state, pointers to the n-grams that
//! may still grow to the left. When the phrase is later placed after other
//! words, [`RuleScore::non_terminal`] extends those n-grams and corrects the
//! score, so that splitting a sentence anywhere gives the same total as
//! scoring it left to right.

use std::hash::{Hash, Hasher};

use super::language_model::LanguageModel;
use super::state::{FullScoreReturn, State, MAX_ORDER};
use crate::vocab::WordIndex;

/// N-grams at the start of a phrase that may still extend to the left.
///
/// `pointers[i]` identifies an n-gram of `i + 1` words. `full` is set once
/// the left side of the phrase no longer depends on what precedes it.
#[derive(Clone, Copy, Debug, Default)]
pub struct Left {
	pub pointers: [u64; MAX_ORDER - 1],
	pub length: u8,
	pub full: bool,
}

impl Left {
	pub fn pointers(&self) -> &[u64] {
		&self.pointers[..usize::from(self.length)]
	}
}

impl PartialEq for Left {
	fn eq(&self, other: &Self) -> bool {
		self.length == other.length && self.full == other.full && self.pointers() == other.pointers()
	}
}

impl Eq for Left {}

impl Hash for Left {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.length.hash(state);
		self.full.hash(state);
		self.pointers().hash(state);
	}
}

/// Both sides of a scored phrase.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ChartState {
	pub left: Left,
	pub right: State,
}

/// Accumulates the score of one phrase built from words and already scored
/// sub-phrases, left to right.
///
/// ```
/// use rs_lm_core::build::NgramCollector;
/// use rs_lm_core::model::{LanguageModel, Model, RuleScore};
/// use rs_lm_core::{Config, ModelType};
///
/// let mut collector = NgramCollector::new(2).unwrap();
/// collector.add_ngram(&["<unk>"], -2.0, None).unwrap();
/// collector.add_ngram(&["<s>"], -99.0, Some(-0.5)).unwrap();
/// collector.add_ngram(&["</s>"], -1.0, None).unwrap();
/// collector.add_ngram(&["<s>", "</s>"], -0.2, None).unwrap();
/// let model = Model::from_collector(collector, ModelType::Probing, &Config::default()).unwrap();
///
/// let mut rule = RuleScore::new(&model);
/// rule.begin_sentence();
/// rule.terminal(model.end_sentence());
/// let (prob, _) = rule.finish();
/// assert_eq!(prob, -0.2);
/// ```
#[derive(Debug)]
pub struct RuleScore<'a, M: ?Sized> {
	model: &'a M,
	out: ChartState,
	left_done: bool,
	prob: f32,
}

impl<'a, M: LanguageModel + ?Sized> RuleScore<'a, M> {
	pub fn new(model: &'a M) -> Self {
		Self { model, out: ChartState::default(), left_done: false, prob: 0.0 }
	}

	/// Starts the phrase with `<s>`, so nothing can precede it.
	pub fn begin_sentence(&mut self) {
		self.out.right = self.model.begin_sentence_state();
		self.left_done = true;
	}

	/// Appends a word.
	pub fn terminal(&mut self, word: WordIndex) {
		let copy = self.out.right;
		let (ret, right) = self.model.full_score(&copy, word);
		self.out.right = right;
		if self.left_done {
			self.prob += ret.prob;
			return;
		}
		if ret.independent_left {
			self.prob += ret.prob;
			self.left_done = true;
			return;
		}
		self.push_pointer(ret.extend_left);
		self.prob += ret.rest;
		if self.out.right.length != copy.length + 1 {
			self.left_done = true;
		}
	}

	/// Starts the phrase with a scored sub-phrase; `prob` is added as is.
	pub fn begin_non_terminal(&mut self, sub: &ChartState, prob: f32) {
		self.prob = prob;
		self.out = *sub;
		self.left_done = sub.left.full;
	}

	/// Appends a scored sub-phrase; `prob` is added as is.
	pub fn non_terminal(&mut self, sub: &ChartState, prob: f32) {
		self.prob += prob;

		if sub.left.length == 0 {
			if sub.left.full {
				self.prob += self.out.right.backoffs().iter().sum::<f32>();
				self.left_done = true;
				self.out.right = sub.right;
			}
			return;
		}

		if self.out.right.length == 0 {
			self.out.right = sub.right;
			if self.left_done {
				self.prob += self.model.un_rest(sub.left.pointers(), 1);
				return;
			}
			if self.out.left.length != 0 {
				self.left_done = true;
			} else {
				self.out.left = sub.left;
				self.left_done = sub.left.full;
			}
			return;
		}

		let mut back = [0f32; MAX_ORDER - 1];
		let mut back2 = [0f32; MAX_ORDER - 1];
		let mut next_use = self.out.right.length;

		let right_backoff = self.out.right.backoff;
		if self.extend_left(sub, &mut next_use, 1, &right_backoff, &mut back) {
			return;
		}
		for extend_length in 2..=sub.left.length {
			if self.extend_left(sub, &mut next_use, extend_length, &back, &mut back2) {
				return;
			}
			std::mem::swap(&mut back, &mut back2);
		}

		if sub.left.full {
			self.prob += back[..usize::from(next_use)].iter().sum::<f32>();
			self.left_done = true;
			self.out.right = sub.right;
			return;
		}

		// The sub-phrase's right state was minimized, so it no longer depends on these words.
		if sub.right.length < sub.left.length {
			self.out.right = sub.right;
			return;
		}

		let used = usize::from(next_use);
		let added = usize::from(sub.right.length);
		let right = &mut self.out.right;
		right.words.copy_within(..used, added);
		right.words[..added].copy_from_slice(sub.right.words());
		right.backoff[..added].copy_from_slice(sub.right.backoffs());
		right.backoff[added..added + used].copy_from_slice(&back[..used]);
		right.length = sub.right.length + next_use;
		right.normalize();
	}

	/// Completes the phrase and returns its score with its state.
	pub fn finish(mut self) -> (f32, ChartState) {
		self.out.left.full = self.left_done || usize::from(self.out.left.length) == self.model.order() - 1;
		(self.prob, self.out)
	}

	/// Discards everything scored so far.
	pub fn reset(&mut self) {
		self.prob = 0.0;
		self.left_done = false;
		self.out = ChartState::default();
	}

	fn push_pointer(&mut self, pointer: u64) {
		let left = &mut self.out.left;
		left.pointers[usize::from(left.length)] = pointer;
		left.length += 1;
	}

	/// Extends the sub-phrase n-gram of `extend_length` words into the
	/// current right context. Returns true once nothing further can change.
	fn extend_left(
		&mut self,
		sub: &ChartState,
		next_use: &mut u8,
		extend_length: u8,
		back_in: &[f32],
		back_out: &mut [f32; MAX_ORDER - 1],
	) -> bool {
		let words = self.out.right.words;
		let ret = self.model.extend_left(
			&words[..usize::from(*next_use)],
			back_in,
			sub.left.pointers[usize::from(extend_length) - 1],
			extend_length,
			back_out,
			next_use,
		);
		self.process_ret(&ret);
		if *next_use != self.out.right.length {
			self.left_done = true;
			if *next_use == 0 {
				self.out.right = sub.right;
				let remaining = &sub.left.pointers()[usize::from(extend_length)..];
				self.prob += self.model.un_rest(remaining, extend_length + 1);
				return true;
			}
		}
		false
	}

	fn process_ret(&mut self, ret: &FullScoreReturn) {
		if self.left_done {
			self.prob += ret.prob;
			return;
		}
		if ret.independent_left {
			self.prob += ret.prob;
			self.left_done = true;
			return;
		}
		self.push_pointer(ret.extend_left);
		self.prob += ret.rest;
	}
}
