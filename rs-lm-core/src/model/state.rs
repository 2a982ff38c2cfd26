use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use crate::vocab::WordIndex;

/// Highest model order the scoring structures are sized for.
pub const MAX_ORDER: usize = 6;

/// Right context carried between scoring calls.
///
/// A `State` holds the words that may still matter for scoring the next
/// word, most recent first, together with the backoff weight of each suffix
/// they form (`backoff[i]` belongs to the n-gram `words[0..=i]`).
///
/// ## Invariants
/// - `length <= MAX_ORDER - 1`
/// - Slots at or beyond `length` are zero, so two states describing the same
///   context compare and hash equal regardless of how they were produced.
#[derive(Clone, Copy, Debug, Default)]
pub struct State {
	pub(crate) words: [WordIndex; MAX_ORDER - 1],
	pub(crate) backoff: [f32; MAX_ORDER - 1],
	pub(crate) length: u8,
}

impl State {
	/// Number of context words kept.
	pub fn length(&self) -> u8 {
		self.length
	}

	/// Context words, most recent first.
	pub fn words(&self) -> &[WordIndex] {
		&self.words[..usize::from(self.length)]
	}

	/// Backoff weights matching [`words`](Self::words).
	pub fn backoffs(&self) -> &[f32] {
		&self.backoff[..usize::from(self.length)]
	}

	/// Clears every slot past `length`.
	pub(crate) fn normalize(&mut self) {
		let length = usize::from(self.length);
		self.words[length..].fill(0);
		self.backoff[length..].fill(0.0);
	}

	fn backoff_bits(&self) -> [u32; MAX_ORDER - 1] {
		self.backoff.map(f32::to_bits)
	}
}

impl PartialEq for State {
	fn eq(&self, other: &Self) -> bool {
		self.length == other.length && self.words == other.words && self.backoff_bits() == other.backoff_bits()
	}
}

impl Eq for State {}

impl Hash for State {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.length.hash(state);
		self.words.hash(state);
		self.backoff_bits().hash(state);
	}
}

impl PartialOrd for State {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for State {
	fn cmp(&self, other: &Self) -> Ordering {
		self.length
			.cmp(&other.length)
			.then_with(|| self.words.cmp(&other.words))
			.then_with(|| self.backoff_bits().cmp(&other.backoff_bits()))
	}
}

/// Outcome of scoring one word.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FullScoreReturn {
	/// Log10 probability of the word, backoffs included.
	pub prob: f32,

	/// Length of the longest n-gram matched.
	pub ngram_length: u8,

	/// Whether words further to the left could not change `prob`.
	pub independent_left: bool,

	/// Handle to the matched n-gram, used to extend it to the left later.
	pub extend_left: u64,

	/// Rest cost of the matched n-gram; equals `prob` for models without rest costs.
	pub rest: f32,
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::HashSet;

	#[test]
	fn stale_slots_do_not_matter_after_normalize() {
		let mut a = State { words: [3, 4, 9, 9, 9], backoff: [-0.5, 0.0, -1.0, -1.0, -1.0], length: 2 };
		let mut b = State { words: [3, 4, 0, 0, 7], backoff: [-0.5, 0.0, 0.0, 0.0, -2.0], length: 2 };
		assert_ne!(a, b);
		a.normalize();
		b.normalize();
		assert_eq!(a, b);
		assert_eq!(a.words(), &[3, 4]);
		assert_eq!(a.backoffs(), &[-0.5, 0.0]);

		let set: HashSet<State> = [a, b].into_iter().collect();
		assert_eq!(set.len(), 1);
	}

	#[test]
	fn zero_sign_is_significant() {
		let a = State { words: [3, 0, 0, 0, 0], backoff: [0.0, 0.0, 0.0, 0.0, 0.0], length: 1 };
		let b = State { backoff: [-0.0, 0.0, 0.0, 0.0, 0.0], ..a };
		assert_ne!(a, b);
	}

	#[test]
	fn ordering_is_by_length_then_words() {
		let short = State { words: [9, 0, 0, 0, 0], backoff: [0.0; 5], length: 1 };
		let long = State { words: [1, 2, 0, 0, 0], backoff: [0.0; 5], length: 2 };
		let long_later = State { words: [1, 3, 0, 0, 0], ..long };
		assert!(short < long);
		assert!(long < long_later);
		assert_eq!(long.cmp(&long), Ordering::Equal);
	}
}
