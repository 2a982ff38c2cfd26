//! The lookup contract shared by the storage backends.
//!
//! Scoring walks from the most recent word towards older context, one order
//! at a time, carrying a backend-specific `Node` between steps: a running
//! hash for the probing tables, a child range for the trie. Every lookup also
//! reports whether older context can still matter (`independent_left`) and a
//! pointer that [`Search::unpack`] turns back into the same n-gram later.

use std::fmt::Debug;

use crate::binary_format::Parameters;
use crate::build::CompiledNgrams;
use crate::error::Result;
use crate::vocab::WordIndex;

/// Probing hash table backend.
pub mod hashed;

/// Bit-packed trie backend.
pub mod trie;

pub use hashed::{BackoffValue, HashedSearch, HashedValue, RestValue};
pub use trie::TrieSearch;

/// Stored weights of one n-gram.
///
/// `rest` equals `prob` unless the backend stores rest costs.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Weights {
	pub prob: f32,
	pub backoff: f32,
	pub rest: f32,
}

/// Result of a successful unigram or middle-order lookup.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Lookup {
	pub weights: Weights,
	/// No longer n-gram ends with this one, so older words cannot change the score.
	pub independent_left: bool,
	/// Handle for [`Search::unpack`].
	pub extend_left: u64,
}

/// A storage backend laid out in a model's data region.
pub trait Search: Clone + Debug + Send + Sync {
	type Node: Copy + Debug + Default;

	/// Whether rest costs are stored separately from probabilities.
	const HAS_REST: bool;

	fn size(params: &Parameters) -> usize;

	/// Describes a backend whose data starts at byte `offset`.
	fn new(offset: usize, params: &Parameters) -> Self;

	fn order(&self) -> usize;

	/// Writes every n-gram into freshly zeroed memory.
	///
	/// # Errors
	/// Returns an error if a table overflows or the n-grams are inconsistent.
	fn populate(&mut self, mem: &mut [u8], ngrams: &CompiledNgrams) -> Result<()>;

	/// Checks a loaded data region.
	///
	/// # Errors
	/// Returns a binary-format error if the region is inconsistent.
	fn check_loaded(&self, _mem: &[u8]) -> Result<()> {
		Ok(())
	}

	/// Looks up `word` as a unigram and starts a walk at it.
	fn lookup_unigram(&self, mem: &[u8], word: WordIndex, node: &mut Self::Node) -> Lookup;

	/// Extends the walk one word to the left, into order `order_minus_2 + 2`.
	fn lookup_middle(&self, mem: &[u8], order_minus_2: usize, word: WordIndex, node: &mut Self::Node) -> Option<Lookup>;

	/// Probability of the highest-order n-gram extending the walk by `word`.
	fn lookup_longest(&self, mem: &[u8], word: WordIndex, node: &Self::Node) -> Option<f32>;

	/// Weights of the n-gram of `extend_length` words behind `extend_pointer`,
	/// leaving `node` positioned on it.
	fn unpack(&self, mem: &[u8], extend_pointer: u64, extend_length: u8, node: &mut Self::Node) -> Weights;

	/// Positions `node` on the n-gram `words` (most recent first) without
	/// collecting weights. Returns false if it is not stored.
	fn fast_make_node(&self, mem: &[u8], words: &[WordIndex], node: &mut Self::Node) -> bool;
}
