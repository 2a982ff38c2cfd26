//! N-grams stored in one probing hash table per order.
//!
//! Unigrams live in a plain array indexed by word. Every higher order is a
//! table keyed by the hash of the n-gram read right to left: the unigram
//! "hash" is the word itself and each older word is folded in with
//! [`combine_word_hash`]. A lookup walk therefore carries the running hash
//! as its node.
//!
//! The sign bit of a stored probability is set when no longer n-gram ends
//! with this one. Probabilities are never positive, so readers restore the
//! sign after testing it.

use std::fmt::Debug;
use std::marker::PhantomData;

use byteorder::{ByteOrder, LittleEndian};

use crate::binary_format::Parameters;
use crate::build::{CompiledNgram, CompiledNgrams};
use crate::error::Result;
use crate::search::{Lookup, Search, Weights};
use crate::util::bit_packing::{sign_bit_set, with_sign_bit, without_sign_bit};
use crate::util::probing_hash_table::{ProbingEntry, ProbingHashTable};
use crate::vocab::WordIndex;

/// Folds one more word of left context into an n-gram hash.
#[inline]
pub fn combine_word_hash(current: u64, next: WordIndex) -> u64 {
	current.wrapping_mul(8978948897894561157) ^ (u64::from(next) + 1).wrapping_mul(17894857484156487943)
}

/// Hash key of an n-gram given in natural order (oldest word first).
pub fn ngram_key(words: &[WordIndex]) -> u64 {
	let mut reversed = words.iter().rev();
	let first = reversed.next().map_or(0, |&w| u64::from(w));
	reversed.fold(first, |hash, &word| combine_word_hash(hash, word))
}

/// Weights stored per unigram and middle n-gram.
pub trait HashedValue: Clone + Copy + Debug + Send + Sync + 'static {
	const SIZE: usize;
	const HAS_REST: bool;

	fn read(bytes: &[u8]) -> Weights;
	fn write(bytes: &mut [u8], weights: &Weights);
}

/// Probability and backoff.
#[derive(Clone, Copy, Debug, Default)]
pub struct BackoffValue;

impl HashedValue for BackoffValue {
	const SIZE: usize = 8;
	const HAS_REST: bool = false;

	#[inline]
	fn read(bytes: &[u8]) -> Weights {
		let prob = LittleEndian::read_f32(&bytes[..4]);
		Weights { prob, backoff: LittleEndian::read_f32(&bytes[4..8]), rest: prob }
	}

	fn write(bytes: &mut [u8], weights: &Weights) {
		LittleEndian::write_f32(&mut bytes[..4], weights.prob);
		LittleEndian::write_f32(&mut bytes[4..8], weights.backoff);
	}
}

/// Probability, backoff and rest cost.
#[derive(Clone, Copy, Debug, Default)]
pub struct RestValue;

impl HashedValue for RestValue {
	const SIZE: usize = 12;
	const HAS_REST: bool = true;

	#[inline]
	fn read(bytes: &[u8]) -> Weights {
		Weights {
			prob: LittleEndian::read_f32(&bytes[..4]),
			backoff: LittleEndian::read_f32(&bytes[4..8]),
			rest: LittleEndian::read_f32(&bytes[8..12]),
		}
	}

	fn write(bytes: &mut [u8], weights: &Weights) {
		LittleEndian::write_f32(&mut bytes[..4], weights.prob);
		LittleEndian::write_f32(&mut bytes[4..8], weights.backoff);
		LittleEndian::write_f32(&mut bytes[8..12], weights.rest);
	}
}

#[derive(Clone, Copy, Debug)]
struct MiddleEntry<V> {
	key: u64,
	weights: Weights,
	_value: PhantomData<V>,
}

impl<V: HashedValue> ProbingEntry for MiddleEntry<V> {
	const SIZE: usize = 8 + V::SIZE;

	fn key(&self) -> u64 {
		self.key
	}

	fn read(bytes: &[u8]) -> Self {
		MiddleEntry { key: LittleEndian::read_u64(&bytes[..8]), weights: V::read(&bytes[8..]), _value: PhantomData }
	}

	fn write(&self, bytes: &mut [u8]) {
		LittleEndian::write_u64(&mut bytes[..8], self.key);
		V::write(&mut bytes[8..], &self.weights);
	}
}

#[derive(Clone, Copy, Debug)]
struct LongestEntry {
	key: u64,
	prob: f32,
}

impl ProbingEntry for LongestEntry {
	const SIZE: usize = 12;

	fn key(&self) -> u64 {
		self.key
	}

	fn read(bytes: &[u8]) -> Self {
		LongestEntry { key: LittleEndian::read_u64(&bytes[..8]), prob: LittleEndian::read_f32(&bytes[8..12]) }
	}

	fn write(&self, bytes: &mut [u8]) {
		LittleEndian::write_u64(&mut bytes[..8], self.key);
		LittleEndian::write_f32(&mut bytes[8..12], self.prob);
	}
}

/// Moves the "extends left" flag into the probability's sign bit.
fn flagged(ngram: &CompiledNgram) -> Weights {
	let prob = if ngram.extends_left { without_sign_bit(ngram.prob) } else { with_sign_bit(ngram.prob) };
	Weights { prob, backoff: ngram.backoff, rest: ngram.rest }
}

/// Splits a stored probability into its flag and its value.
#[inline]
fn unflagged(mut weights: Weights) -> (Weights, bool) {
	let independent_left = sign_bit_set(weights.prob);
	weights.prob = with_sign_bit(weights.prob);
	(weights, independent_left)
}

/// Probing hash table backend, with or without rest costs.
#[derive(Clone, Debug)]
pub struct HashedSearch<V> {
	order: usize,
	unigrams: usize,
	unigram_count: u64,
	middle: Vec<ProbingHashTable<MiddleEntry<V>>>,
	longest: ProbingHashTable<LongestEntry>,
}

impl<V: HashedValue> HashedSearch<V> {
	#[inline]
	fn unigram_bytes<'a>(&self, mem: &'a [u8], word: WordIndex) -> &'a [u8] {
		let at = self.unigrams + word as usize * V::SIZE;
		&mem[at..at + V::SIZE]
	}
}

impl<V: HashedValue> Search for HashedSearch<V> {
	type Node = u64;

	const HAS_REST: bool = V::HAS_REST;

	fn size(params: &Parameters) -> usize {
		let order = params.order();
		let multiplier = params.probing_multiplier;
		let middle: usize = params.counts[1..order - 1]
			.iter()
			.map(|&count| ProbingHashTable::<MiddleEntry<V>>::size(count, multiplier))
			.sum();
		params.counts[0] as usize * V::SIZE + middle + ProbingHashTable::<LongestEntry>::size(params.counts[order - 1], multiplier)
	}

	fn new(offset: usize, params: &Parameters) -> Self {
		let order = params.order();
		let multiplier = params.probing_multiplier;
		let mut cursor = offset + params.counts[0] as usize * V::SIZE;
		let middle = params.counts[1..order - 1]
			.iter()
			.map(|&count| {
				let table = ProbingHashTable::new(cursor, count, multiplier);
				cursor = table.end();
				table
			})
			.collect();
		Self {
			order,
			unigrams: offset,
			unigram_count: params.counts[0],
			middle,
			longest: ProbingHashTable::new(cursor, params.counts[order - 1], multiplier),
		}
	}

	fn order(&self) -> usize {
		self.order
	}

	fn populate(&mut self, mem: &mut [u8], ngrams: &CompiledNgrams) -> Result<()> {
		debug_assert_eq!(ngrams.orders[0].len() as u64, self.unigram_count);
		for ngram in &ngrams.orders[0] {
			let at = self.unigrams + ngram.words[0] as usize * V::SIZE;
			V::write(&mut mem[at..at + V::SIZE], &flagged(ngram));
		}
		for (table, order) in self.middle.iter_mut().zip(&ngrams.orders[1..self.order - 1]) {
			for ngram in order {
				table.insert(mem, MiddleEntry { key: ngram_key(&ngram.words), weights: flagged(ngram), _value: PhantomData })?;
			}
		}
		for ngram in &ngrams.orders[self.order - 1] {
			self.longest.insert(mem, LongestEntry { key: ngram_key(&ngram.words), prob: ngram.prob })?;
		}
		Ok(())
	}

	#[inline]
	fn lookup_unigram(&self, mem: &[u8], word: WordIndex, node: &mut u64) -> Lookup {
		*node = u64::from(word);
		let (weights, independent_left) = unflagged(V::read(self.unigram_bytes(mem, word)));
		Lookup { weights, independent_left, extend_left: u64::from(word) }
	}

	#[inline]
	fn lookup_middle(&self, mem: &[u8], order_minus_2: usize, word: WordIndex, node: &mut u64) -> Option<Lookup> {
		*node = combine_word_hash(*node, word);
		let entry = self.middle[order_minus_2].find(mem, *node)?;
		let (weights, independent_left) = unflagged(entry.weights);
		Some(Lookup { weights, independent_left, extend_left: *node })
	}

	#[inline]
	fn lookup_longest(&self, mem: &[u8], word: WordIndex, node: &u64) -> Option<f32> {
		self.longest.find(mem, combine_word_hash(*node, word)).map(|entry| entry.prob)
	}

	fn unpack(&self, mem: &[u8], extend_pointer: u64, extend_length: u8, node: &mut u64) -> Weights {
		*node = extend_pointer;
		let stored = if extend_length == 1 {
			V::read(self.unigram_bytes(mem, extend_pointer as WordIndex))
		} else {
			self.middle[usize::from(extend_length) - 2].must_find(mem, extend_pointer).weights
		};
		unflagged(stored).0
	}

	#[inline]
	fn fast_make_node(&self, _mem: &[u8], words: &[WordIndex], node: &mut u64) -> bool {
		let Some((&first, rest)) = words.split_first() else {
			return false;
		};
		*node = rest.iter().fold(u64::from(first), |hash, &word| combine_word_hash(hash, word));
		true
	}
}
