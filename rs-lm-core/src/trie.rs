//! Bit-packed arrays making up the levels of the trie.
//!
//! N-grams are keyed right to left: the root level is indexed by the most
//! recent word, and each deeper level adds one word of left context. A record
//! at order `k` stores the leftmost word of its n-gram; its children at order
//! `k + 1` are the n-grams extending it one word to the left, stored as a
//! contiguous range sorted by word.
//!
//! ```text
//! unigrams:  [prob f32 | backoff f32 | next u64] x (vocab + 1)
//! middle:    [word | weights | next]            x (count + 1)
//! longest:   [word | prob]                      x count
//! ```
//!
//! The extra unigram and middle record is a sentinel whose `next` closes the
//! last child range.

use byteorder::{ByteOrder, LittleEndian};

use crate::bhiksha::Bhiksha;
use crate::binary_format::Parameters;
use crate::error::{LmError, Result};
use crate::util::bit_packing::{read_int57, write_int57, BitsMask};
use crate::vocab::WordIndex;

/// Half-open range of record indices in the next order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct NodeRange {
	pub begin: u64,
	pub end: u64,
}

impl NodeRange {
	pub fn is_empty(&self) -> bool {
		self.begin >= self.end
	}
}

const UNIGRAM_SIZE: usize = 16;

/// Order-1 records, indexed directly by word.
#[derive(Clone, Copy, Debug)]
pub struct Unigrams {
	offset: usize,
	count: u64,
}

impl Unigrams {
	pub fn size(count: u64) -> usize {
		(count as usize + 1) * UNIGRAM_SIZE
	}

	pub fn new(offset: usize, count: u64) -> Self {
		Self { offset, count }
	}

	#[inline]
	fn at(&self, word: WordIndex) -> usize {
		self.offset + word as usize * UNIGRAM_SIZE
	}

	/// Probability and backoff of `word`.
	#[inline]
	pub fn weights(&self, mem: &[u8], word: WordIndex) -> (f32, f32) {
		let at = self.at(word);
		(LittleEndian::read_f32(&mem[at..at + 4]), LittleEndian::read_f32(&mem[at + 4..at + 8]))
	}

	/// Range of bigrams ending in `word`.
	#[inline]
	pub fn children(&self, mem: &[u8], word: WordIndex) -> NodeRange {
		let at = self.at(word);
		NodeRange {
			begin: LittleEndian::read_u64(&mem[at + 8..at + 16]),
			end: LittleEndian::read_u64(&mem[at + UNIGRAM_SIZE + 8..at + UNIGRAM_SIZE + 16]),
		}
	}

	pub fn write_weights(&self, mem: &mut [u8], word: WordIndex, prob: f32, backoff: f32) {
		let at = self.at(word);
		LittleEndian::write_f32(&mut mem[at..at + 4], prob);
		LittleEndian::write_f32(&mut mem[at + 4..at + 8], backoff);
	}

	/// Sets where the children of `word` begin; `word == count` is the sentinel.
	pub fn write_next(&self, mem: &mut [u8], word: WordIndex, next: u64) {
		debug_assert!(u64::from(word) <= self.count);
		let at = self.at(word);
		LittleEndian::write_u64(&mut mem[at + 8..at + 16], next);
	}
}

/// Binary search for `word` among the records `range` of a packed array.
///
/// `word_bit(index)` is the bit offset of a record's word field.
#[inline]
fn find_bit_packed(
	mem: &[u8],
	word_mask: BitsMask,
	range: NodeRange,
	word: WordIndex,
	word_bit: impl Fn(u64) -> u64,
) -> Option<u64> {
	let (mut lo, mut hi) = (range.begin, range.end);
	let key = u64::from(word);
	while lo < hi {
		let mid = lo + (hi - lo) / 2;
		let found = read_int57(mem, word_bit(mid), word_mask);
		if found < key {
			lo = mid + 1;
		} else if found > key {
			hi = mid;
		} else {
			return Some(mid);
		}
	}
	None
}

/// Records of orders 2..N-1.
#[derive(Clone, Debug)]
pub struct BitPackedMiddle<B> {
	/// Byte offset of the records, after the pointer table.
	records: usize,
	word_mask: BitsMask,
	quant_bits: u8,
	total_bits: u64,
	entries: u64,
	insert_index: u64,
	/// Child pointer of the last inserted record; pointers never decrease.
	last_next: u64,
	bhiksha: B,
}

impl<B: Bhiksha> BitPackedMiddle<B> {
	fn total_bits(bhiksha: &B, quant_bits: u8, max_vocab: u64) -> u64 {
		u64::from(BitsMask::by_max(max_vocab).bits) + u64::from(quant_bits) + u64::from(bhiksha.inline_bits())
	}

	pub fn size(quant_bits: u8, entries: u64, max_vocab: u64, max_next: u64, params: &Parameters) -> usize {
		let bhiksha = B::new(0, entries + 1, max_next, params);
		let total_bits = Self::total_bits(&bhiksha, quant_bits, max_vocab);
		B::size(entries + 1, max_next, params) + (((1 + entries) * total_bits + 7) / 8) as usize + 8
	}

	pub fn new(offset: usize, quant_bits: u8, entries: u64, max_vocab: u64, max_next: u64, params: &Parameters) -> Self {
		let bhiksha = B::new(offset, entries + 1, max_next, params);
		let total_bits = Self::total_bits(&bhiksha, quant_bits, max_vocab);
		Self {
			records: offset + B::size(entries + 1, max_next, params),
			word_mask: BitsMask::by_max(max_vocab),
			quant_bits,
			total_bits,
			entries,
			insert_index: 0,
			last_next: 0,
			bhiksha,
		}
	}

	#[inline]
	fn record_bit(&self, index: u64) -> u64 {
		self.records as u64 * 8 + index * self.total_bits
	}

	#[inline]
	fn next_bit(&self, index: u64) -> u64 {
		self.record_bit(index) + u64::from(self.word_mask.bits) + u64::from(self.quant_bits)
	}

	pub fn entries(&self) -> u64 {
		self.entries
	}

	/// Appends a record and returns the bit offset of its weights.
	///
	/// # Errors
	/// - Sizing error when the array is full or `word` does not fit.
	/// - Build-order error when `next` is below the previous record's.
	pub fn insert(&mut self, mem: &mut [u8], word: WordIndex, next: u64) -> Result<u64> {
		if self.insert_index >= self.entries {
			return Err(LmError::Sizing(format!("middle order holds only {} records", self.entries)));
		}
		if next < self.last_next {
			return Err(LmError::BuildOrder(format!(
				"middle record {} points at {next}, before {}",
				self.insert_index, self.last_next
			)));
		}
		if u64::from(word) > self.word_mask.mask {
			return Err(LmError::Sizing(format!("word {word} does not fit in {} bits", self.word_mask.bits)));
		}
		let index = self.insert_index;
		write_int57(mem, self.record_bit(index), self.word_mask.bits, u64::from(word));
		let next_bit = self.next_bit(index);
		self.bhiksha.write_next(mem, index, next_bit, next);
		self.last_next = next;
		self.insert_index += 1;
		Ok(self.record_bit(index) + u64::from(self.word_mask.bits))
	}

	/// Writes the sentinel closing the last child range.
	///
	/// # Errors
	/// Returns a build-order error if records are missing or `next_end`
	/// precedes the last child pointer.
	pub fn finished_loading(&mut self, mem: &mut [u8], next_end: u64) -> Result<()> {
		if self.insert_index != self.entries {
			return Err(LmError::BuildOrder(format!(
				"middle order received {} of {} records",
				self.insert_index, self.entries
			)));
		}
		if next_end < self.last_next {
			return Err(LmError::BuildOrder(format!("middle order ends at {next_end}, before {}", self.last_next)));
		}
		let next_bit = self.next_bit(self.entries);
		self.bhiksha.write_next(mem, self.entries, next_bit, next_end);
		self.bhiksha.finished_loading(mem)
	}

	/// Looks `word` up in `range`. On success returns the weights' bit offset
	/// and the record index, and narrows `range` to the record's children.
	#[inline]
	pub fn find(&self, mem: &[u8], word: WordIndex, range: &mut NodeRange) -> Option<(u64, u64)> {
		let index = find_bit_packed(mem, self.word_mask, *range, word, |i| self.record_bit(i))?;
		let weights = self.record_bit(index) + u64::from(self.word_mask.bits);
		*range = self.bhiksha.read_next(mem, index, self.next_bit(index), self.total_bits);
		Some((weights, index))
	}

	/// Weights' bit offset of record `index`; `range` becomes its children.
	#[inline]
	pub fn read_entry(&self, mem: &[u8], index: u64, range: &mut NodeRange) -> u64 {
		*range = self.bhiksha.read_next(mem, index, self.next_bit(index), self.total_bits);
		self.record_bit(index) + u64::from(self.word_mask.bits)
	}

	/// Word stored in record `index`.
	pub fn word(&self, mem: &[u8], index: u64) -> WordIndex {
		read_int57(mem, self.record_bit(index), self.word_mask) as WordIndex
	}
}

/// Records of the highest order.
#[derive(Clone, Copy, Debug)]
pub struct BitPackedLongest {
	records: usize,
	word_mask: BitsMask,
	total_bits: u64,
	entries: u64,
	insert_index: u64,
}

impl BitPackedLongest {
	pub fn size(quant_bits: u8, entries: u64, max_vocab: u64) -> usize {
		let total_bits = u64::from(BitsMask::by_max(max_vocab).bits) + u64::from(quant_bits);
		(((1 + entries) * total_bits + 7) / 8) as usize + 8
	}

	pub fn new(offset: usize, quant_bits: u8, entries: u64, max_vocab: u64) -> Self {
		let word_mask = BitsMask::by_max(max_vocab);
		Self {
			records: offset,
			word_mask,
			total_bits: u64::from(word_mask.bits) + u64::from(quant_bits),
			entries,
			insert_index: 0,
		}
	}

	#[inline]
	fn record_bit(&self, index: u64) -> u64 {
		self.records as u64 * 8 + index * self.total_bits
	}

	pub fn entries(&self) -> u64 {
		self.entries
	}

	/// Appends a record and returns the bit offset of its probability.
	///
	/// # Errors
	/// Returns a sizing error when the array is full or `word` does not fit.
	pub fn insert(&mut self, mem: &mut [u8], word: WordIndex) -> Result<u64> {
		if self.insert_index >= self.entries {
			return Err(LmError::Sizing(format!("longest order holds only {} records", self.entries)));
		}
		if u64::from(word) > self.word_mask.mask {
			return Err(LmError::Sizing(format!("word {word} does not fit in {} bits", self.word_mask.bits)));
		}
		let at = self.record_bit(self.insert_index);
		write_int57(mem, at, self.word_mask.bits, u64::from(word));
		self.insert_index += 1;
		Ok(at + u64::from(self.word_mask.bits))
	}

	/// # Errors
	/// Returns a build-order error if records are missing.
	pub fn finished_loading(&self) -> Result<()> {
		if self.insert_index != self.entries {
			return Err(LmError::BuildOrder(format!(
				"longest order received {} of {} records",
				self.insert_index, self.entries
			)));
		}
		Ok(())
	}

	/// Bit offset of the probability of `word` within `range`.
	#[inline]
	pub fn find(&self, mem: &[u8], word: WordIndex, range: NodeRange) -> Option<u64> {
		let index = find_bit_packed(mem, self.word_mask, range, word, |i| self.record_bit(i))?;
		Some(self.record_bit(index) + u64::from(self.word_mask.bits))
	}

	/// Bit offset of the probability of record `index`.
	#[inline]
	pub fn read_entry(&self, index: u64) -> u64 {
		self.record_bit(index) + u64::from(self.word_mask.bits)
	}
}
