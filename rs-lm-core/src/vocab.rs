//! Mapping from word strings to dense indices.
//!
//! Both vocabularies store 64-bit hashes of the words, not the words
//! themselves; strings are kept separately (and optionally written to the
//! binary file) for reverse lookup. Unknown words map to index 0, `<unk>`.

use std::fmt::Debug;

use byteorder::{ByteOrder, LittleEndian};
use twox_hash::XxHash64;

use crate::binary_format::Parameters;
use crate::error::{LmError, Result};
use crate::util::probing_hash_table::{ProbingEntry, ProbingHashTable};

/// Dense word identifier; `0` is `<unk>`.
pub type WordIndex = u32;

pub const UNK: &str = "<unk>";
pub const BEGIN_SENTENCE: &str = "<s>";
pub const END_SENTENCE: &str = "</s>";

/// Hash of a word as stored in the vocabulary. Never zero.
#[inline]
pub fn word_hash(word: &str) -> u64 {
	match XxHash64::oneshot(0, word.as_bytes()) {
		0 => 1,
		hash => hash,
	}
}

/// Receives every `(index, word)` pair when a model is built or loaded.
pub trait EnumerateVocab {
	fn add(&mut self, index: WordIndex, word: &str);
}

impl<F: FnMut(WordIndex, &str)> EnumerateVocab for F {
	fn add(&mut self, index: WordIndex, word: &str) {
		self(index, word)
	}
}

/// Word lookup stored in the model buffer.
pub trait Vocabulary: Clone + Debug + Send + Sync {
	/// Bytes needed for `entries` words, `<unk>` included.
	fn size(entries: u64, params: &Parameters) -> usize;

	fn new(offset: usize, entries: u64, params: &Parameters) -> Self;

	/// Order in which words receive indices, given words with `<unk>` first.
	///
	/// Returns, for each input position, the index assigned to that word.
	fn assign_indices(words: &[String]) -> Vec<WordIndex>;

	/// Records `word` under `index`, which came from [`assign_indices`](Self::assign_indices).
	///
	/// # Errors
	/// Returns a build-order error when two words collide.
	fn insert(&mut self, mem: &mut [u8], word: &str, index: WordIndex) -> Result<()>;

	/// # Errors
	/// Returns an error if the stored hashes are inconsistent.
	fn check_loaded(&self, mem: &[u8]) -> Result<()>;

	/// Index of `word`, or 0 when it is unknown.
	fn index(&self, mem: &[u8], word: &str) -> WordIndex;

	/// One past the largest index.
	fn bound(&self) -> WordIndex;
}

#[derive(Clone, Copy, Debug)]
struct VocabEntry {
	key: u64,
	value: WordIndex,
}

impl ProbingEntry for VocabEntry {
	const SIZE: usize = 12;

	fn key(&self) -> u64 {
		self.key
	}

	fn read(bytes: &[u8]) -> Self {
		VocabEntry { key: LittleEndian::read_u64(&bytes[..8]), value: LittleEndian::read_u32(&bytes[8..12]) }
	}

	fn write(&self, bytes: &mut [u8]) {
		LittleEndian::write_u64(&mut bytes[..8], self.key);
		LittleEndian::write_u32(&mut bytes[8..12], self.value);
	}
}

/// Hash table from word hash to index, used with the probing backends.
///
/// Indices follow the order words were given in.
#[derive(Clone, Debug)]
pub struct ProbingVocabulary {
	table: ProbingHashTable<VocabEntry>,
	bound: WordIndex,
}

impl Vocabulary for ProbingVocabulary {
	fn size(entries: u64, params: &Parameters) -> usize {
		ProbingHashTable::<VocabEntry>::size(entries, params.probing_multiplier)
	}

	fn new(offset: usize, entries: u64, params: &Parameters) -> Self {
		Self { table: ProbingHashTable::new(offset, entries, params.probing_multiplier), bound: entries as WordIndex }
	}

	fn assign_indices(words: &[String]) -> Vec<WordIndex> {
		(0..words.len() as WordIndex).collect()
	}

	fn insert(&mut self, mem: &mut [u8], word: &str, index: WordIndex) -> Result<()> {
		self.table
			.insert(mem, VocabEntry { key: word_hash(word), value: index })
			.map_err(|e| match e {
				LmError::BuildOrder(_) => LmError::BuildOrder(format!("word \"{word}\" appears twice or collides")),
				other => other,
			})
	}

	fn check_loaded(&self, mem: &[u8]) -> Result<()> {
		self.table.check_consistency(mem).map_err(LmError::BinaryFormat)
	}

	#[inline]
	fn index(&self, mem: &[u8], word: &str) -> WordIndex {
		self.table.find(mem, word_hash(word)).map_or(0, |entry| entry.value)
	}

	fn bound(&self) -> WordIndex {
		self.bound
	}
}

/// Sorted array of word hashes, used with the trie backends.
///
/// `<unk>` is not stored; the word at position `p` has index `p + 1`, so
/// indices follow hash order.
#[derive(Clone, Copy, Debug)]
pub struct SortedVocabulary {
	offset: usize,
	/// Stored hashes, `<unk>` excluded.
	stored: usize,
}

impl SortedVocabulary {
	#[inline]
	fn hash_at(&self, mem: &[u8], position: usize) -> u64 {
		let at = self.offset + position * 8;
		LittleEndian::read_u64(&mem[at..at + 8])
	}
}

impl Vocabulary for SortedVocabulary {
	fn size(entries: u64, _params: &Parameters) -> usize {
		entries.saturating_sub(1) as usize * 8
	}

	fn new(offset: usize, entries: u64, _params: &Parameters) -> Self {
		Self { offset, stored: entries.saturating_sub(1) as usize }
	}

	fn assign_indices(words: &[String]) -> Vec<WordIndex> {
		let mut order: Vec<usize> = (1..words.len()).collect();
		order.sort_by_key(|&i| word_hash(&words[i]));
		let mut indices = vec![0; words.len()];
		for (rank, position) in order.into_iter().enumerate() {
			indices[position] = rank as WordIndex + 1;
		}
		indices
	}

	fn insert(&mut self, mem: &mut [u8], word: &str, index: WordIndex) -> Result<()> {
		if index == 0 {
			return Ok(());
		}
		let position = index as usize - 1;
		let hash = word_hash(word);
		// Unwritten slots hold 0, which no word hashes to.
		let before = if position > 0 { self.hash_at(mem, position - 1) } else { 0 };
		let after = if position + 1 < self.stored { self.hash_at(mem, position + 1) } else { 0 };
		if (before != 0 && before >= hash) || (after != 0 && after <= hash) {
			return Err(LmError::BuildOrder(format!("word \"{word}\" appears twice or collides")));
		}
		let at = self.offset + position * 8;
		LittleEndian::write_u64(&mut mem[at..at + 8], hash);
		Ok(())
	}

	fn check_loaded(&self, mem: &[u8]) -> Result<()> {
		for position in 1..self.stored {
			if self.hash_at(mem, position - 1) >= self.hash_at(mem, position) {
				return Err(LmError::BinaryFormat(format!(
					"vocabulary hashes at {} and {} are out of order or collide",
					position,
					position + 1
				)));
			}
		}
		Ok(())
	}

	#[inline]
	fn index(&self, mem: &[u8], word: &str) -> WordIndex {
		let key = word_hash(word);
		let (mut lo, mut hi) = (0usize, self.stored);
		while lo < hi {
			let mid = lo + (hi - lo) / 2;
			let found = self.hash_at(mem, mid);
			if found < key {
				lo = mid + 1;
			} else if found > key {
				hi = mid;
			} else {
				return mid as WordIndex + 1;
			}
		}
		0
	}

	fn bound(&self) -> WordIndex {
		self.stored as WordIndex + 1
	}
}
