use byteorder::{ByteOrder, LittleEndian};

use crate::error::{LmError, Result};
use crate::model::state::MAX_ORDER;
use crate::util::bit_packing::NO_EXTENSION_BACKOFF;
use crate::util::probing_hash_table::{GrowableProbingHashTable, ProbingEntry};
use crate::vocab::{word_hash, UNK};

/// Word identifier local to a collector, before final indices are assigned.
pub(crate) type ProvisionalId = u32;

#[derive(Clone, Copy, Debug)]
struct InternEntry {
	key: u64,
	id: ProvisionalId,
}

impl ProbingEntry for InternEntry {
	const SIZE: usize = 12;

	fn key(&self) -> u64 {
		self.key
	}

	fn read(bytes: &[u8]) -> Self {
		InternEntry { key: LittleEndian::read_u64(&bytes[..8]), id: LittleEndian::read_u32(&bytes[8..12]) }
	}

	fn write(&self, bytes: &mut [u8]) {
		LittleEndian::write_u64(&mut bytes[..8], self.key);
		LittleEndian::write_u32(&mut bytes[8..12], self.id);
	}
}

/// An n-gram of order 2 or more as collected.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct RawNgram {
	pub words: Vec<ProvisionalId>,
	pub prob: f32,
	pub backoff: f32,
}

/// Accumulates the words and n-grams of a model before it is built.
///
/// N-grams may be added in any order. Words are interned as they are first
/// seen; `<unk>` always has provisional id 0 and `<UNK>` is read as `<unk>`.
///
/// ```
/// use rs_lm_core::build::NgramCollector;
///
/// let mut collector = NgramCollector::new(2).unwrap();
/// collector.add_ngram(&["<s>"], -99.0, Some(-0.5)).unwrap();
/// collector.add_ngram(&["</s>"], -1.0, None).unwrap();
/// collector.add_ngram(&["<s>", "</s>"], -0.1, None).unwrap();
/// assert_eq!(collector.order(), 2);
/// ```
#[derive(Debug)]
pub struct NgramCollector {
	order: usize,
	interned: GrowableProbingHashTable<InternEntry>,
	pub(crate) words: Vec<String>,
	/// `(prob, backoff)` per provisional id, when declared.
	pub(crate) unigrams: Vec<Option<(f32, f32)>>,
	/// N-grams of orders 2..=order.
	pub(crate) ngrams: Vec<Vec<RawNgram>>,
}

impl NgramCollector {
	/// Starts an empty model of the given order.
	///
	/// # Errors
	/// Returns an error if `order` is outside `2..=MAX_ORDER`.
	pub fn new(order: usize) -> Result<Self> {
		if !(2..=MAX_ORDER).contains(&order) {
			return Err(LmError::UnsupportedOrder { order, max: MAX_ORDER });
		}
		let mut collector = Self {
			order,
			interned: GrowableProbingHashTable::new(64, 1.5),
			words: Vec::new(),
			unigrams: Vec::new(),
			ngrams: vec![Vec::new(); order - 1],
		};
		collector.intern(UNK)?;
		Ok(collector)
	}

	/// Reserves room for the counts announced by a file header.
	pub(crate) fn reserve(&mut self, counts: &[u64]) {
		if let Some(&unigrams) = counts.first() {
			self.words.reserve(unigrams as usize);
			self.unigrams.reserve(unigrams as usize);
		}
		for (order, &count) in self.ngrams.iter_mut().zip(counts.iter().skip(1)) {
			order.reserve(count as usize);
		}
	}

	pub fn order(&self) -> usize {
		self.order
	}

	/// Number of distinct words seen so far, `<unk>` included.
	pub fn word_count(&self) -> usize {
		self.words.len()
	}

	fn canonical(word: &str) -> &str {
		if word == "<UNK>" { UNK } else { word }
	}

	/// Provisional id of `word`, interning it if new.
	///
	/// # Errors
	/// Returns a build-order error if two distinct words share a hash.
	pub(crate) fn intern(&mut self, word: &str) -> Result<ProvisionalId> {
		let word = Self::canonical(word);
		let key = word_hash(word);
		if let Some(entry) = self.interned.find(key) {
			let known = &self.words[entry.id as usize];
			if known != word {
				return Err(LmError::BuildOrder(format!("words \"{known}\" and \"{word}\" have the same hash")));
			}
			return Ok(entry.id);
		}
		let id = self.words.len() as ProvisionalId;
		self.interned.insert(InternEntry { key, id })?;
		self.words.push(word.to_owned());
		self.unigrams.push(None);
		Ok(id)
	}

	/// Provisional id of a word declared as a unigram; `<unk>` always qualifies.
	pub(crate) fn declared(&self, word: &str) -> Option<ProvisionalId> {
		let word = Self::canonical(word);
		let entry = self.interned.find(word_hash(word))?;
		let declared = entry.id == 0 || self.unigrams[entry.id as usize].is_some();
		(declared && self.words[entry.id as usize] == word).then_some(entry.id)
	}

	/// # Errors
	/// Returns a build-order error if the word was already declared.
	pub(crate) fn add_unigram(&mut self, word: &str, prob: f32, backoff: f32) -> Result<()> {
		let id = self.intern(word)?;
		let slot = &mut self.unigrams[id as usize];
		if slot.is_some() {
			return Err(LmError::BuildOrder(format!("unigram \"{word}\" appears twice")));
		}
		*slot = Some((prob, backoff));
		Ok(())
	}

	/// Adds an n-gram of already interned words (oldest first).
	pub(crate) fn add_ids(&mut self, words: Vec<ProvisionalId>, prob: f32, backoff: Option<f32>) {
		debug_assert!((2..=self.order).contains(&words.len()));
		let order = words.len();
		self.ngrams[order - 2].push(RawNgram { words, prob, backoff: backoff.unwrap_or(NO_EXTENSION_BACKOFF) });
	}

	/// Adds an n-gram given oldest word first. A single word declares a unigram.
	///
	/// Duplicate n-grams of order 2 and more are reported when the model is built.
	///
	/// # Errors
	/// Returns an error for an empty or too long n-gram, or a repeated unigram.
	pub fn add_ngram(&mut self, words: &[&str], prob: f32, backoff: Option<f32>) -> Result<()> {
		match words.len() {
			0 => Err(LmError::BuildOrder("empty n-gram".to_owned())),
			1 => self.add_unigram(words[0], prob, backoff.unwrap_or(NO_EXTENSION_BACKOFF)),
			length if length > self.order => Err(LmError::BuildOrder(format!(
				"{length}-gram added to an order {} model",
				self.order
			))),
			_ => {
				let ids = words.iter().map(|w| self.intern(w)).collect::<Result<Vec<_>>>()?;
				self.add_ids(ids, prob, backoff);
				Ok(())
			}
		}
	}

	/// Number of n-grams collected per order, unigrams first.
	pub fn counts(&self) -> Vec<u64> {
		let unigrams = self.unigrams.iter().filter(|u| u.is_some()).count() as u64;
		std::iter::once(unigrams).chain(self.ngrams.iter().map(|o| o.len() as u64)).collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn unk_is_interned_first() {
		let mut collector = NgramCollector::new(3).unwrap();
		assert_eq!(collector.intern("<unk>").unwrap(), 0);
		assert_eq!(collector.intern("<UNK>").unwrap(), 0);
		assert_eq!(collector.intern("a").unwrap(), 1);
		assert_eq!(collector.intern("a").unwrap(), 1);
		assert_eq!(collector.word_count(), 2);
	}

	#[test]
	fn declared_requires_a_unigram() {
		let mut collector = NgramCollector::new(2).unwrap();
		collector.intern("seen").unwrap();
		collector.add_unigram("known", -1.0, -0.5).unwrap();
		assert_eq!(collector.declared("known"), Some(2));
		assert_eq!(collector.declared("seen"), None);
		assert_eq!(collector.declared("never"), None);
		assert_eq!(collector.declared("<UNK>"), Some(0));
	}

	#[test]
	fn orders_are_checked() {
		assert!(matches!(NgramCollector::new(1), Err(LmError::UnsupportedOrder { order: 1, .. })));
		assert!(matches!(NgramCollector::new(MAX_ORDER + 1), Err(LmError::UnsupportedOrder { .. })));

		let mut collector = NgramCollector::new(2).unwrap();
		assert!(collector.add_ngram(&["a", "b", "c"], -1.0, None).is_err());
		assert!(collector.add_ngram(&[], -1.0, None).is_err());
		collector.add_ngram(&["a"], -1.0, Some(-0.2)).unwrap();
		assert!(collector.add_ngram(&["a"], -1.0, None).is_err());
	}

	#[test]
	fn counts_per_order() {
		let mut collector = NgramCollector::new(3).unwrap();
		collector.add_ngram(&["a"], -1.0, None).unwrap();
		collector.add_ngram(&["b"], -1.0, None).unwrap();
		collector.add_ngram(&["a", "b"], -0.5, Some(-0.1)).unwrap();
		collector.add_ngram(&["b", "a", "b"], -0.2, None).unwrap();
		assert_eq!(collector.counts(), vec![2, 1, 1]);
		assert_eq!(collector.ngrams[1][0].backoff.to_bits(), NO_EXTENSION_BACKOFF.to_bits());
	}
}
