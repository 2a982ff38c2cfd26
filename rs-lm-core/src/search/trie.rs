//! N-grams stored in a bit-packed reverse trie.
//!
//! Data region layout: quantizer tables, unigram array, one packed array per
//! middle order, then the longest order. A lookup walk carries the child
//! range of the n-gram found so far; an empty range means nothing extends it
//! to the left.

use std::cmp::Ordering;

use log::debug;

use crate::bhiksha::Bhiksha;
use crate::binary_format::Parameters;
use crate::build::{CompiledNgram, CompiledNgrams};
use crate::error::{LmError, Result};
use crate::quantize::{Quantizer, TrainingSet};
use crate::search::{Lookup, Search, Weights};
use crate::trie::{BitPackedLongest, BitPackedMiddle, NodeRange, Unigrams};
use crate::vocab::WordIndex;

/// Compares n-grams by their words read right to left.
fn reversed_cmp(a: &[WordIndex], b: &[WordIndex]) -> Ordering {
	a.iter().rev().cmp(b.iter().rev())
}

/// N-grams of one order sorted right to left.
///
/// # Errors
/// Returns a build-order error if the same n-gram appears twice.
fn sorted_reversed(order: &[CompiledNgram]) -> Result<Vec<&CompiledNgram>> {
	let mut sorted: Vec<&CompiledNgram> = order.iter().collect();
	sorted.sort_by(|a, b| reversed_cmp(&a.words, &b.words));
	if let Some(pair) = sorted.windows(2).find(|pair| pair[0].words == pair[1].words) {
		return Err(LmError::BuildOrder(format!("n-gram {:?} appears twice", pair[0].words)));
	}
	Ok(sorted)
}

/// For each parent, the index of its first child; the last value closes the
/// final range.
///
/// A child's parent is the child without its leftmost word, so children
/// sorted right to left are grouped by parent in parent order.
///
/// # Errors
/// Returns a build-order error for a child whose parent is missing.
fn child_pointers(parents: &[&[WordIndex]], children: &[&CompiledNgram]) -> Result<Vec<u64>> {
	let mut pointers = Vec::with_capacity(parents.len() + 1);
	let mut child = 0usize;
	for parent in parents {
		if let Some(orphan) = children.get(child).filter(|c| reversed_cmp(&c.words[1..], parent) == Ordering::Less) {
			return Err(LmError::BuildOrder(format!("n-gram {:?} has no stored suffix", orphan.words)));
		}
		pointers.push(child as u64);
		while children.get(child).is_some_and(|c| &c.words[1..] == *parent) {
			child += 1;
		}
	}
	if let Some(orphan) = children.get(child) {
		return Err(LmError::BuildOrder(format!("n-gram {:?} has no stored suffix", orphan.words)));
	}
	pointers.push(child as u64);
	Ok(pointers)
}

/// Trie backend, generic over weight quantization and pointer compression.
#[derive(Clone, Debug)]
pub struct TrieSearch<Q, B> {
	order: usize,
	quant: Q,
	unigrams: Unigrams,
	middle: Vec<BitPackedMiddle<B>>,
	longest: BitPackedLongest,
}

impl<Q: Quantizer, B: Bhiksha> TrieSearch<Q, B> {
	#[inline]
	fn middle_weights(&self, mem: &[u8], order_minus_2: usize, bit_off: u64) -> Weights {
		let (prob, backoff) = self.quant.read_middle(mem, order_minus_2, bit_off);
		Weights { prob, backoff, rest: prob }
	}

	#[inline]
	fn unigram_weights(&self, mem: &[u8], word: WordIndex) -> Weights {
		let (prob, backoff) = self.unigrams.weights(mem, word);
		Weights { prob, backoff, rest: prob }
	}

	fn train(&self, mem: &mut [u8], sorted: &[Vec<&CompiledNgram>]) -> Result<()> {
		if !Q::IS_QUANTIZED {
			return Ok(());
		}
		let values = TrainingSet {
			middle: sorted[1..self.order - 1]
				.iter()
				.map(|order| (order.iter().map(|n| n.prob).collect(), order.iter().map(|n| n.backoff).collect()))
				.collect(),
			longest: sorted[self.order - 1].iter().map(|n| n.prob).collect(),
		};
		self.quant.train(mem, values)
	}
}

impl<Q: Quantizer, B: Bhiksha> Search for TrieSearch<Q, B> {
	type Node = NodeRange;

	const HAS_REST: bool = false;

	fn size(params: &Parameters) -> usize {
		let order = params.order();
		let counts = &params.counts;
		let quant = Q::new(0, params);
		let middle: usize = (1..order - 1)
			.map(|k| BitPackedMiddle::<B>::size(quant.middle_bits(), counts[k], counts[0], counts[k + 1], params))
			.sum();
		Q::size(params)
			+ Unigrams::size(counts[0])
			+ middle
			+ BitPackedLongest::size(quant.longest_bits(), counts[order - 1], counts[0])
	}

	fn new(offset: usize, params: &Parameters) -> Self {
		let order = params.order();
		let counts = &params.counts;
		let quant = Q::new(offset, params);
		let mut cursor = offset + Q::size(params);
		let unigrams = Unigrams::new(cursor, counts[0]);
		cursor += Unigrams::size(counts[0]);
		let middle = (1..order - 1)
			.map(|k| {
				let array = BitPackedMiddle::new(cursor, quant.middle_bits(), counts[k], counts[0], counts[k + 1], params);
				cursor += BitPackedMiddle::<B>::size(quant.middle_bits(), counts[k], counts[0], counts[k + 1], params);
				array
			})
			.collect();
		let longest = BitPackedLongest::new(cursor, quant.longest_bits(), counts[order - 1], counts[0]);
		Self { order, quant, unigrams, middle, longest }
	}

	fn order(&self) -> usize {
		self.order
	}

	fn populate(&mut self, mem: &mut [u8], ngrams: &CompiledNgrams) -> Result<()> {
		let sorted = ngrams.orders.iter().map(|order| sorted_reversed(order)).collect::<Result<Vec<_>>>()?;
		self.train(mem, &sorted)?;

		// Unigrams are indexed by word, which is already right-to-left order.
		let words: Vec<&[WordIndex]> = sorted[0].iter().map(|n| n.words.as_slice()).collect();
		let pointers = child_pointers(&words, &sorted[1])?;
		for (unigram, &next) in sorted[0].iter().zip(&pointers) {
			self.unigrams.write_weights(mem, unigram.words[0], unigram.prob, unigram.backoff);
			self.unigrams.write_next(mem, unigram.words[0], next);
		}
		self.unigrams.write_next(mem, sorted[0].len() as WordIndex, pointers[sorted[0].len()]);

		for order_minus_2 in 0..self.order - 2 {
			let records = &sorted[order_minus_2 + 1];
			let keys: Vec<&[WordIndex]> = records.iter().map(|n| n.words.as_slice()).collect();
			let pointers = child_pointers(&keys, &sorted[order_minus_2 + 2])?;
			let middle = &mut self.middle[order_minus_2];
			for (record, &next) in records.iter().zip(&pointers) {
				let weights = middle.insert(mem, record.words[0], next)?;
				self.quant.write_middle(mem, order_minus_2, weights, record.prob, record.backoff);
			}
			middle.finished_loading(mem, pointers[records.len()])?;
			debug!("Stored {} {}-grams", records.len(), order_minus_2 + 2);
		}

		for record in &sorted[self.order - 1] {
			let prob = self.longest.insert(mem, record.words[0])?;
			self.quant.write_longest(mem, prob, record.prob);
		}
		self.longest.finished_loading()
	}

	#[inline]
	fn lookup_unigram(&self, mem: &[u8], word: WordIndex, node: &mut NodeRange) -> Lookup {
		*node = self.unigrams.children(mem, word);
		Lookup { weights: self.unigram_weights(mem, word), independent_left: node.is_empty(), extend_left: u64::from(word) }
	}

	#[inline]
	fn lookup_middle(&self, mem: &[u8], order_minus_2: usize, word: WordIndex, node: &mut NodeRange) -> Option<Lookup> {
		let (bit_off, index) = self.middle[order_minus_2].find(mem, word, node)?;
		Some(Lookup {
			weights: self.middle_weights(mem, order_minus_2, bit_off),
			independent_left: node.is_empty(),
			extend_left: index,
		})
	}

	#[inline]
	fn lookup_longest(&self, mem: &[u8], word: WordIndex, node: &NodeRange) -> Option<f32> {
		self.longest.find(mem, word, *node).map(|bit_off| self.quant.read_longest(mem, bit_off))
	}

	fn unpack(&self, mem: &[u8], extend_pointer: u64, extend_length: u8, node: &mut NodeRange) -> Weights {
		if extend_length == 1 {
			let word = extend_pointer as WordIndex;
			*node = self.unigrams.children(mem, word);
			return self.unigram_weights(mem, word);
		}
		let order_minus_2 = usize::from(extend_length) - 2;
		let bit_off = self.middle[order_minus_2].read_entry(mem, extend_pointer, node);
		self.middle_weights(mem, order_minus_2, bit_off)
	}

	fn fast_make_node(&self, mem: &[u8], words: &[WordIndex], node: &mut NodeRange) -> bool {
		let Some((&first, rest)) = words.split_first() else {
			return false;
		};
		let mut independent_left = self.lookup_unigram(mem, first, node).independent_left;
		for (order_minus_2, &word) in rest.iter().enumerate() {
			if independent_left {
				return false;
			}
			match self.lookup_middle(mem, order_minus_2, word, node) {
				Some(found) => independent_left = found.independent_left,
				None => return false,
			}
		}
		true
	}
}
