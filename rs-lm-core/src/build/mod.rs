//! Turns collected n-grams into the records a search backend stores.
//!
//! Building happens in memory, in one pass per concern:
//! 1. special words and positive probabilities are checked against the
//!    configured policies;
//! 2. words receive their final indices from the vocabulary;
//! 3. missing contexts and suffixes of stored n-grams are added as blanks,
//!    whose probability is what backoff would have given them;
//! 4. extension flags and rest costs are derived from neighbouring orders.

use std::collections::HashMap;

use log::{debug, info};

use crate::binary_format::Parameters;
use crate::config::{Config, ModelType};
use crate::error::{LmError, Result};
use crate::util::bit_packing::{plain_backoff, set_extension, NO_EXTENSION_BACKOFF};
use crate::vocab::{Vocabulary, WordIndex, BEGIN_SENTENCE, END_SENTENCE, UNK};

/// Word interning and n-gram accumulation.
pub mod collector;

pub use collector::NgramCollector;

/// One n-gram ready to be stored.
#[derive(Clone, Debug, PartialEq)]
pub struct CompiledNgram {
	/// Final word indices, oldest first.
	pub words: Vec<WordIndex>,
	pub prob: f32,
	/// Carries the extension flag in the sign of a zero backoff.
	pub backoff: f32,
	pub rest: f32,
	/// Whether a longer n-gram ends with this one.
	pub extends_left: bool,
}

/// Every n-gram of a model, grouped by order.
///
/// `orders[0]` holds exactly one entry per word, sorted by index.
#[derive(Clone, Debug, Default)]
pub struct CompiledNgrams {
	pub orders: Vec<Vec<CompiledNgram>>,
}

impl CompiledNgrams {
	pub fn counts(&self) -> Vec<u64> {
		self.orders.iter().map(|order| order.len() as u64).collect()
	}
}

/// Position of every n-gram of one order.
type OrderIndex = HashMap<Vec<WordIndex>, usize>;

fn index_order(order: &[CompiledNgram]) -> Result<OrderIndex> {
	let mut index = HashMap::with_capacity(order.len());
	for (position, ngram) in order.iter().enumerate() {
		if index.insert(ngram.words.clone(), position).is_some() {
			return Err(LmError::BuildOrder(format!("{}-gram {:?} appears twice", ngram.words.len(), ngram.words)));
		}
	}
	Ok(index)
}

fn blank(words: Vec<WordIndex>) -> CompiledNgram {
	CompiledNgram { words, prob: f32::NAN, backoff: NO_EXTENSION_BACKOFF, rest: f32::NAN, extends_left: false }
}

/// Checks the collected model, assigns final word indices and derives
/// everything the backends store.
///
/// Returns the n-grams, the words by final index and the layout parameters.
///
/// # Errors
/// Returns an error when a policy set to `ThrowUp` is triggered, when an
/// n-gram repeats or uses a word without a unigram entry.
pub fn compile<V: Vocabulary>(
	mut collector: NgramCollector,
	model_type: ModelType,
	config: &Config,
) -> Result<(CompiledNgrams, Vec<String>, Parameters)> {
	config.validate()?;
	check_special_words(&mut collector, config)?;
	clamp_positive(&mut collector, config)?;

	let indices = V::assign_indices(&collector.words);
	let mut words_by_index = vec![String::new(); collector.words.len()];
	for (word, &index) in collector.words.iter().zip(&indices) {
		words_by_index[index as usize] = word.clone();
	}

	let mut orders = Vec::with_capacity(collector.order());
	let mut unigrams = Vec::with_capacity(collector.words.len());
	for (id, weights) in collector.unigrams.iter().enumerate() {
		let Some((prob, backoff)) = *weights else {
			return Err(LmError::BuildOrder(format!(
				"\"{}\" appears in an n-gram but has no unigram entry",
				collector.words[id]
			)));
		};
		unigrams.push(CompiledNgram {
			words: vec![indices[id]],
			prob,
			backoff: plain_backoff(backoff),
			rest: prob,
			extends_left: false,
		});
	}
	unigrams.sort_by_key(|n| n.words[0]);
	orders.push(unigrams);

	for order in &collector.ngrams {
		orders.push(
			order
				.iter()
				.map(|raw| CompiledNgram {
					words: raw.words.iter().map(|&w| indices[w as usize]).collect(),
					prob: raw.prob,
					backoff: plain_backoff(raw.backoff),
					rest: raw.prob,
					extends_left: false,
				})
				.collect(),
		);
	}

	let mut index: Vec<OrderIndex> = orders.iter().map(|o| index_order(o)).collect::<Result<_>>()?;
	add_blanks(&mut orders, &mut index);
	set_flags(&mut orders, &index);
	if model_type == ModelType::RestProbing {
		max_rest(&mut orders, &index);
	}

	let compiled = CompiledNgrams { orders };
	let params = Parameters::new(model_type, compiled.counts(), config);
	info!("Compiled {} model with counts {:?}", model_type, params.counts);
	Ok((compiled, words_by_index, params))
}

fn check_special_words(collector: &mut NgramCollector, config: &Config) -> Result<()> {
	if collector.unigrams[0].is_none() {
		config.unknown_missing.handle(LmError::SpecialWordMissing(UNK))?;
		collector.unigrams[0] = Some((config.unknown_missing_logprob, NO_EXTENSION_BACKOFF));
	}
	for marker in [BEGIN_SENTENCE, END_SENTENCE] {
		if collector.declared(marker).is_none() {
			config.sentence_marker_missing.handle(LmError::SpecialWordMissing(marker))?;
		}
	}
	Ok(())
}

fn clamp_positive(collector: &mut NgramCollector, config: &Config) -> Result<()> {
	let policy = config.positive_log_probability;
	let NgramCollector { words, unigrams, ngrams, .. } = collector;
	for (id, weights) in unigrams.iter_mut().enumerate() {
		let Some((prob, _)) = weights else { continue };
		if *prob > 0.0 {
			policy.handle(LmError::PositiveLogProbability { value: *prob, ngram: words[id].clone() })?;
			*prob = 0.0;
		}
	}
	for raw in ngrams.iter_mut().flatten() {
		if raw.prob > 0.0 {
			let ngram = raw.words.iter().map(|&w| words[w as usize].as_str()).collect::<Vec<_>>().join(" ");
			policy.handle(LmError::PositiveLogProbability { value: raw.prob, ngram })?;
			raw.prob = 0.0;
		}
	}
	Ok(())
}

/// Adds the missing context and suffix of every n-gram, highest order first
/// so that added blanks are completed in turn, then gives each blank the
/// probability backoff assigns it.
fn add_blanks(orders: &mut [Vec<CompiledNgram>], index: &mut [OrderIndex]) {
	let order = orders.len();
	for k in (3..=order).rev() {
		let mut missing = Vec::new();
		for ngram in &orders[k - 1] {
			for part in [&ngram.words[..k - 1], &ngram.words[1..]] {
				if !index[k - 2].contains_key(part) {
					index[k - 2].insert(part.to_vec(), orders[k - 2].len() + missing.len());
					missing.push(blank(part.to_vec()));
				}
			}
		}
		if !missing.is_empty() {
			debug!("Adding {} blank {}-grams", missing.len(), k - 1);
		}
		orders[k - 2].extend(missing);
	}

	for k in 2..order {
		for position in 0..orders[k - 1].len() {
			if !orders[k - 1][position].prob.is_nan() {
				continue;
			}
			let words = &orders[k - 1][position].words;
			let suffix = &orders[k - 2][index[k - 2][&words[1..]]];
			let context = &orders[k - 2][index[k - 2][&words[..k - 1]]];
			let prob = suffix.prob + plain_backoff(context.backoff);
			let ngram = &mut orders[k - 1][position];
			ngram.prob = prob;
			ngram.rest = prob;
		}
	}
}

/// Marks contexts as extended to the right and suffixes as extended to the left.
fn set_flags(orders: &mut [Vec<CompiledNgram>], index: &[OrderIndex]) {
	for k in 2..=orders.len() {
		let (lower, upper) = orders.split_at_mut(k - 1);
		let lower = &mut lower[k - 2];
		for ngram in &upper[0] {
			let context = index[k - 2][&ngram.words[..k - 1]];
			set_extension(&mut lower[context].backoff);
			let suffix = index[k - 2][&ngram.words[1..]];
			lower[suffix].extends_left = true;
		}
	}
}

/// Sets each rest cost to the best probability among the n-gram and the
/// longer n-grams ending with it.
fn max_rest(orders: &mut [Vec<CompiledNgram>], index: &[OrderIndex]) {
	for k in (2..=orders.len()).rev() {
		let (lower, upper) = orders.split_at_mut(k - 1);
		let lower = &mut lower[k - 2];
		for ngram in &upper[0] {
			let suffix = &mut lower[index[k - 2][&ngram.words[1..]]];
			suffix.rest = suffix.rest.max(ngram.rest);
		}
	}
}
