use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use log::{debug, info};

use super::language_model::LanguageModel;
use super::state::{FullScoreReturn, State, MAX_ORDER};
use crate::binary_format::{self, Header, Parameters};
use crate::build::CompiledNgrams;
use crate::config::{Config, ModelType};
use crate::error::{LmError, Result};
use crate::search::Search;
use crate::util::bit_packing::has_extension;
use crate::util::memory::Backing;
use crate::vocab::{EnumerateVocab, Vocabulary, WordIndex, BEGIN_SENTENCE, END_SENTENCE};

fn align8(size: usize) -> usize {
	(size + 7) & !7
}

/// An n-gram model over one search backend and one vocabulary.
///
/// The vocabulary sits at the start of the data region and the search
/// structure right after it, at the next multiple of 8. Both only hold
/// offsets into the region, so the same value works on a freshly built
/// buffer and on a mapped file.
///
/// # Invariants
/// - Every word index handed to the search is below the vocabulary bound;
///   larger indices are read as `<unk>`.
/// - `begin_sentence` always keeps `<s>` as context, even when no n-gram
///   extends it.
#[derive(Debug)]
pub struct GenericModel<S, V> {
	backing: Backing,
	data_len: usize,
	params: Parameters,
	vocab: V,
	search: S,
	words: Option<Vec<String>>,
	begin_sentence: State,
	null_context: State,
	bos: WordIndex,
	eos: WordIndex,
}

impl<S: Search, V: Vocabulary> GenericModel<S, V> {
	fn layout(params: &Parameters) -> (V, S, usize) {
		let vocab = V::new(0, params.counts[0], params);
		let search_offset = align8(V::size(params.counts[0], params));
		let search = S::new(search_offset, params);
		(vocab, search, search_offset + S::size(params))
	}

	/// Lays out and fills a model from compiled n-grams.
	///
	/// # Errors
	/// Returns an error if a table overflows or the n-grams are inconsistent.
	pub(crate) fn build(
		compiled: &CompiledNgrams,
		words_by_index: Vec<String>,
		params: Parameters,
		mut enumerate: Option<&mut dyn EnumerateVocab>,
	) -> Result<Self> {
		let (mut vocab, mut search, data_len) = Self::layout(&params);
		debug!("Allocating {data_len} bytes for a {} model", params.model_type);
		let mut backing = Backing::zeroed(data_len);
		let mem = backing
			.data_mut()
			.ok_or_else(|| LmError::BuildOrder("model memory is not writable".to_owned()))?;

		for (index, word) in words_by_index.iter().enumerate() {
			vocab.insert(mem, word, index as WordIndex)?;
			if let Some(enumerate) = enumerate.as_deref_mut() {
				enumerate.add(index as WordIndex, word);
			}
		}
		vocab.check_loaded(mem)?;
		search.populate(mem, compiled)?;

		let words = params.has_vocab_strings.then_some(words_by_index);
		Ok(Self::assemble(backing, data_len, params, vocab, search, words))
	}

	/// Opens the data region described by an already read header.
	///
	/// # Errors
	/// Returns a binary-format error if the file is truncated or its tables
	/// do not match the header.
	pub(crate) fn from_header(
		file: &mut File,
		header: Header,
		config: &Config,
		mut enumerate: Option<&mut dyn EnumerateVocab>,
	) -> Result<Self> {
		let Header { params, words, data_offset } = header;
		let (vocab, search, data_len) = Self::layout(&params);
		let backing = Backing::from_file(file, data_offset, data_len, config.load_method)?;
		let mem = backing.data();

		vocab.check_loaded(mem)?;
		search.check_loaded(mem)?;
		if let Some(words) = &words {
			for (index, word) in words.iter().enumerate() {
				if vocab.index(mem, word) as usize != index {
					return Err(LmError::BinaryFormat(format!("vocabulary string \"{word}\" does not match index {index}")));
				}
				if let Some(enumerate) = enumerate.as_deref_mut() {
					enumerate.add(index as WordIndex, word);
				}
			}
		}

		info!(
			"Loaded {} model of order {} ({})",
			params.model_type,
			params.order(),
			if backing.is_mapped() { "mapped" } else { "read" }
		);
		Ok(Self::assemble(backing, data_len, params, vocab, search, words))
	}

	fn assemble(backing: Backing, data_len: usize, params: Parameters, vocab: V, search: S, words: Option<Vec<String>>) -> Self {
		let mem = backing.data();
		let bos = vocab.index(mem, BEGIN_SENTENCE);
		let eos = vocab.index(mem, END_SENTENCE);
		let mut node = S::Node::default();
		let mut begin_sentence = State { length: 1, ..State::default() };
		begin_sentence.words[0] = bos;
		begin_sentence.backoff[0] = search.lookup_unigram(mem, bos, &mut node).weights.backoff;
		Self { backing, data_len, params, vocab, search, words, begin_sentence, null_context: State::default(), bos, eos }
	}

	/// Writes the model to a binary file that [`from_header`](Self::from_header) reopens.
	///
	/// # Errors
	/// Returns an error on I/O failure.
	pub fn write_binary<P: AsRef<Path>>(&self, path: P) -> Result<()> {
		let mut out = BufWriter::new(File::create(&path)?);
		binary_format::write(&mut out, &self.params, self.words.as_deref(), &self.backing.data()[..self.data_len])?;
		info!("Wrote {} model to {}", self.params.model_type, path.as_ref().display());
		Ok(())
	}

	pub fn parameters(&self) -> &Parameters {
		&self.params
	}

	pub fn model_type(&self) -> ModelType {
		self.params.model_type
	}

	/// Whether the data region is a read-only map of a file.
	pub fn is_mapped(&self) -> bool {
		self.backing.is_mapped()
	}

	#[inline]
	fn mem(&self) -> &[u8] {
		self.backing.data()
	}

	#[inline]
	fn known(&self, word: WordIndex) -> WordIndex {
		if word < self.vocab.bound() { word } else { 0 }
	}

	/// Scores `new_word` after `context_rev`, leaving the backoffs of the
	/// context for the caller to charge.
	fn score_except_backoff(&self, context_rev: &[WordIndex], new_word: WordIndex, out_state: &mut State) -> FullScoreReturn {
		let mem = self.mem();
		let new_word = self.known(new_word);
		let mut node = S::Node::default();
		let unigram = self.search.lookup_unigram(mem, new_word, &mut node);
		let mut ret = FullScoreReturn {
			prob: unigram.weights.prob,
			ngram_length: 1,
			independent_left: unigram.independent_left,
			extend_left: unigram.extend_left,
			rest: unigram.weights.rest,
		};
		out_state.backoff[0] = unigram.weights.backoff;
		out_state.length = u8::from(has_extension(unigram.weights.backoff));
		out_state.words[0] = new_word;
		if context_rev.is_empty() {
			return ret;
		}

		let mut next_use = out_state.length;
		self.resume_score(context_rev, 0, &mut node, &mut out_state.backoff[1..], &mut next_use, &mut ret);
		out_state.length = next_use;
		let kept = usize::from(next_use).saturating_sub(1);
		for (slot, &word) in out_state.words[1..].iter_mut().zip(&context_rev[..kept]) {
			*slot = self.known(word);
		}
		ret
	}

	/// Continues a walk at order `order_minus_2 + 2` through `hist`.
	///
	/// `backoff_out[i]` receives the backoff of the n-gram ending at
	/// `hist[i]`, and `next_use` the length of the longest n-gram found that
	/// is the context of a longer one.
	fn resume_score(
		&self,
		hist: &[WordIndex],
		mut order_minus_2: usize,
		node: &mut S::Node,
		backoff_out: &mut [f32],
		next_use: &mut u8,
		ret: &mut FullScoreReturn,
	) {
		let mem = self.mem();
		let mut i = 0;
		loop {
			if i == hist.len() || ret.independent_left {
				return;
			}
			if order_minus_2 == self.params.order() - 2 {
				break;
			}
			let Some(found) = self.search.lookup_middle(mem, order_minus_2, self.known(hist[i]), node) else {
				ret.independent_left = true;
				return;
			};
			backoff_out[i] = found.weights.backoff;
			ret.prob = found.weights.prob;
			ret.rest = found.weights.rest;
			ret.ngram_length = (order_minus_2 + 2) as u8;
			ret.independent_left = found.independent_left;
			ret.extend_left = found.extend_left;
			if has_extension(found.weights.backoff) {
				*next_use = ret.ngram_length;
			}
			order_minus_2 += 1;
			i += 1;
		}

		ret.independent_left = true;
		if let Some(prob) = self.search.lookup_longest(mem, self.known(hist[i]), node) {
			ret.prob = prob;
			ret.rest = prob;
			ret.ngram_length = self.params.order() as u8;
		}
	}
}

impl<S: Search, V: Vocabulary> LanguageModel for GenericModel<S, V> {
	fn order(&self) -> usize {
		self.params.order()
	}

	fn index(&self, word: &str) -> WordIndex {
		self.vocab.index(self.mem(), word)
	}

	fn word(&self, index: WordIndex) -> Option<&str> {
		self.words.as_ref()?.get(index as usize).map(String::as_str)
	}

	fn vocab_bound(&self) -> WordIndex {
		self.vocab.bound()
	}

	fn begin_sentence(&self) -> WordIndex {
		self.bos
	}

	fn end_sentence(&self) -> WordIndex {
		self.eos
	}

	fn begin_sentence_state(&self) -> State {
		self.begin_sentence
	}

	fn null_context_state(&self) -> State {
		self.null_context
	}

	fn full_score(&self, in_state: &State, word: WordIndex) -> (FullScoreReturn, State) {
		let mut out_state = State::default();
		let mut ret = self.score_except_backoff(in_state.words(), word, &mut out_state);
		ret.prob += in_state.backoffs()[usize::from(ret.ngram_length) - 1..].iter().sum::<f32>();
		out_state.normalize();
		(ret, out_state)
	}

	fn full_score_forgot_state(&self, context: &[WordIndex], word: WordIndex) -> (FullScoreReturn, State) {
		let context = &context[..context.len().min(self.order() - 1)];
		let mut out_state = State::default();
		let mut ret = self.score_except_backoff(context, word, &mut out_state);
		out_state.normalize();

		let mut start = usize::from(ret.ngram_length);
		if context.len() < start {
			return (ret, out_state);
		}
		let mem = self.mem();
		let mut node = S::Node::default();
		if start <= 1 {
			ret.prob += self.search.lookup_unigram(mem, self.known(context[0]), &mut node).weights.backoff;
			start = 2;
		} else {
			let prefix: Vec<WordIndex> = context[..start - 1].iter().map(|&w| self.known(w)).collect();
			if !self.search.fast_make_node(mem, &prefix, &mut node) {
				return (ret, out_state);
			}
		}
		for (order_minus_2, &word) in (start - 2..).zip(&context[start - 1..]) {
			match self.search.lookup_middle(mem, order_minus_2, self.known(word), &mut node) {
				Some(found) => ret.prob += found.weights.backoff,
				None => break,
			}
		}
		(ret, out_state)
	}

	fn get_state(&self, context: &[WordIndex]) -> State {
		let context = &context[..context.len().min(self.order() - 1)];
		let mut state = State::default();
		let Some((&first, rest)) = context.split_first() else {
			return state;
		};
		let mem = self.mem();
		let mut node = S::Node::default();
		state.backoff[0] = self.search.lookup_unigram(mem, self.known(first), &mut node).weights.backoff;
		state.length = u8::from(has_extension(state.backoff[0]));
		for (order_minus_2, &word) in rest.iter().enumerate() {
			let Some(found) = self.search.lookup_middle(mem, order_minus_2, self.known(word), &mut node) else {
				break;
			};
			state.backoff[order_minus_2 + 1] = found.weights.backoff;
			if has_extension(found.weights.backoff) {
				state.length = (order_minus_2 + 2) as u8;
			}
		}
		for (slot, &word) in state.words.iter_mut().zip(&context[..usize::from(state.length)]) {
			*slot = self.known(word);
		}
		state.normalize();
		state
	}

	fn extend_left(
		&self,
		add_words: &[WordIndex],
		backoff_in: &[f32],
		extend_pointer: u64,
		extend_length: u8,
		backoff_out: &mut [f32; MAX_ORDER - 1],
		next_use: &mut u8,
	) -> FullScoreReturn {
		let mem = self.mem();
		let mut node = S::Node::default();
		let mut ret = FullScoreReturn::default();
		if extend_length == 1 {
			let unigram = self.search.lookup_unigram(mem, extend_pointer as WordIndex, &mut node);
			debug_assert!(!unigram.independent_left);
			ret.prob = unigram.weights.prob;
			ret.rest = unigram.weights.rest;
			ret.independent_left = unigram.independent_left;
			ret.extend_left = unigram.extend_left;
		} else {
			let weights = self.search.unpack(mem, extend_pointer, extend_length, &mut node);
			ret.prob = weights.prob;
			ret.rest = weights.rest;
			ret.extend_left = extend_pointer;
			ret.independent_left = false;
		}
		let subtract_me = ret.rest;
		ret.ngram_length = extend_length;
		*next_use = extend_length;
		self.resume_score(add_words, usize::from(extend_length) - 1, &mut node, &mut backoff_out[..], next_use, &mut ret);
		*next_use -= extend_length;

		let charged = usize::from(ret.ngram_length - extend_length);
		ret.prob += backoff_in[charged..add_words.len()].iter().sum::<f32>();
		ret.prob -= subtract_me;
		ret.rest -= subtract_me;
		ret
	}

	fn un_rest(&self, pointers: &[u64], first_length: u8) -> f32 {
		if !S::HAS_REST {
			return 0.0;
		}
		let mem = self.mem();
		let mut node = S::Node::default();
		let mut length = first_length;
		let mut pointers = pointers.iter();
		let mut ret = 0.0;
		if length == 1 {
			let Some(&word) = pointers.next() else {
				return 0.0;
			};
			let weights = self.search.lookup_unigram(mem, word as WordIndex, &mut node).weights;
			ret = weights.prob - weights.rest;
			length += 1;
		}
		for &pointer in pointers {
			let weights = self.search.unpack(mem, pointer, length, &mut node);
			ret += weights.prob - weights.rest;
			length += 1;
		}
		ret
	}
}
