use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use log::info;

use super::language_model::LanguageModel;
use super::ngram_model::GenericModel;
use super::state::{FullScoreReturn, State, MAX_ORDER};
use crate::arpa::read_arpa;
use crate::bhiksha::{ArrayBhiksha, DontBhiksha};
use crate::binary_format::{self, Parameters};
use crate::build::{compile, NgramCollector};
use crate::config::{Config, ModelType};
use crate::error::Result;
use crate::quantize::{DontQuantize, SeparatelyQuantize};
use crate::search::{BackoffValue, HashedSearch, RestValue, Search, TrieSearch};
use crate::vocab::{EnumerateVocab, ProbingVocabulary, SortedVocabulary, Vocabulary, WordIndex};

pub type ProbingModel = GenericModel<HashedSearch<BackoffValue>, ProbingVocabulary>;
pub type RestProbingModel = GenericModel<HashedSearch<RestValue>, ProbingVocabulary>;
pub type TrieModel = GenericModel<TrieSearch<DontQuantize, DontBhiksha>, SortedVocabulary>;
pub type QuantTrieModel = GenericModel<TrieSearch<SeparatelyQuantize, DontBhiksha>, SortedVocabulary>;
pub type ArrayTrieModel = GenericModel<TrieSearch<DontQuantize, ArrayBhiksha>, SortedVocabulary>;
pub type QuantArrayTrieModel = GenericModel<TrieSearch<SeparatelyQuantize, ArrayBhiksha>, SortedVocabulary>;

/// A model of any [`ModelType`], chosen at run time.
///
/// Each variant is a separately compiled [`GenericModel`]; the enum only
/// dispatches, so queries cost one branch more than on the concrete type.
#[derive(Debug)]
pub enum Model {
	Probing(ProbingModel),
	RestProbing(RestProbingModel),
	Trie(TrieModel),
	QuantTrie(QuantTrieModel),
	ArrayTrie(ArrayTrieModel),
	QuantArrayTrie(QuantArrayTrieModel),
}

macro_rules! dispatch {
	($model:expr, $inner:ident => $body:expr) => {
		match $model {
			Model::Probing($inner) => $body,
			Model::RestProbing($inner) => $body,
			Model::Trie($inner) => $body,
			Model::QuantTrie($inner) => $body,
			Model::ArrayTrie($inner) => $body,
			Model::QuantArrayTrie($inner) => $body,
		}
	};
}

fn build<S: Search, V: Vocabulary>(
	collector: NgramCollector,
	model_type: ModelType,
	config: &Config,
	enumerate: Option<&mut dyn EnumerateVocab>,
) -> Result<GenericModel<S, V>> {
	let (compiled, words, params) = compile::<V>(collector, model_type, config)?;
	GenericModel::build(&compiled, words, params, enumerate)
}

impl Model {
	/// Builds a model from an ARPA file.
	///
	/// # Errors
	/// Returns an error if the file cannot be read, is malformed, or violates
	/// a policy of `config` set to `ThrowUp`.
	pub fn from_arpa<P: AsRef<Path>>(path: P, model_type: ModelType, config: &Config) -> Result<Self> {
		info!("Building {} model from {}", model_type, path.as_ref().display());
		Self::from_arpa_reader(BufReader::new(File::open(path)?), model_type, config)
	}

	/// Builds a model from ARPA text.
	///
	/// # Errors
	/// See [`from_arpa`](Self::from_arpa).
	pub fn from_arpa_reader<R: BufRead>(reader: R, model_type: ModelType, config: &Config) -> Result<Self> {
		Self::from_collector(read_arpa(reader)?, model_type, config)
	}

	/// Builds a model from n-grams added programmatically.
	///
	/// # Errors
	/// Returns an error if the n-grams are inconsistent or violate a policy
	/// of `config` set to `ThrowUp`.
	pub fn from_collector(collector: NgramCollector, model_type: ModelType, config: &Config) -> Result<Self> {
		Self::build_with(collector, model_type, config, None)
	}

	/// Like [`from_collector`](Self::from_collector), reporting every word
	/// with its final index to `enumerate`.
	///
	/// # Errors
	/// See [`from_collector`](Self::from_collector).
	pub fn from_collector_with_vocab(
		collector: NgramCollector,
		model_type: ModelType,
		config: &Config,
		enumerate: &mut dyn EnumerateVocab,
	) -> Result<Self> {
		Self::build_with(collector, model_type, config, Some(enumerate))
	}

	fn build_with(
		collector: NgramCollector,
		model_type: ModelType,
		config: &Config,
		enumerate: Option<&mut dyn EnumerateVocab>,
	) -> Result<Self> {
		Ok(match model_type {
			ModelType::Probing => Model::Probing(build(collector, model_type, config, enumerate)?),
			ModelType::RestProbing => Model::RestProbing(build(collector, model_type, config, enumerate)?),
			ModelType::Trie => Model::Trie(build(collector, model_type, config, enumerate)?),
			ModelType::QuantTrie => Model::QuantTrie(build(collector, model_type, config, enumerate)?),
			ModelType::ArrayTrie => Model::ArrayTrie(build(collector, model_type, config, enumerate)?),
			ModelType::QuantArrayTrie => Model::QuantArrayTrie(build(collector, model_type, config, enumerate)?),
		})
	}

	/// Opens a binary model. The model type and layout come from the file.
	///
	/// # Errors
	/// Returns an error if the file is not a binary model of this format, or
	/// is truncated or corrupt.
	pub fn from_binary<P: AsRef<Path>>(path: P, config: &Config) -> Result<Self> {
		Self::open_binary(path.as_ref(), config, None)
	}

	/// Like [`from_binary`](Self::from_binary), reporting every stored word
	/// to `enumerate`. Nothing is reported when the file holds no strings.
	///
	/// # Errors
	/// See [`from_binary`](Self::from_binary).
	pub fn from_binary_with_vocab<P: AsRef<Path>>(path: P, config: &Config, enumerate: &mut dyn EnumerateVocab) -> Result<Self> {
		Self::open_binary(path.as_ref(), config, Some(enumerate))
	}

	fn open_binary(path: &Path, config: &Config, enumerate: Option<&mut dyn EnumerateVocab>) -> Result<Self> {
		let mut file = File::open(path)?;
		let header = binary_format::read_header(&mut file)?;
		Ok(match header.params.model_type {
			ModelType::Probing => Model::Probing(GenericModel::from_header(&mut file, header, config, enumerate)?),
			ModelType::RestProbing => Model::RestProbing(GenericModel::from_header(&mut file, header, config, enumerate)?),
			ModelType::Trie => Model::Trie(GenericModel::from_header(&mut file, header, config, enumerate)?),
			ModelType::QuantTrie => Model::QuantTrie(GenericModel::from_header(&mut file, header, config, enumerate)?),
			ModelType::ArrayTrie => Model::ArrayTrie(GenericModel::from_header(&mut file, header, config, enumerate)?),
			ModelType::QuantArrayTrie => {
				Model::QuantArrayTrie(GenericModel::from_header(&mut file, header, config, enumerate)?)
			}
		})
	}

	/// Opens a binary model, or builds one of `model_type` from ARPA text.
	///
	/// The format is detected from the first bytes of the file.
	///
	/// # Errors
	/// See [`from_binary`](Self::from_binary) and [`from_arpa`](Self::from_arpa).
	pub fn load<P: AsRef<Path>>(path: P, model_type: ModelType, config: &Config) -> Result<Self> {
		if binary_format::is_binary(&path)? {
			Self::from_binary(path, config)
		} else {
			Self::from_arpa(path, model_type, config)
		}
	}

	/// # Errors
	/// Returns an error on I/O failure, or when vocabulary strings are
	/// requested by the parameters but were not kept.
	pub fn write_binary<P: AsRef<Path>>(&self, path: P) -> Result<()> {
		dispatch!(self, model => model.write_binary(path))
	}

	pub fn model_type(&self) -> ModelType {
		dispatch!(self, model => model.model_type())
	}

	pub fn parameters(&self) -> &Parameters {
		dispatch!(self, model => model.parameters())
	}

	pub fn is_mapped(&self) -> bool {
		dispatch!(self, model => model.is_mapped())
	}
}

impl LanguageModel for Model {
	fn order(&self) -> usize {
		dispatch!(self, model => model.order())
	}

	fn index(&self, word: &str) -> WordIndex {
		dispatch!(self, model => model.index(word))
	}

	fn word(&self, index: WordIndex) -> Option<&str> {
		dispatch!(self, model => model.word(index))
	}

	fn vocab_bound(&self) -> WordIndex {
		dispatch!(self, model => model.vocab_bound())
	}

	fn begin_sentence(&self) -> WordIndex {
		dispatch!(self, model => model.begin_sentence())
	}

	fn end_sentence(&self) -> WordIndex {
		dispatch!(self, model => model.end_sentence())
	}

	fn begin_sentence_state(&self) -> State {
		dispatch!(self, model => model.begin_sentence_state())
	}

	fn null_context_state(&self) -> State {
		dispatch!(self, model => model.null_context_state())
	}

	fn full_score(&self, in_state: &State, word: WordIndex) -> (FullScoreReturn, State) {
		dispatch!(self, model => model.full_score(in_state, word))
	}

	fn full_score_forgot_state(&self, context: &[WordIndex], word: WordIndex) -> (FullScoreReturn, State) {
		dispatch!(self, model => model.full_score_forgot_state(context, word))
	}

	fn get_state(&self, context: &[WordIndex]) -> State {
		dispatch!(self, model => model.get_state(context))
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
		dispatch!(self, model => model.extend_left(add_words, backoff_in, extend_pointer, extend_length, backoff_out, next_use))
	}

	fn un_rest(&self, pointers: &[u64], first_length: u8) -> f32 {
		dispatch!(self, model => model.un_rest(pointers, first_length))
	}
}
