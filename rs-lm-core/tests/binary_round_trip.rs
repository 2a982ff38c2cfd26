mod common;

use std::collections::BTreeMap;
use std::fs;

use common::{temp_path, toy, toy_with, PHRASES, TOY_ARPA};
use rs_lm_core::binary_format::{is_binary, Parameters, FORMAT_VERSION, MAGIC};
use rs_lm_core::{Config, LanguageModel, LmError, LoadMethod, Model, ModelType, NgramCollector, WordIndex};

fn assert_same_scores(built: &Model, loaded: &Model) {
	for phrase in PHRASES {
		assert_eq!(built.full_scores(phrase, true, true), loaded.full_scores(phrase, true, true), "\"{phrase}\"");
	}
}

#[test]
fn reloaded_models_score_the_same() {
	for model_type in ModelType::all() {
		let built = toy(model_type);
		let path = temp_path(&format!("round-trip-{model_type}.bin"));
		built.write_binary(&path).unwrap();
		assert!(is_binary(&path).unwrap());

		for load_method in [LoadMethod::Mmap, LoadMethod::Read] {
			let config = Config { load_method, ..Config::default() };
			let loaded = Model::from_binary(&path, &config).unwrap();
			assert_eq!(loaded.model_type(), model_type);
			assert_eq!(loaded.parameters(), built.parameters());
			assert_eq!(loaded.is_mapped(), load_method == LoadMethod::Mmap);
			assert_eq!(loaded.begin_sentence_state(), built.begin_sentence_state());
			assert_same_scores(&built, &loaded);
		}

		// `load` detects the format on its own.
		let detected = Model::load(&path, ModelType::Probing, &Config::default()).unwrap();
		assert_eq!(detected.model_type(), model_type);
		fs::remove_file(&path).unwrap();
	}
}

#[test]
fn vocabulary_is_enumerated_on_build_and_load() {
	for model_type in [ModelType::Probing, ModelType::Trie] {
		let mut built_words = BTreeMap::new();
		let collector = rs_lm_core::arpa::read_arpa(TOY_ARPA.as_bytes()).unwrap();
		let model = Model::from_collector_with_vocab(collector, model_type, &Config::default(), &mut |index: WordIndex, word: &str| {
			built_words.insert(index, word.to_owned());
		})
		.unwrap();
		assert_eq!(built_words.len(), 7);
		for (&index, word) in &built_words {
			assert_eq!(model.index(word), index);
			assert_eq!(model.word(index), Some(word.as_str()));
		}
		assert_eq!(built_words[&0], "<unk>");

		let path = temp_path(&format!("vocab-{model_type}.bin"));
		model.write_binary(&path).unwrap();
		let mut loaded_words = BTreeMap::new();
		let loaded = Model::from_binary_with_vocab(&path, &Config::default(), &mut |index: WordIndex, word: &str| {
			loaded_words.insert(index, word.to_owned());
		})
		.unwrap();
		assert_eq!(loaded_words, built_words);
		assert_eq!(loaded.vocab_bound(), 7);
		fs::remove_file(&path).unwrap();
	}
}

#[test]
fn vocabulary_strings_are_optional() {
	let config = Config { include_vocab: false, ..Config::default() };
	let built = toy_with(ModelType::ArrayTrie, &config);
	assert_eq!(built.word(1), None);

	let path = temp_path("no-strings.bin");
	built.write_binary(&path).unwrap();
	let loaded = Model::from_binary(&path, &config).unwrap();
	assert_eq!(loaded.word(1), None);
	assert_eq!(loaded.index("c"), built.index("c"));
	assert_same_scores(&built, &loaded);
	fs::remove_file(&path).unwrap();
}

#[test]
fn arpa_files_are_not_binary() {
	let path = temp_path("toy.arpa");
	fs::write(&path, TOY_ARPA).unwrap();
	assert!(!is_binary(&path).unwrap());
	let model = Model::load(&path, ModelType::QuantArrayTrie, &Config::default()).unwrap();
	assert_eq!(model.model_type(), ModelType::QuantArrayTrie);
	assert!(matches!(Model::from_binary(&path, &Config::default()), Err(LmError::BinaryFormat(_))));
	fs::remove_file(&path).unwrap();
}

#[test]
fn truncated_files_are_rejected() {
	let path = temp_path("truncated.bin");
	toy(ModelType::Trie).write_binary(&path).unwrap();
	let bytes = fs::read(&path).unwrap();
	fs::write(&path, &bytes[..bytes.len() - 16]).unwrap();
	for load_method in [LoadMethod::Mmap, LoadMethod::Read] {
		let config = Config { load_method, ..Config::default() };
		assert!(matches!(Model::from_binary(&path, &config), Err(LmError::BinaryFormat(_))));
	}
	fs::remove_file(&path).unwrap();
}

#[test]
fn programmatic_models_can_be_written() {
	let mut collector = NgramCollector::new(2).unwrap();
	collector.add_ngram(&["<s>"], -99.0, Some(-0.2)).unwrap();
	collector.add_ngram(&["</s>"], -0.7, None).unwrap();
	collector.add_ngram(&["mot"], -0.5, Some(-0.1)).unwrap();
	collector.add_ngram(&["<s>", "mot"], -0.05, None).unwrap();
	collector.add_ngram(&["mot", "</s>"], -0.02, None).unwrap();
	let built = Model::from_collector(collector, ModelType::RestProbing, &Config::default()).unwrap();
	// <unk> was missing and received the configured substitute.
	assert_eq!(built.full_scores("inconnu", false, false)[0].prob, -100.0);

	let path = temp_path("programmatic.bin");
	built.write_binary(&path).unwrap();
	let loaded = Model::from_binary(&path, &Config::default()).unwrap();
	assert!((loaded.score_sentence("mot", true, true) - -0.07).abs() < 1e-6);
	fs::remove_file(&path).unwrap();
}

/// Writes a file with a valid prelude around `params` and a zeroed data region.
fn write_header_only(name: &str, params: &Parameters) -> std::path::PathBuf {
	let encoded = postcard::to_stdvec(params).unwrap();
	let mut bytes = MAGIC.to_vec();
	bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
	bytes.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
	bytes.extend_from_slice(&encoded);
	bytes.resize(bytes.len().next_multiple_of(8) + 4096, 0);
	let path = temp_path(name);
	fs::write(&path, bytes).unwrap();
	path
}

#[test]
fn headers_with_unsupported_orders_are_rejected() {
	let params = toy(ModelType::Probing).parameters().clone();
	let config = Config { include_vocab: false, ..Config::default() };
	for counts in [vec![3], vec![3; 8]] {
		let bad = Parameters { counts, has_vocab_strings: false, ..params.clone() };
		let path = write_header_only(&format!("order-{}.bin", bad.counts.len()), &bad);
		for load_method in [LoadMethod::Mmap, LoadMethod::Read] {
			let config = Config { load_method, ..config.clone() };
			assert!(matches!(Model::from_binary(&path, &config), Err(LmError::BinaryFormat(_))), "{:?}", bad.counts);
		}
		fs::remove_file(&path).unwrap();
	}
}

#[test]
fn headers_with_unusable_bit_widths_are_rejected() {
	let params = toy(ModelType::QuantTrie).parameters().clone();
	let bad = Parameters { prob_bits: 0, has_vocab_strings: false, ..params };
	let path = write_header_only("zero-bits.bin", &bad);
	assert!(matches!(Model::from_binary(&path, &Config::default()), Err(LmError::BinaryFormat(_))));
	fs::remove_file(&path).unwrap();
}
