#![allow(dead_code)]

use rs_lm_core::{Config, LanguageModel, Model, ModelType, WordIndex};

pub const TOY_ARPA: &str = "\
\\data\\
ngram 1=7
ngram 2=7
ngram 3=3

\\1-grams:
-2.0\t<unk>
-99\t<s>\t-0.6
-1.1\t</s>
-0.9\ta\t-0.4
-1.0\tb\t-0.35
-1.2\tc\t-0.25
-1.5\td

\\2-grams:
-0.3\t<s> a\t-0.2
-0.45\ta b\t-0.15
-0.5\tb c\t-0.1
-0.7\tc </s>
-0.8\tb </s>
-0.6\t<s> b\t-0.05
-0.4\tc d

\\3-grams:
-0.1\t<s> a b
-0.2\ta b c
-0.15\tb c </s>

\\end\\
";

/// Phrases covering matched trigrams, backoff, unknown words and sentence ends.
pub const PHRASES: &[&str] = &[
	"a b c </s>",
	"b c d",
	"a b </s>",
	"c a b c </s>",
	"d zzz a b",
	"a a b c d </s>",
	"b",
];

pub fn toy(model_type: ModelType) -> Model {
	toy_with(model_type, &Config::default())
}

pub fn toy_with(model_type: ModelType, config: &Config) -> Model {
	Model::from_arpa_reader(TOY_ARPA.as_bytes(), model_type, config).unwrap()
}

pub fn indices(model: &Model, phrase: &str) -> Vec<WordIndex> {
	phrase.split_whitespace().map(|w| model.index(w)).collect()
}

/// Tolerance for comparing a model against the unquantized reference.
pub fn tolerance(model_type: ModelType) -> f32 {
	if model_type.is_quantized() { 1e-3 } else { 1e-4 }
}

pub fn temp_path(name: &str) -> std::path::PathBuf {
	std::env::temp_dir().join(format!("rs-lm-{}-{}", std::process::id(), name))
}
