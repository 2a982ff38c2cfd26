use std::env;

use log::info;
use rs_lm_core::io::{build_output_path, get_filename, read_lines};
use rs_lm_core::{Config, LanguageModel, Model, ModelType};

fn main() -> Result<(), Box<dyn std::error::Error>> {
	env_logger::init();

	// Usage: rs-lm-exemple <model.arpa|model.bin> [model_type] [sentences.txt]
	let args: Vec<String> = env::args().collect();
	let model_path = args.get(1).map(String::as_str).unwrap_or("./data/sample.arpa");
	let model_type: ModelType = match args.get(2) {
		Some(name) => name.parse()?,
		None => ModelType::Probing,
	};
	let config = Config::default();

	// Load the binary next to the ARPA file when it was already built,
	// otherwise build from text and cache the binary for next time
	let binary_path = build_output_path(model_path, "bin")?;
	let model = if binary_path.exists() {
		Model::from_binary(&binary_path, &config)?
	} else {
		let model = Model::load(model_path, model_type, &config)?;
		model.write_binary(&binary_path)?;
		info!("Cached binary model at {}", binary_path.display());
		Model::from_binary(&binary_path, &config)?
	};

	println!(
		"Model '{}': {} order {}, counts {:?}, mapped: {}",
		get_filename(model_path)?,
		model.model_type(),
		model.order(),
		model.parameters().counts,
		model.is_mapped()
	);

	let sentences = match args.get(3) {
		Some(path) => read_lines(path)?,
		None => vec!["this is a sentence".to_owned(), "this is another one".to_owned()],
	};

	for sentence in &sentences {
		let scores = model.full_scores(sentence, true, true);
		for score in &scores {
			let oov = if score.oov { " (OOV)" } else { "" };
			println!("  {}={} {} {}{}", score.word, score.index, score.ngram_length, score.prob, oov);
		}
		let total: f32 = scores.iter().map(|s| s.prob).sum();
		println!("Total: {total} Perplexity: {:.3}  | {sentence}", model.perplexity(sentence));
	}

	Ok(())
}
