mod common;

use common::{indices, tolerance, toy, PHRASES};
use rs_lm_core::{ChartState, LanguageModel, Model, ModelType, RuleScore, WordIndex};

fn score_phrase(model: &Model, words: &[WordIndex], begin_sentence: bool) -> (f32, ChartState) {
	let mut rule = RuleScore::new(model);
	if begin_sentence {
		rule.begin_sentence();
	}
	for &word in words {
		rule.terminal(word);
	}
	rule.finish()
}

fn combine(model: &Model, parts: &[(f32, ChartState)]) -> (f32, ChartState) {
	let mut rule = RuleScore::new(model);
	let ((first_prob, first), rest) = parts.split_first().unwrap();
	rule.begin_non_terminal(first, *first_prob);
	for (prob, state) in rest {
		rule.non_terminal(state, *prob);
	}
	rule.finish()
}

fn sentence_score(model: &Model, words: &[WordIndex]) -> f32 {
	let mut state = model.begin_sentence_state();
	let mut total = 0.0;
	for &word in words {
		let (ret, next) = model.full_score(&state, word);
		total += ret.prob;
		state = next;
	}
	total
}

#[test]
fn splitting_a_phrase_keeps_its_score() {
	for model_type in ModelType::all() {
		let model = toy(model_type);
		let tol = tolerance(model_type);
		for phrase in PHRASES {
			let words = indices(&model, phrase);
			let (whole_prob, whole) = score_phrase(&model, &words, false);
			for split in 1..words.len() {
				let left = score_phrase(&model, &words[..split], false);
				let right = score_phrase(&model, &words[split..], false);
				let (prob, state) = combine(&model, &[left, right]);
				assert!(
					(prob - whole_prob).abs() <= tol,
					"{model_type} \"{phrase}\" split at {split}: {prob} vs {whole_prob}"
				);
				assert_eq!(state.right.words(), whole.right.words(), "{model_type} \"{phrase}\" split at {split}");
				assert_eq!(state.left.length, whole.left.length, "{model_type} \"{phrase}\" split at {split}");
				assert_eq!(state.left.full, whole.left.full);
			}
		}
	}
}

#[test]
fn three_way_splits_keep_the_score() {
	for model_type in ModelType::all() {
		let model = toy(model_type);
		let tol = tolerance(model_type);
		for phrase in PHRASES {
			let words = indices(&model, phrase);
			let (whole_prob, whole) = score_phrase(&model, &words, false);
			for first in 1..words.len() {
				for second in first + 1..words.len() {
					let parts = [
						score_phrase(&model, &words[..first], false),
						score_phrase(&model, &words[first..second], false),
						score_phrase(&model, &words[second..], false),
					];
					let (prob, state) = combine(&model, &parts);
					assert!((prob - whole_prob).abs() <= tol, "{model_type} \"{phrase}\" at {first},{second}");
					assert_eq!(state.right.words(), whole.right.words());
				}
			}
		}
	}
}

#[test]
fn completed_sentences_match_left_to_right_scoring() {
	for model_type in ModelType::all() {
		let model = toy(model_type);
		let tol = tolerance(model_type);
		for phrase in PHRASES {
			let words = indices(&model, phrase);
			let expected = sentence_score(&model, &words);

			let (prob, state) = score_phrase(&model, &words, true);
			assert!((prob - expected).abs() <= tol, "{model_type} \"{phrase}\": {prob} vs {expected}");
			assert!(state.left.full);
			assert_eq!(state.left.length, 0);

			// The rest costs charged to the right part are corrected once
			// the sentence start is attached.
			for split in 1..words.len() {
				let left = score_phrase(&model, &words[..split], true);
				let right = score_phrase(&model, &words[split..], false);
				let (prob, combined) = combine(&model, &[left, right]);
				assert!(
					(prob - expected).abs() <= tol,
					"{model_type} \"{phrase}\" split at {split}: {prob} vs {expected}"
				);
				assert_eq!(combined.right.words(), state.right.words());
			}
		}
	}
}

#[test]
fn rest_costs_are_charged_without_context() {
	let model = toy(ModelType::RestProbing);
	let b = model.index("b");
	let (prob, state) = score_phrase(&model, &[b], false);
	// The best probability "b" reaches with any left context is "<s> a b".
	assert!((prob - -0.1).abs() < 1e-6);
	assert_eq!(state.left.length, 1);
	assert!(!state.left.full);
	assert!((model.un_rest(state.left.pointers(), 1) - (-1.0 - -0.1)).abs() < 1e-6);

	let plain = toy(ModelType::Probing);
	let (prob, _) = score_phrase(&plain, &[plain.index("b")], false);
	assert_eq!(prob, -1.0);
}
