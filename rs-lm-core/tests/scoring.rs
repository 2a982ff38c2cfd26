mod common;

use common::{indices, tolerance, toy, PHRASES, TOY_ARPA};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rs_lm_core::{Config, LanguageModel, Model, ModelType};

fn close(a: f32, b: f32, tolerance: f32) -> bool {
	(a - b).abs() <= tolerance
}

#[test]
fn longest_match_wins() {
	for model_type in ModelType::all() {
		let model = toy(model_type);
		let scores = model.full_scores("a b", true, true);
		let probs: Vec<f32> = scores.iter().map(|s| s.prob).collect();
		let lengths: Vec<u8> = scores.iter().map(|s| s.ngram_length).collect();
		assert_eq!(lengths, vec![2, 3, 2], "{model_type}");
		let tol = tolerance(model_type);
		// </s> after "a b" backs off to "b </s>" and pays the backoff of "a b".
		for (found, expected) in probs.iter().zip([-0.3, -0.1, -0.8 + -0.15]) {
			assert!(close(*found, expected, tol), "{model_type}: {found} vs {expected}");
		}
		assert!(close(model.score_sentence("a b", true, true), -1.35, 3.0 * tol));
	}
}

#[test]
fn unseen_context_backs_off() {
	for model_type in ModelType::all() {
		let model = toy(model_type);
		let tol = tolerance(model_type);

		let after_a = model.get_state(&[model.index("a")]);
		let (ret, _) = model.full_score(&after_a, model.index("d"));
		assert_eq!(ret.ngram_length, 1);
		assert!(close(ret.prob, -0.4 + -1.5, tol), "{model_type}: {}", ret.prob);

		// Unknown word after "b": backoff of "b" plus the <unk> probability.
		let after_b = model.get_state(&[model.index("b")]);
		let unknown = model.index("zzz");
		assert_eq!(unknown, 0);
		let (ret, state) = model.full_score(&after_b, unknown);
		assert!(close(ret.prob, -0.35 + -2.0, tol), "{model_type}: {}", ret.prob);
		assert_eq!(state.length(), 0);

		let scores = model.full_scores("a zzz", false, false);
		assert!(scores[1].oov);
		assert!(!scores[0].oov);
	}
}

#[test]
fn zero_backoff_gives_the_lower_order_probability() {
	let arpa = TOY_ARPA.replace("-1.0\tb\t-0.35", "-1.0\tb\t0");
	let model = Model::from_arpa_reader(arpa.as_bytes(), ModelType::Probing, &Config::default()).unwrap();
	let after_b = model.get_state(&[model.index("b")]);
	let (ret, _) = model.full_score(&after_b, model.index("zzz"));
	assert_eq!(ret.prob, -2.0);
	// "b" still keeps its context role through the extension flag.
	assert_eq!(after_b.length(), 1);
}

#[test]
fn all_model_types_agree() {
	let reference = toy(ModelType::Probing);
	for model_type in ModelType::all() {
		let model = toy(model_type);
		let tol = tolerance(model_type);
		for phrase in PHRASES {
			for (bos, eos) in [(true, true), (false, false), (true, false)] {
				let expected = reference.full_scores(phrase, bos, eos);
				let found = model.full_scores(phrase, bos, eos);
				assert_eq!(expected.len(), found.len());
				for (e, f) in expected.iter().zip(&found) {
					assert_eq!(e.word, f.word);
					assert_eq!(e.ngram_length, f.ngram_length, "{model_type} on \"{phrase}\"");
					assert!(close(e.prob, f.prob, tol), "{model_type} on \"{phrase}\": {} vs {}", e.prob, f.prob);
				}
			}
		}
	}
}

#[test]
fn states_only_keep_useful_context() {
	for model_type in ModelType::all() {
		let model = toy(model_type);
		let d = model.index("d");
		// "d" has no backoff and starts no bigram, so nothing is kept.
		let (_, state) = model.full_score(&model.begin_sentence_state(), d);
		assert_eq!(state.length(), 0, "{model_type}");
		assert_eq!(state, model.null_context_state());

		let (a, b) = (model.index("a"), model.index("b"));
		let state = model.get_state(&[b, a, model.begin_sentence(), a, b]);
		assert_eq!(state.words(), &[b, a], "{model_type}");
	}
}

#[test]
fn forgotten_state_matches_tracked_state() {
	let mut rng = StdRng::seed_from_u64(17);
	let words = ["<s>", "</s>", "a", "b", "c", "d", "zzz"];
	for model_type in ModelType::all() {
		let model = toy(model_type);
		for _ in 0..200 {
			let length = rng.random_range(0..4);
			let context: Vec<_> = (0..length).map(|_| model.index(words[rng.random_range(0..words.len())])).collect();
			let word = model.index(words[rng.random_range(1..words.len())]);

			let (tracked, tracked_state) = model.full_score(&model.get_state(&context), word);
			let (forgot, forgot_state) = model.full_score_forgot_state(&context, word);
			assert!(close(tracked.prob, forgot.prob, 1e-5), "{model_type} {context:?} {word}");
			assert_eq!(tracked.ngram_length, forgot.ngram_length);
			assert_eq!(tracked_state, forgot_state);
		}
	}
}

#[test]
fn scoring_is_deterministic() {
	for model_type in ModelType::all() {
		let first = toy(model_type);
		let second = toy(model_type);
		for phrase in PHRASES {
			let a = indices(&first, phrase);
			let b = indices(&second, phrase);
			assert_eq!(a, b);
			let mut state_a = first.begin_sentence_state();
			let mut state_b = second.begin_sentence_state();
			for (&wa, &wb) in a.iter().zip(&b) {
				let (ra, next_a) = first.full_score(&state_a, wa);
				let (rb, next_b) = second.full_score(&state_b, wb);
				assert_eq!(ra, rb);
				assert_eq!(next_a, next_b);
				state_a = next_a;
				state_b = next_b;
			}
		}
	}
}

#[test]
fn missing_contexts_are_completed() {
	// The context "d a" of "d a b" is missing; its suffix "a b" is stored.
	let arpa = TOY_ARPA.replace("ngram 3=3", "ngram 3=4").replace("-0.15\tb c </s>", "-0.15\tb c </s>\n-0.05\td a b");
	for model_type in ModelType::all() {
		let model = Model::from_arpa_reader(arpa.as_bytes(), model_type, &Config::default()).unwrap();
		let tol = tolerance(model_type);
		assert_eq!(model.parameters().counts, vec![7, 8, 4], "{model_type}");

		let scores = model.full_scores("d a b", false, false);
		// The blank "d a" scores what backoff from "d" gives it.
		assert_eq!(scores[1].ngram_length, 2);
		assert!(close(scores[1].prob, -0.9, tol), "{model_type}: {}", scores[1].prob);
		assert_eq!(scores[2].ngram_length, 3);
		assert!(close(scores[2].prob, -0.05, tol), "{model_type}: {}", scores[2].prob);
	}
}

#[test]
fn perplexity_follows_the_sentence_score() {
	let model = toy(ModelType::Probing);
	let total = model.score_sentence("a b", true, true);
	let expected = 10f64.powf(-f64::from(total) / 3.0);
	assert!((model.perplexity("a b") - expected).abs() < 1e-4);
}
