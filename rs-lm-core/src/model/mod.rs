//! Loaded language models and the ways to query them.
//!
//! This module provides:
//! - The query interface shared by every model (`LanguageModel`)
//! - The right-context state threaded between queries (`State`)
//! - One model type per storage backend (`GenericModel` and its aliases)
//! - A run-time choice among them (`Model`)
//! - Scoring of phrases whose left context comes later (`RuleScore`)

/// Query interface and sentence-level helpers.
pub mod language_model;

/// Right context carried between scoring calls, and the result of one call.
pub mod state;

/// A model over one search backend and one vocabulary.
///
/// Owns the memory region, lays out the vocabulary and search inside it,
/// and implements scoring on top of the backend lookups.
pub mod ngram_model;

/// Left-state scoring for chart decoders.
pub mod left;

/// Run-time selection of the model type, building and loading entry points.
pub mod any_model;

pub use any_model::{
	ArrayTrieModel, Model, ProbingModel, QuantArrayTrieModel, QuantTrieModel, RestProbingModel, TrieModel,
};
pub use language_model::{LanguageModel, WordScore};
pub use left::{ChartState, Left, RuleScore};
pub use ngram_model::GenericModel;
pub use state::{FullScoreReturn, State, MAX_ORDER};
