//! Build and load configuration.
//!
//! A `Config` is threaded explicitly through building and loading; nothing
//! here is process-wide. Values that shape the binary layout (bit widths,
//! probing multiplier) are copied into the file header at build time, so a
//! model is always reloaded with the layout it was written with.

use std::fmt;
use std::str::FromStr;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::{LmError, Result};

/// Storage backend and compression choice.
///
/// Selected once per model; each variant is backed by a separately
/// monomorphized search implementation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ModelType {
	/// Probing hash tables keyed by context hash.
	Probing,
	/// Probing hash tables that also store rest costs.
	RestProbing,
	/// Bit-packed trie with raw weights and direct child pointers.
	Trie,
	/// Bit-packed trie with quantized weights.
	QuantTrie,
	/// Bit-packed trie with array-compressed child pointers.
	ArrayTrie,
	/// Bit-packed trie with quantized weights and array-compressed child pointers.
	QuantArrayTrie,
}

impl ModelType {
	pub fn is_trie(self) -> bool {
		!matches!(self, ModelType::Probing | ModelType::RestProbing)
	}

	pub fn is_quantized(self) -> bool {
		matches!(self, ModelType::QuantTrie | ModelType::QuantArrayTrie)
	}

	pub fn name(self) -> &'static str {
		match self {
			ModelType::Probing => "probing",
			ModelType::RestProbing => "rest_probing",
			ModelType::Trie => "trie",
			ModelType::QuantTrie => "quant_trie",
			ModelType::ArrayTrie => "array_trie",
			ModelType::QuantArrayTrie => "quant_array_trie",
		}
	}

	pub fn all() -> [ModelType; 6] {
		[
			ModelType::Probing,
			ModelType::RestProbing,
			ModelType::Trie,
			ModelType::QuantTrie,
			ModelType::ArrayTrie,
			ModelType::QuantArrayTrie,
		]
	}
}

impl fmt::Display for ModelType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.name())
	}
}

impl FromStr for ModelType {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		ModelType::all()
			.into_iter()
			.find(|t| t.name() == s.to_ascii_lowercase())
			.ok_or_else(|| format!("Unknown model type: {s}"))
	}
}

/// What to do when the source model is unusual but still usable.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum WarningAction {
	/// Abort the build with the error.
	ThrowUp,
	/// Log a warning and continue.
	Complain,
	/// Continue without a word.
	Silent,
}

impl WarningAction {
	/// Applies the policy to `error`.
	///
	/// Returns `Err(error)` for `ThrowUp`, `Ok(())` otherwise.
	pub(crate) fn handle(self, error: LmError) -> Result<()> {
		match self {
			WarningAction::ThrowUp => Err(error),
			WarningAction::Complain => {
				warn!("{error}");
				Ok(())
			}
			WarningAction::Silent => Ok(()),
		}
	}
}

/// How a binary model is brought into memory.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadMethod {
	/// Map the file read-only; pages are shared with other processes mapping it.
	Mmap,
	/// Read the whole file into an owned buffer.
	Read,
}

/// Configuration for building and loading models.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Config {
	/// Buckets per entry in probing hash tables. Must be > 1.0.
	pub probing_multiplier: f32,

	/// Bits per quantized probability code.
	pub prob_bits: u8,

	/// Bits per quantized backoff code (two codes are reserved).
	pub backoff_bits: u8,

	/// Upper bound on the high pointer bits moved out of line by array compression.
	pub pointer_bhiksha_bits: u8,

	/// Policy when the model has no `<unk>`.
	pub unknown_missing: WarningAction,

	/// Log probability given to a substituted `<unk>`.
	pub unknown_missing_logprob: f32,

	/// Policy when `<s>` or `</s>` is absent.
	pub sentence_marker_missing: WarningAction,

	/// Policy for log probabilities above zero (clamped to zero on continue).
	pub positive_log_probability: WarningAction,

	/// Store vocabulary strings in the binary file.
	pub include_vocab: bool,

	/// How binary files are loaded.
	pub load_method: LoadMethod,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			probing_multiplier: 1.5,
			prob_bits: 8,
			backoff_bits: 8,
			pointer_bhiksha_bits: 22,
			unknown_missing: WarningAction::Complain,
			unknown_missing_logprob: -100.0,
			sentence_marker_missing: WarningAction::ThrowUp,
			positive_log_probability: WarningAction::ThrowUp,
			include_vocab: true,
			load_method: LoadMethod::Mmap,
		}
	}
}

impl Config {
	/// Checks the values that size the binary layout.
	///
	/// # Errors
	/// Returns a sizing error for out-of-range bit widths or multiplier.
	pub fn validate(&self) -> Result<()> {
		if !(self.probing_multiplier > 1.0) {
			return Err(LmError::Sizing(format!(
				"probing multiplier must be > 1.0, got {}",
				self.probing_multiplier
			)));
		}
		if !(1..=25).contains(&self.prob_bits) {
			return Err(LmError::Sizing(format!("prob_bits must be in 1..=25, got {}", self.prob_bits)));
		}
		if !(2..=25).contains(&self.backoff_bits) {
			return Err(LmError::Sizing(format!("backoff_bits must be in 2..=25, got {}", self.backoff_bits)));
		}
		if self.pointer_bhiksha_bits > 57 {
			return Err(LmError::Sizing(format!(
				"pointer_bhiksha_bits must be <= 57, got {}",
				self.pointer_bhiksha_bits
			)));
		}
		Ok(())
	}
}
