//! Error type shared by model building, loading and writing.
//!
//! Queries never fail: unknown words resolve to `<unk>`. Everything here
//! happens while a model is being read, built or written, and aborts that
//! operation entirely (there is no partially built model).

use thiserror::Error;

/// The error type for every fallible operation of this crate.
#[derive(Debug, Error)]
pub enum LmError {
	/// An error originating from file I/O.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// Malformed ARPA text.
	#[error("Format error at line {line}: {message}")]
	Format { line: u64, message: String },

	/// The ARPA header declared a different number of n-grams than the section held.
	#[error("Count mismatch for {order}-grams: header declared {expected}, found {found}")]
	CountMismatch { order: usize, expected: u64, found: u64 },

	/// A table or bit field is too small for what is inserted into it.
	#[error("Sizing error: {0}")]
	Sizing(String),

	/// `<unk>`, `<s>` or `</s>` is absent from the model.
	#[error("The model does not contain {0}")]
	SpecialWordMissing(&'static str),

	/// A log probability above zero was found in the source.
	#[error("Positive log probability {value} for \"{ngram}\"")]
	PositiveLogProbability { value: f32, ngram: String },

	/// The model order is outside what the engine supports.
	#[error("Order {order} is not supported (expected 2..={max})")]
	UnsupportedOrder { order: usize, max: usize },

	/// Records were handed to a builder out of the required order, or twice.
	#[error("Build order violated: {0}")]
	BuildOrder(String),

	/// The binary file is not a model written by this crate, or is truncated.
	#[error("Invalid binary file: {0}")]
	BinaryFormat(String),

	/// A worker thread stopped before delivering its result.
	#[error("Worker thread failed: {0}")]
	Worker(String),

	/// The binary header could not be encoded or decoded.
	#[error("Header serialization failed: {0}")]
	Postcard(#[from] postcard::Error),
}

/// A convenience `Result` type alias using [`LmError`].
pub type Result<T> = std::result::Result<T, LmError>;

impl LmError {
	pub(crate) fn format(line: u64, message: impl Into<String>) -> Self {
		LmError::Format { line, message: message.into() }
	}
}
