//! Memory-mappable n-gram language model library.
//!
//! This crate provides a backoff n-gram query engine including:
//! - ARPA reading and in-memory model building
//! - Probing hash table and bit-packed trie storage, with optional
//!   quantization and pointer compression
//! - A binary format that is mapped back without parsing
//! - Full-sentence scoring and left-state scoring for chart decoders
//!
//! Queries never fail and never allocate; every error happens while a model
//! is read, built or written.
//!
//! ```
//! use rs_lm_core::{Config, LanguageModel, Model, ModelType};
//!
//! let arpa = "\\data\\\nngram 1=3\nngram 2=1\n\n\\1-grams:\n-1\t<unk>\n-99\t<s>\t-0.3\n-0.5\t</s>\n\n\\2-grams:\n-0.1\t<s> </s>\n\n\\end\\\n";
//! let model = Model::from_arpa_reader(arpa.as_bytes(), ModelType::Trie, &Config::default()).unwrap();
//! let (ret, _) = model.full_score(&model.begin_sentence_state(), model.end_sentence());
//! assert_eq!(ret.prob, -0.1);
//! ```

/// Error type shared by building, loading and writing.
pub mod error;

/// Build and load configuration.
pub mod config;

/// Low-level building blocks: bit packing, backing memory, probing hash tables.
pub mod util;

/// Vocabulary lookup from word strings to indices.
pub mod vocab;

/// Codebooks that shrink probabilities and backoffs to a few bits.
pub mod quantize;

/// Compression of the child pointers stored in the trie.
pub mod bhiksha;

/// Bit-packed sorted arrays forming the trie levels.
pub mod trie;

/// Storage backends behind a common lookup contract.
pub mod search;

/// Collection and compilation of n-grams before they are stored.
pub mod build;

/// ARPA text reader.
pub mod arpa;

/// On-disk layout of built models.
pub mod binary_format;

/// Loaded models and the ways to query them.
pub mod model;

/// File helpers (line reading, path handling, directory listing).
pub mod io;

pub use build::NgramCollector;
pub use config::{Config, LoadMethod, ModelType, WarningAction};
pub use error::{LmError, Result};
pub use model::{ChartState, FullScoreReturn, LanguageModel, Model, RuleScore, State, WordScore};
pub use vocab::{EnumerateVocab, WordIndex};
