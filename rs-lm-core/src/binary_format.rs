//! On-disk layout of a built model.
//!
//! ```text
//! magic (12 bytes) | version: u32 | header length: u32 | postcard(Parameters)
//! [ strings length: u64 | word\0 word\0 ... ]      (when has_vocab_strings)
//! zero padding to a multiple of 8
//! data region
//! ```
//!
//! All integers are little-endian. The data region is a byte-for-byte copy of
//! the buffer the model was built in; its layout is entirely determined by the
//! [`Parameters`], so loading never parses it.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};

use crate::config::{Config, ModelType};
use crate::error::{LmError, Result};
use crate::model::MAX_ORDER;
use crate::vocab::WordIndex;

pub const MAGIC: &[u8; 12] = b"rs-lm\0bin\0\0\0";
pub const FORMAT_VERSION: u32 = 1;

/// Everything needed to lay out a model's data region.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Parameters {
	pub model_type: ModelType,
	/// Number of stored n-grams per order; `counts[0]` is the vocabulary size.
	pub counts: Vec<u64>,
	pub prob_bits: u8,
	pub backoff_bits: u8,
	pub pointer_bhiksha_bits: u8,
	pub probing_multiplier: f32,
	pub has_vocab_strings: bool,
}

impl Parameters {
	pub(crate) fn new(model_type: ModelType, counts: Vec<u64>, config: &Config) -> Self {
		Self {
			model_type,
			counts,
			prob_bits: config.prob_bits,
			backoff_bits: config.backoff_bits,
			pointer_bhiksha_bits: config.pointer_bhiksha_bits,
			probing_multiplier: config.probing_multiplier,
			has_vocab_strings: config.include_vocab,
		}
	}

	pub fn order(&self) -> usize {
		self.counts.len()
	}

	/// One past the largest word index.
	pub fn vocab_bound(&self) -> WordIndex {
		self.counts[0] as WordIndex
	}

	/// Checks parameters decoded from a file before they size any table.
	///
	/// # Errors
	/// Returns a binary-format error for an unsupported order, an empty or
	/// oversized vocabulary, or bit widths the model type cannot use.
	pub fn validate(&self) -> Result<()> {
		let order = self.order();
		if !(2..=MAX_ORDER).contains(&order) {
			return Err(LmError::BinaryFormat(format!("order {order} is outside 2..={MAX_ORDER}")));
		}
		if self.counts[0] == 0 || self.counts[0] > u64::from(WordIndex::MAX) {
			return Err(LmError::BinaryFormat(format!("vocabulary of {} words", self.counts[0])));
		}
		if self.model_type.is_trie() {
			if self.pointer_bhiksha_bits > 57 {
				return Err(LmError::BinaryFormat(format!(
					"pointer_bhiksha_bits {} exceeds 57",
					self.pointer_bhiksha_bits
				)));
			}
		} else if !(self.probing_multiplier > 1.0) {
			return Err(LmError::BinaryFormat(format!(
				"probing multiplier {} is not above 1.0",
				self.probing_multiplier
			)));
		}
		if self.model_type.is_quantized() {
			if !(1..=25).contains(&self.prob_bits) {
				return Err(LmError::BinaryFormat(format!("prob_bits {} is outside 1..=25", self.prob_bits)));
			}
			if !(2..=25).contains(&self.backoff_bits) {
				return Err(LmError::BinaryFormat(format!("backoff_bits {} is outside 2..=25", self.backoff_bits)));
			}
		}
		Ok(())
	}
}

/// Header of a binary file, with the offset of its data region.
#[derive(Debug)]
pub(crate) struct Header {
	pub params: Parameters,
	pub words: Option<Vec<String>>,
	pub data_offset: usize,
}

fn padding(position: usize) -> usize {
	(8 - position % 8) % 8
}

/// Whether the file at `path` starts with the binary magic.
///
/// # Errors
/// Returns an error if the file cannot be opened.
pub fn is_binary<P: AsRef<Path>>(path: P) -> Result<bool> {
	let mut file = File::open(path)?;
	let mut magic = [0u8; 12];
	match file.read_exact(&mut magic) {
		Ok(()) => Ok(&magic == MAGIC),
		Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
		Err(e) => Err(e.into()),
	}
}

/// Writes a complete binary file.
///
/// # Errors
/// Returns an error on I/O or header encoding failure.
pub(crate) fn write<W: Write>(out: &mut W, params: &Parameters, words: Option<&[String]>, data: &[u8]) -> Result<()> {
	let encoded = postcard::to_stdvec(params)?;
	out.write_all(MAGIC)?;
	out.write_u32::<LittleEndian>(FORMAT_VERSION)?;
	out.write_u32::<LittleEndian>(encoded.len() as u32)?;
	out.write_all(&encoded)?;
	let mut position = MAGIC.len() + 8 + encoded.len();

	if params.has_vocab_strings {
		let words = words.ok_or_else(|| LmError::BinaryFormat("vocabulary strings were not kept".to_owned()))?;
		let length: usize = words.iter().map(|w| w.len() + 1).sum();
		out.write_u64::<LittleEndian>(length as u64)?;
		for word in words {
			out.write_all(word.as_bytes())?;
			out.write_u8(0)?;
		}
		position += 8 + length;
	}

	out.write_all(&[0u8; 8][..padding(position)])?;
	out.write_all(data)?;
	out.flush()?;
	Ok(())
}

/// Reads and checks the header, leaving the file positioned anywhere.
///
/// # Errors
/// Returns a binary-format error for a bad magic, version or vocabulary block.
pub(crate) fn read_header(file: &mut File) -> Result<Header> {
	let file_len = file.metadata()?.len();
	file.seek(SeekFrom::Start(0))?;
	let mut reader = BufReader::new(file);

	let mut magic = [0u8; 12];
	reader.read_exact(&mut magic)?;
	if &magic != MAGIC {
		return Err(LmError::BinaryFormat("missing magic bytes".to_owned()));
	}
	let version = reader.read_u32::<LittleEndian>()?;
	if version != FORMAT_VERSION {
		return Err(LmError::BinaryFormat(format!(
			"format version {version}, this build reads version {FORMAT_VERSION}"
		)));
	}
	let length = reader.read_u32::<LittleEndian>()? as usize;
	let mut encoded = vec![0u8; length];
	reader.read_exact(&mut encoded)?;
	let params: Parameters = postcard::from_bytes(&encoded)?;
	params.validate()?;
	// Every record takes at least one bit of the file.
	if let Some(count) = params.counts.iter().find(|&&count| count > file_len.saturating_mul(8)) {
		return Err(LmError::BinaryFormat(format!("{count} records cannot fit in {file_len} bytes")));
	}
	let mut position = MAGIC.len() + 8 + length;

	let words = if params.has_vocab_strings {
		let length = reader.read_u64::<LittleEndian>()? as usize;
		let mut bytes = vec![0u8; length];
		reader.read_exact(&mut bytes)?;
		position += 8 + length;
		let words = parse_words(&bytes)?;
		if words.len() as u64 != params.counts[0] {
			return Err(LmError::BinaryFormat(format!(
				"{} vocabulary strings for {} words",
				words.len(),
				params.counts[0]
			)));
		}
		Some(words)
	} else {
		None
	};

	Ok(Header { params, words, data_offset: position + padding(position) })
}

fn parse_words(bytes: &[u8]) -> Result<Vec<String>> {
	let Some(body) = bytes.strip_suffix(b"\0") else {
		return if bytes.is_empty() {
			Ok(Vec::new())
		} else {
			Err(LmError::BinaryFormat("vocabulary block is not null-terminated".to_owned()))
		};
	};
	body.split(|&b| b == 0)
		.map(|word| {
			String::from_utf8(word.to_vec())
				.map_err(|_| LmError::BinaryFormat("vocabulary word is not UTF-8".to_owned()))
		})
		.collect()
}
