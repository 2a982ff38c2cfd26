//! Reader for the ARPA text format.
//!
//! ```text
//! \data\
//! ngram 1=3
//! ngram 2=1
//!
//! \1-grams:
//! -1.0	<unk>
//! -99	<s>	-0.5
//! -1.2	</s>
//!
//! \2-grams:
//! -0.3	<s> </s>
//!
//! \end\
//! ```
//!
//! Fields are separated by any whitespace. The backoff column is optional
//! below the highest order and forbidden at it. Every word of a longer
//! n-gram must have been declared as a unigram, except `<unk>`.

use std::io::BufRead;

use log::{debug, info};

use crate::build::NgramCollector;
use crate::error::{LmError, Result};

/// Line source that counts lines and can hand one back.
struct Lines<R> {
	inner: std::io::Lines<R>,
	number: u64,
	pending: Option<String>,
}

impl<R: BufRead> Lines<R> {
	fn new(reader: R) -> Self {
		Self { inner: reader.lines(), number: 0, pending: None }
	}

	fn next_line(&mut self) -> Result<Option<String>> {
		if let Some(line) = self.pending.take() {
			return Ok(Some(line));
		}
		match self.inner.next() {
			Some(line) => {
				self.number += 1;
				Ok(Some(line?))
			}
			None => Ok(None),
		}
	}

	/// Next non-blank line, trimmed.
	fn expect_content(&mut self, what: &str) -> Result<String> {
		loop {
			match self.next_line()? {
				Some(line) if line.trim().is_empty() => continue,
				Some(line) => return Ok(line.trim().to_owned()),
				None => return Err(LmError::format(self.number, format!("end of file while looking for {what}"))),
			}
		}
	}

	fn push_back(&mut self, line: String) {
		self.pending = Some(line);
	}
}

/// Reads a complete ARPA file.
///
/// # Errors
/// Returns a format error with the offending line number for malformed
/// input, a count mismatch when a section holds a different number of
/// n-grams than announced, and an unsupported-order error for models
/// outside `2..=MAX_ORDER`.
pub fn read_arpa<R: BufRead>(reader: R) -> Result<NgramCollector> {
	let mut lines = Lines::new(reader);
	loop {
		match lines.next_line()? {
			Some(line) if line.trim() == "\\data\\" => break,
			Some(_) => continue,
			None => return Err(LmError::format(lines.number, "missing \\data\\ header")),
		}
	}

	let counts = read_counts(&mut lines)?;
	info!("Reading ARPA model of order {} with counts {:?}", counts.len(), counts);
	let mut collector = NgramCollector::new(counts.len())?;
	collector.reserve(&counts);

	for (order, &expected) in (1..).zip(&counts) {
		let header = format!("\\{order}-grams:");
		let line = lines.expect_content(&header)?;
		if line != header {
			return Err(LmError::format(lines.number, format!("expected {header}, found \"{line}\"")));
		}

		let mut found = 0u64;
		while let Some(line) = lines.next_line()? {
			let entry = line.trim();
			if entry.is_empty() {
				break;
			}
			if entry.starts_with('\\') {
				lines.push_back(line);
				break;
			}
			read_entry(&mut collector, order, entry, lines.number)?;
			found += 1;
		}
		if found != expected {
			return Err(LmError::CountMismatch { order, expected, found });
		}
		debug!("Read {found} {order}-grams");
	}

	let end = lines.expect_content("\\end\\")?;
	if end != "\\end\\" {
		return Err(LmError::format(lines.number, format!("expected \\end\\, found \"{end}\"")));
	}
	Ok(collector)
}

fn read_counts<R: BufRead>(lines: &mut Lines<R>) -> Result<Vec<u64>> {
	let mut counts = Vec::new();
	loop {
		let line = match lines.next_line()? {
			Some(line) => line,
			None if !counts.is_empty() => break,
			None => return Err(LmError::format(lines.number, "no n-gram counts after \\data\\")),
		};
		let line = line.trim();
		if line.is_empty() {
			if counts.is_empty() {
				continue;
			}
			break;
		}
		if line.starts_with('\\') {
			lines.push_back(line.to_owned());
			break;
		}
		let (order, count) = line
			.strip_prefix("ngram")
			.and_then(|rest| rest.split_once('='))
			.ok_or_else(|| LmError::format(lines.number, format!("expected \"ngram N=count\", found \"{line}\"")))?;
		let order: usize = order
			.trim()
			.parse()
			.map_err(|_| LmError::format(lines.number, format!("bad order \"{}\"", order.trim())))?;
		let count: u64 = count
			.trim()
			.parse()
			.map_err(|_| LmError::format(lines.number, format!("bad count \"{}\"", count.trim())))?;
		if order != counts.len() + 1 {
			return Err(LmError::format(lines.number, format!("count for order {order} out of sequence")));
		}
		counts.push(count);
	}
	Ok(counts)
}

fn parse_weight(field: &str, line: u64) -> Result<f32> {
	field.parse().map_err(|_| LmError::format(line, format!("\"{field}\" is not a number")))
}

fn read_entry(collector: &mut NgramCollector, order: usize, entry: &str, line: u64) -> Result<()> {
	let mut fields = entry.split_whitespace();
	let prob = parse_weight(fields.next().unwrap_or_default(), line)?;
	let words: Vec<&str> = fields.by_ref().take(order).collect();
	if words.len() != order {
		return Err(LmError::format(line, format!("expected {order} words after the probability")));
	}
	let backoff = match fields.next() {
		None => None,
		Some(_) if order == collector.order() => {
			return Err(LmError::format(line, "backoff given for a highest-order n-gram"));
		}
		Some(field) => Some(parse_weight(field, line)?),
	};
	if let Some(extra) = fields.next() {
		return Err(LmError::format(line, format!("unexpected field \"{extra}\"")));
	}

	if order == 1 {
		return collector.add_ngram(&words, prob, backoff);
	}
	let ids = words
		.iter()
		.map(|word| {
			collector
				.declared(word)
				.ok_or_else(|| LmError::format(line, format!("\"{word}\" was not declared as a unigram")))
		})
		.collect::<Result<Vec<_>>>()?;
	collector.add_ids(ids, prob, backoff);
	Ok(())
}
