//! Storage of probabilities and backoffs inside trie records.
//!
//! [`DontQuantize`] keeps the raw floats (a 31-bit magnitude for the
//! probability, the full 32 bits for the backoff so its zero sign survives).
//! [`SeparatelyQuantize`] replaces each value with a short code indexing a
//! table of representative values. Tables are trained per order, once, before
//! any record is written, and live in the model buffer so decoding works the
//! same on a freshly built and on a mapped model.

use std::fmt::Debug;
use std::sync::mpsc;
use std::thread;

use byteorder::{ByteOrder, LittleEndian};
use log::debug;

use crate::binary_format::Parameters;
use crate::error::{LmError, Result};
use crate::util::bit_packing::{
	has_extension, read_float32, read_int25, read_non_positive_float31, write_float32, write_int25,
	write_non_positive_float31, BitsMask, EXTENSION_BACKOFF, NO_EXTENSION_BACKOFF,
};

/// Values collected per order, handed to [`Quantizer::train`].
#[derive(Clone, Debug, Default)]
pub struct TrainingSet {
	/// `(probs, backoffs)` for orders 2..N-1.
	pub middle: Vec<(Vec<f32>, Vec<f32>)>,
	/// Probabilities of order N.
	pub longest: Vec<f32>,
}

/// How weights are encoded in trie records.
pub trait Quantizer: Clone + Debug + Send + Sync {
	const IS_QUANTIZED: bool;

	/// Bytes reserved in the data region for the quantizer's tables.
	fn size(params: &Parameters) -> usize;

	/// Describes a quantizer whose tables start at byte `offset`.
	fn new(offset: usize, params: &Parameters) -> Self;

	/// Bits used by the weights of a middle record.
	fn middle_bits(&self) -> u8;

	/// Bits used by the probability of a longest-order record.
	fn longest_bits(&self) -> u8;

	/// Probability and backoff of the middle record whose weights start at `bit_off`.
	fn read_middle(&self, mem: &[u8], order_minus_2: usize, bit_off: u64) -> (f32, f32);

	fn read_middle_prob(&self, mem: &[u8], order_minus_2: usize, bit_off: u64) -> f32 {
		self.read_middle(mem, order_minus_2, bit_off).0
	}

	fn write_middle(&self, mem: &mut [u8], order_minus_2: usize, bit_off: u64, prob: f32, backoff: f32);

	fn read_longest(&self, mem: &[u8], bit_off: u64) -> f32;

	fn write_longest(&self, mem: &mut [u8], bit_off: u64, prob: f32);

	/// Builds the tables from every value that will later be encoded.
	///
	/// # Errors
	/// Returns an error if a training worker fails.
	fn train(&self, mem: &mut [u8], values: TrainingSet) -> Result<()>;
}

/// Raw floats.
#[derive(Clone, Copy, Debug, Default)]
pub struct DontQuantize;

impl Quantizer for DontQuantize {
	const IS_QUANTIZED: bool = false;

	fn size(_params: &Parameters) -> usize {
		0
	}

	fn new(_offset: usize, _params: &Parameters) -> Self {
		DontQuantize
	}

	fn middle_bits(&self) -> u8 {
		63
	}

	fn longest_bits(&self) -> u8 {
		31
	}

	#[inline]
	fn read_middle(&self, mem: &[u8], _order_minus_2: usize, bit_off: u64) -> (f32, f32) {
		(read_non_positive_float31(mem, bit_off), read_float32(mem, bit_off + 31))
	}

	#[inline]
	fn read_middle_prob(&self, mem: &[u8], _order_minus_2: usize, bit_off: u64) -> f32 {
		read_non_positive_float31(mem, bit_off)
	}

	fn write_middle(&self, mem: &mut [u8], _order_minus_2: usize, bit_off: u64, prob: f32, backoff: f32) {
		write_non_positive_float31(mem, bit_off, prob);
		write_float32(mem, bit_off + 31, backoff);
	}

	#[inline]
	fn read_longest(&self, mem: &[u8], bit_off: u64) -> f32 {
		read_non_positive_float31(mem, bit_off)
	}

	fn write_longest(&self, mem: &mut [u8], bit_off: u64, prob: f32) {
		write_non_positive_float31(mem, bit_off, prob);
	}

	fn train(&self, _mem: &mut [u8], _values: TrainingSet) -> Result<()> {
		Ok(())
	}
}

const HEADER_SIZE: usize = 8;

/// Backoff code of `-0.0`.
const NO_EXTENSION_CODE: u32 = 0;
/// Backoff code of `+0.0`.
const EXTENSION_CODE: u32 = 1;
const RESERVED_BACKOFF_CODES: usize = 2;

/// One table of centres: `2^bits` little-endian floats starting at `offset`.
///
/// The first `reserved` slots hold fixed values and are never chosen by
/// [`encode`](Bins::encode). The rest are sorted ascending.
#[derive(Clone, Copy, Debug)]
struct Bins {
	offset: usize,
	bits: u8,
	reserved: usize,
}

impl Bins {
	fn len(&self) -> usize {
		1 << self.bits
	}

	fn byte_size(&self) -> usize {
		self.len() * 4
	}

	#[inline]
	fn centre(&self, mem: &[u8], code: usize) -> f32 {
		let at = self.offset + code * 4;
		LittleEndian::read_f32(&mem[at..at + 4])
	}

	#[inline]
	fn decode(&self, mem: &[u8], code: u32) -> f32 {
		self.centre(mem, code as usize)
	}

	/// Code of the centre closest to `value`; ties go to the larger centre.
	fn encode(&self, mem: &[u8], value: f32) -> u32 {
		let (mut lo, mut hi) = (self.reserved, self.len());
		while lo < hi {
			let mid = lo + (hi - lo) / 2;
			if self.centre(mem, mid) < value {
				lo = mid + 1;
			} else {
				hi = mid;
			}
		}
		let above = lo;
		if above == self.reserved {
			return above as u32;
		}
		if above == self.len() {
			return (above - 1) as u32;
		}
		let closer_below = value - self.centre(mem, above - 1) < self.centre(mem, above) - value;
		(above - usize::from(closer_below)) as u32
	}

	fn store(&self, mem: &mut [u8], centres: &[f32]) {
		debug_assert_eq!(centres.len(), self.len() - self.reserved);
		for (i, &centre) in centres.iter().enumerate() {
			let at = self.offset + (self.reserved + i) * 4;
			LittleEndian::write_f32(&mut mem[at..at + 4], centre);
		}
	}
}

/// Splits sorted `values` into `count` equal-frequency buckets and returns
/// each bucket's mean.
///
/// An empty bucket repeats the previous centre; a leading empty bucket is
/// negative infinity. The result is non-decreasing.
fn make_bins(mut values: Vec<f32>, count: usize) -> Vec<f32> {
	values.sort_by(f32::total_cmp);
	let mut centres = Vec::with_capacity(count);
	let mut start = 0usize;
	for i in 0..count {
		let finish = ((i as u64 + 1) * values.len() as u64 / count as u64) as usize;
		let centre = if finish == start {
			centres.last().copied().unwrap_or(f32::NEG_INFINITY)
		} else {
			let sum: f64 = values[start..finish].iter().map(|&v| f64::from(v)).sum();
			(sum / (finish - start) as f64) as f32
		};
		centres.push(centre);
		start = finish;
	}
	centres
}

/// Independent probability and backoff tables for every order.
#[derive(Clone, Debug)]
pub struct SeparatelyQuantize {
	offset: usize,
	prob_bits: u8,
	backoff_bits: u8,
	/// `(prob, backoff)` tables of orders 2..N-1.
	middle: Vec<(Bins, Bins)>,
	longest: Bins,
}

impl SeparatelyQuantize {
	fn prob_mask(&self) -> BitsMask {
		BitsMask::by_bits(self.prob_bits)
	}

	fn backoff_mask(&self) -> BitsMask {
		BitsMask::by_bits(self.backoff_bits)
	}

	fn encode_backoff(&self, mem: &[u8], bins: &Bins, backoff: f32) -> u32 {
		if backoff == 0.0 {
			if has_extension(backoff) { EXTENSION_CODE } else { NO_EXTENSION_CODE }
		} else {
			bins.encode(mem, backoff)
		}
	}

	fn write_header(&self, mem: &mut [u8]) {
		let header = &mut mem[self.offset..self.offset + HEADER_SIZE];
		header[0] = self.prob_bits;
		header[1] = self.backoff_bits;
	}
}

impl Quantizer for SeparatelyQuantize {
	const IS_QUANTIZED: bool = true;

	fn size(params: &Parameters) -> usize {
		let prob = (1usize << params.prob_bits) * 4;
		let backoff = (1usize << params.backoff_bits) * 4;
		HEADER_SIZE + params.order().saturating_sub(2) * (prob + backoff) + prob
	}

	fn new(offset: usize, params: &Parameters) -> Self {
		let mut cursor = offset + HEADER_SIZE;
		let mut next_bins = |bits: u8, reserved: usize| {
			let bins = Bins { offset: cursor, bits, reserved };
			cursor += bins.byte_size();
			bins
		};
		let middle = (2..params.order())
			.map(|_| {
				let prob = next_bins(params.prob_bits, 0);
				let backoff = next_bins(params.backoff_bits, RESERVED_BACKOFF_CODES);
				(prob, backoff)
			})
			.collect();
		let longest = next_bins(params.prob_bits, 0);
		Self { offset, prob_bits: params.prob_bits, backoff_bits: params.backoff_bits, middle, longest }
	}

	fn middle_bits(&self) -> u8 {
		self.prob_bits + self.backoff_bits
	}

	fn longest_bits(&self) -> u8 {
		self.prob_bits
	}

	#[inline]
	fn read_middle(&self, mem: &[u8], order_minus_2: usize, bit_off: u64) -> (f32, f32) {
		let (prob_bins, backoff_bins) = &self.middle[order_minus_2];
		let prob = read_int25(mem, bit_off, self.prob_mask());
		let backoff = read_int25(mem, bit_off + u64::from(self.prob_bits), self.backoff_mask());
		(prob_bins.decode(mem, prob), backoff_bins.decode(mem, backoff))
	}

	#[inline]
	fn read_middle_prob(&self, mem: &[u8], order_minus_2: usize, bit_off: u64) -> f32 {
		self.middle[order_minus_2].0.decode(mem, read_int25(mem, bit_off, self.prob_mask()))
	}

	fn write_middle(&self, mem: &mut [u8], order_minus_2: usize, bit_off: u64, prob: f32, backoff: f32) {
		let (prob_bins, backoff_bins) = &self.middle[order_minus_2];
		let prob_code = prob_bins.encode(mem, prob);
		let backoff_code = self.encode_backoff(mem, backoff_bins, backoff);
		write_int25(mem, bit_off, self.prob_bits, prob_code);
		write_int25(mem, bit_off + u64::from(self.prob_bits), self.backoff_bits, backoff_code);
	}

	#[inline]
	fn read_longest(&self, mem: &[u8], bit_off: u64) -> f32 {
		self.longest.decode(mem, read_int25(mem, bit_off, self.prob_mask()))
	}

	fn write_longest(&self, mem: &mut [u8], bit_off: u64, prob: f32) {
		let code = self.longest.encode(mem, prob);
		write_int25(mem, bit_off, self.prob_bits, code);
	}

	fn train(&self, mem: &mut [u8], values: TrainingSet) -> Result<()> {
		debug_assert_eq!(values.middle.len(), self.middle.len());
		self.write_header(mem);

		let mut jobs: Vec<(Bins, Vec<f32>)> = Vec::new();
		for ((prob_bins, backoff_bins), (probs, backoffs)) in self.middle.iter().zip(values.middle) {
			// Zero backoffs have reserved codes and do not shape the bins.
			let backoffs: Vec<f32> = backoffs.into_iter().filter(|&b| b != 0.0).collect();
			jobs.push((*prob_bins, probs));
			jobs.push((*backoff_bins, backoffs));

			let reserved = backoff_bins.offset;
			LittleEndian::write_f32(&mut mem[reserved..reserved + 4], NO_EXTENSION_BACKOFF);
			LittleEndian::write_f32(&mut mem[reserved + 4..reserved + 8], EXTENSION_BACKOFF);
		}
		jobs.push((self.longest, values.longest));

		let workers = num_cpus::get().max(1).min(jobs.len());
		let mut shares: Vec<Vec<(Bins, Vec<f32>)>> = (0..workers).map(|_| Vec::new()).collect();
		for (i, job) in jobs.into_iter().enumerate() {
			shares[i % workers].push(job);
		}
		let expected: usize = shares.iter().map(Vec::len).sum();
		debug!("Training {expected} quantization tables on {workers} threads");

		let (tx, rx) = mpsc::channel();
		let mut handles = Vec::with_capacity(workers);
		for share in shares {
			let tx = tx.clone();
			handles.push(thread::spawn(move || {
				for (bins, values) in share {
					let centres = make_bins(values, bins.len() - bins.reserved);
					if tx.send((bins, centres)).is_err() {
						return;
					}
				}
			}));
		}
		drop(tx);

		let mut received = 0usize;
		for (bins, centres) in rx.iter() {
			bins.store(mem, &centres);
			received += 1;
		}
		for handle in handles {
			handle.join().map_err(|_| LmError::Worker("quantizer training panicked".to_owned()))?;
		}
		if received != expected {
			return Err(LmError::Worker(format!("expected {expected} quantization tables, got {received}")));
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::ModelType;
	use rand::rngs::StdRng;
	use rand::{Rng, SeedableRng};

	fn params(order: usize, prob_bits: u8, backoff_bits: u8) -> Parameters {
		Parameters {
			model_type: ModelType::QuantTrie,
			counts: vec![10; order],
			prob_bits,
			backoff_bits,
			pointer_bhiksha_bits: 22,
			probing_multiplier: 1.5,
			has_vocab_strings: false,
		}
	}

	fn random_values(rng: &mut StdRng, count: usize) -> Vec<f32> {
		(0..count).map(|_| -rng.random_range(0.0f32..6.0)).collect()
	}

	fn trained(order: usize, prob_bits: u8, backoff_bits: u8, seed: u64) -> (SeparatelyQuantize, Vec<u8>) {
		let params = params(order, prob_bits, backoff_bits);
		let offset = 16;
		let quant = SeparatelyQuantize::new(offset, &params);
		let mut mem = vec![0u8; offset + SeparatelyQuantize::size(&params) + 64];
		let mut rng = StdRng::seed_from_u64(seed);
		let mut values = TrainingSet::default();
		for _ in 2..order {
			values.middle.push((random_values(&mut rng, 500), random_values(&mut rng, 500)));
		}
		values.longest = random_values(&mut rng, 500);
		quant.train(&mut mem, values).unwrap();
		(quant, mem)
	}

	#[test]
	fn make_bins_means_and_empty_buckets() {
		assert_eq!(make_bins(vec![-4.0, -1.0, -3.0, -2.0], 2), vec![-3.5, -1.5]);
		// Fewer values than buckets: leading buckets are empty.
		let centres = make_bins(vec![-2.0, -1.0], 4);
		assert_eq!(centres, vec![f32::NEG_INFINITY, -2.0, -2.0, -1.0]);
		assert!(make_bins(Vec::new(), 3).iter().all(|c| *c == f32::NEG_INFINITY));
	}

	#[test]
	fn sizes_follow_bit_widths() {
		let p = params(3, 8, 8);
		assert_eq!(SeparatelyQuantize::size(&p), 8 + (256 + 256) * 4 + 256 * 4);
		assert_eq!(SeparatelyQuantize::size(&params(2, 4, 4)), 8 + 16 * 4);
		assert_eq!(DontQuantize::size(&p), 0);
		let quant = SeparatelyQuantize::new(0, &params(3, 5, 7));
		assert_eq!(quant.middle_bits(), 12);
		assert_eq!(quant.longest_bits(), 5);
	}

	#[test]
	fn encoding_is_monotonic() {
		let (quant, mem) = trained(3, 6, 6, 11);
		let bins = quant.longest;
		let mut previous = 0u32;
		let mut value = -6.5f32;
		while value <= 0.5 {
			let code = bins.encode(&mem, value);
			assert!(code >= previous, "code dropped at {value}");
			previous = code;
			value += 0.01;
		}
	}

	#[test]
	fn decoding_picks_nearest_centre() {
		let (quant, mem) = trained(4, 5, 5, 3);
		let mut rng = StdRng::seed_from_u64(99);
		for order_minus_2 in 0..2 {
			let bins = quant.middle[order_minus_2].0;
			let centres: Vec<f32> = (0..bins.len()).map(|c| bins.centre(&mem, c)).collect();
			for _ in 0..200 {
				let value = -rng.random_range(0.0f32..6.0);
				let decoded = bins.decode(&mem, bins.encode(&mem, value));
				let best = centres.iter().map(|c| (c - value).abs()).fold(f32::INFINITY, f32::min);
				assert!(((decoded - value).abs() - best).abs() < 1e-6);
			}
		}
	}

	#[test]
	fn zero_backoffs_keep_their_sign() {
		let (quant, mut mem) = trained(3, 8, 8, 5);
		let base = (mem.len() as u64 - 32) * 8;
		quant.write_middle(&mut mem, 0, base, -1.0, EXTENSION_BACKOFF);
		quant.write_middle(&mut mem, 0, base + 16, -1.0, NO_EXTENSION_BACKOFF);
		quant.write_middle(&mut mem, 0, base + 32, -1.0, -0.7);
		let (_, extended) = quant.read_middle(&mem, 0, base);
		let (_, plain) = quant.read_middle(&mem, 0, base + 16);
		let (prob, real) = quant.read_middle(&mem, 0, base + 32);
		assert!(has_extension(extended) && extended == 0.0);
		assert!(!has_extension(plain));
		assert!((real + 0.7).abs() < 0.1);
		assert!((prob + 1.0).abs() < 0.1);
		assert_eq!(quant.read_middle_prob(&mem, 0, base + 32), prob);
	}

	#[test]
	fn header_records_widths() {
		let (quant, mem) = trained(2, 7, 3, 1);
		assert_eq!(&mem[16..18], &[7, 3]);
		let code_bits = quant.longest_bits();
		let mut mem = mem;
		let at = (mem.len() as u64 - 16) * 8 + 3;
		quant.write_longest(&mut mem, at, -2.0);
		assert!((quant.read_longest(&mem, at) + 2.0).abs() < 0.2);
		assert_eq!(code_bits, 7);
	}

	#[test]
	fn raw_weights_are_exact() {
		let mut mem = vec![0u8; 32];
		let quant = DontQuantize;
		quant.write_middle(&mut mem, 0, 5, -1.25, EXTENSION_BACKOFF);
		assert_eq!(quant.read_middle(&mem, 0, 5), (-1.25, 0.0));
		assert!(has_extension(quant.read_middle(&mem, 0, 5).1));
		quant.write_longest(&mut mem, 70, -0.5);
		assert_eq!(quant.read_longest(&mem, 70), -0.5);
	}
}
