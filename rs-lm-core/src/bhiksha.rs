//! Child-range pointers of middle trie records.
//!
//! Each middle record points at the first of its children in the next order;
//! the next record's pointer ends the range. Pointers only grow, which
//! [`ArrayBhiksha`] exploits: the high bits of a pointer are the same for long
//! runs of records, so they are moved into a small sorted table indexed by
//! record, and only the low bits stay inline.

use std::fmt::Debug;

use byteorder::{ByteOrder, LittleEndian};

use crate::binary_format::Parameters;
use crate::error::{LmError, Result};
use crate::trie::NodeRange;
use crate::util::bit_packing::{read_int57, required_bits, write_int57, BitsMask};

const ARRAY_BHIKSHA_VERSION: u8 = 0;

/// Encoding of the `next` field of middle records.
pub trait Bhiksha: Clone + Debug + Send + Sync {
	/// Bytes needed outside the records for an order with `max_offset`
	/// records pointing into an order of `max_next` records.
	fn size(max_offset: u64, max_next: u64, params: &Parameters) -> usize;

	fn new(offset: usize, max_offset: u64, max_next: u64, params: &Parameters) -> Self;

	/// Bits stored inside each record.
	fn inline_bits(&self) -> u8;

	/// Child range of record `index` whose inline pointer sits at `bit_off`.
	/// The following record starts `total_bits` later.
	fn read_next(&self, mem: &[u8], index: u64, bit_off: u64, total_bits: u64) -> NodeRange;

	/// Stores the pointer of record `index`. Records must be written in index order.
	fn write_next(&mut self, mem: &mut [u8], index: u64, bit_off: u64, value: u64);

	/// Completes the out-of-line part once every pointer has been written.
	///
	/// # Errors
	/// Returns a sizing error if fewer pointers than expected were written.
	fn finished_loading(&mut self, mem: &mut [u8]) -> Result<()>;
}

/// Plain inline pointers.
#[derive(Clone, Copy, Debug)]
pub struct DontBhiksha {
	next: BitsMask,
}

impl Bhiksha for DontBhiksha {
	fn size(_max_offset: u64, _max_next: u64, _params: &Parameters) -> usize {
		0
	}

	fn new(_offset: usize, _max_offset: u64, max_next: u64, _params: &Parameters) -> Self {
		Self { next: BitsMask::by_max(max_next) }
	}

	fn inline_bits(&self) -> u8 {
		self.next.bits
	}

	#[inline]
	fn read_next(&self, mem: &[u8], _index: u64, bit_off: u64, total_bits: u64) -> NodeRange {
		NodeRange {
			begin: read_int57(mem, bit_off, self.next),
			end: read_int57(mem, bit_off + total_bits, self.next),
		}
	}

	fn write_next(&mut self, mem: &mut [u8], _index: u64, bit_off: u64, value: u64) {
		write_int57(mem, bit_off, self.next.bits, value);
	}

	fn finished_loading(&mut self, _mem: &mut [u8]) -> Result<()> {
		Ok(())
	}
}

/// Pointers split into inline low bits and a table of high parts.
///
/// `table[t]` is the first record whose pointer has high part `t`, so the
/// high part of record `i` is the last `t` with `table[t] <= i`.
#[derive(Clone, Copy, Debug)]
pub struct ArrayBhiksha {
	offset: usize,
	next_inline: BitsMask,
	array_count: usize,
	pointer_bhiksha_bits: u8,
	write_to: usize,
}

impl ArrayBhiksha {
	/// Number of high bits moved out of line, chosen to minimize total size.
	fn chop_bits(max_offset: u64, max_next: u64, pointer_bhiksha_bits: u8) -> u8 {
		let required = required_bits(max_next);
		let mut best_chop = 0u8;
		let mut lowest_change = i64::MAX;
		for chop in 0..=required.min(pointer_bhiksha_bits) {
			let table_cost = ((max_next >> (required - chop)) as i64).saturating_mul(64);
			let change = table_cost.saturating_sub((max_offset as i64).saturating_mul(i64::from(chop)));
			if change < lowest_change {
				lowest_change = change;
				best_chop = chop;
			}
		}
		best_chop
	}

	fn inline_bits_for(max_offset: u64, max_next: u64, pointer_bhiksha_bits: u8) -> u8 {
		required_bits(max_next) - Self::chop_bits(max_offset, max_next, pointer_bhiksha_bits)
	}

	fn array_count(max_offset: u64, max_next: u64, pointer_bhiksha_bits: u8) -> usize {
		(max_next >> Self::inline_bits_for(max_offset, max_next, pointer_bhiksha_bits)) as usize + 1
	}

	#[inline]
	fn table(&self, mem: &[u8], t: usize) -> u64 {
		let at = self.offset + 8 + t * 8;
		LittleEndian::read_u64(&mem[at..at + 8])
	}

	/// Last `t` with `table[t] <= index`.
	#[inline]
	fn high_part(&self, mem: &[u8], index: u64) -> usize {
		let (mut lo, mut hi) = (0usize, self.array_count);
		while lo < hi {
			let mid = lo + (hi - lo) / 2;
			if self.table(mem, mid) <= index {
				lo = mid + 1;
			} else {
				hi = mid;
			}
		}
		lo - 1
	}
}

impl Bhiksha for ArrayBhiksha {
	fn size(max_offset: u64, max_next: u64, params: &Parameters) -> usize {
		8 * (1 + Self::array_count(max_offset, max_next, params.pointer_bhiksha_bits)) + 7
	}

	fn new(offset: usize, max_offset: u64, max_next: u64, params: &Parameters) -> Self {
		let bits = params.pointer_bhiksha_bits;
		Self {
			offset,
			next_inline: BitsMask::by_bits(Self::inline_bits_for(max_offset, max_next, bits)),
			array_count: Self::array_count(max_offset, max_next, bits),
			pointer_bhiksha_bits: bits,
			// table[0] is always 0.
			write_to: 1,
		}
	}

	fn inline_bits(&self) -> u8 {
		self.next_inline.bits
	}

	#[inline]
	fn read_next(&self, mem: &[u8], index: u64, bit_off: u64, total_bits: u64) -> NodeRange {
		let begin_high = self.high_part(mem, index);
		let mut end_high = begin_high + 1;
		while end_high < self.array_count && self.table(mem, end_high) <= index + 1 {
			end_high += 1;
		}
		end_high -= 1;
		let shift = self.next_inline.bits;
		NodeRange {
			begin: ((begin_high as u64) << shift) | read_int57(mem, bit_off, self.next_inline),
			end: ((end_high as u64) << shift) | read_int57(mem, bit_off + total_bits, self.next_inline),
		}
	}

	fn write_next(&mut self, mem: &mut [u8], index: u64, bit_off: u64, value: u64) {
		let high = (value >> self.next_inline.bits) as usize;
		while high >= self.write_to {
			let at = self.offset + 8 + self.write_to * 8;
			LittleEndian::write_u64(&mut mem[at..at + 8], index);
			self.write_to += 1;
		}
		write_int57(mem, bit_off, self.next_inline.bits, value & self.next_inline.mask);
	}

	fn finished_loading(&mut self, mem: &mut [u8]) -> Result<()> {
		if self.write_to != self.array_count {
			return Err(LmError::Sizing(format!(
				"pointer table has {} of {} expected entries",
				self.write_to, self.array_count
			)));
		}
		mem[self.offset] = ARRAY_BHIKSHA_VERSION;
		mem[self.offset + 1] = self.pointer_bhiksha_bits;
		Ok(())
	}
}
