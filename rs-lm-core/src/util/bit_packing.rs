//! Bit-level packing of integers and floats inside a flat byte buffer.
//!
//! Fields are addressed by an absolute bit offset from the start of the slice.
//! A field is read by loading the little-endian word that starts at byte
//! `bit_off / 8` and shifting right by `bit_off % 8`. The whole word must be
//! inside the slice, so every packed array reserves 8 bytes of padding after
//! its last field.
//!
//! Writes OR the value into place: the target bits must be zero before the
//! first write (freshly allocated memory is zeroed).
//!
//! This module is also the only place that knows about the two sign-bit
//! tricks used on stored weights:
//! - a backoff of exactly zero is `-0.0` when nothing extends the n-gram to
//!   the right and `+0.0` when something does;
//! - the probing backend keeps the "independent of left context" flag in the
//!   sign bit of the stored probability.

use byteorder::{ByteOrder, LittleEndian};

const SIGN_BIT: u32 = 0x8000_0000;

/// Backoff of an n-gram that is not the context of any longer n-gram.
pub const NO_EXTENSION_BACKOFF: f32 = -0.0;

/// Zero backoff of an n-gram that is the context of a longer n-gram.
pub const EXTENSION_BACKOFF: f32 = 0.0;

/// A field width together with its mask.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BitsMask {
	pub bits: u8,
	pub mask: u64,
}

impl BitsMask {
	pub fn by_bits(bits: u8) -> Self {
		let mask = if bits >= 64 { u64::MAX } else { (1u64 << bits) - 1 };
		Self { bits, mask }
	}

	/// Smallest field able to hold every value in `0..=max_value`.
	pub fn by_max(max_value: u64) -> Self {
		Self::by_bits(required_bits(max_value))
	}
}

/// Minimum number of bits needed to represent `0..=max_value`.
///
/// Zero needs zero bits.
#[inline]
pub fn required_bits(max_value: u64) -> u8 {
	(64 - max_value.leading_zeros()) as u8
}

/// Reads an unsigned field of up to 57 bits.
#[inline]
pub fn read_int57(mem: &[u8], bit_off: u64, mask: BitsMask) -> u64 {
	debug_assert!(mask.bits <= 57);
	let byte = (bit_off >> 3) as usize;
	(LittleEndian::read_u64(&mem[byte..byte + 8]) >> (bit_off & 7)) & mask.mask
}

/// Writes an unsigned field of up to 57 bits into zeroed memory.
#[inline]
pub fn write_int57(mem: &mut [u8], bit_off: u64, bits: u8, value: u64) {
	debug_assert!(bits <= 57);
	debug_assert!(value >> bits == 0, "{value} does not fit in {bits} bits");
	let byte = (bit_off >> 3) as usize;
	let word = &mut mem[byte..byte + 8];
	let current = LittleEndian::read_u64(word);
	LittleEndian::write_u64(word, current | (value << (bit_off & 7)));
}

/// Reads an unsigned field of up to 25 bits using a 32-bit load.
#[inline]
pub fn read_int25(mem: &[u8], bit_off: u64, mask: BitsMask) -> u32 {
	debug_assert!(mask.bits <= 25);
	let byte = (bit_off >> 3) as usize;
	(LittleEndian::read_u32(&mem[byte..byte + 4]) >> (bit_off & 7)) & mask.mask as u32
}

/// Writes an unsigned field of up to 25 bits into zeroed memory.
#[inline]
pub fn write_int25(mem: &mut [u8], bit_off: u64, bits: u8, value: u32) {
	debug_assert!(bits <= 25);
	debug_assert!(value >> bits == 0, "{value} does not fit in {bits} bits");
	let byte = (bit_off >> 3) as usize;
	let word = &mut mem[byte..byte + 4];
	let current = LittleEndian::read_u32(word);
	LittleEndian::write_u32(word, current | (value << (bit_off & 7)));
}

#[inline]
pub fn read_float32(mem: &[u8], bit_off: u64) -> f32 {
	f32::from_bits(read_int57(mem, bit_off, BitsMask::by_bits(32)) as u32)
}

#[inline]
pub fn write_float32(mem: &mut [u8], bit_off: u64, value: f32) {
	write_int57(mem, bit_off, 32, u64::from(value.to_bits()));
}

/// Reads a 31-bit magnitude and returns it as a non-positive float.
#[inline]
pub fn read_non_positive_float31(mem: &[u8], bit_off: u64) -> f32 {
	f32::from_bits(read_int57(mem, bit_off, BitsMask::by_bits(31)) as u32 | SIGN_BIT)
}

/// Stores the magnitude of a non-positive float in 31 bits.
#[inline]
pub fn write_non_positive_float31(mem: &mut [u8], bit_off: u64, value: f32) {
	write_int57(mem, bit_off, 31, u64::from(value.to_bits() & !SIGN_BIT));
}

/// Whether a backoff marks its n-gram as the context of a longer one.
#[inline]
pub fn has_extension(backoff: f32) -> bool {
	backoff.to_bits() != NO_EXTENSION_BACKOFF.to_bits()
}

/// Marks a backoff as having an extension. Non-zero backoffs already do.
#[inline]
pub fn set_extension(backoff: &mut f32) {
	if backoff.to_bits() == NO_EXTENSION_BACKOFF.to_bits() {
		*backoff = EXTENSION_BACKOFF;
	}
}

/// Maps any zero backoff read from a source file to the no-extension zero.
#[inline]
pub fn plain_backoff(backoff: f32) -> f32 {
	if backoff == 0.0 { NO_EXTENSION_BACKOFF } else { backoff }
}

#[inline]
pub fn with_sign_bit(value: f32) -> f32 {
	f32::from_bits(value.to_bits() | SIGN_BIT)
}

#[inline]
pub fn without_sign_bit(value: f32) -> f32 {
	f32::from_bits(value.to_bits() & !SIGN_BIT)
}

#[inline]
pub fn sign_bit_set(value: f32) -> bool {
	value.to_bits() & SIGN_BIT != 0
}

#[cfg(test)]
mod tests {
	use super::*;
	use rand::rngs::StdRng;
	use rand::{Rng, SeedableRng};

	#[test]
	fn required_bits_matches_definition() {
		assert_eq!(required_bits(0), 0);
		assert_eq!(required_bits(1), 1);
		assert_eq!(required_bits(2), 2);
		assert_eq!(required_bits(3), 2);
		assert_eq!(required_bits(4), 3);
		assert_eq!(required_bits(255), 8);
		assert_eq!(required_bits(256), 9);
		assert_eq!(required_bits(u64::MAX), 64);
		assert_eq!(BitsMask::by_max(5), BitsMask { bits: 3, mask: 7 });
	}

	#[test]
	fn int57_every_width_and_alignment() {
		let mut rng = StdRng::seed_from_u64(57);
		for bits in 1..=57u8 {
			let mask = BitsMask::by_bits(bits);
			for offset in 0..8u64 {
				let mut mem = vec![0u8; 16];
				let value = rng.random::<u64>() & mask.mask;
				write_int57(&mut mem, offset, bits, value);
				assert_eq!(read_int57(&mem, offset, mask), value, "bits={bits} offset={offset}");

				// Extremes of the range.
				let mut mem = vec![0u8; 16];
				write_int57(&mut mem, offset, bits, mask.mask);
				assert_eq!(read_int57(&mem, offset, mask), mask.mask);
			}
		}
	}

	#[test]
	fn adjacent_fields_do_not_bleed() {
		let mut rng = StdRng::seed_from_u64(7);
		for bits in 1..=57u8 {
			let mask = BitsMask::by_bits(bits);
			let count = 40u64;
			let mut mem = vec![0u8; (count * u64::from(bits)) as usize / 8 + 16];
			let start = rng.random_range(0..8u64);
			let values: Vec<u64> = (0..count).map(|_| rng.random::<u64>() & mask.mask).collect();
			for (i, &v) in values.iter().enumerate() {
				write_int57(&mut mem, start + i as u64 * u64::from(bits), bits, v);
			}
			for (i, &v) in values.iter().enumerate() {
				assert_eq!(read_int57(&mem, start + i as u64 * u64::from(bits), mask), v);
			}
		}
	}

	#[test]
	fn int25_round_trip() {
		let mut rng = StdRng::seed_from_u64(25);
		for bits in 1..=25u8 {
			let mask = BitsMask::by_bits(bits);
			for offset in 0..8u64 {
				let mut mem = vec![0u8; 8];
				let value = rng.random::<u32>() & mask.mask as u32;
				write_int25(&mut mem, offset, bits, value);
				assert_eq!(read_int25(&mem, offset, mask), value);
				assert_eq!(read_int57(&mem, offset, mask), u64::from(value));
			}
		}
	}

	#[test]
	fn floats_round_trip() {
		for offset in 0..8u64 {
			let mut mem = vec![0u8; 16];
			write_float32(&mut mem, offset, -1.25);
			assert_eq!(read_float32(&mem, offset), -1.25);

			let mut mem = vec![0u8; 16];
			write_non_positive_float31(&mut mem, offset, -3.5);
			assert_eq!(read_non_positive_float31(&mem, offset), -3.5);
		}

		// Positive zero comes back negative: the sign is not stored.
		let mut mem = vec![0u8; 16];
		write_non_positive_float31(&mut mem, 3, 0.0);
		assert_eq!(read_non_positive_float31(&mem, 3).to_bits(), (-0.0f32).to_bits());
	}

	#[test]
	fn float32_keeps_zero_sign() {
		let mut mem = vec![0u8; 16];
		write_float32(&mut mem, 5, EXTENSION_BACKOFF);
		write_float32(&mut mem, 37, NO_EXTENSION_BACKOFF);
		assert!(has_extension(read_float32(&mem, 5)));
		assert!(!has_extension(read_float32(&mem, 37)));
	}

	#[test]
	fn extension_flag() {
		let mut backoff = NO_EXTENSION_BACKOFF;
		assert!(!has_extension(backoff));
		set_extension(&mut backoff);
		assert!(has_extension(backoff));
		assert_eq!(backoff, 0.0);

		let mut real = -0.3f32;
		assert!(has_extension(real));
		set_extension(&mut real);
		assert_eq!(real, -0.3);

		assert!(!has_extension(plain_backoff(0.0)));
		assert_eq!(plain_backoff(-0.5), -0.5);
	}

	#[test]
	fn sign_helpers() {
		assert!(sign_bit_set(-1.0));
		assert!(!sign_bit_set(without_sign_bit(-1.0)));
		assert_eq!(with_sign_bit(without_sign_bit(-2.5)), -2.5);
		assert!(sign_bit_set(with_sign_bit(0.0)));
	}
}
