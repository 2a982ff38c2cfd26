//! Open-addressing hash tables over fixed-size entries stored in a byte buffer.
//!
//! Keys are 64-bit hashes computed by the caller (context hashes for n-grams,
//! string hashes for the vocabulary), so the key is also the hash. Key `0`
//! marks an empty bucket and must never be inserted. Probing is linear and
//! wraps at the end of the table; there are no tombstones because nothing is
//! ever deleted.
//!
//! A [`ProbingHashTable`] only records where its buckets live; every access
//! takes the buffer explicitly. This lets a built model keep its tables inside
//! one flat region that can be written to disk and mapped back unchanged.

use std::fmt::Debug;
use std::marker::PhantomData;
use std::ops::Range;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{LmError, Result};

/// Key value of an empty bucket.
pub const INVALID_KEY: u64 = 0;

/// A fixed-size record stored in a probing table.
///
/// The key occupies the first 8 bytes of the record, little-endian.
pub trait ProbingEntry: Copy + Debug {
	const SIZE: usize;

	fn key(&self) -> u64;
	fn read(bytes: &[u8]) -> Self;
	fn write(&self, bytes: &mut [u8]);
}

#[inline]
fn read_key(slot: &[u8]) -> u64 {
	LittleEndian::read_u64(&slot[..8])
}

/// Maps hashes to buckets and steps through the probe sequence.
pub trait ModStrategy: Copy + Debug {
	/// Number of buckets actually allocated when `requested` are wanted.
	fn round_buckets(requested: usize) -> usize;
	fn new(buckets: usize) -> Self;
	fn ideal(&self, hash: u64) -> usize;
	fn next(&self, index: usize) -> usize;
	fn double(&mut self);
}

/// `hash % buckets`; any table size.
#[derive(Clone, Copy, Debug)]
pub struct DivMod {
	buckets: u64,
}

impl ModStrategy for DivMod {
	fn round_buckets(requested: usize) -> usize {
		requested
	}

	fn new(buckets: usize) -> Self {
		Self { buckets: buckets as u64 }
	}

	#[inline]
	fn ideal(&self, hash: u64) -> usize {
		(hash % self.buckets) as usize
	}

	#[inline]
	fn next(&self, index: usize) -> usize {
		let next = index + 1;
		if next as u64 == self.buckets { 0 } else { next }
	}

	fn double(&mut self) {
		self.buckets *= 2;
	}
}

/// `hash & mask`; table size is a power of two.
#[derive(Clone, Copy, Debug)]
pub struct Power2Mod {
	mask: u64,
}

impl ModStrategy for Power2Mod {
	fn round_buckets(requested: usize) -> usize {
		requested.next_power_of_two()
	}

	fn new(buckets: usize) -> Self {
		debug_assert!(buckets.is_power_of_two());
		Self { mask: buckets as u64 - 1 }
	}

	#[inline]
	fn ideal(&self, hash: u64) -> usize {
		(hash & self.mask) as usize
	}

	#[inline]
	fn next(&self, index: usize) -> usize {
		((index as u64 + 1) & self.mask) as usize
	}

	fn double(&mut self) {
		self.mask = (self.mask << 1) | 1;
	}
}

/// Location and shape of one fixed-capacity probing table.
///
/// # Invariants
/// - At least one bucket stays empty, so every probe sequence terminates.
/// - Every occupied bucket is reachable from its key's ideal bucket without
///   crossing an empty one.
#[derive(Clone, Copy, Debug)]
pub struct ProbingHashTable<E, M = DivMod> {
	offset: usize,
	buckets: usize,
	inserted: usize,
	mod_strategy: M,
	_entry: PhantomData<E>,
}

impl<E: ProbingEntry, M: ModStrategy> ProbingHashTable<E, M> {
	/// Bucket count for a table expected to hold `entries` records.
	pub fn buckets_for(entries: u64, multiplier: f32) -> usize {
		let scaled = (entries as f64 * f64::from(multiplier)).ceil() as usize;
		M::round_buckets(scaled.max(entries as usize + 1))
	}

	/// Bytes needed for a table expected to hold `entries` records.
	pub fn size(entries: u64, multiplier: f32) -> usize {
		Self::buckets_for(entries, multiplier) * E::SIZE
	}

	/// Describes a table starting at byte `offset` of the buffer.
	pub fn new(offset: usize, entries: u64, multiplier: f32) -> Self {
		let buckets = Self::buckets_for(entries, multiplier);
		Self { offset, buckets, inserted: 0, mod_strategy: M::new(buckets), _entry: PhantomData }
	}

	/// First byte after the table.
	pub fn end(&self) -> usize {
		self.offset + self.buckets * E::SIZE
	}

	pub fn buckets(&self) -> usize {
		self.buckets
	}

	/// Records inserted through this descriptor.
	pub fn inserted(&self) -> usize {
		self.inserted
	}

	#[inline]
	fn slot(&self, index: usize) -> Range<usize> {
		let start = self.offset + index * E::SIZE;
		start..start + E::SIZE
	}

	/// Inserts a record with a key not yet present.
	///
	/// # Errors
	/// - Sizing error if the table has no room left.
	/// - Build-order error if the key is already present.
	pub fn insert(&mut self, mem: &mut [u8], entry: E) -> Result<()> {
		debug_assert_ne!(entry.key(), INVALID_KEY);
		if self.inserted + 1 >= self.buckets {
			return Err(LmError::Sizing(format!(
				"probing hash table with {} buckets is full",
				self.buckets
			)));
		}
		let mut index = self.mod_strategy.ideal(entry.key());
		loop {
			let slot = self.slot(index);
			let key = read_key(&mem[slot.clone()]);
			if key == INVALID_KEY {
				entry.write(&mut mem[slot]);
				self.inserted += 1;
				return Ok(());
			}
			if key == entry.key() {
				return Err(LmError::BuildOrder(format!("key {key:#x} inserted twice")));
			}
			index = self.mod_strategy.next(index);
		}
	}

	/// Writes `entry` into the first empty bucket of its probe sequence.
	fn place(&self, mem: &mut [u8], entry: E) {
		let mut index = self.mod_strategy.ideal(entry.key());
		loop {
			let slot = self.slot(index);
			if read_key(&mem[slot.clone()]) == INVALID_KEY {
				entry.write(&mut mem[slot]);
				return;
			}
			index = self.mod_strategy.next(index);
		}
	}

	#[inline]
	pub fn find(&self, mem: &[u8], key: u64) -> Option<E> {
		let mut index = self.mod_strategy.ideal(key);
		loop {
			let slot = &mem[self.slot(index)];
			let found = read_key(slot);
			if found == INVALID_KEY {
				return None;
			}
			if found == key {
				return Some(E::read(slot));
			}
			index = self.mod_strategy.next(index);
		}
	}

	/// Like [`find`](Self::find) for keys whose presence is already established.
	///
	/// # Panics
	/// Panics if the key is absent.
	pub fn must_find(&self, mem: &[u8], key: u64) -> E {
		match self.find(mem, key) {
			Some(entry) => entry,
			None => panic!("key {key:#x} is not in the probing table"),
		}
	}

	/// Occupied records, in bucket order.
	pub fn iter<'a>(&'a self, mem: &'a [u8]) -> impl Iterator<Item = E> + 'a {
		(0..self.buckets)
			.map(move |index| &mem[self.slot(index)])
			.filter(|slot| read_key(slot) != INVALID_KEY)
			.map(E::read)
	}

	/// Verifies that no empty bucket sits between a key's ideal bucket and
	/// the bucket it was stored in.
	///
	/// # Errors
	/// Returns a description of the first violation.
	pub fn check_consistency(&self, mem: &[u8]) -> std::result::Result<(), String> {
		let mut empty = 0usize;
		for index in 0..self.buckets {
			let key = read_key(&mem[self.slot(index)]);
			if key == INVALID_KEY {
				empty += 1;
				continue;
			}
			let mut probe = self.mod_strategy.ideal(key);
			while probe != index {
				if read_key(&mem[self.slot(probe)]) == INVALID_KEY {
					return Err(format!(
						"key {key:#x} stored in bucket {index} but bucket {probe} on its probe path is empty"
					));
				}
				probe = self.mod_strategy.next(probe);
			}
		}
		if empty == 0 {
			return Err("table has no empty bucket".to_owned());
		}
		Ok(())
	}
}

/// A probing table that owns its memory and doubles when it gets too full.
///
/// Used at build time when the final number of records is not known yet.
#[derive(Debug)]
pub struct GrowableProbingHashTable<E: ProbingEntry> {
	mem: Vec<u8>,
	table: ProbingHashTable<E, Power2Mod>,
	multiplier: f32,
}

impl<E: ProbingEntry> GrowableProbingHashTable<E> {
	pub fn new(initial_entries: u64, multiplier: f32) -> Self {
		let table = ProbingHashTable::new(0, initial_entries, multiplier);
		Self { mem: vec![0u8; table.end()], table, multiplier }
	}

	pub fn len(&self) -> usize {
		self.table.inserted
	}

	pub fn is_empty(&self) -> bool {
		self.table.inserted == 0
	}

	pub fn buckets(&self) -> usize {
		self.table.buckets
	}

	/// Inserts a new record, doubling first if the load would exceed the multiplier.
	///
	/// # Errors
	/// Returns a build-order error if the key is already present.
	pub fn insert(&mut self, entry: E) -> Result<()> {
		if (self.table.inserted + 1) as f64 * f64::from(self.multiplier) >= self.table.buckets as f64 {
			self.double();
		}
		self.table.insert(&mut self.mem, entry)
	}

	pub fn find(&self, key: u64) -> Option<E> {
		self.table.find(&self.mem, key)
	}

	pub fn iter(&self) -> impl Iterator<Item = E> + '_ {
		self.table.iter(&self.mem)
	}

	pub fn check_consistency(&self) -> std::result::Result<(), String> {
		self.table.check_consistency(&self.mem)
	}

	fn clear(&mut self, index: usize) {
		let slot = self.table.slot(index);
		self.mem[slot].fill(0);
	}

	fn read(&self, index: usize) -> E {
		E::read(&self.mem[self.table.slot(index)])
	}

	/// Doubles the bucket count and relocates every record.
	///
	/// Records at the front of the old table may have wrapped around from its
	/// end. They are set aside first and reinserted last, once every record
	/// that belongs ahead of them has found its new place.
	fn double(&mut self) {
		let old_buckets = self.table.buckets;
		self.table.buckets *= 2;
		self.table.mod_strategy.double();
		self.mem.resize(self.table.buckets * E::SIZE, 0);

		let mut rolled_over = Vec::new();
		for index in 0..old_buckets {
			let entry = self.read(index);
			if entry.key() == INVALID_KEY {
				break;
			}
			rolled_over.push(entry);
			self.clear(index);
		}

		// Records can move backwards into a freshly opened gap, stay, move
		// into the new half or wrap around to a bucket not yet visited.
		for index in 0..old_buckets {
			let entry = self.read(index);
			if entry.key() != INVALID_KEY {
				self.clear(index);
				self.table.place(&mut self.mem, entry);
			}
		}

		for entry in rolled_over {
			self.table.place(&mut self.mem, entry);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rand::rngs::StdRng;
	use rand::{Rng, SeedableRng};
	use std::collections::HashMap;

	#[derive(Clone, Copy, Debug, PartialEq)]
	struct Pair {
		key: u64,
		value: u32,
	}

	impl ProbingEntry for Pair {
		const SIZE: usize = 12;

		fn key(&self) -> u64 {
			self.key
		}

		fn read(bytes: &[u8]) -> Self {
			Pair { key: LittleEndian::read_u64(&bytes[..8]), value: LittleEndian::read_u32(&bytes[8..12]) }
		}

		fn write(&self, bytes: &mut [u8]) {
			LittleEndian::write_u64(&mut bytes[..8], self.key);
			LittleEndian::write_u32(&mut bytes[8..12], self.value);
		}
	}

	fn random_pairs(count: usize, seed: u64) -> Vec<Pair> {
		let mut rng = StdRng::seed_from_u64(seed);
		let mut seen = HashMap::new();
		let mut pairs = Vec::new();
		while pairs.len() < count {
			let key = rng.random::<u64>() | 1;
			if seen.insert(key, ()).is_none() {
				pairs.push(Pair { key, value: pairs.len() as u32 });
			}
		}
		pairs
	}

	#[test]
	fn div_mod_table_finds_everything() {
		let pairs = random_pairs(1000, 1);
		let offset = 24;
		let mut table = ProbingHashTable::<Pair, DivMod>::new(offset, 1000, 1.5);
		let mut mem = vec![0u8; table.end()];
		for &pair in &pairs {
			table.insert(&mut mem, pair).unwrap();
		}
		assert_eq!(table.inserted(), 1000);
		for pair in &pairs {
			assert_eq!(table.find(&mem, pair.key), Some(*pair));
			assert_eq!(table.must_find(&mem, pair.key), *pair);
		}
		assert_eq!(table.find(&mem, 2), None);
		assert_eq!(table.find(&mem, INVALID_KEY), None);
		assert!(table.check_consistency(&mem).is_ok());
		assert_eq!(table.iter(&mem).count(), 1000);
		// Nothing was written before the table's offset.
		assert!(mem[..offset].iter().all(|&b| b == 0));
	}

	#[test]
	fn power2_table_is_power_of_two() {
		let table = ProbingHashTable::<Pair, Power2Mod>::new(0, 100, 1.5);
		assert_eq!(table.buckets(), 256);
		assert_eq!(ProbingHashTable::<Pair, DivMod>::buckets_for(100, 1.5), 150);
		assert_eq!(ProbingHashTable::<Pair, DivMod>::buckets_for(0, 1.5), 1);
	}

	#[test]
	fn collisions_wrap_around() {
		// Five buckets; keys all land on the last one.
		let mut table = ProbingHashTable::<Pair, DivMod>::new(0, 4, 1.25);
		assert_eq!(table.buckets(), 5);
		let mut mem = vec![0u8; table.end()];
		for (i, key) in [4u64, 9, 14, 19].into_iter().enumerate() {
			table.insert(&mut mem, Pair { key, value: i as u32 }).unwrap();
		}
		assert_eq!(table.find(&mem, 19).unwrap().value, 3);
		assert!(table.check_consistency(&mem).is_ok());
		assert_eq!(table.find(&mem, 24), None);
	}

	#[test]
	fn full_table_is_a_sizing_error() {
		let mut table = ProbingHashTable::<Pair, DivMod>::new(0, 2, 1.5);
		let mut mem = vec![0u8; table.end()];
		table.insert(&mut mem, Pair { key: 1, value: 0 }).unwrap();
		table.insert(&mut mem, Pair { key: 2, value: 1 }).unwrap();
		assert!(matches!(table.insert(&mut mem, Pair { key: 3, value: 2 }), Err(LmError::Sizing(_))));
	}

	#[test]
	fn duplicate_key_is_rejected() {
		let mut table = ProbingHashTable::<Pair, DivMod>::new(0, 4, 1.5);
		let mut mem = vec![0u8; table.end()];
		table.insert(&mut mem, Pair { key: 7, value: 0 }).unwrap();
		assert!(matches!(table.insert(&mut mem, Pair { key: 7, value: 1 }), Err(LmError::BuildOrder(_))));
	}

	#[test]
	fn consistency_scan_detects_a_hole() {
		let mut table = ProbingHashTable::<Pair, DivMod>::new(0, 4, 2.0);
		let mut mem = vec![0u8; table.end()];
		table.insert(&mut mem, Pair { key: 8, value: 0 }).unwrap();
		table.insert(&mut mem, Pair { key: 16, value: 1 }).unwrap();
		// Punch out the first record; the second now sits behind a hole.
		mem[..Pair::SIZE].fill(0);
		assert!(table.check_consistency(&mem).is_err());
	}

	#[test]
	fn growable_table_survives_doubling() {
		let pairs = random_pairs(5000, 2);
		let mut table = GrowableProbingHashTable::<Pair>::new(4, 1.5);
		let initial = table.buckets();
		for &pair in &pairs {
			table.insert(pair).unwrap();
		}
		assert!(table.buckets() > initial);
		assert_eq!(table.len(), 5000);
		for pair in &pairs {
			assert_eq!(table.find(pair.key), Some(*pair));
		}
		assert!(table.check_consistency().is_ok());
	}

	#[test]
	fn growable_table_with_wrapped_front_run() {
		// Keys crowding the end of the table force a run that wraps to the front.
		let mut table = GrowableProbingHashTable::<Pair>::new(6, 1.5);
		let buckets = table.buckets() as u64;
		let keys: Vec<u64> = (0..5).map(|i| buckets - 1 + i * buckets).collect();
		for (i, &key) in keys.iter().enumerate() {
			table.insert(Pair { key, value: i as u32 }).unwrap();
		}
		for i in 0..40u64 {
			table.insert(Pair { key: 1000 + i, value: 100 + i as u32 }).unwrap();
		}
		for (i, &key) in keys.iter().enumerate() {
			assert_eq!(table.find(key).unwrap().value, i as u32);
		}
		assert!(table.check_consistency().is_ok());
	}
}
