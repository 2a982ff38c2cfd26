//! Low-level building blocks shared by the search backends.

/// Bit-field reads and writes on byte buffers, plus the sign-bit flag helpers.
pub mod bit_packing;

/// Owned or memory-mapped storage for a model's data region.
pub mod memory;

/// Linear-probing hash tables over fixed-size records.
pub mod probing_hash_table;
