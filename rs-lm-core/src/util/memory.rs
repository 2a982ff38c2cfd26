//! The flat buffer a model lives in.
//!
//! Every structure of a loaded model addresses this buffer by offset from the
//! start of its data region, never by pointer. A freshly built model owns a
//! zeroed `Vec<u8>`; a reloaded one maps the file read-only (or reads it in),
//! with the data region starting after the header. Because only offsets are
//! stored, the base may differ between build and reload.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

use memmap2::Mmap;

use crate::config::LoadMethod;
use crate::error::{LmError, Result};

#[derive(Debug)]
enum Memory {
	Owned(Vec<u8>),
	Mapped(Mmap),
}

/// Backing storage with the offset at which the data region starts.
#[derive(Debug)]
pub struct Backing {
	memory: Memory,
	data_offset: usize,
}

impl Backing {
	/// Allocates a zeroed data region of `len` bytes.
	pub fn zeroed(len: usize) -> Self {
		Self { memory: Memory::Owned(vec![0u8; len]), data_offset: 0 }
	}

	/// Brings the whole file into memory; the data region starts at `data_offset`.
	///
	/// # Errors
	/// Returns an error if the file cannot be read or mapped, or is shorter
	/// than `data_offset + data_len`.
	pub fn from_file(file: &mut File, data_offset: usize, data_len: usize, method: LoadMethod) -> Result<Self> {
		let memory = match method {
			LoadMethod::Mmap => {
				// SAFETY: the map is read-only and models are never modified in place
				// after they are written.
				let map = unsafe { Mmap::map(&*file)? };
				Memory::Mapped(map)
			}
			LoadMethod::Read => {
				let mut bytes = Vec::new();
				file.seek(SeekFrom::Start(0))?;
				file.read_to_end(&mut bytes)?;
				Memory::Owned(bytes)
			}
		};
		let backing = Self { memory, data_offset };
		if backing.whole().len() < data_offset + data_len {
			return Err(LmError::BinaryFormat(format!(
				"file holds {} bytes but the header describes {}",
				backing.whole().len(),
				data_offset + data_len
			)));
		}
		Ok(backing)
	}

	fn whole(&self) -> &[u8] {
		match &self.memory {
			Memory::Owned(bytes) => bytes.as_slice(),
			Memory::Mapped(map) => &map[..],
		}
	}

	/// The data region.
	#[inline]
	pub fn data(&self) -> &[u8] {
		&self.whole()[self.data_offset..]
	}

	/// The data region, writable only while the model is still being built.
	pub fn data_mut(&mut self) -> Option<&mut [u8]> {
		match &mut self.memory {
			Memory::Owned(bytes) => Some(&mut bytes[self.data_offset..]),
			Memory::Mapped(_) => None,
		}
	}

	pub fn is_mapped(&self) -> bool {
		matches!(self.memory, Memory::Mapped(_))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;

	#[test]
	fn zeroed_is_writable() {
		let mut backing = Backing::zeroed(32);
		assert!(backing.data().iter().all(|&b| b == 0));
		backing.data_mut().unwrap()[3] = 9;
		assert_eq!(backing.data()[3], 9);
		assert!(!backing.is_mapped());
	}

	#[test]
	fn file_backing_skips_header() {
		let path = std::env::temp_dir().join(format!("rs-lm-memory-{}.bin", std::process::id()));
		{
			let mut file = File::create(&path).unwrap();
			file.write_all(&[1, 2, 3, 4, 5, 6]).unwrap();
		}
		for method in [LoadMethod::Mmap, LoadMethod::Read] {
			let mut file = File::open(&path).unwrap();
			let mut backing = Backing::from_file(&mut file, 2, 4, method).unwrap();
			assert_eq!(backing.data(), &[3, 4, 5, 6]);
			assert_eq!(backing.data_mut().is_some(), method == LoadMethod::Read);
		}
		let mut file = File::open(&path).unwrap();
		assert!(Backing::from_file(&mut file, 2, 10, LoadMethod::Read).is_err());
		std::fs::remove_file(&path).unwrap();
	}
}
