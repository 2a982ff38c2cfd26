use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::{fs, io};

/// Reads a text file and returns its non-blank lines, trimmed.
///
/// - Splits on `\n` / `\r\n`
pub fn read_lines<P: AsRef<Path>>(filename: P) -> io::Result<Vec<String>> {
	let mut lines = Vec::new();
	for line in BufReader::new(File::open(filename)?).lines() {
		let line = line?;
		let line = line.trim();
		if !line.is_empty() {
			lines.push(line.to_owned());
		}
	}
	Ok(lines)
}

/// Builds an output path based on an input path and a new extension.
///
/// Example:
/// `data/model.arpa` + `"bin"` → `data/model.bin`
pub fn build_output_path<P: AsRef<Path>>(input_path: P, output_extension: &str) -> io::Result<PathBuf> {
	let input_path = input_path.as_ref();

	let parent = input_path.parent().unwrap_or_else(|| Path::new("."));
	let file_stem = input_path
		.file_stem()
		.ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "Input path has no filename"))?;

	let mut output = PathBuf::from(parent);
	output.push(file_stem);
	output.set_extension(output_extension);

	Ok(output)
}

/// Extracts the base filename without extension.
///
/// Examples:
/// - `"./data/model.arpa"` → `"model"`
/// - `"model.bin"` → `"model"`
pub fn get_filename<P: AsRef<Path>>(input_path: P) -> io::Result<String> {
	let stem = input_path
		.as_ref()
		.file_stem()
		.ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "Path has no filename"))?;

	Ok(stem.to_string_lossy().to_string())
}

/// Lists all files with one of the given extensions in a directory.
///
/// Returns file names only (no paths), sorted.
pub fn list_files<P: AsRef<Path>>(dir: P, extensions: &[&str]) -> io::Result<Vec<String>> {
	let mut files = Vec::new();

	for entry in fs::read_dir(dir)? {
		let path = entry?.path();
		if !path.is_file() {
			continue;
		}
		let matches = path
			.extension()
			.and_then(|e| e.to_str())
			.is_some_and(|e| extensions.contains(&e));
		if let (true, Some(name)) = (matches, path.file_name()) {
			files.push(name.to_string_lossy().to_string());
		}
	}

	files.sort();
	Ok(files)
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;

	#[test]
	fn output_path_swaps_extension() {
		assert_eq!(build_output_path("data/model.arpa", "bin").unwrap(), PathBuf::from("data/model.bin"));
		assert_eq!(build_output_path("model", "bin").unwrap(), PathBuf::from("model.bin"));
		assert_eq!(get_filename("./data/model.arpa").unwrap(), "model");
	}

	#[test]
	fn lists_and_reads() {
		let dir = std::env::temp_dir().join(format!("rs-lm-io-{}", std::process::id()));
		fs::create_dir_all(&dir).unwrap();
		for name in ["b.arpa", "a.bin", "c.txt"] {
			let mut file = File::create(dir.join(name)).unwrap();
			writeln!(file, "  first line \n\n\r\nsecond").unwrap();
		}
		assert_eq!(list_files(&dir, &["bin", "arpa"]).unwrap(), vec!["a.bin", "b.arpa"]);
		assert_eq!(read_lines(dir.join("c.txt")).unwrap(), vec!["first line", "second"]);
		fs::remove_dir_all(&dir).unwrap();
	}
}
