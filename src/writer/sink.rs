use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// The `octree.data` file together with the offset of its next free byte.
///
/// Payloads are appended whole; a failed append is rolled back so that the
/// counter and the file length never disagree.
pub struct OctreeSink {
	path: PathBuf,
	file: File,
	bytes_written: u64,
}

impl OctreeSink {
	pub fn create(path: &Path) -> Result<OctreeSink> {
		let file = OpenOptions::new()
			.create(true)
			.write(true)
			.truncate(true)
			.open(path)?;

		Ok(OctreeSink {
			path: path.to_path_buf(),
			file,
			bytes_written: 0,
		})
	}

	/// Continues appending to an already open file, after its current end.
	pub fn from_file(path: &Path, mut file: File) -> Result<OctreeSink> {
		let bytes_written = file.seek(SeekFrom::End(0))?;

		Ok(OctreeSink {
			path: path.to_path_buf(),
			file,
			bytes_written,
		})
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	pub fn bytes_written(&self) -> u64 {
		self.bytes_written
	}

	/// Appends `data` and returns the offset it starts at.
	pub fn append(&mut self, data: &[u8]) -> Result<u64> {
		let offset = self.bytes_written;

		if let Err(err) = self.file.write_all(data) {
			self.file.set_len(offset)?;
			self.file.seek(SeekFrom::Start(offset))?;
			return Err(err.into());
		}

		self.bytes_written += data.len() as u64;
		Ok(offset)
	}

	pub fn sync(&mut self) -> Result<()> {
		self.file.flush()?;
		self.file.sync_data()?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::fs;

	#[test]
	fn offsets_follow_the_file_length() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("octree.data");
		fs::write(&path, b"stale contents").unwrap();

		let mut sink = OctreeSink::create(&path).unwrap();
		assert_eq!(sink.append(&[1, 2, 3]).unwrap(), 0);
		assert_eq!(sink.append(&[]).unwrap(), 3);
		assert_eq!(sink.append(&[4, 5]).unwrap(), 3);
		sink.sync().unwrap();

		assert_eq!(sink.bytes_written(), 5);
		assert_eq!(fs::read(sink.path()).unwrap(), vec![1, 2, 3, 4, 5]);
	}

	#[test]
	fn adopted_files_continue_at_their_end() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("octree.data");
		fs::write(&path, [9, 9]).unwrap();

		let file = OpenOptions::new().append(true).open(&path).unwrap();
		let mut sink = OctreeSink::from_file(&path, file).unwrap();
		assert_eq!(sink.append(&[1]).unwrap(), 2);
		assert_eq!(fs::read(&path).unwrap(), vec![9, 9, 1]);
	}

	#[test]
	fn failed_appends_leave_the_counter_alone() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("octree.data");
		fs::write(&path, []).unwrap();

		let mut sink = OctreeSink::from_file(&path, File::open(&path).unwrap()).unwrap();
		assert!(sink.append(&[1, 2, 3]).is_err());
		assert_eq!(sink.bytes_written(), 0);
	}
}
