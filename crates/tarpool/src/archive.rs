use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::progress::ProgressSink;

/// Tar record block size. A well-formed archive ends with two zero blocks.
const BLOCK: u64 = 512;

fn padded(len: u64) -> u64 {
	len.div_ceil(BLOCK) * BLOCK
}

/// Sequential archive writer.
///
/// GNU headers, symlinks stored as symlinks, full POSIX metadata, and
/// extended attributes carried as PAX `SCHILY.xattr.*` records (which is
/// where SELinux contexts and POSIX capabilities live).
pub struct ArchiveWriter<W: Write> {
	inner: tar::Builder<W>,
}

impl<W: Write> ArchiveWriter<W> {
	pub fn new(sink: W) -> Self {
		let mut inner = tar::Builder::new(sink);
		inner.follow_symlinks(false);
		inner.mode(tar::HeaderMode::Complete);
		Self { inner }
	}

	/// Append one filesystem entry, stored under `name`.
	pub fn append_entry(&mut self, path: &Path, name: &Path) -> io::Result<()> {
		let xattrs = read_xattrs(path);
		if !xattrs.is_empty() {
			self.inner.append_pax_extensions(
				xattrs.iter().map(|(key, value)| (key.as_str(), value.as_slice())),
			)?;
		}
		self.inner.append_path_with_name(path, name)
	}

	/// Write the end marker and hand back the sink.
	pub fn finish(self) -> io::Result<W> {
		self.inner.into_inner()
	}
}

#[cfg(unix)]
fn read_xattrs(path: &Path) -> Vec<(String, Vec<u8>)> {
	// Symlink xattrs are not portable; the record format skips them too.
	let Ok(meta) = std::fs::symlink_metadata(path) else {
		return Vec::new();
	};
	if meta.file_type().is_symlink() {
		return Vec::new();
	}
	let Ok(names) = xattr::list(path) else {
		return Vec::new();
	};
	let mut out = Vec::new();
	for name in names {
		let Some(name) = name.to_str().map(str::to_owned) else {
			trace!(path = %path.display(), "skipping non-utf8 xattr name");
			continue;
		};
		if let Ok(Some(value)) = xattr::get(path, &name) {
			out.push((format!("SCHILY.xattr.{name}"), value));
		}
	}
	out
}

#[cfg(not(unix))]
fn read_xattrs(_path: &Path) -> Vec<(String, Vec<u8>)> {
	Vec::new()
}

/// Sequential archive reader over any byte source.
pub struct ArchiveReader<R: Read> {
	inner: tar::Archive<R>,
	path: PathBuf,
}

impl<R: Read> ArchiveReader<R> {
	/// `path` is only used to label errors; the bytes come from `source`.
	pub fn new(source: R, path: &Path) -> Self {
		let mut inner = tar::Archive::new(source);
		inner.set_preserve_permissions(true);
		inner.set_preserve_mtime(true);
		#[cfg(unix)]
		inner.set_unpack_xattrs(true);
		Self {
			inner,
			path: path.to_path_buf(),
		}
	}

	/// Restore every entry under `root`, reporting entry sizes as byte
	/// deltas on the progress sink.
	pub fn extract_all(
		mut self,
		root: &Path,
		progress: &ProgressSink,
		cancel: &CancelToken,
	) -> Result<()> {
		let path = self.path.clone();
		let wrap = |source: io::Error, path: &Path| Error::Archive {
			path: path.to_path_buf(),
			source,
		};
		let mut count = 0u64;
		for entry in self.inner.entries().map_err(|e| wrap(e, &path))? {
			if cancel.is_cancelled() {
				return Err(Error::Aborted);
			}
			let mut entry = entry.map_err(|e| wrap(e, &path))?;
			let size = entry.header().entry_size().unwrap_or(0);
			entry.unpack_in(root).map_err(|e| wrap(e, &path))?;
			progress.delta(size);
			count += 1;
		}
		debug!(archive = %path.display(), entries = count, "extracted archive");
		Ok(())
	}

	/// Whether the archive contains an entry stored under `name`.
	pub fn contains(mut self, name: &Path) -> Result<bool> {
		let path = self.path.clone();
		let wrap = |source: io::Error, path: &Path| Error::Archive {
			path: path.to_path_buf(),
			source,
		};
		for entry in self.inner.entries().map_err(|e| wrap(e, &path))? {
			let entry = entry.map_err(|e| wrap(e, &path))?;
			if entry.path().map_err(|e| wrap(e, &path))?.as_ref() == name {
				return Ok(true);
			}
		}
		Ok(false)
	}

	/// Entry names in archive order.
	pub fn entry_names(mut self) -> Result<Vec<PathBuf>> {
		let path = self.path.clone();
		let wrap = |source: io::Error, path: &Path| Error::Archive {
			path: path.to_path_buf(),
			source,
		};
		let mut names = Vec::new();
		for entry in self.inner.entries().map_err(|e| wrap(e, &path))? {
			let entry = entry.map_err(|e| wrap(e, &path))?;
			names.push(entry.path().map_err(|e| wrap(e, &path))?.into_owned());
		}
		Ok(names)
	}
}

/// Truncate the trailing end-of-archive marker so entries can be appended.
///
/// Walks the headers, skipping over file bodies, and cuts the file right
/// after the last entry. Applying it to an archive that already lost its
/// marker finds the same offset, so the operation is idempotent.
pub fn truncate_end_marker(path: &Path) -> Result<()> {
	let file = File::open(path).map_err(|source| Error::Io {
		path: path.to_path_buf(),
		source,
	})?;
	let mut archive = tar::Archive::new(file);
	let mut end = 0u64;
	for entry in archive.entries().map_err(|source| Error::Archive {
		path: path.to_path_buf(),
		source,
	})? {
		let entry = entry.map_err(|source| Error::Archive {
			path: path.to_path_buf(),
			source,
		})?;
		let size = entry.header().entry_size().unwrap_or(0);
		end = entry.raw_file_position() + padded(size);
	}
	if end > 0 {
		let file = OpenOptions::new()
			.write(true)
			.open(path)
			.map_err(|source| Error::Io {
				path: path.to_path_buf(),
				source,
			})?;
		file.set_len(end).map_err(|source| Error::Io {
			path: path.to_path_buf(),
			source,
		})?;
		trace!(archive = %path.display(), end, "truncated end marker");
	}
	Ok(())
}

/// Append `files` (stored relative to `root`) to an existing uncompressed
/// archive, replacing its end marker with a fresh one.
pub fn append_files(archive: &Path, root: &Path, files: &[PathBuf]) -> Result<()> {
	truncate_end_marker(archive)?;
	let file = OpenOptions::new()
		.append(true)
		.open(archive)
		.map_err(|source| Error::Io {
			path: archive.to_path_buf(),
			source,
		})?;
	let mut writer = ArchiveWriter::new(file);
	for path in files {
		let name = path.strip_prefix(root).unwrap_or(path);
		writer.append_entry(path, name).map_err(|source| Error::Archive {
			path: archive.to_path_buf(),
			source,
		})?;
	}
	writer.finish().map_err(|source| Error::Archive {
		path: archive.to_path_buf(),
		source,
	})?;
	debug!(archive = %archive.display(), added = files.len(), "appended to archive");
	Ok(())
}

#[cfg(test)]
mod tests {
	use std::fs;

	use super::*;

	fn sample_archive(dir: &Path) -> PathBuf {
		let root = dir.join("src");
		fs::create_dir(&root).unwrap();
		fs::write(root.join("one"), vec![b'a'; 700]).unwrap();
		fs::write(root.join("two"), b"b").unwrap();

		let path = dir.join("sample.tar");
		let mut writer = ArchiveWriter::new(File::create(&path).unwrap());
		writer
			.append_entry(&root.join("one"), Path::new("one"))
			.unwrap();
		writer
			.append_entry(&root.join("two"), Path::new("two"))
			.unwrap();
		writer.finish().unwrap();
		path
	}

	fn open(path: &Path) -> ArchiveReader<File> {
		ArchiveReader::new(File::open(path).unwrap(), path)
	}

	#[test]
	fn truncate_end_marker_is_idempotent() {
		let tmp = tempfile::tempdir().unwrap();
		let path = sample_archive(tmp.path());
		let with_marker = fs::metadata(&path).unwrap().len();

		truncate_end_marker(&path).unwrap();
		let once = fs::metadata(&path).unwrap().len();
		assert!(once < with_marker);

		truncate_end_marker(&path).unwrap();
		let twice = fs::metadata(&path).unwrap().len();
		assert_eq!(once, twice);
	}

	#[test]
	fn append_replaces_the_end_marker() {
		let tmp = tempfile::tempdir().unwrap();
		let path = sample_archive(tmp.path());
		let root = tmp.path().join("src");
		fs::write(root.join("three"), b"ccc").unwrap();

		append_files(&path, &root, &[root.join("three")]).unwrap();

		let names = open(&path).entry_names().unwrap();
		let expected: Vec<PathBuf> = ["one", "two", "three"].into_iter().map(PathBuf::from).collect();
		assert_eq!(names, expected);
		assert!(open(&path).contains(Path::new("three")).unwrap());
		assert!(!open(&path).contains(Path::new("four")).unwrap());
	}

	#[test]
	fn extract_reports_entry_sizes() {
		let tmp = tempfile::tempdir().unwrap();
		let path = sample_archive(tmp.path());
		let out = tmp.path().join("out");
		fs::create_dir(&out).unwrap();

		let (sink, events) = crate::progress::progress_channel();
		open(&path)
			.extract_all(&out, &sink, &CancelToken::new())
			.unwrap();
		drop(sink);

		let total: u64 = events.iter().map(|e| e.to_wire()).sum();
		assert_eq!(total, 701);
		assert_eq!(fs::read(out.join("one")).unwrap().len(), 700);
		assert_eq!(fs::read(out.join("two")).unwrap(), b"b");
	}
}
