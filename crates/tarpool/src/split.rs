use std::fs::File;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{Error, Result};
use crate::job::ARCHIVE_SEQ_LIMIT;
use crate::pipeline::{Pipeline, PipelineSpec};

/// Archive file name for one member of a family: `<base><worker><seq:02>`.
pub fn archive_name(base: &Path, worker: usize, seq: u32) -> PathBuf {
	let mut name = base.as_os_str().to_owned();
	name.push(format!("{worker}{seq:02}"));
	PathBuf::from(name)
}

/// Rotating archive writer for one worker.
///
/// Enforces the uncompressed-byte ceiling per archive and numbers the
/// members `<base><worker><seq:02>`. Directory entries are held back until
/// the next file or symlink, so a rotation triggered by a file carries the
/// file's parent directories into the new archive with it; directories and
/// symlinks never trigger a rotation themselves.
pub struct Splitter {
	base: PathBuf,
	worker: usize,
	spec: PipelineSpec,
	split: bool,
	ceiling: u64,
	seq: u32,
	bytes: u64,
	pipeline: Option<Pipeline>,
	pending_dirs: Vec<(PathBuf, PathBuf)>,
}

impl Splitter {
	/// Open the first archive: `<base><worker>00` when splitting, `<base>`
	/// itself otherwise.
	pub fn create(
		base: &Path,
		worker: usize,
		spec: PipelineSpec,
		split: bool,
		ceiling: u64,
	) -> Result<Self> {
		let first = if split {
			archive_name(base, worker, 0)
		} else {
			base.to_path_buf()
		};
		let pipeline = Pipeline::create(&first, &spec)?;
		Ok(Self {
			base: base.to_path_buf(),
			worker,
			spec,
			split,
			ceiling,
			seq: 0,
			bytes: 0,
			pipeline: Some(pipeline),
			pending_dirs: Vec::new(),
		})
	}

	/// Wrap an external stream: a single archive that never rotates.
	pub fn for_stream(sink: File, spec: PipelineSpec) -> Result<Self> {
		let pipeline = Pipeline::for_stream(sink, &spec)?;
		Ok(Self {
			base: PathBuf::new(),
			worker: 0,
			spec,
			split: false,
			ceiling: 0,
			seq: 0,
			bytes: 0,
			pipeline: Some(pipeline),
			pending_dirs: Vec::new(),
		})
	}

	/// Queue a directory entry for the next flush.
	pub fn append_dir(&mut self, path: &Path, name: &Path) {
		self.pending_dirs.push((path.to_path_buf(), name.to_path_buf()));
	}

	pub fn append_symlink(&mut self, path: &Path, name: &Path) -> Result<()> {
		self.flush_dirs()?;
		self.live().append(path, name)
	}

	/// Append a regular file, rotating first if it would push the current
	/// archive over the ceiling.
	pub fn append_file(&mut self, path: &Path, name: &Path, size: u64) -> Result<()> {
		if self.split && self.bytes > 0 && self.bytes + size > self.ceiling {
			self.rotate()?;
		}
		self.flush_dirs()?;
		self.live().append(path, name)?;
		self.bytes += size;
		Ok(())
	}

	/// Flush anything pending and close the current archive. Returns the
	/// sink file when the splitter wraps an external stream.
	pub fn finish(mut self) -> Result<Option<File>> {
		self.flush_dirs()?;
		let done = self.pipeline.take().expect("BUG: pipeline closed mid-worker");
		done.finish()
	}

	fn live(&mut self) -> &mut Pipeline {
		self.pipeline.as_mut().expect("BUG: pipeline closed mid-worker")
	}

	fn flush_dirs(&mut self) -> Result<()> {
		for (path, name) in std::mem::take(&mut self.pending_dirs) {
			self.live().append(&path, &name)?;
		}
		Ok(())
	}

	fn rotate(&mut self) -> Result<()> {
		let done = self.pipeline.take().expect("BUG: pipeline closed mid-worker");
		done.finish()?;
		self.seq += 1;
		if self.seq > ARCHIVE_SEQ_LIMIT {
			return Err(Error::TooManyArchives { worker: self.worker });
		}
		info!(
			worker = self.worker,
			archive = self.seq,
			"splitting into a new archive"
		);
		let next = archive_name(&self.base, self.worker, self.seq);
		self.pipeline = Some(Pipeline::create(&next, &self.spec)?);
		self.bytes = 0;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn family_names_are_base_worker_seq() {
		let base = Path::new("/backup/data.tar");
		assert_eq!(archive_name(base, 0, 0), PathBuf::from("/backup/data.tar000"));
		assert_eq!(archive_name(base, 3, 7), PathBuf::from("/backup/data.tar307"));
		assert_eq!(archive_name(base, 1, 99), PathBuf::from("/backup/data.tar199"));
	}
}
