use std::fs::File;
use std::path::PathBuf;

use age::secrecy::SecretString;
use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::partition::TarList;
use crate::pipeline::PipelineSpec;
use crate::progress::ProgressSink;
use crate::split::Splitter;
use crate::stream::write_stream_trailer;
use crate::walk::EntryKind;

/// Everything one worker owns for its run. Built by the coordinator before
/// the worker starts; never shared.
#[derive(Debug)]
pub struct WorkerConfig {
	pub id: usize,
	pub source_dir: PathBuf,
	pub archive_base: PathBuf,
	pub compression: bool,
	pub passphrase: Option<SecretString>,
	pub split: bool,
	pub split_ceiling: u64,
	pub sink: WorkerSink,
}

/// Where the worker's pipeline terminates.
#[derive(Debug)]
pub enum WorkerSink {
	/// Archive files on disk.
	Disk,
	/// An external byte stream whose header has already been written.
	Stream(File),
}

/// Drive one worker id's slice of the list to completion.
///
/// Emits a byte delta and a file-completed event per regular file. Any
/// error closes the pipeline and is returned as-is.
pub fn run_worker(
	cfg: WorkerConfig,
	list: &TarList,
	progress: &ProgressSink,
	cancel: &CancelToken,
) -> Result<()> {
	let WorkerConfig {
		id,
		source_dir,
		archive_base,
		compression,
		passphrase,
		split,
		split_ceiling,
		sink,
	} = cfg;
	debug!(worker = id, split, "worker starting");

	let spec = PipelineSpec {
		compression,
		passphrase,
	};
	let mut splitter = match sink {
		WorkerSink::Disk => Splitter::create(&archive_base, id, spec, split, split_ceiling)?,
		WorkerSink::Stream(file) => Splitter::for_stream(file, spec)?,
	};

	for entry in list.slice(id) {
		if cancel.is_cancelled() {
			return Err(Error::Aborted);
		}
		let name = entry.path.strip_prefix(&source_dir).unwrap_or(&entry.path);
		match entry.kind {
			EntryKind::Dir => splitter.append_dir(&entry.path, name),
			EntryKind::Symlink => splitter.append_symlink(&entry.path, name)?,
			EntryKind::File => {
				splitter.append_file(&entry.path, name, entry.size)?;
				progress.delta(entry.size);
				progress.file_completed();
			}
		}
	}

	if let Some(mut stream) = splitter.finish()? {
		write_stream_trailer(&mut stream).map_err(|source| Error::Io {
			path: archive_base.clone(),
			source,
		})?;
	}
	info!(worker = id, "worker finished");
	Ok(())
}
