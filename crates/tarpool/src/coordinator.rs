use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::Path;
use std::thread;

use age::secrecy::SecretString;
use flate2::read::GzDecoder;
use tracing::{debug, info, instrument, warn};

use crate::archive::ArchiveReader;
use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::exclude::Exclusions;
use crate::job::{BackupJob, RestoreJob, MAX_WORKERS};
use crate::partition;
use crate::pipeline;
use crate::probe;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::split::archive_name;
use crate::stream;
use crate::worker::{run_worker, WorkerConfig, WorkerSink};

/// Run one backup to completion.
///
/// The first two events on the progress sink are the file count and the
/// total size, emitted before any worker starts; everything after is byte
/// deltas and file-completed markers, interleaved across workers.
#[instrument(level = "debug", skip_all, fields(source = %job.source_dir.display()))]
pub fn backup(
	job: &BackupJob,
	exclusions: &Exclusions,
	progress: &ProgressSink,
	cancel: &CancelToken,
) -> Result<()> {
	if job.passphrase.is_some() || job.userdata_encryption {
		backup_encrypted(job, exclusions, progress, cancel)
	} else {
		backup_plain(job, exclusions, progress, cancel)
	}
}

fn backup_plain(
	job: &BackupJob,
	exclusions: &Exclusions,
	progress: &ProgressSink,
	cancel: &CancelToken,
) -> Result<()> {
	let list = partition::plain_list(&job.source_dir, exclusions)?;
	progress.send(ProgressEvent::FileCount(list.file_count));
	progress.send(ProgressEvent::TotalSize(list.total_bytes));

	let (sink, split) = match &job.stream {
		Some(path) => {
			let mut file = File::options()
				.write(true)
				.create(true)
				.truncate(true)
				.open(path)
				.map_err(|source| Error::Io {
					path: path.clone(),
					source,
				})?;
			let total = if job.total_size_hint > 0 {
				job.total_size_hint
			} else {
				list.total_bytes
			};
			let header = stream::StreamHeader {
				name: archive_file_name(job),
				total_size: total,
				compressed: job.compression,
			};
			stream::write_stream_header(&mut file, &header).map_err(|source| Error::Io {
				path: path.clone(),
				source,
			})?;
			info!(stream = %path.display(), "writing backup to external stream");
			(WorkerSink::Stream(file), false)
		}
		None => (WorkerSink::Disk, list.total_bytes > job.split_ceiling),
	};
	if split {
		info!("breaking backup into multiple archives");
	}

	let cfg = worker_config(job, 0, None, split, sink);
	run_worker(cfg, &list, progress, cancel)?;
	info!(
		files = list.file_count,
		bytes = list.total_bytes,
		"finished backup"
	);
	Ok(())
}

fn backup_encrypted(
	job: &BackupJob,
	exclusions: &Exclusions,
	progress: &ProgressSink,
	cancel: &CancelToken,
) -> Result<()> {
	let Some(passphrase) = &job.passphrase else {
		return Err(Error::PipelineSetup(
			"encrypted backup requires a passphrase".into(),
		));
	};
	if job.stream.is_some() {
		return Err(Error::PipelineSetup(
			"stream sinks do not support encryption".into(),
		));
	}

	let plan = partition::encrypted_plan(&job.source_dir, exclusions, job.userdata_encryption)?;
	progress.send(ProgressEvent::FileCount(plan.file_count()));
	progress.send(ProgressEvent::TotalSize(plan.total_bytes()));

	if job.userdata_encryption {
		info!("creating plaintext archives for the userdata exemptions");
		let cfg = worker_config(job, 0, None, true, WorkerSink::Disk);
		run_worker(cfg, &plan.regular, progress, cancel)?;
	}

	// Only workers that actually hold entries are spawned. An empty
	// encrypted bucket still gets one valid archive from the lowest
	// intended worker, so the family exists and restores.
	let ids = plan.encrypted.worker_ids();
	if ids.is_empty() {
		let id = usize::from(job.userdata_encryption);
		debug!(worker = id, "empty encrypted bucket, writing its archive inline");
		let cfg = worker_config(job, id, Some(passphrase.clone()), true, WorkerSink::Disk);
		run_worker(cfg, &plan.encrypted, progress, cancel)?;
		info!("finished encrypted backup");
		return Ok(());
	}
	debug!(workers = ids.len(), target = plan.target, "spawning encrypted workers");

	let mut first_error: Option<Error> = None;
	thread::scope(|scope| {
		let mut handles = Vec::new();
		for &id in &ids {
			let cfg = worker_config(job, id, Some(passphrase.clone()), true, WorkerSink::Disk);
			let sink = progress.clone();
			let token = cancel.clone();
			let list = &plan.encrypted;
			let spawned = thread::Builder::new()
				.name(format!("worker-{id}"))
				.spawn_scoped(scope, move || run_worker(cfg, list, &sink, &token));
			match spawned {
				Ok(handle) => handles.push((id, handle)),
				Err(err) => {
					// Spawn failure is not fatal: do the work on this
					// thread, slower but complete.
					warn!(worker = id, %err, "could not spawn worker thread, running inline");
					let cfg =
						worker_config(job, id, Some(passphrase.clone()), true, WorkerSink::Disk);
					if let Err(worker_err) = run_worker(cfg, &plan.encrypted, progress, cancel) {
						if first_error.is_none() {
							first_error = Some(worker_err);
						}
					}
				}
			}
		}
		join_workers(handles, &mut first_error);
	});

	match first_error {
		Some(err) => Err(err),
		None => {
			info!(
				files = plan.file_count(),
				bytes = plan.total_bytes(),
				"finished encrypted backup"
			);
			Ok(())
		}
	}
}

/// Join every worker; the first failure is recorded but the join phase
/// runs to completion.
fn join_workers(
	handles: Vec<(usize, thread::ScopedJoinHandle<'_, Result<()>>)>,
	first_error: &mut Option<Error>,
) {
	for (id, handle) in handles {
		match handle.join() {
			Ok(Ok(())) => debug!(worker = id, "joined worker"),
			Ok(Err(err)) => {
				warn!(worker = id, %err, "worker failed");
				if first_error.is_none() {
					*first_error = Some(err);
				}
			}
			Err(_) => {
				warn!(worker = id, "worker panicked");
				if first_error.is_none() {
					*first_error = Some(Error::WorkerPanicked { worker: id });
				}
			}
		}
	}
}

fn worker_config(
	job: &BackupJob,
	id: usize,
	passphrase: Option<SecretString>,
	split: bool,
	sink: WorkerSink,
) -> WorkerConfig {
	WorkerConfig {
		id,
		source_dir: job.source_dir.clone(),
		archive_base: job.archive_base.clone(),
		compression: job.compression,
		passphrase,
		split,
		split_ceiling: job.split_ceiling,
		sink,
	}
}

fn archive_file_name(job: &BackupJob) -> String {
	job.archive_base
		.file_name()
		.map(|name| name.to_string_lossy().into_owned())
		.unwrap_or_default()
}

/// Run one restore to completion.
///
/// A file at the archive path is extracted directly. Otherwise the
/// `<base><worker><seq>` family is discovered by probing: worker 0 runs on
/// this thread when its first archive is not encrypted, the remaining
/// present families get a thread each, and the first absent family id ends
/// the scan. Restore emits byte deltas only.
#[instrument(level = "debug", skip_all, fields(archive = %job.archive.display()))]
pub fn restore(job: &RestoreJob, progress: &ProgressSink, cancel: &CancelToken) -> Result<()> {
	fs::create_dir_all(&job.target_dir).map_err(|source| Error::Io {
		path: job.target_dir.clone(),
		source,
	})?;

	if let Some(path) = &job.stream {
		return restore_stream(path, job, progress, cancel);
	}

	if job.archive.exists() {
		debug!("single archive");
		return extract_archive(
			&job.archive,
			&job.target_dir,
			job.passphrase.as_ref(),
			progress,
			cancel,
		);
	}

	debug!("multiple archives");
	let first = archive_name(&job.archive, 0, 0);
	if !first.exists() {
		return Err(Error::Io {
			path: first,
			source: io::Error::new(io::ErrorKind::NotFound, "no archive family found"),
		});
	}

	let mut start = 0;
	if !probe::is_encrypted(&first)? {
		debug!(archive = %first.display(), "first archive not encrypted, extracting worker 0 inline");
		extract_family(job, 0, progress, cancel)?;
		start = 1;
	}

	let mut ids = Vec::new();
	for id in start..=MAX_WORKERS {
		if archive_name(&job.archive, id, 0).exists() {
			ids.push(id);
		} else {
			break;
		}
	}
	debug!(workers = ids.len(), "spawning restore workers");

	let mut first_error: Option<Error> = None;
	thread::scope(|scope| {
		let mut handles = Vec::new();
		for &id in &ids {
			let sink = progress.clone();
			let token = cancel.clone();
			let spawned = thread::Builder::new()
				.name(format!("restore-{id}"))
				.spawn_scoped(scope, move || extract_family(job, id, &sink, &token));
			match spawned {
				Ok(handle) => handles.push((id, handle)),
				Err(err) => {
					warn!(worker = id, %err, "could not spawn restore thread, running inline");
					if let Err(restore_err) = extract_family(job, id, progress, cancel) {
						if first_error.is_none() {
							first_error = Some(restore_err);
						}
					}
				}
			}
		}
		join_workers(handles, &mut first_error);
	});

	match first_error {
		Some(err) => Err(err),
		None => {
			info!("finished restore");
			Ok(())
		}
	}
}

/// Extract every member of one worker's family until a sequence number is
/// missing.
fn extract_family(
	job: &RestoreJob,
	id: usize,
	progress: &ProgressSink,
	cancel: &CancelToken,
) -> Result<()> {
	let mut seq = 0u32;
	loop {
		let path = archive_name(&job.archive, id, seq);
		if !path.exists() {
			break;
		}
		extract_archive(
			&path,
			&job.target_dir,
			job.passphrase.as_ref(),
			progress,
			cancel,
		)?;
		seq += 1;
		if seq > crate::job::ARCHIVE_SEQ_LIMIT {
			break;
		}
	}
	debug!(worker = id, archives = seq, "family extracted");
	Ok(())
}

fn extract_archive(
	path: &Path,
	target: &Path,
	passphrase: Option<&SecretString>,
	progress: &ProgressSink,
	cancel: &CancelToken,
) -> Result<()> {
	if cancel.is_cancelled() {
		return Err(Error::Aborted);
	}
	let kind = probe::detect_kind(path, passphrase)?;
	debug!(archive = %path.display(), ?kind, "extracting archive");
	pipeline::open_archive(path, kind, passphrase)?.extract_all(target, progress, cancel)
}

fn restore_stream(
	path: &Path,
	job: &RestoreJob,
	progress: &ProgressSink,
	cancel: &CancelToken,
) -> Result<()> {
	let file = File::open(path).map_err(|source| Error::Io {
		path: path.to_path_buf(),
		source,
	})?;
	let mut reader = BufReader::new(file);
	let header = stream::read_stream_header(&mut reader).map_err(|source| Error::Io {
		path: path.to_path_buf(),
		source,
	})?;
	info!(
		name = %header.name,
		size = header.total_size,
		compressed = header.compressed,
		"restoring from external stream"
	);
	let source: Box<dyn Read> = if header.compressed {
		Box::new(GzDecoder::new(reader))
	} else {
		Box::new(reader)
	};
	ArchiveReader::new(source, path).extract_all(&job.target_dir, progress, cancel)
}
