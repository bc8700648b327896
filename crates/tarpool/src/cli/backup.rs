use std::path::PathBuf;
use std::thread;

use clap::Parser;
use miette::{miette, Context as _, IntoDiagnostic as _, Result};
use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::coordinator;
use crate::exclude::Exclusions;
use crate::job::{BackupJob, DEFAULT_SPLIT_CEILING};
use crate::progress::{progress_channel, ProgressEvent, ProgressTotals};
use crate::sidecar::{sidecar_path, BackupInfo};

use super::passphrase::PassphraseArgs;

/// Back up a directory tree into one or more archives.
///
/// Without options this writes a single uncompressed archive at the given
/// base path; a backup larger than the split ceiling is broken into a
/// `<base><worker><seq>` family instead. Compression and encryption each
/// add a filter stage to every worker's pipeline. An encrypted backup runs
/// one worker per core (up to eight), so expect a family of archives.
///
/// After a successful backup a `<base>.info` file records the size, kind
/// and file count.
#[derive(Debug, Clone, Parser)]
pub struct BackupArgs {
	/// Directory tree to back up.
	pub source: PathBuf,

	/// Base path for the archive family, e.g. `/backup/data.tar`.
	pub archive: PathBuf,

	/// Compress archives.
	#[arg(long)]
	pub compress: bool,

	/// Encrypt archives with a passphrase.
	#[arg(long)]
	pub encrypt: bool,

	/// Keep the `app`/`dalvik` top-level trees unencrypted, the way a
	/// userdata backup wants them. Implies --encrypt.
	#[arg(long)]
	pub userdata_encryption: bool,

	/// Leave this path (and everything under it) out of the backup. May be
	/// given more than once.
	#[arg(long)]
	pub exclude: Vec<PathBuf>,

	/// Rotate to a new archive when one would exceed this many uncompressed
	/// bytes.
	#[arg(long, default_value_t = DEFAULT_SPLIT_CEILING)]
	pub split_ceiling: u64,

	/// Write the archive to this byte stream (FIFO or file) instead of to
	/// archive files. Disables splitting; cannot be combined with
	/// encryption.
	#[arg(long, conflicts_with_all = ["encrypt", "userdata_encryption"])]
	pub stream: Option<PathBuf>,

	/// Size estimate for the stream header, in bytes.
	#[arg(long, default_value_t = 0)]
	pub size_hint: u64,

	#[command(flatten)]
	pub pass: PassphraseArgs,
}

pub fn run(args: BackupArgs) -> Result<()> {
	let passphrase = if args.encrypt || args.userdata_encryption {
		Some(args.pass.require_phrase_with_confirmation()?)
	} else {
		None
	};

	let mut job = BackupJob::new(args.source.clone(), args.archive.clone())
		.with_compression(args.compress)
		.with_userdata_encryption(args.userdata_encryption)
		.with_split_ceiling(args.split_ceiling)
		.with_size_hint(args.size_hint);
	if let Some(phrase) = passphrase {
		job = job.with_passphrase(phrase);
	}
	if let Some(stream) = args.stream.clone() {
		job = job.with_stream(stream);
	}
	let kind = job.kind();
	let exclusions = Exclusions::new(args.exclude.clone());

	let cancel = CancelToken::new();
	{
		let token = cancel.clone();
		ctrlc::set_handler(move || token.cancel())
			.into_diagnostic()
			.wrap_err("installing the interrupt handler")?;
	}

	let (sink, events) = progress_channel();
	let engine = {
		let token = cancel.clone();
		thread::spawn(move || coordinator::backup(&job, &exclusions, &sink, &token))
	};

	let bar = super::byte_bar();
	let mut totals = ProgressTotals::default();
	for event in events {
		totals.apply(event);
		match event {
			ProgressEvent::FileCount(_) => {}
			ProgressEvent::TotalSize(n) => bar.set_length(n),
			ProgressEvent::DeltaBytes(_) => bar.set_position(totals.bytes),
			ProgressEvent::FileCompleted => {
				bar.set_message(format!("{}/{} files", totals.files, totals.expected_files));
			}
		}
	}

	let result = engine
		.join()
		.map_err(|_| miette!("backup engine panicked"))?;
	bar.finish_and_clear();
	result.into_diagnostic()?;

	if args.stream.is_none() {
		let info = BackupInfo {
			backup_size: totals.bytes,
			backup_type: kind,
			file_count: totals.files,
		};
		let path = sidecar_path(&args.archive);
		info.write_to(&path)
			.into_diagnostic()
			.wrap_err("writing backup metadata")?;
		debug!(path = %path.display(), "wrote backup metadata");
	}

	info!(bytes = totals.bytes, files = totals.files, "backup complete");
	Ok(())
}
