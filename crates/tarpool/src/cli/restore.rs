use std::fs::create_dir_all;
use std::path::PathBuf;
use std::thread;

use clap::Parser;
use miette::{miette, Context as _, IntoDiagnostic as _, Result};
use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::coordinator;
use crate::job::RestoreJob;
use crate::probe;
use crate::progress::{progress_channel, ProgressEvent};

use super::passphrase::PassphraseArgs;

/// Restore a backup into a directory.
///
/// Accepts either a single archive file or the base path of a split
/// `<base><worker><seq>` family; the family is discovered by probing and
/// extracted in parallel. Compression and encryption are detected from the
/// archives themselves, so the only thing to know is the passphrase.
#[derive(Debug, Clone, Parser)]
pub struct RestoreArgs {
	/// Archive path, or family base path for split backups.
	pub archive: PathBuf,

	/// Directory to restore into (created if missing).
	pub target: PathBuf,

	/// Read the archive from this byte stream (FIFO or file) instead of
	/// from archive files.
	#[arg(long)]
	pub stream: Option<PathBuf>,

	#[command(flatten)]
	pub pass: PassphraseArgs,
}

pub fn run(args: RestoreArgs) -> Result<()> {
	let passphrase = if args.pass.provided() {
		Some(args.pass.require_phrase()?)
	} else if args.stream.is_none()
		&& probe::family_needs_passphrase(&args.archive).into_diagnostic()?
	{
		Some(args.pass.require_phrase()?)
	} else {
		None
	};

	create_dir_all(&args.target)
		.into_diagnostic()
		.wrap_err("creating the restore target")?;

	let mut job = RestoreJob::new(args.archive.clone(), args.target.clone());
	if let Some(phrase) = passphrase {
		job = job.with_passphrase(phrase);
	}
	if let Some(stream) = args.stream.clone() {
		job = job.with_stream(stream);
	}

	let bar = super::byte_bar();
	if args.stream.is_none() {
		// Best effort: the size query needs the passphrase for encrypted
		// compressed archives and can fail without dooming the restore.
		match probe::family_restore_size(&args.archive, job.passphrase.as_ref()) {
			Ok(total) if total > 0 => bar.set_length(total),
			Ok(_) => {}
			Err(err) => debug!(%err, "could not size the restore up front"),
		}
	}

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
		thread::spawn(move || coordinator::restore(&job, &sink, &token))
	};

	let mut restored = 0u64;
	for event in events {
		if let ProgressEvent::DeltaBytes(n) = event {
			restored += n;
			bar.set_position(restored);
		}
	}

	let result = engine
		.join()
		.map_err(|_| miette!("restore engine panicked"))?;
	bar.finish_and_clear();
	result.into_diagnostic()?;

	info!(bytes = restored, "restore complete");
	Ok(())
}
