use std::path::PathBuf;

use clap::Parser;
use indicatif::HumanBytes;
use miette::{IntoDiagnostic as _, Result};

use crate::probe;

use super::passphrase::PassphraseArgs;

/// Report the uncompressed size of an archive or archive family.
///
/// This is what a restore will write, not what the archives occupy on
/// disk. Encrypted compressed archives need the passphrase to answer.
#[derive(Debug, Clone, Parser)]
pub struct SizeArgs {
	/// Archive path, or family base path for split backups.
	pub archive: PathBuf,

	#[command(flatten)]
	pub pass: PassphraseArgs,
}

pub fn run(args: SizeArgs) -> Result<()> {
	let passphrase = if args.pass.provided()
		|| probe::family_needs_passphrase(&args.archive).into_diagnostic()?
	{
		Some(args.pass.require_phrase()?)
	} else {
		None
	};

	let total = probe::family_restore_size(&args.archive, passphrase.as_ref()).into_diagnostic()?;
	println!("{total}\t{}", HumanBytes(total));
	Ok(())
}
