use clap::Parser;
use miette::Result;
use tarpool::cli::{backup, restore, size};
use tracing_subscriber::EnvFilter;

/// Parallel archive backup and restore for recovery environments.
///
/// `tarpool backup` packages a directory tree into one or more archives,
/// optionally compressed and/or passphrase-encrypted, balancing the work
/// across one archiver per core. `tarpool restore` discovers the archive
/// family and extracts it in parallel. `tarpool size` reports what a
/// restore would write.
///
/// Every command has a short help (`-h`) and a long help (`--help`) with
/// more detail.
#[derive(Debug, Parser)]
#[clap(
	version,
	max_term_width = 100,
	after_help = "Use --help for a usage guide.",
	after_long_help = ""
)]
enum Command {
	Backup(backup::BackupArgs),
	Restore(restore::RestoreArgs),
	Size(size::SizeArgs),
}

fn main() -> Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
		.with_writer(std::io::stderr)
		.init();

	match Command::parse() {
		Command::Backup(args) => backup::run(args),
		Command::Restore(args) => restore::run(args),
		Command::Size(args) => size::run(args),
	}
}
