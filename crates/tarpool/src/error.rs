use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Convenience alias used throughout the engine.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong during a backup or restore.
///
/// One variant per failure category; the CLI reports exactly one of these
/// per failed run, while the detailed causes land in the log.
#[derive(Debug, Error)]
pub enum Error {
	#[error("i/o error on {}: {source}", path.display())]
	Io { path: PathBuf, source: io::Error },

	#[error("scanning {} for the backup set failed: {source}", path.display())]
	Partition { path: PathBuf, source: io::Error },

	#[error("could not assemble the output pipeline: {0}")]
	PipelineSetup(String),

	#[error("{stage} stage failed: {source}")]
	Filter { stage: &'static str, source: io::Error },

	#[error("archive error on {}: {source}", path.display())]
	Archive { path: PathBuf, source: io::Error },

	#[error("worker {worker} would need more than 100 archives")]
	TooManyArchives { worker: usize },

	#[error("archive {} is empty", path.display())]
	EmptyArchive { path: PathBuf },

	#[error("could not decrypt {}", path.display())]
	Decrypt { path: PathBuf },

	#[error("wrong or missing passphrase for {}", path.display())]
	WrongPassword { path: PathBuf },

	#[error("operation aborted")]
	Aborted,

	#[error("worker {worker} panicked")]
	WorkerPanicked { worker: usize },
}
