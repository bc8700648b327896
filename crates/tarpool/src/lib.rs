//! Parallel archive backup and restore engine for constrained recovery
//! environments.
//!
//! A backup partitions a directory tree into per-worker entry lists
//! balanced by byte count, then drives each worker through its own
//! `tar records → [compress] → [encrypt] → sink` pipeline, rotating to a
//! fresh archive whenever one would cross the size ceiling. Workers report
//! progress over a channel whose wire form is a stream of 64-bit words:
//! file count, total size, then positive byte deltas and zero-valued
//! file-completed markers. Restore discovers `<base><worker><seq>` archive
//! families by probing and extracts them in parallel, detecting
//! compression and encryption from the bytes themselves.
//!
//! The crate is a library plus a thin `tarpool` binary; like the CLI
//! support crates it grew from, it deliberately exposes the command
//! structures under [`cli`] so other tools can embed them.
//!
//! ```no_run
//! use std::thread;
//!
//! use tarpool::{backup, progress_channel, BackupJob, CancelToken, Exclusions};
//!
//! # fn main() -> tarpool::Result<()> {
//! let job = BackupJob::new("/data".into(), "/backup/data.tar".into()).with_compression(true);
//! let (sink, events) = progress_channel();
//! let engine = thread::spawn(move || backup(&job, &Exclusions::default(), &sink, &CancelToken::new()));
//! for event in events {
//!     println!("{event:?}");
//! }
//! engine.join().expect("engine thread")?;
//! # Ok(())
//! # }
//! ```

#![deny(rust_2018_idioms)]
#![deny(unsafe_code)]

pub use age::secrecy::SecretString;

pub use cancel::CancelToken;
pub use coordinator::{backup, restore};
pub use error::{Error, Result};
pub use exclude::Exclusions;
pub use job::{
	ArchiveKind, BackupJob, RestoreJob, ARCHIVE_SEQ_LIMIT, DEFAULT_SPLIT_CEILING, MAX_WORKERS,
};
pub use progress::{progress_channel, ProgressEvent, ProgressSink, ProgressTotals};

/// Archive record reading, writing, and end-marker surgery.
pub mod archive;

/// Cooperative cancellation of a running backup or restore.
pub mod cancel;

/// Clap argument parsers and implementations of the CLI commands.
pub mod cli;

/// Top-level backup and restore orchestration.
pub mod coordinator;

/// Engine error kinds.
pub mod error;

/// Path-exclusion predicate.
pub mod exclude;

/// Per-invocation configuration.
pub mod job;

/// Partitioning a traversal into per-worker entry lists.
pub mod partition;

/// Worker output pipelines and their filter stages.
pub mod pipeline;

/// Archive-kind detection and uncompressed-size queries.
pub mod probe;

/// The worker-to-consumer progress protocol.
pub mod progress;

/// Sidecar metadata files.
pub mod sidecar;

/// Archive splitting and family naming.
pub mod split;

/// External stream framing.
pub mod stream;

/// Directory traversal.
pub mod walk;

/// The per-worker archival drive.
pub mod worker;
