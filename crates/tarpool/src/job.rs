use std::path::PathBuf;

use age::secrecy::SecretString;

/// Ceiling on the uncompressed bytes of one archive before the splitter
/// rotates to the next member of the family: 1.5 GiB.
pub const DEFAULT_SPLIT_CEILING: u64 = 1_610_612_736;

/// Highest worker id. Restore probes families for ids `0..=MAX_WORKERS`.
pub const MAX_WORKERS: usize = 8;

/// Highest two-digit sequence number within one archive family.
pub const ARCHIVE_SEQ_LIMIT: u32 = 99;

/// How an archive's bytes are dressed on disk.
///
/// The discriminants are the `backup_type` codes recorded in the sidecar
/// metadata file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
	Uncompressed = 0,
	Compressed = 1,
	Encrypted = 2,
	CompressedEncrypted = 3,
}

impl ArchiveKind {
	pub fn from_flags(compression: bool, encryption: bool) -> Self {
		match (compression, encryption) {
			(false, false) => Self::Uncompressed,
			(true, false) => Self::Compressed,
			(false, true) => Self::Encrypted,
			(true, true) => Self::CompressedEncrypted,
		}
	}

	pub fn code(self) -> u8 {
		self as u8
	}

	pub fn from_code(code: u8) -> Option<Self> {
		match code {
			0 => Some(Self::Uncompressed),
			1 => Some(Self::Compressed),
			2 => Some(Self::Encrypted),
			3 => Some(Self::CompressedEncrypted),
			_ => None,
		}
	}

	pub fn is_compressed(self) -> bool {
		matches!(self, Self::Compressed | Self::CompressedEncrypted)
	}

	pub fn is_encrypted(self) -> bool {
		matches!(self, Self::Encrypted | Self::CompressedEncrypted)
	}
}

/// Immutable configuration for one backup run.
#[derive(Debug, Clone)]
pub struct BackupJob {
	/// Directory tree to back up.
	pub source_dir: PathBuf,

	/// Base path of the archive family.
	///
	/// A single-archive backup writes exactly this path; a split backup
	/// writes `<base><worker><seq>` siblings next to it.
	pub archive_base: PathBuf,

	/// Caller's estimate of the backup size. Only consulted for the stream
	/// header, which has to be written before the walk runs.
	pub total_size_hint: u64,

	/// Pass archive bytes through the compressor stage.
	pub compression: bool,

	/// Pass archive bytes through the cipher stage, keyed by this
	/// passphrase.
	pub passphrase: Option<SecretString>,

	/// Keep the `app`/`dalvik` top-level trees out of the encrypted bucket,
	/// the way a userdata backup wants them.
	pub userdata_encryption: bool,

	/// External stream sink. Replaces the on-disk archive family and
	/// disables splitting; cannot be combined with encryption.
	pub stream: Option<PathBuf>,

	/// Per-archive uncompressed-byte ceiling for the splitter.
	pub split_ceiling: u64,
}

impl BackupJob {
	pub fn new(source_dir: PathBuf, archive_base: PathBuf) -> Self {
		Self {
			source_dir,
			archive_base,
			total_size_hint: 0,
			compression: false,
			passphrase: None,
			userdata_encryption: false,
			stream: None,
			split_ceiling: DEFAULT_SPLIT_CEILING,
		}
	}

	pub fn with_compression(mut self, compression: bool) -> Self {
		self.compression = compression;
		self
	}

	pub fn with_passphrase(mut self, passphrase: SecretString) -> Self {
		self.passphrase = Some(passphrase);
		self
	}

	pub fn with_userdata_encryption(mut self, userdata: bool) -> Self {
		self.userdata_encryption = userdata;
		self
	}

	pub fn with_stream(mut self, stream: PathBuf) -> Self {
		self.stream = Some(stream);
		self
	}

	pub fn with_split_ceiling(mut self, bytes: u64) -> Self {
		self.split_ceiling = bytes;
		self
	}

	pub fn with_size_hint(mut self, bytes: u64) -> Self {
		self.total_size_hint = bytes;
		self
	}

	/// The kind every archive written by this job will have.
	pub fn kind(&self) -> ArchiveKind {
		ArchiveKind::from_flags(self.compression, self.passphrase.is_some())
	}
}

/// Immutable configuration for one restore run.
#[derive(Debug, Clone)]
pub struct RestoreJob {
	/// Archive path, or the family base path for split backups.
	pub archive: PathBuf,

	/// Directory to restore into.
	pub target_dir: PathBuf,

	/// Passphrase for encrypted archives.
	pub passphrase: Option<SecretString>,

	/// External stream source instead of on-disk archives.
	pub stream: Option<PathBuf>,
}

impl RestoreJob {
	pub fn new(archive: PathBuf, target_dir: PathBuf) -> Self {
		Self {
			archive,
			target_dir,
			passphrase: None,
			stream: None,
		}
	}

	pub fn with_passphrase(mut self, passphrase: SecretString) -> Self {
		self.passphrase = Some(passphrase);
		self
	}

	pub fn with_stream(mut self, stream: PathBuf) -> Self {
		self.stream = Some(stream);
		self
	}
}
