use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::job::ArchiveKind;

/// Sidecar metadata recorded next to a finished backup, for consumers that
/// size and label backups without opening the archives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackupInfo {
	/// Bytes reported over the whole backup.
	pub backup_size: u64,
	pub backup_type: ArchiveKind,
	/// Regular files stored.
	pub file_count: u64,
}

/// The sidecar lives at `<base>.info`.
pub fn sidecar_path(base: &Path) -> PathBuf {
	let mut name = base.as_os_str().to_owned();
	name.push(".info");
	PathBuf::from(name)
}

impl BackupInfo {
	pub fn write_to(&self, path: &Path) -> io::Result<()> {
		let body = format!(
			"backup_size={}\nbackup_type={}\nfile_count={}\n",
			self.backup_size,
			self.backup_type.code(),
			self.file_count,
		);
		fs::write(path, body)
	}

	pub fn read_from(path: &Path) -> io::Result<Self> {
		let body = fs::read_to_string(path)?;
		let mut backup_size = None;
		let mut backup_type = None;
		let mut file_count = None;
		for line in body.lines() {
			let Some((key, value)) = line.split_once('=') else {
				continue;
			};
			match key {
				"backup_size" => backup_size = value.parse().ok(),
				"backup_type" => backup_type = value.parse().ok().and_then(ArchiveKind::from_code),
				"file_count" => file_count = value.parse().ok(),
				_ => {}
			}
		}
		match (backup_size, backup_type, file_count) {
			(Some(backup_size), Some(backup_type), Some(file_count)) => Ok(Self {
				backup_size,
				backup_type,
				file_count,
			}),
			_ => Err(io::Error::new(
				io::ErrorKind::InvalidData,
				"incomplete backup info file",
			)),
		}
	}
}
