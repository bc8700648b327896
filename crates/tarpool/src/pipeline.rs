use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::iter;
use std::path::{Path, PathBuf};

use age::secrecy::SecretString;
use age::stream::{StreamReader, StreamWriter};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::debug;

use crate::archive::{ArchiveReader, ArchiveWriter};
use crate::error::{Error, Result};
use crate::job::ArchiveKind;

/// Which filter stages sit between the archive writer and the sink.
#[derive(Debug, Clone)]
pub struct PipelineSpec {
	pub compression: bool,
	pub passphrase: Option<SecretString>,
}

impl PipelineSpec {
	pub fn kind(&self) -> ArchiveKind {
		ArchiveKind::from_flags(self.compression, self.passphrase.is_some())
	}
}

/// The four writer stacks. Filters run in-process but keep the stage
/// boundaries of the subprocess design: each stage is torn down separately
/// and fails separately.
enum Writer {
	Plain(ArchiveWriter<File>),
	Compressed(ArchiveWriter<GzEncoder<File>>),
	Encrypted(ArchiveWriter<StreamWriter<File>>),
	CompressedEncrypted(ArchiveWriter<GzEncoder<StreamWriter<File>>>),
}

enum Dest {
	Disk(PathBuf),
	Stream,
}

/// A live worker pipeline: `tar records → [gzip] → [age] → sink`.
pub struct Pipeline {
	writer: Writer,
	dest: Dest,
}

impl Pipeline {
	/// Create a fresh on-disk archive. Refuses to overwrite an existing
	/// file.
	pub fn create(path: &Path, spec: &PipelineSpec) -> Result<Self> {
		let file = File::create_new(path).map_err(|source| Error::Io {
			path: path.to_path_buf(),
			source,
		})?;
		debug!(archive = %path.display(), kind = ?spec.kind(), "opened archive pipeline");
		Self::assemble(file, spec, Dest::Disk(path.to_path_buf()))
	}

	/// Wrap an already-open external stream sink.
	pub fn for_stream(sink: File, spec: &PipelineSpec) -> Result<Self> {
		debug!(kind = ?spec.kind(), "opened stream pipeline");
		Self::assemble(sink, spec, Dest::Stream)
	}

	/// Build the whole stack or nothing: a stage that cannot be set up
	/// tears the sink down with it.
	fn assemble(sink: File, spec: &PipelineSpec, dest: Dest) -> Result<Self> {
		let writer = match (&spec.passphrase, spec.compression) {
			(None, false) => Writer::Plain(ArchiveWriter::new(sink)),
			(None, true) => Writer::Compressed(ArchiveWriter::new(GzEncoder::new(
				sink,
				Compression::default(),
			))),
			(Some(pass), false) => Writer::Encrypted(ArchiveWriter::new(encrypt_writer(sink, pass)?)),
			(Some(pass), true) => Writer::CompressedEncrypted(ArchiveWriter::new(GzEncoder::new(
				encrypt_writer(sink, pass)?,
				Compression::default(),
			))),
		};
		Ok(Self { writer, dest })
	}

	pub fn append(&mut self, path: &Path, name: &Path) -> Result<()> {
		let result = match &mut self.writer {
			Writer::Plain(w) => w.append_entry(path, name),
			Writer::Compressed(w) => w.append_entry(path, name),
			Writer::Encrypted(w) => w.append_entry(path, name),
			Writer::CompressedEncrypted(w) => w.append_entry(path, name),
		};
		result.map_err(|source| Error::Archive {
			path: path.to_path_buf(),
			source,
		})
	}

	/// Close every stage innermost-out: archive end marker, then each
	/// filter, then the sink. On-disk archives are validated non-empty.
	/// Returns the sink file for stream destinations so the caller can
	/// frame it.
	pub fn finish(self) -> Result<Option<File>> {
		let Pipeline { writer, dest } = self;
		let file = match writer {
			Writer::Plain(w) => close_archive(w, &dest)?,
			Writer::Compressed(w) => {
				let gz = close_archive(w, &dest)?;
				gz.finish().map_err(|source| Error::Filter {
					stage: "compress",
					source,
				})?
			}
			Writer::Encrypted(w) => {
				let cipher = close_archive(w, &dest)?;
				cipher.finish().map_err(|source| Error::Filter {
					stage: "cipher",
					source,
				})?
			}
			Writer::CompressedEncrypted(w) => {
				let gz = close_archive(w, &dest)?;
				let cipher = gz.finish().map_err(|source| Error::Filter {
					stage: "compress",
					source,
				})?;
				cipher.finish().map_err(|source| Error::Filter {
					stage: "cipher",
					source,
				})?
			}
		};
		match dest {
			Dest::Disk(path) => {
				file.sync_all().map_err(|source| Error::Io {
					path: path.clone(),
					source,
				})?;
				let len = file.metadata().map_err(|source| Error::Io {
					path: path.clone(),
					source,
				})?
				.len();
				drop(file);
				if len == 0 {
					return Err(Error::EmptyArchive { path });
				}
				debug!(archive = %path.display(), bytes = len, "closed archive");
				Ok(None)
			}
			Dest::Stream => Ok(Some(file)),
		}
	}
}

fn close_archive<W: Write>(writer: ArchiveWriter<W>, dest: &Dest) -> Result<W> {
	writer.finish().map_err(|source| Error::Archive {
		path: dest_path(dest),
		source,
	})
}

fn dest_path(dest: &Dest) -> PathBuf {
	match dest {
		Dest::Disk(path) => path.clone(),
		Dest::Stream => PathBuf::from("<stream>"),
	}
}

fn encrypt_writer(sink: File, passphrase: &SecretString) -> Result<StreamWriter<File>> {
	let recipient = age::scrypt::Recipient::new(passphrase.clone());
	let encryptor = age::Encryptor::with_recipients(iter::once(&recipient as &dyn age::Recipient))
		.map_err(|err| Error::PipelineSetup(err.to_string()))?;
	encryptor
		.wrap_output(sink)
		.map_err(|err| Error::PipelineSetup(err.to_string()))
}

/// Open an archive through the reader pipeline selected by `kind`.
pub fn open_archive(
	path: &Path,
	kind: ArchiveKind,
	passphrase: Option<&SecretString>,
) -> Result<ArchiveReader<Box<dyn Read>>> {
	let file = File::open(path).map_err(|source| Error::Io {
		path: path.to_path_buf(),
		source,
	})?;
	let file = BufReader::new(file);
	let source: Box<dyn Read> = match kind {
		ArchiveKind::Uncompressed => Box::new(file),
		ArchiveKind::Compressed => Box::new(GzDecoder::new(file)),
		ArchiveKind::Encrypted => Box::new(decrypt_reader(file, path, passphrase)?),
		ArchiveKind::CompressedEncrypted => {
			Box::new(GzDecoder::new(decrypt_reader(file, path, passphrase)?))
		}
	};
	Ok(ArchiveReader::new(source, path))
}

/// Open the cipher's reader stage. Distinguishes a wrong passphrase from
/// corrupt data.
pub(crate) fn decrypt_reader(
	source: BufReader<File>,
	path: &Path,
	passphrase: Option<&SecretString>,
) -> Result<StreamReader<BufReader<File>>> {
	let Some(passphrase) = passphrase else {
		return Err(Error::WrongPassword {
			path: path.to_path_buf(),
		});
	};
	let decryptor = age::Decryptor::new(source).map_err(|_| Error::Decrypt {
		path: path.to_path_buf(),
	})?;
	let identity = age::scrypt::Identity::new(passphrase.clone());
	decryptor
		.decrypt(iter::once(&identity as &dyn age::Identity))
		.map_err(|err| match err {
			age::DecryptError::NoMatchingKeys | age::DecryptError::DecryptionFailed => {
				Error::WrongPassword {
					path: path.to_path_buf(),
				}
			}
			_ => Error::Decrypt {
				path: path.to_path_buf(),
			},
		})
}
