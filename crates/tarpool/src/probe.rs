use std::fs::{self, File};
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use age::secrecy::SecretString;
use flate2::read::GzDecoder;
use tracing::{debug, instrument};

use crate::error::{Error, Result};
use crate::job::{ArchiveKind, ARCHIVE_SEQ_LIMIT, MAX_WORKERS};
use crate::pipeline::{self, decrypt_reader};
use crate::split::archive_name;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const AGE_MAGIC: &[u8] = b"age-encryption.org/v1";
const TAR_MAGIC: &[u8] = b"ustar";
const TAR_MAGIC_OFFSET: usize = 257;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sniff {
	Gzip,
	Age,
	Tar,
	Other,
}

fn sniff(head: &[u8]) -> Sniff {
	if head.starts_with(&GZIP_MAGIC) {
		Sniff::Gzip
	} else if head.starts_with(AGE_MAGIC) {
		Sniff::Age
	} else if head.len() > TAR_MAGIC_OFFSET && head[TAR_MAGIC_OFFSET..].starts_with(TAR_MAGIC) {
		Sniff::Tar
	} else {
		Sniff::Other
	}
}

fn read_head(path: &Path) -> Result<Vec<u8>> {
	let mut file = File::open(path).map_err(|source| Error::Io {
		path: path.to_path_buf(),
		source,
	})?;
	let mut head = vec![0u8; 512];
	let mut read = 0;
	while read < head.len() {
		let n = file.read(&mut head[read..]).map_err(|source| Error::Io {
			path: path.to_path_buf(),
			source,
		})?;
		if n == 0 {
			break;
		}
		read += n;
	}
	head.truncate(read);
	Ok(head)
}

/// Whether the file carries the cipher's header magic.
pub fn is_encrypted(path: &Path) -> Result<bool> {
	Ok(sniff(&read_head(path)?) == Sniff::Age)
}

/// Work out how an archive's bytes are dressed.
///
/// Compression and plain archives are told apart by file magic. An
/// encrypted file takes a trial decrypt with the supplied passphrase, which
/// also distinguishes a wrong passphrase from corrupt data. Unknown bytes
/// are treated as a plain archive and left for the record reader to reject.
#[instrument(level = "debug", skip(passphrase))]
pub fn detect_kind(path: &Path, passphrase: Option<&SecretString>) -> Result<ArchiveKind> {
	match sniff(&read_head(path)?) {
		Sniff::Gzip => Ok(ArchiveKind::Compressed),
		Sniff::Tar => Ok(ArchiveKind::Uncompressed),
		Sniff::Age => trial_decrypt(path, passphrase),
		Sniff::Other => Ok(ArchiveKind::Uncompressed),
	}
}

/// Decrypt the head of the archive to tell ENCRYPTED from
/// COMPRESSED_ENCRYPTED.
fn trial_decrypt(path: &Path, passphrase: Option<&SecretString>) -> Result<ArchiveKind> {
	let file = File::open(path).map_err(|source| Error::Io {
		path: path.to_path_buf(),
		source,
	})?;
	let mut reader = decrypt_reader(BufReader::new(file), path, passphrase)?;
	let mut head = vec![0u8; 512];
	let mut read = 0;
	while read < head.len() {
		match reader.read(&mut head[read..]) {
			Ok(0) => break,
			Ok(n) => read += n,
			Err(_) => {
				return Err(Error::Decrypt {
					path: path.to_path_buf(),
				})
			}
		}
	}
	head.truncate(read);
	match sniff(&head) {
		Sniff::Gzip => Ok(ArchiveKind::CompressedEncrypted),
		Sniff::Tar => Ok(ArchiveKind::Encrypted),
		// An archive holding nothing but the end marker is all zeros.
		_ if !head.is_empty() && head.iter().all(|&b| b == 0) => Ok(ArchiveKind::Encrypted),
		_ => Err(Error::Decrypt {
			path: path.to_path_buf(),
		}),
	}
}

/// Uncompressed payload size of one archive.
///
/// Plain archives are their on-disk size; gzip records the payload length
/// in its trailer; encrypted-and-compressed archives are decrypted and
/// counted; encrypted-only archives fall back to the on-disk size.
pub fn uncompressed_size(path: &Path, passphrase: Option<&SecretString>) -> Result<u64> {
	let disk_size = |path: &Path| {
		fs::metadata(path)
			.map(|meta| meta.len())
			.map_err(|source| Error::Io {
				path: path.to_path_buf(),
				source,
			})
	};
	match detect_kind(path, passphrase)? {
		ArchiveKind::Uncompressed | ArchiveKind::Encrypted => disk_size(path),
		ArchiveKind::Compressed => gzip_isize(path).map_err(|source| Error::Io {
			path: path.to_path_buf(),
			source,
		}),
		ArchiveKind::CompressedEncrypted => {
			let file = File::open(path).map_err(|source| Error::Io {
				path: path.to_path_buf(),
				source,
			})?;
			let reader = decrypt_reader(BufReader::new(file), path, passphrase)?;
			let mut decoder = GzDecoder::new(reader);
			io::copy(&mut decoder, &mut io::sink()).map_err(|_| Error::Decrypt {
				path: path.to_path_buf(),
			})
		}
	}
}

/// The gzip trailer records the payload length (mod 2^32) in the last four
/// bytes.
fn gzip_isize(path: &Path) -> io::Result<u64> {
	let mut file = File::open(path)?;
	if file.metadata()?.len() < 4 {
		return Ok(0);
	}
	file.seek(SeekFrom::End(-4))?;
	let mut trailer = [0u8; 4];
	file.read_exact(&mut trailer)?;
	Ok(u64::from(u32::from_le_bytes(trailer)))
}

/// Total uncompressed size across a single archive or a whole family.
#[instrument(level = "debug", skip(passphrase))]
pub fn family_restore_size(base: &Path, passphrase: Option<&SecretString>) -> Result<u64> {
	if base.exists() {
		debug!("single archive");
		return uncompressed_size(base, passphrase);
	}
	debug!("multiple archives");
	let mut total = 0u64;
	for worker in 0..=MAX_WORKERS {
		// Families end at the first absent worker id, as on restore; what
		// lies beyond a gap is never extracted and must not be sized.
		if !archive_name(base, worker, 0).exists() {
			break;
		}
		let mut seq = 0u32;
		loop {
			let path = archive_name(base, worker, seq);
			if !path.exists() {
				break;
			}
			total += uncompressed_size(&path, passphrase)?;
			seq += 1;
			if seq > ARCHIVE_SEQ_LIMIT {
				break;
			}
		}
	}
	Ok(total)
}

/// Whether any member of the family carries the cipher's magic, meaning a
/// restore will need the passphrase.
pub fn family_needs_passphrase(base: &Path) -> Result<bool> {
	if base.exists() {
		return is_encrypted(base);
	}
	for worker in 0..=MAX_WORKERS {
		let path = archive_name(base, worker, 0);
		if path.exists() && is_encrypted(&path)? {
			return Ok(true);
		}
	}
	Ok(false)
}

/// Whether the archive stores an entry under `name` (the `entryExists`
/// query of the record contract).
pub fn entry_exists(path: &Path, name: &Path, passphrase: Option<&SecretString>) -> Result<bool> {
	let kind = detect_kind(path, passphrase)?;
	pipeline::open_archive(path, kind, passphrase)?.contains(name)
}

#[cfg(test)]
mod tests {
	use std::io::Write;

	use flate2::write::GzEncoder;
	use flate2::Compression;

	use super::*;

	#[test]
	fn sniffs_known_magics() {
		assert_eq!(sniff(&[0x1f, 0x8b, 0x08]), Sniff::Gzip);
		assert_eq!(sniff(b"age-encryption.org/v1\n-> scrypt"), Sniff::Age);

		let mut tarish = vec![0u8; 512];
		tarish[TAR_MAGIC_OFFSET..TAR_MAGIC_OFFSET + 5].copy_from_slice(b"ustar");
		assert_eq!(sniff(&tarish), Sniff::Tar);

		assert_eq!(sniff(b"plain text"), Sniff::Other);
		assert_eq!(sniff(&[]), Sniff::Other);
	}

	#[test]
	fn gzip_trailer_gives_payload_size() {
		let tmp = tempfile::tempdir().unwrap();
		let path = tmp.path().join("f.gz");
		let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
		encoder.write_all(&vec![b'z'; 12_345]).unwrap();
		encoder.finish().unwrap();

		assert_eq!(gzip_isize(&path).unwrap(), 12_345);
		assert_eq!(detect_kind(&path, None).unwrap(), ArchiveKind::Compressed);
		assert_eq!(uncompressed_size(&path, None).unwrap(), 12_345);
	}

	#[test]
	fn unknown_bytes_default_to_uncompressed() {
		let tmp = tempfile::tempdir().unwrap();
		let path = tmp.path().join("noise");
		fs::write(&path, b"not an archive at all").unwrap();
		assert_eq!(detect_kind(&path, None).unwrap(), ArchiveKind::Uncompressed);
	}
}
