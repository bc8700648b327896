use std::fs::{self, File};
use std::io::{Read as _, Seek as _, SeekFrom};

use tarpool::stream::{read_stream_header, STREAM_TRAILER_MAGIC};
use tarpool::{
	backup, progress_channel, restore, BackupJob, CancelToken, Error, Exclusions, RestoreJob,
	SecretString,
};
use tempfile::TempDir;

#[test]
fn stream_backup_is_framed_and_restores() {
	let tmp = TempDir::new().unwrap();
	let source = tmp.path().join("src");
	fs::create_dir_all(source.join("a")).unwrap();
	fs::write(source.join("a/f1"), vec![b'1'; 1024]).unwrap();
	fs::write(source.join("a/f2"), vec![b'2'; 4096]).unwrap();
	let stream_path = tmp.path().join("pipe");

	let job = BackupJob::new(source, tmp.path().join("data.tar"))
		.with_compression(true)
		.with_stream(stream_path.clone());
	let (sink, _events) = progress_channel();
	backup(&job, &Exclusions::default(), &sink, &CancelToken::new()).unwrap();

	// Filename header up front, EOF marker at the end.
	let mut file = File::open(&stream_path).unwrap();
	let header = read_stream_header(&mut file).unwrap();
	assert_eq!(header.name, "data.tar");
	assert!(header.compressed);
	assert_eq!(header.total_size, 1024 + 4096);

	file.seek(SeekFrom::End(-(STREAM_TRAILER_MAGIC.len() as i64))).unwrap();
	let mut trailer = [0u8; 8];
	file.read_exact(&mut trailer).unwrap();
	assert_eq!(trailer, STREAM_TRAILER_MAGIC);

	let target = tmp.path().join("restored");
	let job = RestoreJob::new(tmp.path().join("data.tar"), target.clone())
		.with_stream(stream_path);
	let (sink, events) = progress_channel();
	restore(&job, &sink, &CancelToken::new()).unwrap();
	drop(sink);

	assert_eq!(fs::read(target.join("a/f1")).unwrap(), vec![b'1'; 1024]);
	assert_eq!(fs::read(target.join("a/f2")).unwrap(), vec![b'2'; 4096]);
	let restored: u64 = events.iter().map(|e| e.to_wire()).sum();
	assert!(restored >= 1024 + 4096);
}

#[test]
fn stream_mode_rejects_encryption() {
	let tmp = TempDir::new().unwrap();
	let source = tmp.path().join("src");
	fs::create_dir_all(&source).unwrap();

	let job = BackupJob::new(source, tmp.path().join("data.tar"))
		.with_passphrase(SecretString::from("hunter2"))
		.with_stream(tmp.path().join("pipe"));
	let (sink, _events) = progress_channel();
	let err = backup(&job, &Exclusions::default(), &sink, &CancelToken::new()).unwrap_err();
	assert!(matches!(err, Error::PipelineSetup(_)), "got {err:?}");
}
