use std::fs;
use std::path::{Path, PathBuf};

use tarpool::split::archive_name;
use tarpool::{
	backup, pipeline, probe, progress_channel, restore, ArchiveKind, BackupJob, CancelToken,
	Error, Exclusions, RestoreJob,
};
use tempfile::TempDir;

fn run_backup(job: &BackupJob) {
	let (sink, _events) = progress_channel();
	backup(job, &Exclusions::default(), &sink, &CancelToken::new()).unwrap();
}

fn run_restore(job: &RestoreJob) {
	let (sink, _events) = progress_channel();
	restore(job, &sink, &CancelToken::new()).unwrap();
}

fn entry_names(path: &Path) -> Vec<String> {
	let kind = probe::detect_kind(path, None).unwrap();
	pipeline::open_archive(path, kind, None)
		.unwrap()
		.entry_names()
		.unwrap()
		.into_iter()
		.map(|name| {
			name.to_string_lossy()
				.trim_end_matches('/')
				.to_string()
		})
		.collect()
}

#[test]
fn splitting_rotates_at_the_ceiling() {
	let tmp = TempDir::new().unwrap();
	let source = tmp.path().join("src");
	fs::create_dir_all(source.join("a")).unwrap();
	fs::write(source.join("a/f1"), vec![b'1'; 1024]).unwrap();
	fs::write(source.join("a/f2"), vec![b'2'; 1024]).unwrap();
	fs::create_dir_all(source.join("b")).unwrap();
	fs::write(source.join("b/f3"), vec![b'3'; 2048]).unwrap();
	let base = tmp.path().join("data.tar");

	run_backup(&BackupJob::new(source.clone(), base.clone()).with_split_ceiling(1500));

	// 4096 bytes over a 1500-byte ceiling: three archives, directories
	// travelling with the file that pulled them in.
	assert!(!base.exists());
	assert_eq!(entry_names(&archive_name(&base, 0, 0)), ["a", "a/f1"]);
	assert_eq!(entry_names(&archive_name(&base, 0, 1)), ["a/f2"]);
	assert_eq!(entry_names(&archive_name(&base, 0, 2)), ["b", "b/f3"]);
	assert!(!archive_name(&base, 0, 3).exists());

	let target = tmp.path().join("restored");
	run_restore(&RestoreJob::new(base, target.clone()));
	assert_eq!(fs::read(target.join("a/f1")).unwrap(), vec![b'1'; 1024]);
	assert_eq!(fs::read(target.join("a/f2")).unwrap(), vec![b'2'; 1024]);
	assert_eq!(fs::read(target.join("b/f3")).unwrap(), vec![b'3'; 2048]);
}

#[test]
fn backup_below_the_ceiling_stays_single() {
	let tmp = TempDir::new().unwrap();
	let source = tmp.path().join("src");
	fs::create_dir_all(&source).unwrap();
	fs::write(source.join("small"), vec![b's'; 128]).unwrap();
	let base = tmp.path().join("data.tar");

	run_backup(&BackupJob::new(source, base.clone()).with_split_ceiling(1 << 20));

	assert!(base.exists());
	assert!(!archive_name(&base, 0, 0).exists());
	assert_eq!(probe::detect_kind(&base, None).unwrap(), ArchiveKind::Uncompressed);
}

#[test]
fn family_discovery_stops_at_the_first_absent_worker() {
	let tmp = TempDir::new().unwrap();

	let source_one = tmp.path().join("one");
	fs::create_dir_all(source_one.join("a")).unwrap();
	fs::write(source_one.join("a/f1"), vec![b'1'; 1024]).unwrap();
	fs::write(source_one.join("a/f2"), vec![b'2'; 1024]).unwrap();
	let base = tmp.path().join("data.tar");
	run_backup(&BackupJob::new(source_one, base.clone()).with_split_ceiling(600));

	let source_two = tmp.path().join("two");
	fs::create_dir_all(source_two.join("c")).unwrap();
	fs::write(source_two.join("c/g1"), vec![b'g'; 512]).unwrap();
	let other = tmp.path().join("other.tar");
	run_backup(&BackupJob::new(source_two, other.clone()).with_split_ceiling(100));

	// Plant the second backup's archive at worker 3, leaving a gap at 1
	// and 2. The scan must stop at the gap and never reach it.
	fs::rename(archive_name(&other, 0, 0), archive_name(&base, 3, 0)).unwrap();

	// The size query follows the same scan, so it only counts what a
	// restore will extract.
	let within_scan = fs::metadata(archive_name(&base, 0, 0)).unwrap().len()
		+ fs::metadata(archive_name(&base, 0, 1)).unwrap().len();
	assert_eq!(probe::family_restore_size(&base, None).unwrap(), within_scan);

	let target = tmp.path().join("restored");
	run_restore(&RestoreJob::new(base, target.clone()));
	assert!(target.join("a/f1").exists());
	assert!(target.join("a/f2").exists());
	assert!(!target.join("c").exists());
}

#[test]
fn too_many_archives_fails_the_worker() {
	let tmp = TempDir::new().unwrap();
	let source = tmp.path().join("src");
	fs::create_dir_all(&source).unwrap();
	for i in 0..120 {
		fs::write(source.join(format!("f{i:03}")), b"xx").unwrap();
	}
	let base = tmp.path().join("data.tar");

	let (sink, _events) = progress_channel();
	let job = BackupJob::new(source, base).with_split_ceiling(1);
	let err = backup(&job, &Exclusions::default(), &sink, &CancelToken::new()).unwrap_err();
	assert!(
		matches!(err, Error::TooManyArchives { worker: 0 }),
		"got {err:?}"
	);
}

#[test]
fn sidecar_metadata_round_trips() {
	use tarpool::sidecar::{sidecar_path, BackupInfo};

	let tmp = TempDir::new().unwrap();
	let base: PathBuf = tmp.path().join("data.tar");
	let info = BackupInfo {
		backup_size: 4096,
		backup_type: ArchiveKind::Compressed,
		file_count: 3,
	};
	let path = sidecar_path(&base);
	info.write_to(&path).unwrap();
	assert_eq!(BackupInfo::read_from(&path).unwrap(), info);
}
