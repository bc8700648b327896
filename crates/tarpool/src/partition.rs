use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::exclude::Exclusions;
use crate::job::MAX_WORKERS;
use crate::walk::{walk_subtree, EntryKind};

/// One archive entry, tagged with the worker that will write it.
#[derive(Debug, Clone)]
pub struct TarEntry {
	pub path: PathBuf,
	pub kind: EntryKind,
	/// Regular-file size in bytes; zero for directories and symlinks.
	pub size: u64,
	pub worker: usize,
}

/// The ordered, worker-partitioned list of everything one backup stores.
///
/// Entries appear in traversal order, directories before their contents.
/// Worker slices are disjoint and together cover every included path.
#[derive(Debug, Default)]
pub struct TarList {
	pub entries: Vec<TarEntry>,
	/// Number of regular files in the list.
	pub file_count: u64,
	/// Total regular-file bytes in the list.
	pub total_bytes: u64,
}

impl TarList {
	/// Worker ids that actually hold entries, ascending.
	pub fn worker_ids(&self) -> Vec<usize> {
		let ids: BTreeSet<usize> = self.entries.iter().map(|e| e.worker).collect();
		ids.into_iter().collect()
	}

	/// The slice of entries one worker is responsible for, in order.
	pub fn slice(&self, worker: usize) -> impl Iterator<Item = &TarEntry> {
		self.entries.iter().filter(move |e| e.worker == worker)
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	fn push(&mut self, path: PathBuf, kind: EntryKind, size: u64, worker: usize) {
		if kind == EntryKind::File {
			self.file_count += 1;
			self.total_bytes += size;
		}
		self.entries.push(TarEntry {
			path,
			kind,
			size,
			worker,
		});
	}
}

/// Cumulative byte counter that advances the worker id whenever the
/// per-worker target is crossed. A zero target never advances.
///
/// The counter is shared across subtrees, so splitting is continuous over
/// the whole assignment pass.
#[derive(Debug)]
struct Accumulator {
	worker: usize,
	accumulated: u64,
	target: u64,
}

impl Accumulator {
	fn new(worker: usize, target: u64) -> Self {
		Self {
			worker,
			accumulated: 0,
			target,
		}
	}

	fn note_file(&mut self, size: u64) {
		self.accumulated += size;
		if self.target > 0 && self.accumulated > self.target {
			self.worker += 1;
			self.accumulated = 0;
		}
	}
}

fn partition_err(path: &Path, source: io::Error) -> Error {
	Error::Partition {
		path: path.to_path_buf(),
		source,
	}
}

fn append_subtree(
	list: &mut TarList,
	root: &Path,
	exclusions: &Exclusions,
	include_root: bool,
	acc: &mut Accumulator,
) -> Result<()> {
	walk_subtree(root, exclusions, include_root, &mut |entry| {
		list.push(entry.path, entry.kind, entry.size, acc.worker);
		if entry.kind == EntryKind::File {
			acc.note_file(entry.size);
		}
		Ok(())
	})
}

/// Build the single-worker list for an unencrypted backup: one depth-first
/// walk, everything assigned to worker 0.
pub fn plain_list(source: &Path, exclusions: &Exclusions) -> Result<TarList> {
	let mut list = TarList::default();
	let mut acc = Accumulator::new(0, 0);
	append_subtree(&mut list, source, exclusions, false, &mut acc)?;
	debug!(
		files = list.file_count,
		bytes = list.total_bytes,
		"built backup list"
	);
	Ok(list)
}

/// The two-bucket plan for an encrypted backup.
#[derive(Debug)]
pub struct EncryptedPlan {
	/// Plaintext bucket, all on worker 0. Empty unless userdata encryption
	/// is on.
	pub regular: TarList,
	/// Encrypted bucket, balanced across workers by cumulative byte count.
	pub encrypted: TarList,
	/// Per-worker byte target used for balancing.
	pub target: u64,
	/// Highest worker id the plan intended to use.
	pub last_worker: usize,
}

impl EncryptedPlan {
	pub fn file_count(&self) -> u64 {
		self.regular.file_count + self.encrypted.file_count
	}

	pub fn total_bytes(&self) -> u64 {
		self.regular.total_bytes + self.encrypted.total_bytes
	}
}

/// Top-level names that stay plaintext when userdata encryption is on.
fn is_plaintext_name(name: &OsStr) -> bool {
	let name = name.to_string_lossy();
	name.starts_with("app") || name.starts_with("dalvik")
}

/// Partition a tree for an encrypted backup: a sizing pass over the top
/// level picks the per-worker target, an assignment pass distributes the
/// subtrees.
///
/// With `userdata` on, worker 0 takes the plaintext bucket and workers
/// `1..=cores` the encrypted one; otherwise the encrypted workers are
/// `0..=cores-1`. `cores` is capped at [`MAX_WORKERS`].
pub fn encrypted_plan(
	source: &Path,
	exclusions: &Exclusions,
	userdata: bool,
) -> Result<EncryptedPlan> {
	let cores = thread::available_parallelism()
		.map(|n| n.get())
		.unwrap_or(1)
		.min(MAX_WORKERS);

	let mut children: Vec<fs::DirEntry> = fs::read_dir(source)
		.map_err(|err| partition_err(source, err))?
		.collect::<io::Result<_>>()
		.map_err(|err| partition_err(source, err))?;
	children.sort_by_key(|child| child.file_name());

	// Sizing pass: how many bytes land in each bucket.
	let mut regular_size = 0u64;
	let mut encrypted_size = 0u64;
	for child in &children {
		let path = child.path();
		if exclusions.is_excluded(&path) {
			continue;
		}
		let file_type = child.file_type().map_err(|err| partition_err(&path, err))?;
		if file_type.is_dir() {
			if userdata && is_plaintext_name(&child.file_name()) {
				regular_size += exclusions.tree_size(&path);
			} else {
				encrypted_size += exclusions.tree_size(&path);
			}
		} else if file_type.is_file() {
			encrypted_size += fs::symlink_metadata(&path)
				.map_err(|err| partition_err(&path, err))?
				.len();
		}
	}

	let target = encrypted_size / cores as u64 + 1;
	let first_worker = usize::from(userdata);
	let last_worker = if userdata { cores } else { cores - 1 };
	debug!(
		cores,
		regular_size, encrypted_size, target, "sized encrypted backup"
	);

	// Assignment pass: distribute the same children over the workers.
	let mut regular = TarList::default();
	let mut encrypted = TarList::default();
	let mut regular_acc = Accumulator::new(0, 0);
	let mut acc = Accumulator::new(first_worker, target);
	for child in &children {
		let path = child.path();
		if exclusions.is_excluded(&path) {
			continue;
		}
		let file_type = child.file_type().map_err(|err| partition_err(&path, err))?;
		if file_type.is_dir() {
			if userdata && is_plaintext_name(&child.file_name()) {
				append_subtree(&mut regular, &path, exclusions, true, &mut regular_acc)?;
			} else {
				append_subtree(&mut encrypted, &path, exclusions, true, &mut acc)?;
			}
		} else if file_type.is_file() {
			let size = fs::symlink_metadata(&path)
				.map_err(|err| partition_err(&path, err))?
				.len();
			encrypted.push(path, EntryKind::File, size, acc.worker);
			acc.note_file(size);
		} else if file_type.is_symlink() {
			encrypted.push(path, EntryKind::Symlink, 0, acc.worker);
		}
	}

	if acc.worker > last_worker {
		warn!(
			assigned = acc.worker,
			planned = last_worker,
			"partitioning overran the planned worker count, continuing"
		);
	}

	Ok(EncryptedPlan {
		regular,
		encrypted,
		target,
		last_worker,
	})
}

#[cfg(test)]
mod tests {
	use std::collections::BTreeSet;

	use super::*;

	fn scenario_tree() -> tempfile::TempDir {
		let tmp = tempfile::tempdir().unwrap();
		let root = tmp.path();
		fs::create_dir(root.join("a")).unwrap();
		fs::write(root.join("a/f1"), vec![b'x'; 1024]).unwrap();
		fs::write(root.join("a/f2"), vec![b'x'; 1024]).unwrap();
		fs::create_dir(root.join("b")).unwrap();
		fs::write(root.join("b/f3"), vec![b'x'; 2048]).unwrap();
		tmp
	}

	#[test]
	fn plain_list_is_one_worker_in_dfs_order() {
		let tmp = scenario_tree();
		let list = plain_list(tmp.path(), &Exclusions::default()).unwrap();

		assert_eq!(list.file_count, 3);
		assert_eq!(list.total_bytes, 4096);
		assert_eq!(list.worker_ids(), vec![0]);

		let names: Vec<_> = list
			.entries
			.iter()
			.map(|e| e.path.strip_prefix(tmp.path()).unwrap().to_path_buf())
			.collect();
		let expected: Vec<PathBuf> =
			["a", "a/f1", "a/f2", "b", "b/f3"].into_iter().map(PathBuf::from).collect();
		assert_eq!(names, expected);
	}

	#[test]
	fn accumulator_splits_on_target() {
		let mut acc = Accumulator::new(0, 1000);
		acc.note_file(600);
		assert_eq!(acc.worker, 0);
		acc.note_file(600);
		assert_eq!(acc.worker, 1);
		assert_eq!(acc.accumulated, 0);
		acc.note_file(1500);
		assert_eq!(acc.worker, 2);
	}

	#[test]
	fn zero_target_never_advances() {
		let mut acc = Accumulator::new(0, 0);
		acc.note_file(u64::MAX / 2);
		assert_eq!(acc.worker, 0);
	}

	#[test]
	fn encrypted_plan_buckets_userdata_names() {
		let tmp = tempfile::tempdir().unwrap();
		let root = tmp.path();
		fs::create_dir(root.join("app")).unwrap();
		fs::write(root.join("app/apk"), vec![b'x'; 512]).unwrap();
		fs::create_dir(root.join("media")).unwrap();
		fs::write(root.join("media/photo"), vec![b'x'; 2048]).unwrap();
		fs::write(root.join("loose"), vec![b'x'; 64]).unwrap();

		let plan = encrypted_plan(root, &Exclusions::default(), true).unwrap();

		assert_eq!(plan.regular.total_bytes, 512);
		assert_eq!(plan.regular.worker_ids(), vec![0]);
		assert_eq!(plan.encrypted.total_bytes, 2048 + 64);
		assert!(plan.encrypted.worker_ids().iter().all(|&id| id >= 1));

		// Coverage: every included path appears exactly once.
		let mut seen = BTreeSet::new();
		for entry in plan.regular.entries.iter().chain(plan.encrypted.entries.iter()) {
			assert!(seen.insert(entry.path.clone()), "duplicate {:?}", entry.path);
		}
		assert!(seen.contains(&root.join("app")));
		assert!(seen.contains(&root.join("media")));
		assert!(seen.contains(&root.join("media/photo")));
		assert!(seen.contains(&root.join("loose")));
	}

	#[test]
	fn encrypted_plan_without_userdata_starts_at_worker_zero() {
		let tmp = scenario_tree();
		let plan = encrypted_plan(tmp.path(), &Exclusions::default(), false).unwrap();
		assert!(plan.regular.is_empty());
		assert_eq!(plan.encrypted.file_count, 3);
		assert_eq!(plan.encrypted.worker_ids().first(), Some(&0));
	}

	#[test]
	fn excluded_subtrees_contribute_nothing() {
		let tmp = scenario_tree();
		let excl = Exclusions::new([tmp.path().join("b")]);
		let list = plain_list(tmp.path(), &excl).unwrap();
		assert_eq!(list.file_count, 2);
		assert_eq!(list.total_bytes, 2048);
		assert!(list.entries.iter().all(|e| !e.path.starts_with(tmp.path().join("b"))));
	}

	#[test]
	fn balance_keeps_workers_near_target() {
		let tmp = tempfile::tempdir().unwrap();
		let root = tmp.path();
		fs::create_dir(root.join("bulk")).unwrap();
		for i in 0..16 {
			fs::write(root.join(format!("bulk/f{i:02}")), vec![b'x'; 1000]).unwrap();
		}

		let plan = encrypted_plan(root, &Exclusions::default(), false).unwrap();
		let ids = plan.encrypted.worker_ids();
		// Every worker but the last crossed the target before advancing.
		for &id in &ids[..ids.len() - 1] {
			let held: u64 = plan.encrypted.slice(id).map(|e| e.size).sum();
			assert!(held > plan.target, "worker {id} held {held} of {}", plan.target);
		}
	}
}
