use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::exclude::Exclusions;

/// What a walked entry is, as far as archival is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
	Dir,
	File,
	Symlink,
}

/// One filesystem entry produced by the walker.
#[derive(Debug, Clone)]
pub struct WalkedEntry {
	pub path: PathBuf,
	pub kind: EntryKind,
	/// Regular-file size in bytes; zero for directories and symlinks.
	pub size: u64,
}

/// Walk `root` depth-first and feed every entry to `emit`.
///
/// Directories come before their contents, symlinks are not followed, and
/// anything that is neither a directory, regular file nor symlink (block and
/// character specials, fifos, sockets) is skipped silently. An excluded path
/// prunes its whole subtree. Traversal failures surface once, as
/// [`Error::Partition`] for the directory that could not be read.
pub fn walk_subtree(
	root: &Path,
	exclusions: &Exclusions,
	include_root: bool,
	emit: &mut dyn FnMut(WalkedEntry) -> Result<()>,
) -> Result<()> {
	let min_depth = usize::from(!include_root);
	let walker = WalkDir::new(root)
		.follow_links(false)
		.min_depth(min_depth)
		.sort_by_file_name()
		.into_iter()
		.filter_entry(|entry| !exclusions.is_excluded(entry.path()));

	for entry in walker {
		let entry = entry.map_err(|err| {
			let path = err
				.path()
				.map(Path::to_path_buf)
				.unwrap_or_else(|| root.to_path_buf());
			Error::Partition {
				path,
				source: err.into(),
			}
		})?;

		let file_type = entry.file_type();
		let kind = if file_type.is_dir() {
			EntryKind::Dir
		} else if file_type.is_file() {
			EntryKind::File
		} else if file_type.is_symlink() {
			EntryKind::Symlink
		} else {
			continue;
		};

		let size = if kind == EntryKind::File {
			entry
				.metadata()
				.map_err(|err| Error::Partition {
					path: entry.path().to_path_buf(),
					source: err.into(),
				})?
				.len()
		} else {
			0
		};

		emit(WalkedEntry {
			path: entry.into_path(),
			kind,
			size,
		})?;
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	use std::fs;
	use std::os::unix::fs::symlink;

	use super::*;

	fn collect(root: &Path, exclusions: &Exclusions, include_root: bool) -> Vec<WalkedEntry> {
		let mut out = Vec::new();
		walk_subtree(root, exclusions, include_root, &mut |entry| {
			out.push(entry);
			Ok(())
		})
		.unwrap();
		out
	}

	#[test]
	fn dirs_come_before_their_contents() {
		let tmp = tempfile::tempdir().unwrap();
		let root = tmp.path();
		fs::create_dir(root.join("a")).unwrap();
		fs::write(root.join("a/f1"), b"one").unwrap();
		fs::create_dir(root.join("b")).unwrap();
		fs::write(root.join("b/f2"), b"two").unwrap();
		symlink("/target", root.join("b/link")).unwrap();

		let entries = collect(root, &Exclusions::default(), false);
		let names: Vec<_> = entries
			.iter()
			.map(|e| e.path.strip_prefix(root).unwrap().to_path_buf())
			.collect();
		let expected: Vec<PathBuf> =
			["a", "a/f1", "b", "b/f2", "b/link"].into_iter().map(PathBuf::from).collect();
		assert_eq!(names, expected);
		assert_eq!(entries[0].kind, EntryKind::Dir);
		assert_eq!(entries[1].kind, EntryKind::File);
		assert_eq!(entries[1].size, 3);
		assert_eq!(entries[4].kind, EntryKind::Symlink);
	}

	#[test]
	fn excluded_subtree_is_pruned() {
		let tmp = tempfile::tempdir().unwrap();
		let root = tmp.path();
		fs::create_dir(root.join("keep")).unwrap();
		fs::create_dir(root.join("skip")).unwrap();
		fs::write(root.join("keep/f"), b"x").unwrap();
		fs::write(root.join("skip/f"), b"x").unwrap();

		let excl = Exclusions::new([root.join("skip")]);
		let entries = collect(root, &excl, false);
		assert!(entries.iter().all(|e| !e.path.starts_with(root.join("skip"))));
		assert_eq!(entries.len(), 2);
	}

	#[test]
	fn include_root_emits_the_root_itself() {
		let tmp = tempfile::tempdir().unwrap();
		let root = tmp.path().join("top");
		fs::create_dir(&root).unwrap();
		fs::write(root.join("f"), b"x").unwrap();

		let entries = collect(&root, &Exclusions::default(), true);
		assert_eq!(entries[0].path, root);
		assert_eq!(entries[0].kind, EntryKind::Dir);
		assert_eq!(entries.len(), 2);
	}
}
