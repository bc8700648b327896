use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Path-exclusion predicate: a list of roots to leave out of a backup.
///
/// A match excludes the entire subtree, and an excluded subtree contributes
/// nothing to any size calculation.
#[derive(Debug, Clone, Default)]
pub struct Exclusions {
	roots: Vec<PathBuf>,
}

impl Exclusions {
	pub fn new(roots: impl IntoIterator<Item = PathBuf>) -> Self {
		Self {
			roots: roots.into_iter().collect(),
		}
	}

	/// Whether `path`, or an ancestor of it, is excluded.
	pub fn is_excluded(&self, path: &Path) -> bool {
		self.roots.iter().any(|root| path.starts_with(root))
	}

	/// Regular-file bytes under `path`, honoring exclusions.
	///
	/// Entries that cannot be read count as zero; the sizing pass should
	/// not fail where the assignment pass might still succeed.
	pub fn tree_size(&self, path: &Path) -> u64 {
		if self.is_excluded(path) {
			return 0;
		}
		let walker = WalkDir::new(path)
			.follow_links(false)
			.into_iter()
			.filter_entry(|entry| !self.is_excluded(entry.path()));
		let mut total = 0u64;
		for entry in walker {
			let Ok(entry) = entry else { continue };
			if entry.file_type().is_file() {
				if let Ok(meta) = entry.metadata() {
					total += meta.len();
				}
			}
		}
		total
	}
}

#[cfg(test)]
mod tests {
	use std::fs;

	use super::*;

	#[test]
	fn excludes_whole_subtrees() {
		let excl = Exclusions::new([PathBuf::from("/data/cache")]);
		assert!(excl.is_excluded(Path::new("/data/cache")));
		assert!(excl.is_excluded(Path::new("/data/cache/deep/file")));
		assert!(!excl.is_excluded(Path::new("/data/cachet")));
		assert!(!excl.is_excluded(Path::new("/data")));
	}

	#[test]
	fn tree_size_skips_excluded_and_counts_files() {
		let tmp = tempfile::tempdir().unwrap();
		let root = tmp.path();
		fs::create_dir(root.join("keep")).unwrap();
		fs::create_dir(root.join("drop")).unwrap();
		fs::write(root.join("keep/a"), vec![0u8; 100]).unwrap();
		fs::write(root.join("drop/b"), vec![0u8; 900]).unwrap();

		let excl = Exclusions::new([root.join("drop")]);
		assert_eq!(excl.tree_size(root), 100);
		assert_eq!(excl.tree_size(&root.join("drop")), 0);
	}
}
