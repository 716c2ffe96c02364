//! # Spill-File Naming
//!
//! [`SpillFiles`] maps a page index to the on-disk path backing that page.
//! It only names files; creation, truncation, and unlinking belong to the
//! page store.
//!
//! Paths have the form `<dir>/petabuf.<pid>.<idx>`. The pid component keeps
//! concurrent instances sharing a scratch directory from clobbering each
//! other's pages; within one process, repeated calls with the same index
//! always return the same path. Files that outlive the process (abnormal
//! termination) are left behind and can be matched by the prefix.

use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct SpillFiles {
    dir: PathBuf,
    prefix: String,
}

impl SpillFiles {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            prefix: format!("petabuf.{}", std::process::id()),
        }
    }

    /// Path of the spill file for page `idx`. Stable for the lifetime of
    /// the process.
    pub fn path(&self, idx: u32) -> PathBuf {
        self.dir.join(format!("{}.{}", self.prefix, idx))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_are_stable() {
        let spill = SpillFiles::new("/tmp");
        assert_eq!(spill.path(7), spill.path(7));
    }

    #[test]
    fn test_paths_are_unique_per_index() {
        let spill = SpillFiles::new("/tmp");
        assert_ne!(spill.path(0), spill.path(1));
        assert_ne!(spill.path(1), spill.path(10));
    }

    #[test]
    fn test_paths_live_under_the_scratch_dir() {
        let spill = SpillFiles::new("/var/scratch");
        assert!(spill.path(3).starts_with("/var/scratch"));
    }

    #[test]
    fn test_paths_carry_the_process_id() {
        let spill = SpillFiles::new("/tmp");
        let name = spill.path(0).file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.contains(&std::process::id().to_string()));
    }
}
