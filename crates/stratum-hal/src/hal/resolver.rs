//! Path resolution for disks addressed through a virtualized filesystem layer.

use std::path::{Path, PathBuf};

pub const BY_LABEL_DIR: &str = "/dev/disk/by-label";
pub const SYS_CLASS_BLOCK: &str = "/sys/class/block";

/// Maps virtual paths (as written in configuration) to real host paths.
pub trait PathResolver {
    fn resolve(&self, path: &Path) -> PathBuf;

    fn exists(&self, path: &Path) -> bool {
        self.resolve(path).exists()
    }
}

/// Identity resolver: virtual paths are host paths.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostFs;

impl PathResolver for HostFs {
    fn resolve(&self, path: &Path) -> PathBuf {
        path.to_path_buf()
    }
}

/// Resolver re-rooting every absolute path under `root`.
#[derive(Debug, Clone)]
pub struct RootedFs {
    root: PathBuf,
}

impl RootedFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl PathResolver for RootedFs {
    fn resolve(&self, path: &Path) -> PathBuf {
        match path.strip_prefix("/") {
            Ok(rel) => self.root.join(rel),
            Err(_) => self.root.join(path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_fs_is_identity() {
        assert_eq!(
            HostFs.resolve(Path::new("/dev/sda")),
            PathBuf::from("/dev/sda")
        );
    }

    #[test]
    fn rooted_fs_prefixes_absolute_and_relative_paths() {
        let fs = RootedFs::new("/tmp/root");
        assert_eq!(
            fs.resolve(Path::new("/dev/sda")),
            PathBuf::from("/tmp/root/dev/sda")
        );
        assert_eq!(
            fs.resolve(Path::new("dev/sdb")),
            PathBuf::from("/tmp/root/dev/sdb")
        );
    }

    #[test]
    fn rooted_fs_exists_checks_under_root() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("dev")).unwrap();
        std::fs::write(tmp.path().join("dev/vda"), b"").unwrap();

        let fs = RootedFs::new(tmp.path());
        assert!(fs.exists(Path::new("/dev/vda")));
        assert!(!fs.exists(Path::new("/dev/vdb")));
    }
}
