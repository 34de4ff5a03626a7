//! Helpers related to block devices in sysfs.

use crate::{HalError, HalResult};
use std::fs;
use std::path::Path;

pub fn device_basename(path: &Path) -> HalResult<String> {
    let name = path
        .file_name()
        .ok_or_else(|| HalError::NotFound(format!("invalid device path {}", path.display())))?
        .to_string_lossy()
        .to_string();
    Ok(name)
}

/// Name of the disk owning block device `name`.
///
/// `sys_class_block` is the (possibly re-rooted) `/sys/class/block` directory. Each entry
/// links into the device tree; a partition carries a `partition` attribute and sits
/// directly below its disk. Whole disks resolve to themselves.
pub fn parent_disk_name(sys_class_block: &Path, name: &str) -> HalResult<String> {
    let entry = sys_class_block.join(name);
    if !entry.exists() {
        return Err(HalError::NotFound(format!(
            "block device {} not present in {}",
            name,
            sys_class_block.display()
        )));
    }
    if !entry.join("partition").exists() {
        return Ok(name.to_string());
    }

    let canonical = fs::canonicalize(&entry)?;
    let parent = canonical
        .parent()
        .ok_or_else(|| HalError::NotFound(format!("no parent disk for {}", name)))?;
    device_basename(parent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;
    use tempfile::tempdir;

    #[test]
    fn device_basename_extracts_filename() {
        assert_eq!(device_basename(Path::new("/dev/sda")).unwrap(), "sda");
    }

    #[test]
    fn partition_resolves_to_parent_disk() {
        let tmp = tempdir().unwrap();
        let devices = tmp.path().join("devices/pci0/block/vda");
        fs::create_dir_all(devices.join("vda2")).unwrap();
        fs::write(devices.join("vda2/partition"), "2\n").unwrap();

        let class = tmp.path().join("class/block");
        fs::create_dir_all(&class).unwrap();
        symlink(devices.join("vda2"), class.join("vda2")).unwrap();
        symlink(&devices, class.join("vda")).unwrap();

        assert_eq!(parent_disk_name(&class, "vda2").unwrap(), "vda");
        assert_eq!(parent_disk_name(&class, "vda").unwrap(), "vda");
    }

    #[test]
    fn missing_entry_is_not_found() {
        let tmp = tempdir().unwrap();
        let err = parent_disk_name(tmp.path(), "sdz1").unwrap_err();
        assert!(matches!(err, HalError::NotFound(_)));
    }
}
