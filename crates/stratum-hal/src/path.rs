use std::path::{Path, PathBuf};

/// Partition path helper for block devices.
///
/// Disks whose name ends in a digit (nvme0n1, mmcblk0, loop0) get a `p` separator.
pub fn partition_path(disk: &Path, num: u32) -> PathBuf {
    let raw = disk.to_string_lossy();
    if raw.ends_with(|c: char| c.is_ascii_digit()) {
        PathBuf::from(format!("{}p{}", raw, num))
    } else {
        PathBuf::from(format!("{}{}", raw, num))
    }
}
