//! Device size and sector size queries.
//!
//! Block devices are asked through ioctls; regular files (disk images) report their
//! length and are treated as 512-byte-sector devices.

use crate::{HalError, HalResult};
use std::fs::File;
use std::os::fd::AsRawFd;
use std::os::unix::fs::FileTypeExt;

pub const DEFAULT_SECTOR_SIZE: u64 = 512;

nix::ioctl_read!(blk_get_size64, 0x12, 114, u64);
nix::ioctl_read_bad!(blk_ssz_get, nix::request_code_none!(0x12, 104), libc::c_int);
nix::ioctl_none!(blk_rr_part, 0x12, 95);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub sector_size: u64,
    pub size_bytes: u64,
}

impl Geometry {
    pub fn total_sectors(&self) -> u64 {
        self.size_bytes / self.sector_size
    }
}

pub fn is_block_device(file: &File) -> HalResult<bool> {
    Ok(file.metadata()?.file_type().is_block_device())
}

pub fn probe(file: &File) -> HalResult<Geometry> {
    let size_bytes = device_size_bytes(file)?;
    let sector_size = if is_block_device(file)? {
        logical_sector_size(file)?
    } else {
        DEFAULT_SECTOR_SIZE
    };
    Ok(Geometry {
        sector_size,
        size_bytes,
    })
}

/// Byte size of the device behind `file`.
pub fn device_size_bytes(file: &File) -> HalResult<u64> {
    if !is_block_device(file)? {
        return Ok(file.metadata()?.len());
    }

    let mut size: u64 = 0;
    // SAFETY: BLKGETSIZE64 writes a single u64 into `size`, which outlives the call.
    unsafe { blk_get_size64(file.as_raw_fd(), &mut size) }.map_err(|source| {
        HalError::Ioctl {
            request: "BLKGETSIZE64",
            source,
        }
    })?;
    Ok(size)
}

fn logical_sector_size(file: &File) -> HalResult<u64> {
    let mut size: libc::c_int = 0;
    // SAFETY: BLKSSZGET writes a single int into `size`, which outlives the call.
    unsafe { blk_ssz_get(file.as_raw_fd(), &mut size) }.map_err(|source| HalError::Ioctl {
        request: "BLKSSZGET",
        source,
    })?;
    u64::try_from(size)
        .ok()
        .filter(|s| *s > 0)
        .ok_or_else(|| HalError::Other(format!("device reported sector size {}", size)))
}

/// Ask the kernel to re-read the partition table of a block device.
///
/// Best-effort: the kernel refuses while partitions of the disk are in use, and the
/// on-disk table is already committed at that point.
pub fn reread_partition_table(file: &File) {
    match is_block_device(file) {
        Ok(true) => {}
        _ => return,
    }
    // SAFETY: BLKRRPART takes no argument.
    if let Err(err) = unsafe { blk_rr_part(file.as_raw_fd()) } {
        log::warn!("kernel did not re-read the partition table: {}", err);
    }
}
