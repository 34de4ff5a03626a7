//! Per-filesystem online resize ioctls.
//!
//! Each supported filesystem maps to one [`Resizer`]; adding a filesystem means adding a
//! row to [`RESIZERS`].

use crate::fs_kind::FsKind;
use crate::{HalError, HalResult};
use std::os::fd::RawFd;

const BTRFS_PATH_NAME_MAX: usize = 4087;

/// `struct xfs_growfs_data`
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XfsGrowfsData {
    pub newblocks: u64,
    pub imaxpct: u32,
}

/// `struct btrfs_ioctl_vol_args`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct BtrfsVolArgs {
    pub fd: i64,
    pub name: [u8; BTRFS_PATH_NAME_MAX + 1],
}

impl BtrfsVolArgs {
    /// Arguments asking btrfs to grow its single device to the whole device.
    pub fn max() -> Self {
        let mut name = [0u8; BTRFS_PATH_NAME_MAX + 1];
        name[..3].copy_from_slice(b"max");
        Self { fd: 0, name }
    }
}

nix::ioctl_write_ptr!(ext4_resize_fs, b'f', 16, u64);
nix::ioctl_write_ptr!(xfs_growfs_data, b'X', 110, XfsGrowfsData);
nix::ioctl_write_ptr!(btrfs_resize, 0x94, 3, BtrfsVolArgs);

/// A filesystem's resize entry point.
pub struct Resizer {
    /// Name of the ioctl, for error reporting.
    pub request: &'static str,
    pub kinds: &'static [FsKind],
    /// Grow the filesystem whose mountpoint `fd` is open on to `blocks` blocks.
    pub grow: fn(fd: RawFd, blocks: u64) -> nix::Result<()>,
}

pub const RESIZERS: &[Resizer] = &[
    Resizer {
        request: "EXT4_IOC_RESIZE_FS",
        kinds: &[FsKind::Ext2, FsKind::Ext3, FsKind::Ext4],
        grow: grow_ext4,
    },
    Resizer {
        request: "XFS_IOC_FSGROWFSDATA",
        kinds: &[FsKind::Xfs],
        grow: grow_xfs,
    },
    Resizer {
        request: "BTRFS_IOC_RESIZE",
        kinds: &[FsKind::Btrfs],
        grow: grow_btrfs,
    },
];

pub fn resizer_for(kind: FsKind) -> HalResult<&'static Resizer> {
    RESIZERS
        .iter()
        .find(|r| r.kinds.contains(&kind))
        .ok_or_else(|| HalError::UnsupportedResize(format!("no online resize for {}", kind)))
}

pub fn supports(kind: FsKind) -> bool {
    resizer_for(kind).is_ok()
}

fn grow_ext4(fd: RawFd, blocks: u64) -> nix::Result<()> {
    // SAFETY: the kernel reads one u64 from the pointer, which outlives the call.
    unsafe { ext4_resize_fs(fd, &blocks) }.map(drop)
}

fn grow_xfs(fd: RawFd, blocks: u64) -> nix::Result<()> {
    let args = XfsGrowfsData {
        newblocks: blocks,
        imaxpct: 0,
    };
    // SAFETY: `args` has the kernel's layout and outlives the call.
    unsafe { xfs_growfs_data(fd, &args) }.map(drop)
}

fn grow_btrfs(fd: RawFd, _blocks: u64) -> nix::Result<()> {
    let args = BtrfsVolArgs::max();
    // SAFETY: `args` has the kernel's layout and outlives the call.
    unsafe { btrfs_resize(fd, &args) }.map(drop)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::size_of;

    #[test]
    fn ext_kinds_share_the_ext4_path() {
        for kind in [FsKind::Ext2, FsKind::Ext3, FsKind::Ext4] {
            assert_eq!(resizer_for(kind).unwrap().request, "EXT4_IOC_RESIZE_FS");
        }
        assert_eq!(resizer_for(FsKind::Xfs).unwrap().request, "XFS_IOC_FSGROWFSDATA");
        assert_eq!(resizer_for(FsKind::Btrfs).unwrap().request, "BTRFS_IOC_RESIZE");
    }

    #[test]
    fn fat_and_swap_cannot_grow_online() {
        for kind in [FsKind::Vfat, FsKind::Fat32, FsKind::Swap] {
            assert!(!supports(kind));
            assert!(matches!(
                resizer_for(kind),
                Err(HalError::UnsupportedResize(_))
            ));
        }
    }

    #[test]
    fn argument_layouts_match_kernel_structs() {
        assert_eq!(size_of::<XfsGrowfsData>(), 16);
        assert_eq!(size_of::<BtrfsVolArgs>(), 4096);
    }

    #[test]
    fn btrfs_asks_for_max() {
        let args = BtrfsVolArgs::max();
        assert_eq!(&args.name[..4], b"max\0");
        assert!(args.name[4..].iter().all(|b| *b == 0));
    }

    #[test]
    fn every_kind_has_at_most_one_resizer() {
        for kind in FsKind::ALL {
            let count = RESIZERS.iter().filter(|r| r.kinds.contains(&kind)).count();
            assert!(count <= 1, "{kind} has {count} resizers");
        }
    }
}
