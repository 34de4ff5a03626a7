//! Filesystem kinds known to the layout engine.

use crate::HalError;
use gpt::partition_types;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FsKind {
    Ext2,
    Ext3,
    Ext4,
    Xfs,
    Btrfs,
    Fat16,
    Fat32,
    Vfat,
    Fat,
    Swap,
}

/// How the format tool for a kind takes its options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsFamily {
    Linux,
    Fat,
}

impl FsKind {
    pub const ALL: [FsKind; 10] = [
        FsKind::Ext2,
        FsKind::Ext3,
        FsKind::Ext4,
        FsKind::Xfs,
        FsKind::Btrfs,
        FsKind::Fat16,
        FsKind::Fat32,
        FsKind::Vfat,
        FsKind::Fat,
        FsKind::Swap,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FsKind::Ext2 => "ext2",
            FsKind::Ext3 => "ext3",
            FsKind::Ext4 => "ext4",
            FsKind::Xfs => "xfs",
            FsKind::Btrfs => "btrfs",
            FsKind::Fat16 => "fat16",
            FsKind::Fat32 => "fat32",
            FsKind::Vfat => "vfat",
            FsKind::Fat => "fat",
            FsKind::Swap => "swap",
        }
    }

    pub fn family(&self) -> FsFamily {
        match self {
            FsKind::Fat16 | FsKind::Fat32 | FsKind::Vfat | FsKind::Fat => FsFamily::Fat,
            _ => FsFamily::Linux,
        }
    }

    pub fn is_ext(&self) -> bool {
        matches!(self, FsKind::Ext2 | FsKind::Ext3 | FsKind::Ext4)
    }

    /// GPT partition type a new partition of this kind is tagged with.
    pub fn partition_type(&self) -> partition_types::Type {
        match self {
            FsKind::Swap => partition_types::LINUX_SWAP,
            FsKind::Fat16 | FsKind::Fat32 | FsKind::Vfat | FsKind::Fat => partition_types::EFI,
            _ => partition_types::LINUX_FS,
        }
    }
}

impl fmt::Display for FsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FsKind {
    type Err = HalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        FsKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| HalError::UnsupportedFilesystem(s.to_string()))
    }
}
