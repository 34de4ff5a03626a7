//! Mount capability used by the ephemeral resize mounts.

use crate::HalResult;
use std::path::Path;

pub trait MountOps {
    /// Mount `device` on the existing directory `target`.
    ///
    /// `fstype` of `None` lets the kernel probe the filesystem.
    fn mount_device(
        &self,
        device: &Path,
        target: &Path,
        fstype: Option<&str>,
        options: MountOptions,
    ) -> HalResult<()>;

    /// Unmount `target`. A `lazy` unmount detaches it even while it is busy.
    fn unmount(&self, target: &Path, lazy: bool) -> HalResult<()>;

    fn is_mounted(&self, path: &Path) -> HalResult<bool>;

    /// Move the calling thread into a private mount namespace.
    ///
    /// Mounts made afterwards stay out of the host's mount table.
    fn isolate_mounts(&self) -> HalResult<()>;
}

/// Filesystem-specific mount data, passed through to the kernel as is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountOptions {
    pub data: Option<String>,
}

impl MountOptions {
    pub fn new() -> Self {
        Self::default()
    }
}
