//! Online growth of a filesystem to the size of its device.
//!
//! The resize ioctls need an open descriptor inside the mounted filesystem, so the device
//! is mounted on an [`EphemeralMount`] for the duration of one call. The work runs on a
//! scoped thread that first moves into a private mount namespace; if that fails the mount
//! is still made, just visible on the host until it is released.

pub mod resize;

use crate::disk::geometry;
use crate::fs_kind::FsKind;
use crate::hal::{EphemeralMount, MountOps};
use crate::{HalError, HalResult};
use resize::Resizer;
use std::fs::File;
use std::os::fd::AsRawFd;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrowReport {
    pub kind: FsKind,
    pub device_bytes: u64,
    pub block_size: u64,
    pub blocks: u64,
}

pub struct FsGrower<'a, H: MountOps + Sync + ?Sized> {
    hal: &'a H,
}

impl<'a, H: MountOps + Sync + ?Sized> FsGrower<'a, H> {
    pub fn new(hal: &'a H) -> Self {
        Self { hal }
    }

    /// Grow the filesystem on `device` to fill the device.
    ///
    /// Errors are wrapped in [`HalError::Grow`] naming the step that failed. The ephemeral
    /// mount is gone by the time this returns, whatever the outcome.
    pub fn grow_to_max(&self, device: &Path, kind: FsKind) -> HalResult<GrowReport> {
        let resizer = resize::resizer_for(kind)?;

        let device_bytes = {
            let file = File::open(device).map_err(|e| HalError::from(e).at_step("open"))?;
            geometry::device_size_bytes(&file).map_err(|e| e.at_step("size"))?
        };
        if device_bytes == 0 {
            return Err(HalError::Other(format!("{} reports zero size", device.display()))
                .at_step("size"));
        }
        log::debug!("{}: {} bytes", device.display(), device_bytes);

        std::thread::scope(|scope| {
            let worker = scope.spawn(|| self.grow_mounted(device, kind, resizer, device_bytes));
            match worker.join() {
                Ok(result) => result,
                Err(_) => Err(HalError::Other(format!(
                    "grow worker for {} panicked",
                    device.display()
                ))),
            }
        })
    }

    fn grow_mounted(
        &self,
        device: &Path,
        kind: FsKind,
        resizer: &Resizer,
        device_bytes: u64,
    ) -> HalResult<GrowReport> {
        if let Err(err) = self.hal.isolate_mounts() {
            log::warn!("mount namespace isolation failed, mounting on host: {}", err);
        }

        let mount = EphemeralMount::acquire(self.hal, device, Some(kind.as_str()))
            .map_err(|e| e.at_step("mount"))?;

        let stat = nix::sys::statfs::statfs(mount.path())
            .map_err(|e| HalError::from(e).at_step("statfs"))?;
        let block_size = u64::try_from(stat.block_size())
            .ok()
            .filter(|bs| *bs > 0)
            .ok_or_else(|| {
                HalError::Other(format!("statfs block size {}", stat.block_size()))
                    .at_step("statfs")
            })?;

        let blocks = device_bytes / block_size;
        if blocks == 0 {
            return Err(HalError::Other(format!(
                "{} bytes is less than one {}-byte block",
                device_bytes, block_size
            ))
            .at_step("blocks"));
        }

        let dir = File::open(mount.path())
            .map_err(|e| HalError::from(e).at_step("open mountpoint"))?;
        log::info!(
            "Growing {} on {} to {} blocks of {} bytes",
            kind,
            device.display(),
            blocks,
            block_size
        );
        (resizer.grow)(dir.as_raw_fd(), blocks).map_err(|source| {
            HalError::Ioctl {
                request: resizer.request,
                source,
            }
            .at_step("resize")
        })?;
        drop(dir);

        mount.release().map_err(|e| e.at_step("unmount"))?;
        Ok(GrowReport {
            kind,
            device_bytes,
            block_size,
            blocks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FakeHal, Operation};
    use tempfile::NamedTempFile;

    fn mount_targets(hal: &FakeHal) -> Vec<std::path::PathBuf> {
        hal.operations()
            .into_iter()
            .filter_map(|op| match op {
                Operation::Mount { target, .. } => Some(target),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn unsupported_kind_touches_nothing() {
        let hal = FakeHal::new();
        let err = FsGrower::new(&hal)
            .grow_to_max(Path::new("/dev/vda2"), FsKind::Vfat)
            .unwrap_err();
        assert!(matches!(err, HalError::UnsupportedResize(_)));
        assert!(hal.operations().is_empty());
    }

    #[test]
    fn missing_device_fails_at_open() {
        let hal = FakeHal::new();
        let err = FsGrower::new(&hal)
            .grow_to_max(Path::new("/nonexistent/stratum/vda2"), FsKind::Ext4)
            .unwrap_err();
        assert!(matches!(err, HalError::Grow { step: "open", .. }));
        assert!(hal.operations().is_empty());
    }

    #[test]
    fn zero_sized_device_is_rejected_before_mounting() {
        let hal = FakeHal::new();
        let image = NamedTempFile::new().unwrap();
        let err = FsGrower::new(&hal)
            .grow_to_max(image.path(), FsKind::Xfs)
            .unwrap_err();
        assert!(matches!(err, HalError::Grow { step: "size", .. }));
        assert!(mount_targets(&hal).is_empty());
    }

    #[test]
    fn failed_mount_names_the_step() {
        let hal = FakeHal::new();
        hal.fail_mounts();
        let image = NamedTempFile::new().unwrap();
        image.as_file().set_len(1024 * 1024).unwrap();

        let err = FsGrower::new(&hal)
            .grow_to_max(image.path(), FsKind::Btrfs)
            .unwrap_err();
        assert!(matches!(err, HalError::Grow { step: "mount", .. }));
        assert!(hal.has_operation(|op| *op == Operation::IsolateMounts));
        for target in mount_targets(&hal) {
            assert!(!target.exists());
        }
    }

    #[test]
    fn mount_is_released_when_growth_is_impossible() {
        let hal = FakeHal::new();
        // Smaller than any filesystem block.
        let image = NamedTempFile::new().unwrap();
        image.as_file().set_len(100).unwrap();

        let err = FsGrower::new(&hal)
            .grow_to_max(image.path(), FsKind::Ext4)
            .unwrap_err();
        assert!(matches!(err, HalError::Grow { step: "blocks", .. }));

        let targets = mount_targets(&hal);
        assert_eq!(targets.len(), 1);
        assert!(hal.has_operation(|op| matches!(
            op,
            Operation::Unmount { target, lazy: false } if *target == targets[0]
        )));
        assert!(!targets[0].exists());
        assert!(!hal.is_mounted(&targets[0]).unwrap());
    }

    #[test]
    fn mount_uses_the_filesystem_kind() {
        let hal = FakeHal::new();
        let image = NamedTempFile::new().unwrap();
        image.as_file().set_len(100).unwrap();

        let _ = FsGrower::new(&hal).grow_to_max(image.path(), FsKind::Ext3);
        assert!(hal.has_operation(|op| matches!(
            op,
            Operation::Mount { fstype: Some(fs), .. } if fs == "ext3"
        )));
    }
}
