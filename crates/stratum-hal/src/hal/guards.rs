use crate::hal::{MountOps, MountOptions};
use crate::{HalError, HalResult};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const MOUNTPOINT_PREFIX: &str = "stratum-mnt-";

/// Temporary mount of a block device on a private, freshly created directory.
///
/// The mount is torn down when the guard goes out of scope: a plain unmount first, a lazy
/// detach if the mountpoint is still busy, then the directory is removed. `release` does
/// the same eagerly and reports the unmount error instead of logging it.
#[derive(Debug)]
pub struct EphemeralMount<'a, H: MountOps + ?Sized> {
    hal: &'a H,
    device: PathBuf,
    mountpoint: Option<TempDir>,
}

impl<'a, H: MountOps + ?Sized> EphemeralMount<'a, H> {
    pub fn acquire(hal: &'a H, device: &Path, fstype: Option<&str>) -> HalResult<Self> {
        let mountpoint = tempfile::Builder::new()
            .prefix(MOUNTPOINT_PREFIX)
            .tempdir()?;

        // On failure the TempDir is dropped here and the directory goes with it.
        hal.mount_device(device, mountpoint.path(), fstype, MountOptions::new())?;
        log::debug!(
            "ephemeral mount {} -> {}",
            device.display(),
            mountpoint.path().display()
        );

        Ok(Self {
            hal,
            device: device.to_path_buf(),
            mountpoint: Some(mountpoint),
        })
    }

    pub fn path(&self) -> &Path {
        match &self.mountpoint {
            Some(dir) => dir.path(),
            None => Path::new(""),
        }
    }

    pub fn device(&self) -> &Path {
        &self.device
    }

    /// Unmount now and remove the mountpoint.
    pub fn release(mut self) -> HalResult<()> {
        self.teardown()
    }

    fn teardown(&mut self) -> HalResult<()> {
        let Some(dir) = self.mountpoint.take() else {
            return Ok(());
        };

        let unmounted = match self.hal.unmount(dir.path(), false) {
            Ok(()) => Ok(()),
            Err(err) => {
                log::warn!(
                    "unmount of {} failed ({}), detaching lazily",
                    dir.path().display(),
                    err
                );
                self.lazy_detach(dir.path(), err)
            }
        };

        if let Err(err) = dir.close() {
            log::warn!("failed to remove ephemeral mountpoint: {}", err);
        }
        unmounted
    }

    fn lazy_detach(&self, target: &Path, original: HalError) -> HalResult<()> {
        match self.hal.is_mounted(target) {
            Ok(false) => Ok(()),
            _ => self.hal.unmount(target, true).map_err(|_| original),
        }
    }
}

impl<'a, H: MountOps + ?Sized> Drop for EphemeralMount<'a, H> {
    fn drop(&mut self) {
        if let Err(err) = self.teardown() {
            log::warn!(
                "ephemeral mount of {} was not released: {}",
                self.device.display(),
                err
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FakeHal, Operation};

    #[test]
    fn unmounts_and_removes_dir_on_drop() {
        let hal = FakeHal::new();
        let target;
        {
            let mount = EphemeralMount::acquire(&hal, Path::new("/dev/sda1"), Some("ext4")).unwrap();
            target = mount.path().to_path_buf();
            assert!(target.is_dir());
            assert!(hal.is_mounted(&target).unwrap());
        }

        assert!(!hal.is_mounted(&target).unwrap());
        assert!(!target.exists());
        assert!(hal.has_operation(|op| matches!(
            op,
            Operation::Unmount { lazy: false, .. }
        )));
    }

    #[test]
    fn release_reports_success_and_cleans_up() {
        let hal = FakeHal::new();
        let mount = EphemeralMount::acquire(&hal, Path::new("/dev/sda2"), None).unwrap();
        let target = mount.path().to_path_buf();
        mount.release().unwrap();

        assert!(!target.exists());
        let unmounts = hal
            .operations()
            .into_iter()
            .filter(|op| matches!(op, Operation::Unmount { .. }))
            .count();
        assert_eq!(unmounts, 1);
    }

    #[test]
    fn busy_mountpoint_falls_back_to_lazy_detach() {
        let hal = FakeHal::new();
        hal.busy_unmounts();
        let target;
        {
            let mount = EphemeralMount::acquire(&hal, Path::new("/dev/sda3"), None).unwrap();
            target = mount.path().to_path_buf();
        }

        assert!(!hal.is_mounted(&target).unwrap());
        assert!(hal.has_operation(|op| matches!(op, Operation::Unmount { lazy: true, .. })));
        assert!(!target.exists());
    }

    #[test]
    fn failed_mount_leaves_no_directory() {
        let hal = FakeHal::new();
        hal.fail_mounts();
        let err = EphemeralMount::acquire(&hal, Path::new("/dev/sda4"), Some("xfs")).unwrap_err();
        assert!(matches!(err, HalError::Mount { .. }));

        let target = hal
            .operations()
            .into_iter()
            .find_map(|op| match op {
                Operation::Mount { target, .. } => Some(target),
                _ => None,
            })
            .unwrap();
        assert!(!target.exists());
        assert!(!hal.has_operation(|op| matches!(op, Operation::Unmount { .. })));
    }

    #[test]
    fn guard_is_released_while_unwinding() {
        let hal = FakeHal::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _mount = EphemeralMount::acquire(&hal, Path::new("/dev/sda5"), None).unwrap();
            panic!("resize blew up");
        }));
        assert!(result.is_err());
        assert!(hal.has_operation(|op| matches!(op, Operation::Unmount { .. })));
    }
}
