//! Linux HAL implementation using real system calls.

use super::{Console, MountOps, MountOptions};
use crate::{HalError, HalResult};
use std::fs;
use std::path::Path;
use std::process::{Command, Output, Stdio};

/// Real HAL implementation for Linux systems.
#[derive(Debug, Clone, Default)]
pub struct LinuxHal;

impl LinuxHal {
    pub fn new() -> Self {
        Self
    }
}

fn map_command_err(program: &str, err: std::io::Error) -> HalError {
    if err.kind() == std::io::ErrorKind::NotFound {
        return HalError::NotFound(format!("command {}", program));
    }
    HalError::Io(err)
}

fn combined_output(output: &Output) -> String {
    let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    combined
}

fn map_nix_err(err: nix::errno::Errno) -> HalError {
    use nix::errno::Errno;
    match err {
        Errno::EBUSY => HalError::DiskBusy,
        Errno::EACCES | Errno::EPERM => HalError::PermissionDenied,
        other => HalError::Nix(other),
    }
}

impl Console for LinuxHal {
    fn run(&self, command: &str) -> HalResult<String> {
        log::debug!("running: {}", command);

        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| map_command_err("sh", e))?;

        let combined = combined_output(&output);
        if !output.status.success() {
            return Err(HalError::CommandFailed {
                command: command.to_string(),
                code: output.status.code(),
                output: combined,
            });
        }
        Ok(combined)
    }
}

impl MountOps for LinuxHal {
    fn mount_device(
        &self,
        device: &Path,
        target: &Path,
        fstype: Option<&str>,
        options: MountOptions,
    ) -> HalResult<()> {
        let flags = nix::mount::MsFlags::empty();
        let data = options.data.as_deref();

        nix::mount::mount(Some(device), target, fstype, flags, data).map_err(|source| {
            HalError::Mount {
                device: device.to_path_buf(),
                target: target.to_path_buf(),
                source,
            }
        })
    }

    fn unmount(&self, target: &Path, lazy: bool) -> HalResult<()> {
        let flags = if lazy {
            nix::mount::MntFlags::MNT_DETACH
        } else {
            nix::mount::MntFlags::empty()
        };
        nix::mount::umount2(target, flags).map_err(map_nix_err)
    }

    fn is_mounted(&self, path: &Path) -> HalResult<bool> {
        let content = fs::read_to_string("/proc/self/mountinfo")?;
        let entries = crate::procfs::mountinfo::parse_mountinfo(&content);
        Ok(crate::procfs::mountinfo::is_mounted_from_info(
            path, &entries,
        ))
    }

    fn isolate_mounts(&self) -> HalResult<()> {
        use nix::mount::MsFlags;
        use nix::sched::CloneFlags;

        nix::sched::unshare(CloneFlags::CLONE_NEWNS).map_err(map_nix_err)?;
        // Keep new mounts from propagating back into the parent namespace.
        nix::mount::mount(
            None::<&str>,
            "/",
            None::<&str>,
            MsFlags::MS_REC | MsFlags::MS_PRIVATE,
            None::<&str>,
        )
        .map_err(map_nix_err)
    }
}
