//! Fake HAL implementation for testing.
//!
//! This implementation records all operations without executing them,
//! allowing for CI-safe testing without root privileges or real hardware.

use super::{Console, MountOps, MountOptions};
use crate::{HalError, HalResult};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Operation records for testing and verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Command {
        command: String,
    },
    Mount {
        device: PathBuf,
        target: PathBuf,
        fstype: Option<String>,
    },
    Unmount {
        target: PathBuf,
        lazy: bool,
    },
    IsolateMounts,
}

/// Shared state for FakeHal operations.
#[derive(Debug, Default)]
struct FakeHalState {
    /// All operations that were recorded
    operations: Vec<Operation>,
    /// Currently mounted paths
    mounted_paths: HashSet<PathBuf>,
    /// Commands starting with the prefix fail with the given output
    failing_commands: Vec<(String, String)>,
    fail_mounts: bool,
    /// Plain unmounts report busy; only lazy detaches succeed
    busy_unmounts: bool,
}

/// Fake HAL implementation that records operations without executing them.
///
/// This is designed for testing and CI environments where real system
/// operations would fail or be dangerous.
#[derive(Debug, Clone, Default)]
pub struct FakeHal {
    state: Arc<Mutex<FakeHalState>>,
}

impl FakeHal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every command starting with `prefix` fail with `output`.
    pub fn fail_commands(&self, prefix: impl Into<String>, output: impl Into<String>) {
        self.lock()
            .failing_commands
            .push((prefix.into(), output.into()));
    }

    pub fn fail_mounts(&self) {
        self.lock().fail_mounts = true;
    }

    pub fn busy_unmounts(&self) {
        self.lock().busy_unmounts = true;
    }

    /// Get all recorded operations.
    pub fn operations(&self) -> Vec<Operation> {
        self.lock().operations.clone()
    }

    /// Commands passed to the console, in order.
    pub fn commands(&self) -> Vec<String> {
        self.lock()
            .operations
            .iter()
            .filter_map(|op| match op {
                Operation::Command { command } => Some(command.clone()),
                _ => None,
            })
            .collect()
    }

    /// Check if a specific operation was recorded.
    pub fn has_operation(&self, check: impl Fn(&Operation) -> bool) -> bool {
        self.lock().operations.iter().any(check)
    }

    /// Clear all recorded operations.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.operations.clear();
        state.mounted_paths.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeHalState> {
        // A test that panicked while holding the lock must not hide later assertions.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record_operation(&self, op: Operation) {
        self.lock().operations.push(op);
    }
}

impl Console for FakeHal {
    fn run(&self, command: &str) -> HalResult<String> {
        log::info!("FAKE HAL: {}", command);
        self.record_operation(Operation::Command {
            command: command.to_string(),
        });

        let failure = self
            .lock()
            .failing_commands
            .iter()
            .find(|(prefix, _)| command.starts_with(prefix.as_str()))
            .map(|(_, output)| output.clone());
        match failure {
            Some(output) => Err(HalError::CommandFailed {
                command: command.to_string(),
                code: Some(1),
                output,
            }),
            None => Ok(String::new()),
        }
    }
}

impl MountOps for FakeHal {
    fn mount_device(
        &self,
        device: &Path,
        target: &Path,
        fstype: Option<&str>,
        _options: MountOptions,
    ) -> HalResult<()> {
        log::info!(
            "FAKE HAL: mount {} -> {} (type: {:?})",
            device.display(),
            target.display(),
            fstype
        );

        self.record_operation(Operation::Mount {
            device: device.to_path_buf(),
            target: target.to_path_buf(),
            fstype: fstype.map(String::from),
        });

        let mut state = self.lock();
        if state.fail_mounts {
            return Err(HalError::Mount {
                device: device.to_path_buf(),
                target: target.to_path_buf(),
                source: nix::errno::Errno::EINVAL,
            });
        }
        state.mounted_paths.insert(target.to_path_buf());
        Ok(())
    }

    fn unmount(&self, target: &Path, lazy: bool) -> HalResult<()> {
        log::info!("FAKE HAL: unmount {} (lazy: {})", target.display(), lazy);

        self.record_operation(Operation::Unmount {
            target: target.to_path_buf(),
            lazy,
        });

        let mut state = self.lock();
        if state.busy_unmounts && !lazy {
            return Err(HalError::DiskBusy);
        }
        state.mounted_paths.remove(target);
        Ok(())
    }

    fn is_mounted(&self, path: &Path) -> HalResult<bool> {
        Ok(self.lock().mounted_paths.contains(path))
    }

    fn isolate_mounts(&self) -> HalResult<()> {
        self.record_operation(Operation::IsolateMounts);
        Ok(())
    }
}
