use std::path::PathBuf;
use thiserror::Error;

pub type HalResult<T> = std::result::Result<T, HalError>;

#[derive(Error, Debug)]
pub enum HalError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Insufficient space: requested {requested_mib} MiB, available {available_mib} MiB")]
    InsufficientSpace {
        requested_mib: u64,
        available_mib: u64,
    },

    #[error("Unsupported filesystem: {0}")]
    UnsupportedFilesystem(String),

    #[error("Unknown filesystem")]
    UnknownFilesystem,

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Device has no partitions")]
    NoPartition,

    #[error("Unsupported resize: {0}")]
    UnsupportedResize(String),

    #[error("Invalid resize: {0}")]
    InvalidResize(String),

    #[error("Mount of {device} on {target} failed: {source}")]
    Mount {
        device: PathBuf,
        target: PathBuf,
        #[source]
        source: nix::errno::Errno,
    },

    #[error("{request} ioctl failed: {source}")]
    Ioctl {
        request: &'static str,
        #[source]
        source: nix::errno::Errno,
    },

    #[error("Grow step '{step}' failed: {source}")]
    Grow {
        step: &'static str,
        #[source]
        source: Box<HalError>,
    },

    #[error("Command failed: {command} (exit={code:?}): {output}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        output: String,
    },

    #[error("Disk is busy (mounted or in use)")]
    DiskBusy,

    #[error("Permission denied")]
    PermissionDenied,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("nix errno: {0}")]
    Nix(#[from] nix::errno::Errno),

    #[error("{0}")]
    Other(String),
}

impl HalError {
    /// Non-fatal errors that a layout run logs and skips past.
    pub fn is_skip(&self) -> bool {
        matches!(self, HalError::AlreadyExists(_))
    }

    /// Wrap `self` with the name of the grow step that produced it.
    pub fn at_step(self, step: &'static str) -> HalError {
        HalError::Grow {
            step,
            source: Box::new(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn already_exists_is_the_only_skip() {
        assert!(HalError::AlreadyExists("DATA".into()).is_skip());
        assert!(!HalError::NoPartition.is_skip());
        assert!(!HalError::InsufficientSpace {
            requested_mib: 2,
            available_mib: 1
        }
        .is_skip());
    }

    #[test]
    fn grow_step_is_named_in_message() {
        let err = HalError::Nix(nix::errno::Errno::ENOTTY).at_step("statfs");
        let msg = err.to_string();
        assert!(msg.contains("statfs"), "unexpected message: {msg}");
    }

    #[test]
    fn insufficient_space_reports_both_figures() {
        let err = HalError::InsufficientSpace {
            requested_mib: 1025,
            available_mib: 1024,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient space: requested 1025 MiB, available 1024 MiB"
        );
    }
}
