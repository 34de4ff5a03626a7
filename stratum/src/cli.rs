//! CLI argument parsing for stratum

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "stratum", version)]
#[command(about = "Declarative disk layout: GPT partitions, formatting and online growth")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Increase log detail (-v debug, -vv trace); RUST_LOG still applies
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Append logs to this file instead of stderr (also: STRATUM_LOG_FILE)
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run every layout step of a stage
    Apply {
        /// Stage name (e.g. rootfs, initramfs)
        stage: String,

        /// Configuration files or directories
        #[arg(required = true)]
        sources: Vec<PathBuf>,

        /// Resolve device and sysfs paths under this directory
        #[arg(long)]
        root: Option<PathBuf>,
    },

    /// Show a disk's geometry, free space and partitions
    Probe {
        /// Disk device or image file
        device: PathBuf,

        /// Resolve device paths under this directory
        #[arg(long)]
        root: Option<PathBuf>,
    },

    /// Grow the filesystem on a device to fill it
    Grow {
        /// Partition device (e.g. /dev/sda3)
        device: PathBuf,

        /// Filesystem kind: ext2, ext3, ext4, xfs or btrfs
        filesystem: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_takes_stage_and_sources() {
        let cli = Cli::parse_from([
            "stratum", "-vv", "apply", "rootfs", "/oem", "/system/oem", "--root", "/sysroot",
        ]);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Apply {
                stage,
                sources,
                root,
            } => {
                assert_eq!(stage, "rootfs");
                assert_eq!(
                    sources,
                    vec![PathBuf::from("/oem"), PathBuf::from("/system/oem")]
                );
                assert_eq!(root, Some(PathBuf::from("/sysroot")));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn apply_requires_a_source() {
        assert!(Cli::try_parse_from(["stratum", "apply", "rootfs"]).is_err());
    }

    #[test]
    fn grow_takes_device_and_filesystem() {
        let cli = Cli::parse_from([
            "stratum",
            "grow",
            "/dev/vda3",
            "xfs",
            "--log-file",
            "/tmp/s.log",
        ]);
        assert_eq!(cli.log_file, Some(PathBuf::from("/tmp/s.log")));
        assert!(matches!(cli.command, Command::Grow { ref filesystem, .. } if filesystem == "xfs"));
    }
}
