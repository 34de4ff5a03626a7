//! Format command construction for freshly created partitions.

use crate::fs_kind::{FsFamily, FsKind};
use crate::hal::Console;
use crate::HalResult;
use std::path::Path;

/// A format tool invocation, kept as tool plus argument list until it is run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MkfsCommand {
    pub kind: FsKind,
    pub tool: String,
    pub args: Vec<String>,
}

impl MkfsCommand {
    pub fn build(
        filesystem: &str,
        fslabel: Option<&str>,
        device: &Path,
        custom: &[String],
    ) -> HalResult<MkfsCommand> {
        let kind: FsKind = filesystem.parse()?;
        let label = fslabel.filter(|l| !l.is_empty());
        let mut args = Vec::new();

        match kind.family() {
            FsFamily::Linux => {
                if let Some(label) = label {
                    args.push("-L".to_string());
                    args.push(label.to_string());
                }
                if kind == FsKind::Btrfs {
                    args.push("-f".to_string());
                }
            }
            FsFamily::Fat => {
                if let Some(label) = label {
                    args.push("-n".to_string());
                    args.push(label.to_string());
                }
            }
        }
        args.extend(custom.iter().cloned());
        args.push(device.display().to_string());

        let tool = match kind {
            FsKind::Swap => "mkswap".to_string(),
            other => format!("mkfs.{}", other),
        };

        Ok(MkfsCommand { kind, tool, args })
    }

    /// The invocation as a single shell command line.
    pub fn command_line(&self) -> String {
        std::iter::once(self.tool.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(shell_quote)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Run the command, returning its output verbatim.
    pub fn apply(&self, console: &dyn Console) -> HalResult<String> {
        let line = self.command_line();
        log::info!("Formatting: {}", line);
        console.run(&line)
    }
}

fn shell_quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,@+%".contains(c));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}
