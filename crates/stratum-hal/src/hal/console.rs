//! Command execution capability.
//!
//! Only format tooling (`mkfs.*`, `mkswap`) goes through here. Commands run to completion:
//! there is no retry and no timeout, and output is surfaced to the caller unparsed.

use crate::HalResult;

pub trait Console {
    /// Run `command` through the shell and return its combined stdout and stderr.
    ///
    /// A non-zero exit is reported as `HalError::CommandFailed` carrying the same output.
    fn run(&self, command: &str) -> HalResult<String>;
}
