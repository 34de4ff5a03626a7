//! HAL trait definitions and implementations.
//!
//! The layout engine talks to the outside world through three seams: a console that runs
//! format commands, mount operations for the ephemeral resize mounts, and path resolution
//! for disks addressed through a re-rooted filesystem. `LinuxHal` is the real backend and
//! `FakeHal` records operations for tests.

pub mod console;
pub mod fake_hal;
pub mod guards;
pub mod linux_hal;
pub mod mount_ops;
pub mod resolver;

pub use console::Console;
pub use fake_hal::{FakeHal, Operation};
pub use guards::EphemeralMount;
pub use linux_hal::LinuxHal;
pub use mount_ops::{MountOps, MountOptions};
pub use resolver::{HostFs, PathResolver, RootedFs};

/// Complete HAL combining all system operation traits.
pub trait SystemHal: MountOps + Console + Send + Sync {}

/// Automatically implement SystemHal for any type implementing all required traits.
impl<T> SystemHal for T where T: MountOps + Console + Send + Sync {}
