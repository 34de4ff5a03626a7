//! stratum disk layout engine.
//!
//! Reads a disk into an immutable [`Disk`] snapshot, creates and extends GPT entries on
//! it through [`TableManager`], formats new partitions with [`MkfsCommand`] and grows
//! mounted-capable filesystems online with [`FsGrower`]. OS access goes through the
//! traits in [`hal`] so everything above them runs against [`FakeHal`] in tests.

pub mod disk;
pub mod error;
pub mod fs_kind;
pub mod grow;
pub mod hal;
pub mod mkfs;
pub mod path;
pub mod procfs;
pub mod sniff;
pub mod sysfs;

pub use disk::{
    AddOutcome, DeviceSelector, Disk, EntrySize, ExpandSize, Partition, PartitionRequest,
    TableManager, MIB,
};
pub use error::{HalError, HalResult};
pub use fs_kind::FsKind;
pub use grow::{FsGrower, GrowReport};
pub use hal::{
    Console, EphemeralMount, FakeHal, HostFs, LinuxHal, MountOps, MountOptions, Operation,
    PathResolver, RootedFs, SystemHal,
};
pub use mkfs::MkfsCommand;
