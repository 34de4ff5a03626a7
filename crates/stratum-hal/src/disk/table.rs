//! GPT table mutations: initialize, append, extend the last entry.
//!
//! Every mutation opens the table fresh from the device, commits, syncs and returns a
//! reloaded [`Disk`]. The snapshot passed in is only used for planning.

use super::{
    geometry, logical_block_size, DeviceSelector, Disk, Partition, GPT_ENTRY_ARRAY_BYTES,
};
use crate::fs_kind::FsKind;
use crate::hal::{Console, PathResolver};
use crate::mkfs::MkfsCommand;
use crate::{HalError, HalResult};
use gpt::mbr::ProtectiveMBR;
use gpt::GptConfig;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::PathBuf;
use uuid::Uuid;

pub const DEFAULT_DISK_NAME: &str = "stratum";

/// Disk GUID for a named disk; the same name always yields the same GUID.
pub fn disk_guid(disk_name: Option<&str>) -> Uuid {
    let name = disk_name.filter(|n| !n.is_empty()).unwrap_or(DEFAULT_DISK_NAME);
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())
}

/// Size of a GPT entry at commit time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntrySize {
    /// Exactly this many sectors from the start sector.
    Sectors(u64),
    /// Size is recomputed from the start sector and this inclusive end sector.
    FromBounds { end: u64 },
}

impl EntrySize {
    fn last_lba(&self, start: u64) -> u64 {
        match *self {
            EntrySize::Sectors(sectors) => start + sectors - 1,
            EntrySize::FromBounds { end } => end,
        }
    }
}

/// Target size of an expand request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpandSize {
    /// Grow to the end of the usable area.
    Max,
    MiB(u64),
}

impl ExpandSize {
    /// Request-layer encoding: 0 means grow to the maximum.
    pub fn from_mib(mib: u64) -> Self {
        match mib {
            0 => ExpandSize::Max,
            n => ExpandSize::MiB(n),
        }
    }
}

/// One desired partition of a layout request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionRequest {
    /// Size in MiB; 0 takes all remaining space.
    pub size_mib: u64,
    pub plabel: Option<String>,
    pub fslabel: Option<String>,
    pub filesystem: String,
    pub format_options: Vec<String>,
}

impl PartitionRequest {
    pub fn new(size_mib: u64, filesystem: impl Into<String>) -> Self {
        Self {
            size_mib,
            plabel: None,
            fslabel: None,
            filesystem: filesystem.into(),
            format_options: Vec::new(),
        }
    }

    pub fn with_plabel(mut self, plabel: impl Into<String>) -> Self {
        self.plabel = Some(plabel.into());
        self
    }

    pub fn with_fslabel(mut self, fslabel: impl Into<String>) -> Self {
        self.fslabel = Some(fslabel.into());
        self
    }

    pub fn with_format_options(mut self, options: Vec<String>) -> Self {
        self.format_options = options;
        self
    }

    fn plabel(&self) -> Option<&str> {
        self.plabel.as_deref().filter(|l| !l.is_empty())
    }

    fn fslabel(&self) -> Option<&str> {
        self.fslabel.as_deref().filter(|l| !l.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    Created {
        partition: Partition,
        device: PathBuf,
        mkfs_output: String,
    },
    /// A partition with one of the requested labels exists already.
    Skipped { reason: String },
}

/// Applies table changes to the disk a [`Disk`] snapshot describes.
pub struct TableManager<'a> {
    console: &'a dyn Console,
}

impl<'a> TableManager<'a> {
    pub fn new(console: &'a dyn Console) -> Self {
        Self { console }
    }

    /// Write a protective MBR and an empty GPT with a GUID derived from `disk_name`.
    pub fn init_disk(
        &self,
        selector: &DeviceSelector,
        disk_name: Option<&str>,
        resolver: &dyn PathResolver,
    ) -> HalResult<Disk> {
        let path = match selector {
            DeviceSelector::Path(path) => path,
            DeviceSelector::Label(label) => {
                return Err(HalError::Config(format!(
                    "disk initialization needs a device path, got label {}",
                    label
                )))
            }
        };
        if !resolver.exists(path) {
            return Err(HalError::NotFound(format!("device {}", path.display())));
        }
        let real = resolver.resolve(path);
        let guid = disk_guid(disk_name);

        let mut file = OpenOptions::new().read(true).write(true).open(&real)?;
        let geo = geometry::probe(&file)?;
        let lb_size = logical_block_size(geo.sector_size)?;
        wipe_table_areas(&mut file, geo.sector_size, geo.total_sectors())?;
        let mbr_sectors =
            u32::try_from(geo.total_sectors().saturating_sub(1)).unwrap_or(u32::MAX);
        ProtectiveMBR::with_lb_size(mbr_sectors).overwrite_lba0(&mut file)?;
        file.sync_all()?;

        let mut gdisk = GptConfig::new()
            .writable(true)
            .initialized(false)
            .logical_block_size(lb_size)
            .open(&real)?;
        gdisk.update_guid(Some(guid))?;
        gdisk.update_partitions(BTreeMap::new())?;
        gdisk.write()?;
        sync_device(&file);

        log::info!("Initialized GPT on {} (guid {})", path.display(), guid);
        Disk::read(path, &real)
    }

    /// Append a partition after the last one and format it.
    ///
    /// Returns the reloaded disk. An existing partition with the same filesystem or
    /// partition label turns the request into a logged no-op.
    pub fn add_partition(
        &self,
        disk: &Disk,
        request: &PartitionRequest,
    ) -> HalResult<(Disk, AddOutcome)> {
        match check_unique(disk, request) {
            Ok(()) => {}
            Err(err) if err.is_skip() => {
                log::info!("Skipping partition on {}: {}", disk.device().display(), err);
                return Ok((
                    disk.clone(),
                    AddOutcome::Skipped {
                        reason: err.to_string(),
                    },
                ));
            }
            Err(err) => return Err(err),
        }
        if !disk.has_table() {
            return Err(HalError::Config(format!(
                "{} has no GPT; set init_disk to create one",
                disk.device().display()
            )));
        }
        let relocated;
        let disk = if disk.backup_misplaced() {
            relocated = self.relocate_backup(disk)?;
            &relocated
        } else {
            disk
        };

        let start = disk.next_start_sector();
        let last_usable = disk.last_usable_sector();
        let room = last_usable.saturating_sub(start);
        let size_sectors = match request.size_mib {
            0 => Some(room),
            mib => disk.mib_to_sectors(mib),
        };
        let available_mib = disk.sectors_to_mib(room);
        let Some(size_sectors) = size_sectors.filter(|&n| n > 0 && n <= room) else {
            return Err(HalError::InsufficientSpace {
                requested_mib: request.size_mib,
                available_mib,
            });
        };

        let kind: FsKind = request.filesystem.parse()?;
        log::debug!(
            "new partition on {}: start {}, {} sectors, type {}",
            disk.device().display(),
            start,
            size_sectors,
            kind
        );

        let name = request.plabel().unwrap_or_default();
        commit(disk, |entries| {
            let number = entries.keys().next_back().map_or(1, |n| n + 1);
            entries.insert(
                number,
                gpt::partition::Partition {
                    part_type_guid: kind.partition_type(),
                    part_guid: Uuid::new_v4(),
                    first_lba: start,
                    last_lba: EntrySize::Sectors(size_sectors).last_lba(start),
                    flags: 0,
                    name: name.to_string(),
                },
            );
            Ok(())
        })?;

        let disk = disk.reload()?;
        let partition = disk
            .partitions()
            .iter()
            .find(|p| p.start == start)
            .cloned()
            .ok_or_else(|| {
                HalError::Other(format!(
                    "partition at sector {} missing after commit on {}",
                    start,
                    disk.device().display()
                ))
            })?;
        let device = disk.partition_device(&partition);

        let mkfs = MkfsCommand::build(
            &request.filesystem,
            request.fslabel(),
            &device,
            &request.format_options,
        )?;
        let mkfs_output = mkfs.apply(self.console)?;
        log::info!(
            "Created partition {} ({} MiB, {}) on {}",
            device.display(),
            disk.sectors_to_mib(partition.size_sectors()),
            kind,
            disk.device().display()
        );

        Ok((
            disk,
            AddOutcome::Created {
                partition,
                device,
                mkfs_output,
            },
        ))
    }

    /// Move the end of the last partition forward. Shrinking is refused.
    pub fn expand_last_partition(&self, disk: &Disk, size: ExpandSize) -> HalResult<Disk> {
        let relocated;
        let disk = if disk.backup_misplaced() && disk.last_partition().is_some() {
            relocated = self.relocate_backup(disk)?;
            &relocated
        } else {
            disk
        };
        let last = disk.last_partition().ok_or(HalError::NoPartition)?;
        if last.filesystem == Some(FsKind::Swap) {
            return Err(HalError::UnsupportedResize(format!(
                "partition {} holds swap",
                last.number
            )));
        }

        let last_usable = disk.last_usable_sector();
        let available_mib = disk.sectors_to_mib(last_usable - last.start);
        let (new_size, requested_mib) = match size {
            ExpandSize::Max => (Some(last_usable - last.start), available_mib),
            ExpandSize::MiB(mib) => (disk.mib_to_sectors(mib), mib),
        };
        let new_end = new_size
            .and_then(|sectors| last.start.checked_add(sectors))
            .map(|end| end.saturating_sub(1))
            .ok_or(HalError::InsufficientSpace {
                requested_mib,
                available_mib,
            })?;
        let new_size = new_end + 1 - last.start;
        if new_size <= last.size_sectors() {
            return Err(HalError::InvalidResize(format!(
                "partition {} is {} sectors, requested {} sectors",
                last.number,
                last.size_sectors(),
                new_size
            )));
        }
        if new_end >= last_usable {
            return Err(HalError::InsufficientSpace {
                requested_mib,
                available_mib,
            });
        }

        let number = last.number;
        commit(disk, |entries| {
            let entry = entries.get_mut(&number).ok_or_else(|| {
                HalError::NotFound(format!("GPT entry {}", number))
            })?;
            entry.last_lba = EntrySize::FromBounds { end: new_end }.last_lba(entry.first_lba);
            Ok(())
        })?;

        log::info!(
            "Expanded partition {} on {} to end at sector {}",
            number,
            disk.device().display(),
            new_end
        );
        disk.reload()
    }

    /// Rewrite the table with its backup header on the last sector of the device.
    ///
    /// Entries and disk GUID are taken from the primary header; the usable area is
    /// recomputed from the current device size.
    pub fn relocate_backup(&self, disk: &Disk) -> HalResult<Disk> {
        let disk = disk.reload()?;
        let real = disk.real_path();
        let lb_size = logical_block_size(disk.sector_size())?;
        let header = gpt::header::read_header(real, lb_size)?;
        let entries: BTreeMap<u32, gpt::partition::Partition> =
            gpt::partition::read_partitions(real, &header, lb_size)?
                .into_iter()
                .filter(|(_, entry)| entry.is_used())
                .collect();

        let last_usable = disk.device_last_usable_sector();
        if let Some(end) = entries.values().map(|entry| entry.last_lba).max() {
            if end > last_usable {
                return Err(HalError::InsufficientSpace {
                    requested_mib: disk.sectors_to_mib(end + 1),
                    available_mib: disk.sectors_to_mib(last_usable + 1),
                });
            }
        }

        let mut file = OpenOptions::new().read(true).write(true).open(real)?;
        // The stale backup header would still carry a valid signature.
        if header.backup_lba < disk.total_sectors() {
            file.seek(SeekFrom::Start(header.backup_lba * disk.sector_size()))?;
            file.write_all(&vec![0u8; disk.sector_size() as usize])?;
        }
        let mbr_sectors =
            u32::try_from(disk.total_sectors().saturating_sub(1)).unwrap_or(u32::MAX);
        ProtectiveMBR::with_lb_size(mbr_sectors).overwrite_lba0(&mut file)?;
        file.sync_all()?;

        let mut gdisk = GptConfig::new()
            .writable(true)
            .initialized(false)
            .logical_block_size(lb_size)
            .open(real)?;
        gdisk.update_guid(Some(header.disk_guid))?;
        gdisk.update_partitions(entries)?;
        gdisk.write()?;
        sync_device(&file);

        log::info!(
            "Moved backup GPT header of {} to sector {}",
            disk.device().display(),
            disk.total_sectors() - 1
        );
        disk.reload()
    }
}

fn check_unique(disk: &Disk, request: &PartitionRequest) -> HalResult<()> {
    if let Some(label) = request.fslabel() {
        if let Some(part) = disk.match_partition_fslabel(label) {
            return Err(HalError::AlreadyExists(format!(
                "filesystem label {} on partition {}",
                label, part.number
            )));
        }
    }
    if let Some(label) = request.plabel() {
        if let Some(part) = disk.match_partition_plabel(label) {
            return Err(HalError::AlreadyExists(format!(
                "partition label {} on partition {}",
                label, part.number
            )));
        }
    }
    Ok(())
}

/// Open the table from the device, apply `change` to its entries and write it back.
fn commit<F>(disk: &Disk, change: F) -> HalResult<()>
where
    F: FnOnce(&mut BTreeMap<u32, gpt::partition::Partition>) -> HalResult<()>,
{
    let real = disk.real_path();
    let mut gdisk = GptConfig::new()
        .writable(true)
        .initialized(true)
        .logical_block_size(logical_block_size(disk.sector_size())?)
        .open(real)?;

    let mut entries = gdisk.partitions().clone();
    change(&mut entries)?;
    gdisk.update_partitions(entries)?;
    gdisk.write()?;

    let file = File::open(real)?;
    sync_device(&file);
    Ok(())
}

/// Zero the primary and backup header and entry areas.
fn wipe_table_areas(file: &mut File, sector_size: u64, total_sectors: u64) -> HalResult<()> {
    let table_sectors = 1 + GPT_ENTRY_ARRAY_BYTES / sector_size;
    if total_sectors < 2 * (table_sectors + 1) {
        return Err(HalError::Other(format!(
            "{} sectors cannot hold a GPT",
            total_sectors
        )));
    }
    let zeros = vec![0u8; (table_sectors * sector_size) as usize];
    for first in [1, total_sectors - table_sectors] {
        file.seek(SeekFrom::Start(first * sector_size))?;
        file.write_all(&zeros)?;
    }
    Ok(())
}

fn sync_device(file: &File) {
    if let Err(err) = file.sync_all() {
        log::warn!("fsync after table write failed: {}", err);
    }
    nix::unistd::sync();
    geometry::reread_partition_table(file);
}
