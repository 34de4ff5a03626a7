//! Disk snapshots: geometry plus the ordered GPT partition list.
//!
//! A [`Disk`] is an immutable value read from the device. Anything that commits a table
//! change hands back a fresh snapshot via [`Disk::reload`]; snapshots are never patched
//! in place.

pub mod geometry;
pub mod table;

use crate::fs_kind::FsKind;
use crate::hal::resolver::{PathResolver, BY_LABEL_DIR, SYS_CLASS_BLOCK};
use crate::path::partition_path;
use crate::sniff;
use crate::sysfs::block::{device_basename, parent_disk_name};
use crate::{HalError, HalResult};
use gpt::disk::LogicalBlockSize;
use gpt::GptConfig;
use std::fmt;
use std::fs::{self, File};
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub use table::{AddOutcome, EntrySize, ExpandSize, PartitionRequest, TableManager};

pub const MIB: u64 = 1024 * 1024;

/// GPT reserves room for 128 entries of 128 bytes each.
pub(crate) const GPT_ENTRY_ARRAY_BYTES: u64 = 128 * 128;

const GPT_SIGNATURE: &[u8; 8] = b"EFI PART";

/// How a layout request names its target disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSelector {
    Path(PathBuf),
    Label(String),
}

impl DeviceSelector {
    /// Build a selector from the two optional config fields; exactly one must be set.
    pub fn new(path: Option<PathBuf>, label: Option<String>) -> HalResult<Self> {
        let path = path.filter(|p| !p.as_os_str().is_empty());
        let label = label.filter(|l| !l.is_empty());
        match (path, label) {
            (Some(path), None) => Ok(DeviceSelector::Path(path)),
            (None, Some(label)) => Ok(DeviceSelector::Label(label)),
            (Some(_), Some(_)) => Err(HalError::Config(
                "device path and label are mutually exclusive".to_string(),
            )),
            (None, None) => Err(HalError::Config(
                "device needs either a path or a label".to_string(),
            )),
        }
    }

    /// Virtual device path of the disk this selector names.
    pub fn resolve(&self, resolver: &dyn PathResolver) -> HalResult<PathBuf> {
        match self {
            DeviceSelector::Path(path) => {
                if !resolver.exists(path) {
                    return Err(HalError::NotFound(format!("device {}", path.display())));
                }
                Ok(path.clone())
            }
            DeviceSelector::Label(label) => resolve_label(label, resolver),
        }
    }
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSelector::Path(path) => write!(f, "{}", path.display()),
            DeviceSelector::Label(label) => write!(f, "label={}", label),
        }
    }
}

fn resolve_label(label: &str, resolver: &dyn PathResolver) -> HalResult<PathBuf> {
    let link = Path::new(BY_LABEL_DIR).join(label);
    if !resolver.exists(&link) {
        return Err(HalError::NotFound(format!("no device with label {}", label)));
    }

    let target = fs::canonicalize(resolver.resolve(&link))?;
    let name = device_basename(&target)?;
    let disk = parent_disk_name(&resolver.resolve(Path::new(SYS_CLASS_BLOCK)), &name)?;
    log::debug!("label {} is on {} (disk {})", label, name, disk);
    Ok(PathBuf::from("/dev").join(disk))
}

/// One used GPT entry, annotated with what the sniffer found inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    /// GPT entry number (1-based).
    pub number: u32,
    pub start: u64,
    /// Last sector, inclusive.
    pub end: u64,
    pub plabel: String,
    pub fslabel: Option<String>,
    pub filesystem: Option<FsKind>,
}

impl Partition {
    pub fn size_sectors(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn filesystem_name(&self) -> &str {
        self.filesystem.map_or("unknown", |kind| kind.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Disk {
    device: PathBuf,
    real_path: PathBuf,
    sector_size: u64,
    total_sectors: u64,
    first_usable: u64,
    last_usable: u64,
    guid: Option<Uuid>,
    backup_misplaced: bool,
    partitions: Vec<Partition>,
}

impl Disk {
    /// Resolve `selector` and read the disk it names.
    pub fn open(selector: &DeviceSelector, resolver: &dyn PathResolver) -> HalResult<Disk> {
        let device = selector.resolve(resolver)?;
        Disk::read(&device, &resolver.resolve(&device))
    }

    /// Re-read the table from the device.
    pub fn reload(&self) -> HalResult<Disk> {
        Disk::read(&self.device, &self.real_path)
    }

    fn read(device: &Path, real_path: &Path) -> HalResult<Disk> {
        let mut file = File::open(real_path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => {
                HalError::NotFound(format!("device {}", device.display()))
            }
            _ => HalError::Io(e),
        })?;
        let geometry = geometry::probe(&file)?;
        let total_sectors = geometry.total_sectors();
        let sector_size = geometry.sector_size;

        let mut disk = Disk {
            device: device.to_path_buf(),
            real_path: real_path.to_path_buf(),
            sector_size,
            total_sectors,
            first_usable: 2 + GPT_ENTRY_ARRAY_BYTES / sector_size,
            last_usable: total_sectors.saturating_sub(2 + GPT_ENTRY_ARRAY_BYTES / sector_size),
            guid: None,
            backup_misplaced: false,
            partitions: Vec::new(),
        };

        if !has_gpt_signature(&mut file, sector_size)? {
            log::debug!("no GPT signature on {}", device.display());
            return Ok(disk);
        }

        // The primary header decides where the table is; a backup left behind by a
        // grown device is reported, not treated as a missing table.
        let lb_size = logical_block_size(sector_size)?;
        let header = gpt::header::read_header(real_path, lb_size)?;
        disk.first_usable = header.first_usable;
        disk.last_usable = header.last_usable;
        disk.guid = Some(header.disk_guid);
        disk.backup_misplaced = header.backup_lba != total_sectors.saturating_sub(1);

        let entries = if disk.backup_misplaced {
            log::warn!(
                "{}: backup GPT header at sector {}, device ends at sector {}",
                device.display(),
                header.backup_lba,
                total_sectors.saturating_sub(1)
            );
            gpt::partition::read_partitions(real_path, &header, lb_size)?
        } else {
            GptConfig::new()
                .writable(false)
                .logical_block_size(lb_size)
                .open(real_path)?
                .partitions()
                .clone()
        };

        let mut reader = file;
        let mut partitions: Vec<Partition> = entries
            .iter()
            .filter(|(_, entry)| entry.is_used())
            .map(|(number, entry)| Partition {
                number: *number,
                start: entry.first_lba,
                end: entry.last_lba,
                plabel: entry.name.clone(),
                fslabel: None,
                filesystem: None,
            })
            .collect();
        partitions.sort_by_key(|p| p.start);

        for part in partitions.iter_mut() {
            match sniff::detect(
                &mut reader,
                part.start * sector_size,
                part.size_sectors() * sector_size,
            ) {
                Ok(found) => {
                    part.filesystem = Some(found.kind);
                    part.fslabel = found.label;
                }
                Err(HalError::UnknownFilesystem) => {}
                Err(err) => return Err(err),
            }
        }

        disk.partitions = partitions;
        log::debug!(
            "{}: {} sectors of {} bytes, usable {}..={}, {} partition(s)",
            device.display(),
            disk.total_sectors,
            disk.sector_size,
            disk.first_usable,
            disk.last_usable,
            disk.partitions.len()
        );
        Ok(disk)
    }

    /// Device path as addressed in configuration.
    pub fn device(&self) -> &Path {
        &self.device
    }

    /// Host path the device is read and written through.
    pub fn real_path(&self) -> &Path {
        &self.real_path
    }

    pub fn sector_size(&self) -> u64 {
        self.sector_size
    }

    pub fn total_sectors(&self) -> u64 {
        self.total_sectors
    }

    pub fn last_usable_sector(&self) -> u64 {
        self.last_usable
    }

    pub fn has_table(&self) -> bool {
        self.guid.is_some()
    }

    pub fn guid(&self) -> Option<Uuid> {
        self.guid
    }

    /// The backup GPT header is not on the last sector, as after the device grew.
    pub fn backup_misplaced(&self) -> bool {
        self.backup_misplaced
    }

    /// Last usable sector once the backup header sits at the end of the device.
    pub fn device_last_usable_sector(&self) -> u64 {
        self.total_sectors
            .saturating_sub(2 + GPT_ENTRY_ARRAY_BYTES / self.sector_size)
    }

    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    pub fn last_partition(&self) -> Option<&Partition> {
        self.partitions.last()
    }

    /// Sectors kept free at the front of the disk for table overhead and alignment.
    pub fn reserved_start_sectors(&self) -> u64 {
        MIB / self.sector_size
    }

    /// Where the first partition of an empty table starts.
    pub fn first_usable_sector(&self) -> u64 {
        self.first_usable.max(self.reserved_start_sectors())
    }

    /// Where the next appended partition starts.
    pub fn next_start_sector(&self) -> u64 {
        match self.last_partition() {
            Some(last) => last.end + 1,
            None => self.first_usable_sector(),
        }
    }

    /// Sectors between the last partition (or the reserved front area) and the last
    /// usable sector.
    pub fn free_sectors(&self) -> u64 {
        let used_until = match self.last_partition() {
            Some(last) => last.end,
            None => self.reserved_start_sectors(),
        };
        self.last_usable.saturating_sub(used_until)
    }

    /// `None` when `mib` does not fit in a byte count.
    pub fn mib_to_sectors(&self, mib: u64) -> Option<u64> {
        mib.checked_mul(MIB).map(|bytes| bytes / self.sector_size)
    }

    pub fn sectors_to_mib(&self, sectors: u64) -> u64 {
        sectors * self.sector_size / MIB
    }

    /// Whether at least `min_mib` of trailing space is free.
    pub fn check_free_space(&self, min_mib: u64) -> bool {
        self.mib_to_sectors(min_mib)
            .is_some_and(|needed| self.free_sectors() >= needed)
    }

    pub fn match_partition_fslabel(&self, label: &str) -> Option<&Partition> {
        self.partitions
            .iter()
            .find(|p| p.fslabel.as_deref() == Some(label))
    }

    pub fn match_partition_plabel(&self, label: &str) -> Option<&Partition> {
        self.partitions.iter().find(|p| p.plabel == label)
    }

    /// Virtual device path of partition `part`.
    pub fn partition_device(&self, part: &Partition) -> PathBuf {
        partition_path(&self.device, part.number)
    }
}

/// Whether LBA 1 starts with the GPT header signature.
fn has_gpt_signature(file: &mut File, sector_size: u64) -> HalResult<bool> {
    let mut signature = [0u8; 8];
    file.seek(SeekFrom::Start(sector_size))?;
    match file.read_exact(&mut signature) {
        Ok(()) => Ok(&signature == GPT_SIGNATURE),
        Err(err) if err.kind() == ErrorKind::UnexpectedEof => Ok(false),
        Err(err) => Err(err.into()),
    }
}

pub(crate) fn logical_block_size(sector_size: u64) -> HalResult<LogicalBlockSize> {
    match sector_size {
        512 => Ok(LogicalBlockSize::Lb512),
        4096 => Ok(LogicalBlockSize::Lb4096),
        other => Err(HalError::Other(format!(
            "unsupported logical sector size {}",
            other
        ))),
    }
}

#[cfg(test)]
pub(crate) fn snapshot(
    sector_size: u64,
    total_sectors: u64,
    partitions: Vec<Partition>,
) -> Disk {
    Disk {
        device: PathBuf::from("/dev/vda"),
        real_path: PathBuf::from("/dev/vda"),
        sector_size,
        total_sectors,
        first_usable: 34,
        last_usable: total_sectors - 34,
        guid: Some(Uuid::nil()),
        backup_misplaced: false,
        partitions,
    }
}
