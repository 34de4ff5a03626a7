//! Execution of one `layout` directive.
//!
//! Resolve the device, optionally initialize its table, append the requested partitions,
//! optionally expand the last one and grow its filesystem. Nothing is rolled back: a
//! failure leaves already committed partitions on disk.

use crate::config::Layout;
use anyhow::Context;
use std::path::PathBuf;
use stratum_hal::disk::table::disk_guid;
use stratum_hal::grow::resize;
use stratum_hal::{
    AddOutcome, DeviceSelector, Disk, FsGrower, GrowReport, HalError, Partition, PathResolver,
    SystemHal, TableManager,
};

/// OS access for a layout run.
pub struct Environment<'a, H: SystemHal> {
    pub hal: &'a H,
    pub resolver: &'a dyn PathResolver,
}

impl<'a, H: SystemHal> Environment<'a, H> {
    pub fn new(hal: &'a H, resolver: &'a dyn PathResolver) -> Self {
        Self { hal, resolver }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LayoutReport {
    pub device: PathBuf,
    pub initialized: bool,
    pub created: Vec<PathBuf>,
    pub skipped: Vec<String>,
    pub expanded: bool,
    pub grown: Option<GrowReport>,
    pub partitions: Vec<Partition>,
}

pub fn apply_layout<H: SystemHal>(
    layout: &Layout,
    env: &Environment<'_, H>,
) -> anyhow::Result<LayoutReport> {
    let selector = layout.selector()?;
    let manager = TableManager::new(env.hal);
    let mut report = LayoutReport::default();

    let mut disk = if layout.device.init_disk {
        let (disk, initialized) = ensure_table(
            &manager,
            &selector,
            layout.device.disk_name.as_deref(),
            env.resolver,
        )?;
        report.initialized = initialized;
        disk
    } else {
        Disk::open(&selector, env.resolver)
            .with_context(|| format!("failed to open device {}", selector))?
    };
    report.device = disk.device().to_path_buf();

    for request in layout.requests() {
        let (next, outcome) = manager.add_partition(&disk, &request).with_context(|| {
            format!(
                "failed to add partition {} to {}",
                request_name(&request),
                disk.device().display()
            )
        })?;
        match outcome {
            AddOutcome::Created { device, .. } => report.created.push(device),
            AddOutcome::Skipped { reason } => report.skipped.push(reason),
        }
        disk = next;
    }

    if let Some(size) = layout.expand_size() {
        disk = manager
            .expand_last_partition(&disk, size)
            .with_context(|| {
                format!(
                    "failed to expand last partition of {}",
                    disk.device().display()
                )
            })?;
        report.expanded = true;
        report.grown = grow_last(&disk, env)?;
    }

    let disk = disk.reload()?;
    report.partitions = disk.partitions().to_vec();
    Ok(report)
}

/// Initialize the table unless it already carries the GUID `disk_name` maps to.
///
/// A table holding partitions under another GUID is never wiped.
fn ensure_table(
    manager: &TableManager<'_>,
    selector: &DeviceSelector,
    disk_name: Option<&str>,
    resolver: &dyn PathResolver,
) -> anyhow::Result<(Disk, bool)> {
    if let DeviceSelector::Path(_) = selector {
        match Disk::open(selector, resolver) {
            Ok(disk) if disk.guid() == Some(disk_guid(disk_name)) => {
                log::info!(
                    "{} already initialized, keeping its partitions",
                    disk.device().display()
                );
                return Ok((disk, false));
            }
            Ok(disk) if !disk.partitions().is_empty() => {
                return Err(HalError::Config(format!(
                    "{} holds {} partition(s) under another disk GUID; refusing to reinitialize",
                    disk.device().display(),
                    disk.partitions().len()
                ))
                .into());
            }
            Ok(_) | Err(HalError::NotFound(_)) => {}
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {}", selector));
            }
        }
    }
    let disk = manager
        .init_disk(selector, disk_name, resolver)
        .with_context(|| format!("failed to initialize {}", selector))?;
    Ok((disk, true))
}

/// Grow the filesystem of the last partition, when there is one that can grow online.
fn grow_last<H: SystemHal>(
    disk: &Disk,
    env: &Environment<'_, H>,
) -> anyhow::Result<Option<GrowReport>> {
    let Some(part) = disk.last_partition() else {
        return Ok(None);
    };
    let Some(kind) = part.filesystem.filter(|kind| resize::supports(*kind)) else {
        log::info!(
            "not growing partition {}: filesystem {} has no online resize",
            part.number,
            part.filesystem_name()
        );
        return Ok(None);
    };

    let device = disk.partition_device(part);
    if !env.resolver.exists(&device) {
        log::warn!(
            "not growing {}: device node does not exist",
            device.display()
        );
        return Ok(None);
    }

    let report = FsGrower::new(env.hal)
        .grow_to_max(&env.resolver.resolve(&device), kind)
        .with_context(|| format!("failed to grow {} on {}", kind, device.display()))?;
    Ok(Some(report))
}

fn request_name(request: &stratum_hal::PartitionRequest) -> String {
    request
        .fslabel
        .as_deref()
        .or(request.plabel.as_deref())
        .unwrap_or(request.filesystem.as_str())
        .to_string()
}
