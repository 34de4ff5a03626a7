//! stratum: declarative disk layout.
//!
//! Loads staged configuration, runs its `layout` steps against real devices through
//! `stratum-hal`, and exposes probing and online growth on the command line.

pub mod cli;
pub mod config;
pub mod errors;
pub mod layout;
pub mod logging;
pub mod probe;

use anyhow::Context;
use cli::{Cli, Command};
use config::Sources;
use errors::Result;
use layout::{apply_layout, Environment, LayoutReport};
use std::path::{Path, PathBuf};
use stratum_hal::{
    DeviceSelector, Disk, FsGrower, FsKind, HostFs, LinuxHal, PathResolver, RootedFs,
    SystemHal,
};

pub fn run(cli: Cli) -> Result<()> {
    let hal = LinuxHal::new();
    match cli.command {
        Command::Apply {
            stage,
            sources,
            root,
        } => {
            let resolver = resolver_for(root);
            let env = Environment::new(&hal, resolver.as_ref());
            let reports = apply_stage(&stage, &sources, &env)?;
            log::info!("Stage {}: {} layout step(s) applied", stage, reports.len());
        }
        Command::Probe { device, root } => {
            let resolver = resolver_for(root);
            let disk = Disk::open(&DeviceSelector::Path(device.clone()), resolver.as_ref())
                .with_context(|| format!("failed to probe {}", device.display()))?;
            print!("{}", probe::Report(&disk));
        }
        Command::Grow { device, filesystem } => {
            grow(&hal, &device, &filesystem)?;
        }
    }
    Ok(())
}

fn resolver_for(root: Option<PathBuf>) -> Box<dyn PathResolver> {
    match root {
        Some(root) => Box::new(RootedFs::new(root)),
        None => Box::new(HostFs),
    }
}

/// Run every layout step of `stage` found in `sources`, stopping at the first failure.
pub fn apply_stage<H: SystemHal>(
    stage: &str,
    sources: &[PathBuf],
    env: &Environment<'_, H>,
) -> Result<Vec<LayoutReport>> {
    let sources = Sources::load(sources)?;
    let steps = sources.layout_steps(stage);
    if steps.is_empty() {
        log::info!("Stage {} has no layout steps", stage);
    }

    let mut reports = Vec::with_capacity(steps.len());
    for step in steps {
        log::info!(
            "Running layout step '{}' from {}",
            step.name,
            step.source.display()
        );
        let report = apply_layout(&step.layout, env).with_context(|| {
            format!(
                "layout step '{}' from {} failed",
                step.name,
                step.source.display()
            )
        })?;
        log::info!(
            "Layout on {}: {} created, {} skipped, expanded: {}",
            report.device.display(),
            report.created.len(),
            report.skipped.len(),
            report.expanded
        );
        reports.push(report);
    }
    Ok(reports)
}

fn grow(hal: &LinuxHal, device: &Path, filesystem: &str) -> Result<()> {
    let kind: FsKind = filesystem.parse()?;
    let report = FsGrower::new(hal)
        .grow_to_max(device, kind)
        .with_context(|| format!("failed to grow {} on {}", kind, device.display()))?;
    println!(
        "{}: {} grown to {} blocks of {} bytes",
        device.display(),
        report.kind,
        report.blocks,
        report.block_size
    );
    Ok(())
}
