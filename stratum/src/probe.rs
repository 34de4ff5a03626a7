//! Human-readable disk report for `stratum probe`.

use std::fmt;
use stratum_hal::Disk;

/// Display adapter for a [`Disk`] snapshot.
pub struct Report<'a>(pub &'a Disk);

impl fmt::Display for Report<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let disk = self.0;
        writeln!(f, "Device:        {}", disk.device().display())?;
        writeln!(
            f,
            "Sectors:       {} x {} bytes ({} MiB)",
            disk.total_sectors(),
            disk.sector_size(),
            disk.sectors_to_mib(disk.total_sectors())
        )?;
        match disk.guid() {
            Some(guid) => {
                writeln!(f, "GPT:           {}", guid)?;
                writeln!(f, "Last usable:   {}", disk.last_usable_sector())?;
                if disk.backup_misplaced() {
                    writeln!(
                        f,
                        "Backup header: not at device end (usable up to {} once moved)",
                        disk.device_last_usable_sector()
                    )?;
                }
            }
            None => writeln!(f, "GPT:           none")?,
        }
        writeln!(
            f,
            "Free:          {} MiB after sector {}",
            disk.sectors_to_mib(disk.free_sectors()),
            disk.next_start_sector().saturating_sub(1)
        )?;

        if disk.partitions().is_empty() {
            return writeln!(f, "No partitions");
        }
        writeln!(
            f,
            "{:>3}  {:>12}  {:>12}  {:>8}  {:<16}  {:<16}  {}",
            "#", "START", "END", "MiB", "PLABEL", "FSLABEL", "FS"
        )?;
        for part in disk.partitions() {
            writeln!(
                f,
                "{:>3}  {:>12}  {:>12}  {:>8}  {:<16}  {:<16}  {}",
                part.number,
                part.start,
                part.end,
                disk.sectors_to_mib(part.size_sectors()),
                part.plabel,
                part.fslabel.as_deref().unwrap_or("-"),
                part.filesystem_name()
            )?;
        }
        Ok(())
    }
}

pub fn render(disk: &Disk) -> String {
    Report(disk).to_string()
}
