use env_logger::Target;
use log::LevelFilter;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const LOG_FILE_ENV: &str = "STRATUM_LOG_FILE";

pub fn level_for(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Log file from the command line, else from `STRATUM_LOG_FILE`.
pub fn log_file_path(flag: Option<&Path>) -> Option<PathBuf> {
    flag.map(Path::to_path_buf)
        .or_else(|| std::env::var_os(LOG_FILE_ENV).map(PathBuf::from))
        .filter(|p| !p.as_os_str().is_empty())
}

pub fn init(verbosity: u8, log_file: Option<&Path>) {
    // A log file we cannot create (permissions, readonly FS) falls back to stderr.
    let target = log_file_path(log_file)
        .and_then(|path| {
            (|| -> io::Result<Target> {
                if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                    fs::create_dir_all(dir)?;
                }
                let file = fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)?;
                Ok(Target::Pipe(Box::new(file)))
            })()
            .ok()
        })
        .unwrap_or(Target::Stderr);

    env_logger::Builder::new()
        .filter_level(level_for(verbosity))
        .parse_default_env()
        .target(target)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_raises_level() {
        assert_eq!(level_for(0), LevelFilter::Info);
        assert_eq!(level_for(1), LevelFilter::Debug);
        assert_eq!(level_for(2), LevelFilter::Trace);
        assert_eq!(level_for(9), LevelFilter::Trace);
    }

    #[test]
    fn flag_wins_over_environment() {
        let flag = Path::new("/tmp/stratum-flag.log");
        assert_eq!(log_file_path(Some(flag)), Some(flag.to_path_buf()));
    }
}
