//! Logging of the storplan binary: records go to stderr and, optionally, to
//! a JSON-lines file.

use std::path::Path;

use anyhow::{Context, Error};
use log::LevelFilter;

use self::{file_log::FileLog, multilog::MultiLogger};

pub(super) mod file_log;
pub(super) mod multilog;

/// Target of the free space dumps.
const DEVICEGRAPH_TARGET: &str = "storplan_api::devicegraph";

/// Builds the logger of one run.
///
/// The stderr logger honors `verbosity`. With a `log_file`, every record is
/// also written there. Without one, devicegraph records are capped at debug
/// level so free space dumps stay out of the terminal.
pub fn logger(verbosity: LevelFilter, log_file: Option<&Path>) -> Result<MultiLogger, Error> {
    let stderr = env_logger::builder()
        .format_timestamp(None)
        .filter_level(verbosity)
        .build();
    let mut logger = MultiLogger::new().with_logger(Box::new(stderr));

    match log_file {
        Some(path) => {
            let file_log = FileLog::create(path, LevelFilter::Trace)
                .with_context(|| format!("Failed to create log file '{}'", path.display()))?;
            logger.add_logger(Box::new(file_log));
        }
        None => logger = logger.with_target_filter(DEVICEGRAPH_TARGET, LevelFilter::Debug),
    }
    Ok(logger)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use log::{Level, Log, Metadata, Record};
    use tempfile::tempdir;

    use super::*;

    fn metadata(target: &str, level: Level) -> Metadata<'_> {
        Metadata::builder().target(target).level(level).build()
    }

    #[test]
    fn test_terminal_only() {
        let verbose = logger(LevelFilter::Trace, None).unwrap();
        assert!(verbose.enabled(&metadata("storplan::engine::distribution", Level::Trace)));
        assert!(verbose.enabled(&metadata(DEVICEGRAPH_TARGET, Level::Debug)));
        assert!(!verbose.enabled(&metadata(DEVICEGRAPH_TARGET, Level::Trace)));

        let quiet = logger(LevelFilter::Warn, None).unwrap();
        assert!(!quiet.enabled(&metadata("storplan::engine::proposal", Level::Info)));
    }

    #[test]
    fn test_log_file_keeps_everything() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("storplan.log");
        let multi = logger(LevelFilter::Error, Some(&path)).unwrap();

        // Quiet terminal, but the file still gets the free space dumps
        assert!(multi.enabled(&metadata(DEVICEGRAPH_TARGET, Level::Trace)));
        multi.log(
            &Record::builder()
                .target(DEVICEGRAPH_TARGET)
                .level(Level::Trace)
                .args(format_args!("Free spaces of '/dev/sda': []"))
                .build(),
        );
        multi.flush();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(content.contains("Free spaces of '/dev/sda'"));
    }

    #[test]
    fn test_bad_log_file() {
        let dir = tempdir().unwrap();
        let Err(err) = logger(LevelFilter::Info, Some(dir.path())) else {
            panic!("a directory cannot be a log file");
        };
        assert!(err.to_string().starts_with("Failed to create log file"));
    }
}
