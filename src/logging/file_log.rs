use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
    sync::Mutex,
    time::Instant,
};

use log::{LevelFilter, Log, Metadata, Record};
use serde::{Deserialize, Serialize};

/// One line of the log file.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct FileLogLine {
    /// Milliseconds since the run started, to tell how close the guided
    /// search came to its deadline.
    pub elapsed_ms: u64,
    pub level: String,
    pub target: String,
    pub message: String,
}

/// JSON-lines log of one run. The file is truncated when created, so it only
/// ever holds the latest run.
pub struct FileLog {
    writer: Mutex<BufWriter<File>>,
    max_level: LevelFilter,
    started: Instant,
}

impl FileLog {
    pub fn create(path: &Path, max_level: LevelFilter) -> std::io::Result<Self> {
        Ok(Self {
            writer: Mutex::new(BufWriter::new(File::create(path)?)),
            max_level,
            started: Instant::now(),
        })
    }

    fn line(&self, record: &Record) -> FileLogLine {
        FileLogLine {
            elapsed_ms: u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX),
            level: record.level().as_str().to_lowercase(),
            target: record.target().to_owned(),
            message: record.args().to_string(),
        }
    }
}

impl Log for FileLog {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        let Ok(mut serialized) = serde_json::to_string(&self.line(record)) else {
            return;
        };
        serialized.push('\n');
        if let Ok(mut writer) = self.writer.lock() {
            let _ = writer.write_all(serialized.as_bytes());
        }
    }

    fn flush(&self) {
        if let Ok(mut writer) = self.writer.lock() {
            let _ = writer.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use log::Level;
    use tempfile::tempdir;

    use super::*;

    fn record<'a>(target: &'a str, level: Level, message: std::fmt::Arguments<'a>) -> Record<'a> {
        Record::builder().target(target).level(level).args(message).build()
    }

    #[test]
    fn test_previous_run_is_discarded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("storplan.log");
        fs::write(&path, "{\"message\":\"attempt 12 of an older run\"}\n").unwrap();

        let log = FileLog::create(&path, LevelFilter::Debug).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "");

        log.log(&record(
            "storplan::engine::proposal",
            Level::Info,
            format_args!("Attempt 1: candidates [/dev/sda]"),
        ));
        log.flush();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<FileLogLine> = content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].level, "info");
        assert_eq!(lines[0].target, "storplan::engine::proposal");
        assert_eq!(lines[0].message, "Attempt 1: candidates [/dev/sda]");
        assert!(content.contains("\"elapsedMs\":"));
    }

    #[test]
    fn test_level_cap() {
        let dir = tempdir().unwrap();
        let log = FileLog::create(&dir.path().join("storplan.log"), LevelFilter::Debug).unwrap();
        let dump = Metadata::builder()
            .target("storplan_api::devicegraph")
            .level(Level::Trace)
            .build();
        assert!(!log.enabled(&dump));
        assert!(log.enabled(&Metadata::builder().level(Level::Debug).build()));
    }

    #[test]
    fn test_unwritable_path() {
        let dir = tempdir().unwrap();
        // A directory cannot be opened as a log file
        assert!(FileLog::create(dir.path(), LevelFilter::Trace).is_err());
    }
}
