use log::{LevelFilter, Log, Metadata, Record};

/// Fans records out to several loggers.
///
/// Per-target filters cap the level of records whose target starts with a
/// given prefix, for every logger at once.
pub struct MultiLogger {
    loggers: Vec<Box<dyn Log>>,
    target_filters: Vec<(String, LevelFilter)>,
}

impl Default for MultiLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl MultiLogger {
    pub fn new() -> Self {
        Self {
            loggers: Vec::new(),
            target_filters: Vec::new(),
        }
    }

    pub fn with_logger(mut self, logger: Box<dyn Log>) -> Self {
        self.loggers.push(logger);
        self
    }

    pub fn with_target_filter(mut self, target: impl Into<String>, level: LevelFilter) -> Self {
        self.target_filters.push((target.into(), level));
        self
    }

    pub fn add_logger(&mut self, logger: Box<dyn Log>) {
        self.loggers.push(logger);
    }

    /// Installs the logger. Every level reaches it; the loggers it fans out
    /// to filter on their own.
    pub fn init(self) -> Result<(), log::SetLoggerError> {
        log::set_max_level(LevelFilter::Trace);
        log::set_boxed_logger(Box::new(self))
    }

    fn passes_filters(&self, metadata: &Metadata) -> bool {
        // Longest matching prefix wins
        self.target_filters
            .iter()
            .filter(|(target, _)| metadata.target().starts_with(target.as_str()))
            .max_by_key(|(target, _)| target.len())
            .map_or(true, |(_, level)| metadata.level() <= *level)
    }
}

impl Log for MultiLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.passes_filters(metadata) && self.loggers.iter().any(|l| l.enabled(metadata))
    }

    fn log(&self, record: &Record) {
        if !self.passes_filters(record.metadata()) {
            return;
        }
        self.loggers
            .iter()
            .filter(|l| l.enabled(record.metadata()))
            .for_each(|l| l.log(record));
    }

    fn flush(&self) {
        self.loggers.iter().for_each(|l| l.flush());
    }
}
