use std::path::PathBuf;
use std::str::FromStr;

/// Runtime settings for the operator binary, read from `ROOMBOOK_*`
/// environment variables. Missing or unparsable values use the default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    /// Compact the journal once this many appends accumulated.
    pub compact_threshold: u64,
    /// Buffered notices per contact before slow listeners lag.
    pub notify_capacity: usize,
    /// Pending journal commands before saves wait on the writer.
    pub journal_queue: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            compact_threshold: 1000,
            notify_capacity: 256,
            journal_queue: 4096,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            data_dir: lookup("ROOMBOOK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            compact_threshold: parsed(&lookup, "ROOMBOOK_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            notify_capacity: parsed(&lookup, "ROOMBOOK_NOTIFY_CAPACITY")
                .unwrap_or(defaults.notify_capacity),
            journal_queue: parsed(&lookup, "ROOMBOOK_JOURNAL_QUEUE")
                .unwrap_or(defaults.journal_queue),
        }
    }

    pub fn journal_path(&self) -> PathBuf {
        self.data_dir.join("reservations.journal")
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|s| s.parse().ok())
}
