// src/logs/sink.rs

//! Durable per-cluster log files with consecutive-duplicate suppression.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::errors::{Result, SupervisorError};
use crate::fs::FileSystem;
use crate::logs::{normalize, LogLine};
use crate::types::ClusterId;

/// What the sink remembers about a cluster's most recent line.
#[derive(Debug)]
enum LastLine {
    /// Not looked at the log file yet in this process.
    Unseeded,
    Known(Option<String>),
}

/// Append-only log store, one file per cluster at
/// `<log_dir>/deploy-<cluster>.log`.
///
/// A line equal to the line emitted immediately before it for the same
/// cluster is dropped. Only the previous line is compared; earlier history
/// is irrelevant.
#[derive(Debug)]
pub struct LogSink {
    fs: Arc<dyn FileSystem>,
    log_dir: PathBuf,
    last: Mutex<HashMap<ClusterId, Arc<Mutex<LastLine>>>>,
}

impl LogSink {
    pub fn new(fs: Arc<dyn FileSystem>, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            log_dir: log_dir.into(),
            last: Mutex::new(HashMap::new()),
        }
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    pub fn log_path(&self, cluster: &str) -> PathBuf {
        self.log_dir.join(format!("deploy-{cluster}.log"))
    }

    /// Append one logical line for `cluster`.
    ///
    /// Returns `Ok(None)` when the line repeats the previous one and was
    /// suppressed. On a write error the line still counts as emitted for
    /// dedup purposes; the caller decides whether to fan it out.
    pub fn append(&self, cluster: &str, raw: &str) -> Result<Option<LogLine>> {
        let text = normalize(raw);
        let slot = self.slot(cluster);
        let mut last = slot.lock();

        if matches!(*last, LastLine::Unseeded) {
            *last = LastLine::Known(self.seed_last_line(cluster));
        }

        if let LastLine::Known(Some(previous)) = &*last {
            if previous == text {
                debug!(cluster, "suppressed duplicate log line");
                return Ok(None);
            }
        }
        *last = LastLine::Known(Some(text.to_string()));

        let path = self.log_path(cluster);
        let mut record = String::with_capacity(text.len() + 1);
        record.push_str(text);
        record.push('\n');
        self.fs.append(&path, record.as_bytes())?;

        Ok(Some(LogLine::new(cluster, text)))
    }

    /// Every persisted line for `cluster`, oldest first. A cluster that has
    /// never logged anything has an empty history.
    pub fn read_all(&self, cluster: &str) -> Result<Vec<LogLine>> {
        let path = self.log_path(cluster);
        if !self.fs.is_file(&path) {
            return Ok(Vec::new());
        }

        let contents = self.fs.read_to_string(&path)?;
        Ok(contents
            .lines()
            .map(|line| LogLine::new(cluster, line))
            .collect())
    }

    /// Truncate the log of `cluster`.
    pub fn clear(&self, cluster: &str) -> Result<()> {
        let path = self.log_path(cluster);
        if !self.fs.is_file(&path) {
            return Err(SupervisorError::NotFound(cluster.to_string()));
        }

        let slot = self.slot(cluster);
        let mut last = slot.lock();
        self.fs.write(&path, b"")?;
        *last = LastLine::Known(None);

        debug!(cluster, path = ?path, "log truncated");
        Ok(())
    }

    fn slot(&self, cluster: &str) -> Arc<Mutex<LastLine>> {
        let mut map = self.last.lock();
        map.entry(cluster.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(LastLine::Unseeded)))
            .clone()
    }

    fn seed_last_line(&self, cluster: &str) -> Option<String> {
        let path = self.log_path(cluster);
        if !self.fs.is_file(&path) {
            return None;
        }

        match self.fs.read_to_string(&path) {
            Ok(contents) => contents.lines().last().map(str::to_string),
            Err(e) => {
                warn!(cluster, error = %e, "could not read existing log; dedup starts fresh");
                None
            }
        }
    }
}
