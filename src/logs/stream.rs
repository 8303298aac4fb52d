// src/logs/stream.rs

//! The shared write/observe path for deployment output.
//!
//! Appending (persist + publish) and attaching (replay + join) for the same
//! cluster are serialised by a per-cluster gate. An observer therefore sees
//! every line exactly once: either in its replay or live, never both and
//! never neither.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::fs::FileSystem;
use crate::logs::{normalize, BroadcastChannel, LogLine, LogSink, Observer, ObserverId};

/// Cheaply cloneable handle to the log sink + broadcast channel pair.
#[derive(Debug, Clone)]
pub struct LogStream {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    sink: LogSink,
    channel: BroadcastChannel,
    gates: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LogStream {
    pub fn new(fs: Arc<dyn FileSystem>, log_dir: impl AsRef<Path>) -> Self {
        Self {
            inner: Arc::new(Inner {
                sink: LogSink::new(fs, log_dir.as_ref()),
                channel: BroadcastChannel::new(),
                gates: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn sink(&self) -> &LogSink {
        &self.inner.sink
    }

    pub fn channel(&self) -> &BroadcastChannel {
        &self.inner.channel
    }

    /// Emit a chunk of output for `cluster`.
    ///
    /// A chunk holding several lines is split and each line goes through
    /// dedup separately. Returns the lines that were actually emitted.
    pub fn emit(&self, cluster: &str, chunk: &str) -> Vec<LogLine> {
        let gate = self.gate(cluster);
        let _held = gate.lock();

        let body = normalize(chunk);
        let mut emitted = Vec::new();
        for raw in body.split('\n') {
            if let Some(line) = self.append_locked(cluster, raw) {
                emitted.push(line);
            }
        }
        emitted
    }

    /// Attach `observer` to `cluster`: replay the persisted history, then the
    /// notice built by `notice`, then register for live lines.
    ///
    /// `notice` runs under the cluster gate, so it sees the same state as
    /// the replay. An observer already in the room gets nothing: it has
    /// every line up to now. Returns the number of replayed lines.
    pub fn attach<F>(&self, cluster: &str, observer: Observer, notice: F) -> Result<usize>
    where
        F: FnOnce() -> Option<String>,
    {
        let gate = self.gate(cluster);
        let _held = gate.lock();

        if self.inner.channel.contains(cluster, observer.id()) {
            debug!(cluster, observer = %observer.id(), "observer already attached");
            return Ok(0);
        }

        let history = self.inner.sink.read_all(cluster)?;
        let replayed = history.len();
        for line in history {
            if !observer.deliver(line) {
                debug!(cluster, observer = %observer.id(), "observer went away during replay");
                return Ok(replayed);
            }
        }

        if let Some(text) = notice() {
            observer.deliver(LogLine::new(cluster, text));
        }

        self.inner.channel.join(cluster, observer);
        Ok(replayed)
    }

    pub fn detach(&self, observer: ObserverId) {
        self.inner.channel.leave(observer);
    }

    /// Persisted history of `cluster`.
    pub fn history(&self, cluster: &str) -> Result<Vec<LogLine>> {
        self.inner.sink.read_all(cluster)
    }

    /// Truncate the log of `cluster`. Observers stay attached.
    pub fn clear(&self, cluster: &str) -> Result<()> {
        let gate = self.gate(cluster);
        let _held = gate.lock();
        self.inner.sink.clear(cluster)
    }

    fn append_locked(&self, cluster: &str, raw: &str) -> Option<LogLine> {
        let line = match self.inner.sink.append(cluster, raw) {
            Ok(Some(line)) => line,
            Ok(None) => return None,
            Err(e) => {
                warn!(cluster, error = %e, "failed to persist log line; delivering live only");
                LogLine::new(cluster, normalize(raw))
            }
        };

        self.inner.channel.publish(&line);
        Some(line)
    }

    fn gate(&self, cluster: &str) -> Arc<Mutex<()>> {
        self.inner
            .gates
            .lock()
            .entry(cluster.to_string())
            .or_default()
            .clone()
    }
}
