// src/exec/output.rs

//! Line pumps from child pipes into the log stream.
//!
//! All tagging of process output happens here: stdout lines are prefixed
//! `[<label>]`, stderr lines `[<label> stderr]`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::logs::{normalize, LogStream};
use crate::types::StreamKind;

/// Prefix for one line of output from a step labelled `label`.
pub fn line_prefix(label: &str, stream: StreamKind) -> String {
    match stream {
        StreamKind::Stdout => format!("[{label}]"),
        StreamKind::Stderr => format!("[{label} stderr]"),
    }
}

/// Render a tagged output line.
pub fn tag_line(label: &str, stream: StreamKind, text: &str) -> String {
    format!("{} {}", line_prefix(label, stream), text)
}

/// The reader tasks attached to one child process.
#[derive(Debug)]
pub struct OutputTap {
    pumps: Vec<JoinHandle<()>>,
    marker_seen: Arc<AtomicBool>,
}

impl OutputTap {
    /// Take the child's stdout/stderr pipes and start pumping them.
    ///
    /// Pipes can only be taken once, so a second call for the same child
    /// returns `None` and no line is ever emitted twice.
    pub fn attach(
        child: &mut Child,
        cluster: &str,
        label: &'static str,
        marker: Option<Regex>,
        stream: &LogStream,
    ) -> Option<Self> {
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        if stdout.is_none() && stderr.is_none() {
            debug!(cluster, step = label, "output already attached; ignoring");
            return None;
        }

        let marker_seen = Arc::new(AtomicBool::new(false));
        let mut pumps = Vec::with_capacity(2);

        if let Some(out) = stdout {
            pumps.push(spawn_pump(
                out,
                StreamKind::Stdout,
                cluster,
                label,
                marker.clone(),
                marker_seen.clone(),
                stream.clone(),
            ));
        }
        if let Some(err) = stderr {
            pumps.push(spawn_pump(
                err,
                StreamKind::Stderr,
                cluster,
                label,
                marker,
                marker_seen.clone(),
                stream.clone(),
            ));
        }

        Some(Self { pumps, marker_seen })
    }

    pub fn marker_seen(&self) -> bool {
        self.marker_seen.load(Ordering::SeqCst)
    }

    /// Wait until both pipes reached EOF.
    pub async fn finish(&mut self) {
        for pump in self.pumps.iter_mut() {
            if let Err(e) = pump.await {
                warn!(error = %e, "output pump task failed");
            }
        }
        self.pumps.clear();
    }

    /// Stop reading. Used after a kill when descendants may keep the pipes
    /// open.
    pub fn abort(&mut self) {
        for pump in self.pumps.drain(..) {
            pump.abort();
        }
    }
}

fn spawn_pump<R>(
    pipe: R,
    kind: StreamKind,
    cluster: &str,
    label: &'static str,
    marker: Option<Regex>,
    marker_seen: Arc<AtomicBool>,
    stream: LogStream,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let cluster = cluster.to_string();
    tokio::spawn(async move {
        // Byte-oriented so that non-UTF-8 output (remote hosts, progress
        // bars) is rendered lossily instead of ending the pump.
        let mut reader = BufReader::new(pipe);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let raw = String::from_utf8_lossy(&buf);
                    let line = normalize(&raw);
                    if let Some(re) = &marker {
                        if re.is_match(line) {
                            marker_seen.store(true, Ordering::SeqCst);
                        }
                    }
                    stream.emit(&cluster, &tag_line(label, kind, line));
                }
                Err(e) => {
                    warn!(cluster = %cluster, step = label, error = %e, "error reading process output");
                    break;
                }
            }
        }
    })
}
