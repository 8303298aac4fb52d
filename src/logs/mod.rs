// src/logs/mod.rs

//! Per-cluster deployment logs.
//!
//! - [`sink`] is the durable, append-only store with last-line dedup.
//! - [`broadcast`] tracks live observers per cluster and fans lines out.
//! - [`stream`] couples the two so that replay-then-live delivery is
//!   gap-free and duplicate-free for every observer.

pub mod broadcast;
pub mod sink;
pub mod stream;

use serde::Serialize;

use crate::types::ClusterId;

pub use broadcast::{BroadcastChannel, Observer, ObserverId};
pub use sink::LogSink;
pub use stream::LogStream;

/// One emitted line of deployment output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogLine {
    pub cluster_id: ClusterId,
    pub text: String,
}

impl LogLine {
    pub fn new(cluster_id: impl Into<ClusterId>, text: impl Into<String>) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            text: text.into(),
        }
    }
}

/// Strip exactly one trailing line terminator (`\n` or `\r\n`).
pub fn normalize(raw: &str) -> &str {
    match raw.strip_suffix('\n') {
        Some(rest) => rest.strip_suffix('\r').unwrap_or(rest),
        None => raw,
    }
}

#[cfg(test)]
mod tests {
    use super::normalize;

    #[test]
    fn normalize_strips_a_single_terminator() {
        assert_eq!(normalize("hello\n"), "hello");
        assert_eq!(normalize("hello\r\n"), "hello");
        assert_eq!(normalize("hello\n\n"), "hello\n");
        assert_eq!(normalize("hello"), "hello");
        assert_eq!(normalize(""), "");
    }
}
