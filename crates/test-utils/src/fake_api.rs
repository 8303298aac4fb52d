use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use autokube::api::{ClusterApi, ClusterRecord};
use autokube::errors::{Result, SupervisorError};

/// A fake cluster API that:
/// - serves records registered with `with_record`
/// - records every `mark_ready` call.
#[derive(Debug, Clone, Default)]
pub struct RecordingClusterApi {
    records: Arc<Mutex<HashMap<String, ClusterRecord>>>,
    ready_calls: Arc<Mutex<Vec<String>>>,
    fail_mark_ready: Arc<AtomicBool>,
}

impl RecordingClusterApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(self, record: ClusterRecord) -> Self {
        self.records.lock().insert(record.id.clone(), record);
        self
    }

    /// Make `mark_ready` fail (after recording the call).
    pub fn fail_mark_ready(&self, fail: bool) {
        self.fail_mark_ready.store(fail, Ordering::SeqCst);
    }

    pub fn ready_calls(&self) -> Vec<String> {
        self.ready_calls.lock().clone()
    }

    pub fn ready_count(&self, cluster: &str) -> usize {
        self.ready_calls.lock().iter().filter(|c| *c == cluster).count()
    }
}

#[async_trait]
impl ClusterApi for RecordingClusterApi {
    async fn fetch_cluster(&self, cluster_id: &str) -> Result<ClusterRecord> {
        self.records
            .lock()
            .get(cluster_id)
            .cloned()
            .ok_or_else(|| SupervisorError::NotFound(cluster_id.to_string()))
    }

    async fn mark_ready(&self, cluster_id: &str) -> Result<()> {
        self.ready_calls.lock().push(cluster_id.to_string());
        if self.fail_mark_ready.load(Ordering::SeqCst) {
            return Err(SupervisorError::Api("mark_ready refused".to_string()));
        }
        Ok(())
    }
}
