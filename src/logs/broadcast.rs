// src/logs/broadcast.rs

//! Live observers per cluster and best-effort fan-out.

use std::collections::HashMap;
use std::fmt;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::logs::LogLine;
use crate::types::ClusterId;

pub type ObserverId = Uuid;

/// A live subscriber to one or more cluster log streams.
///
/// Delivery goes through an unbounded channel, so publishing never waits on
/// a slow reader.
#[derive(Clone)]
pub struct Observer {
    id: ObserverId,
    sender: mpsc::UnboundedSender<LogLine>,
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("id", &self.id)
            .field("channel_closed", &self.sender.is_closed())
            .finish()
    }
}

impl Observer {
    /// Create an observer with a fresh id and the receiving end of its
    /// delivery channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<LogLine>) {
        Self::with_id(Uuid::new_v4())
    }

    pub fn with_id(id: ObserverId) -> (Self, mpsc::UnboundedReceiver<LogLine>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { id, sender }, receiver)
    }

    pub fn id(&self) -> ObserverId {
        self.id
    }

    /// Deliver a line. Returns false once the receiving side is gone.
    pub fn deliver(&self, line: LogLine) -> bool {
        self.sender.send(line).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Maps cluster -> joined observers.
#[derive(Default)]
pub struct BroadcastChannel {
    rooms: RwLock<HashMap<ClusterId, Vec<Observer>>>,
}

impl fmt::Debug for BroadcastChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BroadcastChannel")
            .field("room_count", &self.rooms.read().len())
            .finish()
    }
}

impl BroadcastChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join `observer` to `cluster`. Joining again with the same observer id
    /// replaces the earlier registration.
    pub fn join(&self, cluster: &str, observer: Observer) {
        let mut rooms = self.rooms.write();
        let room = rooms.entry(cluster.to_string()).or_default();
        room.retain(|o| o.id != observer.id);
        room.push(observer);
    }

    /// Deliver `line` to every observer of its cluster. Observers whose
    /// channel has closed are dropped. Returns the number of deliveries.
    pub fn publish(&self, line: &LogLine) -> usize {
        let mut delivered = 0;
        let mut saw_closed = false;

        if let Some(room) = self.rooms.read().get(&line.cluster_id) {
            for observer in room {
                if observer.deliver(line.clone()) {
                    delivered += 1;
                } else {
                    saw_closed = true;
                }
            }
        }

        if saw_closed {
            self.prune(&line.cluster_id);
        }

        delivered
    }

    /// Remove an observer from every cluster it joined.
    pub fn leave(&self, id: ObserverId) {
        let mut rooms = self.rooms.write();
        for room in rooms.values_mut() {
            room.retain(|o| o.id != id);
        }
        rooms.retain(|_, room| !room.is_empty());
    }

    pub fn contains(&self, cluster: &str, id: ObserverId) -> bool {
        self.rooms
            .read()
            .get(cluster)
            .is_some_and(|room| room.iter().any(|o| o.id == id && !o.is_closed()))
    }

    pub fn observer_count(&self, cluster: &str) -> usize {
        self.rooms.read().get(cluster).map_or(0, Vec::len)
    }

    fn prune(&self, cluster: &str) {
        let mut rooms = self.rooms.write();
        if let Some(room) = rooms.get_mut(cluster) {
            let before = room.len();
            room.retain(|o| !o.is_closed());
            debug!(cluster, dropped = before - room.len(), "pruned closed observers");
            if room.is_empty() {
                rooms.remove(cluster);
            }
        }
    }
}
