// src/server/protocol.rs

//! JSON frames exchanged over `/api/socket`.
//!
//! Every frame is an object with an `event` discriminator, e.g.
//! `{"event":"run-script","clusterId":"42"}`.

use serde::{Deserialize, Deserializer, Serialize};

use crate::supervisor::ClusterStatus;
use crate::types::ClusterId;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ClientEvent {
    #[serde(rename_all = "camelCase")]
    RunScript {
        #[serde(deserialize_with = "cluster_id")]
        cluster_id: ClusterId,
    },
    #[serde(rename_all = "camelCase")]
    RequestLogs {
        #[serde(deserialize_with = "cluster_id")]
        cluster_id: ClusterId,
    },
    #[serde(rename_all = "camelCase")]
    KillScript {
        #[serde(deserialize_with = "cluster_id")]
        cluster_id: ClusterId,
    },
    #[serde(rename_all = "camelCase")]
    ClearLogs {
        #[serde(deserialize_with = "cluster_id")]
        cluster_id: ClusterId,
    },
    #[serde(rename_all = "camelCase")]
    RequestStatus {
        #[serde(deserialize_with = "cluster_id")]
        cluster_id: ClusterId,
    },
}

impl ClientEvent {
    pub fn cluster_id(&self) -> &str {
        match self {
            ClientEvent::RunScript { cluster_id }
            | ClientEvent::RequestLogs { cluster_id }
            | ClientEvent::KillScript { cluster_id }
            | ClientEvent::ClearLogs { cluster_id }
            | ClientEvent::RequestStatus { cluster_id } => cluster_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ServerEvent {
    #[serde(rename_all = "camelCase")]
    Log { cluster_id: ClusterId, line: String },
    Status(ClusterStatus),
    /// The client sent a frame we could not understand.
    Error { message: String },
}

impl ServerEvent {
    pub fn log(cluster_id: impl Into<ClusterId>, line: impl Into<String>) -> Self {
        ServerEvent::Log {
            cluster_id: cluster_id.into(),
            line: line.into(),
        }
    }
}

/// The dashboard sends numeric database ids as well as strings.
fn cluster_id<'de, D>(de: D) -> Result<ClusterId, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    Ok(match Raw::deserialize(de)? {
        Raw::Text(s) => s,
        Raw::Number(n) => n.to_string(),
    })
}
