// src/api/mod.rs

//! The dashboard's cluster endpoints, as seen by the supervisor.
//!
//! The supervisor only ever reads a cluster record and flips its `ready`
//! flag. [`ClusterApi`] is the seam; [`HttpClusterApi`] is the production
//! client.

pub mod http;

use std::fmt::Debug;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::Result;

pub use http::HttpClusterApi;

/// A cluster as stored by the dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub nodes: Vec<NodeRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
    pub hostname: String,
    pub ip_address: String,
    pub role: NodeRole,
    #[serde(default)]
    pub auth_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Master,
    Worker,
}

impl ClusterRecord {
    pub fn count_role(&self, role: NodeRole) -> usize {
        self.nodes.iter().filter(|n| n.role == role).count()
    }
}

#[async_trait]
pub trait ClusterApi: Send + Sync + Debug {
    async fn fetch_cluster(&self, cluster_id: &str) -> Result<ClusterRecord>;

    /// Flag the cluster as provisioned.
    async fn mark_ready(&self, cluster_id: &str) -> Result<()>;
}
