// src/api/http.rs

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::json;
use tracing::{debug, info};

use crate::api::{ClusterApi, ClusterRecord};
use crate::errors::{Result, SupervisorError};

/// `reqwest` client for `{base}/api/clusters/`.
#[derive(Debug, Clone)]
pub struct HttpClusterApi {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpClusterApi {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}/api/clusters/", self.base_url)
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    fn check(cluster_id: &str, status: StatusCode) -> Result<()> {
        if status == StatusCode::NOT_FOUND {
            return Err(SupervisorError::NotFound(cluster_id.to_string()));
        }
        if !status.is_success() {
            return Err(SupervisorError::Api(format!(
                "cluster {cluster_id}: unexpected status {status}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterApi for HttpClusterApi {
    async fn fetch_cluster(&self, cluster_id: &str) -> Result<ClusterRecord> {
        debug!(cluster = cluster_id, "fetching cluster record");
        let req = self
            .client
            .get(self.endpoint())
            .query(&[("id", cluster_id)]);
        let resp = self.authorize(req).send().await?;
        Self::check(cluster_id, resp.status())?;
        Ok(resp.json::<ClusterRecord>().await?)
    }

    async fn mark_ready(&self, cluster_id: &str) -> Result<()> {
        let req = self
            .client
            .put(self.endpoint())
            .query(&[("id", cluster_id)])
            .json(&json!({ "ready": true }));
        let resp = self.authorize(req).send().await?;
        Self::check(cluster_id, resp.status())?;
        info!(cluster = cluster_id, "cluster marked ready");
        Ok(())
    }
}
