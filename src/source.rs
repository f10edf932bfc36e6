//! Retrieval of the cluster's statistics documents.

use async_trait::async_trait;
use serde_json::Value;

use crate::config::MonitorConfig;
use crate::error::{Error, Result};

pub const CLUSTER_HEALTH: &str = "/_cluster/health";
pub const NODES: &str = "/_nodes";
pub const CLUSTER_STATS: &str = "/_cluster/stats";
pub const NODE_STATS: &str = "/_nodes/stats";

/// A source of json documents, addressed by endpoint path.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Fetch and parse the document at the given path, e.g. [`CLUSTER_HEALTH`].
    async fn fetch(&self, path: &str) -> Result<Value>;

    /// Describes the source in log records.
    fn describe(&self) -> &str {
        "document source"
    }
}

/// Http access to an Elasticsearch cluster.
#[derive(Debug, Clone)]
pub struct ClusterClient {
    http: reqwest::Client,
    /// Base url, without trailing slash.
    url: String,
    /// User and password for basic authentication.
    credentials: Option<(String, String)>,
}

impl ClusterClient {
    /// Validate the configuration and build the http client.
    pub fn new(config: &MonitorConfig) -> Result<Self> {
        let config = config.clone().validated()?;

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout).connect_timeout(timeout);
        }

        let credentials = config
            .user
            .map(|user| (user, config.password.unwrap_or_default()));

        Ok(Self {
            http: builder.build()?,
            url: config.url,
            credentials,
        })
    }

    /// The base url requests are sent to.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// GET the given path, failing on any status other than 200.
    pub async fn get(&self, path: &str) -> Result<String> {
        let url = format!("{}{}", self.url, path);

        let mut request = self.http.get(&url);
        if let Some((user, password)) = &self.credentials {
            request = request.basic_auth(user, Some(password));
        }

        let response = request.send().await?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let error = Error::Status {
                url,
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or_default().to_owned(),
            };
            tracing::warn!("{}", error);

            return Err(error);
        }

        Ok(response.text().await?)
    }
}

#[async_trait]
impl DocumentSource for ClusterClient {
    async fn fetch(&self, path: &str) -> Result<Value> {
        let body = self.get(path).await?;
        Ok(serde_json::from_str(&body)?)
    }

    fn describe(&self) -> &str {
        &self.url
    }
}
