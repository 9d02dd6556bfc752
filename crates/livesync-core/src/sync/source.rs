//! Update source HTTP API
//!
//! The polling transport talks to the server through two endpoints:
//! `GET latest-update` and `POST update`. The trait keeps the polling loop
//! independent of the HTTP client so other sources can stand in for it.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::error::SyncResult;
use crate::models::{EntityType, Publication};

/// Response to a latest-update request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestUpdate {
    /// Whether the server handled the request
    pub success: bool,
    /// `None` with `success` means the id is no longer tracked
    #[serde(default)]
    pub result: Option<UpdateResult>,
    /// Failure description when `success` is false
    #[serde(default)]
    pub message: Option<String>,
}

/// Payload of a successful latest-update response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResult {
    /// New data, absent when nothing changed since the requested time
    #[serde(default)]
    pub data: Option<Value>,
    /// When the entity last changed on the server
    pub last_update: DateTime<Utc>,
}

/// Request/response access to the update server
#[async_trait]
pub trait UpdateSource: Send + Sync {
    /// Fetch data for `id` changed after `since`
    async fn latest_update(
        &self,
        id: &str,
        entity_type: EntityType,
        since: Option<DateTime<Utc>>,
    ) -> SyncResult<LatestUpdate>;

    /// Push a local change
    async fn post_update(&self, publication: &Publication) -> SyncResult<()>;
}

/// `UpdateSource` backed by the server's HTTP API
#[derive(Debug, Clone)]
pub struct HttpUpdateSource {
    base_url: String,
    client: reqwest::Client,
}

impl HttpUpdateSource {
    /// Create a source rooted at `base_url`
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

#[async_trait]
impl UpdateSource for HttpUpdateSource {
    async fn latest_update(
        &self,
        id: &str,
        entity_type: EntityType,
        since: Option<DateTime<Utc>>,
    ) -> SyncResult<LatestUpdate> {
        let mut query = vec![
            ("id", id.to_string()),
            ("type", entity_type.to_string()),
        ];
        if let Some(since) = since {
            query.push(("since", since.to_rfc3339()));
        }

        debug!(id = %id, "Polling for latest update");
        let response = self
            .client
            .get(self.endpoint("latest-update"))
            .query(&query)
            .send()
            .await?
            .error_for_status()?;

        Ok(response.json::<LatestUpdate>().await?)
    }

    async fn post_update(&self, publication: &Publication) -> SyncResult<()> {
        let body = json!({
            "id": publication.id,
            "type": publication.entity_type,
            "data": publication.data,
        });

        debug!(id = %publication.id, "Posting update");
        self.client
            .post(self.endpoint("update"))
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }
}
