//! REST client backend
//!
//! Talks to a wardwatch server (or any service speaking the same
//! `/rest/v1/:table` convention) with the anonymous API key. Change events
//! do not arrive over REST; pair this backend with a
//! [`crate::realtime::FeedBridge`] publishing into the same feed.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use super::backend::{Backend, NotificationOutcome, NotificationRequest};
use super::error::{StoreError, StoreResult};
use crate::model::{Filter, Query, Table};
use crate::realtime::ChangeFeed;

/// Connection settings for a remote backend
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Base URL, e.g. `http://localhost:8090`
    pub base_url: String,
    /// Anonymous API key sent as `apikey`
    pub anon_key: String,
    /// Session token sent as `Authorization: Bearer`, defaults to the anon key
    pub access_token: Option<String>,
    pub request_timeout_ms: u64,
}

impl RemoteConfig {
    pub fn new(base_url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
            access_token: None,
            request_timeout_ms: 10_000,
        }
    }
}

/// Backend reached over HTTP
pub struct RemoteBackend {
    client: Client,
    config: RemoteConfig,
    feed: Arc<ChangeFeed>,
}

impl RemoteBackend {
    pub fn new(config: RemoteConfig, feed: Arc<ChangeFeed>) -> StoreResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;

        Ok(Self {
            client,
            config,
            feed,
        })
    }

    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    fn table_url(&self, table: Table) -> String {
        format!("{}/rest/v1/{}", self.config.base_url, table)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let token = self
            .config
            .access_token
            .as_deref()
            .unwrap_or(&self.config.anon_key);
        request
            .header("apikey", &self.config.anon_key)
            .bearer_auth(token)
    }

    async fn rows(&self, response: Response) -> StoreResult<Vec<Value>> {
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }
}

/// Turn an error status into [`StoreError::Remote`], preferring the
/// server's own message
async fn check_status(response: Response) -> StoreResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&text)
        .ok()
        .and_then(|body| {
            body.pointer("/error/message")
                .or_else(|| body.get("error"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or(text);

    Err(StoreError::Remote {
        status: status.as_u16(),
        message,
    })
}

fn filter_params(filters: &[Filter]) -> Vec<(String, String)> {
    filters.iter().map(Filter::to_param).collect()
}

#[async_trait]
impl Backend for RemoteBackend {
    async fn select(&self, table: Table, query: &Query) -> StoreResult<Vec<Value>> {
        let request = self
            .client
            .get(self.table_url(table))
            .query(&query.to_params());
        let response = self.authorize(request).send().await?;
        self.rows(response).await
    }

    async fn insert(&self, table: Table, rows: Vec<Value>) -> StoreResult<Vec<Value>> {
        let request = self
            .client
            .post(self.table_url(table))
            .header("Prefer", "return=representation")
            .json(&rows);
        let response = self.authorize(request).send().await?;
        self.rows(response).await
    }

    async fn update(
        &self,
        table: Table,
        filters: &[Filter],
        patch: Value,
    ) -> StoreResult<Vec<Value>> {
        if filters.is_empty() {
            return Err(StoreError::InvalidRequest(
                "update requires at least one filter".to_string(),
            ));
        }
        let request = self
            .client
            .patch(self.table_url(table))
            .header("Prefer", "return=representation")
            .query(&filter_params(filters))
            .json(&patch);
        let response = self.authorize(request).send().await?;
        self.rows(response).await
    }

    async fn delete(&self, table: Table, filters: &[Filter]) -> StoreResult<Vec<Value>> {
        if filters.is_empty() {
            return Err(StoreError::InvalidRequest(
                "delete requires at least one filter".to_string(),
            ));
        }
        let request = self
            .client
            .delete(self.table_url(table))
            .header("Prefer", "return=representation")
            .query(&filter_params(filters));
        let response = self.authorize(request).send().await?;
        self.rows(response).await
    }

    async fn create_notification(
        &self,
        request: NotificationRequest,
    ) -> StoreResult<NotificationOutcome> {
        let url = format!("{}/functions/v1/create-notification", self.config.base_url);
        let response = self
            .authorize(self.client.post(url).json(&request))
            .send()
            .await?;
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }

    fn feed(&self) -> Arc<ChangeFeed> {
        Arc::clone(&self.feed)
    }
}
