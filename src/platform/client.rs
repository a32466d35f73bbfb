//! HTTP implementation of [`PlatformApi`].

use async_trait::async_trait;
use reqwest::{header, Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, trace};

use super::types::{
    ByIdsRequest, ErrorEnvelope, ItemsRequest, ItemsResponse, ListPage, ListRequest,
    PreviewRequest, TokenInspection,
};
use super::PlatformApi;
use crate::error::{PlatformError, Result};
use crate::kinds::CapabilitySet;

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default timeout of preview queries in seconds.
const DEFAULT_PREVIEW_TIMEOUT_SECS: u64 = 300;

/// Platform API client.
#[derive(Debug, Clone)]
pub struct PlatformClient {
    /// HTTP client.
    client: Client,
    /// Base URL of the platform, without trailing slash.
    base_url: String,
    /// Project all kind endpoints live under.
    project: String,
    /// Bearer token.
    token: String,
    /// Timeout for preview queries.
    preview_timeout: Duration,
}

impl PlatformClient {
    /// Creates a new client with default timeouts.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(base_url: &str, project: &str, token: &str) -> Result<Self> {
        Self::with_timeouts(
            base_url,
            project,
            token,
            Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            Duration::from_secs(DEFAULT_PREVIEW_TIMEOUT_SECS),
        )
    }

    /// Creates a client with custom timeouts.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn with_timeouts(
        base_url: &str,
        project: &str,
        token: &str,
        timeout: Duration,
        preview_timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PlatformError::network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            project: project.to_string(),
            token: token.to_string(),
            preview_timeout,
        })
    }

    fn project_url(&self, path: &str) -> String {
        format!(
            "{}/api/v1/projects/{}/{}",
            self.base_url,
            self.project,
            path.trim_matches('/')
        )
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::AUTHORIZATION, format!("Bearer {}", self.token))
    }

    async fn post<B, T>(&self, url: &str, body: &B) -> Result<T>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        trace!("POST {url}");
        let response = self
            .authorized(self.client.post(url))
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;
        decode(response).await
    }

    /// Runs an ad hoc read-only query and returns a preview of its rows.
    ///
    /// Uses the extended preview timeout. Never retried.
    ///
    /// # Errors
    ///
    /// Returns the classified platform error.
    pub async fn preview_query(&self, query: &str, limit: usize) -> Result<Vec<Value>> {
        let url = self.project_url("query/preview");
        debug!("Previewing query ({limit} rows max)");
        let response = self
            .authorized(self.client.post(&url))
            .timeout(self.preview_timeout)
            .json(&PreviewRequest { query, limit })
            .send()
            .await
            .map_err(transport_error)?;
        let body: ItemsResponse = decode(response).await?;
        Ok(body.items)
    }
}

fn transport_error(err: reqwest::Error) -> crate::error::SyncError {
    if err.is_timeout() {
        PlatformError::Timeout {
            message: err.to_string(),
        }
        .into()
    } else {
        PlatformError::network(format!("Request failed: {err}")).into()
    }
}

/// Maps a response to a value or a classified error.
async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();

    if !status.is_success() {
        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok());
        let body = response.text().await.unwrap_or_default();

        if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(&body) {
            let error = envelope.error;
            if !error.missing.is_empty() {
                return Err(PlatformError::NotFound {
                    count: error.missing.len(),
                    missing: error.missing.iter().map(ToString::to_string).collect(),
                }
                .into());
            }
            let code = if error.code == 0 { status.as_u16() } else { error.code };
            return Err(PlatformError::from_status(code, error.message, retry_after).into());
        }

        return Err(PlatformError::from_status(status.as_u16(), body, retry_after).into());
    }

    response.json::<T>().await.map_err(|e| {
        PlatformError::InvalidResponse {
            message: format!("Failed to parse response: {e}"),
        }
        .into()
    })
}

#[async_trait]
impl PlatformApi for PlatformClient {
    async fn list(&self, path: &str, cursor: Option<String>, limit: usize) -> Result<ListPage> {
        let url = format!("{}/list", self.project_url(path));
        self.post(&url, &ListRequest { limit, cursor }).await
    }

    async fn retrieve(
        &self,
        path: &str,
        ids: Vec<Value>,
        ignore_unknown: bool,
    ) -> Result<Vec<Value>> {
        let url = format!("{}/byids", self.project_url(path));
        let body = ByIdsRequest {
            items: ids,
            ignore_unknown_ids: ignore_unknown,
        };
        let response: ItemsResponse = self.post(&url, &body).await?;
        Ok(response.items)
    }

    async fn create(&self, path: &str, items: Vec<Value>) -> Result<Vec<Value>> {
        let url = self.project_url(path);
        let response: ItemsResponse = self.post(&url, &ItemsRequest { items }).await?;
        Ok(response.items)
    }

    async fn update(&self, path: &str, items: Vec<Value>) -> Result<Vec<Value>> {
        let url = format!("{}/update", self.project_url(path));
        let response: ItemsResponse = self.post(&url, &ItemsRequest { items }).await?;
        Ok(response.items)
    }

    async fn delete(&self, path: &str, ids: Vec<Value>) -> Result<usize> {
        let url = format!("{}/delete", self.project_url(path));
        let count = ids.len();
        let _: Value = self.post(&url, &ItemsRequest { items: ids }).await?;
        Ok(count)
    }

    async fn inspect_capabilities(&self) -> Result<CapabilitySet> {
        let url = format!("{}/api/v1/token/inspect", self.base_url);
        let response = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(transport_error)?;
        let inspection: TokenInspection = decode(response).await?;
        Ok(inspection.into_capabilities())
    }
}
