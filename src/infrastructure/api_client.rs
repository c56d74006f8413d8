//! HTTP implementation of the tracker API seam.
//!
//! Every listing call flows limiter → retry → authorized GET, so the shared
//! [`ApiRateLimiter`] sees one acquisition per page fetch and the retry layer
//! re-sends inside the held concurrency slot. A 401 triggers exactly one
//! credential invalidate-and-refresh cycle before the failure surfaces.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::Client;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::domain::entities::{Activity, Base, Record, Table};
use crate::domain::services::{CredentialProvider, Page, TrackerApi};
use crate::errors::{EngineError, EngineResult};
use crate::infrastructure::api_types::{
    normalize_activities, ActivityResponse, PageEnvelope, RawBase, RawRecord, RawTable,
};
use crate::infrastructure::rate_limiter::ApiRateLimiter;
use crate::infrastructure::retry::RetryPolicy;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ApiClientConfig {
    /// Host serving the documented listing endpoints.
    pub base_url: String,
    /// Host serving the undocumented per-record activity endpoint.
    pub activity_base_url: String,
    pub user_agent: String,
    pub timeout_seconds: u64,
    /// Requested page size for record listings.
    pub page_size: u32,
}

impl Default for ApiClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.airtable.com".to_string(),
            activity_base_url: "https://airtable.com".to_string(),
            user_agent: "fieldtrace/0.2".to_string(),
            timeout_seconds: 30,
            page_size: 100,
        }
    }
}

pub struct ApiClient {
    client: Client,
    limiter: Arc<ApiRateLimiter>,
    retry: RetryPolicy,
    credentials: Arc<dyn CredentialProvider>,
    config: ApiClientConfig,
    cancellation: CancellationToken,
}

impl ApiClient {
    pub fn new(
        config: ApiClientConfig,
        limiter: Arc<ApiRateLimiter>,
        retry: RetryPolicy,
        credentials: Arc<dyn CredentialProvider>,
        cancellation: CancellationToken,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent).context("Invalid user agent")?,
        );

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .default_headers(headers)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            limiter,
            retry,
            credentials,
            config,
            cancellation,
        })
    }

    fn endpoint(&self, host: &str, path: &str) -> EngineResult<Url> {
        let raw = format!("{}/{}", host.trim_end_matches('/'), path.trim_start_matches('/'));
        Url::parse(&raw).map_err(|e| EngineError::parse(format!("bad endpoint {raw}: {e}")))
    }

    fn listing_url(&self, path: &str, cursor: Option<&str>, page_size: bool) -> EngineResult<Url> {
        let mut url = self.endpoint(&self.config.base_url, path)?;
        if page_size {
            url.query_pairs_mut()
                .append_pair("pageSize", &self.config.page_size.to_string());
        }
        if let Some(cursor) = cursor {
            url.query_pairs_mut().append_pair("offset", cursor);
        }
        Ok(url)
    }

    fn activity_url(&self, base_id: &str, record_id: &str) -> EngineResult<Url> {
        let mut url = self.endpoint(
            &self.config.activity_base_url,
            &format!("v0.3/row/{record_id}/readRowActivitiesAndComments"),
        )?;
        url.query_pairs_mut().append_pair("applicationId", base_id);
        Ok(url)
    }

    /// One gated round trip: concurrency slot + rate token, then the retry
    /// loop, then at most one credential refresh cycle on 401.
    async fn get_json(&self, url: Url, user_scope: &str) -> EngineResult<Value> {
        self.limiter
            .execute_with_cancellation(&self.cancellation, || async move {
                with_auth_refresh(self.credentials.as_ref(), user_scope, || {
                    self.retry.run(|| self.send_once(&url, user_scope))
                })
                .await
            })
            .await
    }

    async fn send_once(&self, url: &Url, user_scope: &str) -> EngineResult<Value> {
        if self.cancellation.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let auth = self.credentials.auth_header(user_scope).await?;
        let request = self
            .client
            .get(url.clone())
            .header(auth.header_name(), auth.header_value());

        let response = tokio::select! {
            result = request.send() => result.map_err(EngineError::from)?,
            _ = self.cancellation.cancelled() => {
                warn!("🛑 request cancelled: {}", url);
                return Err(EngineError::Cancelled);
            }
        };

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok());
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::from_status(status.as_u16(), body, retry_after));
        }

        let value = tokio::select! {
            result = response.json::<Value>() => {
                result.map_err(|e| EngineError::parse(format!("invalid JSON body: {e}")))?
            }
            _ = self.cancellation.cancelled() => {
                warn!("🛑 response read cancelled: {}", url);
                return Err(EngineError::Cancelled);
            }
        };

        debug!("fetched {}", url);
        Ok(value)
    }
}

/// Run `op`; on a 401 invalidate the cached credential and re-run exactly
/// once. Any error from the second pass surfaces unchanged.
pub(crate) async fn with_auth_refresh<F, Fut, T>(
    credentials: &dyn CredentialProvider,
    user_scope: &str,
    mut op: F,
) -> EngineResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = EngineResult<T>>,
{
    match op().await {
        Err(err) if err.is_auth_failure() => {
            info!("credential rejected with 401, invalidating and retrying once");
            credentials.invalidate(user_scope).await;
            op().await
        }
        other => other,
    }
}

#[async_trait::async_trait]
impl TrackerApi for ApiClient {
    async fn bases_page(&self, user_scope: &str, cursor: Option<&str>) -> EngineResult<Page<Base>> {
        let url = self.listing_url("v0/meta/bases", cursor, false)?;
        let value = self.get_json(url, user_scope).await?;
        let envelope: PageEnvelope<RawBase> = serde_json::from_value(value)
            .map_err(|e| EngineError::parse(format!("bases payload: {e}")))?;
        let items = envelope
            .items
            .into_iter()
            .map(|raw| raw.normalize(user_scope))
            .collect();
        Ok(Page::new(items, envelope.cursor))
    }

    async fn tables_page(
        &self,
        user_scope: &str,
        base_id: &str,
        cursor: Option<&str>,
    ) -> EngineResult<Page<Table>> {
        let url = self.listing_url(&format!("v0/meta/bases/{base_id}/tables"), cursor, false)?;
        let value = self.get_json(url, user_scope).await?;
        let envelope: PageEnvelope<RawTable> = serde_json::from_value(value)
            .map_err(|e| EngineError::parse(format!("tables payload: {e}")))?;
        let items = envelope
            .items
            .into_iter()
            .map(|raw| raw.normalize(base_id, user_scope))
            .collect();
        Ok(Page::new(items, envelope.cursor))
    }

    async fn records_page(
        &self,
        user_scope: &str,
        base_id: &str,
        table_id: &str,
        cursor: Option<&str>,
    ) -> EngineResult<Page<Record>> {
        let url = self.listing_url(&format!("v0/{base_id}/{table_id}"), cursor, true)?;
        let value = self.get_json(url, user_scope).await?;
        let envelope: PageEnvelope<RawRecord> = serde_json::from_value(value)
            .map_err(|e| EngineError::parse(format!("records payload: {e}")))?;
        let items = envelope
            .items
            .into_iter()
            .map(|raw| raw.normalize(base_id, table_id, user_scope))
            .collect();
        Ok(Page::new(items, envelope.cursor))
    }

    async fn record_activity(
        &self,
        user_scope: &str,
        base_id: &str,
        record_id: &str,
    ) -> EngineResult<Vec<Activity>> {
        let url = self.activity_url(base_id, record_id)?;
        let value = self.get_json(url, user_scope).await?;
        let response: ActivityResponse = serde_json::from_value(value)
            .map_err(|e| EngineError::parse(format!("activity payload: {e}")))?;
        Ok(normalize_activities(response, record_id))
    }
}
