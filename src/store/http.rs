use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode, Url};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

use super::MetricsStore;
use crate::error::PersistError;
use crate::model::Metrics;

pub const GENERIC_SAVE_ERROR: &str = "failed to save seller data";
const GENERIC_LOAD_ERROR: &str = "failed to load seller data";

/// Client for the sellers API of the dashboard backend.
#[derive(Clone)]
pub struct HttpMetricsStore {
    http: Client,
    base_url: Url,
}

impl fmt::Debug for HttpMetricsStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpMetricsStore")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpMetricsStore {
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .user_agent("goal-getter/0.1")
            .timeout(timeout)
            .no_proxy()
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { http, base_url })
    }

    pub fn from_str_url(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url).context("invalid backend base URL")?;
        Self::new(base_url, timeout)
    }

    /// `{base}/api/sellers/{store_id}/{seller_id}` with both ids percent-encoded.
    pub fn seller_url(&self, store_id: &str, seller_id: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("backend base URL cannot be a base"))?
            .pop_if_empty()
            .extend(["api", "sellers", store_id, seller_id]);
        Ok(url)
    }

    pub fn build_save_request(
        &self,
        store_id: &str,
        seller_id: &str,
        metrics: &Metrics,
    ) -> Result<reqwest::Request> {
        let url = self.seller_url(store_id, seller_id)?;
        self.http
            .request(Method::POST, url)
            .header("Content-Type", "application/json")
            .json(metrics)
            .build()
            .context("failed to build save request")
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

/// Message for a failed response: the body's `error` field when present.
fn error_message(body: &str, fallback: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.error)
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

#[async_trait]
impl MetricsStore for HttpMetricsStore {
    async fn save(
        &self,
        store_id: &str,
        seller_id: &str,
        metrics: &Metrics,
    ) -> Result<(), PersistError> {
        let request = self
            .build_save_request(store_id, seller_id, metrics)
            .map_err(|err| PersistError::new(format!("{GENERIC_SAVE_ERROR}: {err:#}")))?;
        debug!(url = %request.url(), ?metrics, "sending save request");

        let res = self.http.execute(request).await.map_err(|err| {
            warn!(?err, store_id, seller_id, "backend unreachable");
            PersistError::new(format!("{GENERIC_SAVE_ERROR}: {err}"))
        })?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            warn!(%status, %body, store_id, seller_id, "backend rejected save");
            return Err(PersistError::new(error_message(&body, GENERIC_SAVE_ERROR)));
        }
        Ok(())
    }

    async fn load(
        &self,
        store_id: &str,
        seller_id: &str,
    ) -> Result<Option<Metrics>, PersistError> {
        let url = self
            .seller_url(store_id, seller_id)
            .map_err(|err| PersistError::new(format!("{GENERIC_LOAD_ERROR}: {err:#}")))?;
        let res = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|err| PersistError::new(format!("{GENERIC_LOAD_ERROR}: {err}")))?;

        let status = res.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = res.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(PersistError::new(error_message(&body, GENERIC_LOAD_ERROR)));
        }
        serde_json::from_str::<Metrics>(&body)
            .map(Some)
            .map_err(|err| PersistError::new(format!("invalid backend response: {err}")))
    }
}
