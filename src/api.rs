//! Client for the auction listing and lot-detail endpoints.
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use reqwest::{Client, Url};
use serde_json::Value;
use std::fmt;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::FetchError;
use crate::model::{Lot, LotDetail};
use crate::normalize::has_seller;
use crate::retry::RetryPolicy;

/// Source of lots and their detail payloads.
#[async_trait]
pub trait LotSource: Send + Sync {
    /// Current catalog. An error means the whole cycle should be skipped.
    async fn fetch_listing(&self) -> Result<Vec<Lot>, FetchError>;

    /// Enrichment for one lot; `None` when nothing usable could be retrieved.
    async fn fetch_detail(&self, lot_id: &str) -> Option<LotDetail>;
}

#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    listing_url: Url,
    detail_url: Url,
    legacy_detail_url: Option<Url>,
    retry: RetryPolicy,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("listing_url", &self.listing_url)
            .field("detail_url", &self.detail_url)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let listing_url = Url::parse(&cfg.source.listing_url).context("invalid listing URL")?;
        let detail_url = Url::parse(&cfg.source.detail_url).context("invalid detail URL")?;
        let legacy_detail_url = cfg
            .source
            .legacy_detail_url
            .as_deref()
            .map(Url::parse)
            .transpose()
            .context("invalid legacy detail URL")?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json, text/plain, */*"));
        let http = Client::builder()
            .user_agent(cfg.source.user_agent.as_str())
            .default_headers(headers)
            .timeout(cfg.http.timeout())
            .build()
            .context("failed to build API client")?;

        Ok(Self {
            http,
            listing_url,
            detail_url,
            legacy_detail_url,
            retry: RetryPolicy::new(cfg.http.retry_attempts, cfg.http.retry_base()),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn get_json(&self, url: Url) -> Result<Value, FetchError> {
        debug!(%url, "GET");
        let res = self.http.get(url).send().await?;
        let status = res.status();
        let body = res.text().await?;
        if !status.is_success() {
            return Err(FetchError::protocol(status, &body));
        }
        serde_json::from_str(&body).map_err(|e| FetchError::parse(format!("invalid JSON: {e}")))
    }

    fn detail_endpoint(base: &Url, lot_id: &str) -> Result<Url, FetchError> {
        let mut url = base.clone();
        url.path_segments_mut()
            .map_err(|_| FetchError::parse("detail URL cannot take path segments"))?
            .pop_if_empty()
            .push(lot_id);
        Ok(url)
    }

    async fn get_detail(&self, base: &Url, lot_id: &str) -> Result<LotDetail, FetchError> {
        let url = Self::detail_endpoint(base, lot_id)?;
        let body = self.get_json(url).await?;
        match body.get("data") {
            Some(data @ Value::Object(map)) if !map.is_empty() => Ok(LotDetail {
                id: lot_id.to_string(),
                raw: data.clone(),
            }),
            _ => Err(FetchError::parse("detail response has no `data` object")),
        }
    }

    /// One bounded GET of the catalog. No retry at this layer.
    pub async fn fetch_listing(&self) -> Result<Vec<Lot>, FetchError> {
        let body = self.get_json(self.listing_url.clone()).await?;
        let entries = match body.get("data") {
            Some(Value::Array(items)) => items.clone(),
            Some(Value::Null) | None => {
                warn!("listing response has no `data` array, treating as empty");
                Vec::new()
            }
            Some(_) => return Err(FetchError::parse("listing `data` is not an array")),
        };

        let total = entries.len();
        let lots: Vec<Lot> = entries.into_iter().filter_map(Lot::from_value).collect();
        if lots.len() < total {
            warn!(skipped = total - lots.len(), "listing entries without an id");
        }
        info!(count = lots.len(), "listing fetched");
        Ok(lots)
    }

    /// Fetch the detail payload with retries. A payload carrying the seller
    /// block ends the loop early; otherwise the last usable payload (if any)
    /// is returned once attempts run out. A 404 triggers one try against the
    /// legacy endpoint and stops retrying.
    pub async fn fetch_detail(&self, lot_id: &str) -> Option<LotDetail> {
        let mut last: Option<LotDetail> = None;
        for attempt in self.retry.attempts() {
            match self.get_detail(&self.detail_url, lot_id).await {
                Ok(detail) if has_seller(&detail.raw) => {
                    debug!(lot_id, attempt, "detail fetched");
                    return Some(detail);
                }
                Ok(detail) => {
                    debug!(lot_id, attempt, "detail has no seller block yet");
                    last = Some(detail);
                }
                Err(FetchError::NotFound) => {
                    warn!(lot_id, "detail endpoint answered 404");
                    return self.fetch_legacy_detail(lot_id).await.or(last);
                }
                Err(err) => {
                    warn!(lot_id, attempt, %err, "detail fetch failed");
                }
            }
            self.retry.pause(attempt).await;
        }

        if last.is_none() {
            warn!(lot_id, attempts = self.retry.max_attempts, "no detail retrieved, using listing data only");
        }
        last
    }

    async fn fetch_legacy_detail(&self, lot_id: &str) -> Option<LotDetail> {
        let legacy = self.legacy_detail_url.as_ref()?;
        match self.get_detail(legacy, lot_id).await {
            Ok(detail) => {
                info!(lot_id, "detail fetched from legacy endpoint");
                Some(detail)
            }
            Err(err) => {
                warn!(lot_id, %err, "legacy detail fetch failed");
                None
            }
        }
    }
}

#[async_trait]
impl LotSource for ApiClient {
    async fn fetch_listing(&self) -> Result<Vec<Lot>, FetchError> {
        ApiClient::fetch_listing(self).await
    }

    async fn fetch_detail(&self, lot_id: &str) -> Option<LotDetail> {
        ApiClient::fetch_detail(self, lot_id).await
    }
}
