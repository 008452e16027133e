use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue, REFERER};
use reqwest::{Client, StatusCode, Url};
use tracing::debug;

use crate::config::Config;
use crate::error::FetchError;
use crate::retry::RetryPolicy;

/// Something that can fetch photo bytes.
#[async_trait]
pub trait PhotoSource: Send + Sync {
    async fn download(&self, url: &Url) -> Result<Vec<u8>, FetchError>;
}

/// Downloads photos with the headers the photo host expects; it answers
/// 403 to requests without a `Referer` from the public site.
#[derive(Debug, Clone)]
pub struct PhotoDownloader {
    http: Client,
    retry: RetryPolicy,
}

impl PhotoDownloader {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let referer = cfg.site_url().context("invalid site URL")?;
        let mut headers = HeaderMap::new();
        headers.insert(
            REFERER,
            HeaderValue::from_str(referer.as_str()).context("invalid Referer header")?,
        );
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("image/avif,image/webp,image/apng,image/*,*/*;q=0.8"),
        );
        let http = Client::builder()
            .user_agent(cfg.source.user_agent.as_str())
            .default_headers(headers)
            .timeout(cfg.http.photo_timeout())
            .build()
            .context("failed to build photo client")?;

        // Photo retries stay short; the delivery engine has its own fallbacks.
        let attempts = cfg.http.retry_attempts.min(2);
        Ok(Self {
            http,
            retry: RetryPolicy::new(attempts, cfg.http.retry_base()),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn get_bytes(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        let res = self.http.get(url.clone()).send().await?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(FetchError::protocol(status, &body));
        }

        let content_type = res
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_ascii_lowercase);
        if let Some(ct) = content_type.as_deref() {
            if ct.starts_with("text/") || ct.starts_with("application/json") {
                return Err(FetchError::parse(format!("expected an image, got {ct}")));
            }
        }

        let bytes = res.bytes().await?;
        if bytes.is_empty() {
            return Err(FetchError::parse("empty photo body"));
        }
        debug!(%url, size = bytes.len(), "photo downloaded");
        Ok(bytes.to_vec())
    }
}

fn retryable(err: &FetchError) -> bool {
    match err {
        FetchError::Transport(_) => true,
        FetchError::Protocol { status, .. } => {
            status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
        }
        FetchError::NotFound | FetchError::Parse(_) => false,
    }
}

#[async_trait]
impl PhotoSource for PhotoDownloader {
    async fn download(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        self.retry
            .run_if(|_| self.get_bytes(url), retryable)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forbidden_and_missing_are_not_retried() {
        assert!(!retryable(&FetchError::protocol(StatusCode::FORBIDDEN, "")));
        assert!(!retryable(&FetchError::NotFound));
        assert!(retryable(&FetchError::protocol(StatusCode::BAD_GATEWAY, "")));
        assert!(retryable(&FetchError::protocol(StatusCode::TOO_MANY_REQUESTS, "")));
    }
}
