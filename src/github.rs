//! Seen list kept as a file in a GitHub repository through the contents API.
//!
//! Saving reads the current blob `sha` and then PUTs the new content, which
//! makes every save one commit. A concurrent writer makes the PUT fail with
//! 409, which surfaces as an error instead of a lost update.
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::GitHubState;
use crate::error::StoreError;
use crate::seen::{parse_ids, render_ids, SeenBackend, SeenSet};

#[derive(Debug, Deserialize)]
struct ContentResponse {
    sha: String,
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct PutRequest<'a> {
    message: &'a str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    branch: Option<&'a str>,
}

#[derive(Clone)]
pub struct GitHubStore {
    http: Client,
    url: Url,
    branch: Option<String>,
    location: String,
}

impl fmt::Debug for GitHubStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitHubStore")
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

impl GitHubStore {
    pub fn from_config(cfg: &GitHubState, timeout: Duration) -> Result<Self> {
        let mut url = Url::parse(&cfg.api_url).context("invalid GitHub API URL")?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("GitHub API URL cannot take path segments"))?
            .pop_if_empty()
            .push("repos")
            .extend(cfg.repo.split('/'))
            .push("contents")
            .extend(cfg.path.split('/').filter(|s| !s.is_empty()));

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", cfg.token.trim()))
            .context("invalid GitHub token")?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        let http = Client::builder()
            .user_agent(concat!("lelang-watchbot/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .context("failed to build GitHub client")?;

        Ok(Self {
            http,
            url,
            branch: cfg.branch.clone(),
            location: format!("github:{}/{}", cfg.repo, cfg.path),
        })
    }

    /// Current file, or `None` when it does not exist yet.
    async fn fetch(&self) -> Result<Option<ContentResponse>, StoreError> {
        let mut req = self.http.get(self.url.clone());
        if let Some(branch) = &self.branch {
            req = req.query(&[("ref", branch)]);
        }
        let res = req.send().await?;
        let status = res.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(StoreError::remote(status, &body));
        }
        Ok(Some(res.json().await?))
    }
}

fn decode(content: &str) -> Result<String, StoreError> {
    // The API wraps base64 at 60 columns.
    let clean: String = content.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(clean)
        .map_err(|e| StoreError::Corrupt(format!("invalid base64 content: {e}")))?;
    String::from_utf8(bytes).map_err(|_| StoreError::Corrupt("content is not UTF-8".into()))
}

#[async_trait]
impl SeenBackend for GitHubStore {
    async fn exists(&self) -> Result<bool, StoreError> {
        Ok(self.fetch().await?.is_some())
    }

    async fn load(&self) -> Result<SeenSet, StoreError> {
        let Some(file) = self.fetch().await? else {
            info!(location = %self.location, "seen list not found, starting empty");
            return Ok(SeenSet::new());
        };
        let text = decode(file.content.as_deref().unwrap_or_default())?;
        let set = parse_ids(&text, &self.location)?;
        info!(location = %self.location, count = set.len(), "loaded seen set");
        Ok(set)
    }

    async fn save(&self, set: &SeenSet) -> Result<(), StoreError> {
        let sha = self.fetch().await?.map(|f| f.sha);
        let body = PutRequest {
            message: "Update seen lots",
            content: base64::engine::general_purpose::STANDARD.encode(render_ids(set)?),
            sha,
            branch: self.branch.as_deref(),
        };

        let res = self.http.put(self.url.clone()).json(&body).send().await?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(StoreError::remote(status, &body));
        }
        debug!(location = %self.location, count = set.len(), "saved seen set");
        Ok(())
    }

    fn location(&self) -> String {
        self.location.clone()
    }
}
