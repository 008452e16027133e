//! Configuration loader and validator for the auction watcher.
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub source: Source,
    pub http: Http,
    pub telegram: Telegram,
    pub state: State,
}

/// Where lots, details and photos come from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Source {
    pub listing_url: String,
    /// Detail endpoint; the lot id is appended as a path segment.
    pub detail_url: String,
    /// Older detail endpoint tried once when `detail_url` answers 404.
    pub legacy_detail_url: Option<String>,
    /// Public site used for lot links and as the photo `Referer`.
    pub site_url: String,
    /// Hosts relative photo paths are resolved against, in order.
    pub photo_hosts: Vec<String>,
    pub user_agent: String,
    /// Case-insensitive organizer keywords; empty accepts every lot.
    pub keywords: Vec<String>,
}

impl Default for Source {
    fn default() -> Self {
        Self {
            listing_url: "https://api.lelang.go.id/api/v1/landing-page-kpknl/6705ef6e-f64f-11ed-b3e2-5620a0c2ec5a/katalog-lot-lelang?namakategori[]=Mobil&namakategori[]=Motor".into(),
            detail_url: "https://api.lelang.go.id/api/v1/lot-lelang".into(),
            legacy_detail_url: Some("https://api.lelang.go.id/api/v1/landing-page/lot-lelang".into()),
            site_url: "https://lelang.go.id".into(),
            photo_hosts: vec![
                "https://lelang.go.id".into(),
                "https://api.lelang.go.id".into(),
            ],
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36".into(),
            keywords: vec!["KPKNL Surakarta".into()],
        }
    }
}

/// Timeouts and retry bounds for outgoing requests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Http {
    pub timeout_secs: u64,
    pub photo_timeout_secs: u64,
    pub retry_attempts: u32,
    pub retry_base_ms: u64,
}

impl Default for Http {
    fn default() -> Self {
        Self {
            timeout_secs: 20,
            photo_timeout_secs: 30,
            retry_attempts: 3,
            retry_base_ms: 1500,
        }
    }
}

impl Http {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn photo_timeout(&self) -> Duration {
        Duration::from_secs(self.photo_timeout_secs)
    }

    pub fn retry_base(&self) -> Duration {
        Duration::from_millis(self.retry_base_ms)
    }
}

/// Telegram bot settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Telegram {
    pub bot_token: String,
    /// Numeric chat id or `@channelusername`.
    pub chat_id: String,
    /// Photo captions longer than this are cut and followed by the full text.
    pub caption_limit: usize,
    pub link_preview: bool,
}

impl Default for Telegram {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            chat_id: String::new(),
            caption_limit: 800,
            link_preview: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FirstRun {
    /// Treat a missing store as empty and notify everything.
    #[default]
    Notify,
    /// Record the current listing as seen without notifying.
    Baseline,
}

/// Seen-set persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct State {
    pub seen_file: PathBuf,
    pub mark_failed_seen: bool,
    pub first_run: FirstRun,
    pub save_every_lot: bool,
    /// Keep the seen list in a GitHub repository instead of `seen_file`.
    pub github: Option<GitHubState>,
}

impl Default for State {
    fn default() -> Self {
        Self {
            seen_file: PathBuf::from("seen_api.json"),
            mark_failed_seen: true,
            first_run: FirstRun::Notify,
            save_every_lot: false,
            github: None,
        }
    }
}

/// Seen list stored as a file in a GitHub repository (contents API), for
/// hosts without a persistent disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GitHubState {
    pub api_url: String,
    /// `owner/name`
    pub repo: String,
    pub token: String,
    /// Path of the file inside the repository.
    pub path: String,
    /// Branch to read and commit to; the repository default when unset.
    pub branch: Option<String>,
}

impl Default for GitHubState {
    fn default() -> Self {
        Self {
            api_url: "https://api.github.com".into(),
            repo: String::new(),
            token: String::new(),
            path: "seen_api.json".into(),
            branch: None,
        }
    }
}

impl Config {
    /// Ensure the directory holding the seen file exists.
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        match self.state.seen_file.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
            _ => Ok(()),
        }
    }

    /// Overlay environment variables on top of the file values.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(token) = get("TELEGRAM_TOKEN").or_else(|| get("TELEGRAM_BOT_TOKEN")) {
            self.telegram.bot_token = token.trim().to_string();
        }
        if let Some(chat) = get("TELEGRAM_CHAT_ID") {
            self.telegram.chat_id = chat.trim().to_string();
        }
        if let Some(url) = get("API_URL") {
            self.source.listing_url = url.trim().to_string();
        }
        if let Some(url) = get("DETAIL_URL") {
            self.source.detail_url = url.trim().to_string();
        }
        if let Some(keywords) = lookup("KEYWORD_INSTANSI") {
            self.source.keywords = split_keywords(&keywords);
        }
        if let Some(path) = get("SEEN_FILE") {
            self.state.seen_file = PathBuf::from(path.trim());
        }
        if let Some(secs) = get("HTTP_TIMEOUT_SECONDS").and_then(|v| v.trim().parse().ok()) {
            self.http.timeout_secs = secs;
        }
        if let Some(n) = get("DETAIL_RETRIES").and_then(|v| v.trim().parse().ok()) {
            self.http.retry_attempts = n;
        }
        if let Some(flag) = get("MARK_FAILED_SEEN").and_then(|v| parse_bool(&v)) {
            self.state.mark_failed_seen = flag;
        }

        // A repository switches the store to GitHub; a token alone does not.
        if let Some(repo) = get("GITHUB_REPO") {
            self.state.github.get_or_insert_with(GitHubState::default).repo =
                repo.trim().to_string();
        }
        if let (Some(gh), Some(token)) = (self.state.github.as_mut(), get("GITHUB_TOKEN")) {
            gh.token = token.trim().to_string();
        }
    }

    pub fn site_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.source.site_url)
            .map_err(|_| ConfigError::Invalid("source.site_url must be a valid URL"))
    }

    pub fn photo_hosts(&self) -> Result<Vec<Url>, ConfigError> {
        self.source
            .photo_hosts
            .iter()
            .map(|h| {
                Url::parse(h).map_err(|_| ConfigError::Invalid("source.photo_hosts must be valid URLs"))
            })
            .collect()
    }
}

fn split_keywords(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Load configuration from an optional YAML file, overlay the process
/// environment, and validate the result.
/// - If `path` is None and `config.yaml` is absent, defaults are used.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let cfg = read(path)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Like [`load`] but only the source and HTTP sections must be valid; for
/// tools that never deliver anything.
pub fn load_source_only(path: Option<&Path>) -> Result<Config, ConfigError> {
    let cfg = read(path)?;
    validate_source(&cfg)?;
    Ok(cfg)
}

fn read(path: Option<&Path>) -> Result<Config, ConfigError> {
    let mut cfg = match path {
        Some(p) => serde_yaml::from_str(&fs::read_to_string(p)?)?,
        None => {
            let default_path = Path::new("config.yaml");
            if default_path.exists() {
                serde_yaml::from_str(&fs::read_to_string(default_path)?)?
            } else {
                Config::default()
            }
        }
    };
    cfg.apply_env(|key| std::env::var(key).ok());
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.telegram.bot_token.trim().is_empty() {
        return Err(ConfigError::Invalid("telegram.bot_token must be non-empty"));
    }
    if cfg.telegram.chat_id.trim().is_empty() {
        return Err(ConfigError::Invalid("telegram.chat_id must be non-empty"));
    }
    if cfg.telegram.caption_limit == 0 || cfg.telegram.caption_limit > 1024 {
        return Err(ConfigError::Invalid("telegram.caption_limit must be within 1..=1024"));
    }
    if cfg.state.seen_file.as_os_str().is_empty() {
        return Err(ConfigError::Invalid("state.seen_file must be non-empty"));
    }
    if let Some(gh) = &cfg.state.github {
        validate_github(gh)?;
    }
    validate_source(cfg)
}

fn validate_github(gh: &GitHubState) -> Result<(), ConfigError> {
    if Url::parse(&gh.api_url).is_err() {
        return Err(ConfigError::Invalid("state.github.api_url must be a valid URL"));
    }
    let mut parts = gh.repo.split('/');
    let well_formed = matches!(
        (parts.next(), parts.next(), parts.next()),
        (Some(owner), Some(name), None) if !owner.is_empty() && !name.is_empty()
    );
    if !well_formed {
        return Err(ConfigError::Invalid("state.github.repo must look like owner/name"));
    }
    if gh.token.trim().is_empty() {
        return Err(ConfigError::Invalid("state.github.token must be non-empty"));
    }
    if gh.path.trim_matches('/').is_empty() {
        return Err(ConfigError::Invalid("state.github.path must be non-empty"));
    }
    Ok(())
}

fn validate_source(cfg: &Config) -> Result<(), ConfigError> {
    if Url::parse(&cfg.source.listing_url).is_err() {
        return Err(ConfigError::Invalid("source.listing_url must be a valid URL"));
    }
    if Url::parse(&cfg.source.detail_url).is_err() {
        return Err(ConfigError::Invalid("source.detail_url must be a valid URL"));
    }
    if let Some(legacy) = &cfg.source.legacy_detail_url {
        if Url::parse(legacy).is_err() {
            return Err(ConfigError::Invalid("source.legacy_detail_url must be a valid URL"));
        }
    }
    cfg.site_url()?;
    if cfg.source.photo_hosts.is_empty() {
        return Err(ConfigError::Invalid("source.photo_hosts must list at least one host"));
    }
    cfg.photo_hosts()?;
    if cfg.source.user_agent.trim().is_empty() {
        return Err(ConfigError::Invalid("source.user_agent must be non-empty"));
    }

    if cfg.http.timeout_secs == 0 || cfg.http.photo_timeout_secs == 0 {
        return Err(ConfigError::Invalid("http timeouts must be > 0"));
    }
    if cfg.http.retry_attempts == 0 {
        return Err(ConfigError::Invalid("http.retry_attempts must be > 0"));
    }

    Ok(())
}

/// Example YAML showing every setting.
pub fn example() -> &'static str {
    r#"source:
  listing_url: "https://api.lelang.go.id/api/v1/landing-page-kpknl/6705ef6e-f64f-11ed-b3e2-5620a0c2ec5a/katalog-lot-lelang?namakategori[]=Mobil&namakategori[]=Motor"
  detail_url: "https://api.lelang.go.id/api/v1/lot-lelang"
  legacy_detail_url: "https://api.lelang.go.id/api/v1/landing-page/lot-lelang"
  site_url: "https://lelang.go.id"
  photo_hosts:
    - "https://lelang.go.id"
    - "https://api.lelang.go.id"
  user_agent: "Mozilla/5.0 (compatible; lelang-watchbot/0.1)"
  keywords:
    - "KPKNL Surakarta"

http:
  timeout_secs: 20
  photo_timeout_secs: 30
  retry_attempts: 3
  retry_base_ms: 1500

telegram:
  bot_token: "YOUR_TELEGRAM_BOT_TOKEN"
  chat_id: "-1001234567890"
  caption_limit: 800
  link_preview: false

state:
  seen_file: "./data/seen_api.json"
  mark_failed_seen: true
  # notify: announce every lot when no seen list exists yet
  # baseline: record the current listing silently on the first run
  first_run: notify
  save_every_lot: false
  # Uncomment to keep the seen list in a GitHub repository
  # (GITHUB_TOKEN / GITHUB_REPO override these).
  # github:
  #   repo: "owner/lelang-state"
  #   token: "ghp_..."
  #   path: "seen_api.json"
  #   branch: "main"
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn example_cfg() -> Config {
        serde_yaml::from_str(example()).unwrap()
    }

    #[test]
    fn parse_example_ok() {
        let cfg = example_cfg();
        validate(&cfg).unwrap();
        assert_eq!(cfg.state.first_run, FirstRun::Notify);
        assert!(cfg.state.github.is_none());
        assert_eq!(cfg.source.photo_hosts.len(), 2);
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let cfg: Config = serde_yaml::from_str("telegram:\n  bot_token: t\n  chat_id: \"1\"\n").unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.http.retry_attempts, 3);
        assert_eq!(cfg.telegram.caption_limit, 800);
        assert!(cfg.state.mark_failed_seen);
    }

    #[test]
    fn invalid_bot_token() {
        let mut cfg = example_cfg();
        cfg.telegram.bot_token = "".into();
        let err = validate(&cfg).unwrap_err();
        match err { ConfigError::Invalid(msg) => assert!(msg.contains("telegram.bot_token")), _ => panic!("wrong error") }
    }

    #[test]
    fn invalid_chat_and_limits() {
        let mut cfg = example_cfg();
        cfg.telegram.chat_id = " ".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg = example_cfg();
        cfg.telegram.caption_limit = 2000;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg = example_cfg();
        cfg.http.retry_attempts = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg = example_cfg();
        cfg.source.photo_hosts = vec!["not a url".into()];
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn env_overrides_file_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("TELEGRAM_BOT_TOKEN", "env-token"),
            ("TELEGRAM_CHAT_ID", "@lelang_channel"),
            ("KEYWORD_INSTANSI", "KPKNL Semarang, kpknl solo ,"),
            ("MARK_FAILED_SEEN", "false"),
            ("DETAIL_RETRIES", "5"),
        ]);
        let mut cfg = example_cfg();
        cfg.apply_env(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.telegram.bot_token, "env-token");
        assert_eq!(cfg.telegram.chat_id, "@lelang_channel");
        assert_eq!(cfg.source.keywords, vec!["KPKNL Semarang", "kpknl solo"]);
        assert!(!cfg.state.mark_failed_seen);
        assert_eq!(cfg.http.retry_attempts, 5);
    }

    #[test]
    fn first_run_defaults_to_notify() {
        assert_eq!(Config::default().state.first_run, FirstRun::Notify);
        let cfg: Config = serde_yaml::from_str("state:\n  first_run: baseline\n").unwrap();
        assert_eq!(cfg.state.first_run, FirstRun::Baseline);
    }

    #[test]
    fn github_env_enables_remote_state() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("GITHUB_TOKEN", "ghp_x"),
            ("GITHUB_REPO", " owner/state "),
        ]);
        let mut cfg = example_cfg();
        cfg.apply_env(|k| env.get(k).map(|v| v.to_string()));
        let gh = cfg.state.github.clone().unwrap();
        assert_eq!(gh.repo, "owner/state");
        assert_eq!(gh.token, "ghp_x");
        assert_eq!(gh.path, "seen_api.json");
        validate(&cfg).unwrap();

        let mut cfg = example_cfg();
        cfg.apply_env(|k| (k == "GITHUB_TOKEN").then(|| "ghp_x".to_string()));
        assert!(cfg.state.github.is_none());
    }

    #[test]
    fn github_repo_must_be_owner_and_name() {
        let mut cfg = example_cfg();
        cfg.state.github = Some(GitHubState {
            repo: "just-a-name".into(),
            token: "t".into(),
            ..Default::default()
        });
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        cfg.state.github = Some(GitHubState {
            repo: "owner/name".into(),
            token: " ".into(),
            ..Default::default()
        });
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn empty_keyword_env_clears_filter() {
        let mut cfg = example_cfg();
        cfg.apply_env(|k| (k == "KEYWORD_INSTANSI").then(String::new));
        assert!(cfg.source.keywords.is_empty());
    }

    #[test]
    fn ensure_dirs_creates_state_dir() {
        let td = tempdir().unwrap();
        let mut cfg = example_cfg();
        cfg.state.seen_file = td.path().join("state").join("seen.json");
        cfg.ensure_dirs().unwrap();
        assert!(td.path().join("state").exists());
    }

    #[test]
    fn source_only_validation_ignores_telegram() {
        let mut cfg = example_cfg();
        cfg.telegram.bot_token.clear();
        assert!(validate(&cfg).is_err());
        validate_source(&cfg).unwrap();
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.telegram.caption_limit, 800);
    }
}
