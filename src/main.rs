use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use lelang_watchbot::api::ApiClient;
use lelang_watchbot::compose::Composer;
use lelang_watchbot::config::{self, Config};
use lelang_watchbot::delivery::{DeliveryChannel, DeliveryEngine, StdoutChannel, TelegramChannel};
use lelang_watchbot::github::GitHubStore;
use lelang_watchbot::normalize::Normalizer;
use lelang_watchbot::photo::PhotoDownloader;
use lelang_watchbot::pipeline::{KeywordFilter, Pipeline, SeenPolicy};
use lelang_watchbot::seen::{SeenBackend, SeenStore};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Check the auction catalog once and announce new lots on Telegram"
)]
struct Args {
    /// Path to YAML config file (defaults to ./config.yaml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print messages instead of sending them; the seen file is left untouched
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(args.config.as_deref()).context("invalid configuration")?;
    cfg.ensure_dirs()?;

    let api = ApiClient::from_config(&cfg)?;
    let photos = PhotoDownloader::from_config(&cfg)?;
    let normalizer = Normalizer::from_config(&cfg)?;
    let composer = Composer::new(cfg.telegram.caption_limit);
    let channel: Box<dyn DeliveryChannel> = if args.dry_run {
        Box::new(StdoutChannel)
    } else {
        Box::new(TelegramChannel::from_config(&cfg))
    };

    let mut policy = SeenPolicy::from_config(&cfg);
    policy.persist = !args.dry_run;

    let pipeline = Pipeline::new(
        &api,
        &normalizer,
        &composer,
        DeliveryEngine::new(channel.as_ref(), &photos),
    )
    .with_filter(KeywordFilter::new(cfg.source.keywords.as_slice()))
    .with_policy(policy);

    let store = seen_backend(&cfg)?;
    info!(
        seen = %store.location(),
        keywords = ?cfg.source.keywords,
        dry_run = args.dry_run,
        "starting check"
    );

    let report = pipeline.run(store.as_ref()).await.context("seen-set store failed")?;
    report.log_summary();
    Ok(())
}

fn seen_backend(cfg: &Config) -> Result<Box<dyn SeenBackend>> {
    match &cfg.state.github {
        Some(gh) => Ok(Box::new(GitHubStore::from_config(gh, cfg.http.timeout())?)),
        None => Ok(Box::new(SeenStore::new(&cfg.state.seen_file))),
    }
}
