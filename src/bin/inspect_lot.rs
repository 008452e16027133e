use anyhow::Result;
use clap::Parser;
use serde_json::{json, to_string_pretty};
use std::path::PathBuf;

use lelang_watchbot::api::ApiClient;
use lelang_watchbot::compose::Composer;
use lelang_watchbot::config;
use lelang_watchbot::model::Lot;
use lelang_watchbot::normalize::Normalizer;

#[derive(Parser, Debug)]
#[command(about = "Fetch one lot and show what the watcher would send for it")]
struct Args {
    /// Path to YAML config
    #[arg(long)]
    config: Option<PathBuf>,

    /// Lot identifier
    lot_id: String,

    /// Also dump the raw listing entry and detail payload
    #[arg(long)]
    raw: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load_source_only(args.config.as_deref())?;
    let client = ApiClient::from_config(&cfg)?;
    let normalizer = Normalizer::from_config(&cfg)?;
    let composer = Composer::new(cfg.telegram.caption_limit);

    let listed = match client.fetch_listing().await {
        Ok(lots) => lots.into_iter().find(|l| l.id == args.lot_id.trim()),
        Err(err) => {
            eprintln!("listing unavailable: {err}");
            None
        }
    };
    let lot = match listed {
        Some(lot) => lot,
        None => {
            println!("Lot {} is not in the current listing; using detail only.", args.lot_id);
            Lot {
                id: args.lot_id.trim().to_string(),
                raw: json!({}),
            }
        }
    };

    let detail = client.fetch_detail(&lot.id).await;
    if args.raw {
        println!("Listing entry:\n{}", to_string_pretty(&lot.raw)?);
        match &detail {
            Some(d) => println!("Detail payload:\n{}", to_string_pretty(&d.raw)?),
            None => println!("Detail payload: <none>"),
        }
    }

    let fields = normalizer.normalize(&lot, detail.as_ref());
    println!("Canonical fields:\n{:#?}", fields);

    let msg = composer.compose(&fields);
    println!("\nMessage ({} chars):\n{}", msg.text.chars().count(), msg.text);
    if let Some(photo) = &msg.photo {
        let urls: Vec<&str> = photo.candidates.iter().map(|u| u.as_str()).collect();
        println!("\nPhoto candidates: {}", urls.join(", "));
        if msg.truncated {
            println!("Photo caption (cut to {}):\n{}", composer.caption_limit(), msg.photo_caption);
        }
    }
    Ok(())
}
