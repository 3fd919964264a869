// ===============================
// src/main.rs
// ===============================
/*
=============================================================================
Project : reversal_bot_rust — single-venue momentum reversal trader in Rust
Module  : main.rs
Version : 0.1.0
Author  : Kukuh Tripamungkas Wicaksono (Kukuh TW)
Email   : kukuhtw@gmail.com
WhatsApp: https://wa.me/628129893706
LinkedIn: https://id.linkedin.com/in/kukuhtw
License : MIT (see LICENSE)

Summary : Observes the venue tick stream, picks the asset to trade, reacts
          to 3-tick momentum reversals with buy/sell orders, and persists
          the open deal so a restart resumes with the right entry price.

(c) 2025 Kukuh TW. All rights reserved where applicable.
=============================================================================
*/
mod config;
mod domain;
mod engine;
mod error;
mod feed;
mod gateway;          // VenueClient + in-memory mock venue
mod gateway_http;     // real venue REST
mod metrics;
mod observer;
mod store;
mod strategy;
mod stream;
mod wire;

use std::sync::Arc;
use tokio::time::{Duration, Instant};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::{Args, MarketMode};
use crate::engine::TradeEngine;
use crate::error::Result;
use crate::feed::{MockTickFeed, TickFeed, WsTickFeed};
use crate::gateway::{MockVenue, QuoteBoard, VenueClient};
use crate::gateway_http::HttpVenue;
use crate::observer::{choose_asset, MarketObserver};
use crate::store::DealStore;

const MOCK_BALANCE: f64 = 1_000.0;
const MOCK_TICK_EVERY: Duration = Duration::from_millis(200);

#[tokio::main]
async fn main() {
    // ---- Logging ----
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // ---- Config ----
    let args = match config::load() {
        Ok(a) => a,
        Err(e) => {
            error!(%e, "invalid configuration");
            std::process::exit(1);
        }
    };

    if let Err(e) = run(args).await {
        error!(%e, "run failed");
        std::process::exit(1);
    }
}

fn build_venue(args: &Args) -> (Arc<dyn VenueClient>, Arc<dyn TickFeed>) {
    match args.mode {
        MarketMode::Mock => {
            let quotes = QuoteBoard::default();
            let assets = args
                .mock_assets
                .iter()
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty())
                .collect();
            let feed = MockTickFeed::new(assets, MOCK_TICK_EVERY, quotes.clone());
            (Arc::new(MockVenue::new(MOCK_BALANCE, quotes)), Arc::new(feed))
        }
        MarketMode::Venue => {
            let venue = HttpVenue::new(args.rest_base(), args.login.clone(), args.password.clone());
            let feed = WsTickFeed::new(args.stream_url(), &args.login, &args.password);
            (Arc::new(venue), Arc::new(feed))
        }
    }
}

async fn run(args: Args) -> Result<()> {
    info!(
        mode = ?args.mode,
        host = %args.host,
        port = args.port,
        trade_minutes = args.trade_minutes,
        observe_secs = args.observe_secs,
        read_timeout_secs = args.read_timeout_secs,
        stale_after_secs = args.stale_after_secs,
        deal_file = %args.deal_file.display(),
        buy_fraction = args.buy_fraction,
        extremes = ?args.extremes,
        "startup config"
    );

    // ---- Metrics ----
    metrics::init();
    if args.metrics_port != 0 {
        metrics::serve_metrics(args.metrics_port);
    }

    let (venue, feed) = build_venue(&args);

    // ---- Observe ----
    let observer = MarketObserver::new(Duration::from_secs(args.read_timeout_secs));
    let overview = observer.observe(feed.as_ref(), Instant::now() + args.observe_duration()).await?;
    let asset = choose_asset(&overview)?;
    info!(stats = %asset, "selected asset");

    // ---- Trade ----
    let store = DealStore::new(&args.deal_file, args.deal_max_age());
    let engine = TradeEngine::new(venue, feed, store, args.engine_cfg());
    let report = engine.trade(asset, Instant::now() + args.trade_duration()).await?;

    info!(
        asset = %report.asset,
        buys = report.buys,
        sells = report.sells,
        final_balance = format!("{:.3}", report.final_balance),
        win = format!("{:.3}", report.win()),
        end = ?report.end,
        range = %report.stats,
        "final balance"
    );
    Ok(())
}
