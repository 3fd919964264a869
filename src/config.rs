// ===============================
// src/config.rs
// ===============================
/*
=============================================================================
Project : reversal_bot_rust — single-venue momentum reversal trader in Rust
Module  : config.rs
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
use clap::{Parser, ValueEnum};
use dotenvy::dotenv;
use std::path::PathBuf;
use tokio::time::Duration;

use crate::error::{BotError, Result};

/// Where ticks and orders go.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum MarketMode {
    /// Random-walk feed and in-memory venue, no network.
    Mock,
    /// Real venue endpoints (REST + WebSocket).
    Venue,
}

/// Whether the engine keeps widening the observed min/max while trading.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ExtremesPolicy {
    Continuous,
    Frozen,
}

#[derive(Clone, Debug, Parser)]
#[command(name = "reversal_bot_rust", about = "Momentum reversal trader for a single venue")]
pub struct Args {
    /// Trading duration in minutes
    #[arg(default_value_t = 1)]
    pub trade_minutes: u64,

    #[arg(long, env = "MARKET_MODE", value_enum, default_value_t = MarketMode::Venue)]
    pub mode: MarketMode,

    #[arg(long, env = "VENUE_HOST", default_value = "localhost")]
    pub host: String,
    #[arg(long, env = "VENUE_PORT", default_value_t = 8002)]
    pub port: u16,
    #[arg(long, env = "VENUE_LOGIN", default_value = "test")]
    pub login: String,
    #[arg(long, env = "VENUE_PASSWORD", default_value = "test", hide_env_values = true)]
    pub password: String,

    /// Length of the market observation window
    #[arg(long, env = "OBSERVE_SECS", default_value_t = 20)]
    pub observe_secs: u64,
    /// Per-read deadline on the tick stream
    #[arg(long, env = "READ_TIMEOUT_SECS", default_value_t = 5)]
    pub read_timeout_secs: u64,
    /// Ticks older than this are discarded by the detector
    #[arg(long, env = "STALE_AFTER_SECS", default_value_t = 10)]
    pub stale_after_secs: u64,

    #[arg(long, env = "DEAL_FILE", default_value = "deal.json")]
    pub deal_file: PathBuf,
    /// Persisted deals older than this are ignored on recovery
    #[arg(long, env = "DEAL_MAX_AGE_HOURS", default_value_t = 24)]
    pub deal_max_age_hours: u64,

    /// Share of the balance spent on each buy
    #[arg(long, env = "BUY_FRACTION", default_value_t = 0.95)]
    pub buy_fraction: f64,
    #[arg(long, env = "EXTREMES_POLICY", value_enum, default_value_t = ExtremesPolicy::Continuous)]
    pub extremes: ExtremesPolicy,

    /// 0 disables the exporter
    #[arg(long, env = "METRICS_PORT", default_value_t = 9898)]
    pub metrics_port: u16,

    #[arg(long, env = "MOCK_ASSETS", value_delimiter = ',', default_value = "BTC,ETH,SOL")]
    pub mock_assets: Vec<String>,
}

/// Knobs the trade engine needs, detached from CLI parsing.
#[derive(Clone, Debug)]
pub struct EngineCfg {
    pub buy_fraction: f64,
    pub stale_after: Duration,
    pub read_timeout: Duration,
    pub extremes: ExtremesPolicy,
    pub settle_pause: Duration,
}

impl Default for EngineCfg {
    fn default() -> Self {
        Self {
            buy_fraction: 0.95,
            stale_after: Duration::from_secs(10),
            read_timeout: Duration::from_secs(5),
            extremes: ExtremesPolicy::Continuous,
            settle_pause: Duration::from_millis(250),
        }
    }
}

impl Args {
    pub fn validate(&self) -> Result<()> {
        if !(self.buy_fraction > 0.0 && self.buy_fraction <= 1.0) {
            return Err(BotError::Config(format!("buy fraction must be in (0, 1], got {}", self.buy_fraction)));
        }
        if self.read_timeout_secs == 0 {
            return Err(BotError::Config("read timeout must be at least 1s".into()));
        }
        if self.mode == MarketMode::Mock && self.mock_assets.iter().all(|a| a.trim().is_empty()) {
            return Err(BotError::Config("mock mode needs at least one asset".into()));
        }
        Ok(())
    }

    pub fn trade_duration(&self) -> Duration { Duration::from_secs(self.trade_minutes * 60) }
    pub fn observe_duration(&self) -> Duration { Duration::from_secs(self.observe_secs) }
    pub fn deal_max_age(&self) -> chrono::Duration {
        // capped at 100 years, chrono panics past its range
        chrono::Duration::hours(self.deal_max_age_hours.min(876_000) as i64)
    }

    pub fn rest_base(&self) -> String { format!("http://{}:{}", self.host, self.port) }
    pub fn stream_url(&self) -> String { format!("ws://{}:{}/rates/stream", self.host, self.port) }

    pub fn engine_cfg(&self) -> EngineCfg {
        EngineCfg {
            buy_fraction: self.buy_fraction,
            stale_after: Duration::from_secs(self.stale_after_secs),
            read_timeout: Duration::from_secs(self.read_timeout_secs),
            extremes: self.extremes,
            ..EngineCfg::default()
        }
    }
}

pub fn load() -> Result<Args> {
    // .env first so clap's env fallbacks see it
    let _ = dotenv();
    let args = Args::parse();
    args.validate()?;
    Ok(args)
}
