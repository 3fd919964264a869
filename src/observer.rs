// ===============================
// src/observer.rs
// ===============================
use ahash::AHashMap as HashMap;
use tokio::time::{interval_at, sleep_until, Duration, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::domain::{valid_price, AssetStats};
use crate::error::{BotError, Result};
use crate::feed::TickFeed;
use crate::stream::PriceStream;

/// Per-asset running min/max collected during the warm-up window.
#[derive(Debug, Default, Clone)]
pub struct MarketOverview {
    pub stats: HashMap<String, AssetStats>,
}

impl MarketOverview {
    pub fn record(&mut self, asset: &str, price: f64) {
        if !valid_price(price) {
            debug!(%asset, price, "ignoring unusable price");
            return;
        }
        match self.stats.get_mut(asset) {
            Some(st) => {
                st.update(price);
            }
            None => {
                self.stats.insert(asset.to_string(), AssetStats::new(asset, price));
            }
        }
    }

    /// Asset with the highest max seen.
    pub fn best_asset(&self) -> Option<&AssetStats> {
        self.stats
            .values()
            .max_by(|a, b| a.max_seen.total_cmp(&b.max_seen).then_with(|| b.asset.cmp(&a.asset)))
    }

    fn log_snapshot(&self, msg: &str) {
        let mut rows: Vec<&AssetStats> = self.stats.values().collect();
        rows.sort_by(|a, b| a.asset.cmp(&b.asset));
        for st in rows {
            info!(stats = %st, "{msg}");
        }
    }
}

pub struct MarketObserver {
    read_timeout: Duration,
    status_every: Duration,
}

impl MarketObserver {
    pub fn new(read_timeout: Duration) -> Self {
        Self { read_timeout, status_every: Duration::from_secs(5) }
    }

    /// Collects ticks until `until` or until the stream ends. The stream
    /// session is always stopped before returning.
    pub async fn observe<F: TickFeed + ?Sized>(&self, feed: &F, until: Instant) -> Result<MarketOverview> {
        info!(secs = until.saturating_duration_since(Instant::now()).as_secs(), "observing market");
        let mut session = PriceStream::start(feed, self.read_timeout).await?;
        let mut overview = MarketOverview::default();

        let mut status = interval_at(Instant::now() + self.status_every, self.status_every);
        status.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let deadline = sleep_until(until);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => break,
                _ = status.tick() => overview.log_snapshot("observation running"),
                maybe = session.next() => match maybe {
                    Some(tick) => overview.record(&tick.asset, tick.price),
                    None => break,
                },
            }
        }

        match session.stop().await {
            Ok(()) => {}
            Err(e) if e.is_fatal() && overview.stats.is_empty() => return Err(e),
            Err(e) => warn!(%e, fatal = e.is_fatal(), "rate stream ended with error during observation"),
        }
        overview.log_snapshot("observation completed");
        Ok(overview)
    }
}

/// Picks the asset to trade or fails when nothing was observed.
pub fn choose_asset(overview: &MarketOverview) -> Result<AssetStats> {
    overview
        .best_asset()
        .cloned()
        .ok_or_else(|| BotError::Protocol("no ticks observed, nothing to trade".into()))
}
