// ===============================
// src/strategy.rs
// ===============================
//
// Momentum reversal detector.
//
// Looks only at the last 3 accepted prices of an asset (p2, p1, p0, oldest
// first) and classifies the newest one:
//   - TurnDown : p2 < p1 && p0 < p1   (local peak at p1)
//   - TurnUp   : p2 > p1 && p0 > p1   (local trough at p1)
//   - None     : anything else, ties included
//
// No smoothing, so every wiggle counts. Ticks older than the staleness
// horizon are dropped before they reach the window.
//
use ahash::AHashMap as HashMap;
use chrono::{DateTime, Utc};
use tokio::time::Duration;
use tracing::debug;

use crate::domain::{valid_price, Signal, Tick};
use crate::error::BotError;
use crate::metrics::{SIGNALS_BY, STALE_TICKS};

const WINDOW: usize = 3;

/// Circular buffer of the last 3 prices; `0.0` marks an empty slot.
#[derive(Debug, Default, Clone)]
struct Window {
    buf: [f64; WINDOW],
    cursor: usize,
}

impl Window {
    fn push(&mut self, price: f64) -> Signal {
        self.buf[self.cursor] = price;
        self.cursor = (self.cursor + 1) % WINDOW;

        // cursor now points at the oldest slot
        let p2 = self.buf[self.cursor];
        let p1 = self.buf[(self.cursor + 1) % WINDOW];
        let p0 = self.buf[(self.cursor + 2) % WINDOW];

        if self.buf.iter().any(|p| *p == 0.0) {
            return Signal::None;
        }
        if p2 < p1 && p0 < p1 {
            Signal::TurnDown
        } else if p2 > p1 && p0 > p1 {
            Signal::TurnUp
        } else {
            Signal::None
        }
    }
}

pub struct MomentumDetector {
    windows: HashMap<String, Window>,
    stale_after: chrono::Duration,
}

impl MomentumDetector {
    pub fn new(stale_after: Duration) -> Self {
        let stale_after = chrono::Duration::from_std(stale_after).unwrap_or_else(|_| chrono::Duration::days(36_500));
        Self { windows: HashMap::new(), stale_after }
    }

    /// Feeds one price into the asset's window.
    pub fn observe(&mut self, asset: &str, price: f64) -> Signal {
        if !valid_price(price) {
            return Signal::None;
        }
        let sig = self.windows.entry(asset.to_string()).or_default().push(price);
        if sig != Signal::None {
            SIGNALS_BY.with_label_values(&[sig.label()]).inc();
        }
        sig
    }

    /// Staleness and price check, then `observe`. `None` means the tick was
    /// discarded and never reached the window.
    pub fn on_tick(&mut self, tick: &Tick, now: DateTime<Utc>) -> Option<Signal> {
        if let Err(e) = self.check_fresh(tick, now) {
            STALE_TICKS.inc();
            debug!(%e, "discarding tick");
            return None;
        }
        if !valid_price(tick.price) {
            debug!(asset = %tick.asset, price = tick.price, "discarding unusable price");
            return None;
        }
        Some(self.observe(&tick.asset, tick.price))
    }

    fn check_fresh(&self, tick: &Tick, now: DateTime<Utc>) -> Result<(), BotError> {
        let age = now.signed_duration_since(tick.observed_at);
        if age > self.stale_after {
            return Err(BotError::StaleData { asset: tick.asset.clone(), age_ms: age.num_milliseconds() });
        }
        Ok(())
    }
}
