// ===============================
// src/domain.rs
// ===============================
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side { Buy, Sell }
impl Side { pub fn as_str(&self) -> &'static str { match self { Side::Buy => "buy", Side::Sell => "sell" } } }

/// A usable quote: finite and above zero.
pub fn valid_price(price: f64) -> bool {
    price.is_finite() && price > 0.0
}

/// One price observation for an asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick { pub asset: String, pub price: f64, pub observed_at: DateTime<Utc> }

impl Tick {
    pub fn now(asset: impl Into<String>, price: f64) -> Self {
        Self { asset: asset.into(), price, observed_at: Utc::now() }
    }
}

/// Momentum classification of the latest sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal { TurnUp, TurnDown, None }
impl Signal {
    pub fn label(&self) -> &'static str {
        match self { Signal::TurnUp => "turn_up", Signal::TurnDown => "turn_down", Signal::None => "none" }
    }
}

/// Running price range of one asset. Min only decreases, max only increases.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetStats { pub asset: String, pub last_price: f64, pub min_seen: f64, pub max_seen: f64 }

impl AssetStats {
    pub fn new(asset: impl Into<String>, price: f64) -> Self {
        Self { asset: asset.into(), last_price: price, min_seen: price, max_seen: price }
    }

    /// Folds `price` into the range; returns true when min or max moved.
    /// Unusable prices are ignored.
    pub fn update(&mut self, price: f64) -> bool {
        if !valid_price(price) {
            return false;
        }
        self.last_price = price;
        let mut moved = false;
        if price < self.min_seen { self.min_seen = price; moved = true; }
        if price > self.max_seen { self.max_seen = price; moved = true; }
        moved
    }

    /// Informational (buy, sell) levels derived from the range.
    pub fn target_levels(&self) -> (f64, f64) {
        let lo = self.min_seen * 1.1;
        let hi = self.max_seen / 1.1;
        (lo.min(hi), lo.max(hi))
    }
}

impl fmt::Display for AssetStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:.3} (min {:.3}, max {:.3})", self.asset, self.last_price, self.min_seen, self.max_seen)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Holding { pub asset: String, pub amount: f64 }

/// Account state as returned by the venue after a call. Replaced, never mutated.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AccountSnapshot { pub balance: f64, pub holdings: Vec<Holding> }

impl AccountSnapshot {
    /// Non-zero holding of `asset`, if any.
    pub fn holding(&self, asset: &str) -> Option<&Holding> {
        self.holdings.iter().find(|h| h.asset == asset && h.amount > 0.0)
    }
}

/// Most recent open buy, persisted across restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deal { pub timestamp: DateTime<Utc>, pub asset: String, pub amount: f64, pub price: f64 }

/// Derived from the account snapshot; never stored.
///
/// `last_buy_price == None` means the holding exists but its entry price is
/// unknown, in which case any turn-down sells.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PositionState {
    Flat,
    Long { amount: f64, last_buy_price: Option<f64> },
}

impl PositionState {
    pub fn from_snapshot(acc: &AccountSnapshot, asset: &str, last_buy_price: Option<f64>) -> Self {
        match acc.holding(asset) {
            Some(h) => PositionState::Long { amount: h.amount, last_buy_price },
            None => PositionState::Flat,
        }
    }

    pub fn is_long(&self) -> bool { matches!(self, PositionState::Long { .. }) }
}

/// Order as submitted to the venue (recorded by the mock gateway).
#[derive(Debug, Clone, PartialEq)]
pub struct Order { pub side: Side, pub asset: String, pub amount: f64 }
