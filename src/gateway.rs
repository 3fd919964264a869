// ===============================
// src/gateway.rs (venue interface + mock venue)
// ===============================
use ahash::AHashMap as HashMap;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, RwLock};
use tracing::info;

use crate::domain::{AccountSnapshot, Holding, Order, Side};
use crate::error::{BotError, Result};

/// Request/response access to the venue account.
///
/// Every call returns the account as it stands right after the call.
#[async_trait]
pub trait VenueClient: Send + Sync {
    async fn get_account(&self) -> Result<AccountSnapshot>;
    async fn buy(&self, asset: &str, amount: f64) -> Result<AccountSnapshot>;
    async fn sell(&self, asset: &str, amount: f64) -> Result<AccountSnapshot>;
}

/// Latest known price per asset, shared between the mock feed and mock venue.
#[derive(Clone, Default, Debug)]
pub struct QuoteBoard(Arc<RwLock<HashMap<String, f64>>>);

impl QuoteBoard {
    pub fn mark(&self, asset: &str, price: f64) {
        if let Ok(mut m) = self.0.write() {
            m.insert(asset.to_string(), price);
        }
    }

    pub fn get(&self, asset: &str) -> Option<f64> {
        self.0.read().ok().and_then(|m| m.get(asset).copied())
    }
}

#[derive(Debug, Default)]
struct MockBook {
    balance: f64,
    holdings: HashMap<String, f64>,
    orders: Vec<Order>,
    reject_orders: bool,
}

impl MockBook {
    fn snapshot(&self) -> AccountSnapshot {
        let mut holdings: Vec<Holding> = self
            .holdings
            .iter()
            .filter(|(_, amt)| **amt > 0.0)
            .map(|(a, amt)| Holding { asset: a.clone(), amount: *amt })
            .collect();
        holdings.sort_by(|a, b| a.asset.cmp(&b.asset));
        AccountSnapshot { balance: self.balance, holdings }
    }
}

/// In-memory venue: fills every order in full at the board's latest quote.
#[derive(Clone, Debug)]
pub struct MockVenue {
    book: Arc<Mutex<MockBook>>,
    quotes: QuoteBoard,
}

impl MockVenue {
    pub fn new(balance: f64, quotes: QuoteBoard) -> Self {
        let book = MockBook { balance, ..MockBook::default() };
        Self { book: Arc::new(Mutex::new(book)), quotes }
    }

    #[cfg(test)]
    pub fn with_holding(self, asset: &str, amount: f64) -> Self {
        if let Ok(mut b) = self.book.lock() {
            b.holdings.insert(asset.to_string(), amount);
        }
        self
    }

    /// Makes every following buy/sell fail with a protocol error.
    #[cfg(test)]
    pub fn reject_orders(&self) {
        if let Ok(mut b) = self.book.lock() {
            b.reject_orders = true;
        }
    }

    #[cfg(test)]
    pub fn orders(&self) -> Vec<Order> {
        self.book.lock().map(|b| b.orders.clone()).unwrap_or_default()
    }

    fn book(&self) -> Result<std::sync::MutexGuard<'_, MockBook>> {
        self.book.lock().map_err(|_| BotError::Protocol("mock venue book poisoned".into()))
    }

    fn execute(&self, side: Side, asset: &str, amount: f64) -> Result<AccountSnapshot> {
        let mut book = self.book()?;
        if book.reject_orders {
            return Err(BotError::Protocol(format!("{} query HTTP error 400: rejected", side.as_str())));
        }
        if !(amount > 0.0) {
            return Err(BotError::Protocol(format!("invalid amount {amount}")));
        }
        let px = self
            .quotes
            .get(asset)
            .ok_or_else(|| BotError::Protocol(format!("no quote for {asset}")))?;
        let notional = px * amount;

        match side {
            Side::Buy => {
                if notional > book.balance {
                    return Err(BotError::Protocol(format!("insufficient balance for {amount} {asset}")));
                }
                book.balance -= notional;
                *book.holdings.entry(asset.to_string()).or_insert(0.0) += amount;
            }
            Side::Sell => {
                let held = book.holdings.get(asset).copied().unwrap_or(0.0);
                if amount > held {
                    return Err(BotError::Protocol(format!("cannot sell {amount} {asset}, holding {held}")));
                }
                book.balance += notional;
                book.holdings.insert(asset.to_string(), held - amount);
            }
        }
        let fill = Order { side, asset: asset.to_string(), amount };
        info!(side = fill.side.as_str(), asset = %fill.asset, amount = fill.amount, px, fills = book.orders.len() + 1, "mock fill");
        book.orders.push(fill);
        Ok(book.snapshot())
    }
}

#[async_trait]
impl VenueClient for MockVenue {
    async fn get_account(&self) -> Result<AccountSnapshot> {
        Ok(self.book()?.snapshot())
    }

    async fn buy(&self, asset: &str, amount: f64) -> Result<AccountSnapshot> {
        self.execute(Side::Buy, asset, amount)
    }

    async fn sell(&self, asset: &str, amount: f64) -> Result<AccountSnapshot> {
        self.execute(Side::Sell, asset, amount)
    }
}
