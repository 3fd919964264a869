// ===============================
// src/gateway_http.rs
// ===============================
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use tracing::{debug, info};

use crate::domain::{AccountSnapshot, Side};
use crate::error::{BotError, Result};
use crate::gateway::VenueClient;
use crate::wire::{Transaction, WireAccount};

/// Venue REST gateway: `GET /account`, `POST /buy`, `POST /sell`, basic auth.
///
/// Orders are never retried here; a failed call leaves the account state
/// unknown and the caller decides what to do.
pub struct HttpVenue {
    base: String,
    login: String,
    password: String,
    http: Client,
}

impl HttpVenue {
    pub fn new(base: String, login: String, password: String) -> Self {
        Self { base: base.trim_end_matches('/').to_string(), login, password, http: Client::new() }
    }

    async fn account_call(&self, what: &str, req: RequestBuilder) -> Result<AccountSnapshot> {
        let rsp = req.basic_auth(&self.login, Some(&self.password)).send().await?;
        let code = rsp.status();
        if code != StatusCode::OK {
            let body = rsp.text().await.unwrap_or_default();
            return Err(BotError::Protocol(format!("{what} query HTTP error {code}: {}", body.trim())));
        }
        let raw = rsp.text().await?;
        let acc: WireAccount = serde_json::from_str(&raw)?;
        Ok(acc.into())
    }

    async fn order(&self, side: Side, asset: &str, amount: f64) -> Result<AccountSnapshot> {
        let url = format!("{}/{}", self.base, side.as_str());
        let req = self.http.post(url).json(&Transaction { asset, amount });
        let acc = self.account_call(side.as_str(), req).await?;
        info!(side = side.as_str(), %asset, amount, balance = acc.balance, "order done");
        Ok(acc)
    }
}

#[async_trait]
impl VenueClient for HttpVenue {
    async fn get_account(&self) -> Result<AccountSnapshot> {
        let url = format!("{}/account", self.base);
        let acc = self.account_call("account", self.http.get(url)).await?;
        debug!(balance = acc.balance, holdings = acc.holdings.len(), "account fetched");
        Ok(acc)
    }

    async fn buy(&self, asset: &str, amount: f64) -> Result<AccountSnapshot> {
        self.order(Side::Buy, asset, amount).await
    }

    async fn sell(&self, asset: &str, amount: f64) -> Result<AccountSnapshot> {
        self.order(Side::Sell, asset, amount).await
    }
}
