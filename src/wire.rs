// ===============================
// src/wire.rs
// ===============================
//
// JSON payloads of the venue. Prices, balances and holdings arrive as
// float strings ("12.5"); order amounts are sent as plain numbers.
//
use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};

use crate::domain::{valid_price, AccountSnapshot, Holding, Tick};
use crate::error::BotError;

fn float_str<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw { Str(String), Num(f64) }

    match Raw::deserialize(d)? {
        Raw::Num(v) => Ok(v),
        Raw::Str(s) => s.trim().parse::<f64>().map_err(de::Error::custom),
    }
}

#[derive(Debug, Deserialize)]
pub struct WireTick {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Price", deserialize_with = "float_str")]
    pub price: f64,
    #[serde(rename = "When", default)]
    pub when: Option<DateTime<Utc>>,
}

impl TryFrom<WireTick> for Tick {
    type Error = BotError;

    /// Rejects NaN, infinite and non-positive prices ("NaN" and "-5" parse fine).
    fn try_from(w: WireTick) -> Result<Self, Self::Error> {
        if !valid_price(w.price) {
            return Err(BotError::Protocol(format!("unusable price {} for {}", w.price, w.name)));
        }
        Ok(Tick { asset: w.name, price: w.price, observed_at: w.when.unwrap_or_else(Utc::now) })
    }
}

#[derive(Debug, Deserialize)]
pub struct WireAsset {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Amount", deserialize_with = "float_str")]
    pub amount: f64,
}

#[derive(Debug, Deserialize)]
pub struct WireAccount {
    #[serde(rename = "Balance", deserialize_with = "float_str")]
    pub balance: f64,
    #[serde(rename = "Assets", default)]
    pub assets: Option<Vec<WireAsset>>,
}

impl From<WireAccount> for AccountSnapshot {
    fn from(w: WireAccount) -> Self {
        let holdings = w
            .assets
            .unwrap_or_default()
            .into_iter()
            .map(|a| Holding { asset: a.name, amount: a.amount })
            .collect();
        AccountSnapshot { balance: w.balance, holdings }
    }
}

#[derive(Debug, Serialize)]
pub struct Transaction<'a> {
    #[serde(rename = "Asset")]
    pub asset: &'a str,
    #[serde(rename = "Amount")]
    pub amount: f64,
}
