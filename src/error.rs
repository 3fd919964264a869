// ===============================
// src/error.rs
// ===============================
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Error taxonomy shared by feed, gateway, store and engine.
///
/// Fatal classes (`Transport`, `Protocol`, `Config`) end the current run.
/// `StaleData` and `Persistence` are recovered where they happen and only
/// surface in logs.
#[derive(Debug, Error)]
pub enum BotError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("stale tick for {asset}: {age_ms}ms old")]
    StaleData { asset: String, age_ms: i64 },
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("config error: {0}")]
    Config(String),
}

impl BotError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, BotError::Transport(_) | BotError::Protocol(_) | BotError::Config(_))
    }
}

impl From<reqwest::Error> for BotError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            BotError::Protocol(e.to_string())
        } else {
            BotError::Transport(e.to_string())
        }
    }
}

impl From<tungstenite::Error> for BotError {
    fn from(e: tungstenite::Error) -> Self {
        match e {
            tungstenite::Error::Http(rsp) => {
                BotError::Protocol(format!("stream handshake rejected: HTTP {}", rsp.status()))
            }
            other => BotError::Transport(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for BotError {
    fn from(e: serde_json::Error) -> Self {
        BotError::Protocol(e.to_string())
    }
}

impl From<std::io::Error> for BotError {
    fn from(e: std::io::Error) -> Self {
        BotError::Persistence(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BotError>;
