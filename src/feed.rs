// ===============================
// src/feed.rs
// ===============================
//
// Tick sources:
// - WsTickFeed   : venue WebSocket `/rates/stream`, one JSON record per frame
// - MockTickFeed : random walk over a fixed asset list (offline runs)
//
// A source only knows how to open a connection and decode frames. Read
// deadlines, stop handling and delivery live in `stream.rs`.
//
use async_trait::async_trait;
use base64::Engine as _;
use futures_util::stream::{self, BoxStream, StreamExt};
use rand::Rng;
use tokio::time::{sleep, Duration};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info};
use url::Url;

use crate::domain::Tick;
use crate::error::{BotError, Result};
use crate::gateway::QuoteBoard;
use crate::wire::WireTick;

/// Decoded ticks of one connection. Dropping it closes the connection.
pub type TickStream = BoxStream<'static, Result<Tick>>;

#[async_trait]
pub trait TickFeed: Send + Sync {
    /// Opens a fresh session. Each call is a new connection.
    async fn connect(&self) -> Result<TickStream>;
}

pub struct WsTickFeed {
    url: String,
    auth: String,
}

impl WsTickFeed {
    pub fn new(url: String, login: &str, password: &str) -> Self {
        let token = base64::engine::general_purpose::STANDARD.encode(format!("{login}:{password}"));
        Self { url, auth: format!("Basic {token}") }
    }
}

/// Maps one WebSocket frame. `None` means "not a tick, keep reading".
fn decode_frame(msg: Message) -> Option<Result<Tick>> {
    match msg {
        Message::Text(txt) => Some(
            serde_json::from_str::<WireTick>(&txt)
                .map_err(BotError::from)
                .and_then(Tick::try_from),
        ),
        Message::Close(frame) => {
            debug!(?frame, "venue closed rate stream");
            None
        }
        // ping/pong/binary carry no rates
        _ => None,
    }
}

#[async_trait]
impl TickFeed for WsTickFeed {
    async fn connect(&self) -> Result<TickStream> {
        let url = Url::parse(&self.url).map_err(|e| BotError::Config(format!("bad stream url {}: {e}", self.url)))?;
        let mut req = url.as_str().into_client_request()?;
        let auth = HeaderValue::from_str(&self.auth).map_err(|e| BotError::Config(e.to_string()))?;
        req.headers_mut().insert(AUTHORIZATION, auth);

        info!(url = %self.url, "connecting rate stream");
        let (ws, rsp) = connect_async(req).await?;
        if rsp.status() != StatusCode::SWITCHING_PROTOCOLS && rsp.status() != StatusCode::OK {
            return Err(BotError::Protocol(format!("rate stream handshake: HTTP {}", rsp.status())));
        }

        let ticks = ws.filter_map(|frame| async move {
            match frame {
                Ok(m) => decode_frame(m),
                Err(e) => Some(Err(BotError::from(e))),
            }
        });
        Ok(ticks.boxed())
    }
}

/// Random-walk generator, one tick per asset every `interval`.
///
/// Every generated price is also marked on the shared `QuoteBoard` so the
/// mock venue fills at the price the engine saw.
pub struct MockTickFeed {
    assets: Vec<String>,
    interval: Duration,
    quotes: QuoteBoard,
}

impl MockTickFeed {
    pub fn new(assets: Vec<String>, interval: Duration, quotes: QuoteBoard) -> Self {
        Self { assets, interval, quotes }
    }
}

#[async_trait]
impl TickFeed for MockTickFeed {
    async fn connect(&self) -> Result<TickStream> {
        let assets: Vec<(String, f64)> = self
            .assets
            .iter()
            .map(|a| (a.clone(), self.quotes.get(a).unwrap_or(100.0)))
            .collect();
        let state = (assets, 0usize, self.interval, self.quotes.clone());

        let ticks = stream::unfold(state, |(mut assets, idx, interval, quotes)| async move {
            if assets.is_empty() {
                return None;
            }
            if idx == 0 {
                sleep(interval).await;
            }
            // don't keep ThreadRng across .await
            let step: f64 = rand::thread_rng().gen_range(-0.02..=0.02);
            let (asset, px) = &mut assets[idx];
            *px = (*px * (1.0 + step)).max(0.01);
            let tick = Tick::now(asset.clone(), *px);
            quotes.mark(&tick.asset, tick.price);

            let next = (idx + 1) % assets.len();
            Some((Ok(tick), (assets, next, interval, quotes)))
        });
        Ok(ticks.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_frame_decodes() {
        let msg = Message::Text(r#"{"Name":"BTC","Price":"42000.5"}"#.into());
        let tick = decode_frame(msg).unwrap().unwrap();
        assert_eq!(tick.asset, "BTC");
        assert_eq!(tick.price, 42000.5);
    }

    #[test]
    fn malformed_frame_is_protocol_error() {
        let msg = Message::Text("not json".into());
        assert!(matches!(decode_frame(msg), Some(Err(BotError::Protocol(_)))));
    }

    #[test]
    fn nan_price_frame_is_protocol_error() {
        let msg = Message::Text(r#"{"Name":"JUNK","Price":"NaN"}"#.into());
        assert!(matches!(decode_frame(msg), Some(Err(BotError::Protocol(_)))));
    }

    #[test]
    fn control_frames_skipped() {
        assert!(decode_frame(Message::Ping(vec![1])).is_none());
        assert!(decode_frame(Message::Close(None)).is_none());
    }

    #[test]
    fn basic_auth_header() {
        let feed = WsTickFeed::new("ws://localhost:8002/rates/stream".into(), "test", "test");
        assert_eq!(feed.auth, "Basic dGVzdDp0ZXN0");
    }

    #[tokio::test(start_paused = true)]
    async fn mock_feed_round_robins_and_marks_quotes() {
        let quotes = QuoteBoard::default();
        let feed = MockTickFeed::new(vec!["A".into(), "B".into()], Duration::from_millis(200), quotes.clone());
        let mut s = feed.connect().await.unwrap();

        let a = s.next().await.unwrap().unwrap();
        let b = s.next().await.unwrap().unwrap();
        let a2 = s.next().await.unwrap().unwrap();
        assert_eq!((a.asset.as_str(), b.asset.as_str(), a2.asset.as_str()), ("A", "B", "A"));
        assert!(a.price > 0.0);
        assert_eq!(quotes.get("B"), Some(b.price));
    }
}
