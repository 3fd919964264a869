// ===============================
// src/stream.rs
// ===============================
//
// One price stream session = one connection + one reader task + one
// delivery channel. The reader forwards ticks in arrival order and checks
// for a stop request before every send. `stop()` ends the reader, which
// drops the connection and the channel sender; the consumer then sees
// end-of-stream. Dropping the session without `stop()` still signals the
// reader.
//
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

use crate::domain::Tick;
use crate::error::{BotError, Result};
use crate::feed::{TickFeed, TickStream};
use crate::metrics::{STREAM_SESSIONS, TICKS, TICKS_BY_ASSET};

// Small on purpose: the reader should not run far ahead of the consumer.
const DELIVERY_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState { Open, Closed }

/// Requests cooperative shutdown of a session from any task.
#[derive(Clone, Debug)]
pub struct StopHandle(Arc<watch::Sender<bool>>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.send_replace(true);
    }
}

pub struct PriceStream {
    ticks: mpsc::Receiver<Tick>,
    stop: StopHandle,
    reader: Option<JoinHandle<Result<()>>>,
    state: SessionState,
}

impl PriceStream {
    /// Connects `feed` and starts the reader task.
    pub async fn start<F: TickFeed + ?Sized>(feed: &F, read_timeout: Duration) -> Result<Self> {
        let source = feed.connect().await?;
        Ok(Self::spawn(source, read_timeout))
    }

    /// Starts a session over an already connected source.
    pub fn spawn(source: TickStream, read_timeout: Duration) -> Self {
        let (tx, rx) = mpsc::channel(DELIVERY_CAPACITY);
        let (stop_tx, stop_rx) = watch::channel(false);
        let reader = tokio::spawn(pump(source, tx, stop_rx, read_timeout));
        STREAM_SESSIONS.inc();
        info!(?read_timeout, "price stream open");
        Self { ticks: rx, stop: StopHandle(Arc::new(stop_tx)), reader: Some(reader), state: SessionState::Open }
    }

    #[cfg(test)]
    pub fn state(&self) -> SessionState { self.state }

    #[cfg(test)]
    pub fn stop_handle(&self) -> StopHandle { self.stop.clone() }

    /// Next tick in arrival order, `None` once the stream has ended.
    pub async fn next(&mut self) -> Option<Tick> {
        self.ticks.recv().await
    }

    /// Stops the reader and waits for it. Safe to call more than once; only
    /// the first call reports how the reader ended.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(reader) = self.reader.take() else {
            return Ok(());
        };
        self.stop.stop();
        self.ticks.close();
        self.state = SessionState::Closed;
        STREAM_SESSIONS.dec();

        match reader.await {
            Ok(res) => {
                info!(ok = res.is_ok(), "price stream closed");
                res
            }
            Err(e) => Err(BotError::Transport(format!("stream reader task failed: {e}"))),
        }
    }
}

impl Drop for PriceStream {
    fn drop(&mut self) {
        if self.state == SessionState::Open {
            self.stop.stop();
            STREAM_SESSIONS.dec();
        }
    }
}

async fn pump(
    mut source: TickStream,
    tx: mpsc::Sender<Tick>,
    mut stop_rx: watch::Receiver<bool>,
    read_timeout: Duration,
) -> Result<()> {
    loop {
        let frame = tokio::select! {
            biased;
            _ = stop_rx.changed() => return Ok(()),
            r = timeout(read_timeout, source.next()) => r,
        };

        let tick = match frame {
            Err(_) => {
                warn!(?read_timeout, "no tick within read deadline");
                return Err(BotError::Transport(format!("no tick within {read_timeout:?}")));
            }
            Ok(None) => {
                debug!("tick source exhausted");
                return Ok(());
            }
            Ok(Some(Err(e))) => {
                warn!(%e, "read tick stream failed");
                return Err(e);
            }
            Ok(Some(Ok(t))) => t,
        };

        if *stop_rx.borrow() {
            return Ok(());
        }
        let asset = tick.asset.clone();
        tokio::select! {
            biased;
            _ = stop_rx.changed() => return Ok(()),
            sent = tx.send(tick) => {
                if sent.is_err() {
                    // consumer gone
                    return Ok(());
                }
            }
        }
        TICKS.inc();
        TICKS_BY_ASSET.with_label_values(&[&asset]).inc();
    }
}
