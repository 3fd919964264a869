// ===============================
// src/metrics.rs
// ===============================
use once_cell::sync::Lazy;
use prometheus::{Encoder, Gauge, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use tracing::{debug, error, info};

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

// -------- Feed --------
pub static TICKS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("ticks_total", "ticks delivered by the price stream").unwrap());

pub static TICKS_BY_ASSET: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(Opts::new("ticks_total_by_asset", "ticks per asset"), &["asset"]).unwrap()
});

pub static STALE_TICKS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("stale_ticks_total", "ticks discarded by the staleness guard").unwrap()
});

pub static STREAM_SESSIONS: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("stream_sessions_open", "price stream sessions currently open").unwrap()
});

// -------- Decisions / orders --------
pub static SIGNALS_BY: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(Opts::new("signals_total_by", "momentum signals (label: kind)"), &["kind"]).unwrap()
});

pub static ORDERS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(Opts::new("orders_total", "orders executed (label: side)"), &["side"]).unwrap()
});

pub static BALANCE: Lazy<Gauge> =
    Lazy::new(|| Gauge::new("account_balance", "balance of the latest account snapshot").unwrap());

pub fn init() {
    for m in [
        REGISTRY.register(Box::new(TICKS.clone())),
        REGISTRY.register(Box::new(TICKS_BY_ASSET.clone())),
        REGISTRY.register(Box::new(STALE_TICKS.clone())),
        REGISTRY.register(Box::new(STREAM_SESSIONS.clone())),
        REGISTRY.register(Box::new(SIGNALS_BY.clone())),
        REGISTRY.register(Box::new(ORDERS.clone())),
        REGISTRY.register(Box::new(BALANCE.clone())),
    ] {
        if let Err(e) = m {
            error!(?e, "metrics register failed");
        }
    }
}

fn exposition() -> Vec<u8> {
    let mut out = Vec::new();
    match TextEncoder::new().encode(&REGISTRY.gather(), &mut out) {
        Ok(()) if !out.is_empty() => out,
        Ok(()) => b"# no metrics\n".to_vec(),
        Err(e) => {
            error!(?e, "metrics encode failed");
            b"# encode failed\n".to_vec()
        }
    }
}

/// Status line and body for one request line; only `GET /metrics` is served.
fn respond(request_line: &str) -> (&'static str, Vec<u8>) {
    let mut parts = request_line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some("GET"), Some("/metrics")) => ("200 OK", exposition()),
        (Some(_), Some(_)) => ("404 Not Found", b"not found\n".to_vec()),
        _ => ("400 Bad Request", b"bad request\n".to_vec()),
    }
}

fn handle_client(mut stream: TcpStream) {
    let mut req = [0u8; 1024];
    let n = stream.read(&mut req).unwrap_or(0);
    let head = String::from_utf8_lossy(&req[..n]);
    let (status, body) = respond(head.lines().next().unwrap_or(""));

    let header = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/plain; version=0.0.4; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    if let Err(e) = stream.write_all(header.as_bytes()).and_then(|_| stream.write_all(&body)) {
        debug!(?e, "metrics client went away");
    }
}

/// Serves metrics from a dedicated OS thread so the runtime stays free.
pub fn serve_metrics(port: u16) {
    thread::spawn(move || {
        let addr = format!("0.0.0.0:{port}");
        let listener = match TcpListener::bind(&addr) {
            Ok(l) => l,
            Err(e) => {
                error!(%addr, ?e, "metrics bind failed");
                return;
            }
        };
        info!(%addr, "metrics listening");

        for conn in listener.incoming() {
            match conn {
                Ok(stream) => handle_client(stream),
                Err(e) => error!(?e, "metrics accept error"),
            }
        }
    });
}
