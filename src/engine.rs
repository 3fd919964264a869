// ===============================
// src/engine.rs (position state machine)
// ===============================
//
//   Flat + TurnUp                             -> Buy  (balance / price * buy_fraction)
//   Long + TurnDown, price > last buy or n/a  -> Sell (full holding)
//   anything else                             -> keep consuming
//
// The account snapshot is replaced by whatever the venue returns after each
// order. The trading deadline is only checked right after a sell, so the
// engine never walks away from an open position at the deadline.
//
use chrono::Utc;
use std::sync::Arc;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use crate::config::{EngineCfg, ExtremesPolicy};
use crate::domain::{valid_price, AccountSnapshot, AssetStats, Deal, PositionState, Signal, Tick};
use crate::error::{BotError, Result};
use crate::feed::TickFeed;
use crate::gateway::VenueClient;
use crate::metrics::{BALANCE, ORDERS};
use crate::store::DealStore;
use crate::strategy::MomentumDetector;
use crate::stream::PriceStream;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// Deadline passed and the last position was sold.
    Deadline,
    /// Tick stream ended before the deadline logic stopped the loop.
    StreamEnded,
}

#[derive(Debug, Clone)]
pub struct TradeReport {
    pub asset: String,
    pub initial_balance: f64,
    pub final_balance: f64,
    pub buys: u32,
    pub sells: u32,
    pub end: EndReason,
    /// Traded asset's range as tracked during the run.
    pub stats: AssetStats,
}

impl TradeReport {
    pub fn win(&self) -> f64 { self.final_balance - self.initial_balance }
}

/// Mutable state of one trading run.
struct Run {
    asset: AssetStats,
    account: AccountSnapshot,
    position: PositionState,
    detector: MomentumDetector,
    buys: u32,
    sells: u32,
}

pub struct TradeEngine {
    venue: Arc<dyn VenueClient>,
    feed: Arc<dyn TickFeed>,
    store: DealStore,
    cfg: EngineCfg,
}

impl TradeEngine {
    pub fn new(venue: Arc<dyn VenueClient>, feed: Arc<dyn TickFeed>, store: DealStore, cfg: EngineCfg) -> Self {
        Self { venue, feed, store, cfg }
    }

    /// Trades `asset` until `until` has passed and a sell completed, or
    /// until the tick stream ends. Order failures abort the run.
    pub async fn trade(&self, asset: AssetStats, until: Instant) -> Result<TradeReport> {
        let account = self.venue.get_account().await?;
        let initial_balance = account.balance;
        BALANCE.set(account.balance);
        info!(asset = %asset.asset, initial_balance, "trading");

        let position = self.recover_position(&account, &asset.asset).await;
        info!(?position, "initial position");

        let mut run = Run {
            asset,
            account,
            position,
            detector: MomentumDetector::new(self.cfg.stale_after),
            buys: 0,
            sells: 0,
        };

        sleep(self.cfg.settle_pause).await;
        let mut session = PriceStream::start(self.feed.as_ref(), self.cfg.read_timeout).await?;

        let outcome = self.run_loop(&mut run, &mut session, until).await;
        let closed = session.stop().await;

        let end = match (outcome, closed) {
            (Err(e), _) => {
                error!(%e, asset = %run.asset.asset, "trading aborted");
                return Err(e);
            }
            (Ok(EndReason::Deadline), Err(e)) => {
                // the run finished; the stream error is only a footnote
                debug!(%e, "rate stream closed with error after deadline");
                EndReason::Deadline
            }
            (Ok(EndReason::StreamEnded), Err(e)) if e.is_fatal() => {
                error!(%e, asset = %run.asset.asset, "rate stream failed");
                return Err(e);
            }
            (Ok(end), Err(e)) => {
                warn!(%e, "rate stream closed with recoverable error");
                end
            }
            (Ok(end), Ok(())) => end,
        };

        let report = TradeReport {
            asset: run.asset.asset.clone(),
            initial_balance,
            final_balance: run.account.balance,
            buys: run.buys,
            sells: run.sells,
            end,
            stats: run.asset.clone(),
        };
        info!(
            final_balance = report.final_balance,
            win = report.win(),
            ?end,
            still_long = run.position.is_long(),
            "trading done"
        );
        Ok(report)
    }

    /// Long at startup: seed the entry price from the persisted deal if it
    /// belongs to the traded asset, otherwise leave it unknown.
    async fn recover_position(&self, account: &AccountSnapshot, asset: &str) -> PositionState {
        if account.holding(asset).is_none() {
            return PositionState::Flat;
        }
        let last_buy_price = match self.store.load().await {
            Some(deal) if deal.asset == asset && valid_price(deal.price) => Some(deal.price),
            Some(deal) if deal.asset == asset => {
                warn!(%asset, price = deal.price, path = %self.store.path().display(), "persisted deal has no usable price, entry price unknown");
                None
            }
            Some(deal) => {
                warn!(deal_asset = %deal.asset, %asset, "persisted deal is for another asset, entry price unknown");
                None
            }
            None => {
                warn!(%asset, "holding without persisted deal, entry price unknown");
                None
            }
        };
        PositionState::from_snapshot(account, asset, last_buy_price)
    }

    async fn run_loop(&self, run: &mut Run, session: &mut PriceStream, until: Instant) -> Result<EndReason> {
        while let Some(tick) = session.next().await {
            if tick.asset != run.asset.asset {
                continue;
            }
            let Some(signal) = run.detector.on_tick(&tick, Utc::now()) else {
                continue;
            };
            self.track_extremes(run, tick.price);

            match (run.position, signal) {
                (PositionState::Flat, Signal::TurnUp) => self.buy(run, &tick).await?,
                (PositionState::Long { amount, last_buy_price }, Signal::TurnDown) => {
                    if last_buy_price.map_or(true, |p| tick.price > p) {
                        self.sell(run, &tick, amount).await?;
                        if Instant::now() >= until {
                            return Ok(EndReason::Deadline);
                        }
                    } else {
                        debug!(price = tick.price, ?last_buy_price, "turn down below entry, holding");
                    }
                }
                _ => {}
            }
        }
        Ok(EndReason::StreamEnded)
    }

    fn track_extremes(&self, run: &mut Run, price: f64) {
        if self.cfg.extremes == ExtremesPolicy::Frozen {
            return;
        }
        if run.asset.update(price) {
            let (buy_level, sell_level) = run.asset.target_levels();
            debug!(
                asset = %run.asset.asset,
                min = run.asset.min_seen,
                max = run.asset.max_seen,
                buy_level,
                sell_level,
                "range moved"
            );
        }
    }

    async fn buy(&self, run: &mut Run, tick: &Tick) -> Result<()> {
        let amount = run.account.balance / tick.price * self.cfg.buy_fraction;
        if !(amount > 0.0) || !amount.is_finite() {
            warn!(balance = run.account.balance, price = tick.price, "nothing to buy with");
            return Ok(());
        }
        info!(asset = %tick.asset, amount, price = tick.price, spend = run.account.balance * self.cfg.buy_fraction, "buy");

        let account = self.venue.buy(&tick.asset, amount).await?;
        ORDERS.with_label_values(&["buy"]).inc();
        let position = PositionState::from_snapshot(&account, &tick.asset, Some(tick.price));
        let PositionState::Long { amount: held, .. } = position else {
            return Err(BotError::Protocol(format!("buy of {} acknowledged but no holding reported", tick.asset)));
        };

        self.store
            .store(&Deal { timestamp: Utc::now(), asset: tick.asset.clone(), amount: held, price: tick.price })
            .await;
        self.adopt(run, account, position);
        run.buys += 1;
        Ok(())
    }

    async fn sell(&self, run: &mut Run, tick: &Tick, amount: f64) -> Result<()> {
        let before = run.account.balance;
        let account = self.venue.sell(&tick.asset, amount).await?;
        ORDERS.with_label_values(&["sell"]).inc();
        info!(asset = %tick.asset, amount, price = tick.price, proceeds = account.balance - before, "sell");

        self.store.clear().await;
        let position = PositionState::from_snapshot(&account, &tick.asset, None);
        self.adopt(run, account, position);
        run.sells += 1;
        Ok(())
    }

    fn adopt(&self, run: &mut Run, account: AccountSnapshot, position: PositionState) {
        BALANCE.set(account.balance);
        run.account = account;
        run.position = position;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Order, Side};
    use crate::feed::TickStream;
    use crate::gateway::{MockVenue, QuoteBoard};
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use futures_util::stream::{self, StreamExt};
    use tokio::time::Duration;

    /// Replays a fixed tick list.
    struct ReplayFeed(Vec<Tick>);

    #[async_trait]
    impl TickFeed for ReplayFeed {
        async fn connect(&self) -> Result<TickStream> {
            let items: Vec<Result<Tick>> = self.0.iter().cloned().map(Ok).collect();
            Ok(stream::iter(items).boxed())
        }
    }

    struct Harness {
        venue: MockVenue,
        engine: TradeEngine,
        _dir: tempfile::TempDir,
    }

    fn cfg() -> EngineCfg {
        EngineCfg { settle_pause: Duration::ZERO, ..EngineCfg::default() }
    }

    async fn harness(
        balance: f64,
        holding: Option<(&str, f64)>,
        deal: Option<Deal>,
        prices: Vec<(&'static str, f64)>,
    ) -> Harness {
        let ticks = prices.into_iter().map(|(a, p)| Tick::now(a, p)).collect();
        timed_harness(balance, holding, deal, ticks).await
    }

    async fn timed_harness(
        balance: f64,
        holding: Option<(&str, f64)>,
        deal: Option<Deal>,
        ticks: Vec<Tick>,
    ) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = DealStore::new(dir.path().join("deal.json"), ChronoDuration::hours(24));
        if let Some(d) = deal {
            store.store(&d).await;
        }
        // the reader runs ahead of the engine, so fills use each asset's
        // lowest replayed price to keep every buy affordable
        let quotes = QuoteBoard::default();
        for t in ticks.iter().filter(|t| valid_price(t.price)) {
            if quotes.get(&t.asset).map_or(true, |q| t.price < q) {
                quotes.mark(&t.asset, t.price);
            }
        }
        let mut venue = MockVenue::new(balance, quotes);
        if let Some((a, amt)) = holding {
            venue = venue.with_holding(a, amt);
        }
        let feed = ReplayFeed(ticks);
        let engine = TradeEngine::new(Arc::new(venue.clone()), Arc::new(feed), store, cfg());
        Harness { venue, engine, _dir: dir }
    }

    fn stats(asset: &str) -> AssetStats {
        AssetStats::new(asset, 10.0)
    }

    fn deal(asset: &str, price: f64) -> Deal {
        Deal { timestamp: Utc::now(), asset: asset.into(), amount: 5.0, price }
    }

    fn far() -> Instant {
        Instant::now() + Duration::from_secs(3600)
    }

    #[tokio::test]
    async fn buys_turn_up_and_sells_profitable_turn_down() {
        let prices = [10.0, 9.0, 8.0, 9.0, 10.0, 11.0, 10.0];
        let h = harness(1000.0, None, None, prices.iter().map(|p| ("BTC", *p)).collect()).await;

        let report = h.engine.trade(stats("BTC"), far()).await.unwrap();
        let orders = h.venue.orders();
        assert_eq!(orders.len(), 2);

        let expected = 1000.0 / 9.0 * 0.95;
        assert_eq!(orders[0].side, Side::Buy);
        assert!((orders[0].amount - expected).abs() < 1e-9);
        assert_eq!(orders[1], Order { side: Side::Sell, asset: "BTC".into(), amount: orders[0].amount });

        assert_eq!((report.buys, report.sells), (1, 1));
        assert_eq!(report.end, EndReason::StreamEnded);
        assert_eq!(report.initial_balance, 1000.0);
    }

    #[tokio::test]
    async fn deadline_stops_right_after_sell() {
        // two buy/sell cycles available, deadline already passed
        let prices = [10.0, 9.0, 10.0, 12.0, 11.0, 10.0, 9.0, 10.0, 12.0, 11.0];
        let h = harness(1000.0, None, None, prices.iter().map(|p| ("ETH", *p)).collect()).await;

        let report = h.engine.trade(stats("ETH"), Instant::now()).await.unwrap();
        assert_eq!(report.end, EndReason::Deadline);
        assert_eq!((report.buys, report.sells), (1, 1));
        assert_eq!(h.venue.orders().len(), 2);
    }

    #[tokio::test]
    async fn buy_persists_deal() {
        let prices = [10.0, 9.0, 10.0];
        let h = harness(500.0, None, None, prices.iter().map(|p| ("SOL", *p)).collect()).await;
        h.engine.trade(stats("SOL"), far()).await.unwrap();

        let d = h.engine.store.load().await.unwrap();
        assert_eq!(d.asset, "SOL");
        assert_eq!(d.price, 10.0);
        assert!((d.amount - 500.0 / 10.0 * 0.95).abs() < 1e-9);
    }

    #[tokio::test]
    async fn sell_clears_persisted_deal() {
        let prices = [10.0, 9.0, 10.0, 12.0, 11.0];
        let h = harness(500.0, None, None, prices.iter().map(|p| ("SOL", *p)).collect()).await;
        let report = h.engine.trade(stats("SOL"), far()).await.unwrap();

        assert_eq!((report.buys, report.sells), (1, 1));
        assert_eq!(h.engine.store.load().await, None);
        assert!(!h.engine.store.path().exists());
    }

    fn aged(asset: &str, price: f64, age_secs: i64) -> Tick {
        Tick { asset: asset.into(), price, observed_at: Utc::now() - ChronoDuration::seconds(age_secs) }
    }

    #[tokio::test]
    async fn stale_tick_neither_fills_window_nor_trades() {
        // with the 60s-old 5.0 in the window, 11,5,12 would be a turn up
        let ticks = vec![
            aged("BTC", 10.0, 0),
            aged("BTC", 11.0, 0),
            aged("BTC", 5.0, 60),
            aged("BTC", 12.0, 0),
        ];
        let h = timed_harness(1000.0, None, None, ticks).await;
        let report = h.engine.trade(stats("BTC"), far()).await.unwrap();

        assert!(h.venue.orders().is_empty());
        assert_eq!(report.end, EndReason::StreamEnded);
        assert_eq!((report.stats.min_seen, report.stats.max_seen), (10.0, 12.0));
    }

    #[tokio::test]
    async fn run_continues_after_stale_tick() {
        // 10,11,12,11,13 once the stale 5.0 is dropped: turn up at 13
        let ticks = vec![
            aged("BTC", 10.0, 0),
            aged("BTC", 11.0, 0),
            aged("BTC", 5.0, 60),
            aged("BTC", 12.0, 0),
            aged("BTC", 11.0, 0),
            aged("BTC", 13.0, 0),
        ];
        let h = timed_harness(1000.0, None, None, ticks).await;
        let report = h.engine.trade(stats("BTC"), far()).await.unwrap();

        let orders = h.venue.orders();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].side, Side::Buy);
        assert!((orders[0].amount - 1000.0 / 13.0 * 0.95).abs() < 1e-9);
        assert_eq!(report.buys, 1);
    }

    #[tokio::test]
    async fn unusable_prices_are_skipped() {
        // 10,9,10 once NaN, -3 and inf are dropped: one buy at 10
        let prices = [10.0, 9.0, f64::NAN, -3.0, f64::INFINITY, 10.0];
        let h = harness(1000.0, None, None, prices.iter().map(|p| ("BTC", *p)).collect()).await;
        let report = h.engine.trade(stats("BTC"), far()).await.unwrap();

        assert_eq!(report.buys, 1);
        assert_eq!(h.venue.orders()[0].amount, 1000.0 / 10.0 * 0.95);
        assert_eq!((report.stats.min_seen, report.stats.max_seen), (9.0, 10.0));
    }

    #[tokio::test]
    async fn same_asset_deal_without_price_sells_unconditionally() {
        let ticks = vec![("BTC", 80.0), ("BTC", 95.0), ("BTC", 90.0)];
        let h = harness(0.0, Some(("BTC", 5.0)), Some(deal("BTC", 0.0)), ticks).await;
        h.engine.trade(stats("BTC"), far()).await.unwrap();
        assert_eq!(h.venue.orders(), vec![Order { side: Side::Sell, asset: "BTC".into(), amount: 5.0 }]);
    }

    #[tokio::test]
    async fn recovered_deal_sells_above_entry() {
        let ticks = vec![("BTC", 100.0), ("BTC", 120.0), ("BTC", 110.0)];
        let h = harness(0.0, Some(("BTC", 5.0)), Some(deal("BTC", 100.0)), ticks).await;

        let report = h.engine.trade(stats("BTC"), far()).await.unwrap();
        assert_eq!(h.venue.orders(), vec![Order { side: Side::Sell, asset: "BTC".into(), amount: 5.0 }]);
        assert_eq!(report.sells, 1);
        assert_eq!(h.engine.store.load().await, None);
    }

    #[tokio::test]
    async fn recovered_deal_holds_below_entry() {
        let ticks = vec![("BTC", 80.0), ("BTC", 95.0), ("BTC", 90.0)];
        let h = harness(0.0, Some(("BTC", 5.0)), Some(deal("BTC", 100.0)), ticks).await;

        let report = h.engine.trade(stats("BTC"), far()).await.unwrap();
        assert!(h.venue.orders().is_empty());
        assert_eq!(report.sells, 0);
    }

    #[tokio::test]
    async fn deal_for_other_asset_sells_unconditionally() {
        let ticks = vec![("Y", 80.0), ("Y", 95.0), ("Y", 90.0)];
        let h = harness(0.0, Some(("Y", 5.0)), Some(deal("X", 100.0)), ticks).await;

        h.engine.trade(stats("Y"), far()).await.unwrap();
        assert_eq!(h.venue.orders(), vec![Order { side: Side::Sell, asset: "Y".into(), amount: 5.0 }]);
    }

    #[tokio::test]
    async fn holding_without_deal_sells_unconditionally() {
        let ticks = vec![("Y", 80.0), ("Y", 95.0), ("Y", 1.0)];
        let h = harness(0.0, Some(("Y", 2.0)), None, ticks).await;
        h.engine.trade(stats("Y"), far()).await.unwrap();
        assert_eq!(h.venue.orders().len(), 1);
    }

    #[tokio::test]
    async fn other_assets_are_discarded() {
        // interleaved ETH would form a turn on its own; must not trade
        let ticks = vec![("ETH", 10.0), ("BTC", 5.0), ("ETH", 9.0), ("BTC", 5.0), ("ETH", 10.0), ("BTC", 5.0)];
        let h = harness(1000.0, None, None, ticks).await;
        let report = h.engine.trade(stats("BTC"), far()).await.unwrap();
        assert!(h.venue.orders().is_empty());
        assert_eq!(report.buys, 0);
    }

    #[tokio::test]
    async fn order_failure_aborts_run() {
        let prices = [10.0, 9.0, 10.0, 11.0];
        let h = harness(1000.0, None, None, prices.iter().map(|p| ("BTC", *p)).collect()).await;
        h.venue.reject_orders();

        let err = h.engine.trade(stats("BTC"), far()).await.unwrap_err();
        assert!(matches!(err, BotError::Protocol(_)));
        assert_eq!(h.engine.store.load().await, None);
    }

    #[tokio::test]
    async fn stream_error_is_reported() {
        struct BrokenFeed;
        #[async_trait]
        impl TickFeed for BrokenFeed {
            async fn connect(&self) -> Result<TickStream> {
                let items: Vec<Result<Tick>> = vec![Err(BotError::Transport("connection reset".into()))];
                Ok(stream::iter(items).boxed())
            }
        }
        let dir = tempfile::tempdir().unwrap();
        let store = DealStore::new(dir.path().join("deal.json"), ChronoDuration::hours(24));
        let venue = MockVenue::new(100.0, QuoteBoard::default());
        let engine = TradeEngine::new(Arc::new(venue), Arc::new(BrokenFeed), store, cfg());

        assert!(matches!(engine.trade(stats("BTC"), far()).await, Err(BotError::Transport(_))));
    }

    #[tokio::test]
    async fn recoverable_stream_error_ends_run_cleanly() {
        struct StaleFeed;
        #[async_trait]
        impl TickFeed for StaleFeed {
            async fn connect(&self) -> Result<TickStream> {
                let items: Vec<Result<Tick>> = vec![Err(BotError::StaleData { asset: "BTC".into(), age_ms: 90_000 })];
                Ok(stream::iter(items).boxed())
            }
        }
        let dir = tempfile::tempdir().unwrap();
        let store = DealStore::new(dir.path().join("deal.json"), ChronoDuration::hours(24));
        let venue = MockVenue::new(100.0, QuoteBoard::default());
        let engine = TradeEngine::new(Arc::new(venue), Arc::new(StaleFeed), store, cfg());

        let report = engine.trade(stats("BTC"), far()).await.unwrap();
        assert_eq!(report.end, EndReason::StreamEnded);
        assert_eq!(report.final_balance, 100.0);
    }

    #[tokio::test]
    async fn frozen_extremes_keep_observed_range() {
        let prices = [10.0, 50.0, 1.0];
        let mut c = cfg();
        c.extremes = ExtremesPolicy::Frozen;
        let h = harness(0.0, None, None, prices.iter().map(|p| ("BTC", *p)).collect()).await;
        let engine = TradeEngine { cfg: c, ..h.engine };

        let mut run = Run {
            asset: stats("BTC"),
            account: AccountSnapshot::default(),
            position: PositionState::Flat,
            detector: MomentumDetector::new(Duration::from_secs(10)),
            buys: 0,
            sells: 0,
        };
        engine.track_extremes(&mut run, 50.0);
        assert_eq!(run.asset.max_seen, 10.0);

        let continuous = TradeEngine { cfg: cfg(), ..engine };
        continuous.track_extremes(&mut run, 50.0);
        assert_eq!(run.asset.max_seen, 50.0);
        continuous.track_extremes(&mut run, f64::NAN);
        continuous.track_extremes(&mut run, -1.0);
        assert_eq!((run.asset.min_seen, run.asset.max_seen), (10.0, 50.0));
    }
}
