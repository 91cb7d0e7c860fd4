//! Exchange collectors: one long-lived streaming client per venue, sharing a
//! generic connection/tick skeleton and differing only in the
//! [`VenueAdapter`] each plugs in.

pub mod binance;
pub mod bitfinex;
pub mod coinbase;
pub mod liquid;
pub mod poloniex;

pub use binance::BinanceAdapter;
pub use bitfinex::BitfinexAdapter;
pub use coinbase::CoinbaseAdapter;
pub use liquid::LiquidAdapter;
pub use poloniex::PoloniexAdapter;

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Instant};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{connect_async_with_config, tungstenite::Message, tungstenite::protocol::WebSocketConfig};
use tracing::{debug, error, info, warn};

use crate::model::{PriceLevel, QuotePriceData, QuotePriceEvidence};

/// Interior running aggregate for one collector, reset to identity values
/// every time (and only when) a snapshot is emitted.
#[derive(Debug, Clone)]
pub struct AggregateState {
    pub bid: f64,
    pub ask: f64,
    pub bid_qty: f64,
    pub ask_qty: f64,
    pub low_bid: f64,
    pub high_bid: f64,
    pub low_ask: f64,
    pub high_ask: f64,
    pub bid_volume: i64,
    pub ask_volume: i64,
    pub evidence: Vec<QuotePriceEvidence>,
}

impl Default for AggregateState {
    fn default() -> Self {
        Self {
            bid: 0.0,
            ask: 0.0,
            bid_qty: 0.0,
            ask_qty: 0.0,
            low_bid: f64::MAX,
            high_bid: 0.0,
            low_ask: f64::MAX,
            high_ask: 0.0,
            bid_volume: 0,
            ask_volume: 0,
            evidence: Vec::new(),
        }
    }
}

impl AggregateState {
    fn has_activity(&self) -> bool {
        self.bid_qty > 0.0 || self.ask_qty > 0.0
    }

    fn apply_bid(&mut self, price: f64, qty: f64) {
        self.bid += price;
        self.bid_qty += qty;
        self.low_bid = self.low_bid.min(price);
        self.high_bid = self.high_bid.max(price);
        self.bid_volume += 1;
    }

    fn apply_ask(&mut self, price: f64, qty: f64) {
        self.ask += price;
        self.ask_qty += qty;
        self.low_ask = self.low_ask.min(price);
        self.high_ask = self.high_ask.max(price);
        self.ask_volume += 1;
    }

    fn snapshot(&self, uid: &str, timestamp: i64) -> QuotePriceData {
        QuotePriceData {
            exchange_uid: uid.to_string(),
            timestamp,
            bid: self.bid,
            ask: self.ask,
            bid_qty: self.bid_qty,
            ask_qty: self.ask_qty,
            bid_volume: self.bid_volume,
            ask_volume: self.ask_volume,
            low_bid: self.low_bid,
            high_bid: self.high_bid,
            low_ask: self.low_ask,
            high_ask: self.high_ask,
            evidence: self.evidence.clone(),
        }
    }
}

/// Parses a `[price_str, qty_str]` pair into floats, tolerating malformed
/// numeric fields by treating them as zero (which the qty-zero filter then
/// drops harmlessly).
pub fn parse_level(level: &PriceLevel) -> (f64, f64) {
    let price = level[0].parse::<f64>().unwrap_or(0.0);
    let qty = level[1].parse::<f64>().unwrap_or(0.0);
    (price, qty)
}

/// Per-venue hook injected into [`GenericCollector`]. The base owns the
/// connection, ticker, interior aggregate state, and teardown; the adapter
/// owns frame parsing.
pub trait VenueAdapter: Send {
    /// Stable identifier included in every emitted snapshot and evidence row.
    fn uid(&self) -> &'static str;

    /// Websocket endpoint to dial.
    fn endpoint(&self) -> String;

    /// Frames to write immediately after the connection is established,
    /// before any messages are read.
    fn initial_frames(&self) -> Vec<String> {
        Vec::new()
    }

    /// Interval at which to send an application-level keepalive frame, for
    /// venues that require one in addition to protocol-level pong replies.
    fn keepalive_interval(&self) -> Option<Duration> {
        None
    }

    /// The keepalive frame itself, sent on `keepalive_interval`'s cadence.
    fn keepalive_frame(&self) -> Option<String> {
        None
    }

    /// Parses one text frame, folding any accepted rows into `state`.
    /// Returns follow-up frames the base should write back (e.g. a
    /// subscription triggered by a handshake event).
    fn handle_message(&mut self, raw: &str, state: &mut AggregateState) -> Vec<String>;
}

/// Drives one venue's connection: dial, subscribe, read messages, tick once
/// a second, and emit a [`QuotePriceData`] snapshot on the shared publication
/// channel whenever the tick window saw any activity.
pub struct GenericCollector<A: VenueAdapter> {
    adapter: A,
    publication: mpsc::Sender<QuotePriceData>,
    tick: Duration,
    shutdown: watch::Receiver<bool>,
}

impl<A: VenueAdapter> GenericCollector<A> {
    pub fn new(
        adapter: A,
        publication: mpsc::Sender<QuotePriceData>,
        tick: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            adapter,
            publication,
            tick,
            shutdown,
        }
    }

    /// Runs until the shutdown signal fires, reconnecting with exponential
    /// backoff and jitter whenever the connection drops.
    pub async fn run(mut self) {
        let mut backoff = Duration::from_secs(1);
        let max_backoff = Duration::from_secs(30);

        loop {
            if *self.shutdown.borrow() {
                return;
            }

            match self.connect_and_stream().await {
                Ok(()) => {
                    info!(venue = self.adapter.uid(), "connection closed gracefully");
                    backoff = Duration::from_secs(1);
                }
                Err(err) => {
                    error!(venue = self.adapter.uid(), error = %err, "connection failed");
                    let jitter: f64 = rand::thread_rng().gen_range(0.5..1.5);
                    let sleep_for = backoff.mul_f64(jitter);
                    warn!(venue = self.adapter.uid(), delay = ?sleep_for, "reconnecting after backoff");

                    tokio::select! {
                        _ = tokio::time::sleep(sleep_for) => {}
                        _ = self.shutdown.changed() => {
                            if *self.shutdown.borrow() {
                                return;
                            }
                        }
                    }
                    backoff = (backoff * 2).min(max_backoff);
                }
            }

            if *self.shutdown.borrow() {
                return;
            }
        }
    }

    async fn connect_and_stream(&mut self) -> anyhow::Result<()> {
        let endpoint = self.adapter.endpoint();
        debug!(venue = self.adapter.uid(), %endpoint, "dialing");

        let request = endpoint.into_client_request()?;
        let ws_config = WebSocketConfig {
            max_message_size: Some(16 * 1024 * 1024),
            max_frame_size: Some(4 * 1024 * 1024),
            accept_unmasked_frames: false,
            ..Default::default()
        };
        let (ws_stream, _response) = connect_async_with_config(request, Some(ws_config), false).await?;
        let (mut write, mut read) = ws_stream.split();

        for frame in self.adapter.initial_frames() {
            write.send(Message::Text(frame)).await?;
        }

        let mut ticker = interval(self.tick);
        ticker.tick().await; // consume the immediate first tick

        let mut state = AggregateState::default();
        let mut keepalive = self.adapter.keepalive_interval().map(interval);

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        return Ok(());
                    }
                }
                _ = ticker.tick() => {
                    if state.has_activity() {
                        let snapshot = state.snapshot(self.adapter.uid(), now_unix());
                        if self.publication.send(snapshot).await.is_err() {
                            return Ok(()); // receiver gone, nothing left to do
                        }
                        state = AggregateState::default();
                    }
                }
                _ = async {
                    match keepalive.as_mut() {
                        Some(k) => { k.tick().await; }
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    if let Some(frame) = self.adapter.keepalive_frame() {
                        write.send(Message::Text(frame)).await?;
                    }
                }
                message = read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            let follow_ups = self.adapter.handle_message(&text, &mut state);
                            for frame in follow_ups {
                                write.send(Message::Text(frame)).await?;
                            }
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            write.send(Message::Pong(payload)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            info!(venue = self.adapter.uid(), ?frame, "closed by server");
                            return Ok(());
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => return Err(err.into()),
                        None => return Ok(()),
                    }
                }
            }
        }
    }
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activity_flag_requires_nonzero_quantity() {
        let mut state = AggregateState::default();
        assert!(!state.has_activity());
        state.apply_bid(100.0, 1.0);
        assert!(state.has_activity());
    }

    #[test]
    fn zero_quantity_rows_are_never_applied_by_the_base() {
        // The base never calls apply_bid/apply_ask itself; adapters must
        // filter before calling. This test documents that a fresh state
        // with no applied rows reports no activity, which is what backs
        // "no emit without activity".
        let state = AggregateState::default();
        assert!(!state.has_activity());
    }

    #[test]
    fn snapshot_carries_uid_and_resets_are_external() {
        let mut state = AggregateState::default();
        state.apply_bid(100.0, 1.0);
        state.apply_ask(101.0, 2.0);
        let snap = state.snapshot("binance", 42);
        assert_eq!(snap.exchange_uid, "binance");
        assert_eq!(snap.bid, 100.0);
        assert_eq!(snap.ask, 101.0);
        assert_eq!(snap.bid_volume, 1);
        assert_eq!(snap.ask_volume, 1);
    }

    #[test]
    fn parse_level_defaults_malformed_numbers_to_zero() {
        let level: PriceLevel = ["not-a-number".to_string(), "2.5".to_string()];
        let (price, qty) = parse_level(&level);
        assert_eq!(price, 0.0);
        assert_eq!(qty, 2.5);
    }
}
