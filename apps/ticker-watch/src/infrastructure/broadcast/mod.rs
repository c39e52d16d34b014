//! Price Broadcast Hub
//!
//! Fan-out of price updates using tokio broadcast channels, one channel per
//! ticker plus one carrying every ticker.
//!
//! # Architecture
//!
//! Every call to `subscribe` gets its own receivers, so each subscriber sees
//! every update (broadcast, not competing consumers). Receivers are bounded:
//! a subscriber that falls more than `capacity` updates behind skips the
//! oldest ones and continues with the newest.
//!
//! The latest price per ticker is kept next to its sender. A new
//! subscription is primed with it, and the snapshot is taken under the same
//! lock that `publish` uses, so an update is delivered either through the
//! snapshot or through the receiver, never both and never neither.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};

use futures::Stream;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::StreamMap;

use crate::application::ports::{PriceBroadcast, PriceStream};
use crate::domain::ticker::{PriceUpdate, TickerSymbol};
use crate::infrastructure::config::BroadcastSettings;
use crate::infrastructure::metrics;

// =============================================================================
// Price Hub
// =============================================================================

#[derive(Debug)]
struct TickerChannel {
    tx: broadcast::Sender<PriceUpdate>,
    latest: Option<PriceUpdate>,
}

impl TickerChannel {
    fn new(capacity: usize) -> Self {
        Self {
            tx: broadcast::channel(capacity).0,
            latest: None,
        }
    }
}

/// Hub statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PriceHubStats {
    /// Tickers with a channel.
    pub channels: usize,
    /// Tickers with a known latest price.
    pub primed: usize,
    /// Active subscriptions.
    pub subscribers: usize,
}

/// Per-ticker broadcast channels with latest-value priming.
///
/// # Example
///
/// ```rust
/// use rust_decimal::Decimal;
/// use ticker_watch::application::ports::PriceBroadcast;
/// use ticker_watch::domain::ticker::{PriceUpdate, TickerSymbol};
/// use ticker_watch::infrastructure::broadcast::PriceHub;
///
/// let hub = PriceHub::with_capacity(16);
/// let btc = TickerSymbol::parse("btcusdt").unwrap();
///
/// let _stream = hub.subscribe(&[btc.clone()]);
/// assert_eq!(hub.publish(PriceUpdate::now(btc, Decimal::ONE)), 1);
/// assert_eq!(hub.subscriber_count(), 1);
/// ```
#[derive(Debug)]
pub struct PriceHub {
    capacity: usize,
    channels: RwLock<HashMap<TickerSymbol, TickerChannel>>,
    all_tx: broadcast::Sender<PriceUpdate>,
    subscribers: Arc<AtomicUsize>,
}

impl PriceHub {
    /// Create a hub from settings.
    #[must_use]
    pub fn new(settings: &BroadcastSettings) -> Self {
        Self::with_capacity(settings.price_channel_capacity)
    }

    /// Create a hub whose receivers buffer `capacity` updates.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            channels: RwLock::new(HashMap::new()),
            all_tx: broadcast::channel(capacity).0,
            subscribers: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Latest known price for `ticker`.
    #[must_use]
    pub fn latest(&self, ticker: &TickerSymbol) -> Option<PriceUpdate> {
        self.channels
            .read()
            .get(ticker)
            .and_then(|channel| channel.latest.clone())
    }

    /// Number of active subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.load(Ordering::Acquire)
    }

    /// Get hub statistics.
    #[must_use]
    pub fn stats(&self) -> PriceHubStats {
        let channels = self.channels.read();
        PriceHubStats {
            channels: channels.len(),
            primed: channels.values().filter(|c| c.latest.is_some()).count(),
            subscribers: self.subscriber_count(),
        }
    }

    fn register(
        &self,
        tickers: &[TickerSymbol],
    ) -> (Vec<PriceUpdate>, Vec<broadcast::Receiver<PriceUpdate>>) {
        let mut channels = self.channels.write();
        channels.retain(|_, channel| channel.tx.receiver_count() > 0 || channel.latest.is_some());

        if tickers.is_empty() {
            let mut snapshot: Vec<PriceUpdate> = channels
                .values()
                .filter_map(|channel| channel.latest.clone())
                .collect();
            snapshot.sort_by(|a, b| a.ticker.cmp(&b.ticker));
            return (snapshot, vec![self.all_tx.subscribe()]);
        }

        let mut snapshot = Vec::with_capacity(tickers.len());
        let mut receivers = Vec::with_capacity(tickers.len());
        for ticker in tickers {
            let channel = channels
                .entry(ticker.clone())
                .or_insert_with(|| TickerChannel::new(self.capacity));
            snapshot.extend(channel.latest.clone());
            receivers.push(channel.tx.subscribe());
        }
        (snapshot, receivers)
    }
}

impl Default for PriceHub {
    fn default() -> Self {
        Self::new(&BroadcastSettings::default())
    }
}

impl PriceBroadcast for PriceHub {
    fn publish(&self, update: PriceUpdate) -> usize {
        let mut channels = self.channels.write();
        let channel = channels
            .entry(update.ticker.clone())
            .or_insert_with(|| TickerChannel::new(self.capacity));
        channel.latest = Some(update.clone());

        let direct = channel.tx.send(update.clone()).unwrap_or(0);
        let all = self.all_tx.send(update).unwrap_or(0);
        direct + all
    }

    fn subscribe(&self, tickers: &[TickerSymbol]) -> PriceStream {
        let (snapshot, receivers) = self.register(tickers);

        let mut live = StreamMap::new();
        for (index, rx) in receivers.into_iter().enumerate() {
            live.insert(index, BroadcastStream::new(rx));
        }
        let live = live.filter_map(|(_, item)| match item {
            Ok(update) => Some(update),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Price subscriber lagging, skipped oldest updates");
                metrics::record_messages_dropped(skipped);
                None
            }
        });

        let mut delivered: HashMap<TickerSymbol, Decimal> = HashMap::new();
        let stream = tokio_stream::iter(snapshot)
            .chain(live)
            .chain(tokio_stream::pending())
            .filter_map(move |update| {
                if delivered.get(&update.ticker) == Some(&update.price) {
                    return None;
                }
                delivered.insert(update.ticker.clone(), update.price);
                Some(update)
            });

        let count = self.subscribers.fetch_add(1, Ordering::AcqRel) + 1;
        metrics::set_stream_subscribers(count);

        Box::pin(TrackedStream {
            inner: Box::pin(stream),
            subscribers: Arc::clone(&self.subscribers),
        })
    }

    fn retire(&self, ticker: &TickerSymbol) {
        let mut channels = self.channels.write();
        let idle = match channels.get_mut(ticker) {
            Some(channel) => {
                channel.latest = None;
                channel.tx.receiver_count() == 0
            }
            None => false,
        };
        if idle {
            channels.remove(ticker);
        }
    }
}

// =============================================================================
// Subscription Tracking
// =============================================================================

/// Stream wrapper that keeps the subscriber count accurate.
struct TrackedStream {
    inner: PriceStream,
    subscribers: Arc<AtomicUsize>,
}

impl Stream for TrackedStream {
    type Item = PriceUpdate;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().inner.as_mut().poll_next(cx)
    }
}

impl Drop for TrackedStream {
    fn drop(&mut self) {
        let count = self
            .subscribers
            .fetch_sub(1, Ordering::AcqRel)
            .saturating_sub(1);
        metrics::set_stream_subscribers(count);
    }
}

/// Shared hub reference.
pub type SharedPriceHub = Arc<PriceHub>;

// =============================================================================
// Tests
// =============================================================================
