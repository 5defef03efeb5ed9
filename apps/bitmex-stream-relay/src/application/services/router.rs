//! Fan-out Router
//!
//! Moves one decoded trade event to every connected subscriber interested
//! in its symbol. The event is serialized once and the shared frame is
//! queued on each connection without awaiting any socket.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::application::services::SymbolRegistry;
use crate::domain::connection::{ConnectionRegistry, DeliveryError};
use crate::domain::streaming::TradeEvent;
use crate::domain::subscription::SubscriptionIndex;
use crate::infrastructure::metrics::{self, DeliveryOutcome};

/// Per-event delivery counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Subscribers interested in the symbol.
    pub matched: usize,
    /// Frames queued on a live connection.
    pub delivered: usize,
    /// Interested subscribers without a live connection.
    pub offline: usize,
    /// Frames dropped on a full queue or closed connection.
    pub failed: usize,
}

/// Result of routing one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// The symbol was resolved and delivery attempted.
    Routed(DeliveryReport),
    /// The symbol stayed unknown after a refresh; the event was dropped.
    UnknownSymbol,
}

/// Routes trade events from the feed to subscriber connections.
pub struct FanoutRouter {
    registry: Arc<SymbolRegistry>,
    index: Arc<SubscriptionIndex>,
    connections: Arc<ConnectionRegistry>,
}

impl FanoutRouter {
    /// Create a router over the shared containers.
    pub const fn new(
        registry: Arc<SymbolRegistry>,
        index: Arc<SubscriptionIndex>,
        connections: Arc<ConnectionRegistry>,
    ) -> Self {
        Self {
            registry,
            index,
            connections,
        }
    }

    /// Route one event.
    ///
    /// An unknown symbol triggers one registry refresh before the event is
    /// dropped. A failed delivery never stops delivery to the others.
    pub async fn route(&self, event: &TradeEvent) -> RouteOutcome {
        let started = Instant::now();

        let subscribers = match self.index.get(&event.symbol) {
            Some(subscribers) => subscribers,
            None => {
                if let Err(e) = self.registry.refresh().await {
                    tracing::warn!(symbol = %event.symbol, error = %e, "Refresh for unknown trade symbol failed");
                }
                let Some(subscribers) = self.index.get(&event.symbol) else {
                    tracing::warn!(symbol = %event.symbol, "Dropping trade for unknown symbol");
                    metrics::record_unknown_symbol();
                    return RouteOutcome::UnknownSymbol;
                };
                subscribers
            }
        };

        let mut report = DeliveryReport {
            matched: subscribers.len(),
            ..DeliveryReport::default()
        };

        let live: Vec<_> = subscribers
            .iter()
            .filter_map(|subscriber| {
                let connection = self.connections.lookup(*subscriber);
                if connection.is_none() {
                    report.offline += 1;
                }
                connection.map(|c| (*subscriber, c))
            })
            .collect();

        if !live.is_empty() {
            match event.to_frame() {
                Ok(frame) => {
                    let mut dropped = 0;
                    let mut closed = 0;
                    for (subscriber, connection) in live {
                        match connection.try_deliver(Arc::clone(&frame)) {
                            Ok(()) => report.delivered += 1,
                            Err(e) => {
                                match e {
                                    DeliveryError::QueueFull => dropped += 1,
                                    DeliveryError::Closed => closed += 1,
                                }
                                tracing::debug!(
                                    subscriber = %subscriber,
                                    connection = %connection.id(),
                                    error = %e,
                                    "Delivery failed"
                                );
                            }
                        }
                    }
                    report.failed = dropped + closed;
                    metrics::record_deliveries(DeliveryOutcome::Dropped, dropped as u64);
                    metrics::record_deliveries(DeliveryOutcome::Closed, closed as u64);
                }
                Err(e) => {
                    tracing::error!(symbol = %event.symbol, error = %e, "Failed to serialize trade");
                    report.failed = live.len();
                }
            }
        }

        metrics::record_deliveries(DeliveryOutcome::Delivered, report.delivered as u64);
        metrics::record_trade_routed();
        metrics::record_routing_duration(started.elapsed());

        tracing::trace!(
            symbol = %event.symbol,
            matched = report.matched,
            delivered = report.delivered,
            offline = report.offline,
            failed = report.failed,
            "Routed trade"
        );

        RouteOutcome::Routed(report)
    }

    /// Route every batch from the feed until the channel closes or `cancel`
    /// fires. Returns the number of events routed.
    pub async fn run(
        &self,
        mut trades: mpsc::Receiver<Vec<TradeEvent>>,
        cancel: CancellationToken,
    ) -> u64 {
        let mut routed = 0_u64;
        loop {
            let batch = tokio::select! {
                () = cancel.cancelled() => break,
                batch = trades.recv() => batch,
            };
            let Some(batch) = batch else {
                tracing::info!("Trade channel closed");
                break;
            };
            for event in &batch {
                if let RouteOutcome::Routed(_) = self.route(event).await {
                    routed += 1;
                }
            }
        }
        tracing::info!(routed, "Dispatcher stopped");
        routed
    }
}

impl std::fmt::Debug for FanoutRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutRouter").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::*;
    use crate::application::ports::{
        CatalogError, CatalogSource, FeedControl, FeedControlError,
    };
    use crate::domain::connection::SubscriberConnection;
    use crate::domain::subscriber::SubscriberId;
    use crate::domain::symbols::{Symbol, SymbolSet};

    struct CountingCatalog {
        symbols: Vec<Symbol>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CatalogSource for CountingCatalog {
        async fn fetch_symbols(&self) -> Result<Vec<Symbol>, CatalogError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.symbols.clone())
        }
    }

    struct IgnoreFeed;

    #[async_trait]
    impl FeedControl for IgnoreFeed {
        async fn subscribe(&self, _symbols: &[Symbol]) -> Result<(), FeedControlError> {
            Ok(())
        }
    }

    struct Fixture {
        router: FanoutRouter,
        index: Arc<SubscriptionIndex>,
        connections: Arc<ConnectionRegistry>,
        catalog: Arc<CountingCatalog>,
    }

    fn fixture(catalog_symbols: &[&str]) -> Fixture {
        let index = Arc::new(SubscriptionIndex::new());
        let connections = Arc::new(ConnectionRegistry::new());
        let catalog = Arc::new(CountingCatalog {
            symbols: catalog_symbols.iter().map(|s| (*s).to_string()).collect(),
            calls: AtomicUsize::new(0),
        });
        let registry = Arc::new(SymbolRegistry::new(
            Arc::new(SymbolSet::new()),
            Arc::clone(&index),
            Arc::clone(&catalog) as Arc<dyn CatalogSource>,
            Arc::new(IgnoreFeed),
        ));
        Fixture {
            router: FanoutRouter::new(registry, Arc::clone(&index), Arc::clone(&connections)),
            index,
            connections,
            catalog,
        }
    }

    fn trade(symbol: &str) -> TradeEvent {
        TradeEvent::new(symbol, Decimal::new(50_000, 0), Utc::now())
    }

    #[tokio::test]
    async fn unknown_symbol_refreshes_once_then_drops() {
        let fx = fixture(&["XBTUSD"]);

        let outcome = fx.router.route(&trade("DOGEUSD")).await;

        assert_eq!(outcome, RouteOutcome::UnknownSymbol);
        assert_eq!(fx.catalog.calls.load(Ordering::SeqCst), 1);
        assert!(fx.index.is_known("XBTUSD"));
    }

    #[tokio::test]
    async fn symbol_discovered_by_refresh_is_routed() {
        let fx = fixture(&["XBTUSD"]);

        let outcome = fx.router.route(&trade("XBTUSD")).await;

        assert_eq!(outcome, RouteOutcome::Routed(DeliveryReport::default()));
    }

    #[tokio::test]
    async fn offline_and_full_subscribers_do_not_block_others() {
        let fx = fixture(&[]);
        fx.index.seed("XBTUSD");
        let (online, offline, full) = (
            SubscriberId::random(),
            SubscriberId::random(),
            SubscriberId::random(),
        );
        for id in [online, offline, full] {
            fx.index.append("XBTUSD", id);
        }
        let (online_conn, mut online_rx) = SubscriberConnection::channel(8);
        let (full_conn, _full_rx) = SubscriberConnection::channel(1);
        full_conn.try_deliver("backlog".into()).unwrap();
        fx.connections.bind(online, online_conn);
        fx.connections.bind(full, full_conn);

        let outcome = fx.router.route(&trade("XBTUSD")).await;

        assert_eq!(
            outcome,
            RouteOutcome::Routed(DeliveryReport {
                matched: 3,
                delivered: 1,
                offline: 1,
                failed: 1,
            })
        );
        let frame = online_rx.try_recv().unwrap();
        assert!(frame.contains("\"symbol\":\"XBTUSD\""));
    }

    #[tokio::test]
    async fn same_frame_is_shared_across_connections() {
        let fx = fixture(&[]);
        fx.index.seed("ETHUSD");
        let (a, b) = (SubscriberId::random(), SubscriberId::random());
        fx.index.append("ETHUSD", a);
        fx.index.append("ETHUSD", b);
        let (conn_a, mut rx_a) = SubscriberConnection::channel(4);
        let (conn_b, mut rx_b) = SubscriberConnection::channel(4);
        fx.connections.bind(a, conn_a);
        fx.connections.bind(b, conn_b);

        fx.router.route(&trade("ETHUSD")).await;

        let (frame_a, frame_b) = (rx_a.try_recv().unwrap(), rx_b.try_recv().unwrap());
        assert!(Arc::ptr_eq(&frame_a, &frame_b));
    }

    #[tokio::test]
    async fn dispatcher_routes_batches_until_channel_closes() {
        let fx = fixture(&["XBTUSD"]);
        let subscriber = SubscriberId::random();
        fx.index.seed("XBTUSD");
        fx.index.append("XBTUSD", subscriber);
        let (conn, mut rx) = SubscriberConnection::channel(8);
        fx.connections.bind(subscriber, conn);

        let (tx, trades) = mpsc::channel(4);
        tx.send(vec![trade("XBTUSD"), trade("XBTUSD")]).await.unwrap();
        tx.send(vec![trade("NOPE")]).await.unwrap();
        drop(tx);

        let routed = fx.router.run(trades, CancellationToken::new()).await;

        assert_eq!(routed, 2);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn dispatcher_stops_on_cancel() {
        let fx = fixture(&[]);
        let (_tx, trades) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert_eq!(fx.router.run(trades, cancel).await, 0);
    }
}
