//! Live feed supervision.
//!
//! Each feed runs as a background task that reconnects forever on disconnect
//! with a fixed delay, until the shutdown signal flips. Quotes land in a
//! last-value store keyed by instrument; order updates are forwarded to the
//! engine's reconciliation channel.

use crate::gateway::BrokerGateway;
use crate::types::{EngineEvent, OrderUpdate, Quote};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Delay between reconnect attempts.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Last-value quote store: one writer (the feed task), many readers.
#[derive(Clone, Default)]
pub struct QuoteStore(Arc<RwLock<HashMap<String, Quote>>>);

impl QuoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, quote: Quote) {
        self.0.write().await.insert(quote.instrument.clone(), quote);
    }

    pub async fn latest(&self, instrument: &str) -> Option<Quote> {
        self.0.read().await.get(instrument).cloned()
    }
}

/// True once the shutdown flag is set.
fn is_shutdown(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow()
}

/// Wait out the reconnect delay, returning early (true) on shutdown.
async fn backoff(shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(RECONNECT_DELAY) => false,
        _ = shutdown.changed() => is_shutdown(shutdown),
    }
}

/// Supervise the live quote feed, writing every tick into `store`.
pub fn spawn_quote_feed(
    gateway: Arc<dyn BrokerGateway>,
    instruments: Vec<(String, String)>,
    store: QuoteStore,
    events: broadcast::Sender<EngineEvent>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if is_shutdown(&shutdown) {
                return;
            }

            let (tx, mut rx) = mpsc::channel::<Quote>(256);
            let conn = gateway.run_quote_feed(instruments.clone(), tx, shutdown.clone());
            tokio::pin!(conn);

            loop {
                tokio::select! {
                    result = &mut conn => {
                        match result {
                            Ok(()) => {
                                info!("quote feed stopped");
                                return;
                            }
                            Err(e) => {
                                warn!(error = %e, "quote feed down, reconnecting");
                                let _ = events.send(EngineEvent::FeedDown {
                                    feed: "quotes".to_string(),
                                });
                                break;
                            }
                        }
                    }
                    Some(quote) = rx.recv() => {
                        store.insert(quote).await;
                    }
                }
            }

            if backoff(&mut shutdown).await {
                return;
            }
        }
    })
}

/// Supervise the order-update feed, forwarding events into `updates`.
pub fn spawn_order_update_feed(
    gateway: Arc<dyn BrokerGateway>,
    updates: mpsc::Sender<OrderUpdate>,
    events: broadcast::Sender<EngineEvent>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if is_shutdown(&shutdown) {
                return;
            }

            match gateway
                .run_order_update_feed(updates.clone(), shutdown.clone())
                .await
            {
                Ok(()) => {
                    info!("order update feed stopped");
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "order update feed down, reconnecting");
                    let _ = events.send(EngineEvent::FeedDown {
                        feed: "order_updates".to_string(),
                    });
                }
            }

            if backoff(&mut shutdown).await {
                return;
            }
        }
    })
}
