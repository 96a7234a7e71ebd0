//! Contract event watcher.
//!
//! One live subscription per [`EventKind`], each forwarded by its own
//! task into a bounded queue. A full queue holds the forwarder back
//! instead of buffering without limit.
//!
//! ## Catch-up
//!
//! The settlement contract emits `Initializing` in its deployment
//! transaction, which may be mined before the subscription is in place.
//! A historical query from block 0 runs next to the live forwarder; both
//! pass a shared seen-set keyed by `(tx_hash, log_index)`, so the event is
//! delivered once whichever path sees it first.
//!
//! ## Usage
//!
//! ```ignore
//! let mut events = EventsChan::initialize(client, ms, vpc, &WatcherConfig::default(), span).await?;
//! let initialized = events.ms_initialized.recv_timeout(Duration::from_secs(5)).await?;
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::task::JoinSet;
use tracing::{Instrument, Span};

use dst_node_core::{Address, ContractKind, Hash256};

use crate::client::{ChainClient, LogFilter, LogSubscription};
use crate::error::{ChainError, Result};
use crate::events::{
    EventKind, EventLog, FromEvent, MscClosed, MscClosing, MscInitialized, MscInitializing,
    MscStateRegistered, MscStateRegistering, VpcClosed, VpcClosing,
};

/// Queue capacities of the event streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Capacity for `Initializing` and `Initialized`.
    pub initializing_capacity: usize,
    /// Capacity for all other kinds.
    pub event_capacity: usize,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            initializing_capacity: 2,
            event_capacity: 10,
        }
    }
}

/// Typed events of one kind.
#[derive(Debug)]
pub struct EventStream<T> {
    kind: EventKind,
    rx: mpsc::Receiver<Result<T>>,
}

impl<T: FromEvent> EventStream<T> {
    fn channel(capacity: usize) -> (mpsc::Sender<Result<T>>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self { kind: T::KIND, rx })
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Wait for the next event or subscription error.
    pub async fn recv(&mut self) -> Result<T> {
        self.rx
            .recv()
            .await
            .unwrap_or(Err(ChainError::EventStreamClosed(self.kind)))
    }

    /// Like [`recv`](Self::recv), giving up after `timeout`.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Result<T> {
        let kind = self.kind;
        tokio::time::timeout(timeout, self.recv())
            .await
            .map_err(|_| ChainError::EventTimeout(kind))?
    }

    /// An already queued event, if any.
    pub fn try_recv(&mut self) -> Option<Result<T>> {
        match self.rx.try_recv() {
            Ok(item) => Some(item),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(ChainError::EventStreamClosed(self.kind))),
        }
    }
}

/// Logs already delivered, shared by the live and catch-up paths.
#[derive(Debug, Clone, Default)]
struct SeenLogs(Arc<Mutex<HashSet<(Hash256, u64)>>>);

impl SeenLogs {
    /// Record `log`; false if it was recorded before.
    fn first_sighting(&self, log: &EventLog) -> bool {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((log.tx_hash, log.log_index))
    }
}

/// Event streams of one channel's contracts.
///
/// Dropping it stops every forwarder and ends the subscriptions.
#[derive(Debug)]
pub struct EventsChan {
    pub ms_initializing: EventStream<MscInitializing>,
    pub ms_initialized: EventStream<MscInitialized>,
    pub ms_state_registering: EventStream<MscStateRegistering>,
    pub ms_state_registered: EventStream<MscStateRegistered>,
    pub ms_closing: EventStream<MscClosing>,
    pub ms_closed: EventStream<MscClosed>,
    pub vpc_closing: EventStream<VpcClosing>,
    pub vpc_closed: EventStream<VpcClosed>,
    tasks: JoinSet<()>,
}

impl EventsChan {
    /// Subscribe to every watched kind and start forwarding.
    ///
    /// Fails if any subscription cannot be set up; subscriptions made so
    /// far are dropped. A failing catch-up query is only logged.
    pub async fn initialize(
        client: Arc<dyn ChainClient>,
        ms_contract: Address,
        vpc: Address,
        config: &WatcherConfig,
        span: Span,
    ) -> Result<Self> {
        let filter = move |kind: EventKind| LogFilter {
            address: match kind.contract() {
                ContractKind::Vpc => vpc,
                _ => ms_contract,
            },
            kind,
        };

        let subscriptions =
            futures::future::try_join_all(EventKind::ALL.into_iter().map(|kind| {
                let client = client.clone();
                async move {
                    client
                        .subscribe_logs(filter(kind))
                        .await
                        .map(|sub| (kind, sub))
                        .map_err(|err| ChainError::Subscription(format!("watch {kind}: {err}")))
                }
            }))
            .await?;
        let mut subscriptions: HashMap<_, _> = subscriptions.into_iter().collect();

        let mut tasks = JoinSet::new();
        let seen = SeenLogs::default();
        let mut watch = Watch {
            subscriptions: &mut subscriptions,
            tasks: &mut tasks,
            span: &span,
        };

        let (initializing_tx, ms_initializing) =
            watch.stream::<MscInitializing>(config.initializing_capacity, Some(seen.clone()))?;
        let (_, ms_initialized) = watch.stream::<MscInitialized>(config.initializing_capacity, None)?;
        let (_, ms_state_registering) = watch.stream::<MscStateRegistering>(config.event_capacity, None)?;
        let (_, ms_state_registered) = watch.stream::<MscStateRegistered>(config.event_capacity, None)?;
        let (_, ms_closing) = watch.stream::<MscClosing>(config.event_capacity, None)?;
        let (_, ms_closed) = watch.stream::<MscClosed>(config.event_capacity, None)?;
        let (_, vpc_closing) = watch.stream::<VpcClosing>(config.event_capacity, None)?;
        let (_, vpc_closed) = watch.stream::<VpcClosed>(config.event_capacity, None)?;

        let catch_up = catch_up(
            client,
            filter(EventKind::MscInitializing),
            initializing_tx,
            seen,
        );
        tasks.spawn(catch_up.instrument(span.clone()));
        tracing::debug!(parent: &span, %ms_contract, %vpc, "event watcher started");

        Ok(Self {
            ms_initializing,
            ms_initialized,
            ms_state_registering,
            ms_state_registered,
            ms_closing,
            ms_closed,
            vpc_closing,
            vpc_closed,
            tasks,
        })
    }

    /// Stop all forwarders.
    pub fn shutdown(&mut self) {
        self.tasks.abort_all();
    }
}

struct Watch<'a> {
    subscriptions: &'a mut HashMap<EventKind, LogSubscription>,
    tasks: &'a mut JoinSet<()>,
    span: &'a Span,
}

impl Watch<'_> {
    fn stream<T: FromEvent>(
        &mut self,
        capacity: usize,
        seen: Option<SeenLogs>,
    ) -> Result<(mpsc::Sender<Result<T>>, EventStream<T>)> {
        let subscription = self
            .subscriptions
            .remove(&T::KIND)
            .ok_or_else(|| ChainError::Subscription(format!("no subscription for {}", T::KIND)))?;
        let (tx, stream) = EventStream::channel(capacity);
        self.tasks
            .spawn(forward(subscription, tx.clone(), seen).instrument(self.span.clone()));
        Ok((tx, stream))
    }
}

/// Pass a log through the seen-set and decode it.
fn accept<T: FromEvent>(log: EventLog, seen: Option<&SeenLogs>) -> Option<T> {
    if let Some(seen) = seen {
        if !seen.first_sighting(&log) {
            tracing::trace!(kind = %T::KIND, tx = %log.tx_hash, "duplicate log skipped");
            return None;
        }
    }
    let tx_hash = log.tx_hash;
    let event = T::from_event(log.event);
    if event.is_none() {
        tracing::warn!(kind = %T::KIND, tx = %tx_hash, "log of unexpected kind");
    }
    event
}

async fn forward<T: FromEvent>(
    mut subscription: LogSubscription,
    tx: mpsc::Sender<Result<T>>,
    seen: Option<SeenLogs>,
) {
    while let Some(item) = subscription.next().await {
        let item = match item {
            Ok(log) => match accept(log, seen.as_ref()) {
                Some(event) => Ok(event),
                None => continue,
            },
            Err(err) => {
                tracing::warn!(kind = %T::KIND, error = %err, "subscription failed");
                Err(err)
            }
        };
        let failed = item.is_err();
        if tx.send(item).await.is_err() || failed {
            break;
        }
    }
    tracing::debug!(kind = %T::KIND, "forwarder stopped");
}

async fn catch_up<T: FromEvent>(
    client: Arc<dyn ChainClient>,
    filter: LogFilter,
    tx: mpsc::Sender<Result<T>>,
    seen: SeenLogs,
) {
    let logs = match client.filter_logs(filter, 0).await {
        Ok(logs) => logs,
        Err(err) => {
            tracing::info!(kind = %T::KIND, error = %err, "catch-up query failed");
            return;
        }
    };
    for log in logs {
        if let Some(event) = accept(log, Some(&seen)) {
            if tx.send(Ok(event)).await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ContractEvent;

    fn log(tx: u8, index: u64) -> EventLog {
        EventLog {
            address: Address::from_bytes([1; 20]),
            block_number: 1,
            tx_hash: Hash256::from_bytes([tx; 32]),
            log_index: index,
            event: ContractEvent::MscClosed(MscClosed),
        }
    }

    #[test]
    fn test_seen_logs_keyed_by_tx_and_index() {
        let seen = SeenLogs::default();
        assert!(seen.first_sighting(&log(1, 0)));
        assert!(!seen.clone().first_sighting(&log(1, 0)));
        assert!(seen.first_sighting(&log(1, 1)));
        assert!(seen.first_sighting(&log(2, 0)));
    }

    #[tokio::test]
    async fn test_stream_timeout_and_close() {
        let (tx, mut stream) = EventStream::<MscClosed>::channel(1);
        assert!(stream.try_recv().is_none());
        assert!(matches!(
            stream.recv_timeout(Duration::from_millis(20)).await,
            Err(ChainError::EventTimeout(EventKind::MscClosed))
        ));
        tx.send(Ok(MscClosed)).await.unwrap();
        drop(tx);
        assert_eq!(stream.recv().await.unwrap(), MscClosed);
        assert!(matches!(
            stream.recv().await,
            Err(ChainError::EventStreamClosed(EventKind::MscClosed))
        ));
    }

    #[tokio::test]
    async fn test_forward_stops_after_error() {
        let (sub_tx, sub_rx) = mpsc::unbounded_channel();
        let (tx, mut stream) = EventStream::<MscClosed>::channel(4);
        sub_tx.send(Ok(log(1, 0))).unwrap();
        sub_tx.send(Err(ChainError::Subscription("gone".into()))).unwrap();
        sub_tx.send(Ok(log(2, 0))).unwrap();

        forward(LogSubscription::new(sub_rx), tx, None).await;
        assert_eq!(stream.recv().await.unwrap(), MscClosed);
        assert!(matches!(stream.recv().await, Err(ChainError::Subscription(_))));
        assert!(matches!(stream.recv().await, Err(ChainError::EventStreamClosed(_))));
    }
}
