use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Interval, MissedTickBehavior};

use super::BoxFuture;
use super::error::BackendResult;
use super::types::{ChatDocument, FeedQuery};

pub type SubscriptionWorker = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Revision counter bumped on every write to the chat collection.
#[derive(Debug, Clone)]
pub(crate) struct ChangeFeed {
    revision: Arc<watch::Sender<u64>>,
}

impl ChangeFeed {
    pub(crate) fn new() -> Self {
        let (revision, _) = watch::channel(0_u64);
        Self {
            revision: Arc::new(revision),
        }
    }

    pub(crate) fn bump(&self) {
        self.revision
            .send_modify(|revision| *revision = revision.wrapping_add(1));
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }
}

/// Read side a snapshot worker re-runs whenever the collection changes.
pub(crate) trait WindowSource: Send + Sync + 'static {
    fn fetch_window(&self, limit: usize) -> BoxFuture<'_, BackendResult<Vec<ChatDocument>>>;
}

/// Cloneable cancel switch for one standing subscription.
#[derive(Debug, Clone)]
pub struct UnsubscribeHandle {
    cancelled: Arc<AtomicBool>,
    cancel_tx: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

impl UnsubscribeHandle {
    fn new(cancel_tx: oneshot::Sender<()>) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            cancel_tx: Arc::new(Mutex::new(Some(cancel_tx))),
        }
    }

    /// Tears the subscription down. Returns `true` only for the call that cancelled it.
    pub fn unsubscribe(&self) -> bool {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return false;
        }

        let cancel_tx = match self.cancel_tx.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };

        if let Some(cancel_tx) = cancel_tx {
            let _ = cancel_tx.send(());
        }

        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Receiving end of a standing query; every item is the complete ordered window.
pub struct SnapshotStream {
    query: FeedQuery,
    snapshots: mpsc::UnboundedReceiver<Vec<ChatDocument>>,
    unsubscribe: UnsubscribeHandle,
}

impl SnapshotStream {
    pub(crate) fn new(
        query: FeedQuery,
        snapshots: mpsc::UnboundedReceiver<Vec<ChatDocument>>,
        cancel_tx: oneshot::Sender<()>,
    ) -> Self {
        Self {
            query,
            snapshots,
            unsubscribe: UnsubscribeHandle::new(cancel_tx),
        }
    }

    pub fn query(&self) -> &FeedQuery {
        &self.query
    }

    /// Waits for the next full snapshot. Yields `None` once unsubscribed, even if
    /// snapshots were still queued.
    pub async fn recv(&mut self) -> Option<Vec<ChatDocument>> {
        if self.unsubscribe.is_cancelled() {
            return None;
        }

        let snapshot = self.snapshots.recv().await;
        if self.unsubscribe.is_cancelled() {
            return None;
        }
        snapshot
    }

    pub fn try_recv(&mut self) -> Option<Vec<ChatDocument>> {
        if self.unsubscribe.is_cancelled() {
            return None;
        }
        self.snapshots.try_recv().ok()
    }

    pub fn unsubscribe(&mut self) -> bool {
        let cancelled = self.unsubscribe.unsubscribe();
        self.snapshots.close();
        cancelled
    }

    pub fn unsubscribe_handle(&self) -> UnsubscribeHandle {
        self.unsubscribe.clone()
    }
}

impl Drop for SnapshotStream {
    fn drop(&mut self) {
        self.unsubscribe.unsubscribe();
    }
}

/// A standing subscription: the stream is read by the UI, the worker runs on tokio.
pub struct SnapshotSubscription {
    pub stream: SnapshotStream,
    pub worker: SubscriptionWorker,
}

pub(crate) fn make_snapshot_stream(
    query: FeedQuery,
) -> (
    mpsc::UnboundedSender<Vec<ChatDocument>>,
    SnapshotStream,
    oneshot::Receiver<()>,
) {
    let (snapshot_tx, snapshot_rx) = mpsc::unbounded_channel();
    let (cancel_tx, cancel_rx) = oneshot::channel();
    (
        snapshot_tx,
        SnapshotStream::new(query, snapshot_rx, cancel_tx),
        cancel_rx,
    )
}

pub(crate) fn subscribe_window<S>(
    source: S,
    changes: &ChangeFeed,
    query: FeedQuery,
    poll_interval: Option<Duration>,
) -> SnapshotSubscription
where
    S: WindowSource,
{
    let revisions = changes.subscribe();
    let limit = query.limit;
    let (snapshot_tx, stream, cancel_rx) = make_snapshot_stream(query);
    let worker: SubscriptionWorker = Box::pin(run_snapshot_worker(
        source,
        revisions,
        limit,
        poll_interval,
        snapshot_tx,
        cancel_rx,
    ));

    SnapshotSubscription { stream, worker }
}

async fn run_snapshot_worker<S>(
    source: S,
    mut revisions: watch::Receiver<u64>,
    limit: usize,
    poll_interval: Option<Duration>,
    snapshot_tx: mpsc::UnboundedSender<Vec<ChatDocument>>,
    mut cancel_rx: oneshot::Receiver<()>,
) where
    S: WindowSource,
{
    let mut poll = poll_interval.map(|period| {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });
    let mut last_delivered: Option<Vec<ChatDocument>> = None;

    loop {
        match source.fetch_window(limit).await {
            Ok(window) => {
                // Only changes that touch this window are forwarded.
                if last_delivered.as_ref() != Some(&window) {
                    if snapshot_tx.send(window.clone()).is_err() {
                        return;
                    }
                    last_delivered = Some(window);
                }
            }
            Err(error) => {
                tracing::warn!(limit, error = %error, "failed to refresh feed window");
            }
        }

        tokio::select! {
            _ = &mut cancel_rx => {
                tracing::debug!(limit, "feed subscription cancelled");
                break;
            }
            changed = revisions.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = next_poll(&mut poll) => {}
        }
    }
}

async fn next_poll(poll: &mut Option<Interval>) {
    match poll {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
