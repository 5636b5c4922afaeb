//! Adaptive flow controller.
//!
//! Each identity gets its own FIFO queue drained by one worker task, so an
//! identity has at most one delay in flight while different identities wait
//! concurrently. A worker retires as soon as its queue is empty.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    tokio::sync::{mpsc, watch},
    tokio_util::sync::CancellationToken,
    tracing::{debug, warn},
};

#[cfg(feature = "metrics")]
use metrics::counter;

use crate::{
    error::{Error, Result},
    policy::{Decision, FlowPolicy},
    tracker::RateSnapshot,
};

/// Receives items once their delay has elapsed.
#[async_trait]
pub trait Downstream<T>: Send + Sync {
    async fn deliver(&self, identity: &str, item: T) -> anyhow::Result<()>;
}

/// What [`FlowController::submit`] did with an item.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Admission {
    Dropped { rate: f64 },
    Scheduled { rate: f64, delay: Duration },
}

/// Counters shared by the controller and its workers.
#[derive(Debug, Default)]
pub struct FlowStats {
    pub forwarded: AtomicU64,
    pub dropped: AtomicU64,
    pub delivery_failures: AtomicU64,
    pub discarded: AtomicU64,
}

impl FlowStats {
    pub fn forwarded(&self) -> u64 {
        self.forwarded.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn delivery_failures(&self) -> u64 {
        self.delivery_failures.load(Ordering::Relaxed)
    }

    /// Items still queued or waiting when the controller was shut down.
    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }
}

struct Pending<T> {
    item: T,
    delay: Duration,
}

struct Shared<T> {
    policy: FlowPolicy,
    rates: watch::Receiver<RateSnapshot>,
    downstream: Arc<dyn Downstream<T>>,
    workers: Mutex<HashMap<String, mpsc::UnboundedSender<Pending<T>>>>,
    stats: FlowStats,
    cancel: CancellationToken,
}

pub struct FlowController<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for FlowController<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send + 'static> FlowController<T> {
    pub fn new(
        policy: FlowPolicy,
        rates: watch::Receiver<RateSnapshot>,
        downstream: Arc<dyn Downstream<T>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                policy,
                rates,
                downstream,
                workers: Mutex::new(HashMap::new()),
                stats: FlowStats::default(),
                cancel,
            }),
        }
    }

    /// Drop or schedule `item` based on the latest published rate for
    /// `identity`.
    pub fn submit(&self, identity: &str, item: T) -> Result<Admission> {
        if self.shared.cancel.is_cancelled() {
            return Err(Error::Closed("flow controller"));
        }

        let rate = self.shared.rates.borrow().rate(identity);
        let delay = match self.shared.policy.decide(rate) {
            Decision::Drop => {
                self.shared.stats.dropped.fetch_add(1, Ordering::Relaxed);
                #[cfg(feature = "metrics")]
                counter!("switchboard_flow_dropped_total").increment(1);
                warn!(
                    identity,
                    rate,
                    threshold = self.shared.policy.drop_threshold(),
                    "dropping message: error rate above threshold"
                );
                return Ok(Admission::Dropped { rate });
            },
            Decision::Delay(delay) => delay,
        };

        debug!(identity, rate, delay_ms = delay.as_millis() as u64, "scheduling message");
        self.enqueue(identity, Pending { item, delay });
        Ok(Admission::Scheduled { rate, delay })
    }

    fn enqueue(&self, identity: &str, pending: Pending<T>) {
        let mut workers = self
            .shared
            .workers
            .lock()
            .unwrap_or_else(|e| e.into_inner());

        let pending = match workers.get(identity) {
            Some(tx) => match tx.send(pending) {
                Ok(()) => return,
                Err(mpsc::error::SendError(pending)) => pending,
            },
            None => pending,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        // The receiver is alive until the worker below exits.
        let _ = tx.send(pending);
        workers.insert(identity.to_string(), tx);
        drop(workers);

        debug!(identity, "starting flow worker");
        tokio::spawn(run_worker(
            Arc::clone(&self.shared),
            identity.to_string(),
            rx,
        ));
    }

    pub fn stats(&self) -> &FlowStats {
        &self.shared.stats
    }

    pub fn policy(&self) -> &FlowPolicy {
        &self.shared.policy
    }

    /// Identities that currently have queued or in-flight items.
    pub fn active_workers(&self) -> usize {
        self.shared
            .workers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Cancel pending delays. Queued items are discarded and further
    /// submissions fail.
    pub fn shutdown(&self) {
        self.shared.cancel.cancel();
    }
}

async fn run_worker<T: Send + 'static>(
    shared: Arc<Shared<T>>,
    identity: String,
    mut rx: mpsc::UnboundedReceiver<Pending<T>>,
) {
    while let Some(pending) = next_pending(&shared, &identity, &mut rx) {
        tokio::select! {
            biased;
            () = shared.cancel.cancelled() => {
                discard(&shared, &identity, &mut rx, 1);
                return;
            },
            () = tokio::time::sleep(pending.delay) => {},
        }

        match shared.downstream.deliver(&identity, pending.item).await {
            Ok(()) => {
                shared.stats.forwarded.fetch_add(1, Ordering::Relaxed);
            },
            Err(error) => {
                shared
                    .stats
                    .delivery_failures
                    .fetch_add(1, Ordering::Relaxed);
                warn!(identity = %identity, error = %error, "downstream delivery failed");
            },
        }
    }
    debug!(identity = %identity, "flow worker retired");
}

/// Pop the next item, or unregister the worker if its queue is empty.
///
/// The emptiness check is repeated under the map lock: `enqueue` sends while
/// holding the same lock, so nothing can land in a queue that is being
/// retired.
fn next_pending<T>(
    shared: &Shared<T>,
    identity: &str,
    rx: &mut mpsc::UnboundedReceiver<Pending<T>>,
) -> Option<Pending<T>> {
    if let Ok(pending) = rx.try_recv() {
        return Some(pending);
    }
    let mut workers = shared.workers.lock().unwrap_or_else(|e| e.into_inner());
    match rx.try_recv() {
        Ok(pending) => Some(pending),
        Err(_) => {
            workers.remove(identity);
            None
        },
    }
}

fn discard<T>(
    shared: &Shared<T>,
    identity: &str,
    rx: &mut mpsc::UnboundedReceiver<Pending<T>>,
    in_flight: u64,
) {
    let mut workers = shared.workers.lock().unwrap_or_else(|e| e.into_inner());
    workers.remove(identity);
    rx.close();
    let mut count = in_flight;
    while rx.try_recv().is_ok() {
        count += 1;
    }
    drop(workers);
    shared.stats.discarded.fetch_add(count, Ordering::Relaxed);
    debug!(identity, discarded = count, "flow worker cancelled");
}
