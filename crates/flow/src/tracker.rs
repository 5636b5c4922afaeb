//! Per-identity error rates.
//!
//! Outcomes go through an unbounded queue to a single fold task, which owns
//! the stats and patches the published rate table in place on a `watch`
//! channel. Each update touches one identity plus at most one eviction, so
//! publishing costs the same however many identities are tracked.

use std::{collections::HashMap, num::NonZeroUsize};

use {
    lru::LruCache,
    tokio::{
        sync::{mpsc, watch},
        task::JoinHandle,
    },
    tracing::{debug, trace},
};

use crate::error::{Error, Result};

/// Default bound on the number of identities tracked at once.
pub const DEFAULT_MAX_IDENTITIES: usize = 10_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IdentityStats {
    pub total: u64,
    pub errors: u64,
}

impl IdentityStats {
    pub fn rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.errors as f64 / self.total as f64
        }
    }
}

/// The sequential fold itself. Least recently seen identities are evicted
/// once `capacity` is reached and start over from zero if they return.
pub struct RateFold {
    stats: LruCache<String, IdentityStats>,
}

impl RateFold {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            stats: LruCache::new(capacity),
        }
    }

    /// Apply one outcome and return the identity's updated rate.
    pub fn record(&mut self, identity: &str, failed: bool) -> f64 {
        self.apply(identity, failed).0
    }

    /// Like [`record`](Self::record), also returning the identity evicted to
    /// make room, if any.
    fn apply(&mut self, identity: &str, failed: bool) -> (f64, Option<String>) {
        let evicted = if self.stats.contains(identity) {
            None
        } else {
            self.stats
                .push(identity.to_string(), IdentityStats::default())
                .map(|(key, _)| key)
        };
        let Some(stats) = self.stats.get_mut(identity) else {
            return (0.0, evicted);
        };
        stats.total += 1;
        if failed {
            stats.errors += 1;
        }
        (stats.rate(), evicted)
    }

    pub fn stats(&self, identity: &str) -> Option<IdentityStats> {
        self.stats.peek(identity).copied()
    }

    pub fn rate(&self, identity: &str) -> f64 {
        self.stats(identity).map_or(0.0, |s| s.rate())
    }

    pub fn len(&self) -> usize {
        self.stats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }
}

/// Published view of every tracked identity's rate.
#[derive(Debug, Clone, Default)]
pub struct RateSnapshot {
    updates: u64,
    rates: HashMap<String, f64>,
}

impl RateSnapshot {
    /// Snapshot with `identity` pinned to `rate`, for seeding a controller
    /// without a running tracker.
    #[must_use]
    pub fn with_rate(mut self, identity: impl Into<String>, rate: f64) -> Self {
        self.rates.insert(identity.into(), rate);
        self
    }

    /// Rate for `identity`; unknown identities have rate 0.
    pub fn rate(&self, identity: &str) -> f64 {
        self.rates.get(identity).copied().unwrap_or(0.0)
    }

    /// Number of outcomes folded before this snapshot was published.
    pub fn updates(&self) -> u64 {
        self.updates
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.rates.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

#[derive(Debug)]
struct Outcome {
    identity: String,
    failed: bool,
}

/// Handle to the fold task. Cloning shares the same task and snapshot.
#[derive(Clone)]
pub struct ErrorRateTracker {
    outcomes: mpsc::UnboundedSender<Outcome>,
    snapshot: watch::Receiver<RateSnapshot>,
}

impl ErrorRateTracker {
    /// Start the fold task. It exits once every handle has been dropped.
    pub fn spawn(max_identities: usize) -> (Self, JoinHandle<()>) {
        let (outcomes, mut rx) = mpsc::unbounded_channel::<Outcome>();
        let (publish, snapshot) = watch::channel(RateSnapshot::default());

        let handle = tokio::spawn(async move {
            let mut fold = RateFold::new(max_identities);
            let mut updates = 0u64;
            while let Some(Outcome { identity, failed }) = rx.recv().await {
                let (rate, evicted) = fold.apply(&identity, failed);
                updates += 1;
                trace!(%identity, failed, rate, ?evicted, "error rate updated");
                publish.send_modify(|snapshot| {
                    if let Some(evicted) = &evicted {
                        snapshot.rates.remove(evicted);
                    }
                    snapshot.rates.insert(identity, rate);
                    snapshot.updates = updates;
                });
            }
            debug!(updates, identities = fold.len(), "rate tracker stopped");
        });

        (Self { outcomes, snapshot }, handle)
    }

    /// Queue one dispatch outcome for `identity`.
    pub fn record(&self, identity: impl Into<String>, failed: bool) -> Result<()> {
        self.outcomes
            .send(Outcome {
                identity: identity.into(),
                failed,
            })
            .map_err(|_| Error::Closed("rate tracker"))
    }

    /// Copy of the latest published snapshot.
    pub fn snapshot(&self) -> RateSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn rate(&self, identity: &str) -> f64 {
        self.snapshot.borrow().rate(identity)
    }

    /// A receiver that observes every future snapshot.
    pub fn subscribe(&self) -> watch::Receiver<RateSnapshot> {
        self.snapshot.clone()
    }
}
