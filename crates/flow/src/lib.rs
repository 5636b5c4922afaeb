//! Adaptive flow control keyed on per-identity error rates.
//!
//! Dispatch outcomes feed an [`ErrorRateTracker`], which folds them into
//! per-identity rates and publishes a snapshot after every update. The
//! [`FlowController`] reads that snapshot to drop or delay each forwarded
//! item according to a [`FlowPolicy`].

pub mod controller;
pub mod error;
pub mod policy;
pub mod tracker;

pub use {
    controller::{Admission, Downstream, FlowController, FlowStats},
    error::{Error, Result},
    policy::{Decision, DelayTier, FlowPolicy},
    tracker::{ErrorRateTracker, IdentityStats, RateFold, RateSnapshot},
};
