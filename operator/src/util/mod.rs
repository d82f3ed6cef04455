use std::time::Duration;

#[cfg(feature = "metrics")]
pub mod metrics;
pub mod patch;

pub(crate) mod colors;

mod error;

pub use error::*;

/// Requeue interval while a suite has pods in flight; pod phase changes not
/// delivered as watch events are picked up by polling at this cadence.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Name of the kubernetes resource manager.
pub(crate) const MANAGER_NAME: &str = "octopus-operator";
