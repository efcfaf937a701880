//! The interface for checking whether backends are reachable.

use crate::address::{self, Address};
#[cfg(feature = "probes")]
use crate::probes;

use async_trait::async_trait;
use futures::{FutureExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{event, instrument, Level};

/// Describes how a single address should be checked for liveness.
///
/// A probe should attempt one bounded connection, release it, and report
/// the result. Probes must not retry: the caller decides when to try again.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, address: &Address) -> Result<(), address::Error>;
}

pub type SharedProber = Arc<dyn Prober>;

/// The result of probing a list of addresses.
///
/// Both lists preserve the relative order of the input.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Partition {
    pub alive: Vec<Address>,
    pub failed: Vec<Address>,
}

/// Probes every address, bounding each attempt by `timeout`.
///
/// Up to `concurrency` probes run at once. Results are collected in input
/// order, so the output is stable for a stable input regardless of which
/// probes finish first.
#[instrument(level = "debug", skip(prober, addresses), fields(count = addresses.len()))]
pub async fn probe_all(
    prober: &dyn Prober,
    addresses: &[Address],
    timeout: Duration,
    concurrency: usize,
) -> Partition {
    let pending: Vec<_> = addresses
        .iter()
        .map(|address| probe_one(prober, address, timeout).boxed())
        .collect();
    let results: Vec<(&Address, Result<(), address::Error>)> = futures::stream::iter(pending)
        .buffered(concurrency.max(1))
        .collect()
        .await;

    let mut partition = Partition::default();
    for (address, result) in results {
        match result {
            Ok(()) => {
                event!(Level::TRACE, %address, "Probe succeeded");
                partition.alive.push(address.clone());
            }
            Err(err) => {
                event!(Level::WARN, %address, err = ?err, "Probe failed");
                partition.failed.push(address.clone());
            }
        }
    }
    partition
}

async fn probe_one<'a>(
    prober: &'a dyn Prober,
    address: &'a Address,
    timeout: Duration,
) -> (&'a Address, Result<(), address::Error>) {
    #[cfg(feature = "probes")]
    probes::probe__start!(|| address.as_str());
    let result = match tokio::time::timeout(timeout, prober.probe(address)).await {
        Ok(result) => result,
        Err(_) => Err(address::Error::Timeout(timeout)),
    };
    #[cfg(feature = "probes")]
    match &result {
        Ok(()) => probes::probe__done!(|| address.as_str()),
        Err(err) => probes::probe__failed!(|| (address.as_str(), err.to_string())),
    }
    (address, result)
}
