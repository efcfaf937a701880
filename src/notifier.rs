//! The interface through which resolved addresses reach the connection layer.

use crate::address::Address;

use std::sync::Arc;
use tokio::sync::watch;

/// The complete set of addresses most recently published.
pub type AddressSet = Arc<Vec<Address>>;

/// Receives address sets from a [crate::resolver::Resolver].
///
/// Each call carries the complete current set, replacing whatever was
/// published before. An empty set means no backend is usable: the
/// connection layer should fail calls with "no backend available" until a
/// non-empty set arrives.
///
/// Calls are made from inside a resolve pass. Implementations may call
/// [crate::resolver::Resolver::close] or `is_closed` on the publishing
/// resolver, but must not block on its async methods.
pub trait Notifier: Send + Sync {
    fn new_address_set(&self, addresses: Vec<Address>);
}

pub type SharedNotifier = Arc<dyn Notifier>;

/// A [Notifier] which publishes into a [watch] channel.
///
/// Useful for connection layers which would rather observe the latest set
/// than be called back.
#[derive(Clone, Debug)]
pub struct WatchNotifier {
    tx: watch::Sender<AddressSet>,
}

impl WatchNotifier {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Arc::new(Vec::new()));
        Self { tx }
    }

    /// Returns a receiver tracking the latest published set.
    pub fn monitor(&self) -> watch::Receiver<AddressSet> {
        self.tx.subscribe()
    }
}

impl Default for WatchNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier for WatchNotifier {
    fn new_address_set(&self, addresses: Vec<Address>) {
        self.tx.send_replace(Arc::new(addresses));
    }
}
