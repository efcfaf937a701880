//! Utilities to help with testing resolvers

use crate::address::{self, Address};
use crate::notifier::Notifier;
use crate::probe::Prober;

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub fn setup_tracing_subscriber() {
    use tracing_subscriber::fmt::format::FmtSpan;
    // Other tests may have installed a subscriber already.
    let _ = tracing_subscriber::fmt()
        .with_thread_names(true)
        .with_span_events(FmtSpan::ENTER)
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .try_init();
}

/// A test-only prober which reports whatever it has been told to.
///
/// Every address is alive unless marked down. Probes of an address can be
/// slowed down to mimic high-latency backends.
pub struct ScriptedProber {
    down: Mutex<HashSet<Address>>,
    delays: Mutex<HashMap<Address, Duration>>,
    probes: AtomicUsize,
}

impl ScriptedProber {
    pub fn new() -> Self {
        Self {
            down: Mutex::new(HashSet::new()),
            delays: Mutex::new(HashMap::new()),
            probes: AtomicUsize::new(0),
        }
    }

    pub fn set_down(&self, address: impl Into<Address>) {
        self.down.lock().unwrap().insert(address.into());
    }

    pub fn set_up(&self, address: impl Into<Address>) {
        self.down.lock().unwrap().remove(&address.into());
    }

    pub fn set_delay(&self, address: impl Into<Address>, delay: Duration) {
        self.delays.lock().unwrap().insert(address.into(), delay);
    }

    /// Total number of probes started so far.
    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe(&self, address: &Address) -> Result<(), address::Error> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let delay = self.delays.lock().unwrap().get(address).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.down.lock().unwrap().contains(address) {
            return Err(address::Error::Io(std::io::Error::from(
                std::io::ErrorKind::ConnectionRefused,
            )));
        }
        Ok(())
    }
}

/// A test-only notifier which remembers every set it was given.
pub struct RecordingNotifier {
    published: Mutex<Vec<Vec<Address>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self {
            published: Mutex::new(Vec::new()),
        }
    }

    pub fn publishes(&self) -> Vec<Vec<Address>> {
        self.published.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.published.lock().unwrap().len()
    }

    pub fn last(&self) -> Option<Vec<Address>> {
        self.published.lock().unwrap().last().cloned()
    }
}

impl Notifier for RecordingNotifier {
    fn new_address_set(&self, addresses: Vec<Address>) {
        self.published.lock().unwrap().push(addresses);
    }
}
