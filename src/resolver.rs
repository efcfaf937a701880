//! Resolvers, which keep one connection's view of a service healthy.
//!
//! A [Resolver] owns the set of backends it was last given, probes them on
//! request, and pushes the alive subset to its [crate::notifier::Notifier]
//! whenever that subset changes.

use crate::address::{Address, AddressList};
use crate::fingerprint::Fingerprint;
use crate::notifier::SharedNotifier;
use crate::policy::Policy;
use crate::probe::{self, Partition, SharedProber};
#[cfg(feature = "probes")]
use crate::probes;
use crate::service;

use debug_ignore::DebugIgnore;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{event, instrument, Level};

/// Health-check failures observed while resolving a service.
///
/// These are never fatal: the resolver keeps routing to whatever is alive.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("{service}: failed backends: {}", AddressList(.failed))]
    Unreachable {
        service: service::Name,
        failed: Vec<Address>,
    },

    #[error("{service}: no backends available, failed backends: {}", AddressList(.failed))]
    NoBackendsAvailable {
        service: service::Name,
        failed: Vec<Address>,
    },
}

impl ResolveError {
    /// Classifies the outcome of a probe pass, if anything failed.
    pub(crate) fn from_partition(service: &service::Name, partition: &Partition) -> Option<Self> {
        if partition.failed.is_empty() {
            return None;
        }
        let service = service.clone();
        let failed = partition.failed.clone();
        if partition.alive.is_empty() {
            Some(ResolveError::NoBackendsAvailable { service, failed })
        } else {
            Some(ResolveError::Unreachable { service, failed })
        }
    }

    /// The addresses which failed their probes.
    pub fn failed(&self) -> &[Address] {
        match self {
            ResolveError::Unreachable { failed, .. }
            | ResolveError::NoBackendsAvailable { failed, .. } => failed,
        }
    }
}

/// A stream of [ResolveError], which can be taken once.
pub type ErrorStream = ReceiverStream<ResolveError>;

/// The sending half of an error stream.
///
/// Sends never block: if the stream is full, the error is dropped.
#[derive(Clone, Debug)]
pub(crate) struct ErrorSink(mpsc::Sender<ResolveError>);

impl ErrorSink {
    pub(crate) fn report(&self, err: &ResolveError) {
        if let Err(mpsc::error::TrySendError::Full(err)) = self.0.try_send(err.clone()) {
            event!(Level::DEBUG, err = %err, "Error stream full, dropping error");
        }
    }
}

/// An error stream, paired with the sender which feeds it.
#[derive(Debug)]
pub(crate) struct ErrorChannel {
    sink: ErrorSink,
    rx: Mutex<Option<mpsc::Receiver<ResolveError>>>,
}

impl ErrorChannel {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            sink: ErrorSink(tx),
            rx: Mutex::new(Some(rx)),
        }
    }

    pub(crate) fn sink(&self) -> &ErrorSink {
        &self.sink
    }

    pub(crate) fn take_stream(&self) -> Option<ErrorStream> {
        self.rx.lock().unwrap().take().map(ReceiverStream::new)
    }
}

/// Uniquely identifies a resolver within this process.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResolverId(pub u64);

impl ResolverId {
    fn new() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// What a resolve pass did.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// A new set of `count` addresses was sent to the notifier.
    Published { count: usize },
    /// The alive set matched the last published one; nothing was sent.
    Unchanged,
    /// The resolver is closed; nothing was sent.
    Closed,
}

#[derive(Debug, Default)]
struct State {
    // The current backend set, already filtered by the last update.
    backends: Vec<Address>,
    // Fingerprint of the last set handed to the notifier.
    fingerprint: Option<Fingerprint>,
}

#[derive(Debug)]
struct Inner {
    id: ResolverId,
    service: service::Name,
    prober: DebugIgnore<SharedProber>,
    notifier: DebugIgnore<SharedNotifier>,
    policy: Policy,

    // Held across "read backends -> probe -> compare -> publish -> record",
    // which serializes all publishes from this resolver.
    state: tokio::sync::Mutex<State>,

    // Checked right before each publish, while `state` is held. Once this is
    // set, no new publish starts.
    closed: AtomicBool,
    closed_tx: watch::Sender<bool>,

    errors: ErrorChannel,
    // Additional stream which receives copies of our errors, if any.
    forward: Option<ErrorSink>,
}

/// Tracks the health of one service's backends for one connection.
///
/// Cloning a resolver produces another handle to the same instance. All
/// methods may be called concurrently.
#[derive(Clone, Debug)]
pub struct Resolver {
    inner: Arc<Inner>,
}

impl Resolver {
    /// Creates a resolver with an empty backend set.
    ///
    /// Nothing is published until the first [Resolver::update_backends]
    /// or [Resolver::resolve_now].
    pub fn new(
        service: service::Name,
        prober: SharedProber,
        notifier: SharedNotifier,
        policy: Policy,
    ) -> Self {
        Self::with_forwarding(service, prober, notifier, policy, None)
    }

    pub(crate) fn with_forwarding(
        service: service::Name,
        prober: SharedProber,
        notifier: SharedNotifier,
        policy: Policy,
        forward: Option<ErrorSink>,
    ) -> Self {
        let (closed_tx, _) = watch::channel(false);
        let errors = ErrorChannel::new(policy.error_capacity);
        Self {
            inner: Arc::new(Inner {
                id: ResolverId::new(),
                service,
                prober: DebugIgnore(prober),
                notifier: DebugIgnore(notifier),
                policy,
                state: tokio::sync::Mutex::new(State::default()),
                closed: AtomicBool::new(false),
                closed_tx,
                errors,
                forward,
            }),
        }
    }

    pub fn id(&self) -> ResolverId {
        self.inner.id
    }

    pub fn service(&self) -> &service::Name {
        &self.inner.service
    }

    /// Returns the current backend set.
    pub async fn backends(&self) -> Vec<Address> {
        self.inner.state.lock().await.backends.clone()
    }

    /// Takes the stream of health-check failures.
    ///
    /// The stream can be taken once; later calls return `None`. Errors
    /// produced while nobody drains the stream are buffered up to
    /// [Policy::error_capacity], and dropped beyond that.
    pub fn errors(&self) -> Option<ErrorStream> {
        self.inner.errors.take_stream()
    }

    /// Replaces the backend set.
    ///
    /// The new list is probed; the alive subset becomes the current backend
    /// set and is published if it differs from the last publish. Failed
    /// addresses are returned as an error (and sent to the error stream),
    /// but do not prevent the alive subset from being used.
    #[instrument(skip(self, backends), fields(service = %self.inner.service, id = self.inner.id.0))]
    pub async fn update_backends(&self, backends: Vec<Address>) -> Result<(), ResolveError> {
        if self.is_closed() {
            event!(Level::DEBUG, "Ignoring update to closed resolver");
            return Ok(());
        }
        let backends = dedup(backends);
        let mut state = self.inner.state.lock().await;
        let partition = self.probe(&backends).await;
        self.commit(&mut state, partition, Forward::Yes)
    }

    /// Replaces the backend set with one that has already been probed.
    ///
    /// Used to fan one probe pass out to every resolver of a service. The
    /// caller reports the batch to any registration stream, so failures are
    /// only sent to this resolver's own stream.
    pub(crate) async fn apply_probed(&self, partition: Partition) -> Result<(), ResolveError> {
        if self.is_closed() {
            return Ok(());
        }
        let mut state = self.inner.state.lock().await;
        self.commit(&mut state, partition, Forward::No)
    }

    fn commit(
        &self,
        state: &mut State,
        partition: Partition,
        forward: Forward,
    ) -> Result<(), ResolveError> {
        let err = ResolveError::from_partition(&self.inner.service, &partition);
        if let Some(err) = &err {
            self.report(err, forward);
        }
        state.backends = partition.alive.clone();
        self.publish_if_changed(state, partition.alive);
        match err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Re-checks the current backend set, publishing if the alive subset
    /// changed since the last publish.
    ///
    /// Safe to call at any time, from any number of tasks. Calls are
    /// serialized; a call which finds nothing changed publishes nothing.
    #[instrument(level = "debug", skip(self), fields(service = %self.inner.service, id = self.inner.id.0))]
    pub async fn resolve_now(&self) -> Resolution {
        if self.is_closed() {
            return Resolution::Closed;
        }
        #[cfg(feature = "probes")]
        probes::resolve__start!(|| self.inner.service.as_str());

        let mut state = self.inner.state.lock().await;
        let partition = self.probe(&state.backends).await;
        if let Some(err) = ResolveError::from_partition(&self.inner.service, &partition) {
            self.report(&err, Forward::Yes);
        }
        self.publish_if_changed(&mut state, partition.alive)
    }

    /// Verifies that at least one backend is reachable, then resolves.
    ///
    /// Unlike [Resolver::resolve_now], this fails if nothing in the current
    /// backend set answers, leaving the last publish in place.
    pub async fn reconnect(&self) -> Result<Resolution, ResolveError> {
        let backends = self.backends().await;
        let partition = self.probe(&backends).await;
        if partition.alive.is_empty() {
            return Err(ResolveError::NoBackendsAvailable {
                service: self.inner.service.clone(),
                failed: partition.failed,
            });
        }
        Ok(self.resolve_now().await)
    }

    /// Stops this resolver.
    ///
    /// Once this returns, no new publish starts, even from passes which are
    /// already in progress. A notification being delivered at that moment
    /// may still finish. Background tasks watching this resolver are
    /// signalled to exit.
    ///
    /// This never waits on the notifier, so notifiers may call it from
    /// [crate::notifier::Notifier::new_address_set].
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.closed_tx.send_replace(true);
        event!(Level::INFO, service = %self.inner.service, id = self.inner.id.0, "Resolver closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Returns a receiver which becomes `true` when the resolver closes.
    pub(crate) fn closed_signal(&self) -> watch::Receiver<bool> {
        self.inner.closed_tx.subscribe()
    }

    async fn probe(&self, backends: &[Address]) -> Partition {
        probe::probe_all(
            &**self.inner.prober,
            backends,
            self.inner.policy.probe_timeout,
            self.inner.policy.probe_concurrency,
        )
        .await
    }

    fn report(&self, err: &ResolveError, forward: Forward) {
        event!(Level::WARN, err = %err, "Health check failed");
        self.inner.errors.sink().report(err);
        if let (Forward::Yes, Some(sink)) = (forward, &self.inner.forward) {
            sink.report(err);
        }
    }

    fn publish_if_changed(&self, state: &mut State, alive: Vec<Address>) -> Resolution {
        let fingerprint = Fingerprint::of(&alive);
        if state.fingerprint.as_ref() == Some(&fingerprint) {
            event!(Level::DEBUG, "Alive backends unchanged, not publishing");
            #[cfg(feature = "probes")]
            probes::resolve__unchanged!(|| self.inner.service.as_str());
            return Resolution::Unchanged;
        }

        if self.is_closed() {
            event!(Level::DEBUG, "Resolver closed, discarding publish");
            return Resolution::Closed;
        }
        let count = alive.len();
        event!(Level::INFO, backends = %AddressList(&alive), "Publishing backends");
        self.inner.notifier.new_address_set(alive);

        #[cfg(feature = "probes")]
        probes::publish__done!(|| (self.inner.service.as_str(), count as u64));
        state.fingerprint = Some(fingerprint);
        Resolution::Published { count }
    }
}

// Whether failures are also copied to the registration's stream.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Forward {
    Yes,
    No,
}

// Removes repeated addresses, keeping the first occurrence of each.
pub(crate) fn dedup(backends: Vec<Address>) -> Vec<Address> {
    let mut seen = HashSet::with_capacity(backends.len());
    backends
        .into_iter()
        .filter(|address| seen.insert(address.clone()))
        .collect()
}
