//! Background re-resolution, driven by connection state and a timer.

use crate::connectivity::{ConnectivityState, SharedStateSource};
use crate::jitter::Jitter;
use crate::join::Task;
use crate::policy::Policy;
use crate::resolver::Resolver;

use std::future::Future;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{event, Instrument, Level};

struct WatcherWorker {
    resolver: Resolver,
    source: SharedStateSource,
    resolve_interval: Option<Duration>,
    resolve_spread: Duration,
    // The state when the watcher was spawned.
    initial_state: ConnectivityState,
}

impl WatcherWorker {
    async fn run(self, mut terminate_rx: oneshot::Receiver<()>) {
        let mut closed = self.resolver.closed_signal();
        let mut tick = self.resolve_interval.map(tokio::time::interval);
        if let Some(tick) = tick.as_mut() {
            // Don't fire immediately; whoever built the resolver just resolved.
            tick.reset_after(tick.period().add_spread(self.resolve_spread));
        }

        // The last state we acted on. This is only updated after observing a
        // transition, so a transition which happens while we are busy
        // resolving is still seen on the next iteration.
        let mut last = self.initial_state;
        loop {
            let next_tick = next_tick(tick.as_mut());

            tokio::select! {
                _ = &mut terminate_rx => return,
                _ = async { closed.wait_for(|closed| *closed).await.is_ok() } => {
                    event!(Level::DEBUG, "Resolver closed, watcher exiting");
                    return;
                }
                changed = self.source.wait_for_state_change(last) => {
                    if !changed {
                        event!(Level::DEBUG, "Connection state unobservable, watcher exiting");
                        return;
                    }
                    let state = self.source.current_state();
                    if state == last {
                        continue;
                    }
                    event!(Level::INFO, from = ?last, to = ?state, "Connection state changed");
                    last = state;
                    if state == ConnectivityState::Shutdown {
                        return;
                    }
                    self.resolver.resolve_now().await;
                }
                _ = next_tick => {
                    event!(Level::DEBUG, "Periodic re-resolution");
                    self.resolver.resolve_now().await;
                    if let Some(tick) = tick.as_mut() {
                        tick.reset_after(tick.period().add_spread(self.resolve_spread));
                    }
                }
            }
        }
    }
}

fn next_tick(tick: Option<&mut tokio::time::Interval>) -> impl Future<Output = ()> + '_ {
    match tick {
        Some(tick) => futures::future::Either::Left(async move {
            tick.tick().await;
        }),
        None => futures::future::Either::Right(futures::future::pending()),
    }
}

/// Re-resolves a [Resolver] whenever its connection changes state, and
/// periodically according to [Policy::resolve_interval].
///
/// The watcher stops when:
/// - it is terminated or dropped,
/// - the resolver is closed,
/// - the connection reaches [ConnectivityState::Shutdown], or its state
///   source stops reporting transitions.
pub struct Watcher {
    task: Task,
}

impl Watcher {
    pub fn spawn(resolver: Resolver, source: SharedStateSource, policy: &Policy) -> Self {
        let span = tracing::info_span!(
            "Watcher",
            service = %resolver.service(),
            id = resolver.id().0
        );
        let initial_state = source.current_state();
        let worker = WatcherWorker {
            resolver,
            source,
            initial_state,
            resolve_interval: policy.resolve_interval,
            resolve_spread: policy.resolve_spread,
        };
        let task = Task::spawn(|terminate_rx| {
            async move {
                worker.run(terminate_rx).await;
            }
            .instrument(span)
        });
        Self { task }
    }

    /// Returns true once the background task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops the watcher, waiting for the background task to exit.
    ///
    /// A pass which is already running finishes first.
    pub async fn terminate(&mut self) {
        self.task.terminate().await;
    }
}
