//! The interface for observing the state of a consumer's connection.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;

/// Transport-level state of a connection, as reported by the connection layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum ConnectivityState {
    Idle,
    Connecting,
    Ready,
    TransientFailure,
    /// Terminal: the connection has been closed.
    Shutdown,
}

/// A source of connection state transitions.
#[async_trait]
pub trait StateSource: Send + Sync {
    /// Returns the state right now.
    fn current_state(&self) -> ConnectivityState;

    /// Blocks until the state differs from `current`.
    ///
    /// Returns false if no further transitions can be observed, e.g. because
    /// the connection is gone.
    async fn wait_for_state_change(&self, current: ConnectivityState) -> bool;
}

pub type SharedStateSource = Arc<dyn StateSource>;

/// A [StateSource] driven explicitly by its owner.
///
/// Connection layers report transitions with [StateChannel::set]; clones
/// share the same state.
#[derive(Clone, Debug)]
pub struct StateChannel {
    tx: Arc<watch::Sender<ConnectivityState>>,
}

impl StateChannel {
    pub fn new(initial: ConnectivityState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    /// Records a transition. Setting the current state again is not a
    /// transition.
    pub fn set(&self, state: ConnectivityState) {
        self.tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
    }
}

#[async_trait]
impl StateSource for StateChannel {
    fn current_state(&self) -> ConnectivityState {
        *self.tx.borrow()
    }

    async fn wait_for_state_change(&self, current: ConnectivityState) -> bool {
        let mut rx = self.tx.subscribe();
        let changed = rx.wait_for(|state| *state != current).await.is_ok();
        changed
    }
}
