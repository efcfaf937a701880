//! Shutdown of the background tasks behind watchers and subscriptions

use tokio::sync::oneshot;
use tokio::task::{JoinError, JoinHandle};

/// A spawned task which exits once told to, or is aborted when dropped.
#[derive(Debug)]
pub(crate) struct Task {
    handle: Option<JoinHandle<()>>,
    terminate_tx: Option<oneshot::Sender<()>>,
}

impl Task {
    /// Spawns the future returned by `run`, which receives the signal to exit.
    pub(crate) fn spawn<F, Fut>(run: F) -> Self
    where
        F: FnOnce(oneshot::Receiver<()>) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let (terminate_tx, terminate_rx) = oneshot::channel();
        Self {
            handle: Some(tokio::task::spawn(run(terminate_rx))),
            terminate_tx: Some(terminate_tx),
        }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| handle.is_finished())
            .unwrap_or(true)
    }

    /// Signals the task and waits for it to exit. Panics from the task are
    /// resumed here.
    pub(crate) async fn terminate(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        if let Some(terminate_tx) = self.terminate_tx.take() {
            let _send_result = terminate_tx.send(());
        }
        propagate_panics(handle.await);
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

fn propagate_panics(result: Result<(), JoinError>) {
    match result {
        Ok(()) => (),
        // Aborted by an earlier drop
        Err(err) if err.is_cancelled() => (),
        Err(err) if err.is_panic() => {
            std::panic::panic_any(err.into_panic());
        }
        Err(err) => {
            panic!("Background task failed to join: {err}");
        }
    }
}
