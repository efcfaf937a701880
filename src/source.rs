//! External sources of backend lists, such as a service registry.

use crate::address::Address;
use crate::builder::ListBuilder;
use crate::join::Task;
use crate::service;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{event, Instrument, Level};

/// Updates to a service's backend list. Each item replaces the whole list.
pub type AddressUpdates = BoxStream<'static, Vec<Address>>;

/// Supplies backend lists for services registered with
/// [ListBuilder::register_from_source].
#[async_trait]
pub trait BackendSource: Send + Sync {
    /// Returns the current backends of `service`.
    async fn query_initial(&self, service: &service::Name) -> anyhow::Result<Vec<Address>>;

    /// Returns every subsequent change to the backends of `service`.
    ///
    /// The stream ending means no further updates will arrive; the service
    /// keeps its last list.
    fn watch_changes(&self, service: &service::Name) -> AddressUpdates;
}

pub type SharedBackendSource = Arc<dyn BackendSource>;

struct SubscriptionWorker {
    builder: ListBuilder,
    service: service::Name,
    updates: AddressUpdates,
}

impl SubscriptionWorker {
    async fn run(mut self, mut terminate_rx: oneshot::Receiver<()>) {
        loop {
            let update = tokio::select! {
                _ = &mut terminate_rx => return,
                update = self.updates.next() => update,
            };
            let Some(backends) = update else {
                event!(Level::INFO, "Backend source finished");
                return;
            };
            event!(Level::DEBUG, count = backends.len(), "Backend source update");
            if let Err(err) = self.builder.update(&self.service, backends).await {
                event!(Level::WARN, err = %err, "Updated backends failed health checks");
            }
        }
    }
}

/// Applies the updates of a [BackendSource] to one registered service.
#[derive(Debug)]
pub(crate) struct Subscription {
    task: Task,
}

impl Subscription {
    pub(crate) fn spawn(
        builder: ListBuilder,
        service: service::Name,
        updates: AddressUpdates,
    ) -> Self {
        let span = tracing::info_span!("Subscription", service = %service);
        let worker = SubscriptionWorker {
            builder,
            service,
            updates,
        };
        let task = Task::spawn(|terminate_rx| {
            async move {
                worker.run(terminate_rx).await;
            }
            .instrument(span)
        });
        Self { task }
    }

    /// Stops following the source, finishing any update in progress.
    pub(crate) async fn terminate(&mut self) {
        self.task.terminate().await;
    }
}
