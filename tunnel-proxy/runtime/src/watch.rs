use futures::prelude::*;
use kube::runtime::watcher;
use kubert::index::IndexNamespacedResource;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, Instrument, Span};

/// Spawns a task that drives `index` from a resource watch.
///
/// The initial listing is buffered and applied as one reset so the index can
/// drop destinations that vanished while no watch was running. The returned
/// future resolves once that first listing has been applied.
pub(crate) fn spawn<T, I>(
    index: Arc<RwLock<I>>,
    events: impl Stream<Item = watcher::Event<T>> + Send + 'static,
    span: Span,
) -> oneshot::Receiver<()>
where
    T: kube::Resource + Send + 'static,
    I: IndexNamespacedResource<T> + Send + Sync + 'static,
{
    let (tx, rx) = oneshot::channel();
    tokio::spawn(pump(index, events, tx).instrument(span));
    rx
}

async fn pump<T, I>(
    index: Arc<RwLock<I>>,
    events: impl Stream<Item = watcher::Event<T>>,
    ready: oneshot::Sender<()>,
) where
    T: kube::Resource,
    I: IndexNamespacedResource<T>,
{
    tokio::pin!(events);
    let mut ready = Some(ready);
    let mut synced = Vec::new();

    while let Some(event) = events.next().await {
        match event {
            watcher::Event::Init => synced = Vec::new(),
            watcher::Event::InitApply(resource) => synced.push(resource),
            watcher::Event::InitDone => {
                index.write().reset(std::mem::take(&mut synced), Default::default());
                if let Some(tx) = ready.take() {
                    let _ = tx.send(());
                }
            }
            watcher::Event::Apply(resource) => index.write().apply(resource),
            watcher::Event::Delete(resource) => {
                let namespace = resource.meta().namespace.clone().unwrap_or_default();
                let name = resource.meta().name.clone().unwrap_or_default();
                index.write().delete(namespace, name);
            }
        }
    }

    debug!("watch stream ended");
}
