//! Feeds store watch events into a controller's work queue

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::controller::queue::WorkQueue;
use crate::store::{Object, ObjectKey, WatchEvent};

/// Map every event to the keys it affects and enqueue them.
///
/// When the watch falls behind, every key returned by `resync` is enqueued instead.
pub async fn run<T, M, R>(
    mut events: broadcast::Receiver<WatchEvent<T>>,
    queue: Arc<WorkQueue>,
    map: M,
    resync: R,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    T: Object,
    M: Fn(&T) -> Vec<ObjectKey>,
    R: Fn() -> Vec<ObjectKey>,
{
    debug!("{} informer for {} starting", queue.name(), T::KIND);

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                debug!("{} informer for {} shutting down", queue.name(), T::KIND);
                return;
            }
            event = events.recv() => match event {
                Ok(event) => {
                    for key in map(event.object()) {
                        queue.add(key);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(
                        "{} informer for {} skipped {} events, resyncing",
                        queue.name(),
                        T::KIND,
                        skipped
                    );
                    for key in resync() {
                        queue.add(key);
                    }
                }
                Err(RecvError::Closed) => {
                    info!("{} watch closed", T::KIND);
                    return;
                }
            }
        }
    }
}
