//! Reconcile workers draining a controller's work queue

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::controller::queue::WorkQueue;
use crate::errors::LatticeError;
use crate::store::ObjectKey;

/// Drives objects of one kind toward their desired state
#[async_trait]
pub trait Reconciler: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Every key the controller is responsible for
    fn resync_keys(&self) -> Vec<ObjectKey>;

    /// Reconcile a single object.
    ///
    /// Implementations recompute everything from the store on each call, so they can be invoked
    /// any number of times for the same key.
    async fn reconcile(&self, key: &ObjectKey) -> Result<(), LatticeError>;
}

/// Controller worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Reconciles running at the same time
    pub workers: usize,

    /// Interval at which every key is reconciled again
    pub resync_interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            workers: 2,
            resync_interval: Duration::from_secs(30),
        }
    }
}

/// Run a controller until the shutdown signal fires
pub async fn run<R, S, F>(
    options: &Options,
    queue: Arc<WorkQueue>,
    reconciler: Arc<R>,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    R: Reconciler,
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("{} controller starting...", reconciler.name());

    let mut workers = Vec::with_capacity(options.workers);
    for _ in 0..options.workers.max(1) {
        let queue = queue.clone();
        let reconciler = reconciler.clone();
        workers.push(tokio::spawn(async move {
            while let Some(key) = queue.get().await {
                process(&queue, reconciler.as_ref(), key).await;
            }
        }));
    }

    loop {
        for key in reconciler.resync_keys() {
            queue.add(key);
        }

        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("{} controller shutting down...", reconciler.name());
                break;
            }
            _ = sleep_fn(options.resync_interval) => {
                debug!("{} controller resync", reconciler.name());
            }
        }
    }

    queue.shutdown();
    for worker in workers {
        if let Err(e) = worker.await {
            warn!("{} controller worker exited abnormally: {}", reconciler.name(), e);
        }
    }
}

async fn process<R: Reconciler>(queue: &Arc<WorkQueue>, reconciler: &R, key: ObjectKey) {
    match reconciler.reconcile(&key).await {
        Ok(()) => queue.forget(&key),
        Err(e) => {
            if e.is_retryable() {
                debug!("{} controller: retrying {}: {}", reconciler.name(), key, e);
            } else {
                warn!("{} controller: failed to reconcile {}: {}", reconciler.name(), key, e);
            }
            queue.add_rate_limited(key.clone());
        }
    }
    queue.done(&key);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::queue;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Flaky {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Reconciler for Flaky {
        fn name(&self) -> &'static str {
            "flaky"
        }

        fn resync_keys(&self) -> Vec<ObjectKey> {
            vec![ObjectKey::new("ns", "a")]
        }

        async fn reconcile(&self, _key: &ObjectKey) -> Result<(), LatticeError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(LatticeError::Conflict("first attempt".to_string()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failed_reconcile_is_retried() {
        let queue = WorkQueue::new("flaky", queue::Options::default());
        let reconciler = Arc::new(Flaky {
            calls: AtomicUsize::new(0),
        });
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let handle = {
            let queue = queue.clone();
            let reconciler = reconciler.clone();
            tokio::spawn(async move {
                run(
                    &Options {
                        workers: 1,
                        resync_interval: Duration::from_secs(3600),
                    },
                    queue,
                    reconciler,
                    tokio::time::sleep,
                    Box::pin(async move {
                        let _ = rx.await;
                    }),
                )
                .await;
            })
        };

        for _ in 0..100 {
            if reconciler.calls.load(Ordering::SeqCst) >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(reconciler.calls.load(Ordering::SeqCst), 2);
        assert_eq!(queue.failures(&ObjectKey::new("ns", "a")), 0);

        let _ = tx.send(());
        handle.await.unwrap();
    }
}
