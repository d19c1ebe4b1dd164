//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::{AppState, Dependencies};
use crate::controller::manager;
use crate::errors::LatticeError;
use crate::server::serve::serve;
use crate::server::state::ServerState;

/// Run the daemon with the command line `git`/`docker` dependencies
pub async fn run(
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), LatticeError> {
    options.layout.setup().await?;
    let deps = Dependencies::from_options(&options);
    run_with(options, deps, shutdown_signal).await
}

/// Run the daemon until the shutdown signal fires
pub async fn run_with(
    options: AppOptions,
    deps: Dependencies,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), LatticeError> {
    info!("Initializing lattice...");

    // Create shutdown channel
    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    let app_state = Arc::new(AppState::new(&options, deps));
    if let Err(e) = init(&options, app_state, &shutdown_tx, &mut shutdown_manager).await {
        error!("Failed to start lattice: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

async fn init(
    options: &AppOptions,
    app_state: Arc<AppState>,
    shutdown_tx: &broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), LatticeError> {
    init_controllers(options, app_state.clone(), shutdown_manager, shutdown_tx.subscribe())?;

    if options.enable_server {
        init_server(options, app_state, shutdown_manager, shutdown_tx.subscribe()).await?;
    }
    Ok(())
}

fn init_controllers(
    options: &AppOptions,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), LatticeError> {
    info!("Initializing controllers...");

    let worker_options = options.controllers.worker.clone();
    let queue_options = options.controllers.queue.clone();
    let ctx = app_state.controller_ctx.clone();

    let handle = tokio::spawn(async move {
        manager::run(&worker_options, &queue_options, ctx, async move {
            let _ = shutdown_rx.recv().await;
        })
        .await;
    });

    shutdown_manager.with_controller_manager_handle(handle)
}

async fn init_server(
    options: &AppOptions,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), LatticeError> {
    info!("Initializing HTTP API...");

    let server_state = ServerState::new(app_state.backend.clone());
    let server_handle = serve(&options.server, Arc::new(server_state), async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    shutdown_manager.with_server_handle(server_handle)
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    controller_manager_handle: Option<JoinHandle<()>>,
    server_handle: Option<JoinHandle<Result<(), LatticeError>>>,
}

impl ShutdownManager {
    pub fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            controller_manager_handle: None,
            server_handle: None,
        }
    }

    pub fn with_controller_manager_handle(
        &mut self,
        handle: JoinHandle<()>,
    ) -> Result<(), LatticeError> {
        if self.controller_manager_handle.is_some() {
            return Err(LatticeError::ShutdownError(
                "controller_manager_handle already set".to_string(),
            ));
        }
        self.controller_manager_handle = Some(handle);
        Ok(())
    }

    pub fn with_server_handle(
        &mut self,
        handle: JoinHandle<Result<(), LatticeError>>,
    ) -> Result<(), LatticeError> {
        if self.server_handle.is_some() {
            return Err(LatticeError::ShutdownError("server_handle already set".to_string()));
        }
        self.server_handle = Some(handle);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), LatticeError> {
        let _ = self.shutdown_tx.send(());

        let max_delay = self.lifecycle_options.max_shutdown_delay;
        match tokio::time::timeout(max_delay, self.shutdown_impl()).await {
            Ok(result) => result,
            Err(_) => {
                error!("Shutdown timed out after {:?}", max_delay);
                Err(LatticeError::ShutdownError(format!(
                    "timed out after {:?}",
                    max_delay
                )))
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), LatticeError> {
        info!("Shutting down lattice...");

        // 1. HTTP API
        if let Some(handle) = self.server_handle.take() {
            handle
                .await
                .map_err(|e| LatticeError::ShutdownError(e.to_string()))??;
        }

        // 2. Controllers
        if let Some(handle) = self.controller_manager_handle.take() {
            handle
                .await
                .map_err(|e| LatticeError::ShutdownError(e.to_string()))?;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
