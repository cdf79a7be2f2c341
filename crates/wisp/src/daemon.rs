//! Daemon wiring: builds every component and runs the server and timers.
//!
//! The daemon runs three background loops next to the HTTP server:
//! - The screenshot capture and sweep timer
//! - The proactive scheduler tick
//! - The idle session and upload sweep

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use wisp_bridge::{AllowAll, MessageBridge, SessionRegistry, SharedSecret};
use wisp_core::{
    Authorizer, BlobError, BlobStore, CaptureSource, Clock, ConversationEngine, FsBlobStore,
    SystemClock, prune_before,
};
use wisp_scheduler::ProactiveScheduler;
use wisp_screenshots::{CommandCapture, PushedFrameCapture, ScreenshotError, ScreenshotStore};
use wisp_web::{AppState, create_router};

use crate::config::{Config, ConfigError};
use crate::engine::{EchoEngine, HttpEngine};

/// Errors that can stop the daemon.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to open blob store: {0}")]
    Blob(#[from] BlobError),

    #[error("failed to load screenshots: {0}")]
    Screenshot(#[from] ScreenshotError),

    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

/// Command-line options for `wisp serve`.
#[derive(Debug, Clone)]
pub struct ServeOptions {
    pub listen: SocketAddr,
    pub data_dir: PathBuf,
    /// Base URL of a remote conversation engine. Without one, replies echo
    /// the user's message.
    pub engine_url: Option<String>,
    /// Secret clients must present on first contact. Without one, every
    /// token is accepted.
    pub shared_secret: Option<String>,
}

/// Every component, wired together.
pub struct Daemon {
    config: Config,
    state: Arc<AppState>,
}

impl Daemon {
    pub async fn build(config: Config, options: &ServeOptions) -> Result<Self, DaemonError> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let uploads: Arc<dyn BlobStore> =
            Arc::new(FsBlobStore::open(options.data_dir.join("uploads"), "upload").await?);
        let screenshot_blobs: Arc<dyn BlobStore> =
            Arc::new(FsBlobStore::open(options.data_dir.join("screenshots"), "screenshot").await?);

        let frames = Arc::new(PushedFrameCapture::new());
        let capture: Arc<dyn CaptureSource> = match config.screenshot_command.as_deref() {
            Some([program, args @ ..]) => {
                info!(program = %program, "capturing screenshots with external command");
                Arc::new(CommandCapture::new(program.clone(), args.to_vec()))
            }
            _ => Arc::clone(&frames) as _,
        };

        let screenshots = Arc::new(ScreenshotStore::new(
            Arc::clone(&screenshot_blobs),
            capture,
            Arc::clone(&clock),
            config.screenshots(),
        ));
        screenshots.rehydrate().await?;

        let authorizer: Arc<dyn Authorizer> = match options.shared_secret.as_deref() {
            Some(secret) => Arc::new(SharedSecret::new(secret)),
            None => Arc::new(AllowAll::new()),
        };
        let registry = Arc::new(SessionRegistry::new(
            authorizer,
            Arc::clone(&clock),
            config.registry(),
        ));

        let engine: Arc<dyn ConversationEngine> = match options.engine_url.as_deref() {
            Some(url) => {
                info!(url = %url, "using remote conversation engine");
                Arc::new(HttpEngine::new(url))
            }
            None => {
                info!("no engine configured, replies will echo");
                Arc::new(EchoEngine)
            }
        };
        let bridge = Arc::new(MessageBridge::new(registry, engine, config.bridge()));

        let scheduler = Arc::new(ProactiveScheduler::new(
            Arc::clone(&bridge),
            Some(Arc::clone(&screenshots)),
            config.proactive()?,
        ));

        let state = Arc::new(AppState {
            bridge,
            scheduler,
            screenshots,
            uploads,
            screenshot_blobs,
            frames,
            max_payload_bytes: config.max_payload_bytes,
        });

        Ok(Self { config, state })
    }

    /// Serve on `listener` until `shutdown_rx` flips to true.
    ///
    /// On shutdown every session is disconnected so open reply streams end
    /// and the server can drain.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<(), DaemonError> {
        let addr = listener.local_addr()?;
        info!(%addr, "wisp listening");

        let screenshots_handle = {
            let screenshots = Arc::clone(&self.state.screenshots);
            let shutdown_rx = shutdown_rx.clone();
            tokio::spawn(async move { screenshots.run(shutdown_rx).await })
        };

        let scheduler_handle = {
            let scheduler = Arc::clone(&self.state.scheduler);
            let shutdown_rx = shutdown_rx.clone();
            tokio::spawn(async move { scheduler.run(shutdown_rx).await })
        };

        let sweep_handle = {
            let state = Arc::clone(&self.state);
            let mut shutdown_rx = shutdown_rx.clone();
            let period = self.config.session_sweep_interval();
            let upload_max_age = self.config.upload_max_age();

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

                loop {
                    tokio::select! {
                        biased;

                        _ = shutdown_rx.changed() => {
                            if *shutdown_rx.borrow() {
                                break;
                            }
                        }

                        _ = interval.tick() => {
                            sweep_once(&state, upload_max_age).await;
                        }
                    }
                }

                info!("session sweep stopped");
            })
        };

        let server_handle = {
            let router = create_router(Arc::clone(&self.state));
            let mut server_shutdown = shutdown_rx.clone();
            tokio::spawn(async move {
                axum::serve(listener, router)
                    .with_graceful_shutdown(async move {
                        loop {
                            if server_shutdown.changed().await.is_err()
                                || *server_shutdown.borrow()
                            {
                                break;
                            }
                        }
                    })
                    .await
            })
        };

        // Wait for shutdown signal
        let mut main_shutdown_rx = shutdown_rx.clone();
        loop {
            if *main_shutdown_rx.borrow() {
                break;
            }
            if main_shutdown_rx.changed().await.is_err() {
                break;
            }
        }

        info!("shutting down");

        let _ = screenshots_handle.await;
        let _ = scheduler_handle.await;
        let _ = sweep_handle.await;

        let disconnected = self.state.bridge.disconnect_all().await;
        info!(disconnected, "sessions closed");

        match server_handle.await {
            Ok(result) => result?,
            Err(e) => return Err(std::io::Error::other(e).into()),
        }

        info!("wisp shut down gracefully");
        Ok(())
    }
}

/// Expire idle sessions and prune uploads older than `upload_max_age`.
/// Returns the number of sessions expired and uploads removed.
async fn sweep_once(state: &AppState, upload_max_age: chrono::Duration) -> (usize, usize) {
    let expired = state.bridge.sweep_sessions().await;
    let cutoff = state.bridge.registry().clock().now() - upload_max_age;
    let pruned = match prune_before(state.uploads.as_ref(), cutoff).await {
        Ok(pruned) => pruned,
        Err(e) => {
            warn!(error = %e, "upload sweep failed");
            0
        }
    };
    debug!(expired, pruned, "sweep complete");
    (expired, pruned)
}

/// Build the daemon, bind the listener and serve until Ctrl-C.
pub async fn run(config: Config, options: ServeOptions) -> Result<(), DaemonError> {
    let daemon = Daemon::build(config, &options).await?;
    let listener = TcpListener::bind(options.listen).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    daemon.serve(listener, shutdown_rx).await
}
