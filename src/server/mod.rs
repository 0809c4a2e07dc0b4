//! HTTP surface.
//!
//! | Route | Method | Auth | Purpose |
//! |-------|--------|------|---------|
//! | `/health` | GET | no | liveness |
//! | `/api/decks` | POST | yes | upload a deck (multipart `file`), returns a job id |
//! | `/api/decks` | GET | yes | the caller's decks and sets |
//! | `/api/jobs/:job_id` | GET | yes | conversion progress |
//! | `/api/decks/:deck_id/slides` | GET | yes | pages for the slide picker |
//! | `/api/decks/:deck_id/download` | GET | yes | the deck PDF |
//! | `/api/decks/:deck_id` | DELETE | yes | remove a deck |
//! | `/api/decks/:deck_id/sets` | POST | yes | create a slide set |
//! | `/api/sets/:set_id` | DELETE | yes | remove a slide set |
//! | `/s/:link_kind/:code` | GET | no | public share link |
//! | `/blobs/*name` | GET | token | local blob backend only |
//!
//! Authentication is delegated to a fronting proxy that sets
//! [`extract::OWNER_HEADER`].

pub mod error;
pub mod extract;
pub mod handlers;

pub use error::ApiError;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::convert::Pipeline;
use crate::error::SlidePullError;
use crate::progress::ProgressTracker;
use crate::storage::local::LocalBlobStore;

/// Room for multipart boundaries and headers on top of the file itself.
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// How long running conversions may finish on their own after the listener
/// has drained. Whatever is left is cancelled and rolled back.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub progress: ProgressTracker,
    /// Set when blobs live on local disk and are served by this process.
    pub local_blobs: Option<Arc<LocalBlobStore>>,
    /// Background conversions started by uploads.
    pub jobs: TaskTracker,
    /// Fired when unfinished conversions must stop.
    pub cancel: CancellationToken,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            progress: ProgressTracker::new(),
            local_blobs: None,
            jobs: TaskTracker::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_local_blobs(mut self, store: Arc<LocalBlobStore>) -> Self {
        self.local_blobs = Some(store);
        self
    }

    /// Stop accepting background work and wait for running conversions.
    /// After `grace` the rest are cancelled, which rolls back their blobs,
    /// and this still waits for them to unwind.
    pub async fn drain_jobs(&self, grace: Duration) {
        self.jobs.close();
        if self.jobs.is_empty() {
            return;
        }
        info!("Waiting for {} conversion(s) to finish", self.jobs.len());
        if tokio::time::timeout(grace, self.jobs.wait()).await.is_err() {
            warn!("Cancelling {} unfinished conversion(s)", self.jobs.len());
            self.cancel.cancel();
            self.jobs.wait().await;
        }
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let body_limit = usize::try_from(state.pipeline.config().max_upload_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD);

    let api = Router::new()
        .route("/decks", get(handlers::list_decks).post(handlers::upload_deck))
        .route("/decks/:deck_id", delete(handlers::delete_deck))
        .route("/decks/:deck_id/slides", get(handlers::list_slides))
        .route("/decks/:deck_id/download", get(handlers::download_deck))
        .route("/decks/:deck_id/sets", post(handlers::create_set))
        .route("/sets/:set_id", delete(handlers::delete_set))
        .route("/jobs/:job_id", get(handlers::job_status));

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api", api)
        .route("/s/:link_kind/:code", get(handlers::share_link))
        .route("/blobs/*name", get(handlers::serve_blob))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `shutdown` resolves, then drain background conversions (see
/// [`AppState::drain_jobs`]). Also prunes finished job records.
pub async fn serve<F>(state: AppState, listener: TcpListener, shutdown: F) -> Result<(), SlidePullError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let retention = chrono::Duration::seconds(
        i64::try_from(state.pipeline.config().job_retention_secs).unwrap_or(i64::MAX / 1000),
    );
    let progress = state.progress.clone();
    let draining = state.clone();
    let pruner = tokio::spawn(async move {
        let mut tick = tokio::time::interval(PRUNE_INTERVAL);
        loop {
            tick.tick().await;
            let removed = progress.prune(chrono::Utc::now(), retention);
            if removed > 0 {
                debug!("Pruned {} finished job(s)", removed);
            }
        }
    });

    let addr = listener
        .local_addr()
        .map_err(|e| SlidePullError::Internal(format!("listener address: {e}")))?;
    info!("Listening on http://{}", addr);

    let result = axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| SlidePullError::Internal(format!("server error: {e}")));

    draining.drain_jobs(SHUTDOWN_GRACE).await;
    pruner.abort();
    info!("Server stopped");
    result
}

/// Resolves on Ctrl-C.
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
