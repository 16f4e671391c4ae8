pub mod analysis;
pub mod client;
pub mod commands;
pub mod error;
pub mod models;

pub use commands::http::AppState;

use analysis::query::PageDefaults;
use commands::db::IssueStore;
use commands::issues::IssueService;
use commands::settings::{load_settings, resolve_data_dir, Settings};
use error::{IssueError, IssueResult, StoreContext};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Opens the store described by `settings` and builds the shared handler state.
pub fn build_state(settings: Settings) -> IssueResult<Arc<AppState>> {
    let store = IssueStore::open(settings.database_path())
        .store_context("Failed to initialize issue database")?;
    let page_defaults = PageDefaults {
        default_limit: settings.default_page_limit,
        max_limit: settings.max_page_limit,
    };

    Ok(Arc::new(AppState {
        service: IssueService::new(store, page_defaults),
        settings,
    }))
}

/// Serves the API on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: Arc<AppState>, shutdown: F) -> IssueResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        log::info!("Listening on http://{addr}");
    }

    axum::serve(listener, commands::http::router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|source| IssueError::Io {
            context: "Server error",
            source,
        })
}

/// Entry point for the `trialtrack` binary. `data_dir` overrides
/// `TRIALTRACK_DATA_DIR`.
pub fn run(data_dir: Option<String>) -> IssueResult<()> {
    let data_dir = resolve_data_dir(data_dir);
    let settings = load_settings(&data_dir)?;
    log::info!("Using data directory {}", data_dir.display());

    let addr = settings.listen_addr();
    let state = build_state(settings)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|source| IssueError::Io {
            context: "Failed to start async runtime",
            source,
        })?;

    runtime.block_on(async move {
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| IssueError::Io {
                context: "Failed to bind listen address",
                source,
            })?;
        serve(listener, state, shutdown_signal()).await
    })?;

    log::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    log::info!("Shutdown requested");
}
