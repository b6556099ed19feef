//! Storefront API server
//!
//! Startup order:
//! - `.env` and `RUST_LOG` based logging
//! - [`Config`] from the environment
//! - redb file and the shared [`AppState`]
//! - rate limiter pruning task, then the HTTP listener with graceful shutdown

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dotenvy::dotenv;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use storefront::config::Config;
use storefront::database::{init_db, AppState};
use storefront::route::create_app;

/// See [`Config`] for the environment variables read at startup.
#[tokio::main]
async fn main() {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("storefront=debug,tower_http=debug")),
        )
        .init();

    let config = Config::from_env();

    let db = match init_db(&config.database_url) {
        Ok(db) => db,
        Err(e) => {
            error!(error = %e, path = %config.database_url, "failed to initialize database");
            std::process::exit(1);
        }
    };

    let port = config.port;
    let database_url = config.database_url.clone();
    let state = AppState::new(Arc::new(db), config);

    // Prune expired rate limit windows in the background
    let limiter = state.rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            limiter.cleanup();
        }
    });

    let app = create_app(state).layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", port);
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, addr = %addr, "failed to bind");
            std::process::exit(1);
        }
    };

    info!("Server running at http://localhost:{}", port);
    info!("Using database: {}", database_url);

    // ConnectInfo feeds the rate limiter when no X-Forwarded-For is present
    if let Err(e) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    {
        error!(error = %e, "server error");
    }
}

/// Handles graceful shutdown signals
///
/// Returns when SIGINT (Ctrl+C) or, on Unix, SIGTERM is received. Open
/// connections are allowed to complete before the process exits.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    // On non-Unix systems (Windows), only handle Ctrl+C
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, stopping server");
}
