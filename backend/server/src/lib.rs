//! Backend of a college-only anonymous rating platform.
//!
//! Students sign in with their college email, complete a profile, and rate
//! opposite-gender students of the same college from 1 to 10. Ratings are
//! anonymous: only a salted hash of the rater is kept. Every college gets a
//! weekly and an all-time top ten.
//!
//!
//!
//! # Request Path
//! - CORS, then request metrics ([`monitoring`])
//! - Every `/api` route sits behind the per-IP `api` limiter ([`limiter`])
//! - Auth routes and rating submission carry their own, stricter buckets
//! - Handlers resolve the session cookie through [`auth::CurrentUser`]
//! - Errors surface as JSON `{message, errors?}` ([`error::AppError`])
//!
//!
//!
//! # Storage
//!
//! Redis by default, an in-process store with `STORAGE=memory`. Both sit behind
//! [`storage::Store`], so handlers never see which one is running.
//!
//! Rating insertion is a single Lua script on Redis: the duplicate check, the
//! rating record, and the target's counters move together or not at all.
//!
//!
//!
//! # Background Work
//!
//! - Each accepted rating queues its college for a leaderboard rebuild
//! - Every 5 minutes expired cache entries and rate-limit windows are dropped
//!
//!
//!
//! # Setup
//!
//! Run against a local Redis.
//! ```sh
//! RUST_LOG=info cargo run -p campus-crush
//! ```
//!
//! Run without Redis.
//! ```sh
//! STORAGE=memory RUST_LOG=debug cargo run -p campus-crush
//! ```
//!
//! Seed the default college and ten test students.
//! ```sh
//! cargo run -p seed -- colleges
//! cargo run -p seed -- test-users --domain sggs.ac.in
//! ```
//!
//! Smoke test a running server.
//! ```sh
//! cargo run -p tester -- --base-url http://localhost:5000
//! ```
use std::net::SocketAddr;

use anyhow::{Context, Result};
use signal::{
    ctrl_c,
    unix::{SignalKind, signal},
};
use tokio::{net::TcpListener, signal};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

pub mod appeals;
pub mod auth;
pub mod cache;
pub mod config;
pub mod database;
pub mod discovery;
pub mod error;
pub mod feedback;
pub mod leaderboard;
pub mod limiter;
pub mod memory;
pub mod models;
pub mod monitoring;
pub mod payload;
pub mod profile;
pub mod ratings;
pub mod routes;
pub mod state;
pub mod storage;
pub mod utils;

use config::Config;
use state::State;

pub use routes::router;

pub async fn start_server() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("Loading config...");
    let config = Config::load()?;

    info!("Initializing state...");
    let state = State::new(config)
        .await
        .context("Failed to initialize storage")?;

    info!("Starting server...");
    let app = router(state.clone());

    let address = format!("0.0.0.0:{}", state.config.port);
    info!("Binding to {address}");

    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {address}"))?;
    info!("Server running on {address}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    info!("Server shut down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }

        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }

        info!("Received terminate signal, shutting down");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
