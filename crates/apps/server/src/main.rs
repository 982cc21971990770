use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::http::Method;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use clap::Parser;
use foundation::time::SystemClock;
use runtime::persistence::SnapshotStore;
use runtime::{Engine, EngineConfig};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod api;

use api::AppState;

#[derive(Parser, Debug)]
#[command(author, version, about = "Subathon countdown server")]
struct Args {
    /// Address to listen on
    #[arg(long, env = "SUBATHON_ADDR", default_value = "127.0.0.1:8080")]
    addr: SocketAddr,

    /// Snapshot file the budget is persisted to
    #[arg(long, env = "SUBATHON_DATA_FILE", default_value = "timer-data.json")]
    data_file: PathBuf,

    /// Directory holding control.html, timer.html and their assets
    #[arg(long, env = "SUBATHON_STATIC_DIR", default_value = ".")]
    static_dir: PathBuf,

    /// Queue poll interval in milliseconds
    #[arg(long, env = "SUBATHON_POLL_MS", default_value_t = 10)]
    poll_ms: u64,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = EngineConfig {
        poll_interval: Duration::from_millis(args.poll_ms.max(1)),
        ..EngineConfig::default()
    };
    let store = SnapshotStore::new(args.data_file.clone());
    let engine = Arc::new(Engine::open(config, store, Arc::new(SystemClock)).await);
    let workers = engine.spawn_workers();

    let snap = engine.snapshot();
    let channel = if snap.state.config.channel.is_empty() {
        "not configured"
    } else {
        snap.state.config.channel.as_str()
    };
    info!(
        channel,
        remaining = snap.state.remaining_seconds,
        running = snap.state.is_running,
        "budget ready"
    );

    let app = router(
        AppState {
            engine: engine.clone(),
        },
        &args.static_dir,
    );

    info!("control panel on http://{}/", args.addr);
    info!("overlay on http://{}/timer.html", args.addr);
    let listener = tokio::net::TcpListener::bind(args.addr)
        .await
        .expect("failed to bind listen address");
    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("server error: {err}");
    }

    workers.abort();
    if engine.persist().await {
        info!("final snapshot saved");
    } else {
        warn!("final snapshot could not be saved");
    }
}

fn router(state: AppState, static_dir: &Path) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_headers(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS]);

    Router::new()
        .route("/healthz", get(api::healthz))
        .route("/api/timer", get(api::get_timer).post(api::update_timer))
        .route("/api/addtime", post(api::add_time))
        .route("/api/event", post(api::add_event))
        .route("/api/start", post(api::start))
        .route("/api/pause", post(api::pause))
        .route("/api/reset", post(api::reset))
        .route("/api/fullreset", post(api::full_reset))
        .route("/api/settime", post(api::set_time))
        .route("/api/setgoal", post(api::set_goal))
        .route("/api/addbits", post(api::add_bits))
        .route("/api/resetlist", post(api::reset_list))
        .route_service("/", ServeFile::new(static_dir.join("control.html")))
        .fallback_service(ServeDir::new(static_dir))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api::count_requests,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("ctrl-c handler unavailable: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!("SIGTERM handler unavailable: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutting down");
}
