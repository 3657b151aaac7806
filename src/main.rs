//! File vault server binary.
//!
//! Wires the credential gate, extension policy and flat-directory storage
//! into an Axum router and serves it until Ctrl+C / SIGTERM.

mod atomic;
mod auth;
mod config;
mod error;
mod files;
mod http;
mod logging;
mod page;
mod policy;
mod storage;

use axum::extract::{DefaultBodyLimit, Extension, connect_info::ConnectInfo};
use axum::http::Request;
use axum::routing::{get, post};
use axum::{Router, middleware};
use axum_server::Handle;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, error, info, info_span, warn};

use crate::auth::CredentialGate;
use crate::config::{Args, ServerConfig};
use crate::http::resolve_client_ip;
use crate::storage::Storage;

/// Starts the vault and blocks until shutdown.
#[tokio::main]
async fn main() -> ExitCode {
    logging::init_logging();

    let args = Args::parse_normalized();
    let config = match ServerConfig::from_args(args) {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "invalid configuration");
            return ExitCode::from(2);
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "server stopped with error");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: ServerConfig) -> Result<(), std::io::Error> {
    let body_limit = config.body_limit();
    let addr = config.listen_addr();
    let ServerConfig {
        storage_dir,
        gate,
        extension_rule,
        max_upload_size,
        ..
    } = config;

    if gate.is_open() {
        warn!("no password configured, anyone who can reach the server can read and upload files");
    }
    match &extension_rule {
        Some(rule) => info!(
            mode = rule.mode().as_str(),
            extensions = ?rule.extensions(),
            "extension filter enabled"
        ),
        None => info!("all file extensions allowed"),
    }

    let storage = Arc::new(Storage::new(storage_dir, extension_rule, max_upload_size));
    storage.ensure_root().await?;
    info!(
        root = %storage.root_path().display(),
        auth = gate.describe(),
        max_upload_size,
        "storage ready"
    );

    let app = build_router(Arc::new(gate), storage, body_limit);
    let handle = Handle::new();

    info!("🚀 Starting HTTP server at {}", addr);
    let server = axum_server::bind(addr)
        .handle(handle.clone())
        .serve(app.into_make_service_with_connect_info::<SocketAddr>());

    tokio::select! {
        result = server => result?,
        _ = shutdown_signal(handle) => {}
    }

    Ok(())
}

/// Builds the full router: list/upload at `/`, downloads, and the password
/// pre-flight check, all behind the credential gate.
pub(crate) fn build_router(
    gate: Arc<CredentialGate>,
    storage: Arc<Storage>,
    body_limit: usize,
) -> Router {
    Router::new()
        .route("/", get(files::index).post(files::upload))
        .route("/download/{name}", get(files::download))
        .route("/verify-password", post(auth::verify_password))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn(auth::auth_middleware))
        .layer(middleware::from_fn(http::add_security_headers))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    let connect_ip = request
                        .extensions()
                        .get::<ConnectInfo<SocketAddr>>()
                        .map(|ConnectInfo(addr)| addr.ip());
                    let client_ip = resolve_client_ip(request.headers(), connect_ip)
                        .map(|ip| ip.to_string())
                        .unwrap_or_else(|| "unknown".to_string());

                    info_span!(
                        env!("CARGO_CRATE_NAME"),
                        client_ip,
                        method = ?request.method(),
                        path = ?request.uri().path(),
                    )
                })
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .layer(Extension(storage))
        .layer(Extension(gate))
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
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

    info!("Received termination signal shutting down");
    handle.graceful_shutdown(Some(Duration::from_secs(10)));
}
