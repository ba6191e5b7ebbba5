use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use medintake_core::clock::SystemClock;
use medintake_core::otp::delivery::LoggingDelivery;
use medintake_core::payment::processor::SimulatedProcessor;
use medintake_core::reference::ReferenceData;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use medintake_api::background::sweeper;
use medintake_api::config::ServerConfig;
use medintake_api::router::build_app_router;
use medintake_api::state::{AppState, Collaborators};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "medintake_api=debug,medintake_core=info,tower_http=debug".into()
            }),
        )
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(tracing_subscriber::fmt::layer))
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(
        host = %config.host,
        port = %config.port,
        cors_origins = config.cors_origins.len(),
        trust_proxy_headers = config.trust_proxy_headers,
        "Loaded server configuration"
    );

    // --- Services ---
    let collaborators = Collaborators {
        delivery: Arc::new(LoggingDelivery),
        processor: Arc::new(SimulatedProcessor),
        reference: Arc::new(ReferenceData::swiss_defaults()),
    };
    let state = AppState::build(config.clone(), Arc::new(SystemClock), collaborators)
        .expect("Failed to initialise services");
    tracing::info!("Security services initialised");

    // --- Expiry sweeper ---
    let sweep_cancel = CancellationToken::new();
    let sweep_handle = tokio::spawn(sweeper::run(
        state.clone(),
        Duration::from_secs(config.sweep_interval_secs.max(1)),
        sweep_cancel.clone(),
    ));

    // --- Router ---
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    // Connect info feeds the client IP when proxy headers are not trusted.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    sweep_cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), sweep_handle).await;
    tracing::info!("Expiry sweeper stopped");

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
