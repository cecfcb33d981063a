//! HTTP API.
//!
//! Every resource lives in its own submodule exposing a `router()` that is
//! nested under `/api/<resource>`. `/healthz` and `/metrics` sit at the root
//! and the generated OpenAPI document is served by Redoc at `/api-docs`.

pub mod alerts;
pub mod auth;
pub mod backups;
pub mod exports;
pub mod health;
pub mod maintenance;
pub mod metrics;
pub mod notifications;
pub mod openapi;
pub mod readings;
pub mod sensors;
pub mod settings;
pub mod stations;
pub mod system;
pub mod thresholds;
pub mod units;
pub mod users;

pub use auth::{CurrentUser, SessionAuth};
pub use backups::BackupAppState;
pub use health::MISC_TAG;

use crate::AppResources;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_axum::{router::OpenApiRouter, routes};
use utoipa_redoc::{Redoc, Servable};

/// Builds the full application router including the Redoc UI.
pub fn build_router(app_resources: AppResources, backup_state: BackupAppState) -> axum::Router {
    let (router, api) = OpenApiRouter::with_openapi(openapi::ApiDoc::openapi())
        .nest("/api/auth", auth::router())
        .nest("/api/users", users::router())
        .nest("/api/stations", stations::router())
        .nest("/api/sensors", sensors::router())
        .nest("/api/readings", readings::router())
        .nest("/api/thresholds", thresholds::router())
        .nest("/api/alerts", alerts::router())
        .nest("/api/maintenance", maintenance::router())
        .nest("/api/notifications", notifications::router())
        .nest("/api/exports", exports::router())
        .nest("/api/backups", backups::router(backup_state))
        .nest("/api/settings", settings::router())
        .nest("/api/system", system::router())
        .nest("/api/units", units::router())
        .routes(routes!(metrics::metrics))
        .routes(routes!(health::health))
        .layer(axum::Extension(app_resources))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .split_for_parts();

    router.merge(Redoc::with_url("/api-docs", api))
}

/// Starts the web server with all configured routes.
#[tracing::instrument(skip(app_resources, backup_state))]
pub async fn start_webserver(
    app_resources: AppResources,
    backup_state: BackupAppState,
) -> color_eyre::Result<()> {
    let bind_address = app_resources.config.bind_address.clone();
    let task_manager = backup_state.task_manager.clone();
    let router = build_router(app_resources, backup_state);

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    tracing::info!(
        name = "api.server.started",
        target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
        addr = %bind_address,
        message = "Server running"
    );
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| color_eyre::Report::msg(format!("Failed to start server: {e}")))?;

    // Stop running backup jobs before the runtime goes away.
    task_manager.cancel_all().await;
    tracing::info!(
        name = "api.server.stopped",
        target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
        message = "Server stopped"
    );
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(
            name = "api.server.signal_failed",
            target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
            error = %e,
            message = "Failed to listen for shutdown signal"
        );
        std::future::pending::<()>().await;
    }
    tracing::info!(
        name = "api.server.shutdown",
        target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
        message = "Shutdown signal received"
    );
}
