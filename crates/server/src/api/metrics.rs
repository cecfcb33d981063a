//! Prometheus metrics endpoint.

use crate::AppResources;
use crate::api::health::MISC_TAG;
use axum::http::StatusCode;

#[tracing::instrument(skip(resources))]
#[utoipa::path(
    get,
    path = "/metrics",
    tag = MISC_TAG,
    operation_id = "Prometheus Metrics",
    responses(
        (status = 200, description = "Prometheus metrics in text exposition format", body = String, content_type = "text/plain"),
        (status = 404, description = "Metrics disabled via configuration"),
        (status = 500, description = "Metrics could not be collected")
    )
)]
pub async fn metrics(
    axum::Extension(resources): axum::Extension<AppResources>,
) -> (StatusCode, String) {
    if !resources.config.metrics.enabled {
        return (StatusCode::NOT_FOUND, String::new());
    }
    match crate::metrics::build_prometheus_metrics_cached(&resources).await {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => {
            tracing::error!(
                name = "api.metrics.failed",
                target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                error = %e,
                message = "Failed to build Prometheus metrics"
            );
            (StatusCode::INTERNAL_SERVER_ERROR, String::new())
        }
    }
}
