//! Liveness probe.

/// Tag for OpenAPI documentation.
pub const MISC_TAG: &str = "Miscellaneous";

/// Liveness probe. Does not touch the database; use `/api/system/health` for
/// a readiness check.
#[tracing::instrument()]
#[utoipa::path(
    method(get, head),
    path = "/healthz",
    tag = MISC_TAG,
    operation_id = "Liveness Check",
    summary = "Process liveness check",
    description = "Returns `ok` as long as the process accepts requests.\n\n\
                   Supports both GET and HEAD for load balancers and orchestrator probes.",
    responses(
        (status = 200, description = "Process is alive", body = str, content_type = "text/plain", example = "ok")
    )
)]
pub async fn health() -> &'static str {
    "ok"
}
