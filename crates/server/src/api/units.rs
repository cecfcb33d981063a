//! Unit catalog and conversion.

use crate::error::{AppResult, ErrorBody};
use crate::units::{self, Dimension};
use axum::{Json, extract::Query};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::{router::OpenApiRouter, routes};

pub const UNITS_TAG: &str = "Units";

#[derive(Debug, Serialize, ToSchema)]
pub struct UnitGroup {
    pub dimension: Dimension,
    pub units: Vec<&'static str>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ConvertParams {
    pub value: f64,
    pub from: String,
    pub to: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ConversionResult {
    pub value: f64,
    pub from: String,
    pub to: String,
    pub result: f64,
}

pub fn router() -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(list_units))
        .routes(routes!(convert))
}

#[tracing::instrument]
#[utoipa::path(
    get,
    path = "",
    tag = UNITS_TAG,
    operation_id = "List Units",
    responses((status = 200, description = "Supported units grouped by dimension", body = [UnitGroup]))
)]
async fn list_units() -> Json<Vec<UnitGroup>> {
    Json(
        units::catalog()
            .into_iter()
            .map(|(dimension, units)| UnitGroup { dimension, units })
            .collect(),
    )
}

#[tracing::instrument]
#[utoipa::path(
    get,
    path = "/convert",
    tag = UNITS_TAG,
    operation_id = "Convert Value",
    params(ConvertParams),
    responses(
        (status = 200, description = "Converted value", body = ConversionResult),
        (status = 400, description = "Unknown unit or incompatible dimensions", body = ErrorBody),
    )
)]
async fn convert(Query(params): Query<ConvertParams>) -> AppResult<Json<ConversionResult>> {
    let result = units::convert_str(params.value, &params.from, &params.to)?;
    Ok(Json(ConversionResult {
        value: params.value,
        from: params.from,
        to: params.to,
        result,
    }))
}
