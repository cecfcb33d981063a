use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;

use crate::units::Unit;

/// Kind of quantity a sensor measures.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "snake_case")]
pub enum SensorType {
    #[sea_orm(string_value = "temperature")]
    Temperature,
    #[sea_orm(string_value = "humidity")]
    Humidity,
    #[sea_orm(string_value = "pressure")]
    Pressure,
    #[sea_orm(string_value = "co2")]
    Co2,
    #[sea_orm(string_value = "pm25")]
    Pm25,
    #[sea_orm(string_value = "pm10")]
    Pm10,
    #[sea_orm(string_value = "no2")]
    No2,
    #[sea_orm(string_value = "o3")]
    O3,
    #[sea_orm(string_value = "noise")]
    Noise,
    #[sea_orm(string_value = "wind_speed")]
    WindSpeed,
    #[sea_orm(string_value = "rainfall")]
    Rainfall,
    #[sea_orm(string_value = "uv_index")]
    UvIndex,
}

impl SensorType {
    /// Canonical unit readings of this type are stored in unless the sensor says otherwise.
    pub fn default_unit(self) -> Unit {
        match self {
            SensorType::Temperature => Unit::Celsius,
            SensorType::Humidity => Unit::Percent,
            SensorType::Pressure => Unit::Hectopascal,
            SensorType::Co2 => Unit::Ppm,
            SensorType::Pm25 | SensorType::Pm10 => Unit::MicrogramPerCubicMetre,
            SensorType::No2 | SensorType::O3 => Unit::Ppb,
            SensorType::Noise => Unit::Decibel,
            SensorType::WindSpeed => Unit::MetrePerSecond,
            SensorType::Rainfall => Unit::Millimetre,
            SensorType::UvIndex => Unit::Index,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SensorType::Temperature => "temperature",
            SensorType::Humidity => "humidity",
            SensorType::Pressure => "pressure",
            SensorType::Co2 => "co2",
            SensorType::Pm25 => "pm25",
            SensorType::Pm10 => "pm10",
            SensorType::No2 => "no2",
            SensorType::O3 => "o3",
            SensorType::Noise => "noise",
            SensorType::WindSpeed => "wind_speed",
            SensorType::Rainfall => "rainfall",
            SensorType::UvIndex => "uv_index",
        }
    }
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "lowercase")]
pub enum SensorStatus {
    #[sea_orm(string_value = "active")]
    Active,
    #[sea_orm(string_value = "inactive")]
    Inactive,
    #[sea_orm(string_value = "faulty")]
    Faulty,
    #[sea_orm(string_value = "calibrating")]
    Calibrating,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, ToSchema)]
#[sea_orm(table_name = "sensor")]
#[schema(as = Sensor)]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub station_id: i32,
    pub sensor_type: SensorType,
    #[sea_orm(unique)]
    pub serial_number: String,
    pub model: Option<String>,
    pub unit: String,
    pub status: SensorStatus,
    pub min_range: Option<f64>,
    pub max_range: Option<f64>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub calibrated_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_reading_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Whether `value` lies within the sensor's physical measurement range.
    pub fn in_range(&self, value: f64) -> bool {
        self.min_range.is_none_or(|min| value >= min) && self.max_range.is_none_or(|max| value <= max)
    }
}
