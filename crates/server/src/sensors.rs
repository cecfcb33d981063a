//! Sensors attached to monitoring stations.

use crate::entity::monitoring_station;
use crate::entity::sensor::{self, SensorStatus, SensorType};
use crate::entity::{sensor_reading, station_alert};
use crate::error::{AppError, AppResult};
use crate::pagination::{Page, PageParams, paginate};
use crate::units::Unit;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, TransactionTrait,
};
use serde::Deserialize;
use std::sync::Arc;
use time::OffsetDateTime;
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewSensor {
    pub station_id: i32,
    pub sensor_type: SensorType,
    pub serial_number: String,
    pub model: Option<String>,
    /// Defaults to the canonical unit of the sensor type
    pub unit: Option<String>,
    #[serde(default = "default_status")]
    pub status: SensorStatus,
    pub min_range: Option<f64>,
    pub max_range: Option<f64>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub calibrated_at: Option<OffsetDateTime>,
}

fn default_status() -> SensorStatus {
    SensorStatus::Active
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct SensorUpdate {
    pub serial_number: Option<String>,
    pub model: Option<String>,
    pub unit: Option<String>,
    pub status: Option<SensorStatus>,
    pub min_range: Option<f64>,
    pub max_range: Option<f64>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub calibrated_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct SensorFilter {
    pub station_id: Option<i32>,
    pub sensor_type: Option<SensorType>,
    pub status: Option<SensorStatus>,
}

/// Parse `unit` and make sure it measures the same quantity as the sensor type.
pub fn resolve_unit(sensor_type: SensorType, unit: Option<&str>) -> AppResult<Unit> {
    let default = sensor_type.default_unit();
    let Some(unit) = unit else {
        return Ok(default);
    };
    let parsed: Unit = unit.parse()?;
    if parsed.dimension() != default.dimension() {
        return Err(AppError::bad_request(format!(
            "Unit '{parsed}' cannot measure {}",
            sensor_type.as_str()
        )));
    }
    Ok(parsed)
}

pub fn validate_range(min: Option<f64>, max: Option<f64>) -> AppResult<()> {
    if let (Some(min), Some(max)) = (min, max) {
        if min > max {
            return Err(AppError::bad_request(format!(
                "min_range {min} is greater than max_range {max}"
            )));
        }
    }
    Ok(())
}

pub struct SensorsService {
    db: Arc<DatabaseConnection>,
}

impl SensorsService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    async fn ensure_serial_free(&self, serial: &str, except: Option<i32>) -> AppResult<()> {
        let mut query = sensor::Entity::find().filter(sensor::Column::SerialNumber.eq(serial));
        if let Some(id) = except {
            query = query.filter(sensor::Column::Id.ne(id));
        }
        if query.one(self.db.as_ref()).await?.is_some() {
            return Err(AppError::conflict(format!(
                "Serial number '{serial}' is already registered"
            )));
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, new), fields(station_id = new.station_id))]
    pub async fn create(&self, new: NewSensor) -> AppResult<sensor::Model> {
        monitoring_station::Entity::find_by_id(new.station_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| AppError::bad_request(format!("Station {} does not exist", new.station_id)))?;

        let serial = new.serial_number.trim().to_string();
        if serial.is_empty() {
            return Err(AppError::bad_request("Serial number cannot be empty"));
        }
        let unit = resolve_unit(new.sensor_type, new.unit.as_deref())?;
        validate_range(new.min_range, new.max_range)?;
        self.ensure_serial_free(&serial, None).await?;

        let now = OffsetDateTime::now_utc();
        let created = sensor::ActiveModel {
            station_id: Set(new.station_id),
            sensor_type: Set(new.sensor_type),
            serial_number: Set(serial),
            model: Set(new.model),
            unit: Set(unit.symbol().to_string()),
            status: Set(new.status),
            min_range: Set(new.min_range),
            max_range: Set(new.max_range),
            calibrated_at: Set(new.calibrated_at),
            last_reading_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await?;
        tracing::info!(
            name = "sensors.create.completed",
            target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
            sensor_id = created.id,
            sensor_type = created.sensor_type.as_str(),
            message = "Sensor created"
        );
        Ok(created)
    }

    pub async fn get(&self, id: i32) -> AppResult<sensor::Model> {
        sensor::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| AppError::not_found(format!("Sensor {id} not found")))
    }

    pub async fn list(
        &self,
        filter: &SensorFilter,
        page: PageParams,
    ) -> AppResult<Page<sensor::Model>> {
        let mut query = sensor::Entity::find();
        if let Some(station_id) = filter.station_id {
            query = query.filter(sensor::Column::StationId.eq(station_id));
        }
        if let Some(sensor_type) = filter.sensor_type {
            query = query.filter(sensor::Column::SensorType.eq(sensor_type));
        }
        if let Some(status) = filter.status {
            query = query.filter(sensor::Column::Status.eq(status));
        }
        let query = query.order_by_asc(sensor::Column::Id);
        Ok(paginate(query, self.db.as_ref(), page).await?)
    }

    #[tracing::instrument(skip(self, update))]
    pub async fn update(&self, id: i32, update: SensorUpdate) -> AppResult<sensor::Model> {
        let existing = self.get(id).await?;
        validate_range(
            update.min_range.or(existing.min_range),
            update.max_range.or(existing.max_range),
        )?;
        let sensor_type = existing.sensor_type;

        let mut active: sensor::ActiveModel = existing.into();
        if let Some(serial) = update.serial_number {
            let serial = serial.trim().to_string();
            if serial.is_empty() {
                return Err(AppError::bad_request("Serial number cannot be empty"));
            }
            self.ensure_serial_free(&serial, Some(id)).await?;
            active.serial_number = Set(serial);
        }
        if update.model.is_some() {
            active.model = Set(update.model);
        }
        if let Some(unit) = update.unit {
            let unit = resolve_unit(sensor_type, Some(&unit))?;
            active.unit = Set(unit.symbol().to_string());
        }
        if let Some(status) = update.status {
            active.status = Set(status);
        }
        if update.min_range.is_some() {
            active.min_range = Set(update.min_range);
        }
        if update.max_range.is_some() {
            active.max_range = Set(update.max_range);
        }
        if update.calibrated_at.is_some() {
            active.calibrated_at = Set(update.calibrated_at);
        }
        active.updated_at = Set(OffsetDateTime::now_utc());
        Ok(active.update(self.db.as_ref()).await?)
    }

    /// Delete a sensor and its readings and alerts.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, id: i32) -> AppResult<()> {
        self.get(id).await?;
        let txn = self.db.begin().await?;
        sensor_reading::Entity::delete_many()
            .filter(sensor_reading::Column::SensorId.eq(id))
            .exec(&txn)
            .await?;
        station_alert::Entity::delete_many()
            .filter(station_alert::Column::SensorId.eq(id))
            .exec(&txn)
            .await?;
        sensor::Entity::delete_by_id(id).exec(&txn).await?;
        txn.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_defaults_to_sensor_type() {
        assert_eq!(resolve_unit(SensorType::Pressure, None).unwrap(), Unit::Hectopascal);
        assert_eq!(
            resolve_unit(SensorType::Temperature, Some("°F")).unwrap(),
            Unit::Fahrenheit
        );
    }

    #[test]
    fn unit_must_match_sensor_dimension() {
        assert!(resolve_unit(SensorType::Temperature, Some("hpa")).is_err());
        assert!(resolve_unit(SensorType::Temperature, Some("parsecs")).is_err());
    }

    #[test]
    fn range_ordering() {
        assert!(validate_range(Some(-40.0), Some(85.0)).is_ok());
        assert!(validate_range(Some(5.0), Some(5.0)).is_ok());
        assert!(validate_range(None, Some(1.0)).is_ok());
        assert!(validate_range(Some(10.0), Some(1.0)).is_err());
    }
}
