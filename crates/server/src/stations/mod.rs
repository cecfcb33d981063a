//! Monitoring stations.

pub mod stats;

pub use stats::MonitoringStationStatsService;

use crate::entity::monitoring_station::{self, StationStatus};
use crate::entity::{maintenance_schedule, sensor, sensor_reading, station_alert};
use crate::error::{AppError, AppResult};
use crate::pagination::{Page, PageParams, paginate};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, Condition, DatabaseConnection, EntityTrait,
    QueryFilter, QueryOrder, TransactionTrait,
};
use serde::Deserialize;
use std::sync::Arc;
use time::OffsetDateTime;
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewStation {
    pub code: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub elevation: Option<f64>,
    pub description: Option<String>,
    #[serde(default = "default_status")]
    pub status: StationStatus,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub installed_at: Option<OffsetDateTime>,
}

fn default_status() -> StationStatus {
    StationStatus::Active
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct StationUpdate {
    pub code: Option<String>,
    pub name: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub elevation: Option<f64>,
    pub description: Option<String>,
    pub status: Option<StationStatus>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub installed_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct StationFilter {
    pub status: Option<StationStatus>,
    /// Substring of the station name or code
    pub q: Option<String>,
}

pub fn validate_coordinates(latitude: f64, longitude: f64) -> AppResult<()> {
    if !(-90.0..=90.0).contains(&latitude) {
        return Err(AppError::bad_request(format!(
            "Latitude {latitude} is outside [-90, 90]"
        )));
    }
    if !(-180.0..=180.0).contains(&longitude) {
        return Err(AppError::bad_request(format!(
            "Longitude {longitude} is outside [-180, 180]"
        )));
    }
    Ok(())
}

fn normalize_code(code: &str) -> AppResult<String> {
    let code = code.trim().to_uppercase();
    if code.is_empty() {
        return Err(AppError::bad_request("Station code cannot be empty"));
    }
    Ok(code)
}

pub struct StationsService {
    db: Arc<DatabaseConnection>,
}

impl StationsService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    async fn ensure_code_free(&self, code: &str, except: Option<i32>) -> AppResult<()> {
        let mut query =
            monitoring_station::Entity::find().filter(monitoring_station::Column::Code.eq(code));
        if let Some(id) = except {
            query = query.filter(monitoring_station::Column::Id.ne(id));
        }
        if query.one(self.db.as_ref()).await?.is_some() {
            return Err(AppError::conflict(format!("Station code '{code}' is already in use")));
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, new), fields(code = %new.code))]
    pub async fn create(&self, new: NewStation) -> AppResult<monitoring_station::Model> {
        let code = normalize_code(&new.code)?;
        let name = new.name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::bad_request("Station name cannot be empty"));
        }
        validate_coordinates(new.latitude, new.longitude)?;
        self.ensure_code_free(&code, None).await?;

        let now = OffsetDateTime::now_utc();
        let station = monitoring_station::ActiveModel {
            code: Set(code),
            name: Set(name),
            latitude: Set(new.latitude),
            longitude: Set(new.longitude),
            elevation: Set(new.elevation),
            description: Set(new.description),
            status: Set(new.status),
            installed_at: Set(new.installed_at),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await?;
        tracing::info!(
            name = "stations.create.completed",
            target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
            station_id = station.id,
            code = %station.code,
            message = "Station created"
        );
        Ok(station)
    }

    pub async fn get(&self, id: i32) -> AppResult<monitoring_station::Model> {
        monitoring_station::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| AppError::not_found(format!("Station {id} not found")))
    }

    pub async fn list(
        &self,
        filter: &StationFilter,
        page: PageParams,
    ) -> AppResult<Page<monitoring_station::Model>> {
        let mut query = monitoring_station::Entity::find();
        if let Some(status) = filter.status {
            query = query.filter(monitoring_station::Column::Status.eq(status));
        }
        if let Some(q) = filter.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
            query = query.filter(
                Condition::any()
                    .add(monitoring_station::Column::Name.contains(q))
                    .add(monitoring_station::Column::Code.contains(q.to_uppercase())),
            );
        }
        let query = query.order_by_asc(monitoring_station::Column::Code);
        Ok(paginate(query, self.db.as_ref(), page).await?)
    }

    #[tracing::instrument(skip(self, update))]
    pub async fn update(
        &self,
        id: i32,
        update: StationUpdate,
    ) -> AppResult<monitoring_station::Model> {
        let existing = self.get(id).await?;
        validate_coordinates(
            update.latitude.unwrap_or(existing.latitude),
            update.longitude.unwrap_or(existing.longitude),
        )?;

        let mut active: monitoring_station::ActiveModel = existing.into();
        if let Some(code) = update.code {
            let code = normalize_code(&code)?;
            self.ensure_code_free(&code, Some(id)).await?;
            active.code = Set(code);
        }
        if let Some(name) = update.name {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(AppError::bad_request("Station name cannot be empty"));
            }
            active.name = Set(name);
        }
        if let Some(latitude) = update.latitude {
            active.latitude = Set(latitude);
        }
        if let Some(longitude) = update.longitude {
            active.longitude = Set(longitude);
        }
        if update.elevation.is_some() {
            active.elevation = Set(update.elevation);
        }
        if update.description.is_some() {
            active.description = Set(update.description);
        }
        if let Some(status) = update.status {
            active.status = Set(status);
        }
        if update.installed_at.is_some() {
            active.installed_at = Set(update.installed_at);
        }
        active.updated_at = Set(OffsetDateTime::now_utc());
        Ok(active.update(self.db.as_ref()).await?)
    }

    /// Delete a station together with its sensors, readings, alerts and maintenance.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, id: i32) -> AppResult<()> {
        let station = self.get(id).await?;
        let txn = self.db.begin().await?;
        sensor_reading::Entity::delete_many()
            .filter(sensor_reading::Column::StationId.eq(id))
            .exec(&txn)
            .await?;
        station_alert::Entity::delete_many()
            .filter(station_alert::Column::StationId.eq(id))
            .exec(&txn)
            .await?;
        maintenance_schedule::Entity::delete_many()
            .filter(maintenance_schedule::Column::StationId.eq(id))
            .exec(&txn)
            .await?;
        sensor::Entity::delete_many()
            .filter(sensor::Column::StationId.eq(id))
            .exec(&txn)
            .await?;
        monitoring_station::Entity::delete_by_id(id).exec(&txn).await?;
        txn.commit().await?;
        tracing::info!(
            name = "stations.delete.completed",
            target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
            station_id = id,
            code = %station.code,
            message = "Station deleted with its sensors and history"
        );
        Ok(())
    }

    /// Set the station status without touching other fields.
    pub async fn set_status(&self, id: i32, status: StationStatus) -> AppResult<()> {
        let existing = self.get(id).await?;
        if existing.status == status {
            return Ok(());
        }
        let mut active: monitoring_station::ActiveModel = existing.into();
        active.status = Set(status);
        active.updated_at = Set(OffsetDateTime::now_utc());
        active.update(self.db.as_ref()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinate_bounds() {
        assert!(validate_coordinates(0.0, 0.0).is_ok());
        assert!(validate_coordinates(90.0, -180.0).is_ok());
        assert!(validate_coordinates(-90.0, 180.0).is_ok());
        assert!(validate_coordinates(90.1, 0.0).is_err());
        assert!(validate_coordinates(0.0, -180.5).is_err());
        assert!(validate_coordinates(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn codes_are_trimmed_and_uppercased() {
        assert_eq!(normalize_code("  st-01 ").unwrap(), "ST-01");
        assert!(normalize_code("   ").is_err());
    }
}
