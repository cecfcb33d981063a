//! Alert thresholds per sensor type and severity.
//!
//! At most one threshold exists for each `(sensor_type, severity)` pair. A
//! reading violates a threshold when, converted into the threshold's unit, it
//! falls below `min_value` or above `max_value`. Values equal to a bound pass.

use crate::entity::sensor::SensorType;
use crate::entity::threshold::{self, Severity};
use crate::error::{AppError, AppResult};
use crate::sensors::resolve_unit;
use crate::units::{Unit, UnitError, convert};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use time::OffsetDateTime;
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewThreshold {
    pub sensor_type: SensorType,
    pub severity: Severity,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    /// Defaults to the canonical unit of the sensor type
    pub unit: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub description: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct ThresholdUpdate {
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub unit: Option<String>,
    pub is_active: Option<bool>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct ThresholdFilter {
    pub sensor_type: Option<SensorType>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct EvaluateRequest {
    pub sensor_type: SensorType,
    pub value: f64,
    /// Defaults to the canonical unit of the sensor type
    pub unit: Option<String>,
}

/// A threshold broken by a value.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ThresholdViolation {
    pub threshold: threshold::Model,
    /// The evaluated value expressed in the threshold's unit
    pub value: f64,
}

impl ThresholdViolation {
    pub fn describe(&self) -> String {
        let t = &self.threshold;
        let bound = match (t.min_value, t.max_value) {
            (Some(min), _) if self.value < min => format!("below minimum {min}"),
            (_, Some(max)) if self.value > max => format!("above maximum {max}"),
            _ => "outside limits".to_string(),
        };
        format!(
            "{} {} {:.2} {} is {}",
            t.severity.as_str(),
            t.sensor_type.as_str(),
            self.value,
            t.unit,
            bound
        )
    }
}

pub fn validate_bounds(min: Option<f64>, max: Option<f64>) -> AppResult<()> {
    match (min, max) {
        (None, None) => Err(AppError::bad_request(
            "A threshold needs at least one of min_value or max_value",
        )),
        (Some(min), Some(max)) if min >= max => Err(AppError::bad_request(format!(
            "min_value {min} must be lower than max_value {max}"
        ))),
        _ => Ok(()),
    }
}

/// Active thresholds among `thresholds` violated by `value`, most severe first.
pub fn find_violations(
    thresholds: &[threshold::Model],
    value: f64,
    unit: Unit,
) -> Result<Vec<ThresholdViolation>, UnitError> {
    let mut violations = Vec::new();
    for t in thresholds.iter().filter(|t| t.is_active) {
        let threshold_unit: Unit = t.unit.parse()?;
        let converted = convert(value, unit, threshold_unit)?;
        if t.is_violated_by(converted) {
            violations.push(ThresholdViolation {
                threshold: t.clone(),
                value: converted,
            });
        }
    }
    violations.sort_by(|a, b| b.threshold.severity.cmp(&a.threshold.severity));
    Ok(violations)
}

pub struct ThresholdService {
    db: Arc<DatabaseConnection>,
}

impl ThresholdService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[tracing::instrument(skip(self, new), fields(sensor_type = new.sensor_type.as_str(), severity = new.severity.as_str()))]
    pub async fn create(&self, new: NewThreshold) -> AppResult<threshold::Model> {
        validate_bounds(new.min_value, new.max_value)?;
        let unit = resolve_unit(new.sensor_type, new.unit.as_deref())?;

        let existing = threshold::Entity::find()
            .filter(threshold::Column::SensorType.eq(new.sensor_type))
            .filter(threshold::Column::Severity.eq(new.severity))
            .one(self.db.as_ref())
            .await?;
        if existing.is_some() {
            return Err(AppError::conflict(format!(
                "A {} threshold for {} already exists",
                new.severity.as_str(),
                new.sensor_type.as_str()
            )));
        }

        let now = OffsetDateTime::now_utc();
        Ok(threshold::ActiveModel {
            sensor_type: Set(new.sensor_type),
            severity: Set(new.severity),
            min_value: Set(new.min_value),
            max_value: Set(new.max_value),
            unit: Set(unit.symbol().to_string()),
            is_active: Set(new.is_active),
            description: Set(new.description),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await?)
    }

    pub async fn get(&self, id: i32) -> AppResult<threshold::Model> {
        threshold::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| AppError::not_found(format!("Threshold {id} not found")))
    }

    pub async fn list(&self, filter: &ThresholdFilter) -> AppResult<Vec<threshold::Model>> {
        let mut query = threshold::Entity::find();
        if let Some(sensor_type) = filter.sensor_type {
            query = query.filter(threshold::Column::SensorType.eq(sensor_type));
        }
        if let Some(is_active) = filter.is_active {
            query = query.filter(threshold::Column::IsActive.eq(is_active));
        }
        Ok(query
            .order_by_asc(threshold::Column::SensorType)
            .order_by_asc(threshold::Column::Id)
            .all(self.db.as_ref())
            .await?)
    }

    #[tracing::instrument(skip(self, update))]
    pub async fn update(&self, id: i32, update: ThresholdUpdate) -> AppResult<threshold::Model> {
        let existing = self.get(id).await?;
        validate_bounds(
            update.min_value.or(existing.min_value),
            update.max_value.or(existing.max_value),
        )?;
        let sensor_type = existing.sensor_type;
        let mut active: threshold::ActiveModel = existing.into();
        if update.min_value.is_some() {
            active.min_value = Set(update.min_value);
        }
        if update.max_value.is_some() {
            active.max_value = Set(update.max_value);
        }
        if let Some(unit) = update.unit {
            let unit = resolve_unit(sensor_type, Some(&unit))?;
            active.unit = Set(unit.symbol().to_string());
        }
        if let Some(is_active) = update.is_active {
            active.is_active = Set(is_active);
        }
        if update.description.is_some() {
            active.description = Set(update.description);
        }
        active.updated_at = Set(OffsetDateTime::now_utc());
        Ok(active.update(self.db.as_ref()).await?)
    }

    pub async fn delete(&self, id: i32) -> AppResult<()> {
        let result = threshold::Entity::delete_by_id(id)
            .exec(self.db.as_ref())
            .await?;
        if result.rows_affected == 0 {
            return Err(AppError::not_found(format!("Threshold {id} not found")));
        }
        Ok(())
    }

    /// Violated active thresholds for `sensor_type`, ordered by severity descending.
    #[tracing::instrument(skip(self))]
    pub async fn evaluate(
        &self,
        sensor_type: SensorType,
        value: f64,
        unit: Unit,
    ) -> AppResult<Vec<ThresholdViolation>> {
        let thresholds = threshold::Entity::find()
            .filter(threshold::Column::SensorType.eq(sensor_type))
            .filter(threshold::Column::IsActive.eq(true))
            .all(self.db.as_ref())
            .await?;
        Ok(find_violations(&thresholds, value, unit)?)
    }
}
