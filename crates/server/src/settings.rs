//! Runtime settings stored as JSON values keyed by dotted names.
//!
//! Services read settings through the typed getters, which fall back to the
//! supplied default when a key is missing or holds a value of the wrong shape.

use crate::error::{AppError, AppResult};
use crate::entity::settings;
use sea_orm::{ActiveModelTrait, ActiveValue::Set, DatabaseConnection, EntityTrait, QueryOrder};
use serde::Serialize;
use serde_json::{Value, json};
use std::ops::RangeInclusive;
use std::sync::Arc;
use time::OffsetDateTime;
use utoipa::ToSchema;

pub const EMAIL_ENABLED: &str = "notifications.email_enabled";
pub const ALERTS_AUTO_RESOLVE: &str = "alerts.auto_resolve";
pub const ALERTS_ANOMALY_ALERTS: &str = "alerts.anomaly_alerts";
pub const READINGS_ANOMALY_ZSCORE: &str = "readings.anomaly_zscore";
pub const READINGS_ANOMALY_WINDOW: &str = "readings.anomaly_window";
pub const SENSORS_OFFLINE_AFTER_MINUTES: &str = "sensors.offline_after_minutes";
pub const MAINTENANCE_OVERDUE_GRACE_MINUTES: &str = "maintenance.overdue_grace_minutes";

/// Accepted range for the minute based settings (up to one year).
pub const MINUTES_SETTING_RANGE: RangeInclusive<i64> = 0..=525_600;
/// Accepted range for `readings.anomaly_window`.
pub const ANOMALY_WINDOW_RANGE: RangeInclusive<i64> = 2..=1_000;

/// Built-in settings seeded on startup: `(key, value, description)`.
pub fn defaults() -> Vec<(&'static str, Value, &'static str)> {
    vec![
        (
            EMAIL_ENABLED,
            json!(true),
            "Send notification emails when SMTP is configured",
        ),
        (
            ALERTS_AUTO_RESOLVE,
            json!(true),
            "Resolve threshold alerts once readings are back within limits",
        ),
        (
            ALERTS_ANOMALY_ALERTS,
            json!(false),
            "Open an alert for every anomalous reading",
        ),
        (
            READINGS_ANOMALY_ZSCORE,
            json!(3.0),
            "Z-score above which a reading is flagged as an anomaly",
        ),
        (
            READINGS_ANOMALY_WINDOW,
            json!(20),
            "Number of previous readings used for anomaly detection",
        ),
        (
            SENSORS_OFFLINE_AFTER_MINUTES,
            json!(30),
            "Minutes without readings before an active sensor is reported offline",
        ),
        (
            MAINTENANCE_OVERDUE_GRACE_MINUTES,
            json!(60),
            "Minutes after the scheduled time before maintenance is marked overdue",
        ),
    ]
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SettingDto {
    pub key: String,
    #[schema(value_type = Object)]
    pub value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<i32>,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl From<settings::Model> for SettingDto {
    fn from(model: settings::Model) -> Self {
        let value = serde_json::from_str(&model.value).unwrap_or(Value::String(model.value));
        Self {
            key: model.key,
            value,
            description: model.description,
            updated_by: model.updated_by,
            updated_at: model.updated_at,
        }
    }
}

/// Keys are lowercase dotted identifiers, e.g. `alerts.auto_resolve`.
pub fn validate_key(key: &str) -> AppResult<()> {
    let valid = !key.is_empty()
        && key.len() <= 128
        && key
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(AppError::bad_request(format!(
            "Invalid setting key '{key}': use lowercase letters, digits, '.', '_' or '-'"
        )))
    }
}

pub struct SettingsService {
    db: Arc<DatabaseConnection>,
}

impl SettingsService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Insert any built-in setting that does not exist yet. Existing values are kept.
    #[tracing::instrument(skip(self))]
    pub async fn seed_defaults(&self) -> Result<u64, sea_orm::DbErr> {
        let now = OffsetDateTime::now_utc();
        let mut inserted = 0;
        for (key, value, description) in defaults() {
            if settings::Entity::find_by_id(key)
                .one(self.db.as_ref())
                .await?
                .is_some()
            {
                continue;
            }
            settings::ActiveModel {
                key: Set(key.to_string()),
                value: Set(value.to_string()),
                description: Set(Some(description.to_string())),
                updated_by: Set(None),
                updated_at: Set(now),
            }
            .insert(self.db.as_ref())
            .await?;
            inserted += 1;
        }
        if inserted > 0 {
            tracing::info!(
                name = "settings.seed.completed",
                target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                inserted = inserted,
                message = "Seeded default settings"
            );
        }
        Ok(inserted)
    }

    pub async fn list(&self) -> AppResult<Vec<SettingDto>> {
        let rows = settings::Entity::find()
            .order_by_asc(settings::Column::Key)
            .all(self.db.as_ref())
            .await?;
        Ok(rows.into_iter().map(SettingDto::from).collect())
    }

    pub async fn get(&self, key: &str) -> AppResult<SettingDto> {
        settings::Entity::find_by_id(key)
            .one(self.db.as_ref())
            .await?
            .map(SettingDto::from)
            .ok_or_else(|| AppError::not_found(format!("Setting '{key}' not found")))
    }

    /// Create or replace a setting.
    #[tracing::instrument(skip(self, value))]
    pub async fn set(
        &self,
        key: &str,
        value: Value,
        description: Option<String>,
        updated_by: Option<i32>,
    ) -> AppResult<SettingDto> {
        validate_key(key)?;
        let now = OffsetDateTime::now_utc();
        let existing = settings::Entity::find_by_id(key)
            .one(self.db.as_ref())
            .await?;
        let model = match existing {
            Some(row) => {
                let keep_description = row.description.clone();
                let mut active: settings::ActiveModel = row.into();
                active.value = Set(value.to_string());
                active.description = Set(description.or(keep_description));
                active.updated_by = Set(updated_by);
                active.updated_at = Set(now);
                active.update(self.db.as_ref()).await?
            }
            None => {
                settings::ActiveModel {
                    key: Set(key.to_string()),
                    value: Set(value.to_string()),
                    description: Set(description),
                    updated_by: Set(updated_by),
                    updated_at: Set(now),
                }
                .insert(self.db.as_ref())
                .await?
            }
        };
        tracing::info!(
            name = "settings.set.completed",
            target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
            key = %key,
            message = "Setting updated"
        );
        Ok(model.into())
    }

    pub async fn delete(&self, key: &str) -> AppResult<()> {
        let result = settings::Entity::delete_by_id(key)
            .exec(self.db.as_ref())
            .await?;
        if result.rows_affected == 0 {
            return Err(AppError::not_found(format!("Setting '{key}' not found")));
        }
        Ok(())
    }

    /// Raw JSON value; lookup errors are logged and treated as missing.
    pub async fn get_value(&self, key: &str) -> Option<Value> {
        match settings::Entity::find_by_id(key).one(self.db.as_ref()).await {
            Ok(row) => row.and_then(|r| serde_json::from_str(&r.value).ok()),
            Err(e) => {
                tracing::warn!(
                    name = "settings.lookup.failed",
                    target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                    key = %key,
                    error = %e,
                    message = "Failed to read setting, using fallback"
                );
                None
            }
        }
    }

    pub async fn get_bool(&self, key: &str, fallback: bool) -> bool {
        self.get_value(key)
            .await
            .and_then(|v| v.as_bool())
            .unwrap_or(fallback)
    }

    pub async fn get_f64(&self, key: &str, fallback: f64) -> f64 {
        self.get_value(key)
            .await
            .and_then(|v| v.as_f64())
            .unwrap_or(fallback)
    }

    pub async fn get_i64(&self, key: &str, fallback: i64) -> i64 {
        self.get_value(key)
            .await
            .and_then(|v| v.as_i64())
            .unwrap_or(fallback)
    }

    /// Like [`Self::get_i64`], but values outside `range` also yield `fallback`.
    pub async fn get_i64_within(
        &self,
        key: &str,
        fallback: i64,
        range: RangeInclusive<i64>,
    ) -> i64 {
        let value = self.get_i64(key, fallback).await;
        if range.contains(&value) {
            return value;
        }
        tracing::warn!(
            name = "settings.value.out_of_range",
            target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
            key = %key,
            value,
            min = *range.start(),
            max = *range.end(),
            message = "Setting outside supported range, using fallback"
        );
        fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setting_keys() {
        assert!(validate_key("alerts.auto_resolve").is_ok());
        assert!(validate_key("a-b_c.1").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("Alerts.Auto").is_err());
        assert!(validate_key("with space").is_err());
    }

    #[test]
    fn defaults_are_unique_and_valid() {
        let defaults = defaults();
        for (key, _, _) in &defaults {
            assert!(validate_key(key).is_ok(), "{key}");
        }
        let mut keys: Vec<_> = defaults.iter().map(|(k, _, _)| *k).collect();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), defaults.len());
    }

    #[test]
    fn dto_falls_back_to_string_for_invalid_json() {
        let dto = SettingDto::from(settings::Model {
            key: "x".into(),
            value: "not json".into(),
            description: None,
            updated_by: None,
            updated_at: OffsetDateTime::UNIX_EPOCH,
        });
        assert_eq!(dto.value, Value::String("not json".into()));
    }
}
