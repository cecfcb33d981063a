//! Runtime settings: seeding, overrides and typed lookups.

mod common;

use common::create_test_db;
use envmon::error::AppError;
use envmon::settings::{
    ALERTS_AUTO_RESOLVE, MINUTES_SETTING_RANGE, READINGS_ANOMALY_WINDOW, READINGS_ANOMALY_ZSCORE,
    SENSORS_OFFLINE_AFTER_MINUTES, SettingsService, defaults,
};
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn test_seed_defaults_is_idempotent() {
    let settings = SettingsService::new(Arc::new(create_test_db().await));

    let inserted = settings.seed_defaults().await.expect("seed");
    assert_eq!(inserted as usize, defaults().len());
    assert_eq!(settings.seed_defaults().await.expect("reseed"), 0);
    assert_eq!(settings.list().await.expect("list").len(), defaults().len());
}

#[tokio::test]
async fn test_seed_keeps_overrides() {
    let settings = SettingsService::new(Arc::new(create_test_db().await));
    settings
        .set(ALERTS_AUTO_RESOLVE, json!(false), None, None)
        .await
        .expect("set");
    settings.seed_defaults().await.expect("seed");

    assert!(!settings.get_bool(ALERTS_AUTO_RESOLVE, true).await);
    let dto = settings.get(ALERTS_AUTO_RESOLVE).await.expect("get");
    assert_eq!(dto.value, json!(false));
}

#[tokio::test]
async fn test_typed_getters_fall_back() {
    let settings = SettingsService::new(Arc::new(create_test_db().await));
    settings.seed_defaults().await.expect("seed");

    assert_eq!(settings.get_f64(READINGS_ANOMALY_ZSCORE, 1.0).await, 3.0);
    assert_eq!(settings.get_i64(READINGS_ANOMALY_WINDOW, 5).await, 20);
    assert_eq!(settings.get_i64("does.not.exist", 5).await, 5);

    // Wrong shape falls back as well
    settings
        .set(READINGS_ANOMALY_WINDOW, json!("twenty"), None, None)
        .await
        .expect("set");
    assert_eq!(settings.get_i64(READINGS_ANOMALY_WINDOW, 7).await, 7);
}

#[tokio::test]
async fn test_bounded_getter_rejects_out_of_range_values() {
    let settings = SettingsService::new(Arc::new(create_test_db().await));
    settings.seed_defaults().await.expect("seed");
    assert_eq!(
        settings
            .get_i64_within(SENSORS_OFFLINE_AFTER_MINUTES, 45, MINUTES_SETTING_RANGE)
            .await,
        30
    );

    for extreme in [i64::MAX, i64::MIN, -1] {
        settings
            .set(SENSORS_OFFLINE_AFTER_MINUTES, json!(extreme), None, None)
            .await
            .expect("set");
        assert_eq!(
            settings
                .get_i64_within(SENSORS_OFFLINE_AFTER_MINUTES, 45, MINUTES_SETTING_RANGE)
                .await,
            45
        );
    }
}

#[tokio::test]
async fn test_set_keeps_description_and_records_author() {
    let settings = SettingsService::new(Arc::new(create_test_db().await));
    settings
        .set(
            "ui.theme",
            json!({ "dark": true }),
            Some("Dashboard theme".into()),
            None,
        )
        .await
        .expect("create");
    let updated = settings
        .set("ui.theme", json!({ "dark": false }), None, Some(4))
        .await
        .expect("update");

    assert_eq!(updated.description.as_deref(), Some("Dashboard theme"));
    assert_eq!(updated.updated_by, Some(4));
    assert_eq!(updated.value, json!({ "dark": false }));
}

#[tokio::test]
async fn test_invalid_key_and_missing_delete() {
    let settings = SettingsService::new(Arc::new(create_test_db().await));

    let err = settings
        .set("Bad Key", json!(1), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    let err = settings.delete("never.set").await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    settings.set("tmp.value", json!(1), None, None).await.expect("set");
    settings.delete("tmp.value").await.expect("delete");
    let err = settings.get("tmp.value").await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}
