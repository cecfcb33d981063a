//! Alert workflow, offline detection and the notifications alerts fan out.

mod common;

use common::{create_sensor, create_station, create_test_resources, create_user};
use envmon::alerts::{AlertFilter, StationAlertService, run_offline_check};
use envmon::entity::sensor::{self, SensorType};
use envmon::entity::station_alert::{AlertStatus, AlertType};
use envmon::entity::threshold::Severity;
use envmon::entity::user::Role;
use envmon::error::AppError;
use envmon::notifications::NotificationsService;
use envmon::pagination::PageParams;
use envmon::readings::{NewReading, SensorReadingsService};
use envmon::settings::{ALERTS_AUTO_RESOLVE, SettingsService};
use envmon::thresholds::{NewThreshold, ThresholdService};
use sea_orm::{ActiveModelTrait, ActiveValue::Set};
use std::collections::BTreeMap;
use time::{Duration, OffsetDateTime};

async fn warning_threshold(resources: &envmon::AppResources, max: f64) {
    ThresholdService::new(resources.db.clone())
        .create(NewThreshold {
            sensor_type: SensorType::Temperature,
            severity: Severity::Warning,
            min_value: None,
            max_value: Some(max),
            unit: None,
            is_active: true,
            description: None,
        })
        .await
        .expect("threshold");
}

async fn ingest(resources: &envmon::AppResources, sensor_id: i32, value: f64) {
    SensorReadingsService::new(resources.clone())
        .ingest(NewReading {
            sensor_id,
            value,
            unit: None,
            recorded_at: None,
        })
        .await
        .expect("ingest");
}

#[tokio::test]
async fn test_acknowledge_then_resolve() {
    let (resources, _dir) = create_test_resources().await;
    let operator = create_user(&resources, "op@example.org", Role::Operator).await;
    let station = create_station(&resources, "HAM-01").await;
    let sensor = create_sensor(&resources, station.id, SensorType::Temperature, "T-1").await;
    warning_threshold(&resources, 25.0).await;
    ingest(&resources, sensor.id, 30.0).await;

    let alerts = StationAlertService::new(resources.clone());
    let page = alerts
        .list(&AlertFilter::default(), PageParams::default())
        .await
        .expect("list");
    let id = page.items[0].id;

    let acked = alerts.acknowledge(id, operator.id).await.expect("ack");
    assert_eq!(acked.status, AlertStatus::Acknowledged);
    assert_eq!(acked.acknowledged_by, Some(operator.id));

    // Only active alerts can be acknowledged.
    assert!(matches!(
        alerts.acknowledge(id, operator.id).await,
        Err(AppError::Conflict(_))
    ));

    let resolved = alerts.resolve(id, operator.id).await.expect("resolve");
    assert_eq!(resolved.status, AlertStatus::Resolved);
    assert_eq!(resolved.resolved_by, Some(operator.id));
    assert!(matches!(
        alerts.resolve(id, operator.id).await,
        Err(AppError::Conflict(_))
    ));
    assert!(matches!(alerts.get(9999).await, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn test_auto_resolve_can_be_disabled() {
    let (resources, _dir) = create_test_resources().await;
    let station = create_station(&resources, "HAM-01").await;
    let sensor = create_sensor(&resources, station.id, SensorType::Temperature, "T-1").await;
    warning_threshold(&resources, 25.0).await;
    SettingsService::new(resources.db.clone())
        .set(ALERTS_AUTO_RESOLVE, serde_json::json!(false), None, None)
        .await
        .expect("setting");

    ingest(&resources, sensor.id, 30.0).await;
    ingest(&resources, sensor.id, 20.0).await;

    let summary = StationAlertService::new(resources.clone())
        .summary()
        .await
        .expect("summary");
    assert_eq!(summary.open_total, 1);
    assert_eq!(summary.open_by_severity.get("warning"), Some(&1));
}

#[tokio::test]
async fn test_summary_groups_alerts_by_status_and_severity() {
    let (resources, _dir) = create_test_resources().await;
    let operator = create_user(&resources, "op@example.org", Role::Operator).await;
    let station = create_station(&resources, "HAM-01").await;
    warning_threshold(&resources, 25.0).await;
    let mut sensor_ids = Vec::new();
    for serial in ["T-1", "T-2", "T-3"] {
        let sensor = create_sensor(&resources, station.id, SensorType::Temperature, serial).await;
        ingest(&resources, sensor.id, 30.0).await;
        sensor_ids.push(sensor.id);
    }

    let alerts = StationAlertService::new(resources.clone());
    let page = alerts
        .list(&AlertFilter::default(), PageParams::default())
        .await
        .expect("list");
    assert_eq!(page.total, 3);
    let by_sensor = |sensor_id: i32| {
        page.items
            .iter()
            .find(|a| a.sensor_id == Some(sensor_id))
            .map(|a| a.id)
            .expect("alert for sensor")
    };
    alerts
        .acknowledge(by_sensor(sensor_ids[0]), operator.id)
        .await
        .expect("ack");
    alerts
        .resolve(by_sensor(sensor_ids[1]), operator.id)
        .await
        .expect("resolve");

    let summary = alerts.summary().await.expect("summary");
    assert_eq!(
        summary.by_status,
        BTreeMap::from([
            ("acknowledged".to_string(), 1),
            ("active".to_string(), 1),
            ("resolved".to_string(), 1),
        ])
    );
    assert_eq!(
        summary.open_by_severity,
        BTreeMap::from([("warning".to_string(), 2)])
    );
    assert_eq!(summary.open_total, 2);
}

#[tokio::test]
async fn test_offline_check_opens_one_alert_until_sensor_reports() {
    let (resources, _dir) = create_test_resources().await;
    let station = create_station(&resources, "HAM-01").await;
    let sensor = create_sensor(&resources, station.id, SensorType::Humidity, "H-1").await;

    let silent_since = OffsetDateTime::now_utc() - Duration::hours(2);
    let mut active: sensor::ActiveModel = sensor.clone().into();
    active.last_reading_at = Set(Some(silent_since));
    active.update(resources.db.as_ref()).await.expect("update");

    assert_eq!(run_offline_check(&resources).await.expect("check"), 1);
    assert_eq!(run_offline_check(&resources).await.expect("check"), 0);

    let alerts = StationAlertService::new(resources.clone());
    let offline = AlertFilter {
        alert_type: Some(AlertType::SensorOffline),
        status: Some(AlertStatus::Active),
        ..Default::default()
    };
    assert_eq!(
        alerts.list(&offline, PageParams::default()).await.expect("list").total,
        1
    );

    ingest(&resources, sensor.id, 55.0).await;
    assert_eq!(
        alerts.list(&offline, PageParams::default()).await.expect("list").total,
        0
    );
}

#[tokio::test]
async fn test_alerts_notify_operators_and_admins() {
    let (resources, _dir) = create_test_resources().await;
    let viewer = create_user(&resources, "viewer@example.org", Role::Viewer).await;
    let operator = create_user(&resources, "op@example.org", Role::Operator).await;
    let admin = create_user(&resources, "admin@example.org", Role::Admin).await;
    let station = create_station(&resources, "HAM-01").await;
    let sensor = create_sensor(&resources, station.id, SensorType::Temperature, "T-1").await;
    warning_threshold(&resources, 25.0).await;

    ingest(&resources, sensor.id, 30.0).await;

    let notifications = NotificationsService::new(resources.clone());
    assert_eq!(notifications.unread_count(viewer.id).await.expect("count"), 0);
    assert_eq!(notifications.unread_count(operator.id).await.expect("count"), 1);
    assert_eq!(notifications.unread_count(admin.id).await.expect("count"), 1);
}
