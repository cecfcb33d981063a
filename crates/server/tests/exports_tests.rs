//! Export jobs: rendering, ownership and download rules.

mod common;

use common::{create_sensor, create_station, create_test_resources, create_user};
use envmon::entity::data_export::{ExportFormat, ExportStatus, ExportType};
use envmon::entity::sensor::SensorType;
use envmon::entity::user::Role;
use envmon::error::AppError;
use envmon::exports::{DataExportService, ExportFilters};
use envmon::notifications::NotificationsService;
use envmon::pagination::PageParams;
use envmon::readings::{NewReading, SensorReadingsService};
use time::{Duration, OffsetDateTime};

async fn seed_readings(resources: &envmon::AppResources) -> i32 {
    let station = create_station(resources, "EXP-01").await;
    let sensor = create_sensor(resources, station.id, SensorType::Temperature, "T-EXP").await;
    let readings = SensorReadingsService::new(resources.clone());
    let start = OffsetDateTime::now_utc() - Duration::hours(3);
    for i in 0..6 {
        readings
            .ingest(NewReading {
                sensor_id: sensor.id,
                value: 18.0 + f64::from(i),
                unit: None,
                recorded_at: Some(start + Duration::minutes(20 * i64::from(i))),
            })
            .await
            .expect("ingest");
    }
    station.id
}

#[tokio::test]
async fn test_csv_readings_export_completes() {
    let (resources, _dir) = create_test_resources().await;
    let operator = create_user(&resources, "op@example.org", Role::Operator).await;
    let station_id = seed_readings(&resources).await;
    let exports = DataExportService::new(resources.clone());

    let pending = exports
        .enqueue(
            &operator,
            ExportType::Readings,
            ExportFormat::Csv,
            ExportFilters {
                station_id: Some(station_id),
                ..Default::default()
            },
        )
        .await
        .expect("enqueue");
    assert_eq!(pending.status, ExportStatus::Pending);

    let done = exports.process(pending.id).await.expect("process");
    assert_eq!(done.status, ExportStatus::Completed);
    assert_eq!(done.row_count, Some(6));
    assert!(done.expires_at.is_some());

    let download = exports.download(&operator, done.id).await.expect("download");
    assert_eq!(download.file_name, format!("export-{}.csv", done.id));
    let text = String::from_utf8(download.bytes).expect("utf-8");
    let mut lines = text.lines();
    assert!(lines.next().expect("header").starts_with("id,station_id,sensor_id"));
    assert_eq!(lines.count(), 6);

    let notifications = NotificationsService::new(resources.clone());
    assert_eq!(notifications.unread_count(operator.id).await.expect("count"), 1);
}

#[tokio::test]
async fn test_json_and_xlsx_exports() {
    let (resources, _dir) = create_test_resources().await;
    let operator = create_user(&resources, "op@example.org", Role::Operator).await;
    seed_readings(&resources).await;
    let exports = DataExportService::new(resources.clone());

    let json = exports
        .enqueue(&operator, ExportType::Aggregates, ExportFormat::Json, ExportFilters::default())
        .await
        .expect("enqueue");
    let json = exports.process(json.id).await.expect("process");
    assert_eq!(json.status, ExportStatus::Completed);
    let bytes = exports.download(&operator, json.id).await.expect("download").bytes;
    let parsed: serde_json::Value = serde_json::from_slice(&bytes).expect("valid json");
    let buckets = parsed.as_array().expect("array of buckets");
    // The row count is the number of buckets, not of raw readings.
    assert_eq!(json.row_count, Some(buckets.len() as i32));
    let counted: u64 = buckets.iter().filter_map(|b| b["count"].as_u64()).sum();
    assert_eq!(counted, 6);

    let xlsx = exports
        .enqueue(&operator, ExportType::Alerts, ExportFormat::Xlsx, ExportFilters::default())
        .await
        .expect("enqueue");
    let xlsx = exports.process(xlsx.id).await.expect("process");
    assert_eq!(xlsx.status, ExportStatus::Completed);
    let bytes = exports.download(&operator, xlsx.id).await.expect("download").bytes;
    // XLSX files are ZIP containers
    assert_eq!(&bytes[..2], b"PK");
}

#[tokio::test]
async fn test_exports_are_private_to_requester() {
    let (resources, _dir) = create_test_resources().await;
    let owner = create_user(&resources, "owner@example.org", Role::Operator).await;
    let other = create_user(&resources, "other@example.org", Role::Operator).await;
    let admin = create_user(&resources, "admin@example.org", Role::Admin).await;
    let exports = DataExportService::new(resources.clone());

    let export = exports
        .enqueue(&owner, ExportType::Alerts, ExportFormat::Csv, ExportFilters::default())
        .await
        .expect("enqueue");

    let err = exports.get(&other, export.id).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
    exports.get(&admin, export.id).await.expect("admins see all exports");

    assert_eq!(exports.list(&owner, PageParams::default()).await.expect("list").total, 1);
    assert_eq!(exports.list(&other, PageParams::default()).await.expect("list").total, 0);
    assert_eq!(exports.list(&admin, PageParams::default()).await.expect("list").total, 1);
}

#[tokio::test]
async fn test_pending_export_cannot_be_downloaded() {
    let (resources, _dir) = create_test_resources().await;
    let owner = create_user(&resources, "owner@example.org", Role::Operator).await;
    let exports = DataExportService::new(resources.clone());
    let export = exports
        .enqueue(&owner, ExportType::Readings, ExportFormat::Csv, ExportFilters::default())
        .await
        .expect("enqueue");

    let err = exports.download(&owner, export.id).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}

#[tokio::test]
async fn test_inverted_range_rejected() {
    let (resources, _dir) = create_test_resources().await;
    let owner = create_user(&resources, "owner@example.org", Role::Operator).await;
    let now = OffsetDateTime::now_utc();
    let err = DataExportService::new(resources.clone())
        .enqueue(
            &owner,
            ExportType::Readings,
            ExportFormat::Csv,
            ExportFilters {
                from: Some(now),
                to: Some(now - Duration::days(1)),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));
}

#[tokio::test]
async fn test_delete_removes_file() {
    let (resources, _dir) = create_test_resources().await;
    let owner = create_user(&resources, "owner@example.org", Role::Operator).await;
    let exports = DataExportService::new(resources.clone());
    let export = exports
        .enqueue(&owner, ExportType::Alerts, ExportFormat::Csv, ExportFilters::default())
        .await
        .expect("enqueue");
    let done = exports.process(export.id).await.expect("process");
    let path = done.file_path.clone().expect("file path");
    assert!(std::path::Path::new(&path).exists());

    exports.delete(&owner, done.id).await.expect("delete");
    assert!(!std::path::Path::new(&path).exists());
    let err = exports.get(&owner, done.id).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}
