//! Ingestion, quality scoring and the analysis queries over stored readings.

mod common;

use common::{create_sensor, create_station, create_test_resources, create_user};
use envmon::alerts::{AlertFilter, StationAlertService};
use envmon::entity::sensor::SensorType;
use envmon::entity::sensor_reading;
use envmon::entity::station_alert::{AlertStatus, AlertType};
use envmon::entity::threshold::Severity;
use envmon::entity::user::Role;
use envmon::error::AppError;
use envmon::pagination::PageParams;
use envmon::readings::analysis::Bucket;
use envmon::readings::{
    ANALYSIS_CHUNK_SIZE, GapQuery, NewReading, ReadingFilter, SensorReadingsService,
};
use envmon::thresholds::{NewThreshold, ThresholdService};
use envmon::entity::system_event::EventSeverity;
use envmon::system::{EventFilter, SystemService};
use sea_orm::{ActiveValue::NotSet, ActiveValue::Set, ConnectionTrait, EntityTrait};
use time::macros::datetime;
use time::{Duration, OffsetDateTime};

fn reading(sensor_id: i32, value: f64, minutes_ago: i64) -> NewReading {
    NewReading {
        sensor_id,
        value,
        unit: None,
        recorded_at: Some(OffsetDateTime::now_utc() - Duration::minutes(minutes_ago)),
    }
}

#[tokio::test]
async fn test_ingest_converts_to_sensor_unit() {
    let (resources, _dir) = create_test_resources().await;
    let station = create_station(&resources, "BER-01").await;
    let sensor = create_sensor(&resources, station.id, SensorType::Temperature, "T-1").await;

    let ingested = SensorReadingsService::new(resources.clone())
        .ingest(NewReading {
            sensor_id: sensor.id,
            value: 86.0,
            unit: Some("fahrenheit".into()),
            recorded_at: None,
        })
        .await
        .expect("ingest");

    assert!((ingested.reading.value - 30.0).abs() < 1e-9);
    assert_eq!(ingested.reading.unit, sensor.unit);
    assert_eq!(ingested.reading.station_id, station.id);
    assert!(ingested.violations.is_empty());
}

#[tokio::test]
async fn test_ingest_scores_quality() {
    let (resources, _dir) = create_test_resources().await;
    let station = create_station(&resources, "BER-01").await;
    let sensor = create_sensor(&resources, station.id, SensorType::Temperature, "T-1").await;
    let service = SensorReadingsService::new(resources.clone());

    // Never calibrated: only the stale calibration penalty applies.
    let normal = service.ingest(reading(sensor.id, 21.5, 2)).await.expect("ingest");
    assert_eq!(normal.reading.quality_score, 0.9);

    // Outside the sensor's physical range as well.
    let out_of_range = service.ingest(reading(sensor.id, 100.0, 1)).await.expect("ingest");
    assert_eq!(out_of_range.reading.quality_score, 0.4);
}

#[tokio::test]
async fn test_ingest_rejects_invalid_readings() {
    let (resources, _dir) = create_test_resources().await;
    let station = create_station(&resources, "BER-01").await;
    let sensor = create_sensor(&resources, station.id, SensorType::Temperature, "T-1").await;
    let service = SensorReadingsService::new(resources.clone());

    let future = service.ingest(reading(sensor.id, 20.0, -60)).await;
    assert!(matches!(future, Err(AppError::BadRequest(_))));

    let nan = service.ingest(reading(sensor.id, f64::NAN, 0)).await;
    assert!(matches!(nan, Err(AppError::BadRequest(_))));

    let wrong_dimension = service
        .ingest(NewReading {
            unit: Some("hpa".into()),
            ..reading(sensor.id, 1013.0, 0)
        })
        .await;
    assert!(matches!(wrong_dimension, Err(AppError::BadRequest(_))));

    let missing = service.ingest(reading(9999, 20.0, 0)).await;
    assert!(matches!(missing, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn test_batch_ingest_is_partial() {
    let (resources, _dir) = create_test_resources().await;
    let station = create_station(&resources, "BER-01").await;
    let sensor = create_sensor(&resources, station.id, SensorType::Temperature, "T-1").await;
    let service = SensorReadingsService::new(resources.clone());

    let result = service
        .ingest_batch(vec![
            reading(sensor.id, 20.0, 3),
            reading(4242, 20.0, 2),
            reading(sensor.id, 20.5, 1),
        ])
        .await
        .expect("batch");

    assert_eq!(result.accepted, 2);
    assert_eq!(result.rejected, 1);
    assert!(result.results[1].error.is_some());
    assert!(result.results[1].reading.is_none());

    assert!(matches!(
        service.ingest_batch(vec![]).await,
        Err(AppError::BadRequest(_))
    ));
}

#[tokio::test]
async fn test_threshold_alert_lifecycle() {
    let (resources, _dir) = create_test_resources().await;
    let station = create_station(&resources, "BER-01").await;
    let sensor = create_sensor(&resources, station.id, SensorType::Temperature, "T-1").await;
    let thresholds = ThresholdService::new(resources.db.clone());
    for (severity, max) in [(Severity::Warning, 30.0), (Severity::Critical, 40.0)] {
        thresholds
            .create(NewThreshold {
                sensor_type: SensorType::Temperature,
                severity,
                min_value: None,
                max_value: Some(max),
                unit: None,
                is_active: true,
                description: None,
            })
            .await
            .expect("threshold");
    }
    let readings = SensorReadingsService::new(resources.clone());
    let alerts = StationAlertService::new(resources.clone());
    let open = AlertFilter {
        sensor_id: Some(sensor.id),
        ..Default::default()
    };

    let operator = create_user(&resources, "op@example.org", Role::Operator).await;

    let warm = readings.ingest(reading(sensor.id, 33.0, 4)).await.expect("ingest");
    assert_eq!(warm.violations.len(), 1);
    assert!(warm.alerting_error.is_none());
    let page = alerts.list(&open, PageParams::default()).await.expect("list");
    assert_eq!(page.total, 1);
    let alert = page.items[0].clone();
    assert_eq!(alert.alert_type, AlertType::ThresholdViolation);
    assert_eq!(alert.severity, Severity::Warning);

    let acked = alerts.acknowledge(alert.id, operator.id).await.expect("ack");
    assert_eq!(acked.status, AlertStatus::Acknowledged);
    assert_eq!(acked.acknowledged_by, Some(operator.id));

    // Another warning level reading keeps the acknowledgement.
    readings.ingest(reading(sensor.id, 34.0, 3)).await.expect("ingest");
    let still_acked = alerts.get(alert.id).await.expect("get");
    assert_eq!(still_acked.status, AlertStatus::Acknowledged);

    // Hotter reading escalates the same alert instead of opening another one,
    // and puts it back in front of the operators.
    let hot = readings.ingest(reading(sensor.id, 45.0, 2)).await.expect("ingest");
    assert_eq!(hot.violations[0].threshold.severity, Severity::Critical);
    let page = alerts.list(&open, PageParams::default()).await.expect("list");
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].id, alert.id);
    assert_eq!(page.items[0].severity, Severity::Critical);
    assert_eq!(page.items[0].value, Some(45.0));
    assert_eq!(page.items[0].status, AlertStatus::Active);
    assert_eq!(page.items[0].acknowledged_by, None);
    assert!(page.items[0].acknowledged_at.is_none());

    // Back within limits resolves it.
    readings.ingest(reading(sensor.id, 22.0, 1)).await.expect("ingest");
    let resolved = alerts.get(page.items[0].id).await.expect("get");
    assert_eq!(resolved.status, AlertStatus::Resolved);
    assert!(resolved.resolved_at.is_some());
    assert_eq!(resolved.resolved_by, None);
}

#[tokio::test]
async fn test_anomaly_detection_flags_outliers() {
    let (resources, _dir) = create_test_resources().await;
    let station = create_station(&resources, "BER-01").await;
    let sensor = create_sensor(&resources, station.id, SensorType::Temperature, "T-1").await;
    let service = SensorReadingsService::new(resources.clone());

    for (i, value) in [20.0, 21.0, 20.0, 21.0, 20.0, 21.0].into_iter().enumerate() {
        let r = service
            .ingest(reading(sensor.id, value, 30 - i as i64))
            .await
            .expect("ingest");
        assert!(!r.reading.is_anomaly);
    }
    let spike = service.ingest(reading(sensor.id, 50.0, 1)).await.expect("ingest");
    assert!(spike.reading.is_anomaly);
    assert_eq!(spike.reading.quality_score, 0.6);

    let anomalies = service
        .list(
            &ReadingFilter {
                anomalies_only: true,
                ..Default::default()
            },
            PageParams::default(),
        )
        .await
        .expect("list");
    assert_eq!(anomalies.total, 1);
}

#[tokio::test]
async fn test_statistics_aggregate_and_gaps() {
    let (resources, _dir) = create_test_resources().await;
    let station = create_station(&resources, "BER-01").await;
    let sensor = create_sensor(&resources, station.id, SensorType::Temperature, "T-1").await;
    let service = SensorReadingsService::new(resources.clone());

    // Every 10 minutes, then a two hour silence.
    for (value, minutes_ago) in [(10.0, 200), (12.0, 190), (14.0, 180), (16.0, 60), (18.0, 50)] {
        service
            .ingest(reading(sensor.id, value, minutes_ago))
            .await
            .expect("ingest");
    }
    let filter = ReadingFilter {
        sensor_id: Some(sensor.id),
        ..Default::default()
    };

    let stats = service.statistics(&filter).await.expect("stats");
    assert_eq!(stats.count, 5);
    assert_eq!(stats.min, Some(10.0));
    assert_eq!(stats.max, Some(18.0));
    assert!((stats.mean.expect("mean") - 14.0).abs() < 1e-9);

    let buckets = service.aggregate(&filter, Bucket::Day).await.expect("aggregate");
    assert_eq!(buckets.iter().map(|b| b.count).sum::<u64>(), 5);

    let report = service
        .gaps(
            sensor.id,
            &GapQuery {
                min_gap_minutes: Some(30.0),
                ..Default::default()
            },
        )
        .await
        .expect("gaps");
    assert_eq!(report.gaps.len(), 1);
    assert!((report.gaps[0].duration_minutes - 120.0).abs() < 1.0);
}

#[tokio::test]
async fn test_latest_per_sensor() {
    let (resources, _dir) = create_test_resources().await;
    let station = create_station(&resources, "BER-01").await;
    let temp = create_sensor(&resources, station.id, SensorType::Temperature, "T-1").await;
    let hum = create_sensor(&resources, station.id, SensorType::Humidity, "H-1").await;
    let service = SensorReadingsService::new(resources.clone());

    service.ingest(reading(temp.id, 20.0, 10)).await.expect("ingest");
    service.ingest(reading(temp.id, 21.0, 5)).await.expect("ingest");
    service.ingest(reading(hum.id, 55.0, 7)).await.expect("ingest");

    let latest = service.latest(station.id).await.expect("latest");
    assert_eq!(latest.len(), 2);
    assert_eq!(latest[0].value, 21.0);
    assert_eq!(latest[1].value, 55.0);
}

#[tokio::test]
async fn test_analysis_covers_ranges_larger_than_one_chunk() {
    let (resources, _dir) = create_test_resources().await;
    let station = create_station(&resources, "BER-01").await;
    let sensor = create_sensor(&resources, station.id, SensorType::Temperature, "T-1").await;
    let service = SensorReadingsService::new(resources.clone());

    // One reading per minute; the last seven arrive after a six hour outage.
    let total = 2 * ANALYSIS_CHUNK_SIZE as i64 + 7;
    let t0 = datetime!(2026-01-01 00:00 UTC);
    let rows: Vec<sensor_reading::ActiveModel> = (0..total)
        .map(|i| {
            let offset = if i >= 2 * ANALYSIS_CHUNK_SIZE as i64 { i + 360 } else { i };
            let at = t0 + Duration::minutes(offset);
            sensor_reading::ActiveModel {
                id: NotSet,
                sensor_id: Set(sensor.id),
                station_id: Set(station.id),
                value: Set(i as f64),
                unit: Set("celsius".into()),
                recorded_at: Set(at),
                quality_score: Set(1.0),
                is_anomaly: Set(false),
                created_at: Set(at),
            }
        })
        .collect();
    for batch in rows.chunks(500) {
        sensor_reading::Entity::insert_many(batch.to_vec())
            .exec(resources.db.as_ref())
            .await
            .expect("insert batch");
    }
    let filter = ReadingFilter {
        sensor_id: Some(sensor.id),
        ..Default::default()
    };

    let stats = service.statistics(&filter).await.expect("stats");
    assert_eq!(stats.count, total as u64);
    assert_eq!(stats.min, Some(0.0));
    assert_eq!(stats.max, Some((total - 1) as f64));
    assert!((stats.mean.expect("mean") - (total - 1) as f64 / 2.0).abs() < 1e-6);
    assert_eq!(
        stats.last_recorded_at,
        Some(t0 + Duration::minutes(total - 1 + 360))
    );

    let buckets = service.aggregate(&filter, Bucket::Hour).await.expect("aggregate");
    assert_eq!(buckets.iter().map(|b| b.count).sum::<u64>(), total as u64);
    let last = buckets.last().expect("last bucket");
    assert_eq!(last.count, 7);
    assert_eq!(last.min, (total - 7) as f64);

    let report = service
        .gaps(sensor.id, &GapQuery::default())
        .await
        .expect("gaps");
    assert_eq!(report.gaps.len(), 1);
    assert_eq!(report.gaps[0].duration_minutes, 361.0);
}

#[tokio::test]
async fn test_alerting_failure_is_reported_but_reading_kept() {
    let (resources, _dir) = create_test_resources().await;
    let station = create_station(&resources, "BER-01").await;
    let sensor = create_sensor(&resources, station.id, SensorType::Temperature, "T-1").await;
    ThresholdService::new(resources.db.clone())
        .create(NewThreshold {
            sensor_type: SensorType::Temperature,
            severity: Severity::Warning,
            min_value: None,
            max_value: Some(30.0),
            unit: None,
            is_active: true,
            description: None,
        })
        .await
        .expect("threshold");
    resources
        .db
        .execute_unprepared("DROP TABLE station_alert")
        .await
        .expect("drop alerts table");

    let service = SensorReadingsService::new(resources.clone());
    let ingested = service.ingest(reading(sensor.id, 33.0, 1)).await.expect("ingest");
    assert_eq!(ingested.violations.len(), 1);
    assert!(ingested.alerting_error.is_some());
    service.get(ingested.reading.id).await.expect("reading stored");

    let events = SystemService::new(resources.db.clone())
        .list_events(
            &EventFilter {
                event_type: Some("readings.alerting_failed".into()),
                ..Default::default()
            },
            PageParams::default(),
        )
        .await
        .expect("events");
    assert_eq!(events.total, 1);
    assert_eq!(events.items[0].severity, EventSeverity::Error);
}
