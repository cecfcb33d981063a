//! Maintenance scheduling: lifecycle, station status, calibration and recurrence.

mod common;

use common::{create_sensor, create_station, create_test_resources, create_user};
use envmon::entity::maintenance_schedule::{MaintenanceStatus, MaintenanceType};
use envmon::entity::monitoring_station::StationStatus;
use envmon::entity::sensor::{SensorStatus, SensorType};
use envmon::entity::user::Role;
use envmon::error::AppError;
use envmon::maintenance::{MaintenanceSchedulesService, MaintenanceUpdate, NewMaintenance};
use envmon::notifications::NotificationsService;
use envmon::sensors::{SensorUpdate, SensorsService};
use envmon::stations::StationsService;
use time::{Duration, OffsetDateTime};

fn plan(station_id: i32, maintenance_type: MaintenanceType, in_hours: i64) -> NewMaintenance {
    NewMaintenance {
        station_id,
        sensor_id: None,
        title: "Quarterly service".into(),
        description: None,
        maintenance_type,
        scheduled_for: OffsetDateTime::now_utc() + Duration::hours(in_hours),
        recurrence_days: None,
        assigned_to: None,
    }
}

#[tokio::test]
async fn test_start_and_complete_toggle_station_status() {
    let (resources, _dir) = create_test_resources().await;
    let station = create_station(&resources, "MUC-01").await;
    let service = MaintenanceSchedulesService::new(resources.clone());
    let stations = StationsService::new(resources.db.clone());

    let schedule = service
        .create(plan(station.id, MaintenanceType::Cleaning, 24), None)
        .await
        .expect("create");
    assert_eq!(schedule.status, MaintenanceStatus::Scheduled);

    let started = service.start(schedule.id).await.expect("start");
    assert_eq!(started.status, MaintenanceStatus::InProgress);
    assert_eq!(
        stations.get(station.id).await.expect("station").status,
        StationStatus::Maintenance
    );

    // In progress cannot be deleted or restarted.
    assert!(matches!(service.delete(schedule.id).await, Err(AppError::Conflict(_))));
    assert!(matches!(service.start(schedule.id).await, Err(AppError::Conflict(_))));

    let done = service
        .complete(schedule.id, Some("Filters replaced".into()))
        .await
        .expect("complete");
    assert_eq!(done.schedule.status, MaintenanceStatus::Completed);
    assert_eq!(done.schedule.notes.as_deref(), Some("Filters replaced"));
    assert!(done.next.is_none());
    assert_eq!(
        stations.get(station.id).await.expect("station").status,
        StationStatus::Active
    );

    assert!(matches!(
        service.complete(schedule.id, None).await,
        Err(AppError::Conflict(_))
    ));
    assert!(matches!(service.cancel(schedule.id).await, Err(AppError::Conflict(_))));
}

#[tokio::test]
async fn test_calibration_updates_sensor_and_recurs() {
    let (resources, _dir) = create_test_resources().await;
    let station = create_station(&resources, "MUC-01").await;
    let sensor = create_sensor(&resources, station.id, SensorType::Co2, "C-1").await;
    let sensors = SensorsService::new(resources.db.clone());
    sensors
        .update(
            sensor.id,
            SensorUpdate {
                status: Some(SensorStatus::Calibrating),
                ..Default::default()
            },
        )
        .await
        .expect("update sensor");

    let service = MaintenanceSchedulesService::new(resources.clone());
    let schedule = service
        .create(
            NewMaintenance {
                sensor_id: Some(sensor.id),
                recurrence_days: Some(90),
                ..plan(station.id, MaintenanceType::Calibration, 1)
            },
            None,
        )
        .await
        .expect("create");

    let done = service.complete(schedule.id, None).await.expect("complete");
    let next = done.next.expect("next occurrence");
    assert_eq!(next.status, MaintenanceStatus::Scheduled);
    assert_eq!(next.scheduled_for, schedule.scheduled_for + Duration::days(90));
    assert_eq!(next.sensor_id, Some(sensor.id));

    let calibrated = sensors.get(sensor.id).await.expect("sensor");
    assert!(calibrated.calibrated_at.is_some());
    assert_eq!(calibrated.status, SensorStatus::Active);
}

#[tokio::test]
async fn test_create_validates_references() {
    let (resources, _dir) = create_test_resources().await;
    let station = create_station(&resources, "MUC-01").await;
    let other = create_station(&resources, "MUC-02").await;
    let foreign_sensor = create_sensor(&resources, other.id, SensorType::Noise, "N-1").await;
    let service = MaintenanceSchedulesService::new(resources.clone());

    let missing_station = service
        .create(plan(4242, MaintenanceType::Inspection, 1), None)
        .await;
    assert!(matches!(missing_station, Err(AppError::BadRequest(_))));

    let wrong_sensor = service
        .create(
            NewMaintenance {
                sensor_id: Some(foreign_sensor.id),
                ..plan(station.id, MaintenanceType::Inspection, 1)
            },
            None,
        )
        .await;
    assert!(matches!(wrong_sensor, Err(AppError::BadRequest(_))));

    let bad_recurrence = service
        .create(
            NewMaintenance {
                recurrence_days: Some(0),
                ..plan(station.id, MaintenanceType::Inspection, 1)
            },
            None,
        )
        .await;
    assert!(matches!(bad_recurrence, Err(AppError::BadRequest(_))));
}

#[tokio::test]
async fn test_overdue_sweep_and_reschedule() {
    let (resources, _dir) = create_test_resources().await;
    let technician = create_user(&resources, "tech@example.org", Role::Operator).await;
    let station = create_station(&resources, "MUC-01").await;
    let service = MaintenanceSchedulesService::new(resources.clone());

    let late = service
        .create(
            NewMaintenance {
                assigned_to: Some(technician.id),
                ..plan(station.id, MaintenanceType::Repair, -3)
            },
            Some(technician.id),
        )
        .await
        .expect("create");
    let upcoming = service
        .create(plan(station.id, MaintenanceType::Inspection, 48), None)
        .await
        .expect("create");

    assert_eq!(service.mark_overdue().await.expect("sweep"), 1);
    assert_eq!(service.mark_overdue().await.expect("sweep"), 0);
    assert_eq!(
        service.get(late.id).await.expect("get").status,
        MaintenanceStatus::Overdue
    );

    // Assignment and overdue notice.
    let inbox = NotificationsService::new(resources.clone());
    assert_eq!(inbox.unread_count(technician.id).await.expect("count"), 2);

    let moved = service
        .update(
            late.id,
            MaintenanceUpdate {
                scheduled_for: Some(OffsetDateTime::now_utc() + Duration::days(2)),
                ..Default::default()
            },
        )
        .await
        .expect("reschedule");
    assert_eq!(moved.status, MaintenanceStatus::Scheduled);

    let next_week = service.upcoming(7).await.expect("upcoming");
    let ids: Vec<i32> = next_week.iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![upcoming.id, late.id]);
}

#[tokio::test]
async fn test_out_of_range_recurrence_rejected() {
    let (resources, _dir) = create_test_resources().await;
    let station = create_station(&resources, "MUC-01").await;
    let service = MaintenanceSchedulesService::new(resources.clone());

    let mut huge = plan(station.id, MaintenanceType::Inspection, 24);
    huge.recurrence_days = Some(i32::MAX);
    assert!(matches!(
        service.create(huge, None).await,
        Err(AppError::BadRequest(_))
    ));

    let schedule = service
        .create(plan(station.id, MaintenanceType::Inspection, 24), None)
        .await
        .expect("create");
    let err = service
        .update(
            schedule.id,
            MaintenanceUpdate {
                recurrence_days: Some(i32::MAX),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    service.start(schedule.id).await.expect("start");
    let done = service.complete(schedule.id, None).await.expect("complete");
    assert!(done.next.is_none());
}
