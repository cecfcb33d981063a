//! SeaORM entities for the monitoring schema.
//!
//! Enumerated columns are stored as lowercase strings so the same schema works
//! on PostgreSQL and SQLite.

pub mod data_export;
pub mod maintenance_schedule;
pub mod monitoring_station;
pub mod notification;
pub mod sensor;
pub mod sensor_reading;
pub mod session;
pub mod settings;
pub mod station_alert;
pub mod system_backup;
pub mod system_event;
pub mod threshold;
pub mod user;
