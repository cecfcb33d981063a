//! Environmental monitoring backend.
//!
//! Stations carry sensors, sensors produce readings, readings are scored for
//! quality, checked against thresholds and turned into alerts. Around that core
//! sit maintenance scheduling, notifications, data exports, database backups,
//! runtime settings and an audit trail of system events, all exposed through a
//! JSON API.

use std::sync::Arc;

use lettre::{AsyncSmtpTransport, Tokio1Executor};
use sea_orm::DatabaseConnection;

use crate::config::AppConfig;

pub mod alerts;
pub mod api;
pub mod auth;
pub mod backups;
pub mod config;
pub mod entity;
pub mod error;
pub mod exports;
pub mod maintenance;
pub mod metrics;
pub mod notifications;
pub mod pagination;
pub mod readings;
pub mod sensors;
pub mod settings;
pub mod stations;
pub mod system;
pub mod thresholds;
pub mod units;

#[derive(Clone, Debug)]
pub struct AppResources {
    pub db: Arc<DatabaseConnection>,
    pub mailer: Arc<AsyncSmtpTransport<Tokio1Executor>>,
    pub config: Arc<AppConfig>,
}
