//! Prometheus text exposition of the fleet overview.

use crate::AppResources;
use crate::entity::monitoring_station::StationStatus;
use crate::entity::sensor::SensorStatus;
use crate::entity::threshold::Severity;
use crate::error::AppResult;
use crate::stations::stats::{MonitoringStationStatsService, StationsOverview};
use once_cell::sync::Lazy;
use sea_orm::{ActiveEnum, Iterable};
use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::RwLock;
use std::time::{Duration, Instant};

pub const CACHE_TTL: Duration = Duration::from_secs(60);

static PROM_CACHE: Lazy<RwLock<PromCache>> = Lazy::new(|| RwLock::new(PromCache::default()));

#[derive(Default)]
struct PromCache {
    generated_at: Option<Instant>,
    body: String,
}

/// Forces the next scrape to hit the database.
pub fn clear_metrics_cache() {
    if let Ok(mut guard) = PROM_CACHE.write() {
        *guard = PromCache::default();
    }
}

fn gauge(buf: &mut String, name: &str, help: &str) {
    let _ = writeln!(buf, "# HELP {name} {help}");
    let _ = writeln!(buf, "# TYPE {name} gauge");
}

/// One sample per enum variant so absent statuses report zero.
fn labelled<K>(buf: &mut String, name: &str, label: &str, counts: &BTreeMap<String, u64>)
where
    K: ActiveEnum<Value = String> + Iterable,
{
    for key in K::iter() {
        let value = key.to_value();
        let count = counts.get(&value).copied().unwrap_or(0);
        let _ = writeln!(buf, "{name}{{{label}=\"{value}\"}} {count}");
    }
}

pub fn render(overview: &StationsOverview) -> String {
    let mut buf = String::new();

    gauge(&mut buf, "envmon_stations_total", "Monitoring stations.");
    let _ = writeln!(buf, "envmon_stations_total {}", overview.stations_total);
    gauge(&mut buf, "envmon_stations", "Monitoring stations by status.");
    labelled::<StationStatus>(&mut buf, "envmon_stations", "status", &overview.stations_by_status);

    gauge(&mut buf, "envmon_sensors", "Sensors by status.");
    labelled::<SensorStatus>(&mut buf, "envmon_sensors", "status", &overview.sensors_by_status);

    gauge(&mut buf, "envmon_active_alerts", "Active alerts by severity.");
    labelled::<Severity>(
        &mut buf,
        "envmon_active_alerts",
        "severity",
        &overview.active_alerts_by_severity,
    );

    gauge(
        &mut buf,
        "envmon_readings_last_24h",
        "Readings recorded in the last 24 hours.",
    );
    let _ = writeln!(buf, "envmon_readings_last_24h {}", overview.readings_last_24h);
    buf
}

#[tracing::instrument(skip(resources))]
pub async fn build_prometheus_metrics(resources: &AppResources) -> AppResult<String> {
    let overview = MonitoringStationStatsService::new(resources.db.clone())
        .overview()
        .await?;
    Ok(render(&overview))
}

/// Cached for [`CACHE_TTL`] to keep frequent scrapes off the database.
#[tracing::instrument(skip(resources))]
pub async fn build_prometheus_metrics_cached(resources: &AppResources) -> AppResult<String> {
    let now = Instant::now();
    if let Ok(guard) = PROM_CACHE.read()
        && let Some(generated_at) = guard.generated_at
        && now.duration_since(generated_at) < CACHE_TTL
    {
        return Ok(guard.body.clone());
    }

    let fresh = build_prometheus_metrics(resources).await?;
    if let Ok(mut guard) = PROM_CACHE.write() {
        guard.generated_at = Some(now);
        guard.body = fresh.clone();
    }
    Ok(fresh)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_zero_for_missing_labels() {
        let overview = StationsOverview {
            stations_total: 2,
            stations_by_status: BTreeMap::from([("active".to_string(), 2)]),
            sensors_total: 3,
            sensors_by_status: BTreeMap::from([
                ("active".to_string(), 2),
                ("faulty".to_string(), 1),
            ]),
            active_alerts: 1,
            active_alerts_by_severity: BTreeMap::from([("critical".to_string(), 1)]),
            readings_last_24h: 42,
        };
        let body = render(&overview);
        assert!(body.contains("envmon_stations_total 2\n"));
        assert!(body.contains("envmon_sensors{status=\"faulty\"} 1\n"));
        assert!(body.contains("envmon_sensors{status=\"inactive\"} 0\n"));
        assert!(body.contains("envmon_active_alerts{severity=\"critical\"} 1\n"));
        assert!(body.contains("envmon_active_alerts{severity=\"warning\"} 0\n"));
        assert!(body.contains("envmon_readings_last_24h 42\n"));
        assert!(body.contains("# TYPE envmon_sensors gauge\n"));
    }
}
