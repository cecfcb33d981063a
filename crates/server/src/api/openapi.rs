//! OpenAPI/Utoipa configuration.

use crate::api::{
    alerts::ALERTS_TAG, auth::AUTH_TAG, backups::BACKUPS_TAG, exports::EXPORTS_TAG,
    health::MISC_TAG, maintenance::MAINTENANCE_TAG, notifications::NOTIFICATIONS_TAG,
    readings::READINGS_TAG, sensors::SENSORS_TAG, settings::SETTINGS_TAG,
    stations::STATIONS_TAG, system::SYSTEM_TAG, thresholds::THRESHOLDS_TAG, units::UNITS_TAG,
    users::USERS_TAG,
};
use utoipa::{
    Modify, OpenApi,
    openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme},
};

/// Security addon for OpenAPI documentation.
pub struct SecurityAddon;

impl Modify for SecurityAddon {
    #[tracing::instrument(skip(self, openapi))]
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            let bearer = HttpBuilder::new()
                .scheme(HttpAuthScheme::Bearer)
                .description(Some(
                    "Use the session token returned by `/api/auth/login` to authenticate.",
                ))
                .build();
            components.add_security_scheme("Authorization", SecurityScheme::Http(bearer));

            // Browsers send the same token as an HttpOnly cookie.
            components.add_security_scheme(
                "SessionCookie",
                SecurityScheme::ApiKey(ApiKey::Cookie(ApiKeyValue::new("envmon_session"))),
            );
        }
    }
}

/// OpenAPI documentation configuration.
#[derive(OpenApi)]
#[openapi(
    modifiers(&SecurityAddon),
    info(
        title = "Environmental Monitoring API",
        version = "1.0.0",
        description = "Stations, sensors, readings, thresholds and alerts, plus maintenance, exports and backups."
    ),
    tags(
        (name = MISC_TAG, description = "Miscellaneous endpoints"),
        (name = AUTH_TAG, description = "Login, logout and session management"),
        (name = USERS_TAG, description = "User administration"),
        (name = STATIONS_TAG, description = "Monitoring stations"),
        (name = SENSORS_TAG, description = "Sensors attached to stations"),
        (name = READINGS_TAG, description = "Sensor readings, statistics and aggregation"),
        (name = THRESHOLDS_TAG, description = "Threshold rules per sensor type"),
        (name = ALERTS_TAG, description = "Station alerts"),
        (name = MAINTENANCE_TAG, description = "Maintenance scheduling"),
        (name = NOTIFICATIONS_TAG, description = "In-app notifications"),
        (name = EXPORTS_TAG, description = "Data exports"),
        (name = BACKUPS_TAG, description = "Database backups"),
        (name = SETTINGS_TAG, description = "Runtime settings"),
        (name = SYSTEM_TAG, description = "System events and health"),
        (name = UNITS_TAG, description = "Unit catalog and conversion")
    )
)]
pub struct ApiDoc;
