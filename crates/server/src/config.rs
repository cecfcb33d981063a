use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration build error: {0}")]
    Build(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

#[derive(Clone, Debug, Deserialize)]
pub struct SmtpConfig {
    /// When false no email is attempted; notifications are still stored.
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub server: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_ttl_hours")]
    pub ttl_hours: u32,
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    /// Adds the `Secure` attribute to the session cookie.
    #[serde(default)]
    pub secure_cookie: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_hours: default_session_ttl_hours(),
            cookie_name: default_cookie_name(),
            secure_cookie: false,
        }
    }
}

impl SessionConfig {
    pub fn ttl(&self) -> time::Duration {
        time::Duration::hours(i64::from(self.ttl_hours))
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ExportConfig {
    #[serde(default = "default_export_directory")]
    pub directory: String,
    #[serde(default = "default_export_retention_hours")]
    pub retention_hours: u32,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            directory: default_export_directory(),
            retention_hours: default_export_retention_hours(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct BackupConfig {
    #[serde(default = "default_backup_directory")]
    pub directory: String,
    #[serde(default = "default_pg_dump_path")]
    pub pg_dump_path: String,
    /// Directory bundled into `full` backups next to the database dump.
    #[serde(default)]
    pub uploads_directory: Option<String>,
    /// Number of completed backups kept on disk; older ones are deleted.
    #[serde(default = "default_keep_last")]
    pub keep_last: u32,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            directory: default_backup_directory(),
            pg_dump_path: default_pg_dump_path(),
            uploads_directory: None,
            keep_last: default_keep_last(),
        }
    }
}

/// Initial administrator created when the user table is empty.
#[derive(Clone, Debug, Deserialize)]
pub struct AdminBootstrap {
    pub email: String,
    pub password: String,
    #[serde(default = "default_admin_name")]
    pub name: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_frontend_url")]
    pub frontend_url: String,
    pub smtp: SmtpConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub exports: ExportConfig,
    #[serde(default)]
    pub backups: BackupConfig,
    #[serde(default)]
    pub admin: Option<AdminBootstrap>,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

fn default_true() -> bool {
    true
}

fn default_session_ttl_hours() -> u32 {
    24
}

fn default_cookie_name() -> String {
    "envmon_session".to_string()
}

fn default_export_directory() -> String {
    "data/exports".to_string()
}

fn default_export_retention_hours() -> u32 {
    72
}

fn default_backup_directory() -> String {
    "data/backups".to_string()
}

fn default_pg_dump_path() -> String {
    "pg_dump".to_string()
}

fn default_keep_last() -> u32 {
    10
}

fn default_admin_name() -> String {
    "Administrator".to_string()
}

fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_frontend_url() -> String {
    "http://localhost:3000".to_string()
}

impl AppConfig {
    /// Checks invariants the type system cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.trim().is_empty() {
            return Err(ConfigError::Validation("database_url must be set".into()));
        }
        if self.session.ttl_hours == 0 {
            return Err(ConfigError::Validation(
                "session.ttl_hours must be > 0".into(),
            ));
        }
        if self.smtp.enabled && self.smtp.port == 0 {
            return Err(ConfigError::Validation("smtp.port must be > 0".into()));
        }
        if let Some(admin) = &self.admin {
            if admin.password.len() < crate::auth::password::MIN_PASSWORD_LENGTH {
                return Err(ConfigError::Validation(format!(
                    "admin.password must be at least {} characters",
                    crate::auth::password::MIN_PASSWORD_LENGTH
                )));
            }
        }
        Ok(())
    }
}

/// Load application configuration from `config.yaml` + environment overrides.
///
/// Any environment variable matching a key path separated by double underscores
/// (e.g. `SMTP__PORT`, `SESSION__TTL_HOURS`) overrides the file value.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from("config.yaml")
}

/// Same as [`load_config`] with an explicit file path. The file is optional so a
/// deployment can be configured from the environment alone.
pub fn load_config_from(path: &str) -> Result<AppConfig, ConfigError> {
    use config::{Config, Environment, File};
    let cfg = Config::builder()
        .add_source(File::with_name(path).required(false))
        .add_source(Environment::default().separator("__"))
        .build()?;

    let app: AppConfig = cfg.try_deserialize()?;
    app.validate()?;
    Ok(app)
}

/// Convenience helper for the binary, which cannot do anything useful without config.
pub fn load_config_or_panic() -> AppConfig {
    match load_config() {
        Ok(c) => c,
        Err(e) => panic!("Failed to load configuration: {e}"),
    }
}
