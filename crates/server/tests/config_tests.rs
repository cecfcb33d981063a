use config::Config;
use envmon::config::{AppConfig, ConfigError, SmtpConfig, load_config_from};
use std::fs;

fn from_yaml(yaml: &str) -> AppConfig {
    Config::builder()
        .add_source(config::File::from_str(yaml, config::FileFormat::Yaml))
        .build()
        .expect("Failed to build config")
        .try_deserialize()
        .expect("Failed to deserialize app config")
}

const MINIMAL: &str = r#"
database_url: "postgres://localhost/envmon"
smtp:
  server: "smtp.example.com"
  port: 587
  username: "user@example.com"
  password: "secret123"
  from: "alerts@example.com"
"#;

#[test]
fn test_smtp_config_deserialization() {
    let yaml_content = r#"
server: "smtp.example.com"
port: 587
username: "user@example.com"
password: "secret123"
from: "alerts@example.com"
"#;

    let smtp: SmtpConfig = Config::builder()
        .add_source(config::File::from_str(
            yaml_content,
            config::FileFormat::Yaml,
        ))
        .build()
        .expect("Failed to build config")
        .try_deserialize()
        .expect("Failed to deserialize SMTP config");
    assert!(smtp.enabled);
    assert_eq!(smtp.server, "smtp.example.com");
    assert_eq!(smtp.port, 587);
    assert_eq!(smtp.from, "alerts@example.com");
}

#[test]
fn test_defaults_applied() {
    let config = from_yaml(MINIMAL);
    assert_eq!(config.bind_address, "0.0.0.0:8080");
    assert_eq!(config.frontend_url, "http://localhost:3000");
    assert_eq!(config.session.ttl_hours, 24);
    assert_eq!(config.session.cookie_name, "envmon_session");
    assert!(!config.session.secure_cookie);
    assert_eq!(config.exports.retention_hours, 72);
    assert_eq!(config.backups.pg_dump_path, "pg_dump");
    assert_eq!(config.backups.keep_last, 10);
    assert!(config.backups.uploads_directory.is_none());
    assert!(config.admin.is_none());
    assert!(config.metrics.enabled);
    config.validate().expect("minimal config is valid");
}

#[test]
fn test_full_config() {
    let yaml = r#"
database_url: "postgres://db/envmon"
bind_address: "127.0.0.1:9000"
frontend_url: "https://monitor.example.org"
smtp:
  enabled: false
  server: "smtp.example.com"
  port: 25
  username: "u"
  password: "p"
  from: "alerts@example.org"
session:
  ttl_hours: 8
  secure_cookie: true
exports:
  directory: "/var/lib/envmon/exports"
  retention_hours: 24
backups:
  directory: "/var/lib/envmon/backups"
  uploads_directory: "/var/lib/envmon/uploads"
  keep_last: 5
admin:
  email: "admin@example.org"
  password: "a long enough password"
metrics:
  enabled: false
"#;
    let config = from_yaml(yaml);
    assert_eq!(config.bind_address, "127.0.0.1:9000");
    assert!(!config.smtp.enabled);
    assert_eq!(config.session.ttl(), time::Duration::hours(8));
    assert!(config.session.secure_cookie);
    assert_eq!(config.exports.retention_hours, 24);
    assert_eq!(
        config.backups.uploads_directory.as_deref(),
        Some("/var/lib/envmon/uploads")
    );
    let admin = config.admin.as_ref().expect("admin");
    assert_eq!(admin.name, "Administrator");
    assert!(!config.metrics.enabled);
    config.validate().expect("valid");
}

#[test]
fn test_validation_failures() {
    let mut config = from_yaml(MINIMAL);
    config.session.ttl_hours = 0;
    assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));

    let mut config = from_yaml(MINIMAL);
    config.database_url = "  ".into();
    assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));

    let mut config = from_yaml(MINIMAL);
    config.smtp.port = 0;
    assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    config.smtp.enabled = false;
    config.validate().expect("port is irrelevant without smtp");
}

#[test]
fn test_short_admin_password_rejected() {
    let yaml = format!(
        "{MINIMAL}admin:\n  email: \"admin@example.org\"\n  password: \"short\"\n"
    );
    let config = from_yaml(&yaml);
    assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
}

#[test]
fn test_load_config_from_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("envmon_test_config.yaml");
    fs::write(&path, MINIMAL).expect("write config");

    let config = load_config_from(path.to_str().expect("utf-8 path")).expect("load");
    assert_eq!(config.database_url, "postgres://localhost/envmon");
    assert_eq!(config.smtp.port, 587);
}

#[test]
fn test_load_config_rejects_invalid_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("envmon_invalid_config.yaml");
    fs::write(
        &path,
        format!("{MINIMAL}session:\n  ttl_hours: 0\n"),
    )
    .expect("write config");

    let err = load_config_from(path.to_str().expect("utf-8 path")).unwrap_err();
    assert!(matches!(err, ConfigError::Validation(_)));
}
