use envmon::AppResources;
use envmon::api::{BackupAppState, start_webserver};
use envmon::auth::{session, users::UsersService};
use envmon::backups::{BackupService, BackupTaskManager};
use envmon::config::load_config_or_panic;
use envmon::settings::SettingsService;
use lettre::{AsyncSmtpTransport, Tokio1Executor, transport::smtp::authentication::Credentials};
use sea_orm::Database;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

fn initialize_standard_tracing() {
    let default_directives = "envmon=info,tower_http=info,hyper=warn,sea_orm=warn";
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));

    let registry = tracing_subscriber::registry().with(env_filter);
    let layer = fmt::layer().with_target(true).with_level(true);

    registry.with(layer).init();
}

#[tokio::main]
async fn main() -> color_eyre::eyre::Result<()> {
    color_eyre::install()?;
    // A missing .env is fine; config.yaml and the real environment still apply.
    let _ = dotenvy::dotenv();

    initialize_standard_tracing();
    envmon::system::mark_started();

    let config = Arc::new(load_config_or_panic());

    let db = Arc::new(Database::connect(&config.database_url).await?);

    let creds = Credentials::new(config.smtp.username.clone(), config.smtp.password.clone());
    let mailer = Arc::new(
        AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp.server)?
            .port(config.smtp.port)
            .credentials(creds)
            .build(),
    );

    let resources = Arc::new(AppResources { db, mailer, config });

    if let Some(admin) = UsersService::new(resources.db.clone())
        .ensure_bootstrap_admin(resources.config.admin.as_ref())
        .await?
    {
        tracing::info!(
            name = "startup.admin_bootstrapped",
            target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
            email = %admin.email,
            message = "Created initial administrator"
        );
    }
    SettingsService::new(resources.db.clone())
        .seed_defaults()
        .await?;

    tracing::info!(
        smtp_enabled = %resources.config.smtp.enabled,
        metrics_enabled = %resources.config.metrics.enabled,
        session_ttl_hours = %resources.config.session.ttl_hours,
        exports_dir = %resources.config.exports.directory,
        backups_dir = %resources.config.backups.directory,
        "configuration loaded"
    );

    session::spawn_cleanup_task(resources.db.clone(), resources.config.session.ttl());
    envmon::alerts::spawn_offline_check_task(resources.clone());
    envmon::maintenance::spawn_overdue_task(resources.clone());
    envmon::notifications::spawn_purge_task(resources.clone());
    envmon::exports::spawn_cleanup_task(resources.clone());

    let backup_state = BackupAppState {
        task_manager: Arc::new(BackupTaskManager::new()),
    };
    BackupService::new((*resources).clone(), backup_state.task_manager.clone())
        .fail_interrupted()
        .await?;

    start_webserver((*resources).clone(), backup_state).await?;
    Ok(())
}
