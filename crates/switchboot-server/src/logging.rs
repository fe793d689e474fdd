use std::path::Path;
use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::AppConfig;

/// Initialize the logging system. Returns the file writer guard when a log
/// file is configured; the caller keeps it alive for the process lifetime.
pub fn init_logging(config: &AppConfig) -> Result<Option<WorkerGuard>, Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            // Keep sqlx polling noise down, surface serial traffic when the
            // operator asks for debug.
            let filter_str = format!(
                "{},switchboot_core={},sqlx=warn,tower_http=info",
                config.log_level, config.log_level
            );
            EnvFilter::try_new(&filter_str)
        })
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    let mut guard = None;

    match (&config.log_file, config.log_format.as_str()) {
        (Some(file_path), "json") => {
            let path = Path::new(file_path);
            let directory = path.parent().unwrap_or_else(|| Path::new("."));
            let filename = path
                .file_name()
                .unwrap_or_else(|| std::ffi::OsStr::new("switchboot.log"));

            let file_appender = rolling::daily(directory, filename);
            let (file_writer, file_guard) = non_blocking(file_appender);
            guard = Some(file_guard);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(file_writer))
                .with(fmt::layer().json())
                .init();
        }
        (Some(file_path), _) => {
            let path = Path::new(file_path);
            let directory = path.parent().unwrap_or_else(|| Path::new("."));
            let filename = path
                .file_name()
                .unwrap_or_else(|| std::ffi::OsStr::new("switchboot.log"));

            let file_appender = rolling::daily(directory, filename);
            let (file_writer, file_guard) = non_blocking(file_appender);
            guard = Some(file_guard);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(file_writer))
                .with(fmt::layer())
                .init();
        }
        (None, "json") => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .init();
        }
        (None, _) => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer())
                .init();
        }
    }

    tracing::info!(
        level = %config.log_level,
        file = ?config.log_file,
        format = %config.log_format,
        "Logging system initialized"
    );

    Ok(guard)
}
