use std::path::Path;
use std::sync::OnceLock;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

#[derive(Debug, thiserror::Error)]
pub enum LogSetupError {
    #[error("Invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),
    #[error("Failed to prepare log directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to create log file appender: {0}")]
    Appender(#[from] tracing_appender::rolling::InitError),
    #[error("Logger initialization failed: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// Installs the global subscriber: console output plus, when `log_dir` is given, a daily-rolling
/// file named `<app_name>.<date>.log`. `RUST_LOG` overrides `base_level`.
pub fn setup_logging(
    app_name: &str,
    base_level: &str,
    log_dir: Option<&Path>,
) -> Result<(), LogSetupError> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(base_level)?,
    };

    let console_writer = std::io::stdout.and(std::io::stderr.with_min_level(Level::WARN));
    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_line_number(true)
        .with_ansi(true)
        .with_writer(console_writer);

    let file_layer = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file_appender = tracing_appender::rolling::Builder::new()
                .rotation(tracing_appender::rolling::Rotation::DAILY)
                .filename_prefix(app_name)
                .filename_suffix("log")
                .max_log_files(5)
                .build(dir)?;

            let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
            // a second call keeps the first guard; the registry init below reports the clash
            let _ = LOG_GUARD.set(guard);

            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_line_number(true)
                    .with_ansi(false)
                    .with_writer(file_writer)
                    .boxed(),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    Ok(())
}

/// Routes `tracing` output through the test harness; safe to call from every test.
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}
