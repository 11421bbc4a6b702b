use std::{fs, path::Path};

use anyhow::Context;
use chrono::Utc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

pub const DEFAULT_LOG_FILTER: &str = "info,swingshift_core=debug";
pub const DEFAULT_FILE_PREFIX: &str = "swingshift";

/// Keeps the file writer alive; drop it last so buffered lines are flushed.
pub struct TelemetryGuard {
    pub session_id: Uuid,
    _file_guard: Option<WorkerGuard>,
}

pub fn init_tracing(log_dir: impl AsRef<Path>) -> anyhow::Result<TelemetryGuard> {
    init_tracing_with_options(Some(log_dir.as_ref()), DEFAULT_FILE_PREFIX, DEFAULT_LOG_FILTER)
}

/// Console only, for runs without a log directory.
pub fn init_console_tracing(default_filter: &str) -> anyhow::Result<TelemetryGuard> {
    init_tracing_with_options(None, DEFAULT_FILE_PREFIX, default_filter)
}

pub fn init_tracing_with_options(
    log_dir: Option<&Path>,
    file_prefix: &str,
    default_filter: &str,
) -> anyhow::Result<TelemetryGuard> {
    let session_id = Uuid::new_v4();

    let (file_writer, file_guard) = match log_dir {
        Some(log_dir) => {
            fs::create_dir_all(log_dir).with_context(|| {
                format!("failed to create log directory: {}", log_dir.display())
            })?;
            let timestamp = Utc::now().format("%Y%m%d-%H%M%S");
            let file_name = format!("{file_prefix}-{timestamp}.log");
            let file_appender = tracing_appender::rolling::never(log_dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(file_appender);
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let console_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(std::io::stderr)
        .with_target(true);

    let file_layer = file_writer.map(|writer| {
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_writer(writer)
    });

    if let Err(error) = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
    {
        warn!(?error, "global tracing subscriber already initialized");
    } else {
        info!(%session_id, "tracing initialized");
    }

    Ok(TelemetryGuard {
        session_id,
        _file_guard: file_guard,
    })
}
