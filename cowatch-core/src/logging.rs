//! Tracing setup for the server binary.

use std::str::FromStr;
use std::sync::Arc;
use tracing_subscriber::{
    filter::LevelFilter,
    fmt::{self, format::FmtSpan, writer::BoxMakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::LoggingConfig;

/// Targets that follow the configured level. Everything else is capped at
/// `warn` so hyper and friends stay quiet at `debug`.
const SERVICE_TARGETS: &[&str] = &[
    "cowatch",
    "cowatch_api",
    "cowatch_core",
    "cowatch_proto",
    "tower_http",
];

/// Install the global subscriber. `RUST_LOG`, when set, replaces the
/// configured level entirely.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(service_directives(&config.level)?)?,
    };
    let writer = log_writer(config.file_path.as_deref())?;
    let registry = tracing_subscriber::registry().with(filter);

    match config.format.as_str() {
        // Session and transcode spans carry the ids, so closing spans are
        // logged with their timing.
        "json" => registry
            .with(
                fmt::layer()
                    .json()
                    .with_span_events(FmtSpan::CLOSE)
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_target(true)
                    .with_writer(writer),
            )
            .try_init()?,
        "pretty" => registry
            .with(
                fmt::layer()
                    .pretty()
                    .with_target(true)
                    .with_line_number(true)
                    .with_file(false)
                    .with_writer(writer),
            )
            .try_init()?,
        other => anyhow::bail!("Unknown log format {other:?}; expected \"json\" or \"pretty\""),
    }

    Ok(())
}

/// Filter directives for `level`: the service's own targets at `level`,
/// dependencies at `warn` or quieter.
pub fn service_directives(level: &str) -> anyhow::Result<String> {
    let level = LevelFilter::from_str(level.trim())
        .map_err(|_| anyhow::anyhow!("Invalid log level: {level}"))?;
    let base = level.min(LevelFilter::WARN);

    let mut directives = vec![base.to_string()];
    directives.extend(SERVICE_TARGETS.iter().map(|target| format!("{target}={level}")));
    Ok(directives.join(","))
}

fn log_writer(file_path: Option<&str>) -> anyhow::Result<BoxMakeWriter> {
    match file_path {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| anyhow::anyhow!("Failed to open log file {path}: {e}"))?;
            Ok(BoxMakeWriter::new(Arc::new(file)))
        }
        None => Ok(BoxMakeWriter::new(std::io::stdout)),
    }
}
