use anyhow::Context as _;
use std::{
    fs::File,
    path::{Path, PathBuf},
    sync::OnceLock,
};
use time::{Date, OffsetDateTime};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::MakeWriterExt as _;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt as _, util::SubscriberInitExt as _};

/// Target of the per-request metrics event. It goes to the JSON file only.
pub const METRICS_TARGET: &str = "zengate::metrics";

/// Environment variable holding a full `EnvFilter` directive. When set it
/// wins over `--log-level`.
pub const LOG_ENV: &str = "ZENGATE_LOG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LogLevel {
    None,
    Debug,
    #[default]
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn to_env_filter_directive(self) -> &'static str {
        match self {
            LogLevel::None => "off",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
        }
    }
}

static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

fn today_local() -> Date {
    OffsetDateTime::now_local()
        .unwrap_or_else(|_| OffsetDateTime::now_utc())
        .date()
}

fn daily_file_name(date: Date) -> String {
    format!(
        "{:04}-{:02}-{:02}.log",
        date.year(),
        u8::from(date.month()),
        date.day()
    )
}

fn open_daily_log_file(log_dir: &Path, date: Date) -> anyhow::Result<File> {
    let path = log_dir.join(daily_file_name(date));
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("open log file {}", path.display()))
}

/// Appends to `<log_dir>/YYYY-MM-DD.log`, switching files when the local
/// date changes.
struct LocalDailyFileAppender {
    log_dir: PathBuf,
    current_date: Date,
    file: File,
}

impl LocalDailyFileAppender {
    fn new(log_dir: PathBuf) -> anyhow::Result<Self> {
        let current_date = today_local();
        let file = open_daily_log_file(&log_dir, current_date)?;
        Ok(Self {
            log_dir,
            current_date,
            file,
        })
    }

    fn maybe_rollover(&mut self) -> anyhow::Result<()> {
        let date = today_local();
        if date != self.current_date {
            self.file = open_daily_log_file(&self.log_dir, date)?;
            self.current_date = date;
        }
        Ok(())
    }
}

impl std::io::Write for LocalDailyFileAppender {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.maybe_rollover().map_err(std::io::Error::other)?;
        std::io::Write::write(&mut self.file, buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        std::io::Write::flush(&mut self.file)
    }
}

pub fn log_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("logs")
}

/// Installs the global subscriber: compact human output on stderr plus one
/// JSON object per line in the daily file.
pub fn init(data_dir: &Path, level: LogLevel) -> anyhow::Result<()> {
    let log_dir = log_dir(data_dir);
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("create log directory {}", log_dir.display()))?;

    let env_filter = match std::env::var(LOG_ENV) {
        Ok(v) if !v.trim().is_empty() => EnvFilter::new(v),
        _ => EnvFilter::new(level.to_env_filter_directive()),
    };

    let file_appender =
        LocalDailyFileAppender::new(log_dir).context("initialise log file writer")?;
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);

    let console_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(std::io::stderr.with_filter(|meta| meta.target() != METRICS_TARGET))
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false);

    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_target(true)
        .with_current_span(false)
        .with_span_list(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(file_writer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("install tracing subscriber")?;

    FILE_GUARD
        .set(file_guard)
        .map_err(|_| anyhow::anyhow!("logging already initialised"))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Month;

    #[test]
    fn daily_file_is_named_by_date() {
        let date = Date::from_calendar_date(2026, Month::March, 5).unwrap();
        assert_eq!(daily_file_name(date), "2026-03-05.log");
    }

    #[test]
    fn log_level_directives() {
        assert_eq!(LogLevel::None.to_env_filter_directive(), "off");
        assert_eq!(LogLevel::Warning.to_env_filter_directive(), "warn");
        assert_eq!(LogLevel::default(), LogLevel::Info);
    }
}
