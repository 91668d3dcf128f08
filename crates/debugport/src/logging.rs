use clap::ValueEnum;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, Layer};

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(self) -> LevelFilter {
        match self {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

/// Target under which re-emitted firmware log lines are recorded.
pub const TARGET_LOGS: &str = "debugport::target";

/// Install the stderr subscriber.
///
/// Host diagnostics are filtered by `level`; firmware log lines re-emitted
/// under [`TARGET_LOGS`] are filtered by `target_level` on their own, so
/// `--log-level warn --target-log-level debug` shows every firmware line
/// without host chatter. Thread names show which side of the link (rx, tx,
/// router) an event came from.
pub fn init_logging(format: LogFormat, level: LogLevel, target_level: LogLevel) {
    let filter = Targets::new()
        .with_default(level.as_filter())
        .with_target(TARGET_LOGS, target_level.as_filter());
    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(true)
        .with_thread_names(true);

    let layer = match format {
        LogFormat::Text => layer.with_filter(filter).boxed(),
        LogFormat::Json => layer.json().with_filter(filter).boxed(),
    };
    let _ = tracing_subscriber::registry().with(layer).try_init();
}
