//! log4rs setup for processes embedding the gateway.
//!
//! The library itself only uses the `log` facade. Adaptive rate changes go
//! to the `docgate::metrics` target, which [`init_file`] routes to its own
//! rolling file.

use log::LevelFilter;
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::append::rolling_file::RollingFileAppender;
use log4rs::append::rolling_file::policy::compound::{
    CompoundPolicy, roll::fixed_window::FixedWindowRoller, trigger::size::SizeTrigger,
};
use log4rs::config::{Appender, Config, Logger, Root};
use log4rs::encode::pattern::PatternEncoder;
use std::path::Path;

const PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S%.3f)} [{l}] {t} - {m}{n}";
const ROLL_SIZE: u64 = 10 * 1024 * 1024;
const DEFAULT_RETENTION: u32 = 7;
pub const METRICS_TARGET: &str = "docgate::metrics";

/// `error|warn|info|debug|trace`, case-insensitive; anything else is `info`.
pub fn parse_level(level: &str) -> LevelFilter {
    match level.to_ascii_lowercase().as_str() {
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    }
}

/// Logs to stderr.
///
/// # Errors
/// Fails if a logger is already installed for this process.
pub fn init_console(level: &str) -> Result<(), Box<dyn std::error::Error>> {
    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new(PATTERN)))
        .build();
    let config = Config::builder()
        .appender(Appender::builder().build("stderr", Box::new(stderr)))
        .build(Root::builder().appender("stderr").build(parse_level(level)))?;
    log4rs::init_config(config)?;
    Ok(())
}

fn rolling(
    dir: &Path,
    name: &str,
    keep: u32,
) -> Result<RollingFileAppender, Box<dyn std::error::Error>> {
    let roller = FixedWindowRoller::builder()
        .build(&format!("{}", dir.join(format!("{name}.{{}}.log")).display()), keep)?;
    let policy = CompoundPolicy::new(Box::new(SizeTrigger::new(ROLL_SIZE)), Box::new(roller));
    let appender = RollingFileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(PATTERN)))
        .build(dir.join(format!("{name}.log")), Box::new(policy))?;
    Ok(appender)
}

/// Writes `gateway.log` and `metrics.log` under `dir`, rolling at 10 MiB and
/// keeping `retention` old files of each (7 when `None`).
///
/// # Errors
/// Returns an error if the directory cannot be created or the logger fails to initialize.
pub fn init_file(
    dir: &Path,
    level: &str,
    retention: Option<u32>,
) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::create_dir_all(dir)?;
    let keep = retention.unwrap_or(DEFAULT_RETENTION);
    let lvl = parse_level(level);
    let config = Config::builder()
        .appender(Appender::builder().build("gateway", Box::new(rolling(dir, "gateway", keep)?)))
        .appender(Appender::builder().build("metrics", Box::new(rolling(dir, "metrics", keep)?)))
        .logger(Logger::builder().appender("metrics").additive(false).build(METRICS_TARGET, lvl))
        .build(Root::builder().appender("gateway").build(lvl))?;
    log4rs::init_config(config)?;
    Ok(())
}

/// Loads a log4rs YAML/TOML config file.
///
/// # Errors
/// Fails if the file cannot be read or a logger is already installed.
pub fn init_path(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    log4rs::init_file(path, log4rs::config::Deserializers::default())?;
    Ok(())
}

/// Configure from `DOCGATE_LOG_DIR`, `DOCGATE_LOG_LEVEL` and
/// `DOCGATE_LOG_RETENTION`. Without a directory, logs go to stderr.
///
/// # Errors
/// Same as [`init_file`] / [`init_console`].
pub fn configure_from_env() -> Result<(), Box<dyn std::error::Error>> {
    let level = std::env::var("DOCGATE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let retention = std::env::var("DOCGATE_LOG_RETENTION").ok().and_then(|s| s.parse::<u32>().ok());
    match std::env::var("DOCGATE_LOG_DIR") {
        Ok(dir) => init_file(Path::new(&dir), &level, retention),
        Err(_) => init_console(&level),
    }
}
