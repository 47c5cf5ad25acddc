use clap::ValueEnum;
use serde::Deserialize;
use strum::Display;

#[derive(Copy, Clone, Display, Debug, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl From<LogLevel> for log::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => Self::Off,
            LogLevel::Error => Self::Error,
            LogLevel::Warn => Self::Warn,
            LogLevel::Info => Self::Info,
            LogLevel::Debug => Self::Debug,
            LogLevel::Trace => Self::Trace,
        }
    }
}

/// Installs the global logger. `RUST_LOG` directives are applied on top of `level`.
pub fn init_logging(level: LogLevel) {
    let mut builder = pretty_env_logger::formatted_timed_builder();
    builder.filter_level(level.into());
    if let Ok(directives) = std::env::var("RUST_LOG") {
        builder.parse_filters(&directives);
    }
    if let Err(error) = builder.try_init() {
        eprintln!("logger already initialized: {}", error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_onto_log_filters() {
        assert_eq!(log::LevelFilter::from(LogLevel::Off), log::LevelFilter::Off);
        assert_eq!(log::LevelFilter::from(LogLevel::Warn), log::LevelFilter::Warn);
        assert_eq!(log::LevelFilter::from(LogLevel::default()), log::LevelFilter::Info);
    }

    #[test]
    fn display_matches_cli_spelling() {
        assert_eq!(LogLevel::Debug.to_string(), "debug");
        assert_eq!(LogLevel::from_str("trace", true), Ok(LogLevel::Trace));
    }
}
