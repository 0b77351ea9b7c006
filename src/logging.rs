use std::fs::OpenOptions;
use std::path::Path;

use anyhow::{Context, Result};
use env_logger::{Builder, Target, WriteStyle};
use log::LevelFilter;

/// Base level from the config, raised to debug when `DEBUG` is `1` or `true`.
///
/// An unparsable level falls back to info.
pub fn base_level(configured: &str, debug_env: Option<&str>) -> LevelFilter {
    let forced = debug_env.is_some_and(|value| {
        value == "1" || value.eq_ignore_ascii_case("true")
    });
    if forced {
        return LevelFilter::Debug;
    }
    configured.parse().unwrap_or(LevelFilter::Info)
}

/// Installs the global logger. `RUST_LOG` directives take precedence over
/// the configured level.
///
/// # Errors
///
/// Fails if the log file cannot be opened or a logger is already installed.
pub fn init(configured_level: &str, log_file: Option<&Path>) -> Result<()> {
    let debug_env = std::env::var("DEBUG").ok();

    let mut builder = Builder::new();
    builder
        .filter_level(base_level(configured_level, debug_env.as_deref()))
        .format_timestamp_millis()
        .parse_default_env();

    if let Some(path) = log_file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open log file: {}", path.display()))?;
        builder
            .target(Target::Pipe(Box::new(file)))
            .write_style(WriteStyle::Never);
    }

    builder.try_init().context("Failed to initialise logger")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_level_used() {
        assert_eq!(base_level("warn", None), LevelFilter::Warn);
        assert_eq!(base_level("DEBUG", None), LevelFilter::Debug);
    }

    #[test]
    fn test_debug_env_forces_debug() {
        assert_eq!(base_level("error", Some("1")), LevelFilter::Debug);
        assert_eq!(base_level("error", Some("TRUE")), LevelFilter::Debug);
        assert_eq!(base_level("error", Some("0")), LevelFilter::Error);
    }

    #[test]
    fn test_bad_level_falls_back_to_info() {
        assert_eq!(base_level("chatty", None), LevelFilter::Info);
    }
}
