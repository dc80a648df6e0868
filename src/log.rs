//! Logging for tdns-core.
//!
//! Mirrors the reloadable-filter approach used by the rest of the `tdns`
//! server family: a [`tracing_subscriber::EnvFilter`] wrapped in a
//! [`reload::Layer`] so verbosity can change at runtime without restarting
//! the process (e.g. in response to a config reload or a per-zone `debug`
//! toggle).

use std::fmt;

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::Layer as FmtLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::reload::{self, Handle};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

use crate::config::{LogLevel, LogTarget, LoggingConfig};

//----------- Logger -----------------------------------------------------------

/// The state of the tdns-core logger.
pub struct Logger {
    filter: Handle<EnvFilter, Registry>,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger").field("filter", &self.filter).finish()
    }
}

impl Logger {
    /// Launch the logger.
    ///
    /// ## Panics
    ///
    /// Panics if a global [`tracing`] subscriber has already been set.
    pub fn launch(config: &LoggingConfig) -> Result<&'static Logger, String> {
        let filter = make_env_filter(config)?;
        let (filter, filter_handle) = reload::Layer::new(filter);

        match &config.target {
            LogTarget::File(path) => {
                let file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|e| format!("could not open log file {path:?}: {e}"))?;
                let layer = FmtLayer::new().with_ansi(false).with_writer(file);
                tracing_subscriber::registry().with(filter).with(layer).init();
            }
            LogTarget::Stderr => {
                let layer = FmtLayer::new().with_writer(std::io::stderr);
                tracing_subscriber::registry().with(filter).with(layer).init();
            }
            LogTarget::Stdout => {
                let layer = FmtLayer::new().with_writer(std::io::stdout);
                tracing_subscriber::registry().with(filter).with(layer).init();
            }
        };

        Ok(Box::leak(Box::new(Self {
            filter: filter_handle,
        })))
    }

    /// Apply a changed [`LoggingConfig`] without restarting the process.
    pub fn apply(&self, config: &LoggingConfig) -> Result<(), String> {
        self.filter
            .reload(make_env_filter(config)?)
            .map_err(|_| "could not reload log filter".to_string())
    }
}

/// Build a fresh [`EnvFilter`] from a [`LoggingConfig`].
fn make_env_filter(config: &LoggingConfig) -> Result<EnvFilter, String> {
    // Start from a filter that reads no environment variables, then layer
    // the configured level and per-target overrides on top -- config always
    // wins over whatever happens to be in the process environment.
    let mut filter = EnvFilter::default().add_directive(LevelFilter::from(config.level).into());

    for target in &config.trace_targets {
        filter = filter
            .add_directive(target.parse().map_err(|_| format!("invalid trace target: '{target}'"))?);
    }

    Ok(filter)
}

impl From<LogLevel> for LevelFilter {
    fn from(value: LogLevel) -> Self {
        match value {
            LogLevel::Quiet => LevelFilter::ERROR,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Verbose => LevelFilter::DEBUG,
            LogLevel::Debug => LevelFilter::TRACE,
        }
    }
}
