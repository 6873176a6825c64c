//! Logging configuration for the load generator.
//!
//! All diagnostics go through [`tracing`]; this crate only decides how events are formatted and
//! filtered. Binaries flatten [`Options`] into their own command line and call [`Options::init`]
//! once at startup, tests call [`init_test_logging`].

use clap::{Args, ValueEnum};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Corresponds to [`tracing_subscriber::fmt::format::Compact`]
    Compact,

    /// Corresponds to [`tracing_subscriber::fmt::format::Full`]
    Full,

    /// Corresponds to [`tracing_subscriber::fmt::format::Pretty`]
    Pretty,

    /// Corresponds to [`tracing_subscriber::fmt::format::Json`]
    Json,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to parse log level filter: {0}")]
    Parse(#[from] tracing_subscriber::filter::ParseError),
    #[error("failed to install the global subscriber: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

#[derive(Debug, Clone, Args)]
#[group(id = "logging")]
pub struct Options {
    /// Format to use when emitting log events.
    #[arg(long, env = "LOG_FORMAT", default_value = "full", value_enum)]
    pub log_format: LogFormat,

    /// Log level filter for spans and events. The log level filter string is a comma separated
    /// list of directives.
    /// See [`tracing_subscriber::EnvFilter`] for full documentation on the directive syntax.
    ///
    /// Examples:
    ///
    /// Log at INFO level for everything.
    /// ```bash
    /// LOG_LEVEL=info
    /// ```
    ///
    /// Log at DEBUG level for the generator only, to see which statement shapes were
    /// substituted.
    /// ```bash
    /// LOG_LEVEL=warn,load_generator=debug
    /// ```
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Full,
            log_level: "info".to_owned(),
        }
    }
}

impl Options {
    /// Build the filter described by `log_level`, without installing anything.
    pub fn env_filter(&self) -> Result<EnvFilter, Error> {
        Ok(EnvFilter::try_new(&self.log_level)?)
    }

    /// Install the global subscriber. Logs go to stderr so they never interleave with anything a
    /// caller writes to stdout.
    pub fn init(&self) -> Result<(), Error> {
        use tracing_subscriber::util::SubscriberInitExt;

        let s = tracing_subscriber::fmt()
            .with_env_filter(self.env_filter()?)
            .with_writer(std::io::stderr);

        match self.log_format {
            LogFormat::Compact => s.compact().finish().try_init()?,
            LogFormat::Full => s.finish().try_init()?,
            LogFormat::Pretty => s.pretty().finish().try_init()?,
            LogFormat::Json => s.json().with_current_span(true).finish().try_init()?,
        }

        Ok(())
    }
}

/// Configure the global tracing subscriber for logging inside of tests
pub fn init_test_logging() {
    // This errors out if it's already been called within the scope of a process, which we don't
    // care about, so we just discard the result
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_env("LOG_LEVEL"))
        .with_test_writer()
        .try_init();
}
