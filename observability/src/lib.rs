//! # Logging helpers
//!
//! Every ethevents binary calls [init_tracing] once at startup. Log verbosity is
//! controlled with `RUST_LOG` (default `info`) and the output format with
//! `RUST_LOG_FORMAT` (`json` for machine-readable lines, anything else for the
//! compact coloured format).

mod log_fmt;

use error_stack::{Result, ResultExt};
use tracing::Subscriber;
use tracing_subscriber::{prelude::*, registry::LookupSpan, EnvFilter, Layer};

pub use self::log_fmt::IndexerFormat;

const RUST_LOG_FORMAT: &str = "RUST_LOG_FORMAT";

pub type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync>;

#[derive(Debug)]
pub struct TracingInitError;
impl error_stack::Context for TracingInitError {}

impl std::fmt::Display for TracingInitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("failed to initialize tracing")
    }
}

/// Output format of the log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    pub fn from_env() -> Self {
        match std::env::var(RUST_LOG_FORMAT) {
            Ok(value) if value == "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

/// Initialize the global tracing subscriber.
///
/// ```rs
/// use ethevents_observability::init_tracing;
///
/// init_tracing().unwrap();
/// ```
pub fn init_tracing() -> Result<(), TracingInitError> {
    let layer = stdout(LogFormat::from_env());

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .change_context(TracingInitError)
        .attach_printable("a global subscriber is already installed")?;

    Ok(())
}

fn stdout<S>(format: LogFormat) -> BoxedLayer<S>
where
    S: Subscriber,
    for<'a> S: LookupSpan<'a>,
{
    let log_env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .json()
            .with_filter(log_env_filter)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .with_ansi(true)
            .event_format(IndexerFormat::default())
            .with_filter(log_env_filter)
            .boxed(),
    }
}
