//! Tracing setup with a runtime-adjustable verbosity level.
//!
//! Binaries call [`init_logging`] once and keep the returned [`LogHandle`];
//! verbosity changes received on the control surface are applied through it.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter, Registry};

/// The three discrete verbosity levels accepted on the control surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Verbosity {
    #[default]
    Normal,
    Verbose,
    Debug,
}

#[derive(Debug, Error)]
#[error("verbosity must be 1, 2 or 3 (got {0})")]
pub struct InvalidVerbosity(pub u8);

impl TryFrom<u8> for Verbosity {
    type Error = InvalidVerbosity;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            1 => Ok(Verbosity::Normal),
            2 => Ok(Verbosity::Verbose),
            3 => Ok(Verbosity::Debug),
            other => Err(InvalidVerbosity(other)),
        }
    }
}

impl From<Verbosity> for u8 {
    fn from(v: Verbosity) -> u8 {
        match v {
            Verbosity::Normal => 1,
            Verbosity::Verbose => 2,
            Verbosity::Debug => 3,
        }
    }
}

impl fmt::Display for Verbosity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", u8::from(*self))
    }
}

impl Verbosity {
    /// `EnvFilter` directives for this level. Our own crates get one step
    /// more detail than dependencies.
    pub fn filter_directives(self) -> &'static str {
        match self {
            Verbosity::Normal => "info",
            Verbosity::Verbose => "info,archivist=debug",
            Verbosity::Debug => "debug,archivist=trace",
        }
    }
}

#[derive(Debug, Error)]
#[error("failed to reload log filter: {0}")]
pub struct LogReloadError(#[from] reload::Error);

/// Handle for changing the active log filter after initialization.
#[derive(Clone)]
pub struct LogHandle {
    filter: reload::Handle<EnvFilter, Registry>,
}

impl LogHandle {
    pub fn set_verbosity(&self, verbosity: Verbosity) -> Result<(), LogReloadError> {
        self.filter
            .reload(EnvFilter::new(verbosity.filter_directives()))?;
        Ok(())
    }
}

/// Install the global subscriber. `RUST_LOG` wins over `verbosity` at startup.
pub fn init_logging(verbosity: Verbosity) -> LogHandle {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.filter_directives()));
    let (filter, handle) = reload::Layer::new(filter);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    LogHandle { filter: handle }
}
