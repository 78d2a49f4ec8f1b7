//! Leveled logging facade.
//!
//! The daemon logs through six numbered levels, `EWNIDV`:
//!
//! | index | level     | tag | tracing level |
//! |-------|-----------|-----|---------------|
//! | 0     | `Error`   | `E` | `ERROR`       |
//! | 1     | `Warning` | `W` | `WARN`        |
//! | 2     | `Notify`  | `N` | `INFO`        |
//! | 3     | `Info`    | `I` | `INFO`        |
//! | 4     | `Debug`   | `D` | `DEBUG`       |
//! | 5     | `Verbose` | `V` | `TRACE`       |
//!
//! Indices outside `0..=5` are dropped without error. Every record is
//! emitted as a `tracing` event on the `racoon` target, so the sink is
//! whatever subscriber [`crate::tracing::init_tracing`] installed.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::Level;

/// Target used for every record emitted through this module.
pub const LOG_TARGET: &str = "racoon";

/// Log levels, ordered from most to least severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error = 0,
    Warning = 1,
    Notify = 2,
    Info = 3,
    Debug = 4,
    Verbose = 5,
}

impl LogLevel {
    /// All levels in index order.
    pub const ALL: [LogLevel; 6] = [
        LogLevel::Error,
        LogLevel::Warning,
        LogLevel::Notify,
        LogLevel::Info,
        LogLevel::Debug,
        LogLevel::Verbose,
    ];

    /// Maps a numeric level to a `LogLevel`, or `None` when out of range.
    pub fn from_index(index: i32) -> Option<Self> {
        usize::try_from(index)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
    }

    /// Numeric index of this level.
    pub fn index(self) -> i32 {
        self as i32
    }

    /// One-letter tag used as a line prefix.
    pub fn tag(self) -> char {
        match self {
            Self::Error => 'E',
            Self::Warning => 'W',
            Self::Notify => 'N',
            Self::Info => 'I',
            Self::Debug => 'D',
            Self::Verbose => 'V',
        }
    }

    /// The tracing level this record is emitted at.
    pub fn tracing_level(self) -> Level {
        match self {
            Self::Error => Level::ERROR,
            Self::Warning => Level::WARN,
            Self::Notify | Self::Info => Level::INFO,
            Self::Debug => Level::DEBUG,
            Self::Verbose => Level::TRACE,
        }
    }

    /// Next more verbose level, saturating at `Verbose`.
    #[must_use]
    pub fn more_verbose(self) -> Self {
        Self::from_index(self.index() + 1).unwrap_or(Self::Verbose)
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Notify => "notify",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Verbose => "verbose",
        };
        f.write_str(name)
    }
}

/// Logs a pre-formatted record at a numeric level.
///
/// Out-of-range levels are silently ignored.
pub fn plog(level: i32, args: fmt::Arguments<'_>) {
    if let Some(level) = LogLevel::from_index(level) {
        log_at(level, args);
    }
}

/// Logs a pre-formatted record at `level`.
pub fn log_at(level: LogLevel, args: fmt::Arguments<'_>) {
    let tag = level.tag();
    match level {
        LogLevel::Error => tracing::error!(target: LOG_TARGET, tag = %tag, "{}", args),
        LogLevel::Warning => tracing::warn!(target: LOG_TARGET, tag = %tag, "{}", args),
        LogLevel::Notify | LogLevel::Info => {
            tracing::info!(target: LOG_TARGET, tag = %tag, "{}", args)
        }
        LogLevel::Debug => tracing::debug!(target: LOG_TARGET, tag = %tag, "{}", args),
        LogLevel::Verbose => tracing::trace!(target: LOG_TARGET, tag = %tag, "{}", args),
    }
}

/// Formats and logs a record: `plog!(LogLevel::Info, "bound {}", addr)`.
///
/// The level may be a [`LogLevel`] or a raw `i32` index.
#[macro_export]
macro_rules! plog {
    ($level:expr, $($arg:tt)+) => {
        $crate::plog::plog(
            $crate::plog::IntoLevelIndex::into_level_index($level),
            format_args!($($arg)+),
        )
    };
}

/// Anything usable as the level argument of [`plog!`].
pub trait IntoLevelIndex {
    fn into_level_index(self) -> i32;
}

impl IntoLevelIndex for LogLevel {
    fn into_level_index(self) -> i32 {
        self.index()
    }
}

impl IntoLevelIndex for i32 {
    fn into_level_index(self) -> i32 {
        self
    }
}

/// Replaces every byte outside printable ASCII with `?`.
///
/// Used before logging payloads received from the network.
pub fn sanitize_binary(data: &[u8]) -> String {
    data.iter()
        .map(|&b| {
            if (0x20..=0x7e).contains(&b) {
                b as char
            } else {
                '?'
            }
        })
        .collect()
}
