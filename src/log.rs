//! File logging for agency runs.
//!
//! Levels as used across the crate:
//! - ERROR: an operation was aborted (cycle at plan time, a snapshot that could not be written)
//! - WARN: recoverable trouble (team call failed, hub post refused, task failed)
//! - INFO: project lifecycle (created, planned, phase entered, finished, cancelled)
//! - DEBUG: scheduler and validation transitions, dispatch and retries
//! - TRACE: hub traffic and dropped events
//!
//! `--debug` or `AGENCY_DEBUG=1` raises the level to DEBUG; `AGENCY_LOG=<level>`
//! sets it explicitly. Nothing is written until one of the `init` functions
//! has run, so library users and tests stay silent.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, OnceLock};

struct Sink {
    path: PathBuf,
    file: Mutex<File>,
}

static SINK: OnceLock<Sink> = OnceLock::new();
static LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl LogLevel {
    const ALL: [LogLevel; 5] = [
        LogLevel::Error,
        LogLevel::Warn,
        LogLevel::Info,
        LogLevel::Debug,
        LogLevel::Trace,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }

    fn from_u8(v: u8) -> Self {
        Self::ALL
            .get(v as usize)
            .copied()
            .unwrap_or(LogLevel::Trace)
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|l| l.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown log level '{}'", s))
    }
}

/// Level requested by the command line and environment.
fn requested_level(debug: bool) -> LogLevel {
    if let Some(level) = std::env::var("AGENCY_LOG")
        .ok()
        .and_then(|v| v.parse().ok())
    {
        return level;
    }
    let env_debug = std::env::var("AGENCY_DEBUG")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    if debug || env_debug {
        LogLevel::Debug
    } else {
        LogLevel::Info
    }
}

/// Log to ~/.agency/agency.log at INFO.
pub fn init() {
    init_with_debug(false);
}

/// Log to ~/.agency/agency.log, at DEBUG when `debug` is set.
pub fn init_with_debug(debug: bool) {
    let Some(dir) = dirs::home_dir().map(|h| h.join(".agency")) else {
        return;
    };
    if std::fs::create_dir_all(&dir).is_ok() {
        init_to(&dir.join("agency.log"), requested_level(debug));
    }
}

/// Log to `path` at `level`. Only the first successful call picks the file;
/// later calls just change the level.
pub fn init_to(path: &Path, level: LogLevel) {
    set_level(level);
    if SINK.get().is_some() {
        return;
    }
    if let Ok(file) = OpenOptions::new().create(true).append(true).open(path) {
        let _ = SINK.set(Sink {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        });
    }
}

/// File being written, if logging was initialised.
pub fn log_path() -> Option<&'static Path> {
    SINK.get().map(|s| s.path.as_path())
}

pub fn is_debug() -> bool {
    level() >= LogLevel::Debug
}

pub fn set_level(level: LogLevel) {
    LEVEL.store(level as u8, Ordering::SeqCst);
}

pub fn level() -> LogLevel {
    LogLevel::from_u8(LEVEL.load(Ordering::Relaxed))
}

pub fn log_at(level: LogLevel, msg: &str) {
    if level > self::level() {
        return;
    }
    let Some(sink) = SINK.get() else {
        return;
    };
    let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
    let mut file = sink.file.lock().unwrap_or_else(|e| e.into_inner());
    let _ = writeln!(file, "[{}] [{:<5}] {}", timestamp, level.as_str(), msg);
}

#[macro_export]
macro_rules! alog {
    ($($arg:tt)*) => {
        $crate::log::log_at($crate::log::LogLevel::Info, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! alog_error {
    ($($arg:tt)*) => {
        $crate::log::log_at($crate::log::LogLevel::Error, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! alog_warn {
    ($($arg:tt)*) => {
        $crate::log::log_at($crate::log::LogLevel::Warn, &format!($($arg)*))
    };
}

/// Written only at DEBUG or above (`--debug`).
#[macro_export]
macro_rules! alog_debug {
    ($($arg:tt)*) => {
        $crate::log::log_at($crate::log::LogLevel::Debug, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! alog_trace {
    ($($arg:tt)*) => {
        $crate::log::log_at($crate::log::LogLevel::Trace, &format!($($arg)*))
    };
}
