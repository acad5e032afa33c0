//! Process-wide logger for the xid crates.
//!
//! Records are written to stderr as text or one JSON object per line and can
//! optionally be mirrored into a bounded in-memory ring for inspection.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::json;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Level {
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Warn => "WARN",
            Self::Info => "INFO",
            Self::Debug => "DEBUG",
            Self::Trace => "TRACE",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "error" | "fatal" => Some(Self::Error),
            "warn" | "warning" => Some(Self::Warn),
            "info" => Some(Self::Info),
            "debug" | "debugging" => Some(Self::Debug),
            "trace" => Some(Self::Trace),
            _ => None,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Error,
            2 => Self::Warn,
            3 => Self::Info,
            4 => Self::Debug,
            _ => Self::Trace,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Format {
    Text = 0,
    Json = 1,
}

impl Format {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "text" | "console" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct LogConfig {
    pub level: Level,
    pub format: Format,
    pub timestamps: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::Info,
            format: Format::Text,
            timestamps: true,
        }
    }
}

static LOG_LEVEL: AtomicU8 = AtomicU8::new(Level::Info as u8);
static LOG_FORMAT: AtomicU8 = AtomicU8::new(Format::Text as u8);
static LOG_TIMESTAMPS: AtomicBool = AtomicBool::new(true);
static LOG_STDERR_ENABLED: AtomicBool = AtomicBool::new(true);

/// Highest level any target override asks for; lets `enabled` stay a single
/// atomic load when no override is more verbose than the global level.
static LOG_OVERRIDE_CEILING: AtomicU8 = AtomicU8::new(0);
static LOG_TARGET_LEVELS: OnceLock<RwLock<HashMap<String, Level>>> = OnceLock::new();

#[derive(Clone, Debug)]
pub struct CapturedLog {
    pub ts_ms: u64,
    pub level: Level,
    pub target: &'static str,
    pub file: &'static str,
    pub line: u32,
    pub msg: String,
}

static LOG_CAPTURE_ENABLED: AtomicBool = AtomicBool::new(false);
static LOG_CAPTURE_CAPACITY: AtomicUsize = AtomicUsize::new(0);
static LOG_CAPTURE: OnceLock<Mutex<VecDeque<CapturedLog>>> = OnceLock::new();

pub fn init(config: LogConfig) {
    LOG_LEVEL.store(config.level as u8, Ordering::Relaxed);
    LOG_FORMAT.store(config.format as u8, Ordering::Relaxed);
    LOG_TIMESTAMPS.store(config.timestamps, Ordering::Relaxed);
}

pub fn level() -> Level {
    Level::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
}

/// Sets a minimum level for every target starting with `prefix`
/// (for example `xid_chainstate::cache`). The longest matching prefix wins.
pub fn set_target_level(prefix: &str, level: Level) {
    let map = LOG_TARGET_LEVELS.get_or_init(|| RwLock::new(HashMap::new()));
    if let Ok(mut guard) = map.write() {
        guard.insert(prefix.to_string(), level);
        let ceiling = guard.values().map(|level| *level as u8).max().unwrap_or(0);
        LOG_OVERRIDE_CEILING.store(ceiling, Ordering::Relaxed);
    }
}

pub fn clear_target_levels() {
    if let Some(map) = LOG_TARGET_LEVELS.get() {
        if let Ok(mut guard) = map.write() {
            guard.clear();
        }
    }
    LOG_OVERRIDE_CEILING.store(0, Ordering::Relaxed);
}

fn target_override(target: &str) -> Option<Level> {
    let map = LOG_TARGET_LEVELS.get()?;
    let guard = map.read().ok()?;
    guard
        .iter()
        .filter(|(prefix, _)| target.starts_with(prefix.as_str()))
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|(_, level)| *level)
}

pub fn enable_capture(capacity: usize) {
    if capacity == 0 {
        disable_capture();
        return;
    }
    LOG_CAPTURE_CAPACITY.store(capacity, Ordering::Relaxed);
    LOG_CAPTURE.get_or_init(|| Mutex::new(VecDeque::with_capacity(capacity.min(4096))));
    LOG_CAPTURE_ENABLED.store(true, Ordering::Relaxed);
}

pub fn disable_capture() {
    LOG_CAPTURE_ENABLED.store(false, Ordering::Relaxed);
}

pub fn clear_captured_logs() {
    let Some(buf) = LOG_CAPTURE.get() else {
        return;
    };
    if let Ok(mut guard) = buf.lock() {
        guard.clear();
    }
}

pub fn set_stderr_enabled(enabled: bool) {
    LOG_STDERR_ENABLED.store(enabled, Ordering::Relaxed);
}

pub fn capture_snapshot(limit: usize) -> Vec<CapturedLog> {
    let Some(buf) = LOG_CAPTURE.get() else {
        return Vec::new();
    };
    let Ok(guard) = buf.lock() else {
        return Vec::new();
    };
    let len = guard.len();
    let start = len.saturating_sub(limit);
    guard.iter().skip(start).cloned().collect()
}

/// Coarse check used by the macros before formatting arguments.
pub fn enabled(level: Level) -> bool {
    let ceiling = LOG_LEVEL
        .load(Ordering::Relaxed)
        .max(LOG_OVERRIDE_CEILING.load(Ordering::Relaxed));
    level as u8 <= ceiling
}

pub fn enabled_for(level: Level, target: &str) -> bool {
    match target_override(target) {
        Some(min) => level <= min,
        None => level as u8 <= LOG_LEVEL.load(Ordering::Relaxed),
    }
}

pub fn log(
    level: Level,
    target: &'static str,
    file: &'static str,
    line: u32,
    args: fmt::Arguments<'_>,
) {
    if !enabled_for(level, target) {
        return;
    }

    let capture_enabled = LOG_CAPTURE_ENABLED.load(Ordering::Relaxed);
    let format = match LOG_FORMAT.load(Ordering::Relaxed) {
        1 => Format::Json,
        _ => Format::Text,
    };
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let ts_ms: u64 = now.as_millis().try_into().unwrap_or(u64::MAX);
    let msg = if matches!(format, Format::Json) || capture_enabled {
        Some(args.to_string())
    } else {
        None
    };

    if LOG_STDERR_ENABLED.load(Ordering::Relaxed) {
        let mut out = io::stderr().lock();
        match format {
            Format::Text => {
                if LOG_TIMESTAMPS.load(Ordering::Relaxed) {
                    let ts = Timestamp {
                        unix_seconds: now.as_secs(),
                        millis: now.subsec_millis(),
                    };
                    let _ = write!(out, "{ts} ");
                }
                let _ = writeln!(out, "{:<5} [{}] {args}", level.as_str(), short_target(target));
            }
            Format::Json => {
                let record = json!({
                    "ts_ms": ts_ms,
                    "level": level.as_str(),
                    "target": target,
                    "file": file,
                    "line": line,
                    "msg": msg.as_deref().unwrap_or_default(),
                });
                let _ = writeln!(out, "{record}");
            }
        }
    }

    if capture_enabled {
        let Some(buf) = LOG_CAPTURE.get() else {
            return;
        };
        let Ok(mut guard) = buf.lock() else {
            return;
        };
        let cap = LOG_CAPTURE_CAPACITY.load(Ordering::Relaxed);
        if cap == 0 {
            return;
        }
        guard.push_back(CapturedLog {
            ts_ms,
            level,
            target,
            file,
            line,
            msg: msg.unwrap_or_default(),
        });
        while guard.len() > cap {
            let _ = guard.pop_front();
        }
    }
}

/// `xid_chainstate::cache::memory` prints as `cache::memory`.
fn short_target(target: &str) -> &str {
    match target.split_once("::") {
        Some((krate, rest)) if krate.starts_with("xid") => rest,
        _ => target,
    }
}

#[macro_export]
macro_rules! log_at {
    ($level:expr, $($arg:tt)*) => {{
        if $crate::enabled($level) {
            $crate::log($level, module_path!(), file!(), line!(), format_args!($($arg)*));
        }
    }};
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Error, $($arg)*);
    }};
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Warn, $($arg)*);
    }};
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Info, $($arg)*);
    }};
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Debug, $($arg)*);
    }};
}

#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Trace, $($arg)*);
    }};
}

struct Timestamp {
    unix_seconds: u64,
    millis: u32,
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const SECS_PER_DAY: u64 = 86_400;
        let days = (self.unix_seconds / SECS_PER_DAY) as i64;
        let secs_of_day = self.unix_seconds % SECS_PER_DAY;
        let (year, month, day) = civil_from_days(days);
        write!(
            f,
            "{year:04}-{month:02}-{day:02} {:02}:{:02}:{:02}.{:03}",
            secs_of_day / 3600,
            (secs_of_day % 3600) / 60,
            secs_of_day % 60,
            self.millis
        )
    }
}

// Howard Hinnant's days-to-civil conversion.
fn civil_from_days(days_since_unix_epoch: i64) -> (i32, u32, u32) {
    let z = days_since_unix_epoch + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u32;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = (yoe as i32) + (era as i32) * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = y + if m <= 2 { 1 } else { 0 };
    (year, m, d)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_level_aliases() {
        assert_eq!(Level::parse("info"), Some(Level::Info));
        assert_eq!(Level::parse("WARNING"), Some(Level::Warn));
        assert_eq!(Level::parse("fatal"), Some(Level::Error));
        assert_eq!(Level::parse("debugging"), Some(Level::Debug));
        assert_eq!(Level::parse("verbose"), None);
    }

    #[test]
    fn parse_format() {
        assert_eq!(Format::parse("console"), Some(Format::Text));
        assert_eq!(Format::parse("JSON"), Some(Format::Json));
        assert_eq!(Format::parse("xml"), None);
    }

    #[test]
    fn target_override_prefers_longest_prefix() {
        set_target_level("xid_test_override", Level::Warn);
        set_target_level("xid_test_override::cache", Level::Trace);
        assert!(enabled_for(Level::Trace, "xid_test_override::cache::memory"));
        assert!(!enabled_for(Level::Info, "xid_test_override::pipeline"));
        assert!(enabled_for(Level::Warn, "xid_test_override::pipeline"));
        clear_target_levels();
    }

    #[test]
    fn short_target_strips_crate() {
        assert_eq!(short_target("xid_chainstate::cache"), "cache");
        assert_eq!(short_target("other::module"), "other::module");
        assert_eq!(short_target("xid_sync"), "xid_sync");
    }

    #[test]
    fn civil_dates() {
        assert_eq!(civil_from_days(0), (1970, 1, 1));
        assert_eq!(civil_from_days(19_723), (2024, 1, 1));
    }
}
