//! Runtime transport configuration.
//!
//! Every tunable is read from the environment on first use and cached
//! process-wide:
//! - `UDSMUX_STAGING_BYTES`: capacity of the per-thread read staging buffer.
//! - `UDSMUX_BATCH_EVENTS`: maximum readiness events reported by one wait.
//! - `UDSMUX_WAIT_TIMEOUT_MS`: default wait timeout (`inf` or negative means
//!   block indefinitely).
//! - `UDSMUX_LISTEN_BACKLOG`: backlog used when a caller passes none.
//! - `UDSMUX_LOG`: `off` (default), `stderr`, or a path for JSONL output.
//! - `UDSMUX_LOG_LEVEL`: minimum level written to the log sink.
//!
//! Unparseable values fall back to the defaults instead of failing.
//! Embedders may bypass the environment entirely with
//! [`set_transport_config`].

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::RwLock;

use crate::structured_log::{self, LogLevel};

/// Default read staging capacity (10 KiB).
pub const DEFAULT_STAGING_CAPACITY: usize = 10 * 1024;
/// Upper bound accepted for the staging capacity.
pub const MAX_STAGING_CAPACITY: usize = 1024 * 1024;
/// Default number of readiness events reported per wait.
pub const DEFAULT_BATCH_CAPACITY: usize = 128;
/// Upper bound accepted for the per-wait batch.
pub const MAX_BATCH_CAPACITY: usize = 4096;
/// Default backlog for listening sockets.
pub const DEFAULT_LISTEN_BACKLOG: i32 = 5;
/// Kernel ceiling for listen backlogs.
pub const MAX_LISTEN_BACKLOG: i32 = 4096;

/// How long a readiness wait may block.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaitTimeout {
    /// Block until at least one event, a wake-up, or an error.
    #[default]
    Indefinite,
    /// Give up after the duration and report zero events.
    After(Duration),
}

impl WaitTimeout {
    /// Parse a millisecond count (case-insensitive `inf`/`infinite`/`none`
    /// and negative numbers mean indefinite).
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        let s = s.trim();
        match s.to_ascii_lowercase().as_str() {
            "" | "inf" | "infinite" | "indefinite" | "none" | "-1" => Self::Indefinite,
            other => match other.parse::<i64>() {
                Ok(ms) if ms >= 0 => Self::After(Duration::from_millis(ms as u64)),
                _ => Self::Indefinite,
            },
        }
    }

    /// Build from an epoll-style millisecond argument (`-1` blocks forever).
    #[must_use]
    pub fn from_epoll_millis(ms: i32) -> Self {
        if ms < 0 {
            Self::Indefinite
        } else {
            Self::After(Duration::from_millis(ms as u64))
        }
    }

    /// Millisecond argument for `epoll_wait`.
    ///
    /// Sub-millisecond remainders round up so a non-zero timeout never
    /// degrades into a busy poll.
    #[must_use]
    pub fn as_epoll_millis(self) -> i32 {
        match self {
            Self::Indefinite => -1,
            Self::After(d) => {
                let mut ms = d.as_millis();
                if d.subsec_nanos() % 1_000_000 != 0 {
                    ms += 1;
                }
                ms.min(i32::MAX as u128) as i32
            }
        }
    }
}

/// Destination for structured log records.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub enum LogSink {
    /// Logging disabled.
    #[default]
    Off,
    /// JSONL lines on standard error.
    Stderr,
    /// JSONL lines appended to a file.
    File(PathBuf),
}

impl LogSink {
    /// Parse from string; anything that is not a keyword is a file path.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        let trimmed = s.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "" | "off" | "none" | "0" | "false" => Self::Off,
            "stderr" | "2" => Self::Stderr,
            _ => Self::File(PathBuf::from(trimmed)),
        }
    }
}

/// Resolved transport tunables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Capacity of the read staging buffer, in bytes.
    pub staging_capacity: usize,
    /// Maximum readiness events a single wait reports.
    pub batch_capacity: usize,
    /// Timeout applied when a caller does not pass one.
    pub wait_timeout: WaitTimeout,
    /// Backlog applied when a caller does not pass one.
    pub listen_backlog: i32,
    pub log_sink: LogSink,
    pub log_level: LogLevel,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            staging_capacity: DEFAULT_STAGING_CAPACITY,
            batch_capacity: DEFAULT_BATCH_CAPACITY,
            wait_timeout: WaitTimeout::Indefinite,
            listen_backlog: DEFAULT_LISTEN_BACKLOG,
            log_sink: LogSink::Off,
            log_level: LogLevel::Info,
        }
    }
}

impl TransportConfig {
    /// Resolve from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve from an arbitrary key lookup (the environment in production,
    /// a map in tests).
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let mut config = defaults.clone();

        if let Some(raw) = lookup("UDSMUX_STAGING_BYTES") {
            config = config.with_staging_capacity(
                raw.trim().parse().unwrap_or(defaults.staging_capacity),
            );
        }
        if let Some(raw) = lookup("UDSMUX_BATCH_EVENTS") {
            config =
                config.with_batch_capacity(raw.trim().parse().unwrap_or(defaults.batch_capacity));
        }
        if let Some(raw) = lookup("UDSMUX_WAIT_TIMEOUT_MS") {
            config.wait_timeout = WaitTimeout::from_str_loose(&raw);
        }
        if let Some(raw) = lookup("UDSMUX_LISTEN_BACKLOG") {
            config =
                config.with_listen_backlog(raw.trim().parse().unwrap_or(defaults.listen_backlog));
        }
        if let Some(raw) = lookup("UDSMUX_LOG") {
            config.log_sink = LogSink::from_str_loose(&raw);
        }
        if let Some(raw) = lookup("UDSMUX_LOG_LEVEL") {
            config.log_level = LogLevel::from_str_loose(&raw);
        }
        config
    }

    /// Set the staging capacity, clamped into `1..=MAX_STAGING_CAPACITY`.
    #[must_use]
    pub fn with_staging_capacity(mut self, bytes: usize) -> Self {
        self.staging_capacity = bytes.clamp(1, MAX_STAGING_CAPACITY);
        self
    }

    /// Set the batch capacity, clamped into `1..=MAX_BATCH_CAPACITY`.
    #[must_use]
    pub fn with_batch_capacity(mut self, events: usize) -> Self {
        self.batch_capacity = events.clamp(1, MAX_BATCH_CAPACITY);
        self
    }

    #[must_use]
    pub fn with_wait_timeout(mut self, timeout: WaitTimeout) -> Self {
        self.wait_timeout = timeout;
        self
    }

    /// Set the default backlog, clamped into `0..=MAX_LISTEN_BACKLOG`.
    #[must_use]
    pub fn with_listen_backlog(mut self, backlog: i32) -> Self {
        self.listen_backlog = backlog.clamp(0, MAX_LISTEN_BACKLOG);
        self
    }

    #[must_use]
    pub fn with_log(mut self, sink: LogSink, level: LogLevel) -> Self {
        self.log_sink = sink;
        self.log_level = level;
        self
    }
}

static CONFIG: RwLock<Option<TransportConfig>> = RwLock::new(None);

// Hot-path copies of the resolved config, read without touching `CONFIG`.
// Written under the `CONFIG` write lock; valid once RESOLVED is set.
static RESOLVED: AtomicBool = AtomicBool::new(false);
static STAGING_CAPACITY: AtomicUsize = AtomicUsize::new(DEFAULT_STAGING_CAPACITY);
static BATCH_CAPACITY: AtomicUsize = AtomicUsize::new(DEFAULT_BATCH_CAPACITY);
static WAIT_TIMEOUT_NS: AtomicU64 = AtomicU64::new(TIMEOUT_INDEFINITE);

const TIMEOUT_INDEFINITE: u64 = u64::MAX;

fn timeout_to_u64(timeout: WaitTimeout) -> u64 {
    match timeout {
        WaitTimeout::Indefinite => TIMEOUT_INDEFINITE,
        WaitTimeout::After(d) => d.as_nanos().min(u128::from(TIMEOUT_INDEFINITE - 1)) as u64,
    }
}

fn timeout_from_u64(raw: u64) -> WaitTimeout {
    if raw == TIMEOUT_INDEFINITE {
        WaitTimeout::Indefinite
    } else {
        WaitTimeout::After(Duration::from_nanos(raw))
    }
}

fn publish(config: &TransportConfig) {
    STAGING_CAPACITY.store(config.staging_capacity, Ordering::Relaxed);
    BATCH_CAPACITY.store(config.batch_capacity, Ordering::Relaxed);
    WAIT_TIMEOUT_NS.store(timeout_to_u64(config.wait_timeout), Ordering::Relaxed);
    RESOLVED.store(true, Ordering::Release);
}

fn ensure_resolved() {
    if !RESOLVED.load(Ordering::Acquire) {
        let _ = transport_config();
    }
}

/// The process-wide configuration, resolved from the environment on first use.
#[must_use]
pub fn transport_config() -> TransportConfig {
    if let Some(config) = CONFIG.read().as_ref() {
        return config.clone();
    }
    let mut slot = CONFIG.write();
    // Another thread may have resolved it between the two locks.
    let config = slot.get_or_insert_with(TransportConfig::from_env);
    publish(config);
    config.clone()
}

/// Replace the process-wide configuration. The log sink is reopened from the
/// new settings on the next record.
pub fn set_transport_config(config: TransportConfig) {
    {
        let mut slot = CONFIG.write();
        publish(&config);
        *slot = Some(config);
    }
    structured_log::reset_global_sink();
}

/// Configured read staging capacity. Lock-free after first resolution.
#[must_use]
pub fn configured_staging_capacity() -> usize {
    ensure_resolved();
    STAGING_CAPACITY.load(Ordering::Relaxed)
}

/// Configured events-per-wait bound. Lock-free after first resolution.
#[must_use]
pub fn configured_batch_capacity() -> usize {
    ensure_resolved();
    BATCH_CAPACITY.load(Ordering::Relaxed)
}

/// Configured default wait timeout. Lock-free after first resolution.
#[must_use]
pub fn configured_wait_timeout() -> WaitTimeout {
    ensure_resolved();
    timeout_from_u64(WAIT_TIMEOUT_NS.load(Ordering::Relaxed))
}
