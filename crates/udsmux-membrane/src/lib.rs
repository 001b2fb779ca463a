//! # udsmux-membrane
//!
//! Process-wide policy shared by the udsmux core and ABI layers.
//!
//! - [`config`]: transport tunables resolved from `UDSMUX_*` environment
//!   variables and cached for the life of the process.
//! - [`heal`]: bounds-healing actions (read clamps, address truncation) and
//!   their global counters.
//! - [`structured_log`]: JSONL log records, emitters and the global sink.

#![forbid(unsafe_code)]

pub mod config;
pub mod heal;
pub mod structured_log;

pub use config::{
    LogSink, TransportConfig, WaitTimeout, configured_batch_capacity, configured_staging_capacity,
    configured_wait_timeout, set_transport_config, transport_config,
};
pub use heal::{HealingAction, HealingPolicy, global_healing_policy};
pub use structured_log::{LogEntry, LogLevel};
