//! Tooling around the udsmux transport.
//!
//! - An echo server driven by one readiness [`Registry`](udsmux_core::Registry)
//! - A one-shot client that sends a payload and waits for its echo
//! - Structured log validation for `UDSMUX_LOG` output

#![forbid(unsafe_code)]

pub mod client;
pub mod echo;
pub mod error;
pub mod log_report;

pub use echo::{EchoServer, EchoStats};
pub use error::HarnessError;
