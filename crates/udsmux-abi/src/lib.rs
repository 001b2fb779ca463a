// All extern "C" entry points take raw pointers from foreign callers and
// check them at runtime, so per-function safety docs would be boilerplate.
#![allow(clippy::missing_safety_doc)]
//! # udsmux-abi
//!
//! `extern "C"` boundary for the udsmux transport.
//!
//! Every entry point returns a plain integer: a non-negative result, or the
//! negated OS error number. Nothing here sets the C `errno`; the error value
//! is the return value, so it survives whatever the caller's runtime does
//! between the call and the check.
//!
//! ```text
//! foreign caller -> udsmux_* entry (this crate) -> udsmux-core -> kernel
//! ```
//!
//! Handles cross the boundary as bare descriptors. Registries are tracked in
//! a process-wide table keyed by their epoll descriptor, so `udsmux_close`
//! releases a registry's wake-up channel along with it.

#[macro_use]
mod macros;

mod util;

pub mod poll_abi;
pub mod socket_abi;
