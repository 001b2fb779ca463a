//! # udsmux-core
//!
//! Unix domain socket transport and epoll readiness multiplexing.
//!
//! Everything above the [`syscall`] veneer is safe Rust. Operations report
//! failure as an [`Errno`] carrying the OS error number unchanged, so the
//! foreign call boundary can hand it back as `-errno` without translation.
//!
//! - [`addr`]: `sockaddr_un` encoding for filesystem and abstract names.
//! - [`socket`]: owned stream socket handles.
//! - [`transport`]: connect, read, write, listen and accept on borrowed
//!   handles, with the per-thread read staging buffer.
//! - [`poll`]: the readiness [`Registry`](poll::Registry).

#![deny(unsafe_code)]
#![cfg(target_os = "linux")]

pub mod addr;
pub mod errno;
pub mod poll;
pub mod socket;
#[allow(unsafe_code)]
pub mod syscall;
pub mod transport;

pub use addr::UnixAddr;
pub use errno::{Errno, ErrorKind};
pub use poll::{Events, Interest, ReadinessEvent, Registry};
pub use socket::OwnedSocket;
