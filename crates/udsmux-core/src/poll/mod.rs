//! Readiness multiplexing.
//!
//! A [`Registry`] wraps one epoll instance. Handles are registered for
//! readable (and optionally writable) interest; [`Registry::wait`] fills an
//! [`Events`] buffer with `(handle, flags)` pairs where the flags are the
//! kernel's epoll bits, unmodified.
//!
//! Each registry also owns an eventfd used to interrupt a blocked wait, both
//! for [`Registry::wake`] and for [`Registry::close_registered`], which
//! reports the closed handle to the waiter as a synthetic `EPOLLHUP`.

mod registry;

pub use registry::Registry;

use std::ops::BitOr;
use std::os::fd::RawFd;

// ---------------------------------------------------------------------------
// Epoll constants
// ---------------------------------------------------------------------------

/// Readable.
pub const EPOLLIN: u32 = 0x001;
/// Writable.
pub const EPOLLOUT: u32 = 0x004;
/// Error condition (always reported).
pub const EPOLLERR: u32 = 0x008;
/// Hang-up (always reported).
pub const EPOLLHUP: u32 = 0x010;
/// Peer closed its writing half.
pub const EPOLLRDHUP: u32 = 0x2000;

pub const EPOLL_CTL_ADD: i32 = 1;
pub const EPOLL_CTL_DEL: i32 = 2;

/// Close-on-exec for `epoll_create1`.
pub const EPOLL_CLOEXEC: i32 = 0o2000000;
/// Close-on-exec for `eventfd2`.
pub const EFD_CLOEXEC: i32 = 0o2000000;
/// Nonblocking `eventfd2`.
pub const EFD_NONBLOCK: i32 = 0o4000;

// ---------------------------------------------------------------------------
// Interest
// ---------------------------------------------------------------------------

/// Readiness a handle is registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Interest(u32);

impl Interest {
    pub const READABLE: Self = Self(EPOLLIN);
    pub const WRITABLE: Self = Self(EPOLLOUT);

    /// The epoll bits requested.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn is_readable(self) -> bool {
        self.0 & EPOLLIN != 0
    }

    #[must_use]
    pub const fn is_writable(self) -> bool {
        self.0 & EPOLLOUT != 0
    }
}

impl Default for Interest {
    fn default() -> Self {
        Self::READABLE
    }
}

impl BitOr for Interest {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// One readiness report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReadinessEvent {
    pub handle: RawFd,
    /// Raw epoll bits.
    pub flags: u32,
}

impl ReadinessEvent {
    #[must_use]
    pub const fn is_readable(&self) -> bool {
        self.flags & EPOLLIN != 0
    }

    #[must_use]
    pub const fn is_writable(&self) -> bool {
        self.flags & EPOLLOUT != 0
    }

    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.flags & EPOLLERR != 0
    }

    /// Hang-up or peer write shutdown.
    #[must_use]
    pub const fn is_hangup(&self) -> bool {
        self.flags & (EPOLLHUP | EPOLLRDHUP) != 0
    }
}

/// Output buffer for [`Registry::wait`].
///
/// Each waiting thread uses its own.
pub struct Events {
    raw: Vec<libc::epoll_event>,
    len: usize,
}

impl Events {
    /// Room for `capacity` events (at least one).
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            raw: vec![libc::epoll_event { events: 0, u64: 0 }; capacity.max(1)],
            len: 0,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.raw.len()
    }

    /// Events from the last wait.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<ReadinessEvent> {
        (index < self.len).then(|| decode_event(&self.raw[index]))
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = ReadinessEvent> + '_ {
        self.raw[..self.len].iter().map(decode_event)
    }

    /// Flatten to `[handle, flags, handle, flags, ...]`, flags reinterpreted
    /// as `i32`.
    #[must_use]
    pub fn to_pairs(&self) -> Vec<i32> {
        self.iter()
            .flat_map(|ev| [ev.handle, ev.flags as i32])
            .collect()
    }
}

impl std::fmt::Debug for Events {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

fn decode_event(raw: &libc::epoll_event) -> ReadinessEvent {
    // Copy out of the (possibly packed) kernel struct before use.
    let flags = raw.events;
    let token = raw.u64;
    ReadinessEvent {
        handle: token as RawFd,
        flags,
    }
}
