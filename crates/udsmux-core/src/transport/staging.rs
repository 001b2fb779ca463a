//! Per-thread read staging buffer.
//!
//! Reads land in a staging buffer first and are copied out to the caller's
//! destination. The kernel is asked for `min(staging, destination)` bytes,
//! so nothing is ever read that cannot be delivered; whatever the peer sent
//! beyond that stays queued in the socket for the next call.

use std::cell::RefCell;
use std::os::fd::{AsRawFd, BorrowedFd};

use udsmux_membrane::config::configured_staging_capacity;
use udsmux_membrane::heal::global_healing_policy;

use crate::errno::Errno;
use crate::syscall;

use super::record_healing;

thread_local! {
    static STAGING: RefCell<Option<StagingBuffer>> = const { RefCell::new(None) };
}

/// A fixed-capacity intermediate read buffer.
#[derive(Debug)]
pub struct StagingBuffer {
    buf: Box<[u8]>,
}

impl StagingBuffer {
    /// A buffer of `capacity` bytes (at least one).
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity.max(1)].into_boxed_slice(),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// One read from `fd` into `dst` through the staging buffer.
    ///
    /// Returns the byte count copied into `dst`, `0` at end of stream, or the
    /// read's errno. An empty `dst` is `EINVAL`.
    pub fn read_into(&mut self, fd: BorrowedFd<'_>, dst: &mut [u8]) -> Result<usize, Errno> {
        if dst.is_empty() {
            return Err(Errno::EINVAL);
        }
        let want = self.buf.len().min(dst.len());
        let n = syscall::sys_read(fd, &mut self.buf[..want])?;
        dst[..n].copy_from_slice(&self.buf[..n]);
        let healing = global_healing_policy().heal_read_bounds(self.buf.len(), dst.len(), n);
        if healing.is_heal() {
            record_healing("read", Some(fd.as_raw_fd()), healing);
        }
        Ok(n)
    }
}

/// Run `f` with this thread's staging buffer, sized from the current
/// configuration.
pub fn with_thread_staging<R>(f: impl FnOnce(&mut StagingBuffer) -> R) -> R {
    let capacity = configured_staging_capacity();
    STAGING.with(|cell| {
        let mut slot = cell.borrow_mut();
        if slot.as_ref().is_some_and(|s| s.capacity() != capacity) {
            *slot = None;
        }
        f(slot.get_or_insert_with(|| StagingBuffer::with_capacity(capacity)))
    })
}
