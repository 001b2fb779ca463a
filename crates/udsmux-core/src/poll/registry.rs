//! The epoll-backed readiness registry.

use std::collections::VecDeque;
use std::fmt;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use udsmux_membrane::config::{
    MAX_BATCH_CAPACITY, WaitTimeout, configured_batch_capacity, configured_wait_timeout,
};
use udsmux_membrane::structured_log::{LogLevel, log_event};

use super::{
    EFD_CLOEXEC, EFD_NONBLOCK, EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLLHUP, EPOLLIN,
    Events, Interest,
};
use crate::errno::{EAGAIN, Errno};
use crate::socket::OwnedSocket;
use crate::syscall;
use crate::transport::log_failure;

/// Epoll token reserved for the wake-up eventfd. Real handles are
/// non-negative `i32`s and never reach it.
const WAKER_TOKEN: u64 = u64::MAX;

struct Shared {
    epoll: OwnedFd,
    waker: OwnedFd,
    /// Handles closed through `close_registered`, not yet reported.
    pending_hangups: Mutex<VecDeque<RawFd>>,
    batch_capacity: usize,
    /// Set by `close`; every clone then fails with `EBADF`.
    closed: AtomicBool,
}

/// An epoll instance with its wake-up channel.
///
/// Clones share the same instance. [`close`](Self::close) on any clone closes
/// it for all of them; the OS resources go away once the last clone is gone. Registered handles are never
/// closed by the registry except through
/// [`close_registered`](Self::close_registered).
#[derive(Clone)]
pub struct Registry {
    shared: Arc<Shared>,
}

impl Registry {
    /// A registry with the configured batch capacity.
    pub fn new() -> Result<Self, Errno> {
        Self::with_batch_capacity(configured_batch_capacity())
    }

    /// A registry reporting at most `batch` events per wait.
    pub fn with_batch_capacity(batch: usize) -> Result<Self, Errno> {
        let epoll = syscall::sys_epoll_create1(EPOLL_CLOEXEC)
            .inspect_err(|&e| log_failure("epoll_create", None, e))?;
        let waker = syscall::sys_eventfd2(0, EFD_CLOEXEC | EFD_NONBLOCK)
            .inspect_err(|&e| log_failure("eventfd", None, e))?;
        let mut ev = libc::epoll_event {
            events: EPOLLIN,
            u64: WAKER_TOKEN,
        };
        syscall::sys_epoll_ctl(epoll.as_fd(), EPOLL_CTL_ADD, waker.as_raw_fd(), Some(&mut ev))?;
        let batch_capacity = batch.clamp(1, MAX_BATCH_CAPACITY);
        log_event(LogLevel::Debug, "registry_created", |e| {
            e.with_op("registry_create")
                .with_handle(epoll.as_raw_fd())
                .with_details(serde_json::json!({ "batch_capacity": batch_capacity }))
        });
        Ok(Self {
            shared: Arc::new(Shared {
                epoll,
                waker,
                pending_hangups: Mutex::new(VecDeque::new()),
                batch_capacity,
                closed: AtomicBool::new(false),
            }),
        })
    }

    fn ensure_open(&self) -> Result<(), Errno> {
        if self.shared.closed.load(Ordering::Acquire) {
            Err(Errno::EBADF)
        } else {
            Ok(())
        }
    }

    /// Upper bound on events reported by one wait.
    #[must_use]
    pub fn batch_capacity(&self) -> usize {
        self.shared.batch_capacity
    }

    /// An [`Events`] buffer sized to the batch capacity.
    #[must_use]
    pub fn events(&self) -> Events {
        Events::with_capacity(self.shared.batch_capacity)
    }

    /// Register `handle` for readable interest.
    ///
    /// Error and hang-up are always reported. Registering twice is `EEXIST`.
    pub fn add_interest(&self, handle: BorrowedFd<'_>) -> Result<(), Errno> {
        self.add_interest_with(handle, Interest::READABLE)
    }

    pub fn add_interest_with(&self, handle: BorrowedFd<'_>, interest: Interest) -> Result<(), Errno> {
        self.add_raw(handle.as_raw_fd(), interest)
    }

    /// Register a handle known only by number.
    ///
    /// A hang-up still queued for an earlier handle with the same number is
    /// discarded, so it is never reported against the new one.
    pub fn add_raw(&self, handle: RawFd, interest: Interest) -> Result<(), Errno> {
        self.ensure_open()?;
        if handle < 0 {
            return Err(Errno::EBADF);
        }
        let mut ev = libc::epoll_event {
            events: interest.bits(),
            u64: handle as u64,
        };
        let mut pending = self.shared.pending_hangups.lock();
        syscall::sys_epoll_ctl(self.shared.epoll.as_fd(), EPOLL_CTL_ADD, handle, Some(&mut ev))
            .inspect_err(|&e| log_failure("registry_add", Some(handle), e))?;
        pending.retain(|&queued| queued != handle);
        Ok(())
    }

    /// Stop watching `handle` without closing it. Unknown handles are `ENOENT`.
    pub fn remove_interest(&self, handle: BorrowedFd<'_>) -> Result<(), Errno> {
        self.remove_raw(handle.as_raw_fd())
    }

    pub fn remove_raw(&self, handle: RawFd) -> Result<(), Errno> {
        self.ensure_open()?;
        if handle < 0 {
            return Err(Errno::EBADF);
        }
        syscall::sys_epoll_ctl(self.shared.epoll.as_fd(), EPOLL_CTL_DEL, handle, None)
    }

    /// Deregister and close `handle`, then report it to the waiter as
    /// `EPOLLHUP`.
    ///
    /// The hang-up is only queued when deregistration succeeded. The handle
    /// is closed either way; the first failure is returned.
    pub fn close_registered(&self, handle: OwnedSocket) -> Result<(), Errno> {
        let raw = handle.as_raw_fd();
        self.close_with(raw, || handle.close())
    }

    /// [`close_registered`](Self::close_registered) for a handle known only
    /// by number.
    pub fn close_registered_raw(&self, handle: RawFd) -> Result<(), Errno> {
        self.close_with(handle, || {
            if handle < 0 {
                Err(Errno::EBADF)
            } else {
                syscall::sys_close(handle)
            }
        })
    }

    /// Deregister, close and queue the hang-up under the queue lock, so an
    /// `add_raw` of the reused number always runs after the hang-up is queued
    /// and clears it.
    fn close_with(&self, handle: RawFd, close: impl FnOnce() -> Result<(), Errno>) -> Result<(), Errno> {
        let mut pending = self.shared.pending_hangups.lock();
        let removed = self.remove_raw(handle);
        let closed = close();
        if removed.is_ok() {
            pending.push_back(handle);
        }
        drop(pending);

        let woken = if removed.is_ok() { self.wake() } else { Ok(()) };
        let result = removed.and(closed).and(woken);
        log_event(LogLevel::Debug, "registered_handle_closed", |e| {
            let e = e.with_op("registry_close_handle").with_handle(handle);
            match result {
                Ok(()) => e,
                Err(errno) => e.with_errno(errno.raw()),
            }
        });
        result
    }

    /// Make a blocked [`wait`](Self::wait) return, possibly with no events.
    pub fn wake(&self) -> Result<(), Errno> {
        self.ensure_open()?;
        self.signal_waker()
    }

    fn signal_waker(&self) -> Result<(), Errno> {
        match syscall::sys_write(self.shared.waker.as_fd(), &1u64.to_ne_bytes()) {
            Ok(_) => Ok(()),
            // Counter saturated: a wake-up is already pending.
            Err(e) if e.raw() == EAGAIN => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Wait with the configured default timeout.
    pub fn wait(&self, events: &mut Events) -> Result<usize, Errno> {
        self.wait_timeout(events, configured_wait_timeout())
    }

    /// Block until readiness, a wake-up, or `timeout`.
    ///
    /// Fills `events` with at most `min(batch capacity, events.capacity())`
    /// entries and returns that count. `EINTR` is returned, not retried.
    /// A registry closed before or during the wait is `EBADF`.
    pub fn wait_timeout(&self, events: &mut Events, timeout: WaitTimeout) -> Result<usize, Errno> {
        events.clear();
        self.ensure_open()?;
        let cap = events.capacity().min(self.shared.batch_capacity);
        let timeout_ms = if self.shared.pending_hangups.lock().is_empty() {
            timeout.as_epoll_millis()
        } else {
            0
        };

        let n = syscall::sys_epoll_wait(self.shared.epoll.as_fd(), &mut events.raw[..cap], timeout_ms)
            .inspect_err(|&e| {
                log_failure("registry_wait", Some(self.shared.epoll.as_raw_fd()), e);
            })?;

        let mut len = 0;
        let mut woken = false;
        for i in 0..n {
            let ev = events.raw[i];
            let token = ev.u64;
            if token == WAKER_TOKEN {
                woken = true;
                continue;
            }
            events.raw[len] = ev;
            len += 1;
        }
        if woken {
            self.drain_waker();
        }
        if self.shared.closed.load(Ordering::Acquire) {
            // Closed while blocked; the waker stays signalled for other waiters.
            self.signal_waker()?;
            return Err(Errno::EBADF);
        }

        let mut pending = self.shared.pending_hangups.lock();
        while len < cap {
            let Some(handle) = pending.pop_front() else {
                break;
            };
            events.raw[len] = libc::epoll_event {
                events: EPOLLHUP,
                u64: handle as u64,
            };
            len += 1;
        }
        events.len = len;
        Ok(len)
    }

    fn drain_waker(&self) {
        let mut buf = [0u8; 8];
        // Nonblocking; EAGAIN just means another waiter drained it first.
        let _ = syscall::sys_read(self.shared.waker.as_fd(), &mut buf);
    }

    /// Close the registry for every clone.
    ///
    /// Threads blocked in a wait on another clone are woken and get `EBADF`,
    /// as does any later call. The epoll instance and eventfd are released
    /// here when this is the last clone, otherwise when the last one drops.
    pub fn close(self) -> Result<(), Errno> {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return Err(Errno::EBADF);
        }
        let shared = match Arc::try_unwrap(self.shared) {
            Ok(shared) => shared,
            Err(shared) => {
                log_event(LogLevel::Debug, "registry_closed", |e| {
                    e.with_op("registry_close")
                        .with_handle(shared.epoll.as_raw_fd())
                        .with_details(serde_json::json!({ "deferred": true }))
                });
                return Self { shared }.signal_waker();
            }
        };
        let epoll_fd = shared.epoll.as_raw_fd();
        let closed_waker = syscall::sys_close_owned(shared.waker);
        let closed_epoll = syscall::sys_close_owned(shared.epoll);
        log_event(LogLevel::Debug, "registry_closed", |e| {
            e.with_op("registry_close").with_handle(epoll_fd)
        });
        closed_epoll.and(closed_waker)
    }
}

impl AsFd for Registry {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.shared.epoll.as_fd()
    }
}

impl AsRawFd for Registry {
    /// The epoll descriptor, which is the registry's identity at the call
    /// boundary.
    fn as_raw_fd(&self) -> RawFd {
        self.shared.epoll.as_raw_fd()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("epoll", &self.shared.epoll.as_raw_fd())
            .field("waker", &self.shared.waker.as_raw_fd())
            .field("batch_capacity", &self.shared.batch_capacity)
            .field("pending_hangups", &self.shared.pending_hangups.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errno::{EEXIST, ENOENT};
    use crate::poll::EPOLLOUT;
    use std::time::Duration;

    const SHORT: WaitTimeout = WaitTimeout::After(Duration::from_millis(50));

    #[test]
    fn empty_registry_times_out() {
        let reg = Registry::with_batch_capacity(8).unwrap();
        let mut events = reg.events();
        assert_eq!(reg.wait_timeout(&mut events, SHORT).unwrap(), 0);
        assert!(events.is_empty());
    }

    #[test]
    fn duplicate_add_is_eexist_and_unknown_remove_is_enoent() {
        let reg = Registry::with_batch_capacity(8).unwrap();
        let (a, _b) = OwnedSocket::pair().unwrap();
        reg.add_interest(a.as_fd()).unwrap();
        assert_eq!(reg.add_interest(a.as_fd()).unwrap_err().raw(), EEXIST);
        reg.remove_interest(a.as_fd()).unwrap();
        assert_eq!(reg.remove_interest(a.as_fd()).unwrap_err().raw(), ENOENT);
    }

    #[test]
    fn negative_handles_are_ebadf() {
        let reg = Registry::with_batch_capacity(1).unwrap();
        assert_eq!(reg.add_raw(-1, Interest::READABLE), Err(Errno::EBADF));
        assert_eq!(reg.remove_raw(-3), Err(Errno::EBADF));
    }

    #[test]
    fn wake_returns_without_events() {
        let reg = Registry::with_batch_capacity(4).unwrap();
        reg.wake().unwrap();
        reg.wake().unwrap();
        let mut events = reg.events();
        assert_eq!(reg.wait_timeout(&mut events, WaitTimeout::Indefinite).unwrap(), 0);
        // Drained: the next wait blocks until the timeout.
        assert_eq!(reg.wait_timeout(&mut events, SHORT).unwrap(), 0);
    }

    #[test]
    fn writable_interest_reports_epollout() {
        let reg = Registry::with_batch_capacity(4).unwrap();
        let (a, _b) = OwnedSocket::pair().unwrap();
        reg.add_interest_with(a.as_fd(), Interest::WRITABLE).unwrap();
        let mut events = reg.events();
        assert_eq!(reg.wait_timeout(&mut events, SHORT).unwrap(), 1);
        let ev = events.get(0).unwrap();
        assert_eq!(ev.handle, a.as_raw_fd());
        assert_ne!(ev.flags & EPOLLOUT, 0);
    }

    #[test]
    fn close_registered_queues_hangup() {
        let reg = Registry::with_batch_capacity(4).unwrap();
        let (a, _b) = OwnedSocket::pair().unwrap();
        let raw = a.as_raw_fd();
        reg.add_interest(a.as_fd()).unwrap();
        reg.close_registered(a).unwrap();
        let mut events = reg.events();
        assert_eq!(reg.wait_timeout(&mut events, SHORT).unwrap(), 1);
        assert_eq!(
            events.get(0),
            Some(crate::poll::ReadinessEvent {
                handle: raw,
                flags: EPOLLHUP
            })
        );
    }

    #[test]
    fn close_unregistered_handle_still_closes() {
        let reg = Registry::with_batch_capacity(4).unwrap();
        let (a, _b) = OwnedSocket::pair().unwrap();
        assert_eq!(reg.close_registered(a).unwrap_err().raw(), ENOENT);
        let mut events = reg.events();
        assert_eq!(reg.wait_timeout(&mut events, SHORT).unwrap(), 0);
    }

    #[test]
    fn batch_capacity_is_clamped() {
        assert_eq!(Registry::with_batch_capacity(0).unwrap().batch_capacity(), 1);
        assert_eq!(
            Registry::with_batch_capacity(usize::MAX).unwrap().batch_capacity(),
            MAX_BATCH_CAPACITY
        );
    }

    #[test]
    fn close_applies_to_every_clone() {
        let reg = Registry::with_batch_capacity(2).unwrap();
        let clone = reg.clone();
        let (a, _b) = OwnedSocket::pair().unwrap();
        reg.close().unwrap();
        let mut events = clone.events();
        assert_eq!(
            clone.wait_timeout(&mut events, WaitTimeout::After(Duration::ZERO)),
            Err(Errno::EBADF)
        );
        assert_eq!(clone.add_interest(a.as_fd()), Err(Errno::EBADF));
        assert_eq!(clone.wake(), Err(Errno::EBADF));
        assert_eq!(clone.close(), Err(Errno::EBADF));
    }

    #[test]
    fn failed_deregistration_still_closes_and_reports() {
        use std::os::fd::IntoRawFd;

        let reg = Registry::with_batch_capacity(4).unwrap();
        let clone = reg.clone();
        let (a, b) = OwnedSocket::pair().unwrap();
        reg.add_interest(a.as_fd()).unwrap();
        let raw = a.into_raw_fd();
        reg.close().unwrap();

        assert_eq!(clone.close_registered_raw(raw), Err(Errno::EBADF));
        // The handle went away regardless: its peer now sees a broken pipe.
        assert_eq!(b.write(b"x").unwrap_err().raw(), crate::errno::EPIPE);
    }

    #[test]
    fn re_adding_a_number_discards_its_queued_hangup() {
        let reg = Registry::with_batch_capacity(4).unwrap();
        let (a, _a_peer) = OwnedSocket::pair().unwrap();
        let (c, _c_peer) = OwnedSocket::pair().unwrap();
        let closed_raw = a.as_raw_fd();
        reg.add_interest(a.as_fd()).unwrap();
        reg.close_registered(a).unwrap();
        // A hang-up left over from an earlier holder of `c`'s number.
        reg.shared.pending_hangups.lock().push_back(c.as_raw_fd());
        reg.add_interest(c.as_fd()).unwrap();

        let mut events = reg.events();
        assert_eq!(reg.wait_timeout(&mut events, SHORT).unwrap(), 1);
        assert_eq!(events.get(0).map(|ev| ev.handle), Some(closed_raw));
        assert_eq!(reg.wait_timeout(&mut events, SHORT).unwrap(), 0);
    }
}
