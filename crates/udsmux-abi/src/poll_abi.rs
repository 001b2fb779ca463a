//! ABI layer for readiness registries.
//!
//! A registry is identified by its epoll descriptor. The [`Registry`] behind
//! it lives in a process-wide table until `udsmux_close`.
//!
//! Waits write `(handle, flags)` pairs of ints into the caller's array and
//! return the pair count. A failed wait writes the single sentinel pair
//! `(registry, -errno)` and returns `1`, so a caller that only inspects pairs
//! still sees the error.

use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::c_int;
use std::os::fd::AsRawFd;

use parking_lot::Mutex;
use udsmux_core::errno::EINVAL;
use udsmux_core::poll::{Events, Interest};
use udsmux_core::{Errno, Registry};
use udsmux_membrane::config::{WaitTimeout, configured_wait_timeout};

use crate::util::{encode_unit, int_slice_mut};

static REGISTRIES: Mutex<Option<HashMap<c_int, Registry>>> = Mutex::new(None);

thread_local! {
    static WAIT_EVENTS: RefCell<Option<Events>> = const { RefCell::new(None) };
}

fn lookup(registry: c_int) -> Result<Registry, Errno> {
    REGISTRIES
        .lock()
        .as_ref()
        .and_then(|table| table.get(&registry))
        .cloned()
        .ok_or(Errno::EBADF)
}

/// Remove a registry from the table, if `handle` names one.
pub(crate) fn take_registry(handle: c_int) -> Option<Registry> {
    REGISTRIES.lock().as_mut()?.remove(&handle)
}

/// Wait on `registry` and write pairs into `out`.
fn wait_into(registry: c_int, timeout: WaitTimeout, out: &mut [c_int]) -> c_int {
    let max_pairs = out.len() / 2;
    let result = lookup(registry).and_then(|reg| {
        let want = reg.batch_capacity().min(max_pairs);
        WAIT_EVENTS.with(|cell| {
            let mut slot = cell.borrow_mut();
            if slot.as_ref().is_some_and(|ev| ev.capacity() != want) {
                *slot = None;
            }
            let events = slot.get_or_insert_with(|| Events::with_capacity(want));
            let n = reg.wait_timeout(events, timeout)?;
            for (pair, ev) in out.chunks_exact_mut(2).zip(events.iter()) {
                pair[0] = ev.handle;
                pair[1] = ev.flags as c_int;
            }
            Ok(n)
        })
    });
    match result {
        Ok(n) => n.min(max_pairs) as c_int,
        Err(errno) => {
            out[0] = registry;
            out[1] = errno.to_negative();
            1
        }
    }
}

/// Validate the caller's pair array, then wait.
unsafe fn wait_raw(registry: c_int, timeout: WaitTimeout, out: *mut c_int, out_len: usize) -> c_int {
    // SAFETY: the caller vouches for `out_len` writable ints at `out`.
    let out = match unsafe { int_slice_mut(out, out_len) } {
        Ok(out) => out,
        Err(errno) => return errno.to_negative(),
    };
    if out.len() < 2 {
        return -EINVAL;
    }
    wait_into(registry, timeout, out)
}

abi_fn! {
    /// New registry. Its handle, or `-errno`.
    fn udsmux_registry_create() -> c_int {
        match Registry::new() {
            Ok(registry) => {
                let handle = registry.as_raw_fd();
                REGISTRIES
                    .lock()
                    .get_or_insert_with(HashMap::new)
                    .insert(handle, registry);
                handle
            }
            Err(errno) => errno.to_negative(),
        }
    }
}

abi_fn! {
    /// Watch `handle` for readability. `-EEXIST` if already registered.
    fn udsmux_registry_add(registry: c_int, handle: c_int) -> c_int {
        encode_unit(lookup(registry).and_then(|reg| reg.add_raw(handle, Interest::READABLE)))
    }
}

abi_fn! {
    /// Stop watching `handle` without closing it. `-ENOENT` if unknown.
    fn udsmux_registry_remove(registry: c_int, handle: c_int) -> c_int {
        encode_unit(lookup(registry).and_then(|reg| reg.remove_raw(handle)))
    }
}

abi_fn! {
    /// Deregister and close `handle`; a thread blocked in wait sees
    /// `(handle, EPOLLHUP)`.
    fn udsmux_registry_close_handle(registry: c_int, handle: c_int) -> c_int {
        encode_unit(lookup(registry).and_then(|reg| reg.close_registered_raw(handle)))
    }
}

abi_fn! {
    /// Make a blocked wait return, possibly with zero pairs.
    fn udsmux_registry_wake(registry: c_int) -> c_int {
        encode_unit(lookup(registry).and_then(|reg| reg.wake()))
    }
}

abi_fn! {
    /// Wait with the configured default timeout.
    ///
    /// `out` holds `out_len` ints, room for `out_len / 2` pairs. Returns the
    /// pair count, `1` with the sentinel pair on a wait error, or `-EFAULT` /
    /// `-EINVAL` when `out` cannot hold one pair.
    fn udsmux_registry_wait(registry: c_int, out: *mut c_int, out_len: usize) -> c_int {
        wait_raw(registry, configured_wait_timeout(), out, out_len)
    }
}

abi_fn! {
    /// As `udsmux_registry_wait` with an explicit timeout in milliseconds
    /// (negative blocks indefinitely, `0` polls).
    fn udsmux_registry_wait_timeout(
        registry: c_int,
        timeout_ms: c_int,
        out: *mut c_int,
        out_len: usize,
    ) -> c_int {
        wait_raw(registry, WaitTimeout::from_epoll_millis(timeout_ms), out, out_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_registry_writes_sentinel() {
        let mut out = [0 as c_int; 4];
        assert_eq!(wait_into(-7, WaitTimeout::Indefinite, &mut out), 1);
        assert_eq!(out[..2], [-7, Errno::EBADF.to_negative()]);
    }

    #[test]
    fn short_output_is_einval() {
        let mut out = [0 as c_int; 1];
        let rc = unsafe { wait_raw(0, WaitTimeout::Indefinite, out.as_mut_ptr(), out.len()) };
        assert_eq!(rc, -EINVAL);
    }

    #[test]
    fn table_round_trip() {
        let handle = unsafe { udsmux_registry_create() };
        assert!(handle >= 0);
        assert!(lookup(handle).is_ok());
        let registry = take_registry(handle).unwrap();
        assert_eq!(registry.as_raw_fd(), handle);
        assert!(take_registry(handle).is_none());
        registry.close().unwrap();
    }
}
