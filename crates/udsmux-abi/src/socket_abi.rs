//! ABI layer for socket handles and stream transfer.
//!
//! Each call is one attempt; results are `>= 0`, failures `-errno`.

use std::ffi::c_int;

use udsmux_core::{Errno, UnixAddr, transport};

use crate::poll_abi;
use crate::util::{
    borrow_handle, byte_slice, byte_slice_mut, encode_count, encode_handle, encode_int,
    encode_unit,
};

// ---------------------------------------------------------------------------
// Handle lifecycle
// ---------------------------------------------------------------------------

abi_fn! {
    /// New `AF_UNIX` stream socket (close-on-exec). Handle or `-errno`.
    fn udsmux_socket() -> c_int {
        encode_handle(transport::create())
    }
}

abi_fn! {
    /// Set (`blocking = true`) or clear blocking mode. Returns the file
    /// status flags now in effect, or `-errno`.
    fn udsmux_set_blocking(handle: c_int, blocking: bool) -> c_int {
        encode_int(borrow_handle(handle).and_then(|fd| transport::set_blocking(fd, blocking)))
    }
}

abi_fn! {
    /// Connect to `address[..len]`.
    ///
    /// A leading NUL byte selects the abstract namespace; otherwise the bytes
    /// are a path ending at the first NUL. Empty is `-EINVAL`.
    fn udsmux_connect(handle: c_int, address: *const u8, len: usize) -> c_int {
        let result = byte_slice(address, len).and_then(|bytes| {
            let fd = borrow_handle(handle)?;
            transport::connect_wire(fd, bytes)
        });
        encode_unit(result)
    }
}

abi_fn! {
    /// Listen on `address[..len]` (same encoding as `udsmux_connect`).
    /// `backlog <= 0` uses the configured default.
    fn udsmux_listen(address: *const u8, len: usize, backlog: c_int) -> c_int {
        let backlog = (backlog > 0).then_some(backlog);
        let result = byte_slice(address, len)
            .and_then(UnixAddr::from_wire)
            .and_then(|addr| transport::listen(&addr, backlog));
        encode_handle(result)
    }
}

abi_fn! {
    /// Accept one connection from a listening handle.
    fn udsmux_accept(listener: c_int) -> c_int {
        encode_handle(borrow_handle(listener).and_then(transport::accept))
    }
}

abi_fn! {
    /// Close a socket handle, or a registry created by
    /// `udsmux_registry_create`.
    ///
    /// A registry with a thread blocked in `udsmux_registry_wait` wakes that
    /// thread, which gets the `(registry, -EBADF)` sentinel; its descriptors
    /// are released as that wait returns.
    fn udsmux_close(handle: c_int) -> c_int {
        let result = match poll_abi::take_registry(handle) {
            Some(registry) => registry.close(),
            None if handle < 0 => Err(Errno::EBADF),
            None => transport::close_raw(handle),
        };
        encode_unit(result)
    }
}

// ---------------------------------------------------------------------------
// Transfer
// ---------------------------------------------------------------------------

abi_fn! {
    /// One write of `buf[..len]`. Bytes written (possibly short) or
    /// `-errno`; a gone peer is `-EPIPE`.
    fn udsmux_write(handle: c_int, buf: *const u8, len: usize) -> c_int {
        let result = byte_slice(buf, len).and_then(|src| {
            let fd = borrow_handle(handle)?;
            transport::write(fd, src)
        });
        encode_count(result)
    }
}

abi_fn! {
    /// One read into `buf[..capacity]`. Bytes read, `0` when the peer has
    /// closed, or `-errno`. Zero capacity is `-EINVAL`.
    fn udsmux_read(handle: c_int, buf: *mut u8, capacity: usize) -> c_int {
        let result = byte_slice_mut(buf, capacity).and_then(|dst| {
            let fd = borrow_handle(handle)?;
            transport::read(fd, dst)
        });
        encode_count(result)
    }
}
