//! Shared internal utilities for ABI adapters: pointer checks and the
//! `-errno` return encoding.

use std::ffi::c_int;
use std::os::fd::{BorrowedFd, IntoRawFd};

use udsmux_core::Errno;

/// `0` on success, `-errno` on failure.
#[inline]
pub(crate) fn encode_unit(result: Result<(), Errno>) -> c_int {
    match result {
        Ok(()) => 0,
        Err(e) => e.to_negative(),
    }
}

/// Byte count clamped to `c_int::MAX`, or `-errno`.
#[inline]
pub(crate) fn encode_count(result: Result<usize, Errno>) -> c_int {
    match result {
        Ok(n) => n.min(c_int::MAX as usize) as c_int,
        Err(e) => e.to_negative(),
    }
}

/// Flags or other non-negative integer results, or `-errno`.
#[inline]
pub(crate) fn encode_int(result: Result<c_int, Errno>) -> c_int {
    match result {
        Ok(v) => v,
        Err(e) => e.to_negative(),
    }
}

/// Release ownership of a new handle to the caller, or `-errno`.
#[inline]
pub(crate) fn encode_handle<T: IntoRawFd>(result: Result<T, Errno>) -> c_int {
    match result {
        Ok(handle) => handle.into_raw_fd(),
        Err(e) => e.to_negative(),
    }
}

/// Borrow a caller-owned handle for the duration of one call.
///
/// # Safety
///
/// A non-negative `fd` must stay open until the borrow ends.
#[inline]
pub(crate) unsafe fn borrow_handle<'a>(fd: c_int) -> Result<BorrowedFd<'a>, Errno> {
    if fd < 0 {
        return Err(Errno::EBADF);
    }
    // SAFETY: fd is not -1 and the caller keeps it open for the call.
    Ok(unsafe { BorrowedFd::borrow_raw(fd) })
}

/// View a caller buffer as bytes.
///
/// Null with a non-zero length is `EFAULT`; null with zero length is empty.
///
/// # Safety
///
/// A non-null `ptr` must be readable for `len` bytes.
#[inline]
pub(crate) unsafe fn byte_slice<'a>(ptr: *const u8, len: usize) -> Result<&'a [u8], Errno> {
    if ptr.is_null() {
        return if len == 0 { Ok(&[]) } else { Err(Errno::EFAULT) };
    }
    if len > isize::MAX as usize {
        return Err(Errno::EINVAL);
    }
    // SAFETY: non-null and the caller vouches for `len` readable bytes.
    Ok(unsafe { std::slice::from_raw_parts(ptr, len) })
}

/// View a caller buffer as writable bytes. Same null rules as [`byte_slice`].
///
/// # Safety
///
/// A non-null `ptr` must be writable for `len` bytes and not aliased.
#[inline]
pub(crate) unsafe fn byte_slice_mut<'a>(ptr: *mut u8, len: usize) -> Result<&'a mut [u8], Errno> {
    if ptr.is_null() {
        return if len == 0 {
            Ok(&mut [])
        } else {
            Err(Errno::EFAULT)
        };
    }
    if len > isize::MAX as usize {
        return Err(Errno::EINVAL);
    }
    // SAFETY: non-null and the caller vouches for `len` writable bytes.
    Ok(unsafe { std::slice::from_raw_parts_mut(ptr, len) })
}

/// View a caller array of `len` ints as writable.
///
/// # Safety
///
/// A non-null `ptr` must be aligned and writable for `len` ints.
#[inline]
pub(crate) unsafe fn int_slice_mut<'a>(ptr: *mut c_int, len: usize) -> Result<&'a mut [c_int], Errno> {
    if ptr.is_null() {
        return if len == 0 {
            Ok(&mut [])
        } else {
            Err(Errno::EFAULT)
        };
    }
    if len > isize::MAX as usize / std::mem::size_of::<c_int>() {
        return Err(Errno::EINVAL);
    }
    // SAFETY: non-null, and the caller vouches for `len` writable ints.
    Ok(unsafe { std::slice::from_raw_parts_mut(ptr, len) })
}
