//! Raw Linux syscall veneer.
//!
//! The only place in the core that talks to the kernel. Each wrapper issues
//! one `libc::syscall`, turns a negative return into [`Errno`], and takes or
//! returns `OwnedFd`/`BorrowedFd` so that descriptor ownership is settled
//! before the value leaves this module.
//!
//! Epoll waits go through `epoll_pwait` and unlinks through `unlinkat`,
//! since aarch64 has no plain `epoll_wait` or `unlink`.

use std::ffi::{CStr, c_int, c_long};
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};

use crate::errno::Errno;

/// Size of the kernel `sigset_t` passed to `epoll_pwait`.
const KERNEL_SIGSET_BYTES: usize = 8;

// -------------------------------------------------------------------------
// Error handling
// -------------------------------------------------------------------------

/// Convert a raw `libc::syscall` return value, reading errno on failure.
#[inline]
pub fn syscall_result(ret: c_long) -> Result<c_long, Errno> {
    if ret < 0 { Err(Errno::last()) } else { Ok(ret) }
}

#[inline]
fn owned(ret: c_long) -> Result<OwnedFd, Errno> {
    let fd = syscall_result(ret)? as RawFd;
    // SAFETY: the kernel just returned this descriptor and nothing else owns it.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

// -------------------------------------------------------------------------
// Descriptors
// -------------------------------------------------------------------------

/// `read(fd, buf, len)`.
#[inline]
pub fn sys_read(fd: BorrowedFd<'_>, buf: &mut [u8]) -> Result<usize, Errno> {
    // SAFETY: buf is a live, writable slice of exactly buf.len() bytes.
    let ret = unsafe {
        libc::syscall(
            libc::SYS_read,
            fd.as_raw_fd(),
            buf.as_mut_ptr(),
            buf.len(),
        )
    };
    syscall_result(ret).map(|n| n as usize)
}

/// `write(fd, buf, len)`.
#[inline]
pub fn sys_write(fd: BorrowedFd<'_>, buf: &[u8]) -> Result<usize, Errno> {
    // SAFETY: buf is a live, readable slice of exactly buf.len() bytes.
    let ret = unsafe { libc::syscall(libc::SYS_write, fd.as_raw_fd(), buf.as_ptr(), buf.len()) };
    syscall_result(ret).map(|n| n as usize)
}

/// `close(fd)` on a descriptor this process does not track as owned.
#[inline]
pub fn sys_close(fd: RawFd) -> Result<(), Errno> {
    // SAFETY: close is safe to call on any fd value (bad fd just returns EBADF).
    let ret = unsafe { libc::syscall(libc::SYS_close, fd) };
    syscall_result(ret).map(|_| ())
}

/// Close an owned descriptor and report the result instead of dropping it.
#[inline]
pub fn sys_close_owned(fd: OwnedFd) -> Result<(), Errno> {
    sys_close(fd.into_raw_fd())
}

/// `fcntl(fd, F_GETFL)`.
#[inline]
pub fn sys_fcntl_getfl(fd: BorrowedFd<'_>) -> Result<c_int, Errno> {
    // SAFETY: F_GETFL takes no pointer argument.
    let ret = unsafe { libc::syscall(libc::SYS_fcntl, fd.as_raw_fd(), libc::F_GETFL) };
    syscall_result(ret).map(|v| v as c_int)
}

/// `fcntl(fd, F_SETFL, flags)`.
#[inline]
pub fn sys_fcntl_setfl(fd: BorrowedFd<'_>, flags: c_int) -> Result<(), Errno> {
    // SAFETY: F_SETFL takes an integer argument.
    let ret = unsafe { libc::syscall(libc::SYS_fcntl, fd.as_raw_fd(), libc::F_SETFL, flags) };
    syscall_result(ret).map(|_| ())
}

/// `unlinkat(AT_FDCWD, path, 0)`.
#[inline]
pub fn sys_unlink(path: &CStr) -> Result<(), Errno> {
    // SAFETY: path is a valid NUL-terminated string for the duration of the call.
    let ret = unsafe { libc::syscall(libc::SYS_unlinkat, libc::AT_FDCWD, path.as_ptr(), 0) };
    syscall_result(ret).map(|_| ())
}

// -------------------------------------------------------------------------
// Sockets
// -------------------------------------------------------------------------

/// `socket(domain, type, protocol)`.
#[inline]
pub fn sys_socket(domain: c_int, ty: c_int, protocol: c_int) -> Result<OwnedFd, Errno> {
    // SAFETY: no pointer arguments.
    owned(unsafe { libc::syscall(libc::SYS_socket, domain, ty, protocol) })
}

/// `socketpair(domain, type, protocol, sv)`.
#[inline]
pub fn sys_socketpair(
    domain: c_int,
    ty: c_int,
    protocol: c_int,
) -> Result<(OwnedFd, OwnedFd), Errno> {
    let mut sv: [c_int; 2] = [-1, -1];
    // SAFETY: sv is a writable array of two ints.
    let ret = unsafe { libc::syscall(libc::SYS_socketpair, domain, ty, protocol, sv.as_mut_ptr()) };
    syscall_result(ret)?;
    // SAFETY: on success both entries are fresh descriptors owned by nobody else.
    Ok(unsafe { (OwnedFd::from_raw_fd(sv[0]), OwnedFd::from_raw_fd(sv[1])) })
}

/// `connect(fd, addr, len)`.
#[inline]
pub fn sys_connect(
    fd: BorrowedFd<'_>,
    addr: &libc::sockaddr_un,
    len: libc::socklen_t,
) -> Result<(), Errno> {
    let len = len.min(std::mem::size_of::<libc::sockaddr_un>() as libc::socklen_t);
    // SAFETY: addr points to a sockaddr_un and len never exceeds its size.
    let ret = unsafe {
        libc::syscall(
            libc::SYS_connect,
            fd.as_raw_fd(),
            addr as *const libc::sockaddr_un,
            len,
        )
    };
    syscall_result(ret).map(|_| ())
}

/// `bind(fd, addr, len)`.
#[inline]
pub fn sys_bind(
    fd: BorrowedFd<'_>,
    addr: &libc::sockaddr_un,
    len: libc::socklen_t,
) -> Result<(), Errno> {
    let len = len.min(std::mem::size_of::<libc::sockaddr_un>() as libc::socklen_t);
    // SAFETY: addr points to a sockaddr_un and len never exceeds its size.
    let ret = unsafe {
        libc::syscall(
            libc::SYS_bind,
            fd.as_raw_fd(),
            addr as *const libc::sockaddr_un,
            len,
        )
    };
    syscall_result(ret).map(|_| ())
}

/// `listen(fd, backlog)`.
#[inline]
pub fn sys_listen(fd: BorrowedFd<'_>, backlog: c_int) -> Result<(), Errno> {
    // SAFETY: no pointer arguments.
    let ret = unsafe { libc::syscall(libc::SYS_listen, fd.as_raw_fd(), backlog) };
    syscall_result(ret).map(|_| ())
}

/// `accept4(fd, NULL, NULL, flags)`.
#[inline]
pub fn sys_accept4(fd: BorrowedFd<'_>, flags: c_int) -> Result<OwnedFd, Errno> {
    // SAFETY: null address pointers tell the kernel not to report the peer.
    owned(unsafe {
        libc::syscall(
            libc::SYS_accept4,
            fd.as_raw_fd(),
            std::ptr::null_mut::<libc::sockaddr>(),
            std::ptr::null_mut::<libc::socklen_t>(),
            flags,
        )
    })
}

/// `sendto(fd, buf, len, flags, NULL, 0)`.
#[inline]
pub fn sys_send(fd: BorrowedFd<'_>, buf: &[u8], flags: c_int) -> Result<usize, Errno> {
    // SAFETY: buf is a live, readable slice; no destination address.
    let ret = unsafe {
        libc::syscall(
            libc::SYS_sendto,
            fd.as_raw_fd(),
            buf.as_ptr(),
            buf.len(),
            flags,
            std::ptr::null::<libc::sockaddr>(),
            0 as libc::socklen_t,
        )
    };
    syscall_result(ret).map(|n| n as usize)
}

/// `shutdown(fd, how)`.
#[inline]
pub fn sys_shutdown(fd: BorrowedFd<'_>, how: c_int) -> Result<(), Errno> {
    // SAFETY: no pointer arguments.
    let ret = unsafe { libc::syscall(libc::SYS_shutdown, fd.as_raw_fd(), how) };
    syscall_result(ret).map(|_| ())
}

/// `getsockname(fd, addr, len)`.
#[inline]
pub fn sys_getsockname(fd: BorrowedFd<'_>) -> Result<(libc::sockaddr_un, libc::socklen_t), Errno> {
    let mut addr = libc::sockaddr_un {
        sun_family: 0,
        sun_path: [0; 108],
    };
    let mut len = std::mem::size_of::<libc::sockaddr_un>() as libc::socklen_t;
    // SAFETY: addr and len are writable and len holds the buffer size.
    let ret = unsafe {
        libc::syscall(
            libc::SYS_getsockname,
            fd.as_raw_fd(),
            &mut addr as *mut libc::sockaddr_un,
            &mut len as *mut libc::socklen_t,
        )
    };
    syscall_result(ret)?;
    Ok((addr, len))
}

// -------------------------------------------------------------------------
// Readiness
// -------------------------------------------------------------------------

/// `epoll_create1(flags)`.
#[inline]
pub fn sys_epoll_create1(flags: c_int) -> Result<OwnedFd, Errno> {
    // SAFETY: no pointer arguments.
    owned(unsafe { libc::syscall(libc::SYS_epoll_create1, flags) })
}

/// `epoll_ctl(epfd, op, fd, event)`.
///
/// `fd` stays raw: the registry watches descriptors it does not own.
#[inline]
pub fn sys_epoll_ctl(
    epfd: BorrowedFd<'_>,
    op: c_int,
    fd: RawFd,
    event: Option<&mut libc::epoll_event>,
) -> Result<(), Errno> {
    let event = event.map_or(std::ptr::null_mut(), |e| e as *mut libc::epoll_event);
    // SAFETY: event is either null (EPOLL_CTL_DEL) or a live epoll_event.
    let ret = unsafe { libc::syscall(libc::SYS_epoll_ctl, epfd.as_raw_fd(), op, fd, event) };
    syscall_result(ret).map(|_| ())
}

/// `epoll_pwait(epfd, events, maxevents, timeout, NULL)`.
#[inline]
pub fn sys_epoll_wait(
    epfd: BorrowedFd<'_>,
    events: &mut [libc::epoll_event],
    timeout_ms: c_int,
) -> Result<usize, Errno> {
    let max = events.len().min(c_int::MAX as usize) as c_int;
    // SAFETY: events is writable for `max` entries; a null sigmask leaves
    // the signal mask untouched.
    let ret = unsafe {
        libc::syscall(
            libc::SYS_epoll_pwait,
            epfd.as_raw_fd(),
            events.as_mut_ptr(),
            max,
            timeout_ms,
            std::ptr::null::<libc::sigset_t>(),
            KERNEL_SIGSET_BYTES,
        )
    };
    syscall_result(ret).map(|n| n as usize)
}

/// `eventfd2(initval, flags)`.
#[inline]
pub fn sys_eventfd2(initval: u32, flags: c_int) -> Result<OwnedFd, Errno> {
    // SAFETY: no pointer arguments.
    owned(unsafe { libc::syscall(libc::SYS_eventfd2, initval, flags) })
}
