//! Stream transport operations on borrowed handles.
//!
//! Each operation is a single attempt: no retry on `EINTR`, no loop on short
//! writes. Failures come back as the kernel's [`Errno`]; end of stream is
//! `Ok(0)`.

mod staging;

pub use staging::{StagingBuffer, with_thread_staging};

use std::ffi::c_int;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::time::Instant;

use udsmux_membrane::config::transport_config;
use udsmux_membrane::heal::{HealingAction, global_healing_policy};
use udsmux_membrane::structured_log::{LogLevel, log_event};

use crate::addr::UnixAddr;
use crate::errno::{ENOENT, Errno, ErrorKind};
use crate::socket::{AF_UNIX, MSG_NOSIGNAL, O_NONBLOCK, OwnedSocket, SOCK_CLOEXEC, SOCK_STREAM, Shutdown};
use crate::syscall;

// ---------------------------------------------------------------------------
// Logging helpers
// ---------------------------------------------------------------------------

/// Count a healing action and log it.
pub(crate) fn record_healing(op: &'static str, handle: Option<RawFd>, action: HealingAction) {
    global_healing_policy().record(&action);
    log_event(LogLevel::Info, "healing_applied", |e| {
        let e = e.with_op(op).with_healing_action(action.name());
        match handle {
            Some(h) => e.with_handle(h),
            None => e,
        }
    });
}

/// Log a failed operation. Transient conditions go out at debug.
pub(crate) fn log_failure(op: &'static str, handle: Option<RawFd>, errno: Errno) {
    let level = match errno.kind() {
        ErrorKind::WouldBlock | ErrorKind::Interrupted => LogLevel::Debug,
        _ => LogLevel::Warn,
    };
    log_event(level, "operation_failed", |e| {
        let e = e.with_op(op).with_errno(errno.raw());
        match handle {
            Some(h) => e.with_handle(h),
            None => e,
        }
    });
}

// ---------------------------------------------------------------------------
// Handle lifecycle
// ---------------------------------------------------------------------------

/// A new unconnected stream socket.
pub fn create() -> Result<OwnedSocket, Errno> {
    let fd = syscall::sys_socket(AF_UNIX, SOCK_STREAM | SOCK_CLOEXEC, 0)
        .inspect_err(|&e| log_failure("socket", None, e))?;
    let raw = fd.as_raw_fd();
    log_event(LogLevel::Debug, "socket_created", |e| {
        e.with_op("socket").with_handle(raw)
    });
    Ok(OwnedSocket::from(fd))
}

/// A connected pair of stream sockets.
pub fn pair() -> Result<(OwnedSocket, OwnedSocket), Errno> {
    let (a, b) = syscall::sys_socketpair(AF_UNIX, SOCK_STREAM | SOCK_CLOEXEC, 0)
        .inspect_err(|&e| log_failure("socketpair", None, e))?;
    Ok((OwnedSocket::from(a), OwnedSocket::from(b)))
}

/// Connect `fd` to `addr`. May block on a blocking handle.
pub fn connect(fd: BorrowedFd<'_>, addr: &UnixAddr) -> Result<(), Errno> {
    let encoded = addr.encode();
    if encoded.healing().is_heal() {
        record_healing("connect", Some(fd.as_raw_fd()), encoded.healing());
    }
    let start = Instant::now();
    match syscall::sys_connect(fd, encoded.as_raw(), encoded.len()) {
        Ok(()) => {
            log_event(LogLevel::Debug, "connected", |e| {
                e.with_op("connect")
                    .with_handle(fd.as_raw_fd())
                    .with_latency_ns(start.elapsed().as_nanos() as u64)
                    .with_details(serde_details(addr))
            });
            Ok(())
        }
        Err(errno) => {
            log_failure("connect", Some(fd.as_raw_fd()), errno);
            Err(errno)
        }
    }
}

/// Connect using the boundary byte encoding of the address.
pub fn connect_wire(fd: BorrowedFd<'_>, address: &[u8]) -> Result<(), Errno> {
    let addr = UnixAddr::from_wire(address)?;
    connect(fd, &addr)
}

/// Set or clear `O_NONBLOCK`. Returns the flags now in effect.
pub fn set_blocking(fd: BorrowedFd<'_>, blocking: bool) -> Result<c_int, Errno> {
    let flags = syscall::sys_fcntl_getfl(fd)?;
    let flags = if blocking {
        flags & !O_NONBLOCK
    } else {
        flags | O_NONBLOCK
    };
    syscall::sys_fcntl_setfl(fd, flags)?;
    Ok(flags)
}

/// Whether `O_NONBLOCK` is set.
pub fn is_nonblocking(fd: BorrowedFd<'_>) -> Result<bool, Errno> {
    Ok(syscall::sys_fcntl_getfl(fd)? & O_NONBLOCK != 0)
}

/// Create a listening socket on `addr`.
///
/// A stale filesystem socket at the path is unlinked first; abstract names
/// are never unlinked. `None` uses the configured backlog.
pub fn listen(addr: &UnixAddr, backlog: Option<i32>) -> Result<OwnedSocket, Errno> {
    let backlog = backlog.unwrap_or_else(|| transport_config().listen_backlog);
    let sock = create()?;
    if let Some(path) = addr.c_path() {
        match syscall::sys_unlink(&path) {
            Ok(()) => {}
            Err(e) if e.raw() == ENOENT => {}
            Err(e) => {
                log_failure("unlink", None, e);
                return Err(e);
            }
        }
    }
    let encoded = addr.encode();
    if encoded.healing().is_heal() {
        record_healing("bind", Some(sock.as_raw_fd()), encoded.healing());
    }
    syscall::sys_bind(sock.as_fd(), encoded.as_raw(), encoded.len())
        .inspect_err(|&e| log_failure("bind", Some(sock.as_raw_fd()), e))?;
    syscall::sys_listen(sock.as_fd(), backlog)
        .inspect_err(|&e| log_failure("listen", Some(sock.as_raw_fd()), e))?;
    log_event(LogLevel::Debug, "listening", |e| {
        e.with_op("listen")
            .with_handle(sock.as_raw_fd())
            .with_details(serde_details(addr))
    });
    Ok(sock)
}

/// Accept one pending connection.
pub fn accept(fd: BorrowedFd<'_>) -> Result<OwnedSocket, Errno> {
    let conn = syscall::sys_accept4(fd, SOCK_CLOEXEC)
        .inspect_err(|&e| log_failure("accept", Some(fd.as_raw_fd()), e))?;
    Ok(OwnedSocket::from(conn))
}

/// Shut down one or both directions.
pub fn shutdown(fd: BorrowedFd<'_>, how: Shutdown) -> Result<(), Errno> {
    syscall::sys_shutdown(fd, how.as_raw())
}

/// The name the socket is bound to.
pub fn local_addr(fd: BorrowedFd<'_>) -> Result<UnixAddr, Errno> {
    let (raw, len) = syscall::sys_getsockname(fd)?;
    UnixAddr::decode(&raw, len)
}

/// Release an owned handle, reporting the close result.
pub fn close(sock: OwnedSocket) -> Result<(), Errno> {
    syscall::sys_close_owned(sock.into())
}

/// Release a handle known only by number.
pub fn close_raw(fd: RawFd) -> Result<(), Errno> {
    syscall::sys_close(fd)
}

// ---------------------------------------------------------------------------
// Data transfer
// ---------------------------------------------------------------------------

/// One write attempt. May be short; a gone peer is `EPIPE`, never a signal.
pub fn write(fd: BorrowedFd<'_>, src: &[u8]) -> Result<usize, Errno> {
    syscall::sys_send(fd, src, MSG_NOSIGNAL)
        .inspect_err(|&e| log_failure("write", Some(fd.as_raw_fd()), e))
}

/// One read attempt through this thread's staging buffer.
pub fn read(fd: BorrowedFd<'_>, dst: &mut [u8]) -> Result<usize, Errno> {
    with_thread_staging(|staging| staging.read_into(fd, dst))
        .inspect_err(|&e| log_failure("read", Some(fd.as_raw_fd()), e))
}

fn serde_details(addr: &UnixAddr) -> serde_json::Value {
    serde_json::json!({
        "address": addr.to_string(),
        "abstract": addr.is_abstract(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocking_mode_toggles_and_is_idempotent() {
        let sock = create().unwrap();
        let fd = sock.as_fd();
        assert!(!is_nonblocking(fd).unwrap());
        let flags = set_blocking(fd, false).unwrap();
        assert_ne!(flags & O_NONBLOCK, 0);
        assert_eq!(set_blocking(fd, false).unwrap(), flags);
        assert!(is_nonblocking(fd).unwrap());
        let flags = set_blocking(fd, true).unwrap();
        assert_eq!(flags & O_NONBLOCK, 0);
        assert!(!is_nonblocking(fd).unwrap());
    }

    #[test]
    fn connect_empty_wire_address_is_einval() {
        let sock = create().unwrap();
        assert_eq!(connect_wire(sock.as_fd(), b""), Err(Errno::EINVAL));
    }

    #[test]
    fn read_on_nonblocking_empty_socket_would_block() {
        let (a, _b) = pair().unwrap();
        set_blocking(a.as_fd(), false).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(read(a.as_fd(), &mut buf), Err(Errno::EAGAIN));
    }

    #[test]
    fn write_to_closed_peer_is_epipe() {
        let (a, b) = pair().unwrap();
        close(b).unwrap();
        assert_eq!(write(a.as_fd(), b"x").unwrap_err().raw(), crate::errno::EPIPE);
    }

    #[test]
    fn close_raw_bad_handle() {
        assert_eq!(close_raw(-1), Err(Errno::EBADF));
    }
}
