//! OS error numbers.
//!
//! Every fallible transport operation fails with an [`Errno`] holding the
//! value the kernel reported, never a remapped code. [`ErrorKind`] groups
//! those values into the categories callers actually branch on.

use thiserror::Error;

/// Linux errno constants used by the transport.
pub const EPERM: i32 = 1;
pub const ENOENT: i32 = 2;
pub const EINTR: i32 = 4;
pub const EIO: i32 = 5;
pub const EBADF: i32 = 9;
pub const EAGAIN: i32 = 11;
pub const EWOULDBLOCK: i32 = EAGAIN;
pub const ENOMEM: i32 = 12;
pub const EACCES: i32 = 13;
pub const EFAULT: i32 = 14;
pub const EEXIST: i32 = 17;
pub const ENOTDIR: i32 = 20;
pub const EINVAL: i32 = 22;
pub const ENFILE: i32 = 23;
pub const EMFILE: i32 = 24;
pub const ENOSPC: i32 = 28;
pub const EPIPE: i32 = 32;
pub const ENAMETOOLONG: i32 = 36;
pub const ENOSYS: i32 = 38;
pub const ELOOP: i32 = 40;
pub const ENOTSOCK: i32 = 88;
pub const EPROTOTYPE: i32 = 91;
pub const EOPNOTSUPP: i32 = 95;
pub const EAFNOSUPPORT: i32 = 97;
pub const EADDRINUSE: i32 = 98;
pub const EADDRNOTAVAIL: i32 = 99;
pub const ECONNABORTED: i32 = 103;
pub const ECONNRESET: i32 = 104;
pub const ENOBUFS: i32 = 105;
pub const EISCONN: i32 = 106;
pub const ENOTCONN: i32 = 107;
pub const ETIMEDOUT: i32 = 110;
pub const ECONNREFUSED: i32 = 111;
pub const EALREADY: i32 = 114;
pub const EINPROGRESS: i32 = 115;

/// Caller-facing grouping of error numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Out of descriptors, memory or buffer space.
    ResourceExhausted,
    PermissionDenied,
    AddressInUse,
    /// The named endpoint does not exist or cannot be reached.
    AddressNotFound,
    ConnectionRefused,
    ConnectionReset,
    ConnectionAborted,
    /// Write to a peer that has gone away.
    BrokenPipe,
    /// Nonblocking handle with nothing to do right now.
    WouldBlock,
    Interrupted,
    /// Not an open descriptor, or not a socket.
    InvalidHandle,
    InvalidInput,
    Other,
}

/// An OS error number, preserved exactly as reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[error("{} (errno {})", errno_label(.0), .0)]
pub struct Errno(i32);

impl Errno {
    pub const ENOENT: Self = Self(ENOENT);
    pub const EBADF: Self = Self(EBADF);
    pub const EAGAIN: Self = Self(EAGAIN);
    pub const EFAULT: Self = Self(EFAULT);
    pub const EINVAL: Self = Self(EINVAL);
    pub const EAFNOSUPPORT: Self = Self(EAFNOSUPPORT);

    /// Wrap a positive error number.
    #[must_use]
    pub const fn new(code: i32) -> Self {
        Self(code)
    }

    /// The calling thread's current OS error.
    #[must_use]
    pub fn last() -> Self {
        Self(
            std::io::Error::last_os_error()
                .raw_os_error()
                .unwrap_or(EIO),
        )
    }

    /// Recover an errno from a negative-errno return value.
    #[must_use]
    pub const fn from_negative(ret: i32) -> Option<Self> {
        if ret < 0 && ret != i32::MIN {
            Some(Self(-ret))
        } else {
            None
        }
    }

    /// The raw positive error number.
    #[must_use]
    pub const fn raw(self) -> i32 {
        self.0
    }

    /// `-errno`, the boundary encoding.
    #[must_use]
    pub const fn to_negative(self) -> i32 {
        -self.0
    }

    #[must_use]
    pub const fn kind(self) -> ErrorKind {
        match self.0 {
            EMFILE | ENFILE | ENOMEM | ENOBUFS | ENOSPC => ErrorKind::ResourceExhausted,
            EPERM | EACCES => ErrorKind::PermissionDenied,
            EADDRINUSE => ErrorKind::AddressInUse,
            ENOENT | ENOTDIR | EADDRNOTAVAIL => ErrorKind::AddressNotFound,
            ECONNREFUSED => ErrorKind::ConnectionRefused,
            ECONNRESET => ErrorKind::ConnectionReset,
            ECONNABORTED => ErrorKind::ConnectionAborted,
            EPIPE => ErrorKind::BrokenPipe,
            EAGAIN | EINPROGRESS | EALREADY => ErrorKind::WouldBlock,
            EINTR => ErrorKind::Interrupted,
            EBADF | ENOTSOCK => ErrorKind::InvalidHandle,
            EINVAL | EFAULT | ENAMETOOLONG | EAFNOSUPPORT | EPROTOTYPE | EOPNOTSUPP => {
                ErrorKind::InvalidInput
            }
            _ => ErrorKind::Other,
        }
    }
}

impl From<Errno> for std::io::Error {
    fn from(errno: Errno) -> Self {
        std::io::Error::from_raw_os_error(errno.0)
    }
}

/// Short symbolic name for log records and messages.
#[must_use]
pub fn errno_name(code: i32) -> &'static str {
    match code {
        EPERM => "EPERM",
        ENOENT => "ENOENT",
        EINTR => "EINTR",
        EIO => "EIO",
        EBADF => "EBADF",
        EAGAIN => "EAGAIN",
        ENOMEM => "ENOMEM",
        EACCES => "EACCES",
        EFAULT => "EFAULT",
        EEXIST => "EEXIST",
        ENOTDIR => "ENOTDIR",
        EINVAL => "EINVAL",
        ENFILE => "ENFILE",
        EMFILE => "EMFILE",
        ENOSPC => "ENOSPC",
        EPIPE => "EPIPE",
        ENAMETOOLONG => "ENAMETOOLONG",
        ENOSYS => "ENOSYS",
        ELOOP => "ELOOP",
        ENOTSOCK => "ENOTSOCK",
        EPROTOTYPE => "EPROTOTYPE",
        EOPNOTSUPP => "EOPNOTSUPP",
        EAFNOSUPPORT => "EAFNOSUPPORT",
        EADDRINUSE => "EADDRINUSE",
        EADDRNOTAVAIL => "EADDRNOTAVAIL",
        ECONNABORTED => "ECONNABORTED",
        ECONNRESET => "ECONNRESET",
        ENOBUFS => "ENOBUFS",
        EISCONN => "EISCONN",
        ENOTCONN => "ENOTCONN",
        ETIMEDOUT => "ETIMEDOUT",
        ECONNREFUSED => "ECONNREFUSED",
        EALREADY => "EALREADY",
        EINPROGRESS => "EINPROGRESS",
        _ => "EUNKNOWN",
    }
}

fn errno_label(code: &i32) -> &'static str {
    errno_name(*code)
}
