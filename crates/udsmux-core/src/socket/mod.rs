//! Socket constants and the owned socket handle.

use std::ffi::c_int;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};

use crate::addr::UnixAddr;
use crate::errno::Errno;
use crate::transport;

// ---------------------------------------------------------------------------
// Address families and types
// ---------------------------------------------------------------------------

/// Unix domain sockets.
pub const AF_UNIX: i32 = 1;
/// Byte-stream socket.
pub const SOCK_STREAM: i32 = 1;
/// Set FD_CLOEXEC on the new socket.
pub const SOCK_CLOEXEC: i32 = 0o2000000;

// ---------------------------------------------------------------------------
// Flags
// ---------------------------------------------------------------------------

/// File status flag for nonblocking I/O.
pub const O_NONBLOCK: i32 = 0o4000;
/// Suppress `SIGPIPE` on send to a closed peer.
pub const MSG_NOSIGNAL: i32 = 0x4000;

/// Shut down the reading side.
pub const SHUT_RD: i32 = 0;
/// Shut down the writing side.
pub const SHUT_WR: i32 = 1;
/// Shut down both reading and writing.
pub const SHUT_RDWR: i32 = 2;

/// Direction for [`OwnedSocket::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    Read,
    Write,
    Both,
}

impl Shutdown {
    #[must_use]
    pub const fn as_raw(self) -> c_int {
        match self {
            Self::Read => SHUT_RD,
            Self::Write => SHUT_WR,
            Self::Both => SHUT_RDWR,
        }
    }
}

// ---------------------------------------------------------------------------
// Owned handle
// ---------------------------------------------------------------------------

/// An open `AF_UNIX` stream socket, closed on drop.
///
/// Use [`close`](Self::close) to observe the close result.
#[derive(Debug)]
pub struct OwnedSocket {
    fd: OwnedFd,
}

impl OwnedSocket {
    /// A new unconnected socket.
    pub fn new() -> Result<Self, Errno> {
        transport::create()
    }

    /// A connected pair.
    pub fn pair() -> Result<(Self, Self), Errno> {
        transport::pair()
    }

    /// A new socket connected to `addr`.
    pub fn connect_to(addr: &UnixAddr) -> Result<Self, Errno> {
        let sock = Self::new()?;
        sock.connect(addr)?;
        Ok(sock)
    }

    /// A listening socket bound to `addr`.
    pub fn listen(addr: &UnixAddr, backlog: Option<i32>) -> Result<Self, Errno> {
        transport::listen(addr, backlog)
    }

    pub fn connect(&self, addr: &UnixAddr) -> Result<(), Errno> {
        transport::connect(self.as_fd(), addr)
    }

    pub fn accept(&self) -> Result<Self, Errno> {
        transport::accept(self.as_fd())
    }

    /// Returns the file status flags now in effect.
    pub fn set_blocking(&self, blocking: bool) -> Result<c_int, Errno> {
        transport::set_blocking(self.as_fd(), blocking)
    }

    pub fn is_nonblocking(&self) -> Result<bool, Errno> {
        transport::is_nonblocking(self.as_fd())
    }

    pub fn read(&self, dst: &mut [u8]) -> Result<usize, Errno> {
        transport::read(self.as_fd(), dst)
    }

    pub fn write(&self, src: &[u8]) -> Result<usize, Errno> {
        transport::write(self.as_fd(), src)
    }

    pub fn shutdown(&self, how: Shutdown) -> Result<(), Errno> {
        transport::shutdown(self.as_fd(), how)
    }

    pub fn local_addr(&self) -> Result<UnixAddr, Errno> {
        transport::local_addr(self.as_fd())
    }

    /// Close the socket and report the result.
    pub fn close(self) -> Result<(), Errno> {
        transport::close(self)
    }
}

impl From<OwnedFd> for OwnedSocket {
    fn from(fd: OwnedFd) -> Self {
        Self { fd }
    }
}

impl From<OwnedSocket> for OwnedFd {
    fn from(sock: OwnedSocket) -> Self {
        sock.fd
    }
}

impl AsFd for OwnedSocket {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl AsRawFd for OwnedSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl IntoRawFd for OwnedSocket {
    fn into_raw_fd(self) -> RawFd {
        self.fd.into_raw_fd()
    }
}

#[allow(unsafe_code)]
impl FromRawFd for OwnedSocket {
    unsafe fn from_raw_fd(fd: RawFd) -> Self {
        // SAFETY: forwarded contract; the caller transfers ownership of `fd`.
        Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        }
    }
}
