//! Unix domain socket addresses.
//!
//! A name is either a filesystem path or an abstract-namespace name. At the
//! call boundary both arrive as one byte string: a leading NUL byte selects
//! the abstract namespace and the rest is the name taken verbatim; anything
//! else is a path, which ends at its first NUL.
//!
//! Encoding never overruns `sun_path`. Paths are cut to 107 bytes (leaving
//! room for the terminator) and abstract names to 106 bytes; the cut is
//! reported as a [`HealingAction::TruncateAddress`].

use std::ffi::CString;
use std::fmt;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use udsmux_membrane::heal::{HealingAction, global_healing_policy};

use crate::errno::Errno;

/// Bytes in `sockaddr_un.sun_path`.
pub const SUN_PATH_LEN: usize = 108;
/// Longest filesystem path that still leaves a NUL terminator.
pub const MAX_PATH_LEN: usize = SUN_PATH_LEN - 1;
/// Longest abstract name after the leading NUL.
pub const MAX_ABSTRACT_LEN: usize = SUN_PATH_LEN - 2;
/// Offset of `sun_path` within `sockaddr_un`.
const PATH_OFFSET: usize = std::mem::size_of::<libc::sa_family_t>();

/// A Unix domain socket name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UnixAddr {
    /// Filesystem path, without NUL bytes.
    Path(Vec<u8>),
    /// Abstract-namespace name, raw bytes (may contain NULs).
    Abstract(Vec<u8>),
}

impl UnixAddr {
    /// Parse the boundary byte encoding.
    ///
    /// Empty input is `EINVAL`.
    pub fn from_wire(bytes: &[u8]) -> Result<Self, Errno> {
        match bytes.split_first() {
            None => Err(Errno::EINVAL),
            Some((0, name)) => Ok(Self::Abstract(name.to_vec())),
            Some(_) => {
                let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
                Ok(Self::Path(bytes[..end].to_vec()))
            }
        }
    }

    /// A filesystem name.
    pub fn path(path: impl AsRef<Path>) -> Result<Self, Errno> {
        let bytes = path.as_ref().as_os_str().as_bytes();
        if bytes.is_empty() || bytes.contains(&0) {
            return Err(Errno::EINVAL);
        }
        Ok(Self::Path(bytes.to_vec()))
    }

    /// An abstract-namespace name.
    #[must_use]
    pub fn abstract_name(name: impl AsRef<[u8]>) -> Self {
        Self::Abstract(name.as_ref().to_vec())
    }

    /// Parse the command-line form: `@name` is abstract, anything else a path.
    pub fn parse_display(s: &str) -> Result<Self, Errno> {
        match s.strip_prefix('@') {
            Some(name) => Ok(Self::abstract_name(name)),
            None => Self::path(s),
        }
    }

    #[must_use]
    pub fn is_abstract(&self) -> bool {
        matches!(self, Self::Abstract(_))
    }

    /// The name bytes without any namespace marker.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Path(b) | Self::Abstract(b) => b,
        }
    }

    /// The path, for filesystem names.
    #[must_use]
    pub fn filesystem_path(&self) -> Option<&Path> {
        match self {
            Self::Path(b) => Some(Path::new(std::ffi::OsStr::from_bytes(b))),
            Self::Abstract(_) => None,
        }
    }

    /// NUL-terminated path for `unlink`, cut like [`encode`](Self::encode)
    /// cuts it, if this is a filesystem name.
    pub(crate) fn c_path(&self) -> Option<CString> {
        match self {
            Self::Path(b) => CString::new(&b[..b.len().min(MAX_PATH_LEN)]).ok(),
            Self::Abstract(_) => None,
        }
    }

    /// The boundary byte encoding (inverse of [`from_wire`](Self::from_wire)).
    #[must_use]
    pub fn to_wire(&self) -> Vec<u8> {
        match self {
            Self::Path(b) => b.clone(),
            Self::Abstract(name) => {
                let mut out = Vec::with_capacity(name.len() + 1);
                out.push(0);
                out.extend_from_slice(name);
                out
            }
        }
    }

    /// Build the kernel structure.
    ///
    /// The length covers only the bytes in use. For abstract names the kernel
    /// matches on exactly those bytes, so `@foo` here does not reach a peer
    /// that bound with the full `sizeof(sockaddr_un)` length; that peer's
    /// name is `foo` followed by NUL padding to 107 bytes.
    #[must_use]
    pub fn encode(&self) -> EncodedAddr {
        let policy = global_healing_policy();
        let mut raw = libc::sockaddr_un {
            sun_family: libc::AF_UNIX as libc::sa_family_t,
            sun_path: [0; SUN_PATH_LEN],
        };
        let (start, name, limit) = match self {
            Self::Path(b) => (0, b.as_slice(), MAX_PATH_LEN),
            Self::Abstract(b) => (1, b.as_slice(), MAX_ABSTRACT_LEN),
        };
        let healing = policy.heal_address_bounds(name.len(), limit);
        let name = &name[..name.len().min(limit)];
        for (slot, &byte) in raw.sun_path[start..].iter_mut().zip(name) {
            *slot = byte as libc::c_char;
        }
        // One extra byte: the path terminator, or the abstract marker.
        let used = name.len() + 1;
        EncodedAddr {
            raw,
            len: (PATH_OFFSET + used) as libc::socklen_t,
            healing,
        }
    }

    /// Read a kernel-reported address back.
    ///
    /// Unnamed sockets (length covering only the family) are `EINVAL`.
    pub fn decode(raw: &libc::sockaddr_un, len: libc::socklen_t) -> Result<Self, Errno> {
        if raw.sun_family != libc::AF_UNIX as libc::sa_family_t {
            return Err(Errno::EAFNOSUPPORT);
        }
        let len = (len as usize).min(PATH_OFFSET + SUN_PATH_LEN);
        if len <= PATH_OFFSET {
            return Err(Errno::EINVAL);
        }
        let bytes: Vec<u8> = raw.sun_path[..len - PATH_OFFSET]
            .iter()
            .map(|&c| c as u8)
            .collect();
        Self::from_wire(&bytes)
    }
}

impl fmt::Display for UnixAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(b) => write!(f, "{}", String::from_utf8_lossy(b)),
            Self::Abstract(b) => write!(f, "@{}", b.escape_ascii()),
        }
    }
}

/// A `sockaddr_un` ready for `connect`/`bind`.
#[derive(Clone, Copy)]
pub struct EncodedAddr {
    raw: libc::sockaddr_un,
    len: libc::socklen_t,
    healing: HealingAction,
}

impl EncodedAddr {
    #[must_use]
    pub fn as_raw(&self) -> &libc::sockaddr_un {
        &self.raw
    }

    /// Address length to hand the kernel.
    #[must_use]
    pub fn len(&self) -> libc::socklen_t {
        self.len
    }

    /// Truncation applied while encoding, if any.
    #[must_use]
    pub fn healing(&self) -> HealingAction {
        self.healing
    }

    /// The name as the kernel will see it.
    pub fn decode(&self) -> Result<UnixAddr, Errno> {
        UnixAddr::decode(&self.raw, self.len)
    }
}

impl fmt::Debug for EncodedAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodedAddr")
            .field("addr", &self.decode().ok())
            .field("len", &self.len)
            .field("healing", &self.healing)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sun_path_bytes(enc: &EncodedAddr) -> Vec<u8> {
        enc.as_raw().sun_path.iter().map(|&c| c as u8).collect()
    }

    // -- wire form ---------------------------------------------------------

    #[test]
    fn wire_leading_nul_is_abstract() {
        assert_eq!(
            UnixAddr::from_wire(b"\0svc\0x").unwrap(),
            UnixAddr::Abstract(b"svc\0x".to_vec())
        );
        assert_eq!(UnixAddr::from_wire(b"\0").unwrap(), UnixAddr::Abstract(vec![]));
    }

    #[test]
    fn wire_path_stops_at_nul() {
        assert_eq!(
            UnixAddr::from_wire(b"/tmp/a.sock\0junk").unwrap(),
            UnixAddr::Path(b"/tmp/a.sock".to_vec())
        );
    }

    #[test]
    fn wire_empty_is_einval() {
        assert_eq!(UnixAddr::from_wire(b""), Err(Errno::EINVAL));
    }

    #[test]
    fn wire_round_trip() {
        for addr in [
            UnixAddr::Path(b"/run/x".to_vec()),
            UnixAddr::Abstract(b"name".to_vec()),
        ] {
            assert_eq!(UnixAddr::from_wire(&addr.to_wire()).unwrap(), addr);
        }
    }

    // -- encoding ----------------------------------------------------------

    #[test]
    fn path_encoding_is_nul_terminated() {
        let enc = UnixAddr::path("/tmp/s").unwrap().encode();
        assert_eq!(enc.as_raw().sun_family, libc::AF_UNIX as libc::sa_family_t);
        assert_eq!(enc.len() as usize, PATH_OFFSET + 7);
        assert_eq!(&sun_path_bytes(&enc)[..7], b"/tmp/s\0");
        assert_eq!(enc.healing(), HealingAction::None);
    }

    #[test]
    fn abstract_encoding_counts_exact_length() {
        let enc = UnixAddr::abstract_name("svc").encode();
        assert_eq!(enc.len() as usize, PATH_OFFSET + 4);
        assert_eq!(&sun_path_bytes(&enc)[..4], b"\0svc");
        assert_eq!(enc.decode().unwrap(), UnixAddr::abstract_name("svc"));
    }

    #[test]
    fn long_path_is_truncated_with_terminator() {
        let long = vec![b'a'; 200];
        let enc = UnixAddr::Path(long).encode();
        let bytes = sun_path_bytes(&enc);
        assert!(bytes[..MAX_PATH_LEN].iter().all(|&b| b == b'a'));
        assert_eq!(bytes[MAX_PATH_LEN], 0);
        assert_eq!(enc.len() as usize, PATH_OFFSET + SUN_PATH_LEN);
        assert_eq!(
            enc.healing(),
            HealingAction::TruncateAddress {
                requested: 200,
                truncated: MAX_PATH_LEN
            }
        );
    }

    #[test]
    fn long_abstract_name_is_truncated() {
        let enc = UnixAddr::Abstract(vec![b'z'; 150]).encode();
        assert_eq!(enc.len() as usize, PATH_OFFSET + SUN_PATH_LEN);
        assert_eq!(
            enc.decode().unwrap(),
            UnixAddr::Abstract(vec![b'z'; MAX_ABSTRACT_LEN])
        );
        assert!(enc.healing().is_heal());
    }

    #[test]
    fn exact_limits_are_not_healed() {
        assert!(!UnixAddr::Path(vec![b'p'; MAX_PATH_LEN]).encode().healing().is_heal());
        assert!(
            !UnixAddr::Abstract(vec![b'q'; MAX_ABSTRACT_LEN])
                .encode()
                .healing()
                .is_heal()
        );
    }

    // -- decoding ----------------------------------------------------------

    #[test]
    fn decode_rejects_unnamed_and_foreign_family() {
        let mut raw = UnixAddr::path("/x").unwrap().encode();
        assert_eq!(
            UnixAddr::decode(raw.as_raw(), PATH_OFFSET as libc::socklen_t),
            Err(Errno::EINVAL)
        );
        raw.raw.sun_family = libc::AF_INET as libc::sa_family_t;
        assert_eq!(raw.decode(), Err(Errno::EAFNOSUPPORT));
    }

    // -- constructors ------------------------------------------------------

    #[test]
    fn path_constructor_rejects_empty_and_nul() {
        assert_eq!(UnixAddr::path(""), Err(Errno::EINVAL));
        assert_eq!(
            UnixAddr::path(std::ffi::OsStr::from_bytes(b"a\0b")),
            Err(Errno::EINVAL)
        );
    }

    #[test]
    fn display_form() {
        assert_eq!(UnixAddr::parse_display("@svc").unwrap(), UnixAddr::abstract_name("svc"));
        assert_eq!(
            UnixAddr::parse_display("/tmp/s").unwrap().filesystem_path(),
            Some(Path::new("/tmp/s"))
        );
        assert_eq!(UnixAddr::abstract_name(b"a\0b").to_string(), "@a\\x00b");
        assert_eq!(UnixAddr::path("/tmp/s").unwrap().to_string(), "/tmp/s");
    }
}
