//! Integration tests: stream transport over real Unix sockets.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use udsmux_core::errno::{self, ErrorKind};
use udsmux_core::socket::Shutdown;
use udsmux_core::{OwnedSocket, UnixAddr};
use udsmux_membrane::heal::global_healing_policy;

static NEXT: AtomicUsize = AtomicUsize::new(0);

fn socket_path(tag: &str) -> PathBuf {
    let n = NEXT.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("udsmux-{}-{tag}-{n}.sock", std::process::id()))
}

fn abstract_name(tag: &str) -> UnixAddr {
    let n = NEXT.fetch_add(1, Ordering::Relaxed);
    UnixAddr::abstract_name(format!("udsmux-{}-{tag}-{n}", std::process::id()))
}

fn connected(addr: &UnixAddr) -> (OwnedSocket, OwnedSocket, OwnedSocket) {
    let listener = OwnedSocket::listen(addr, None).unwrap();
    let client = OwnedSocket::connect_to(addr).unwrap();
    let server = listener.accept().unwrap();
    (listener, client, server)
}

#[test]
fn connect_to_missing_path_is_enoent() {
    let path = socket_path("missing");
    let sock = OwnedSocket::new().unwrap();
    let err = sock.connect(&UnixAddr::path(&path).unwrap()).unwrap_err();
    assert_eq!(err.raw(), errno::ENOENT);
    assert_eq!(err.kind(), ErrorKind::AddressNotFound);
}

#[test]
fn connect_to_abstract_name_without_listener_is_refused() {
    let sock = OwnedSocket::new().unwrap();
    let err = sock.connect(&abstract_name("nobody")).unwrap_err();
    assert_eq!(err.raw(), errno::ECONNREFUSED);
}

#[test]
fn path_listener_round_trip() {
    let path = socket_path("path");
    let addr = UnixAddr::path(&path).unwrap();
    let (listener, client, server) = connected(&addr);

    assert_eq!(client.write(b"hello").unwrap(), 5);
    let mut buf = [0u8; 10];
    assert_eq!(server.read(&mut buf).unwrap(), 5);
    assert_eq!(&buf[..5], b"hello");

    assert_eq!(listener.local_addr().unwrap(), addr);
    drop((listener, client, server));
    let _ = std::fs::remove_file(path);
}

#[test]
fn abstract_listener_round_trip() {
    let addr = abstract_name("abs");
    let (listener, client, server) = connected(&addr);
    assert_eq!(listener.local_addr().unwrap(), addr);
    server.write(b"pong").unwrap();
    let mut buf = [0u8; 8];
    assert_eq!(client.read(&mut buf).unwrap(), 4);
    assert_eq!(&buf[..4], b"pong");
}

#[test]
fn wire_encoded_abstract_connect() {
    let addr = abstract_name("wire");
    let listener = OwnedSocket::listen(&addr, Some(1)).unwrap();
    let client = OwnedSocket::new().unwrap();
    udsmux_core::transport::connect_wire(
        std::os::fd::AsFd::as_fd(&client),
        &addr.to_wire(),
    )
    .unwrap();
    listener.accept().unwrap();
}

#[test]
fn listen_replaces_stale_socket_file() {
    let path = socket_path("stale");
    let addr = UnixAddr::path(&path).unwrap();
    let first = OwnedSocket::listen(&addr, None).unwrap();
    first.close().unwrap();
    assert!(path.exists(), "closing a listener leaves its file behind");

    let (_listener, client, _server) = connected(&addr);
    assert_eq!(client.write(b"x").unwrap(), 1);
    let _ = std::fs::remove_file(path);
}

#[test]
fn peer_close_reads_zero() {
    let (a, b) = OwnedSocket::pair().unwrap();
    a.write(b"last").unwrap();
    a.close().unwrap();
    let mut buf = [0u8; 16];
    assert_eq!(b.read(&mut buf).unwrap(), 4);
    assert_eq!(b.read(&mut buf).unwrap(), 0);
    assert_eq!(b.read(&mut buf).unwrap(), 0);
}

#[test]
fn short_destination_never_overruns() {
    let (a, b) = OwnedSocket::pair().unwrap();
    let payload: Vec<u8> = (0u8..20).collect();
    a.write(&payload).unwrap();

    let before = global_healing_policy().snapshot().1;
    let mut out = Vec::new();
    let mut buf = [0xFFu8; 9];
    for expected in [8usize, 8, 4] {
        let n = b.read(&mut buf[..8]).unwrap();
        assert_eq!(n, expected);
        assert_eq!(buf[8], 0xFF, "byte past the destination was written");
        out.extend_from_slice(&buf[..n]);
    }
    assert_eq!(out, payload);
    // The two reads that filled the destination were clamped; the last
    // drained what was left.
    assert!(global_healing_policy().snapshot().1 >= before + 2);
}

#[test]
fn write_after_peer_shutdown_is_broken_pipe() {
    let (a, b) = OwnedSocket::pair().unwrap();
    b.shutdown(Shutdown::Read).unwrap();
    let err = a.write(b"nope").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BrokenPipe);
}

#[test]
fn nonblocking_accept_without_client_would_block() {
    let addr = abstract_name("nb");
    let listener = OwnedSocket::listen(&addr, None).unwrap();
    listener.set_blocking(false).unwrap();
    assert_eq!(listener.accept().unwrap_err().kind(), ErrorKind::WouldBlock);
}
