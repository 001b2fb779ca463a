//! Integration tests for the `udsmux_*` return-value contract: results are
//! non-negative, failures are `-errno`, waits report pairs.

use std::ffi::c_int;
use std::ptr;
use std::thread;
use std::time::Duration;

use udsmux_abi::poll_abi::{
    udsmux_registry_add, udsmux_registry_close_handle, udsmux_registry_create,
    udsmux_registry_remove, udsmux_registry_wait, udsmux_registry_wait_timeout,
    udsmux_registry_wake,
};
use udsmux_abi::socket_abi::{
    udsmux_accept, udsmux_close, udsmux_connect, udsmux_listen, udsmux_read, udsmux_set_blocking,
    udsmux_socket, udsmux_write,
};

const EPOLLIN: c_int = 0x001;
const EPOLLHUP: c_int = 0x010;

fn abstract_address(tag: &str) -> Vec<u8> {
    let mut bytes = vec![0u8];
    bytes.extend_from_slice(format!("udsmux-abi-{}-{tag}", std::process::id()).as_bytes());
    bytes
}

/// `(listener, client, server)` connected over an abstract name.
fn connected_pair(tag: &str) -> (c_int, c_int, c_int) {
    let addr = abstract_address(tag);
    unsafe {
        let listener = udsmux_listen(addr.as_ptr(), addr.len(), 0);
        assert!(listener >= 0, "listen: {listener}");
        let client = udsmux_socket();
        assert!(client >= 0);
        assert_eq!(udsmux_connect(client, addr.as_ptr(), addr.len()), 0);
        let server = udsmux_accept(listener);
        assert!(server >= 0, "accept: {server}");
        (listener, client, server)
    }
}

#[test]
fn accept_register_write_wait_read() {
    let (listener, e2, e1) = connected_pair("scenario");
    unsafe {
        let reg = udsmux_registry_create();
        assert!(reg >= 0);
        assert_eq!(udsmux_registry_add(reg, e1), 0);
        assert_eq!(udsmux_write(e2, b"hello".as_ptr(), 5), 5);

        let mut out = [0 as c_int; 16];
        let n = udsmux_registry_wait(reg, out.as_mut_ptr(), out.len());
        assert_eq!(n, 1);
        assert_eq!(out[0], e1);
        assert_ne!(out[1] & EPOLLIN, 0);

        let mut buf = [0u8; 10];
        assert_eq!(udsmux_read(e1, buf.as_mut_ptr(), buf.len()), 5);
        assert_eq!(&buf[..5], b"hello");

        for h in [reg, e1, e2, listener] {
            assert_eq!(udsmux_close(h), 0);
        }
    }
}

#[test]
fn connect_missing_path_is_negative_enoent() {
    let path = format!("/tmp/udsmux-abi-{}-missing.sock", std::process::id());
    unsafe {
        let h = udsmux_socket();
        assert_eq!(udsmux_connect(h, path.as_ptr(), path.len()), -libc::ENOENT);
        assert_eq!(udsmux_close(h), 0);
    }
}

#[test]
fn pointer_and_length_checks() {
    unsafe {
        let h = udsmux_socket();
        assert_eq!(udsmux_connect(h, ptr::null(), 4), -libc::EFAULT);
        assert_eq!(udsmux_connect(h, ptr::null(), 0), -libc::EINVAL);
        assert_eq!(udsmux_write(h, ptr::null(), 1), -libc::EFAULT);
        assert_eq!(udsmux_read(h, ptr::null_mut(), 8), -libc::EFAULT);
        let mut byte = 0u8;
        assert_eq!(udsmux_read(h, &mut byte, 0), -libc::EINVAL);
        assert_eq!(udsmux_listen(ptr::null(), 3, 0), -libc::EFAULT);
        assert_eq!(udsmux_close(h), 0);
    }
}

#[test]
fn bad_handles_are_negative_ebadf() {
    unsafe {
        assert_eq!(udsmux_set_blocking(-1, true), -libc::EBADF);
        assert_eq!(udsmux_accept(-1), -libc::EBADF);
        assert_eq!(udsmux_close(-1), -libc::EBADF);
        assert_eq!(udsmux_write(-3, b"x".as_ptr(), 1), -libc::EBADF);
    }
}

#[test]
fn set_blocking_returns_flags() {
    unsafe {
        let h = udsmux_socket();
        let flags = udsmux_set_blocking(h, false);
        assert!(flags >= 0);
        assert_ne!(flags & libc::O_NONBLOCK, 0);
        let flags = udsmux_set_blocking(h, true);
        assert_eq!(flags & libc::O_NONBLOCK, 0);

        let mut buf = [0u8; 4];
        udsmux_set_blocking(h, false);
        // Unconnected stream socket: nothing to read.
        assert!(udsmux_read(h, buf.as_mut_ptr(), buf.len()) < 0);
        assert_eq!(udsmux_close(h), 0);
    }
}

#[test]
fn peer_close_reads_zero() {
    let (listener, client, server) = connected_pair("eof");
    unsafe {
        assert_eq!(udsmux_close(client), 0);
        let mut buf = [0u8; 4];
        assert_eq!(udsmux_read(server, buf.as_mut_ptr(), buf.len()), 0);
        assert_eq!(udsmux_close(server), 0);
        assert_eq!(udsmux_close(listener), 0);
    }
}

#[test]
fn registry_membership_errors() {
    let (listener, client, server) = connected_pair("membership");
    unsafe {
        let reg = udsmux_registry_create();
        assert_eq!(udsmux_registry_add(reg, server), 0);
        assert_eq!(udsmux_registry_add(reg, server), -libc::EEXIST);
        assert_eq!(udsmux_registry_remove(reg, server), 0);
        assert_eq!(udsmux_registry_remove(reg, server), -libc::ENOENT);
        assert_eq!(udsmux_registry_add(-1, server), -libc::EBADF);
        for h in [reg, server, client, listener] {
            assert_eq!(udsmux_close(h), 0);
        }
    }
}

#[test]
fn wait_output_checks_and_sentinel() {
    unsafe {
        let reg = udsmux_registry_create();
        let mut out = [0 as c_int; 4];
        assert_eq!(udsmux_registry_wait(reg, out.as_mut_ptr(), 1), -libc::EINVAL);
        assert_eq!(udsmux_registry_wait(reg, ptr::null_mut(), 4), -libc::EFAULT);
        assert_eq!(udsmux_registry_wait_timeout(reg, 0, out.as_mut_ptr(), out.len()), 0);

        assert_eq!(udsmux_close(reg), 0);

        // Unknown registry: the error travels in the sentinel pair.
        let unknown = c_int::MAX;
        assert_eq!(udsmux_registry_wait(unknown, out.as_mut_ptr(), out.len()), 1);
        assert_eq!(out[0], unknown);
        assert_eq!(out[1], -libc::EBADF);
    }
}

#[test]
fn wake_returns_zero_pairs() {
    unsafe {
        let reg = udsmux_registry_create();
        assert_eq!(udsmux_registry_wake(reg), 0);
        let mut out = [0 as c_int; 8];
        assert_eq!(udsmux_registry_wait_timeout(reg, -1, out.as_mut_ptr(), out.len()), 0);
        assert_eq!(udsmux_close(reg), 0);
    }
}

#[test]
fn close_handle_wakes_waiting_thread() {
    let (listener, client, server) = connected_pair("closehandle");
    let reg = unsafe { udsmux_registry_create() };
    assert_eq!(unsafe { udsmux_registry_add(reg, server) }, 0);

    let waiter = thread::spawn(move || {
        let mut out = [0 as c_int; 8];
        let n = unsafe { udsmux_registry_wait_timeout(reg, -1, out.as_mut_ptr(), out.len()) };
        (n, out)
    });
    thread::sleep(Duration::from_millis(50));
    assert_eq!(unsafe { udsmux_registry_close_handle(reg, server) }, 0);

    let (n, out) = waiter.join().unwrap();
    assert_eq!(n, 1);
    assert_eq!(out[0], server);
    assert_eq!(out[1], EPOLLHUP);
    unsafe {
        assert_eq!(udsmux_close(client), 0);
        assert_eq!(udsmux_close(listener), 0);
        assert_eq!(udsmux_close(reg), 0);
    }
}

#[test]
fn pair_count_respects_output_length() {
    let pairs: Vec<_> = (0..3).map(|i| connected_pair(&format!("outlen{i}"))).collect();
    unsafe {
        let reg = udsmux_registry_create();
        for &(_, client, server) in &pairs {
            assert_eq!(udsmux_registry_add(reg, server), 0);
            assert_eq!(udsmux_write(client, b"x".as_ptr(), 1), 1);
        }
        // Room for two pairs (five ints): never more than two reported.
        let mut out = [0 as c_int; 5];
        assert_eq!(udsmux_registry_wait_timeout(reg, 100, out.as_mut_ptr(), out.len()), 2);
        assert_eq!(udsmux_close(reg), 0);
        for (l, c, s) in pairs {
            for h in [s, c, l] {
                assert_eq!(udsmux_close(h), 0);
            }
        }
    }
}

#[test]
fn closing_registry_releases_blocked_waiter() {
    let reg = unsafe { udsmux_registry_create() };
    assert!(reg >= 0);
    let (done_tx, done_rx) = std::sync::mpsc::channel();
    let waiter = thread::spawn(move || {
        let mut out = [0 as c_int; 4];
        let n = unsafe { udsmux_registry_wait(reg, out.as_mut_ptr(), out.len()) };
        let _ = done_tx.send((n, out[0], out[1]));
    });
    thread::sleep(Duration::from_millis(50));
    assert_eq!(unsafe { udsmux_close(reg) }, 0);

    let (n, handle, code) = done_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("waiter still blocked after udsmux_close");
    waiter.join().unwrap();
    assert_eq!((n, handle, code), (1, reg, -libc::EBADF));
}
