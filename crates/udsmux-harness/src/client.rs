//! One-shot echo client.

use std::os::fd::AsFd;
use std::time::{Duration, Instant};

use udsmux_core::{Errno, OwnedSocket, Registry, UnixAddr};
use udsmux_membrane::config::WaitTimeout;

use crate::error::{HarnessError, Result};

/// Write all of `data`, looping over short writes.
pub fn write_all(sock: &OwnedSocket, mut data: &[u8]) -> std::result::Result<(), Errno> {
    while !data.is_empty() {
        let n = sock.write(data)?;
        data = &data[n..];
    }
    Ok(())
}

/// Connect to `addr`, send `data` and collect the same number of bytes back.
///
/// Waits for readability through a [`Registry`] so a silent server fails with
/// [`HarnessError::Timeout`] instead of hanging.
pub fn send_and_receive(addr: &UnixAddr, data: &[u8], timeout: Duration) -> Result<Vec<u8>> {
    let sock = OwnedSocket::connect_to(addr)?;
    write_all(&sock, data)?;

    let registry = Registry::with_batch_capacity(1)?;
    registry.add_interest(sock.as_fd())?;
    let mut events = registry.events();
    let deadline = Instant::now() + timeout;
    let mut received = Vec::with_capacity(data.len());
    let mut buf = vec![0u8; data.len().clamp(1, 64 * 1024)];

    while received.len() < data.len() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(HarnessError::Timeout(timeout.as_millis() as u64));
        }
        if registry.wait_timeout(&mut events, WaitTimeout::After(remaining))? == 0 {
            continue;
        }
        let n = sock.read(&mut buf)?;
        if n == 0 {
            return Err(HarnessError::ShortEcho {
                received: received.len(),
                expected: data.len(),
            });
        }
        received.extend_from_slice(&buf[..n]);
    }

    registry.close()?;
    sock.close()?;
    Ok(received)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_all_over_pair() {
        let (a, b) = OwnedSocket::pair().unwrap();
        let payload = vec![7u8; 4096];
        write_all(&a, &payload).unwrap();
        let mut got = Vec::new();
        let mut buf = [0u8; 1000];
        while got.len() < payload.len() {
            let n = b.read(&mut buf).unwrap();
            got.extend_from_slice(&buf[..n]);
        }
        assert_eq!(got, payload);
    }

    #[test]
    fn missing_server_is_transport_error() {
        let addr = UnixAddr::abstract_name(format!("udsmux-harness-{}-none", std::process::id()));
        let err = send_and_receive(&addr, b"x", Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, HarnessError::Transport(_)), "{err}");
    }
}
