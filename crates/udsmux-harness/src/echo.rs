//! Readiness-driven echo server.
//!
//! The listener and every accepted client share one [`Registry`]. A readable
//! listener accepts; a readable client is read once and the bytes are written
//! straight back; end of stream, error or hang-up closes the client through
//! [`Registry::close_registered`]. The hang-up that close queues arrives for
//! a handle no longer in the client table and is ignored.

use std::collections::HashMap;
use std::os::fd::{AsFd, AsRawFd, RawFd};

use serde::Serialize;
use udsmux_core::poll::ReadinessEvent;
use udsmux_core::{OwnedSocket, Registry, UnixAddr};
use udsmux_membrane::config::{WaitTimeout, configured_staging_capacity};
use udsmux_membrane::structured_log::{LogLevel, log_event};

use crate::client::write_all;
use crate::error::Result;

/// Counters reported when the server stops.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct EchoStats {
    pub accepted: u64,
    pub closed: u64,
    pub bytes_echoed: u64,
    pub waits: u64,
}

pub struct EchoServer {
    listener: OwnedSocket,
    registry: Registry,
    clients: HashMap<RawFd, OwnedSocket>,
    buf: Vec<u8>,
    stats: EchoStats,
}

impl EchoServer {
    /// Listen on `addr` and register the listener.
    pub fn bind(addr: &UnixAddr) -> Result<Self> {
        let listener = OwnedSocket::listen(addr, None)?;
        let registry = Registry::new()?;
        registry.add_interest(listener.as_fd())?;
        Ok(Self {
            listener,
            registry,
            clients: HashMap::new(),
            buf: vec![0u8; configured_staging_capacity()],
            stats: EchoStats::default(),
        })
    }

    pub fn local_addr(&self) -> Result<UnixAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// A handle on the registry, e.g. to [`Registry::wake`] a blocked loop.
    #[must_use]
    pub fn registry(&self) -> Registry {
        self.registry.clone()
    }

    #[must_use]
    pub fn stats(&self) -> &EchoStats {
        &self.stats
    }

    /// Serve until `max_clients` connections have come and gone (forever if
    /// `None`).
    pub fn run(mut self, max_clients: Option<u64>) -> Result<EchoStats> {
        while max_clients.is_none_or(|max| self.stats.closed < max) {
            self.poll_once(WaitTimeout::Indefinite)?;
        }
        for (_, client) in self.clients.drain() {
            self.registry.close_registered(client)?;
        }
        self.registry.close()?;
        Ok(self.stats)
    }

    /// One wait plus handling of everything it reported. Returns the number
    /// of events handled.
    pub fn poll_once(&mut self, timeout: WaitTimeout) -> Result<usize> {
        let mut events = self.registry.events();
        self.registry.wait_timeout(&mut events, timeout)?;
        self.stats.waits += 1;
        let ready: Vec<ReadinessEvent> = events.iter().collect();
        for ev in &ready {
            self.handle(*ev)?;
        }
        Ok(ready.len())
    }

    fn handle(&mut self, ev: ReadinessEvent) -> Result<()> {
        if ev.handle == self.listener.as_raw_fd() {
            let client = self.listener.accept()?;
            self.registry.add_interest(client.as_fd())?;
            log_event(LogLevel::Info, "echo_accepted", |e| {
                e.with_op("accept").with_handle(client.as_raw_fd())
            });
            self.stats.accepted += 1;
            self.clients.insert(client.as_raw_fd(), client);
            return Ok(());
        }
        let Some(client) = self.clients.get(&ev.handle) else {
            return Ok(());
        };
        if ev.is_readable() {
            match client.read(&mut self.buf) {
                Ok(0) => {}
                Ok(n) => {
                    write_all(client, &self.buf[..n])?;
                    self.stats.bytes_echoed += n as u64;
                    return Ok(());
                }
                Err(errno) => {
                    log_event(LogLevel::Warn, "echo_read_failed", |e| {
                        e.with_op("read").with_handle(ev.handle).with_errno(errno.raw())
                    });
                }
            }
        } else if !(ev.is_hangup() || ev.is_error()) {
            return Ok(());
        }
        self.drop_client(ev.handle)
    }

    fn drop_client(&mut self, handle: RawFd) -> Result<()> {
        if let Some(client) = self.clients.remove(&handle) {
            self.registry.close_registered(client)?;
            self.stats.closed += 1;
        }
        Ok(())
    }
}
