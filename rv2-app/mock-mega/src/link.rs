//! TCP stand-in for the board's serial port.
//!
//! The listener is brought up through the core's [`LinkSupervisor`]; one
//! client at a time is accepted and its socket carries the byte stream the
//! message bus would otherwise read from the UART.
//!
//! Writes never block. Outgoing bytes go through a bounded queue that is
//! pushed to the socket as far as it will take them; a peer that stops reading
//! fills the queue and `write_ready` then reports false until it drains.
//!
//! [`LinkSupervisor`]: rv2_core::utils::connection::link::LinkSupervisor

use std::io::{self, Read as _, Write as _};
use std::net::{SocketAddr, TcpListener, TcpStream};

use embedded_io::{ErrorType, Read, ReadReady, Write, WriteReady};
use rv2_core::utils::connection::link::{AttemptStatus, Association};
use tracing::{info, warn};

/// Outgoing bytes held while the socket is full.
const TX_CAPACITY: usize = 4096;
/// Free queue space required to report write readiness; one full line.
const TX_HEADROOM: usize = 512;

#[derive(Debug)]
pub struct LinkError(io::ErrorKind);

impl embedded_io::Error for LinkError {
    fn kind(&self) -> embedded_io::ErrorKind {
        use embedded_io::ErrorKind as K;
        match self.0 {
            io::ErrorKind::ConnectionReset => K::ConnectionReset,
            io::ErrorKind::ConnectionAborted => K::ConnectionAborted,
            io::ErrorKind::BrokenPipe => K::BrokenPipe,
            io::ErrorKind::NotConnected => K::NotConnected,
            io::ErrorKind::TimedOut => K::TimedOut,
            io::ErrorKind::Interrupted => K::Interrupted,
            _ => K::Other,
        }
    }
}

pub struct TcpLink {
    addr: SocketAddr,
    listener: Option<TcpListener>,
    client: Option<TcpStream>,
    tx: Vec<u8>,
}

impl TcpLink {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            listener: None,
            client: None,
            tx: Vec::with_capacity(TX_CAPACITY),
        }
    }

    /// Bound address, once the listener is up.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    pub fn has_client(&self) -> bool {
        self.client.is_some()
    }

    /// Bytes accepted by `write` that the socket has not taken yet.
    pub fn queued(&self) -> usize {
        self.tx.len()
    }

    fn accept(&mut self) {
        if self.client.is_some() {
            return;
        }
        let Some(listener) = self.listener.as_ref() else {
            return;
        };
        match listener.accept() {
            Ok((stream, peer)) => {
                if let Err(error) = stream.set_nonblocking(true) {
                    warn!(%error, "could not make client socket nonblocking");
                    return;
                }
                if let Err(error) = stream.set_nodelay(true) {
                    warn!(%error, "could not disable Nagle on client socket");
                }
                info!(%peer, "computer connected");
                self.client = Some(stream);
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(error) => warn!(%error, "accept failed"),
        }
    }

    fn drop_client(
        &mut self,
        reason: &str,
    ) {
        self.tx.clear();
        if self.client.take().is_some() {
            info!(reason, "computer disconnected");
        }
    }

    /// Push queued bytes to the socket until it would block.
    fn pump(&mut self) -> Result<(), LinkError> {
        let Some(client) = self.client.as_mut() else {
            self.tx.clear();
            return Ok(());
        };
        while !self.tx.is_empty() {
            match client.write(&self.tx) {
                Ok(0) => {
                    self.drop_client("write returned zero");
                    return Err(LinkError(io::ErrorKind::WriteZero));
                }
                Ok(n) => {
                    self.tx.drain(..n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    self.drop_client("write error");
                    return Err(LinkError(e.kind()));
                }
            }
        }
        Ok(())
    }
}

impl Association for TcpLink {
    fn begin(&mut self) {
        self.client = None;
        self.listener = match TcpListener::bind(self.addr) {
            Ok(listener) => match listener.set_nonblocking(true) {
                Ok(()) => {
                    info!(addr = %self.addr, "listening for the computer");
                    Some(listener)
                }
                Err(error) => {
                    warn!(%error, "could not make listener nonblocking");
                    None
                }
            },
            Err(error) => {
                warn!(addr = %self.addr, %error, "bind failed");
                None
            }
        };
    }

    fn status(&mut self) -> AttemptStatus {
        if self.listener.is_some() {
            AttemptStatus::Connected
        } else {
            AttemptStatus::Failed
        }
    }
}

impl ErrorType for TcpLink {
    type Error = LinkError;
}

impl ReadReady for TcpLink {
    fn read_ready(&mut self) -> Result<bool, Self::Error> {
        self.accept();
        let Some(client) = self.client.as_ref() else {
            return Ok(false);
        };
        let mut peeked = [0u8; 1];
        match client.peek(&mut peeked) {
            Ok(0) => {
                self.drop_client("closed by peer");
                Ok(false)
            }
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
            Err(e) => {
                self.drop_client("read error");
                Err(LinkError(e.kind()))
            }
        }
    }
}

impl Read for TcpLink {
    fn read(
        &mut self,
        buf: &mut [u8],
    ) -> Result<usize, Self::Error> {
        let Some(client) = self.client.as_mut() else {
            return Ok(0);
        };
        match client.read(buf) {
            Ok(0) => {
                self.drop_client("closed by peer");
                Ok(0)
            }
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => {
                self.drop_client("read error");
                Err(LinkError(e.kind()))
            }
        }
    }
}

impl WriteReady for TcpLink {
    fn write_ready(&mut self) -> Result<bool, Self::Error> {
        self.accept();
        self.pump()?;
        Ok(self.client.is_some() && TX_CAPACITY - self.tx.len() >= TX_HEADROOM)
    }
}

impl Write for TcpLink {
    /// Queue as much of `buf` as fits. Fails rather than waits when the queue
    /// is full.
    fn write(
        &mut self,
        buf: &[u8],
    ) -> Result<usize, Self::Error> {
        if self.client.is_none() {
            return Err(LinkError(io::ErrorKind::NotConnected));
        }
        self.pump()?;
        let room = TX_CAPACITY - self.tx.len();
        if room == 0 && !buf.is_empty() {
            return Err(LinkError(io::ErrorKind::WouldBlock));
        }
        let n = room.min(buf.len());
        self.tx.extend_from_slice(&buf[..n]);
        self.pump()?;
        Ok(n)
    }

    /// Hands queued bytes to the socket without waiting for it to drain.
    fn flush(&mut self) -> Result<(), Self::Error> {
        self.pump()
    }
}
