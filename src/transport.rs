//! Byte channels a framing socket can run over.

use std::{
    io::{self, Read, Write},
    net::{Shutdown, TcpStream, ToSocketAddrs},
    time::Duration,
};

use tracing::trace;

use crate::{
    error::{AdbError, AdbResult},
    host::HostAddr,
};

/// Default receive buffer size in bytes.
pub const DEFAULT_RECEIVE_BUFFER_SIZE: usize = 40960;

/// Default write buffer size in bytes.
pub const DEFAULT_WRITE_BUFFER_SIZE: usize = 1024;

/// Construction-time tunables for a framing socket.
///
/// The buffer sizes bound how much a single read or write call moves; the
/// timeouts apply at the OS socket level. A timed-out read surfaces as an
/// I/O error and leaves the stream in an indeterminate state, so the caller
/// should close the socket afterwards.
#[derive(Debug, Clone)]
pub struct SocketOptions {
    pub receive_buffer_size: usize,
    pub write_buffer_size: usize,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            receive_buffer_size: DEFAULT_RECEIVE_BUFFER_SIZE,
            write_buffer_size: DEFAULT_WRITE_BUFFER_SIZE,
            read_timeout: None,
            write_timeout: None,
        }
    }
}

/// What a framing socket needs from its byte channel.
///
/// [`TcpTransport`] is the production implementation; tests drive the
/// protocol code through a scripted in-memory one.
pub trait AdbTransport {
    /// Drop the current connection and dial the stored endpoint again.
    fn reconnect(&mut self) -> AdbResult<()>;

    /// Write once, returning the count the OS accepted.
    fn send(&mut self, buf: &[u8]) -> AdbResult<usize>;

    /// Read once. 0 means the peer closed the connection in an orderly way.
    fn receive(&mut self, buf: &mut [u8]) -> AdbResult<usize>;

    /// Shut the channel down; later calls fail fast.
    fn close(&mut self);

    fn is_connected(&self) -> bool;
}

/// A stream socket to the daemon.
pub struct TcpTransport {
    addr: HostAddr,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    stream: Option<TcpStream>,
}

impl TcpTransport {
    pub fn connect(addr: HostAddr, options: &SocketOptions) -> AdbResult<Self> {
        let stream = Self::dial(&addr, options.read_timeout, options.write_timeout)?;
        Ok(Self {
            addr,
            read_timeout: options.read_timeout,
            write_timeout: options.write_timeout,
            stream: Some(stream),
        })
    }

    fn dial(
        addr: &HostAddr,
        read_timeout: Option<Duration>,
        write_timeout: Option<Duration>,
    ) -> AdbResult<TcpStream> {
        trace!("connecting to {addr}...");
        let resolved = (addr.host.as_str(), addr.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("could not resolve {addr}"),
                )
            })?;
        let stream = TcpStream::connect(resolved)?;
        stream.set_read_timeout(read_timeout)?;
        stream.set_write_timeout(write_timeout)?;
        trace!("connected");
        Ok(stream)
    }

    fn stream(&mut self) -> AdbResult<&mut TcpStream> {
        self.stream.as_mut().ok_or_else(|| {
            AdbError::Io(io::Error::new(
                io::ErrorKind::NotConnected,
                "transport is closed",
            ))
        })
    }
}

impl AdbTransport for TcpTransport {
    fn reconnect(&mut self) -> AdbResult<()> {
        self.close();
        self.stream = Some(Self::dial(&self.addr, self.read_timeout, self.write_timeout)?);
        Ok(())
    }

    fn send(&mut self, buf: &[u8]) -> AdbResult<usize> {
        Ok(self.stream()?.write(buf)?)
    }

    fn receive(&mut self, buf: &mut [u8]) -> AdbResult<usize> {
        Ok(self.stream()?.read(buf)?)
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}
