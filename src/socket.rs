//! The framing socket that carries the ADB host/server protocol.
//!
//! Requests are ASCII commands prefixed with four hex digits of length.
//! Responses open with a four-byte `OKAY`/`FAIL` token; a `FAIL` is followed
//! by a hex-length-prefixed diagnostic that must be drained before the
//! caller is told anything. The `sync:` and `shell:` handshakes switch the
//! connection into a different framing entirely, so those conversions
//! consume the socket.

use std::io;

use byteorder::{ByteOrder, LittleEndian};
use tracing::{error, trace};

use crate::{
    command::AdbCommand,
    error::{AdbError, AdbResult},
    host::HostAddr,
    shell::{ShellProtocol, ShellStream},
    sync::SyncConnection,
    transport::{AdbTransport, SocketOptions, TcpTransport},
};

/// Outcome of one host-protocol handshake.
///
/// `okay` is true iff the four status bytes were `OKAY`; `message` carries
/// the daemon's diagnostic on failure and is empty on success. An I/O
/// failure before a full status token arrives is reported through the
/// `Result` error channel instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdbResponse {
    pub okay: bool,
    pub message: String,
}

impl AdbResponse {
    pub fn ok() -> Self {
        Self {
            okay: true,
            message: String::new(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            okay: false,
            message: message.into(),
        }
    }

    pub fn into_result(self) -> AdbResult<()> {
        if self.okay {
            Ok(())
        } else {
            Err(AdbError::ResponseError(self.message))
        }
    }
}

/// One framed connection to the daemon.
///
/// Not safe for concurrent use; a single flow of control owns the socket
/// from connect to close, and request/response pairs are strictly
/// serialized on it. Any I/O or protocol error closes the transport before
/// the error is returned, so the next operation fails fast. A daemon-level
/// `FAIL` leaves the socket usable.
pub struct AdbSocket<T: AdbTransport = TcpTransport> {
    transport: T,
    options: SocketOptions,
}

impl AdbSocket<TcpTransport> {
    /// Connect to the daemon at `addr` with default tunables.
    pub fn connect(addr: HostAddr) -> AdbResult<Self> {
        Self::connect_with_options(addr, SocketOptions::default())
    }

    pub fn connect_with_options(addr: HostAddr, options: SocketOptions) -> AdbResult<Self> {
        let transport = TcpTransport::connect(addr, &options)?;
        Ok(Self { transport, options })
    }
}

impl<T: AdbTransport> AdbSocket<T> {
    pub fn from_transport(transport: T, options: SocketOptions) -> Self {
        Self { transport, options }
    }

    pub fn reconnect(&mut self) -> AdbResult<()> {
        self.transport.reconnect()
    }

    /// Close the underlying transport. Further operations fail fast.
    pub fn close(&mut self) {
        self.transport.close();
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    // Byte level

    /// One receive call, closing the socket on failure.
    pub(crate) fn recv_some(&mut self, buf: &mut [u8]) -> AdbResult<usize> {
        match self.transport.receive(buf) {
            Ok(n) => Ok(n),
            Err(err) => {
                self.transport.close();
                Err(err)
            }
        }
    }

    /// Read until `buf` is full or the peer closes; returns the count.
    pub fn read(&mut self, buf: &mut [u8]) -> AdbResult<usize> {
        let chunk_cap = self.options.receive_buffer_size.max(1);
        let mut read = 0;
        while read < buf.len() {
            let chunk = (buf.len() - read).min(chunk_cap);
            let n = self.recv_some(&mut buf[read..read + chunk])?;
            if n == 0 {
                break;
            }
            read += n;
        }
        Ok(read)
    }

    /// Read exactly `buf.len()` bytes; an early close is channel EOF.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> AdbResult<()> {
        if self.read(buf)? < buf.len() {
            return self.channel_eof();
        }
        Ok(())
    }

    /// Write the whole buffer. A short write means the channel is dead.
    pub fn send(&mut self, buf: &[u8]) -> AdbResult<()> {
        let chunk_cap = self.options.write_buffer_size.max(1);
        for slice in buf.chunks(chunk_cap) {
            let n = match self.transport.send(slice) {
                Ok(n) => n,
                Err(err) => {
                    self.transport.close();
                    return Err(err);
                }
            };
            if n != slice.len() {
                return self.channel_eof();
            }
        }
        Ok(())
    }

    fn channel_eof<R>(&mut self) -> AdbResult<R> {
        self.transport.close();
        Err(AdbError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "channel EOF",
        )))
    }

    fn dispose_err<R>(&mut self, err: AdbError) -> AdbResult<R> {
        self.transport.close();
        Err(err)
    }

    // Framing

    /// Issue a host-protocol request: four hex digits of length, then the
    /// command bytes.
    pub fn send_request(&mut self, command: &str) -> AdbResult<()> {
        trace!("sending request: {command:?}");
        if command.len() > 0xffff {
            return self.dispose_err(AdbError::Protocol(format!(
                "command too long for hex framing: {} bytes",
                command.len()
            )));
        }
        let framed = format!("{:04x}{}", command.len(), command);
        self.send(framed.as_bytes())
    }

    /// Read the four status bytes, plus the diagnostic payload on FAIL.
    pub fn read_response(&mut self) -> AdbResult<AdbResponse> {
        let mut status = [0u8; 4];
        self.read_exact(&mut status)?;
        match &status {
            b"OKAY" => {
                trace!("response status is OKAY");
                Ok(AdbResponse::ok())
            }
            b"FAIL" => {
                let message = self.read_string()?.unwrap_or_default();
                error!("response status is FAIL, reason: {message}");
                Ok(AdbResponse::fail(message))
            }
            other => {
                // The daemon leaves this undefined; report the token as-is.
                let token = String::from_utf8_lossy(other).into_owned();
                error!("unrecognized response status: {token:?}");
                Ok(AdbResponse::fail(token))
            }
        }
    }

    /// Ensure the next status token is OKAY, surfacing the FAIL reason
    /// otherwise.
    pub fn check_response_status(&mut self) -> AdbResult<()> {
        trace!("checking response_status...");
        self.read_response()?.into_result()
    }

    /// Hex-length-prefixed string. `None` when the daemon already closed
    /// the connection instead of sending a length.
    pub fn read_string(&mut self) -> AdbResult<Option<String>> {
        let mut len_buf = [0u8; 4];
        let got = self.read(&mut len_buf)?;
        if got == 0 {
            return Ok(None);
        }
        if got < len_buf.len() {
            return self.channel_eof();
        }
        let len = match std::str::from_utf8(&len_buf) {
            Ok(text) => match usize::from_str_radix(text, 16) {
                Ok(len) => len,
                Err(err) => return self.dispose_err(err.into()),
            },
            Err(err) => return self.dispose_err(err.into()),
        };
        let mut payload = vec![0u8; len];
        self.read_exact(&mut payload)?;
        Ok(Some(std::str::from_utf8(&payload)?.to_string()))
    }

    /// Length-prefixed string in sync framing: little-endian u32, then
    /// that many bytes of UTF-8.
    pub fn read_sync_string(&mut self) -> AdbResult<String> {
        let mut len_buf = [0u8; 4];
        self.read_exact(&mut len_buf)?;
        let len = LittleEndian::read_u32(&len_buf) as usize;
        let mut payload = vec![0u8; len];
        self.read_exact(&mut payload)?;
        Ok(std::str::from_utf8(&payload)?.to_string())
    }

    /// Drain the stream until the daemon closes it.
    pub fn read_to_end(&mut self) -> AdbResult<Vec<u8>> {
        let mut out = Vec::new();
        let mut buf = vec![0u8; self.options.receive_buffer_size.max(1)];
        loop {
            let n = self.recv_some(&mut buf)?;
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        Ok(out)
    }

    // Requests

    pub fn execute_command<C: AdbCommand>(&mut self, command: C) -> AdbResult<C::Output> {
        trace!("executing command: {:?}...", command.raw_command());
        self.send_request(&command.raw_command())?;
        command.handle_response(self)
    }

    /// Bind this connection to a device transport. A FAIL diagnostic of
    /// `device not found` (any case) becomes [`AdbError::DeviceNotFound`].
    pub fn set_device(&mut self, serial: Option<&str>) -> AdbResult<()> {
        match serial {
            Some(serial) => {
                self.execute_command(crate::command::host_service::Transport::new(serial))
            }
            None => Ok(()),
        }
    }

    // Mode switches

    /// `sync:` handshake. The socket now speaks the sync subprotocol only;
    /// tearing the connection down is the only way back.
    pub fn into_sync(mut self) -> AdbResult<SyncConnection<T>> {
        self.send_request("sync:")?;
        self.check_response_status()?;
        Ok(SyncConnection::new(self))
    }

    /// Shell-family handshake. The remaining bytes are an unframed stream.
    pub fn into_shell(mut self, protocol: ShellProtocol, command: &str) -> AdbResult<ShellStream<T>> {
        self.send_request(&format!("{}{}", protocol.prefix(), command))?;
        self.check_response_status()?;
        Ok(ShellStream::new(self))
    }

    #[cfg(test)]
    pub(crate) fn transport_ref(&self) -> &T {
        &self.transport
    }
}
