//! Line-oriented adapter over the post-handshake shell byte stream.

use std::io::{self, Read, Write};

use crate::{
    error::{AdbError, AdbResult},
    socket::AdbSocket,
    transport::{AdbTransport, TcpTransport},
};

/// Which request prefix opens the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellProtocol {
    /// `shell:` — interleaved stdout/stderr through a pty
    Shell,
    /// `shell,v2:` — the protocol with separated streams
    ShellV2,
    /// `exec:` — no pty, binary-safe
    Exec,
}

impl ShellProtocol {
    pub(crate) fn prefix(self) -> &'static str {
        match self {
            Self::Shell => "shell:",
            Self::ShellV2 => "shell,v2:",
            Self::Exec => "exec:",
        }
    }
}

/// The unframed byte stream a `shell:` handshake leaves behind.
///
/// Reads replace every `CR LF` with `LF`, so callers see Unix newlines
/// regardless of the device's pty settings; a lone `CR` passes through.
/// Writes go to the device untouched.
pub struct ShellStream<T: AdbTransport = TcpTransport> {
    socket: AdbSocket<T>,
    buffered: Vec<u8>,
    pos: usize,
    pending_cr: bool,
    eof: bool,
}

impl<T: AdbTransport> ShellStream<T> {
    pub(crate) fn new(socket: AdbSocket<T>) -> Self {
        Self {
            socket,
            buffered: Vec::new(),
            pos: 0,
            pending_cr: false,
            eof: false,
        }
    }

    /// Drain the stream to a string with newlines normalized.
    pub fn read_to_string(&mut self) -> AdbResult<String> {
        let mut out = String::new();
        Read::read_to_string(self, &mut out)?;
        Ok(out)
    }

    pub fn close(&mut self) {
        self.socket.close();
    }

    fn fill(&mut self) -> io::Result<()> {
        let mut raw = [0u8; 4096];
        let n = self
            .socket
            .recv_some(&mut raw)
            .map_err(into_io_error)?;
        if n == 0 {
            self.eof = true;
            // a CR held back at end of stream was not part of a CR LF
            if self.pending_cr {
                self.pending_cr = false;
                self.buffered.push(b'\r');
            }
            return Ok(());
        }
        for &byte in &raw[..n] {
            if self.pending_cr {
                self.pending_cr = false;
                if byte == b'\n' {
                    self.buffered.push(b'\n');
                    continue;
                }
                self.buffered.push(b'\r');
            }
            if byte == b'\r' {
                self.pending_cr = true;
            } else {
                self.buffered.push(byte);
            }
        }
        Ok(())
    }
}

impl<T: AdbTransport> Read for ShellStream<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.pos == self.buffered.len() {
            self.buffered.clear();
            self.pos = 0;
            while self.buffered.is_empty() && !self.eof {
                self.fill()?;
            }
        }
        let available = &self.buffered[self.pos..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.pos += n;
        Ok(n)
    }
}

impl<T: AdbTransport> Write for ShellStream<T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.socket.send(buf).map_err(into_io_error)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn into_io_error(err: AdbError) -> io::Error {
    match err {
        AdbError::Io(err) => err,
        other => io::Error::other(other.to_string()),
    }
}

/// Collapse `CR LF` pairs in an already-collected buffer.
pub(crate) fn normalize_crlf(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\r' && bytes.get(i + 1) == Some(&b'\n') {
            out.push(b'\n');
            i += 2;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::transport::{SocketOptions, scripted::ScriptedTransport};

    fn stream(transport: ScriptedTransport) -> ShellStream<ScriptedTransport> {
        ShellStream::new(AdbSocket::from_transport(
            transport,
            SocketOptions::default(),
        ))
    }

    #[test]
    fn test_prefixes() {
        assert_eq!(ShellProtocol::Shell.prefix(), "shell:");
        assert_eq!(ShellProtocol::ShellV2.prefix(), "shell,v2:");
        assert_eq!(ShellProtocol::Exec.prefix(), "exec:");
    }

    #[test]
    fn test_crlf_becomes_lf() {
        let mut stream = stream(ScriptedTransport::replying(b"a.txt\r\nb.txt\r\n".to_vec()));
        assert_eq!(stream.read_to_string().unwrap(), "a.txt\nb.txt\n");
    }

    #[test]
    fn test_lone_cr_passes_through() {
        let mut stream = stream(ScriptedTransport::replying(b"a\rb\n".to_vec()));
        assert_eq!(stream.read_to_string().unwrap(), "a\rb\n");
    }

    #[test]
    fn test_cr_split_across_chunks_still_collapses() {
        let transport = ScriptedTransport::replying(b"ab\r\ncd".to_vec()).with_max_read(3);
        let mut stream = stream(transport);
        assert_eq!(stream.read_to_string().unwrap(), "ab\ncd");
    }

    #[test]
    fn test_trailing_cr_at_eof_is_kept() {
        let mut stream = stream(ScriptedTransport::replying(b"ab\r".to_vec()));
        assert_eq!(stream.read_to_string().unwrap(), "ab\r");
    }

    #[test]
    fn test_write_is_pass_through() {
        let transport = ScriptedTransport::replying(b"".to_vec());
        let written = transport.written_handle();
        let mut stream = stream(transport);
        stream.write_all(b"input\r\n").unwrap();
        assert_eq!(*written.borrow(), b"input\r\n");
    }

    #[test]
    fn test_shell_mode_end_to_end() {
        // OKAY handshake, then the device's CRLF output
        let transport = ScriptedTransport::replying(b"OKAYa.txt\r\nb.txt\r\n".to_vec());
        let written = transport.written_handle();
        let socket = AdbSocket::from_transport(transport, SocketOptions::default());
        let mut stream = socket.into_shell(ShellProtocol::Shell, "ls").unwrap();
        assert_eq!(stream.read_to_string().unwrap(), "a.txt\nb.txt\n");
        assert_eq!(*written.borrow(), b"0008shell:ls");
    }

    #[test]
    fn test_normalize_crlf_buffer() {
        assert_eq!(normalize_crlf(b"a\r\nb\rc\n"), b"a\nb\rc\n");
        assert_eq!(normalize_crlf(b"\r\n\r\n"), b"\n\n");
        assert_eq!(normalize_crlf(b""), b"");
    }
}
