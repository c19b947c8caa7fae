//! The sync subprotocol: binary-framed file transfer on a socket that has
//! completed the `sync:` handshake.
//!
//! Every frame is a four-byte ASCII tag followed by a little-endian `u32`.
//! For most tags that `u32` is a payload length; after `DONE` on the push
//! path it carries the file's mtime instead. The daemon never returns to
//! the host protocol on the same connection, so leaving sync mode closes
//! the socket.

use std::io::{Read, Write};

use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, error, trace};

use crate::{
    error::{AdbError, AdbResult},
    socket::AdbSocket,
    transport::{AdbTransport, TcpTransport},
};

/// Largest payload the daemon accepts in a single `DATA` frame.
pub const MAX_DATA_CHUNK: usize = 64 * 1024;

/// Four-byte command tags of the sync wire.
///
/// Only the subset this codec drives needs to round-trip; everything else
/// read off the wire is preserved as [`SyncCommand::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncCommand {
    Send,
    SendV2,
    Recv,
    RecvV2,
    Stat,
    StatV2,
    List,
    ListV2,
    Dent,
    DentV2,
    Data,
    Done,
    Okay,
    Fail,
    Quit,
    Unknown([u8; 4]),
}

impl SyncCommand {
    pub fn tag(self) -> [u8; 4] {
        match self {
            Self::Send => *b"SEND",
            Self::SendV2 => *b"SND2",
            Self::Recv => *b"RECV",
            Self::RecvV2 => *b"RCV2",
            Self::Stat => *b"STAT",
            Self::StatV2 => *b"STA2",
            Self::List => *b"LIST",
            Self::ListV2 => *b"LIS2",
            Self::Dent => *b"DENT",
            Self::DentV2 => *b"DNT2",
            Self::Data => *b"DATA",
            Self::Done => *b"DONE",
            Self::Okay => *b"OKAY",
            Self::Fail => *b"FAIL",
            Self::Quit => *b"QUIT",
            Self::Unknown(tag) => tag,
        }
    }

    pub fn from_tag(tag: [u8; 4]) -> Self {
        match &tag {
            b"SEND" => Self::Send,
            b"SND2" => Self::SendV2,
            b"RECV" => Self::Recv,
            b"RCV2" => Self::RecvV2,
            b"STAT" => Self::Stat,
            b"STA2" => Self::StatV2,
            b"LIST" => Self::List,
            b"LIS2" => Self::ListV2,
            b"DENT" => Self::Dent,
            b"DNT2" => Self::DentV2,
            b"DATA" => Self::Data,
            b"DONE" => Self::Done,
            b"OKAY" => Self::Okay,
            b"FAIL" => Self::Fail,
            b"QUIT" => Self::Quit,
            _ => Self::Unknown(tag),
        }
    }
}

/// Mode, size and mtime of a remote path as `STAT` reports them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub mode: u32,
    pub size: u32,
    pub mtime: u32,
}

/// One `DENT` row of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub mode: u32,
    pub size: u32,
    pub mtime: u32,
    pub name: String,
}

/// Bytes moved so far against the expected total (0 when unknown).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub received: u64,
    pub total: u64,
}

impl TransferProgress {
    pub fn percent(self) -> u32 {
        if self.total > 0 {
            (self.received * 100 / self.total) as u32
        } else {
            0
        }
    }
}

/// A framing socket switched into sync mode.
pub struct SyncConnection<T: AdbTransport = TcpTransport> {
    socket: AdbSocket<T>,
}

impl<T: AdbTransport> SyncConnection<T> {
    pub(crate) fn new(socket: AdbSocket<T>) -> Self {
        Self { socket }
    }

    fn send_frame(&mut self, command: SyncCommand, payload: &[u8]) -> AdbResult<()> {
        let mut header = [0u8; 8];
        header[..4].copy_from_slice(&command.tag());
        LittleEndian::write_u32(&mut header[4..], payload.len() as u32);
        self.socket.send(&header)?;
        if !payload.is_empty() {
            self.socket.send(payload)?;
        }
        Ok(())
    }

    /// Tag plus a path payload, e.g. `RECV /sdcard/f`.
    fn send_sync_request(&mut self, command: SyncCommand, path: &str) -> AdbResult<()> {
        self.send_frame(command, path.as_bytes())
    }

    /// Tag plus `<path>,<mode>`. The mode is ASCII decimal on the wire.
    fn send_sync_request_with_mode(
        &mut self,
        command: SyncCommand,
        path: &str,
        mode: u32,
    ) -> AdbResult<()> {
        let payload = format!("{path},{mode}");
        self.send_frame(command, payload.as_bytes())
    }

    /// The common frame prelude: tag plus one little-endian `u32`. What
    /// the `u32` means depends on the tag.
    fn read_frame_header(&mut self) -> AdbResult<(SyncCommand, u32)> {
        let mut header = [0u8; 8];
        self.socket.read_exact(&mut header)?;
        let command = SyncCommand::from_tag([header[0], header[1], header[2], header[3]]);
        let arg = LittleEndian::read_u32(&header[4..]);
        trace!("sync frame: {command:?} {arg}");
        Ok((command, arg))
    }

    fn read_payload(&mut self, len: usize) -> AdbResult<Vec<u8>> {
        let mut payload = vec![0u8; len];
        self.socket.read_exact(&mut payload)?;
        Ok(payload)
    }

    fn fail<R>(&mut self, len: u32) -> AdbResult<R> {
        let payload = self.read_payload(len as usize)?;
        let message = String::from_utf8_lossy(&payload).into_owned();
        error!("sync FAIL: {message}");
        self.socket.close();
        Err(AdbError::ResponseError(message))
    }

    fn unexpected<R>(&mut self, command: SyncCommand) -> AdbResult<R> {
        let tag = String::from_utf8_lossy(&command.tag()).into_owned();
        self.socket.close();
        Err(AdbError::Protocol(format!("unexpected sync command {tag:?}")))
    }

    /// Upload `len` bytes from `content` to `remote`.
    ///
    /// `mode` is the POSIX file mode the daemon should create the file
    /// with and `mtime` its modification time in seconds since the epoch.
    /// `progress` fires after every accepted chunk with the running count
    /// against `len`.
    pub fn push(
        &mut self,
        mut content: impl Read,
        len: u64,
        remote: &str,
        mode: u32,
        mtime: u32,
        mut progress: impl FnMut(TransferProgress),
    ) -> AdbResult<()> {
        debug!("pushing {len} bytes to {remote:?} (mode {mode:o})");
        self.send_sync_request_with_mode(SyncCommand::Send, remote, mode)?;

        let mut buf = vec![0u8; MAX_DATA_CHUNK];
        let mut sent: u64 = 0;
        loop {
            let n = fill_chunk(&mut content, &mut buf)?;
            if n == 0 {
                break;
            }
            self.send_frame(SyncCommand::Data, &buf[..n])?;
            sent += n as u64;
            progress(TransferProgress {
                received: sent,
                total: len,
            });
        }

        // DONE's trailing u32 is the mtime, not a length
        let mut done = [0u8; 8];
        done[..4].copy_from_slice(&SyncCommand::Done.tag());
        LittleEndian::write_u32(&mut done[4..], mtime);
        self.socket.send(&done)?;

        match self.read_frame_header()? {
            (SyncCommand::Okay, len) => {
                if len > 0 {
                    self.read_payload(len as usize)?;
                }
                debug!("push of {remote:?} accepted");
                Ok(())
            }
            (SyncCommand::Fail, len) => self.fail(len),
            (other, _) => self.unexpected(other),
        }
    }

    /// Download `remote` into `dest`, returning the byte count.
    ///
    /// The daemon does not announce the size up front, so `expected_len`
    /// is what `progress` reports as the total; pass the `STAT` size for
    /// meaningful percentages, or 0 when unknown.
    pub fn pull(
        &mut self,
        remote: &str,
        dest: &mut impl Write,
        expected_len: u64,
        mut progress: impl FnMut(TransferProgress),
    ) -> AdbResult<u64> {
        debug!("pulling {remote:?}");
        self.send_sync_request(SyncCommand::Recv, remote)?;

        let mut received: u64 = 0;
        loop {
            match self.read_frame_header()? {
                (SyncCommand::Data, len) => {
                    let payload = self.read_payload(len as usize)?;
                    dest.write_all(&payload)?;
                    received += len as u64;
                    progress(TransferProgress {
                        received,
                        total: expected_len,
                    });
                }
                (SyncCommand::Done, _) => break,
                (SyncCommand::Fail, len) => return self.fail(len),
                (other, _) => return self.unexpected(other),
            }
        }
        debug!("pulled {received} bytes from {remote:?}");
        Ok(received)
    }

    /// `STAT` — mode, size and mtime of a remote path.
    pub fn stat(&mut self, path: &str) -> AdbResult<FileStat> {
        self.send_sync_request(SyncCommand::Stat, path)?;
        match self.read_frame_header()? {
            (SyncCommand::Stat, mode) => {
                let mut rest = [0u8; 8];
                self.socket.read_exact(&mut rest)?;
                Ok(FileStat {
                    mode,
                    size: LittleEndian::read_u32(&rest[..4]),
                    mtime: LittleEndian::read_u32(&rest[4..]),
                })
            }
            (SyncCommand::Fail, len) => self.fail(len),
            (other, _) => self.unexpected(other),
        }
    }

    /// `LIST` — directory entries until `DONE`.
    pub fn list(&mut self, path: &str) -> AdbResult<Vec<DirEntry>> {
        self.send_sync_request(SyncCommand::List, path)?;
        let mut entries = Vec::new();
        loop {
            match self.read_frame_header()? {
                (SyncCommand::Dent, mode) => {
                    let mut rest = [0u8; 12];
                    self.socket.read_exact(&mut rest)?;
                    let size = LittleEndian::read_u32(&rest[..4]);
                    let mtime = LittleEndian::read_u32(&rest[4..8]);
                    let name_len = LittleEndian::read_u32(&rest[8..]);
                    let name = self.read_payload(name_len as usize)?;
                    entries.push(DirEntry {
                        mode,
                        size,
                        mtime,
                        name: std::str::from_utf8(&name)?.to_string(),
                    });
                }
                (SyncCommand::Done, _) => break,
                (SyncCommand::Fail, len) => return self.fail(len),
                (other, _) => return self.unexpected(other),
            }
        }
        Ok(entries)
    }

    /// Leave sync mode. The daemon will not speak the host protocol again
    /// on this connection, so the socket is closed with it.
    pub fn quit(mut self) -> AdbResult<()> {
        self.send_frame(SyncCommand::Quit, b"")?;
        self.socket.close();
        Ok(())
    }

    pub fn close(&mut self) {
        self.socket.close();
    }

    #[cfg(test)]
    pub(crate) fn socket_ref(&self) -> &AdbSocket<T> {
        &self.socket
    }
}

fn fill_chunk(source: &mut impl Read, buf: &mut [u8]) -> AdbResult<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = source.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
