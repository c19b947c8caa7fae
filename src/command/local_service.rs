//! Requests that run on the bound device transport.

use crate::{
    error::AdbResult,
    shell::normalize_crlf,
    socket::AdbSocket,
    transport::AdbTransport,
};

use super::AdbCommand;

/// shell:command
///
/// command is something like "cmd arg1 arg2 ...". The full output is
/// collected until the daemon closes the stream, with CRLF normalized
/// away.
pub struct ShellCommand {
    command: String,
}

impl ShellCommand {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl AdbCommand for ShellCommand {
    type Output = String;

    fn raw_command(&self) -> String {
        format!("shell:{}", self.command)
    }

    fn handle_response<T: AdbTransport>(&self, socket: &mut AdbSocket<T>) -> AdbResult<String> {
        socket.check_response_status()?;
        let bytes = normalize_crlf(&socket.read_to_end()?);
        Ok(std::str::from_utf8(&bytes)?.to_string())
    }
}
