//! Daemon endpoint addressing and the per-command host client.

use std::fmt;

use tracing::trace;

use crate::{
    DeviceInfo,
    command::{AdbCommand, host_service},
    error::AdbResult,
    server::AdbServer,
    socket::AdbSocket,
    transport::SocketOptions,
};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 5037;

/// A daemon endpoint: host name plus TCP port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostAddr {
    pub host: String,
    pub port: u16,
}

impl HostAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse `"host[:port]"`, splitting on the first colon. A suffix that
    /// is not a valid port falls back to `default_port`.
    pub fn parse(value: &str, default_port: u16) -> Self {
        match value.split_once(':') {
            Some((host, suffix)) => match suffix.parse::<u16>() {
                Ok(port) => Self::new(host, port),
                Err(_) => Self::new(host, default_port),
            },
            None => Self::new(value, default_port),
        }
    }
}

impl Default for HostAddr {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT)
    }
}

impl fmt::Display for HostAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Connect to the daemon at the default endpoint.
pub fn connect_default() -> AdbResult<Host> {
    Host::connect(HostAddr::default())
}

/// A handle on the daemon's host services.
///
/// Most host requests end with the daemon closing the connection, so the
/// handle opens a fresh framing socket per command instead of holding one.
pub struct Host {
    addr: HostAddr,
    options: SocketOptions,
}

impl Host {
    /// Verify `addr` is reachable and build a handle for it.
    pub fn connect(addr: HostAddr) -> AdbResult<Self> {
        Self::connect_with_options(addr, SocketOptions::default())
    }

    pub fn connect_with_options(addr: HostAddr, options: SocketOptions) -> AdbResult<Self> {
        let host = Self { addr, options };
        host.open_socket()?;
        Ok(host)
    }

    /// Start (or recover) the local daemon first, then connect.
    pub fn connect_with_server(addr: HostAddr, server: &AdbServer) -> AdbResult<Self> {
        server.ensure_running()?;
        Self::connect(addr)
    }

    pub fn addr(&self) -> &HostAddr {
        &self.addr
    }

    fn open_socket(&self) -> AdbResult<AdbSocket> {
        AdbSocket::connect_with_options(self.addr.clone(), self.options.clone())
    }

    /// The daemon's wire-protocol version (`host:version`).
    pub fn version(&self) -> AdbResult<u32> {
        self.execute_command(host_service::Version)
    }

    /// Ask the daemon to exit (`host:kill`).
    pub fn kill(&self) -> AdbResult<()> {
        self.execute_command(host_service::Kill)
    }

    /// Connected devices as `host:devices-l` reports them.
    pub fn devices(&self) -> AdbResult<Vec<DeviceInfo>> {
        self.execute_command(host_service::Devices)
    }

    /// Run one host-addressed command on a fresh socket.
    pub fn execute_command<C: AdbCommand>(&self, command: C) -> AdbResult<C::Output> {
        let mut socket = self.open_socket()?;
        socket.execute_command(command)
    }

    /// Bind a fresh socket to `serial`, then run a device-addressed command.
    pub fn execute_local_command<C: AdbCommand>(
        &self,
        serial: &str,
        command: C,
    ) -> AdbResult<C::Output> {
        trace!("executing on {serial}: {:?}", command.raw_command());
        let mut socket = self.open_socket()?;
        socket.set_device(Some(serial))?;
        socket.execute_command(command)
    }

    /// A framing socket bound to `serial`, for mode-switching work.
    pub fn device_socket(&self, serial: &str) -> AdbResult<AdbSocket> {
        let mut socket = self.open_socket()?;
        socket.set_device(Some(serial))?;
        Ok(socket)
    }
}
