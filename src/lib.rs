//! Client for the ADB (Android Debug Bridge) host-server protocol
//!
//! Talks to a running `adb` daemon over TCP: hex-length-prefixed host
//! requests, the `sync:` file-transfer subprotocol, `shell:` streams, and
//! supervision of the local daemon binary. It is not the daemon itself and
//! never talks to devices directly.
use std::{
    collections::BTreeMap,
    fs::File,
    path::Path,
    time::SystemTime,
};

use tracing::debug;

use self::command::local_service;

pub mod command;
pub mod error;
pub mod host;
pub mod server;
pub mod shell;
pub mod socket;
pub mod sync;
pub mod transport;

// Re-export commonly used types
pub use error::{AdbError, AdbResult};
pub use host::{Host, HostAddr, connect_default};
pub use server::{AdbServer, AdbVersion};
pub use shell::{ShellProtocol, ShellStream};
pub use socket::{AdbResponse, AdbSocket};
pub use sync::{DirEntry, FileStat, SyncCommand, SyncConnection, TransferProgress};
pub use transport::{AdbTransport, SocketOptions, TcpTransport};

/// One row of `host:devices-l` output.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub serial: String,
    pub state: String,
    pub info: BTreeMap<String, String>,
}

impl TryFrom<&str> for DeviceInfo {
    type Error = AdbError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        // Turn "serial state key1:value1 key2:value2 ..." into a `DeviceInfo`.
        let mut pairs = value.split_whitespace();
        let (Some(serial), Some(state)) = (pairs.next(), pairs.next()) else {
            return Err(AdbError::DeviceInfoParseError(format!(
                "failed to parse device info from {}",
                value
            )));
        };
        let info: BTreeMap<String, String> = pairs
            .filter_map(|pair| {
                let mut kv = pair.split(':');
                if let (Some(k), Some(v), None) = (kv.next(), kv.next(), kv.next()) {
                    Some((k.to_owned(), v.to_owned()))
                } else {
                    None
                }
            })
            .collect();

        Ok(DeviceInfo {
            serial: serial.to_owned(),
            state: state.to_owned(),
            info,
        })
    }
}

/// Connect to a device using its serial number
///
/// Returns [`AdbError::DeviceNotFound`] if the daemon does not list it
pub fn connect(serial: impl AsRef<str>) -> AdbResult<Device> {
    let serial = serial.as_ref();
    let host = host::connect_default()?;

    let known = host.devices()?;
    if !known.iter().any(|device| device.serial == serial) {
        return Err(AdbError::DeviceNotFound(serial.to_string()));
    }
    Ok(Device::new(host, serial))
}

/// A device that can be used to execute ADB commands
pub struct Device {
    /// The ADB host connection used to access this device
    host: Host,

    /// ADB device serial number
    serial: String,
}

impl Device {
    pub fn new(host: Host, serial: impl Into<String>) -> Self {
        Self {
            host,
            serial: serial.into(),
        }
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Run a shell command and collect its output with Unix newlines.
    pub fn shell(&self, command: impl Into<String>) -> AdbResult<String> {
        self.host
            .execute_local_command(&self.serial, local_service::ShellCommand::new(command.into()))
    }

    /// Open a streaming shell on the device.
    pub fn shell_stream(&self, protocol: ShellProtocol, command: &str) -> AdbResult<ShellStream> {
        self.host
            .device_socket(&self.serial)?
            .into_shell(protocol, command)
    }

    fn sync(&self) -> AdbResult<SyncConnection> {
        self.host.device_socket(&self.serial)?.into_sync()
    }

    /// Upload a local file, reporting progress as chunks are accepted.
    pub fn push_file(
        &self,
        local: impl AsRef<Path>,
        remote: &str,
        mode: u32,
        progress: impl FnMut(TransferProgress),
    ) -> AdbResult<()> {
        let local = local.as_ref();
        let file = File::open(local)?;
        let metadata = file.metadata()?;
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|time| time.duration_since(SystemTime::UNIX_EPOCH).ok())
            .map(|elapsed| elapsed.as_secs() as u32)
            .unwrap_or(0);
        debug!("pushing {} to {remote}", local.display());

        let mut sync = self.sync()?;
        sync.push(file, metadata.len(), remote, mode, mtime, progress)?;
        sync.quit()
    }

    /// Download a remote file. Stats it first so progress carries a real
    /// total.
    pub fn pull_file(
        &self,
        remote: &str,
        local: impl AsRef<Path>,
        progress: impl FnMut(TransferProgress),
    ) -> AdbResult<u64> {
        let mut sync = self.sync()?;
        let total = sync.stat(remote)?.size as u64;
        let mut file = File::create(local.as_ref())?;
        let received = sync.pull(remote, &mut file, total, progress)?;
        sync.quit()?;
        Ok(received)
    }

    /// Mode, size and mtime of a remote path.
    pub fn stat(&self, remote: &str) -> AdbResult<FileStat> {
        let mut sync = self.sync()?;
        let stat = sync.stat(remote)?;
        sync.quit()?;
        Ok(stat)
    }

    /// List a remote directory.
    pub fn list(&self, remote: &str) -> AdbResult<Vec<DirEntry>> {
        let mut sync = self.sync()?;
        let entries = sync.list(remote)?;
        sync.quit()?;
        Ok(entries)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_device_info_from_long_listing() {
        let info = DeviceInfo::try_from(
            "emulator-5554          device product:sdk_gphone64 model:sdk_gphone64_x86_64 transport_id:1",
        )
        .unwrap();
        assert_eq!(info.serial, "emulator-5554");
        assert_eq!(info.state, "device");
        assert_eq!(info.info["product"], "sdk_gphone64");
        assert_eq!(info.info["transport_id"], "1");
    }

    #[test]
    fn test_device_info_keeps_non_device_states() {
        let info = DeviceInfo::try_from("0123456789ABCDEF\toffline").unwrap();
        assert_eq!(info.serial, "0123456789ABCDEF");
        assert_eq!(info.state, "offline");
        assert!(info.info.is_empty());
    }

    #[test]
    fn test_device_info_rejects_a_bare_serial() {
        assert!(matches!(
            DeviceInfo::try_from("emulator-5554"),
            Err(AdbError::DeviceInfoParseError(_))
        ));
    }
}
