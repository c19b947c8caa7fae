//! Requests addressed to the daemon itself (`host:` prefix).

use std::io;

use crate::{
    DeviceInfo,
    error::{AdbError, AdbResult},
    socket::AdbSocket,
    transport::AdbTransport,
};

use super::AdbCommand;

/// host:version
///
/// The daemon's internal wire-protocol version, a hex number.
pub struct Version;

impl AdbCommand for Version {
    type Output = u32;

    fn raw_command(&self) -> String {
        "host:version".to_string()
    }

    fn handle_response<T: AdbTransport>(&self, socket: &mut AdbSocket<T>) -> AdbResult<u32> {
        socket.check_response_status()?;
        let payload = socket.read_string()?.unwrap_or_default();
        Ok(u32::from_str_radix(payload.trim(), 16)?)
    }
}

/// host:kill
///
/// The daemon often just drops the connection instead of acknowledging,
/// so an EOF in place of the status token still counts as success.
pub struct Kill;

impl AdbCommand for Kill {
    type Output = ();

    fn raw_command(&self) -> String {
        "host:kill".to_string()
    }

    fn handle_response<T: AdbTransport>(&self, socket: &mut AdbSocket<T>) -> AdbResult<()> {
        match socket.read_response() {
            Ok(response) => response.into_result(),
            Err(AdbError::Io(err)) if err.kind() == io::ErrorKind::UnexpectedEof => Ok(()),
            Err(err) => Err(err),
        }
    }
}

/// host:devices-l
pub struct Devices;

impl AdbCommand for Devices {
    type Output = Vec<DeviceInfo>;

    fn raw_command(&self) -> String {
        "host:devices-l".to_string()
    }

    fn handle_response<T: AdbTransport>(
        &self,
        socket: &mut AdbSocket<T>,
    ) -> AdbResult<Vec<DeviceInfo>> {
        socket.check_response_status()?;
        let payload = socket.read_string()?.unwrap_or_default();
        payload
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(DeviceInfo::try_from)
            .collect()
    }
}

/// host:transport:serial
///
/// Binds the connection to one device. A FAIL whose diagnostic is
/// `device not found` (any case) is refined into the dedicated error.
pub struct Transport {
    serial: String,
}

impl Transport {
    pub fn new(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
        }
    }
}

impl AdbCommand for Transport {
    type Output = ();

    fn raw_command(&self) -> String {
        format!("host:transport:{}", self.serial)
    }

    fn handle_response<T: AdbTransport>(&self, socket: &mut AdbSocket<T>) -> AdbResult<()> {
        let response = socket.read_response()?;
        if !response.okay && response.message.eq_ignore_ascii_case("device not found") {
            return Err(AdbError::DeviceNotFound(self.serial.clone()));
        }
        response.into_result()
    }
}

/// host:transport-any
///
/// Binds to the sole connected device.
pub struct TransportAny;

impl AdbCommand for TransportAny {
    type Output = ();

    fn raw_command(&self) -> String {
        "host:transport-any".to_string()
    }

    fn handle_response<T: AdbTransport>(&self, socket: &mut AdbSocket<T>) -> AdbResult<()> {
        socket.check_response_status()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::socket::AdbSocket;
    use crate::transport::{SocketOptions, scripted::ScriptedTransport};

    fn socket(reply: &[u8]) -> AdbSocket<ScriptedTransport> {
        AdbSocket::from_transport(
            ScriptedTransport::replying(reply.to_vec()),
            SocketOptions::default(),
        )
    }

    #[test]
    fn test_raw_commands() {
        assert_eq!(Version.raw_command(), "host:version");
        assert_eq!(Kill.raw_command(), "host:kill");
        assert_eq!(Devices.raw_command(), "host:devices-l");
        assert_eq!(
            Transport::new("SER123").raw_command(),
            "host:transport:SER123"
        );
        assert_eq!(TransportAny.raw_command(), "host:transport-any");
    }

    #[test]
    fn test_version_parses_the_hex_payload() {
        let mut socket = socket(b"OKAY00040029");
        let version = Version.handle_response(&mut socket).unwrap();
        assert_eq!(version, 41);
    }

    #[test]
    fn test_kill_accepts_an_immediate_close() {
        let mut socket = socket(b"");
        Kill.handle_response(&mut socket).unwrap();
    }

    #[test]
    fn test_kill_surfaces_a_fail() {
        let mut socket = socket(b"FAIL0004nope");
        assert!(matches!(
            Kill.handle_response(&mut socket),
            Err(AdbError::ResponseError(msg)) if msg == "nope"
        ));
    }

    #[test]
    fn test_devices_parses_each_line() {
        let listing = "emulator-5554          device product:sdk model:Pixel_6\n\
                       0123456789ABCDEF       unauthorized\n";
        let reply = format!("OKAY{:04x}{listing}", listing.len());
        let mut socket = socket(reply.as_bytes());
        let devices = Devices.handle_response(&mut socket).unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].serial, "emulator-5554");
        assert_eq!(devices[0].state, "device");
        assert_eq!(devices[0].info["model"], "Pixel_6");
        assert_eq!(devices[1].state, "unauthorized");
    }

    #[test]
    fn test_devices_with_no_payload() {
        let mut socket = socket(b"OKAY");
        assert!(Devices.handle_response(&mut socket).unwrap().is_empty());
    }
}
