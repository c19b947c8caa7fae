use crate::{error::AdbResult, socket::AdbSocket, transport::AdbTransport};

pub mod host_service;
pub mod local_service;

pub trait AdbCommand {
    type Output;

    fn raw_command(&self) -> String;

    fn handle_response<T: AdbTransport>(&self, socket: &mut AdbSocket<T>)
    -> AdbResult<Self::Output>;
}
