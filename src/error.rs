use thiserror::Error;

use crate::server::AdbVersion;

/// Unified ADB error type
#[derive(Error, Debug)]
pub enum AdbError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Device not found
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// The daemon answered FAIL with this diagnostic
    #[error("ADB response error: {0}")]
    ResponseError(String),

    /// Unexpected tag, bad length or an otherwise desynchronized stream
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// UTF-8 decode error
    #[error("UTF-8 decode error: {0}")]
    Utf8Error(#[from] std::str::Utf8Error),

    /// Hex parse error
    #[error("Hex parse error: {0}")]
    HexParseError(#[from] std::num::ParseIntError),

    /// Device info parse error
    #[error("Failed to parse device info: {0}")]
    DeviceInfoParseError(String),

    /// The path given for the local adb binary is not usable
    #[error("Not a usable adb binary: {0}")]
    InvalidBinary(String),

    /// `adb version` printed nothing that looks like a version
    #[error("Could not parse a version from `adb version` output")]
    VersionUnknown,

    /// The local daemon is older than the minimum this client speaks to
    #[error("adb version {found} is older than the required {required}")]
    VersionTooOld {
        found: AdbVersion,
        required: AdbVersion,
    },

    /// A supervisor process invocation exited non-zero
    #[error("`{command}` exited with code {code}")]
    ProcessFailed { code: i32, command: String },

    /// Timeout error
    #[error("Operation timed out")]
    Timeout,

    /// Unsupported platform
    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),
}

/// ADB result type alias
pub type AdbResult<T> = Result<T, AdbError>;
