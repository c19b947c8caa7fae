//! Supervision of the local `adb` daemon: locating the binary, gating on
//! its version, starting the server and recovering a wedged one.

use std::{
    fmt,
    io::{BufRead, BufReader, Read},
    path::PathBuf,
    process::{Command, Stdio},
    thread,
    time::{Duration, Instant},
};

use regex::Regex;
use tracing::{debug, warn};

use crate::error::{AdbError, AdbResult};

/// Oldest daemon this client will talk to.
pub const REQUIRED_ADB_VERSION: AdbVersion = AdbVersion::new(1, 0, 20);

/// Hard ceiling on any supervisor process invocation.
const PROCESS_TIMEOUT: Duration = Duration::from_secs(5);

/// Allowed binary file name per OS family. Adding a platform is a row
/// here, not new code.
const PLATFORM_BINARIES: &[(&str, &str)] = &[
    ("windows", "adb.exe"),
    ("linux", "adb"),
    ("macos", "adb"),
    ("freebsd", "adb"),
];

/// The `major.minor.micro` triple `adb version` prints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct AdbVersion {
    pub major: u32,
    pub minor: u32,
    pub micro: u32,
}

impl AdbVersion {
    pub const fn new(major: u32, minor: u32, micro: u32) -> Self {
        Self {
            major,
            minor,
            micro,
        }
    }
}

impl fmt::Display for AdbVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.micro)
    }
}

/// Supervisor for the local `adb` binary.
pub struct AdbServer {
    path: PathBuf,
    binary_name: String,
    required_version: AdbVersion,
}

impl AdbServer {
    /// Validate `path` and build a supervisor for it.
    pub fn new(path: impl Into<PathBuf>) -> AdbResult<Self> {
        Self::with_options(path, false)
    }

    /// `allow_any_name` skips the platform file-name rule; the existence
    /// and executability checks still apply.
    pub fn with_options(path: impl Into<PathBuf>, allow_any_name: bool) -> AdbResult<Self> {
        let path = path.into();
        let os = std::env::consts::OS;
        let required_name = required_binary_name(os)
            .ok_or_else(|| AdbError::UnsupportedPlatform(os.to_string()))?;

        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
            .to_string();
        if !allow_any_name && !file_name.eq_ignore_ascii_case(required_name) {
            return Err(AdbError::InvalidBinary(format!(
                "expected a binary named {required_name}, got {}",
                path.display()
            )));
        }
        if !path.is_file() {
            return Err(AdbError::InvalidBinary(format!(
                "no such file: {}",
                path.display()
            )));
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path)?.permissions().mode();
            if mode & 0o111 == 0 {
                return Err(AdbError::InvalidBinary(format!(
                    "{} is not executable",
                    path.display()
                )));
            }
        }

        Ok(Self {
            path,
            binary_name: file_name,
            required_version: REQUIRED_ADB_VERSION,
        })
    }

    /// Change the minimum version this supervisor enforces.
    pub fn with_required_version(mut self, required: AdbVersion) -> Self {
        self.required_version = required;
        self
    }

    /// `adb version`, parsed and gated against the required minimum.
    pub fn get_version(&self) -> AdbResult<AdbVersion> {
        let output = self.run(&["version"])?;
        let version = parse_version(&output.stdout).ok_or(AdbError::VersionUnknown)?;
        if version < self.required_version {
            return Err(AdbError::VersionTooOld {
                found: version,
                required: self.required_version,
            });
        }
        Ok(version)
    }

    /// `adb start-server`, with one kill-strays-and-retry recovery pass.
    pub fn start_server(&self) -> AdbResult<()> {
        match self.run(&["start-server"]) {
            Ok(_) => Ok(()),
            Err(err @ (AdbError::ProcessFailed { .. } | AdbError::Timeout)) => {
                warn!("start-server failed ({err}); killing stray daemons and retrying");
                self.kill_stray_daemons();
                self.run(&["start-server"]).map(|_| ())
            }
            Err(err) => Err(err),
        }
    }

    /// Start (or recover) the daemon, then gate on its version. The entry
    /// point for callers that opt into auto-start before socket work.
    pub fn ensure_running(&self) -> AdbResult<AdbVersion> {
        self.start_server()?;
        self.get_version()
    }

    /// Terminate every local process carrying the daemon's binary name.
    /// "No such process" and "cannot terminate" both land in the ignored
    /// outcomes; the retry decides whether recovery worked.
    fn kill_stray_daemons(&self) {
        let name = &self.binary_name;
        debug!("terminating stray {name} processes");
        let status = if cfg!(windows) {
            Command::new("taskkill")
                .args(["/F", "/IM", name, "/T"])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
        } else {
            Command::new("pkill")
                .args(["-x", name])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
        };
        if let Err(err) = status {
            warn!("could not run the process kill tool: {err}");
        }
    }

    fn run(&self, args: &[&str]) -> AdbResult<ProcessOutput> {
        let command_line = format!("{} {}", self.path.display(), args.join(" "));
        debug!("running `{command_line}`");
        let mut child = Command::new(&self.path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // drain the pipes off-thread so a chatty child cannot block on them
        let stdout_thread = spawn_line_reader(child.stdout.take());
        let stderr_thread = spawn_line_reader(child.stderr.take());

        let deadline = Instant::now() + PROCESS_TIMEOUT;
        let code = loop {
            match child.try_wait()? {
                Some(status) => break status.code().unwrap_or(-1),
                None if Instant::now() >= deadline => {
                    warn!("`{command_line}` exceeded {PROCESS_TIMEOUT:?}, killing it");
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(AdbError::Timeout);
                }
                None => thread::sleep(Duration::from_millis(20)),
            }
        };

        let stdout = stdout_thread.join().unwrap_or_default();
        let stderr = stderr_thread.join().unwrap_or_default();
        if code != 0 {
            return Err(AdbError::ProcessFailed {
                code,
                command: command_line,
            });
        }
        Ok(ProcessOutput { stdout, stderr })
    }
}

/// Captured output of one supervisor invocation, line by line.
#[derive(Debug, Default)]
pub(crate) struct ProcessOutput {
    pub stdout: Vec<String>,
    #[allow(dead_code)]
    pub stderr: Vec<String>,
}

fn spawn_line_reader(pipe: Option<impl Read + Send + 'static>) -> thread::JoinHandle<Vec<String>> {
    thread::spawn(move || match pipe {
        Some(pipe) => BufReader::new(pipe)
            .lines()
            .map_while(Result::ok)
            .collect(),
        None => Vec::new(),
    })
}

fn required_binary_name(os: &str) -> Option<&'static str> {
    PLATFORM_BINARIES
        .iter()
        .find(|(family, _)| *family == os)
        .map(|&(_, name)| name)
}

/// First version triple found at the end of a (trimmed) stdout line.
fn parse_version(lines: &[String]) -> Option<AdbVersion> {
    let pattern = Regex::new(r"(\d+)\.(\d+)\.(\d+)$").expect("version pattern");
    for line in lines {
        if let Some(captures) = pattern.captures(line.trim_end()) {
            let part = |i: usize| captures[i].parse::<u32>().ok();
            if let (Some(major), Some(minor), Some(micro)) = (part(1), part(2), part(3)) {
                return Some(AdbVersion::new(major, minor, micro));
            }
        }
    }
    None
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_version_from_typical_output() {
        let lines = vec![
            "Android Debug Bridge version 1.0.41".to_string(),
            "Version 34.0.5-debian".to_string(),
            "Installed as /usr/lib/android-sdk/platform-tools/adb".to_string(),
        ];
        assert_eq!(parse_version(&lines), Some(AdbVersion::new(1, 0, 41)));
    }

    #[test]
    fn test_parse_version_tolerates_trailing_whitespace_and_crlf() {
        let lines = vec!["Android Debug Bridge version 1.0.41   ".to_string()];
        assert_eq!(parse_version(&lines), Some(AdbVersion::new(1, 0, 41)));

        // BufReader::lines leaves the \r of a Windows line ending behind
        let lines = vec!["Android Debug Bridge version 1.0.41\r".to_string()];
        assert_eq!(parse_version(&lines), Some(AdbVersion::new(1, 0, 41)));
    }

    #[test]
    fn test_parse_version_without_a_triple() {
        let lines = vec!["no versions here".to_string(), "1.2".to_string()];
        assert_eq!(parse_version(&lines), None);
        assert_eq!(parse_version(&[]), None);
    }

    #[test]
    fn test_version_ordering_is_component_wise() {
        let old = AdbVersion::new(1, 0, 20);
        let new = AdbVersion::new(1, 0, 41);
        assert!(old < new);
        assert!(AdbVersion::new(1, 0, 41) < AdbVersion::new(1, 1, 0));
        assert!(AdbVersion::new(1, 9, 9) < AdbVersion::new(2, 0, 0));
        assert_eq!(AdbVersion::new(1, 0, 41), AdbVersion::new(1, 0, 41));
    }

    #[test]
    fn test_display() {
        assert_eq!(AdbVersion::new(1, 0, 41).to_string(), "1.0.41");
    }

    #[test]
    fn test_required_binary_name_table() {
        assert_eq!(required_binary_name("windows"), Some("adb.exe"));
        assert_eq!(required_binary_name("linux"), Some("adb"));
        assert_eq!(required_binary_name("macos"), Some("adb"));
        assert_eq!(required_binary_name("haiku"), None);
    }

    #[cfg(unix)]
    mod unix {
        use std::fs;
        use std::os::unix::fs::PermissionsExt;
        use std::path::Path;

        use super::super::*;

        fn write_fake_adb(dir: &Path, name: &str, body: &str) -> PathBuf {
            let path = dir.join(name);
            fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        #[test]
        fn test_rejects_wrong_file_name() {
            let dir = tempfile::tempdir().unwrap();
            let path = write_fake_adb(dir.path(), "notadb", "exit 0");
            assert!(matches!(
                AdbServer::new(&path),
                Err(AdbError::InvalidBinary(_))
            ));
            // the override skips the name rule only
            assert!(AdbServer::with_options(&path, true).is_ok());
        }

        #[test]
        fn test_rejects_missing_file() {
            let dir = tempfile::tempdir().unwrap();
            assert!(matches!(
                AdbServer::new(dir.path().join("adb")),
                Err(AdbError::InvalidBinary(_))
            ));
        }

        #[test]
        fn test_rejects_non_executable_file() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("adb");
            fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();
            assert!(matches!(
                AdbServer::new(&path),
                Err(AdbError::InvalidBinary(_))
            ));
        }

        #[test]
        fn test_get_version_runs_the_binary() {
            let dir = tempfile::tempdir().unwrap();
            let path = write_fake_adb(
                dir.path(),
                "adb",
                "echo 'Android Debug Bridge version 1.0.41'",
            );
            let server = AdbServer::new(&path).unwrap();
            assert_eq!(server.get_version().unwrap(), AdbVersion::new(1, 0, 41));
        }

        #[test]
        fn test_get_version_below_minimum_is_rejected() {
            let dir = tempfile::tempdir().unwrap();
            let path = write_fake_adb(
                dir.path(),
                "adb",
                "echo 'Android Debug Bridge version 1.0.19'",
            );
            let server = AdbServer::new(&path).unwrap();
            assert!(matches!(
                server.get_version(),
                Err(AdbError::VersionTooOld { found, required })
                    if found == AdbVersion::new(1, 0, 19) && required == REQUIRED_ADB_VERSION
            ));
        }

        #[test]
        fn test_get_version_accepts_exactly_the_minimum() {
            let dir = tempfile::tempdir().unwrap();
            let path = write_fake_adb(
                dir.path(),
                "adb",
                "echo 'Android Debug Bridge version 1.0.20'",
            );
            let server = AdbServer::new(&path).unwrap();
            assert_eq!(server.get_version().unwrap(), AdbVersion::new(1, 0, 20));
        }

        #[test]
        fn test_get_version_with_unparsable_output() {
            let dir = tempfile::tempdir().unwrap();
            let path = write_fake_adb(dir.path(), "adb", "echo 'not a version'");
            let server = AdbServer::new(&path).unwrap();
            assert!(matches!(
                server.get_version(),
                Err(AdbError::VersionUnknown)
            ));
        }

        #[test]
        fn test_wedged_daemon_recovery() {
            // first start-server exits 1; after the (no-op) kill pass the
            // retry succeeds, and the version gate passes
            let dir = tempfile::tempdir().unwrap();
            let body = r#"
if [ "$1" = "version" ]; then
    echo 'Android Debug Bridge version 1.0.41'
    exit 0
fi
marker="$(dirname "$0")/started-once"
if [ ! -f "$marker" ]; then
    touch "$marker"
    exit 1
fi
exit 0"#;
            // an uncommon name keeps the stray-process kill away from any
            // real adb on this machine
            let path = write_fake_adb(dir.path(), "adb-recovery-fake", body);
            let server = AdbServer::with_options(&path, true).unwrap();
            assert_eq!(server.ensure_running().unwrap(), AdbVersion::new(1, 0, 41));
            assert!(dir.path().join("started-once").exists());
        }

        #[test]
        fn test_nonzero_exit_is_process_failed() {
            let dir = tempfile::tempdir().unwrap();
            let path = write_fake_adb(dir.path(), "adb", "exit 3");
            let server = AdbServer::new(&path).unwrap();
            assert!(matches!(
                server.get_version(),
                Err(AdbError::ProcessFailed { code: 3, .. })
            ));
        }
    }
}
