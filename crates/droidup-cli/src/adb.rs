//! Device transport over the `adb` executable.

use droidup_core::device::{ByteOutput, Connector, DeviceError, DeviceTransport};
use droidup_core::io::{ChunkSource, ReadSource};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use std::time::Duration;
use wait_timeout::ChildExt;

/// Opens [`AdbTransport`]s to one device.
#[derive(Debug, Clone)]
pub struct AdbConnector {
    adb: PathBuf,
    serial: Option<String>,
}

impl AdbConnector {
    /// Find `adb` on `PATH`.
    pub fn locate() -> Result<Self, DeviceError> {
        let adb = which::which("adb")
            .map_err(|_| DeviceError::Command("adb not found in PATH".to_string()))?;
        Ok(Self::new(adb))
    }

    pub fn new(adb: impl Into<PathBuf>) -> Self {
        Self {
            adb: adb.into(),
            serial: std::env::var("ANDROID_SERIAL").ok(),
        }
    }
}

impl Connector for AdbConnector {
    type Transport = AdbTransport;

    fn connect(&mut self) -> Result<AdbTransport, DeviceError> {
        let transport = AdbTransport {
            adb: self.adb.clone(),
            serial: self.serial.clone(),
        };
        let output = transport.command().arg("get-state").output()?;
        classify_state(
            output.status.success(),
            &String::from_utf8_lossy(&output.stdout),
            &String::from_utf8_lossy(&output.stderr),
        )?;
        tracing::debug!("Connected to device via {}", self.adb.display());
        Ok(transport)
    }
}

/// Map `adb get-state` output to a transport error.
fn classify_state(success: bool, stdout: &str, stderr: &str) -> Result<(), DeviceError> {
    let state = stdout.trim();
    if success && state == "device" {
        return Ok(());
    }
    let message = if stderr.trim().is_empty() { state } else { stderr.trim() };
    Err(transport_loss(message).unwrap_or_else(|| DeviceError::Command(message.to_string())))
}

/// The transport error an `adb` diagnostic reports, if it reports one.
fn transport_loss(message: &str) -> Option<DeviceError> {
    let lower = message.to_ascii_lowercase();
    if lower.contains("unauthorized") {
        Some(DeviceError::Unauthorized)
    } else if lower.contains("no devices") || (lower.contains("device") && lower.contains("not found")) {
        Some(DeviceError::NotFound)
    } else if lower.contains("offline") || lower.contains("device busy") || lower.contains("connecting") {
        Some(DeviceError::Busy(message.trim().to_string()))
    } else {
        None
    }
}

/// Map the result of `adb install` to success, a lost device or a rejected package.
fn install_outcome(apk: &Path, success: bool, stdout: &str, stderr: &str) -> Result<(), DeviceError> {
    if success && stdout.contains("Success") {
        return Ok(());
    }
    if let Some(lost) = transport_loss(stderr) {
        return Err(lost);
    }
    let reason = [stdout.trim(), stderr.trim()]
        .iter()
        .filter(|s| !s.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ");
    Err(DeviceError::Install {
        path: apk.to_path_buf(),
        reason,
    })
}

/// One device reached through `adb`.
#[derive(Debug)]
pub struct AdbTransport {
    adb: PathBuf,
    serial: Option<String>,
}

impl AdbTransport {
    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.adb);
        if let Some(serial) = &self.serial {
            cmd.arg("-s").arg(serial);
        }
        cmd
    }

    fn run(&self, cmd: &mut Command) -> Result<String, DeviceError> {
        let output = cmd.stdin(Stdio::null()).output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(transport_loss(&stderr)
                .unwrap_or_else(|| DeviceError::Command(stderr.trim().to_string())));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl DeviceTransport for AdbTransport {
    fn shell_bytes(&mut self, command: &str) -> Result<ByteOutput<'_>, DeviceError> {
        tracing::debug!("adb exec-out {command}");
        let child = self
            .command()
            .arg("exec-out")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        Ok(Box::new(ProcessSource::new(child)?))
    }

    fn push(&mut self, local: &Path, remote: &str) -> Result<(), DeviceError> {
        self.run(self.command().arg("push").arg(local).arg(remote))?;
        Ok(())
    }

    fn install(&mut self, apk: &Path, timeout: Duration) -> Result<(), DeviceError> {
        let mut child = self
            .command()
            .arg("install")
            .arg("-r")
            .arg(apk)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let Some(status) = child.wait_timeout(timeout)? else {
            child.kill().ok();
            child.wait().ok();
            return Err(DeviceError::Timeout(format!(
                "install of {} exceeded {}s",
                apk.display(),
                timeout.as_secs()
            )));
        };

        let output = child.wait_with_output()?;
        install_outcome(
            apk,
            status.success(),
            &String::from_utf8_lossy(&output.stdout),
            &String::from_utf8_lossy(&output.stderr),
        )
    }
}

/// Standard output of a running command as a chunk source.
///
/// A non-zero exit surfaces as an error after the last chunk; when the
/// command's stderr names a lost device, that error carries the
/// [`DeviceError`]. Dropping the source kills a command that is still running.
#[derive(Debug)]
pub struct ProcessSource {
    child: Child,
    stdout: ReadSource<ChildStdout>,
    stderr: Option<ChildStderr>,
    reaped: bool,
}

impl ProcessSource {
    pub fn new(mut child: Child) -> io::Result<Self> {
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("child has no piped stdout"))?;
        let stderr = child.stderr.take();
        Ok(Self {
            child,
            stdout: ReadSource::new(stdout),
            stderr,
            reaped: false,
        })
    }

    fn reap(&mut self) -> io::Result<()> {
        if self.reaped {
            return Ok(());
        }
        self.reaped = true;
        let mut stderr = String::new();
        if let Some(mut pipe) = self.stderr.take() {
            pipe.read_to_string(&mut stderr)?;
        }
        let status = self.child.wait()?;
        if status.success() {
            return Ok(());
        }
        Err(match transport_loss(&stderr) {
            Some(lost) => io::Error::other(lost),
            None => io::Error::other(format!(
                "device command exited with {status}: {}",
                stderr.trim()
            )),
        })
    }
}

impl ChunkSource for ProcessSource {
    type Chunk = Vec<u8>;

    fn next_chunk(&mut self) -> io::Result<Option<Vec<u8>>> {
        match self.stdout.next_chunk()? {
            Some(chunk) => Ok(Some(chunk)),
            None => self.reap().map(|()| None),
        }
    }

    fn drain(&mut self) -> io::Result<()> {
        while self.stdout.next_chunk()?.is_some() {}
        self.reap()
    }
}

impl Drop for ProcessSource {
    fn drop(&mut self) {
        if !self.reaped {
            self.child.kill().ok();
            self.child.wait().ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use droidup_core::io::ChunkStream;

    #[test]
    fn test_classify_state() {
        assert!(classify_state(true, "device\n", "").is_ok());
        assert!(matches!(
            classify_state(false, "", "error: no devices/emulators found"),
            Err(DeviceError::NotFound)
        ));
        assert!(matches!(
            classify_state(false, "", "error: device unauthorized.\n"),
            Err(DeviceError::Unauthorized)
        ));
        assert!(matches!(
            classify_state(false, "", "error: device offline"),
            Err(DeviceError::Busy(_))
        ));
        assert!(matches!(
            classify_state(false, "", "error: device 'emulator-5554' not found"),
            Err(DeviceError::NotFound)
        ));
        assert!(matches!(
            classify_state(true, "bootloader", ""),
            Err(DeviceError::Command(_))
        ));
    }

    #[test]
    fn test_install_outcome() {
        let apk = Path::new("/cache/app.apk");
        assert!(install_outcome(apk, true, "Performing Streamed Install\nSuccess\n", "").is_ok());

        let err = install_outcome(
            apk,
            false,
            "",
            "adb: failed to install /cache/app.apk: Failure [INSTALL_FAILED_UPDATE_INCOMPATIBLE]",
        )
        .unwrap_err();
        assert!(matches!(err, DeviceError::Install { .. }));
        assert!(!err.is_transport());

        let err = install_outcome(apk, false, "", "adb: error: no devices/emulators found").unwrap_err();
        assert!(matches!(err, DeviceError::NotFound));
        assert!(err.is_transport());

        let err = install_outcome(apk, false, "", "error: device offline").unwrap_err();
        assert!(err.is_transport());
    }

    #[cfg(unix)]
    fn sh(script: &str) -> ProcessSource {
        let child = Command::new("sh")
            .arg("-c")
            .arg(script)
            .stdout(Stdio::piped())
            .spawn()
            .unwrap();
        ProcessSource::new(child).unwrap()
    }

    #[cfg(unix)]
    #[test]
    fn test_lost_device_surfaces_from_stream() {
        let child = Command::new("sh")
            .arg("-c")
            .arg("printf 'head'; echo 'error: no devices/emulators found' >&2; exit 1")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();
        let mut stream = ChunkStream::new(ProcessSource::new(child).unwrap());
        let err = stream.read_all().unwrap_err();
        let err = DeviceError::from(err);
        assert!(matches!(err, DeviceError::NotFound), "got {err:?}");
    }

    #[cfg(unix)]
    #[test]
    fn test_process_output_is_streamed() {
        let mut stream = ChunkStream::new(sh("printf 'one\\ntwo'"));
        assert_eq!(stream.read_all().unwrap(), b"one\ntwo");
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_command_errors_after_output() {
        let mut source = sh("printf 'partial'; exit 3");
        assert_eq!(source.next_chunk().unwrap().unwrap(), b"partial");
        assert!(source.next_chunk().is_err());
    }
}
