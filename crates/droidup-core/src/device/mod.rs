//! Exclusive device session and the operations run over it.
//!
//! The device is a single shared resource: every operation borrows the
//! [`DeviceSession`] mutably and any output stream it returns keeps that
//! borrow alive, so the borrow checker guarantees one command in flight.
//! Streams drain their command output when dropped, which leaves the
//! transport clean for the next command.

pub mod dumpsys;

use crate::io::backup::{BackupError, extract_member};
use crate::io::inflate::{Framing, inflate};
use crate::io::stream::{ChunkSource, ChunkStream, Utf8Source};
use droidup_schema::{DeviceProfile, DeviceReport, InstalledApp};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Writable scratch directory on the device.
pub const DEVICE_TMP: &str = "/data/local/tmp";

/// Main class of the lister jar.
pub const LISTER_MAIN: &str = "net.micro.adb.Lister.Lister";

/// Errors raised by device operations.
#[derive(Error, Debug)]
pub enum DeviceError {
    /// No device attached.
    #[error("No device found")]
    NotFound,

    /// The device has not accepted this host's debugging key.
    #[error("Device unauthorized: accept the debugging prompt on the device")]
    Unauthorized,

    /// Another client holds the device.
    #[error("Device busy: {0}")]
    Busy(String),

    /// The device stopped responding.
    #[error("Device timed out: {0}")]
    Timeout(String),

    /// An operation was attempted on a closed session.
    #[error("Device is not connected")]
    NotConnected,

    /// A device command could not be run or produced unusable output.
    #[error("Device command failed: {0}")]
    Command(String),

    /// Installing a package failed.
    #[error("Install of {path} failed: {reason}")]
    Install {
        /// Local artifact path.
        path: PathBuf,
        /// Installer output.
        reason: String,
    },

    /// The enumeration report could not be parsed.
    #[error("Invalid device report: {0}")]
    Report(#[from] serde_json::Error),

    /// A backup could not be read.
    #[error(transparent)]
    Backup(BackupError),

    /// Local or stream IO failure.
    #[error("IO error: {0}")]
    Io(io::Error),
}

/// Output streams can only fail with [`io::Error`]; a transport that loses
/// the device mid-stream wraps the [`DeviceError`] inside one. Unwrap it
/// here so the loss still reads as a transport failure.
impl From<io::Error> for DeviceError {
    fn from(e: io::Error) -> Self {
        if !e.get_ref().is_some_and(|inner| inner.is::<Self>()) {
            return Self::Io(e);
        }
        match e.into_inner().map(|inner| inner.downcast::<Self>()) {
            Some(Ok(device)) => *device,
            Some(Err(other)) => Self::Io(io::Error::other(other)),
            None => Self::Io(io::Error::other("device stream failed")),
        }
    }
}

impl From<BackupError> for DeviceError {
    fn from(e: BackupError) -> Self {
        match e {
            BackupError::Io(e) => Self::from(e),
            other => Self::Backup(other),
        }
    }
}

impl DeviceError {
    /// Returns `true` for transport failures, which end the run.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::NotFound | Self::Unauthorized | Self::Busy(_) | Self::Timeout(_) | Self::NotConnected
        )
    }
}

/// Raw output of a device command.
pub type ByteOutput<'a> = Box<dyn ChunkSource<Chunk = Vec<u8>> + 'a>;

/// Decoded output of a device command.
pub type TextOutput<'a> = Box<dyn ChunkSource<Chunk = String> + 'a>;

/// A connected device.
pub trait DeviceTransport {
    /// Run a shell command and stream its raw output.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the command cannot be started.
    fn shell_bytes(&mut self, command: &str) -> Result<ByteOutput<'_>, DeviceError>;

    /// Run a shell command and stream its output as text.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the command cannot be started.
    fn shell_text(&mut self, command: &str) -> Result<TextOutput<'_>, DeviceError> {
        let bytes = self.shell_bytes(command)?;
        Ok(Box::new(Utf8Source::new(bytes)))
    }

    /// Copy a local file to the device.
    ///
    /// # Errors
    ///
    /// Returns a transport or command error.
    fn push(&mut self, local: &Path, remote: &str) -> Result<(), DeviceError>;

    /// Install (or update) a package from a local artifact.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::Install`] if the device rejects the package, or
    /// [`DeviceError::Timeout`] if it does not answer within `timeout`.
    fn install(&mut self, apk: &Path, timeout: Duration) -> Result<(), DeviceError>;

    /// Release the connection.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the connection could not be closed cleanly.
    fn close(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }
}

/// Opens transports.
pub trait Connector {
    /// Transport produced by this connector.
    type Transport: DeviceTransport;

    /// Connect to the device.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::NotFound`], [`DeviceError::Unauthorized`] or
    /// [`DeviceError::Busy`] when no usable device is available.
    fn connect(&mut self) -> Result<Self::Transport, DeviceError>;
}

/// Connection state of a [`DeviceSession`].
#[derive(Debug)]
pub enum SessionState<T> {
    /// No transport open yet, or closed.
    Disconnected,
    /// Open transport.
    Connected(T),
}

/// Device properties and installed packages from one enumeration.
#[derive(Debug, Clone)]
pub struct DeviceSnapshot {
    /// Compatibility-relevant device properties.
    pub profile: DeviceProfile,
    /// Every package the package manager reported.
    pub apps: Vec<InstalledApp>,
}

/// Install timeout for an artifact of `size` bytes: one second per 100 KiB,
/// at least 30 seconds.
pub fn install_timeout(size: u64) -> Duration {
    Duration::from_secs((size / (100 * 1024)).max(30))
}

/// The exclusive device session. Connects on first use.
pub struct DeviceSession<C: Connector> {
    connector: C,
    state: SessionState<C::Transport>,
}

impl<C: Connector> DeviceSession<C> {
    /// Create a disconnected session.
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            state: SessionState::Disconnected,
        }
    }

    /// Returns `true` if a transport is open.
    pub fn is_connected(&self) -> bool {
        matches!(self.state, SessionState::Connected(_))
    }

    /// Access the transport, connecting first if needed.
    ///
    /// # Errors
    ///
    /// Returns the connector's error when connecting fails.
    pub fn transport(&mut self) -> Result<&mut C::Transport, DeviceError> {
        if let SessionState::Disconnected = self.state {
            tracing::info!("Connecting to device");
            self.state = SessionState::Connected(self.connector.connect()?);
        }
        match &mut self.state {
            SessionState::Connected(transport) => Ok(transport),
            SessionState::Disconnected => Err(DeviceError::NotConnected),
        }
    }

    /// Close the transport, if open.
    ///
    /// # Errors
    ///
    /// Returns the transport's close error.
    pub fn disconnect(&mut self) -> Result<(), DeviceError> {
        if let SessionState::Connected(mut transport) =
            std::mem::replace(&mut self.state, SessionState::Disconnected)
        {
            tracing::info!("Disconnecting from device");
            transport.close()?;
        }
        Ok(())
    }

    /// Enumerate the device with the lister jar.
    ///
    /// The jar is pushed to [`DEVICE_TMP`], run through `app_process` and its
    /// JSON report is gzip-compressed on the device before transfer.
    ///
    /// # Errors
    ///
    /// Returns transport errors, or [`DeviceError::Report`] if the output is
    /// not a valid report.
    pub fn enumerate_with_lister(&mut self, jar: &Path) -> Result<DeviceSnapshot, DeviceError> {
        let name = jar
            .file_name()
            .ok_or_else(|| DeviceError::Command(format!("invalid lister path {}", jar.display())))?
            .to_string_lossy();
        let remote = format!("{DEVICE_TMP}/{name}");

        let transport = self.transport()?;
        transport.push(jar, &remote)?;
        tracing::debug!("Pushed lister to {remote}");

        let command = format!("export CLASSPATH='{remote}'; app_process / {LISTER_MAIN} | gzip");
        let output = ChunkStream::new(transport.shell_bytes(&command)?);
        let mut json = Vec::new();
        inflate(output, Framing::Gzip).read_to_end(&mut json)?;
        let report: DeviceReport = serde_json::from_slice(&json)?;

        let profile = DeviceProfile::from(&report.device);
        let apps: Vec<InstalledApp> = report.apps.into_values().map(InstalledApp::from).collect();
        tracing::info!(
            "{} (SDK {}) reported {} packages",
            profile.model,
            profile.sdk,
            apps.len()
        );
        Ok(DeviceSnapshot { profile, apps })
    }

    /// Enumerate the device from `dumpsys` and system properties.
    ///
    /// # Errors
    ///
    /// Returns transport errors, or [`DeviceError::Command`] when the SDK
    /// level cannot be read.
    pub fn enumerate_with_dumpsys(&mut self) -> Result<DeviceSnapshot, DeviceError> {
        let transport = self.transport()?;

        let sdk_text = read_prop(transport, "ro.build.version.sdk")?;
        let sdk = sdk_text
            .parse()
            .map_err(|_| DeviceError::Command(format!("unexpected SDK level {sdk_text:?}")))?;
        let supported_abis = dumpsys::parse_abi_list(&read_prop(transport, "ro.product.cpu.abilist")?);
        let model = read_prop(transport, "ro.product.model")?;
        let arch = shell_line(transport, "uname -m")?;

        let mut output = ChunkStream::new(transport.shell_text(dumpsys::COMMAND)?);
        let apps = dumpsys::parse_packages(output.lines())?;

        Ok(DeviceSnapshot {
            profile: DeviceProfile {
                model,
                arch,
                supported_abis,
                sdk,
                min_sdk: 0,
            },
            apps,
        })
    }

    /// Start a key-value backup of `package` and stream the container.
    ///
    /// The user has to confirm the backup on the device.
    ///
    /// # Errors
    ///
    /// Returns transport errors.
    pub fn backup(&mut self, package: &str) -> Result<ChunkStream<ByteOutput<'_>>, DeviceError> {
        tracing::info!("Requesting backup of {package}; confirm it on the device");
        let output = self
            .transport()?
            .shell_bytes(&format!("bu backup -keyvalue {package}"))?;
        Ok(ChunkStream::new(output))
    }

    /// Back up `package` and copy one member of the backup into `out`.
    ///
    /// # Errors
    ///
    /// Returns transport errors, or [`DeviceError::Backup`] if the container
    /// is malformed or lacks `member`.
    pub fn pull_backup_member<W: Write>(
        &mut self,
        package: &str,
        member: &str,
        out: &mut W,
    ) -> Result<u64, DeviceError> {
        let stream = self.backup(package)?;
        Ok(extract_member(stream, member, out)?)
    }

    /// Install a local artifact, with a timeout scaled by its size.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::Install`] or a transport error.
    pub fn install(&mut self, apk: &Path) -> Result<(), DeviceError> {
        let timeout = install_timeout(std::fs::metadata(apk)?.len());
        tracing::debug!("Installing {} (timeout {timeout:?})", apk.display());
        self.transport()?.install(apk, timeout)
    }
}

impl<C: Connector> std::fmt::Debug for DeviceSession<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl<C: Connector> Drop for DeviceSession<C> {
    fn drop(&mut self) {
        if let Err(e) = self.disconnect() {
            tracing::warn!("Failed to close device session: {e}");
        }
    }
}

fn shell_line<T: DeviceTransport>(transport: &mut T, command: &str) -> Result<String, DeviceError> {
    let mut output = ChunkStream::new(transport.shell_text(command)?);
    Ok(output.read_all()?.trim().to_string())
}

fn read_prop<T: DeviceTransport>(transport: &mut T, name: &str) -> Result<String, DeviceError> {
    shell_line(transport, &format!("getprop {name}"))
}
