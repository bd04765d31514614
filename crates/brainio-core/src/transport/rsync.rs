use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use super::Transport;
use crate::env::RsyncSettings;
use crate::error::{BrainioError, Result};

pub const LOCATION_TYPE: &str = "rsync";
const RSYNC_FLAGS: [&str; 2] = ["-vzhW", "--progress"];

/// Destination of an rsync transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RsyncLocation {
    /// `<host>:<path>`, reached over ssh.
    Remote { host: String, path: String },
    /// `rsync://host/module/path`, served by an rsync daemon.
    Daemon(String),
    Local(PathBuf),
}

impl RsyncLocation {
    pub fn parse(location: &str) -> Result<Self> {
        if location.is_empty() {
            return Err(BrainioError::transport(
                LOCATION_TYPE,
                location,
                "rsync location is empty",
            ));
        }
        if location.starts_with("rsync://") {
            return Ok(Self::Daemon(location.to_string()));
        }
        if let Some((host, path)) = location.split_once(':') {
            if !host.is_empty() && !host.contains('/') {
                if path.is_empty() {
                    return Err(BrainioError::transport(
                        LOCATION_TYPE,
                        location,
                        "rsync location has no remote path",
                    ));
                }
                return Ok(Self::Remote {
                    host: host.to_string(),
                    path: path.to_string(),
                });
            }
        }
        Ok(Self::Local(PathBuf::from(location)))
    }
}

/// Synchronous copies through the `rsync` binary.
#[derive(Debug, Clone)]
pub struct RsyncTransport {
    program: String,
    ssh_program: String,
}

impl RsyncTransport {
    pub fn new(settings: &RsyncSettings) -> Self {
        Self {
            program: settings.program.clone(),
            ssh_program: settings.ssh_program.clone(),
        }
    }

    /// Command that makes sure the remote parent directory exists, when one is needed.
    pub fn mkdir_command(&self, location: &RsyncLocation) -> Option<Command> {
        let RsyncLocation::Remote { host, path } = location else {
            return None;
        };
        let parent = Path::new(path).parent()?;
        if parent.as_os_str().is_empty() {
            return None;
        }
        let mut command = Command::new(&self.ssh_program);
        command.arg(host).arg("mkdir").arg("-p").arg(parent);
        Some(command)
    }

    pub fn upload_command(&self, local: &Path, location: &str) -> Command {
        let mut command = Command::new(&self.program);
        command.args(RSYNC_FLAGS).arg(local).arg(location);
        command
    }

    pub fn download_command(&self, location: &str, local: &Path) -> Command {
        let mut command = Command::new(&self.program);
        command.args(RSYNC_FLAGS).arg(location).arg(local);
        command
    }
}

impl Transport for RsyncTransport {
    fn location_type(&self) -> &str {
        LOCATION_TYPE
    }

    fn upload(&self, local: &Path, location: &str) -> Result<()> {
        let parsed = RsyncLocation::parse(location)?;
        if let RsyncLocation::Local(path) = &parsed {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .map_err(|err| BrainioError::transport(LOCATION_TYPE, location, err))?;
            }
        }
        if let Some(mkdir) = self.mkdir_command(&parsed) {
            run(mkdir, location)?;
        }
        run(self.upload_command(local, location), location)
    }

    fn download(&self, location: &str, local: &Path) -> Result<()> {
        if local.exists() {
            debug!(location, local = %local.display(), "local copy exists, skipping rsync");
            return Ok(());
        }
        RsyncLocation::parse(location)?;
        run(self.download_command(location, local), location)
    }
}

fn run(mut command: Command, location: &str) -> Result<()> {
    debug!(command = ?command, "running transfer command");
    let output = command.output().map_err(|err| {
        BrainioError::transport(
            LOCATION_TYPE,
            location,
            format!(
                "failed to spawn {}: {err}",
                command.get_program().to_string_lossy()
            ),
        )
    })?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(BrainioError::transport(
            LOCATION_TYPE,
            location,
            format!(
                "{} exited with {}: {}",
                command.get_program().to_string_lossy(),
                output.status,
                stderr.trim()
            ),
        ));
    }
    debug!(
        stdout = %String::from_utf8_lossy(&output.stdout).trim(),
        "transfer command finished"
    );
    Ok(())
}
