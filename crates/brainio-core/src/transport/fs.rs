use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;
use url::Url;

use super::Transport;
use crate::error::{BrainioError, Result};

pub const LOCATION_TYPE: &str = "file";

/// Copies to and from a locally mounted path (`/srv/...` or `file:///srv/...`).
#[derive(Debug, Default, Clone)]
pub struct FsTransport;

impl FsTransport {
    pub fn new() -> Self {
        Self
    }

    pub fn parse_path(location: &str) -> Result<PathBuf> {
        if location.starts_with("file://") {
            let url = Url::parse(location)
                .map_err(|err| BrainioError::transport(LOCATION_TYPE, location, err))?;
            return url.to_file_path().map_err(|_| {
                BrainioError::transport(
                    LOCATION_TYPE,
                    location,
                    "file location cannot be represented as a local path",
                )
            });
        }
        if location.is_empty() {
            return Err(BrainioError::transport(
                LOCATION_TYPE,
                location,
                "file location is empty",
            ));
        }
        Ok(PathBuf::from(location))
    }
}

impl Transport for FsTransport {
    fn location_type(&self) -> &str {
        LOCATION_TYPE
    }

    fn upload(&self, local: &Path, location: &str) -> Result<()> {
        let remote = Self::parse_path(location)?;
        if let Some(parent) = remote.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| BrainioError::transport(LOCATION_TYPE, location, err))?;
        }
        let bytes = fs::copy(local, &remote)
            .map_err(|err| BrainioError::transport(LOCATION_TYPE, location, err))?;
        debug!(local = %local.display(), remote = %remote.display(), bytes, "copied file to remote");
        Ok(())
    }

    fn download(&self, location: &str, local: &Path) -> Result<()> {
        let remote = Self::parse_path(location)?;
        if !remote.is_file() {
            return Err(BrainioError::transport(
                LOCATION_TYPE,
                location,
                format!("{} does not exist", remote.display()),
            ));
        }
        let bytes = fs::copy(&remote, local)
            .map_err(|err| BrainioError::transport(LOCATION_TYPE, location, err))?;
        debug!(remote = %remote.display(), local = %local.display(), bytes, "copied file from remote");
        Ok(())
    }
}
