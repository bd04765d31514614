use std::fs::File;
use std::io::copy;
use std::path::Path;

use reqwest::blocking::Client;
use tracing::debug;

use super::Transport;
use crate::error::{BrainioError, Result};

/// Read-only transport for catalogs that point at plain HTTP(S) mirrors.
pub struct HttpTransport {
    scheme: &'static str,
    client: Client,
}

impl HttpTransport {
    pub fn new(scheme: &'static str) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|err| BrainioError::Config {
                reason: format!("failed to build HTTP client: {err}"),
            })?;
        Ok(Self { scheme, client })
    }
}

impl Transport for HttpTransport {
    fn location_type(&self) -> &str {
        self.scheme
    }

    fn upload(&self, _local: &Path, location: &str) -> Result<()> {
        Err(BrainioError::transport(
            self.scheme,
            location,
            "http locations are download-only",
        ))
    }

    fn download(&self, location: &str, local: &Path) -> Result<()> {
        let mut response = self
            .client
            .get(location)
            .send()
            .and_then(|response| response.error_for_status())
            .map_err(|err| BrainioError::transport(self.scheme, location, err))?;

        let mut file = File::create(local).map_err(|err| BrainioError::io(local, err))?;
        let bytes = copy(&mut response, &mut file)
            .map_err(|err| BrainioError::transport(self.scheme, location, err))?;
        debug!(location, local = %local.display(), bytes, "downloaded over http");
        Ok(())
    }
}
