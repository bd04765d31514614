//! Byte movement between the local cache and remote storage.
//!
//! Each catalog row names a `location_type`; the [`TransportRegistry`] maps
//! that string to a [`Transport`] with an `upload`/`download` pair. New
//! schemes are added by registering another implementation.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use url::Url;

use crate::env::BrainioConfig;
use crate::error::{BrainioError, Result};

mod fs;
mod http;
mod rsync;
mod s3;

pub use fs::FsTransport;
pub use http::HttpTransport;
pub use rsync::{RsyncLocation, RsyncTransport};
pub use s3::{ObjectStorageTransport, S3Location};

/// Upload/download capability for one `location_type`.
///
/// Transports are best-effort: a failed call may leave partial files behind
/// on either side.
pub trait Transport: Send + Sync {
    fn location_type(&self) -> &str;
    fn upload(&self, local: &Path, location: &str) -> Result<()>;
    fn download(&self, location: &str, local: &Path) -> Result<()>;
}

#[derive(Default, Clone)]
pub struct TransportRegistry {
    transports: HashMap<String, Arc<dyn Transport>>,
}

impl TransportRegistry {
    /// Registry with every built-in transport configured from `cfg`.
    pub fn builtin(cfg: &BrainioConfig) -> Result<Self> {
        let mut registry = Self::default();
        registry.register_builtin(cfg)?;
        Ok(registry)
    }

    /// Adds `transport`, replacing any existing one for the same `location_type`.
    pub fn register(&mut self, transport: impl Transport + 'static) {
        self.transports
            .insert(transport.location_type().to_string(), Arc::new(transport));
    }

    pub fn register_builtin(&mut self, cfg: &BrainioConfig) -> Result<()> {
        self.register(RsyncTransport::new(&cfg.rsync));
        self.register(ObjectStorageTransport::new(cfg.s3.clone()));
        self.register(FsTransport::new());
        self.register(HttpTransport::new("http")?);
        self.register(HttpTransport::new("https")?);
        Ok(())
    }

    /// Resolves `location_type`; fails before any I/O when it is unknown.
    pub fn get(&self, location_type: &str) -> Result<Arc<dyn Transport>> {
        self.transports
            .get(location_type)
            .cloned()
            .ok_or_else(|| BrainioError::UnsupportedTransport {
                location_type: location_type.to_string(),
            })
    }

    pub fn location_types(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.transports.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Final path segment of a location, used as the cache file name.
pub fn file_name_for_location(location: &str) -> Option<String> {
    let path = match Url::parse(location) {
        Ok(url) if url.cannot_be_a_base() => url.path().to_string(),
        Ok(url) => url
            .path_segments()
            .and_then(|mut segments| segments.next_back().map(str::to_string))
            .unwrap_or_default(),
        Err(_) => location.to_string(),
    };
    let name = path
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .rsplit(':')
        .next()
        .unwrap_or_default();
    if name.is_empty() || name == "." || name == ".." {
        None
    } else {
        Some(name.to_string())
    }
}
