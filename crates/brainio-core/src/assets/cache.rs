use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::catalog::{CATALOG_FILE, CatalogEntry, LOCK_FILE};
use crate::error::{BrainioError, Result};
use crate::transport::{Transport, file_name_for_location};

const EXTRACTED_DIR: &str = "extracted";
const PARTIAL_SUFFIX: &str = ".part";

/// Per-catalog download cache rooted at `<home>/<catalog_id>/`.
///
/// Files are named after the last segment of their location and are never
/// evicted.
#[derive(Debug, Clone)]
pub struct LocalCache {
    root: PathBuf,
}

impl LocalCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, location: &str) -> Result<PathBuf> {
        let name = file_name_for_location(location).ok_or_else(|| {
            BrainioError::invalid(format!("location `{location}` does not end in a file name"))
        })?;
        if [CATALOG_FILE, LOCK_FILE, EXTRACTED_DIR].contains(&name.as_str())
            || name.ends_with(PARTIAL_SUFFIX)
        {
            return Err(BrainioError::invalid(format!(
                "location `{location}` would shadow the cache entry `{name}`"
            )));
        }
        Ok(self.root.join(name))
    }

    pub fn extraction_dir(&self, identifier: &str) -> Result<PathBuf> {
        if identifier.is_empty()
            || identifier == "."
            || identifier == ".."
            || identifier.contains(['/', '\\'])
        {
            return Err(BrainioError::invalid(format!(
                "identifier `{identifier}` cannot name an extraction directory"
            )));
        }
        Ok(self.root.join(EXTRACTED_DIR).join(identifier))
    }

    /// Returns the cached copy of `entry`, downloading it first when absent.
    ///
    /// Downloads land in `<name>.part` and are renamed into place, so an
    /// interrupted transfer never looks like a cached file. `refresh` drops any
    /// existing copy before fetching.
    pub fn fetch(
        &self,
        transport: &dyn Transport,
        entry: &CatalogEntry,
        refresh: bool,
    ) -> Result<PathBuf> {
        let path = self.path_for(&entry.location)?;
        if refresh && path.exists() {
            fs::remove_file(&path).map_err(|err| BrainioError::io(&path, err))?;
            debug!(path = %path.display(), "dropped cached copy for refresh");
        }
        if path.is_file() {
            debug!(identifier = %entry.identifier, path = %path.display(), "cache hit");
            return Ok(path);
        }

        fs::create_dir_all(&self.root).map_err(|err| BrainioError::io(&self.root, err))?;
        let mut partial = path.clone().into_os_string();
        partial.push(PARTIAL_SUFFIX);
        let partial = PathBuf::from(partial);
        if partial.exists() {
            fs::remove_file(&partial).map_err(|err| BrainioError::io(&partial, err))?;
        }

        debug!(
            identifier = %entry.identifier,
            location_type = %entry.location_type,
            location = %entry.location,
            "downloading into cache"
        );
        if let Err(err) = transport.download(&entry.location, &partial) {
            let _ = fs::remove_file(&partial);
            return Err(err);
        }
        if !partial.is_file() {
            return Err(BrainioError::transport(
                entry.location_type.as_str(),
                entry.location.as_str(),
                "transport reported success but produced no file",
            ));
        }
        fs::rename(&partial, &path).map_err(|err| BrainioError::io(&path, err))?;
        Ok(path)
    }
}
