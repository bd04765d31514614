//! Persistent catalog of assets keyed by identifier, with its consistency checks.
//!
//! Each catalog lives at `<home>/<catalog_id>/catalog.csv`. Callers never hold
//! a live handle: every operation loads a snapshot, and mutations rewrite the
//! whole table under an advisory lock once the new table has been validated.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{BrainioError, Result};

pub use validate::{validate_columns, validate_entries};

mod table;
mod validate;

pub const CATALOG_FILE: &str = "catalog.csv";
pub const LOCK_FILE: &str = "catalog.lock";

/// Discriminates assembly rows from stimulus-set rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupType {
    Assembly,
    StimulusSet,
}

impl LookupType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Assembly => "assembly",
            Self::StimulusSet => "stimulus_set",
        }
    }
}

impl fmt::Display for LookupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LookupType {
    type Err = BrainioError;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "assembly" => Ok(Self::Assembly),
            "stimulus_set" => Ok(Self::StimulusSet),
            other => Err(BrainioError::invalid(format!(
                "lookup_type `{other}` must be `assembly` or `stimulus_set`"
            ))),
        }
    }
}

/// One catalog row. Field order is the canonical column order on write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub identifier: String,
    pub lookup_type: LookupType,
    pub class: String,
    pub location_type: String,
    pub location: String,
    pub sha1: String,
    pub stimulus_set_identifier: String,
}

/// Equality filter over catalog rows; `None` fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Lookup {
    pub identifier: Option<String>,
    pub lookup_type: Option<LookupType>,
    pub class: Option<String>,
}

impl Lookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    pub fn lookup_type(mut self, lookup_type: LookupType) -> Self {
        self.lookup_type = Some(lookup_type);
        self
    }

    pub fn class(mut self, class: impl Into<String>) -> Self {
        self.class = Some(class.into());
        self
    }

    pub fn matches(&self, entry: &CatalogEntry) -> bool {
        self.identifier
            .as_deref()
            .is_none_or(|identifier| entry.identifier == identifier)
            && self
                .lookup_type
                .is_none_or(|lookup_type| entry.lookup_type == lookup_type)
            && self.class.as_deref().is_none_or(|class| entry.class == class)
    }
}

/// Snapshot of a catalog table at the time it was read.
#[derive(Debug, Clone)]
pub struct Catalog {
    id: String,
    path: PathBuf,
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn lookup(&self, query: &Lookup) -> Vec<CatalogEntry> {
        self.entries
            .iter()
            .filter(|entry| query.matches(entry))
            .cloned()
            .collect()
    }

    pub fn into_entries(self) -> Vec<CatalogEntry> {
        self.entries
    }
}

/// File-backed catalog tables rooted at a base directory.
#[derive(Debug, Clone)]
pub struct CatalogStore {
    home: PathBuf,
}

impl CatalogStore {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    /// Directory holding the table and the local cache for `catalog`.
    pub fn catalog_dir(&self, catalog: &str) -> Result<PathBuf> {
        validate_catalog_id(catalog)?;
        Ok(self.home.join(catalog))
    }

    pub fn catalog_path(&self, catalog: &str) -> Result<PathBuf> {
        Ok(self.catalog_dir(catalog)?.join(CATALOG_FILE))
    }

    pub fn exists(&self, catalog: &str) -> Result<bool> {
        Ok(self.catalog_path(catalog)?.exists())
    }

    /// Writes an empty table; fails if one is already present.
    pub fn create(&self, catalog: &str) -> Result<PathBuf> {
        let path = self.catalog_path(catalog)?;
        let _lock = self.lock(catalog)?;
        if path.exists() {
            return Err(BrainioError::AlreadyExists {
                catalog: catalog.to_string(),
                path,
            });
        }
        table::write(&path, &[])?;
        info!(catalog, path = %path.display(), "created catalog");
        Ok(path)
    }

    /// Validates an existing table file and copies it in as `catalog`.
    pub fn import(&self, catalog: &str, source: &Path) -> Result<PathBuf> {
        let path = self.catalog_path(catalog)?;
        let entries = table::read(source)?;
        let _lock = self.lock(catalog)?;
        if path.exists() {
            return Err(BrainioError::AlreadyExists {
                catalog: catalog.to_string(),
                path,
            });
        }
        table::write(&path, &entries)?;
        info!(
            catalog,
            source = %source.display(),
            rows = entries.len(),
            "imported catalog"
        );
        Ok(path)
    }

    /// Reads and validates the table, creating an empty one on first use.
    pub fn load(&self, catalog: &str) -> Result<Catalog> {
        let path = self.catalog_path(catalog)?;
        if !path.exists() {
            let _lock = self.lock(catalog)?;
            if !path.exists() {
                table::write(&path, &[])?;
                debug!(catalog, path = %path.display(), "initialised empty catalog");
            }
        }
        let entries = table::read(&path)?;
        Ok(Catalog {
            id: catalog.to_string(),
            path,
            entries,
        })
    }

    pub fn lookup(&self, catalog: &str, query: &Lookup) -> Result<Vec<CatalogEntry>> {
        Ok(self.load(catalog)?.lookup(query))
    }

    pub fn append(&self, catalog: &str, entry: CatalogEntry) -> Result<Catalog> {
        self.append_all(catalog, vec![entry])
    }

    /// Appends `entries` in a single rewrite. The resulting table is validated
    /// before anything is persisted; on failure the file is left untouched.
    pub fn append_all(&self, catalog: &str, entries: Vec<CatalogEntry>) -> Result<Catalog> {
        let path = self.catalog_path(catalog)?;
        let _lock = self.lock(catalog)?;
        let mut rows = if path.exists() {
            table::read(&path)?
        } else {
            Vec::new()
        };
        let appended = entries.len();
        rows.extend(entries);
        validate_entries(&rows)?;
        table::write(&path, &rows)?;
        debug!(catalog, appended, total = rows.len(), "appended catalog rows");
        Ok(Catalog {
            id: catalog.to_string(),
            path,
            entries: rows,
        })
    }

    /// Checks that appending `entries` would keep the table valid, without writing.
    pub fn check_append(&self, catalog: &str, entries: &[CatalogEntry]) -> Result<()> {
        let mut rows = self.load(catalog)?.into_entries();
        rows.extend_from_slice(entries);
        validate_entries(&rows)
    }

    fn lock(&self, catalog: &str) -> Result<CatalogLock> {
        let dir = self.catalog_dir(catalog)?;
        fs::create_dir_all(&dir).map_err(|err| BrainioError::io(&dir, err))?;
        CatalogLock::acquire(&dir.join(LOCK_FILE))
    }
}

/// Advisory exclusive lock held for the duration of a read-modify-write.
struct CatalogLock {
    file: File,
}

impl CatalogLock {
    fn acquire(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|err| BrainioError::io(path, err))?;
        file.lock_exclusive()
            .map_err(|err| BrainioError::io(path, err))?;
        Ok(Self { file })
    }
}

impl Drop for CatalogLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn validate_catalog_id(catalog: &str) -> Result<()> {
    if catalog.is_empty()
        || catalog == "."
        || catalog == ".."
        || catalog.contains(['/', '\\'])
    {
        return Err(BrainioError::invalid(format!(
            "catalog identifier `{catalog}` must be a single path segment"
        )));
    }
    Ok(())
}
