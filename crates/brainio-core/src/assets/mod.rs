//! Publishing and loading assemblies and stimulus sets.
//!
//! [`AssetManager`] ties the catalog store, the transports, the hasher, and
//! the asset validators together. Publishing validates and hashes locally,
//! uploads, then appends the catalog rows in one mutation. Loading looks the
//! rows up, fills the per-catalog cache, and re-checks integrity.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::catalog::{CatalogEntry, CatalogStore, Lookup, LookupType};
use crate::env::BrainioConfig;
use crate::error::{BrainioError, CatalogRule, Result};
use crate::hash::{Sha1Digest, sha1_file};
use crate::transport::{Transport, TransportRegistry, file_name_for_location};

pub use assembly::{
    AssemblyHeader, AssemblyInspector, AssemblyMetadata, AttributeValue, Dimension, Variable,
    validate_assembly,
};
pub use cache::LocalCache;
pub use netcdf::{NetcdfInspector, write_classic};
pub use stimulus_set::{
    StimulusSetManifest, archive_members, extract_archive, listed_filenames, read_manifest,
    validate_stimulus_set,
};

pub mod assembly;
mod cache;
pub mod netcdf;
pub mod stimulus_set;

pub const CSV_CLASS: &str = "csv";
pub const ZIP_CLASS: &str = "zip";

/// A local asset ready to be published.
#[derive(Debug, Clone)]
pub enum Asset {
    /// Single container file; identifiers are read from its attributes.
    Assembly { path: PathBuf },
    /// Metadata table plus stimulus archive, published under `identifier`.
    StimulusSet {
        identifier: String,
        csv: PathBuf,
        zip: PathBuf,
    },
}

impl Asset {
    pub fn lookup_type(&self) -> LookupType {
        match self {
            Self::Assembly { .. } => LookupType::Assembly,
            Self::StimulusSet { .. } => LookupType::StimulusSet,
        }
    }
}

/// Remote destination(s) for an [`Asset`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Single(String),
    Pair { csv: String, zip: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    /// Recompute each file's sha1 and compare with the catalog.
    pub check_integrity: bool,
    /// Run the asset validator on the cached files.
    pub validate: bool,
    /// Drop cached copies and download again.
    pub refresh: bool,
    /// Unpack stimulus archives next to the cache.
    pub extract: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            check_integrity: true,
            validate: true,
            refresh: false,
            extract: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadedAssembly {
    pub entry: CatalogEntry,
    pub path: PathBuf,
    /// Present when the assembly was validated.
    pub metadata: Option<AssemblyMetadata>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadedStimulusSet {
    pub identifier: String,
    pub csv: PathBuf,
    pub zip: PathBuf,
    /// Directory holding the unpacked stimuli, when extraction was requested.
    pub extracted: Option<PathBuf>,
    pub manifest: Option<StimulusSetManifest>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "lookup_type", rename_all = "snake_case")]
pub enum LoadedAsset {
    Assembly(LoadedAssembly),
    StimulusSet(LoadedStimulusSet),
}

/// A file waiting to be uploaded, paired with the row that will record it.
struct Pending {
    local: PathBuf,
    entry: CatalogEntry,
}

pub struct AssetManager {
    store: CatalogStore,
    transports: TransportRegistry,
    inspector: Arc<dyn AssemblyInspector>,
}

impl AssetManager {
    /// Manager over `cfg.home` with the built-in transports and the netCDF inspector.
    pub fn new(cfg: &BrainioConfig) -> Result<Self> {
        Ok(Self::with_parts(
            CatalogStore::new(cfg.home.clone()),
            TransportRegistry::builtin(cfg)?,
            NetcdfInspector::new(),
        ))
    }

    pub fn with_parts(
        store: CatalogStore,
        transports: TransportRegistry,
        inspector: impl AssemblyInspector + 'static,
    ) -> Self {
        Self {
            store,
            transports,
            inspector: Arc::new(inspector),
        }
    }

    pub fn store(&self) -> &CatalogStore {
        &self.store
    }

    pub fn transports(&self) -> &TransportRegistry {
        &self.transports
    }

    pub fn cache(&self, catalog: &str) -> Result<LocalCache> {
        Ok(LocalCache::new(self.store.catalog_dir(catalog)?))
    }

    /// Validates, hashes, uploads, and records `asset`; returns the appended rows.
    ///
    /// A failure after any upload succeeded is reported as
    /// [`BrainioError::OrphanedUpload`] naming the remote copies left behind.
    pub fn publish(
        &self,
        catalog: &str,
        asset: &Asset,
        location_type: &str,
        location: &Location,
    ) -> Result<Vec<CatalogEntry>> {
        let transport = self.transports.get(location_type)?;
        let mut pending = self.prepare(asset, location_type, location)?;

        for item in &pending {
            let query = Lookup::new()
                .identifier(item.entry.identifier.as_str())
                .lookup_type(item.entry.lookup_type)
                .class(item.entry.class.as_str());
            if !self.store.lookup(catalog, &query)?.is_empty() {
                return Err(BrainioError::DuplicateEntry {
                    catalog: catalog.to_string(),
                    lookup_type: item.entry.lookup_type,
                    identifier: item.entry.identifier.clone(),
                    class: item.entry.class.clone(),
                });
            }
        }

        for item in &mut pending {
            item.entry.sha1 = sha1_file(&item.local)?.into_string();
        }
        let entries: Vec<CatalogEntry> = pending.iter().map(|item| item.entry.clone()).collect();
        self.store.check_append(catalog, &entries)?;

        let mut uploaded = Vec::new();
        for item in &pending {
            if let Err(err) = transport.upload(&item.local, &item.entry.location) {
                return Err(orphaned(uploaded, err));
            }
            debug!(
                location_type,
                location = %item.entry.location,
                local = %item.local.display(),
                "uploaded asset file"
            );
            uploaded.push(item.entry.location.clone());
        }

        if let Err(err) = self.store.append_all(catalog, entries.clone()) {
            return Err(orphaned(uploaded, err));
        }
        info!(
            catalog,
            identifier = %entries[0].identifier,
            lookup_type = %asset.lookup_type(),
            location_type,
            rows = entries.len(),
            "published asset"
        );
        Ok(entries)
    }

    pub fn publish_assembly(
        &self,
        catalog: &str,
        path: &Path,
        location_type: &str,
        location: &str,
    ) -> Result<CatalogEntry> {
        let asset = Asset::Assembly {
            path: path.to_path_buf(),
        };
        let mut rows = self.publish(
            catalog,
            &asset,
            location_type,
            &Location::Single(location.to_string()),
        )?;
        rows.pop()
            .ok_or_else(|| BrainioError::invalid("publishing an assembly produced no row"))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn publish_stimulus_set(
        &self,
        catalog: &str,
        identifier: &str,
        csv: &Path,
        zip: &Path,
        location_type: &str,
        csv_location: &str,
        zip_location: &str,
    ) -> Result<Vec<CatalogEntry>> {
        let asset = Asset::StimulusSet {
            identifier: identifier.to_string(),
            csv: csv.to_path_buf(),
            zip: zip.to_path_buf(),
        };
        self.publish(
            catalog,
            &asset,
            location_type,
            &Location::Pair {
                csv: csv_location.to_string(),
                zip: zip_location.to_string(),
            },
        )
    }

    /// Validates `asset` locally and builds its rows with empty sha1 fields.
    fn prepare(
        &self,
        asset: &Asset,
        location_type: &str,
        location: &Location,
    ) -> Result<Vec<Pending>> {
        match (asset, location) {
            (Asset::Assembly { path }, Location::Single(location)) => {
                let header = self.inspector.inspect(path)?;
                let meta = validate_assembly(&header)?;
                Ok(vec![Pending {
                    local: path.clone(),
                    entry: CatalogEntry {
                        identifier: meta.identifier,
                        lookup_type: LookupType::Assembly,
                        class: self.inspector.format_tag().to_string(),
                        location_type: location_type.to_string(),
                        location: location.clone(),
                        sha1: String::new(),
                        stimulus_set_identifier: meta.stimulus_set_identifier,
                    },
                }])
            }
            (
                Asset::StimulusSet {
                    identifier,
                    csv,
                    zip,
                },
                Location::Pair {
                    csv: csv_location,
                    zip: zip_location,
                },
            ) => {
                if identifier.trim().is_empty() {
                    return Err(BrainioError::invalid("stimulus set identifier is empty"));
                }
                let csv_name = file_name_for_location(csv_location);
                if csv_name.is_none() || csv_name == file_name_for_location(zip_location) {
                    return Err(BrainioError::invalid(format!(
                        "csv location `{csv_location}` and zip location `{zip_location}` \
                         must end in distinct file names"
                    )));
                }
                validate_stimulus_set(csv, zip)?;
                let row = |class: &str, location: &str| CatalogEntry {
                    identifier: identifier.clone(),
                    lookup_type: LookupType::StimulusSet,
                    class: class.to_string(),
                    location_type: location_type.to_string(),
                    location: location.to_string(),
                    sha1: String::new(),
                    stimulus_set_identifier: String::new(),
                };
                Ok(vec![
                    Pending {
                        local: csv.clone(),
                        entry: row(CSV_CLASS, csv_location),
                    },
                    Pending {
                        local: zip.clone(),
                        entry: row(ZIP_CLASS, zip_location),
                    },
                ])
            }
            (Asset::Assembly { .. }, Location::Pair { .. }) => Err(BrainioError::invalid(
                "an assembly is published to a single location",
            )),
            (Asset::StimulusSet { .. }, Location::Single(_)) => Err(BrainioError::invalid(
                "a stimulus set needs separate csv and zip locations",
            )),
        }
    }

    /// Resolves `identifier` to local files, downloading what the cache lacks.
    pub fn load(
        &self,
        catalog: &str,
        identifier: &str,
        lookup_type: LookupType,
        options: &LoadOptions,
    ) -> Result<LoadedAsset> {
        let query = Lookup::new()
            .identifier(identifier)
            .lookup_type(lookup_type);
        let rows = self.store.lookup(catalog, &query)?;
        if rows.is_empty() {
            return Err(BrainioError::NotFound {
                catalog: catalog.to_string(),
                lookup_type,
                identifier: identifier.to_string(),
            });
        }

        let cache = self.cache(catalog)?;
        let mut fetched = Vec::with_capacity(rows.len());
        for row in rows {
            let transport = self.transports.get(&row.location_type)?;
            let path = self.fetch_row(&cache, transport.as_ref(), &row, options)?;
            fetched.push((row, path));
        }

        let loaded = match lookup_type {
            LookupType::Assembly => self.finish_assembly(fetched, options)?,
            LookupType::StimulusSet => finish_stimulus_set(&cache, identifier, fetched, options)?,
        };
        info!(catalog, identifier, %lookup_type, "loaded asset");
        Ok(loaded)
    }

    pub fn load_assembly(
        &self,
        catalog: &str,
        identifier: &str,
        options: &LoadOptions,
    ) -> Result<LoadedAssembly> {
        match self.load(catalog, identifier, LookupType::Assembly, options)? {
            LoadedAsset::Assembly(assembly) => Ok(assembly),
            LoadedAsset::StimulusSet(_) => Err(BrainioError::invalid(format!(
                "`{identifier}` resolved to a stimulus set"
            ))),
        }
    }

    pub fn load_stimulus_set(
        &self,
        catalog: &str,
        identifier: &str,
        options: &LoadOptions,
    ) -> Result<LoadedStimulusSet> {
        match self.load(catalog, identifier, LookupType::StimulusSet, options)? {
            LoadedAsset::StimulusSet(set) => Ok(set),
            LoadedAsset::Assembly(_) => Err(BrainioError::invalid(format!(
                "`{identifier}` resolved to an assembly"
            ))),
        }
    }

    fn fetch_row(
        &self,
        cache: &LocalCache,
        transport: &dyn Transport,
        row: &CatalogEntry,
        options: &LoadOptions,
    ) -> Result<PathBuf> {
        let path = cache.fetch(transport, row, options.refresh)?;
        if options.check_integrity {
            let actual = sha1_file(&path)?;
            if Sha1Digest::parse(&row.sha1).as_ref() != Some(&actual) {
                warn!(
                    identifier = %row.identifier,
                    path = %path.display(),
                    expected = %row.sha1,
                    actual = %actual,
                    "integrity check failed"
                );
                return Err(BrainioError::Integrity {
                    path,
                    expected: row.sha1.clone(),
                    actual: actual.into_string(),
                });
            }
        }
        Ok(path)
    }

    fn finish_assembly(
        &self,
        mut fetched: Vec<(CatalogEntry, PathBuf)>,
        options: &LoadOptions,
    ) -> Result<LoadedAsset> {
        let (entry, path) = match (fetched.pop(), fetched.is_empty()) {
            (Some(single), true) => single,
            _ => {
                return Err(BrainioError::catalog(
                    CatalogRule::AssemblyRows,
                    None,
                    "assembly lookup did not resolve to exactly one row",
                ));
            }
        };
        let metadata = if options.validate {
            Some(validate_assembly(&self.inspector.inspect(&path)?)?)
        } else {
            None
        };
        Ok(LoadedAsset::Assembly(LoadedAssembly {
            entry,
            path,
            metadata,
        }))
    }
}

fn finish_stimulus_set(
    cache: &LocalCache,
    identifier: &str,
    fetched: Vec<(CatalogEntry, PathBuf)>,
    options: &LoadOptions,
) -> Result<LoadedAsset> {
    let by_class = |class: &str| {
        fetched
            .iter()
            .find(|(entry, _)| entry.class == class)
            .map(|(_, path)| path.clone())
            .ok_or_else(|| {
                BrainioError::catalog(
                    CatalogRule::StimulusSetRows,
                    Some(identifier.to_string()),
                    format!("no `{class}` row"),
                )
            })
    };
    let csv = by_class(CSV_CLASS)?;
    let zip = by_class(ZIP_CLASS)?;

    let manifest = if options.validate {
        Some(validate_stimulus_set(&csv, &zip)?)
    } else {
        None
    };
    let extracted = if options.extract {
        let dir = cache.extraction_dir(identifier)?;
        let listed;
        let expected = match &manifest {
            Some(manifest) => manifest.filenames.as_slice(),
            None => {
                listed = listed_filenames(&csv)?;
                listed.as_slice()
            }
        };
        extract_archive(&zip, &dir, expected)?;
        Some(dir)
    } else {
        None
    };

    Ok(LoadedAsset::StimulusSet(LoadedStimulusSet {
        identifier: identifier.to_string(),
        csv,
        zip,
        extracted,
        manifest,
    }))
}

fn orphaned(uploaded: Vec<String>, err: BrainioError) -> BrainioError {
    if uploaded.is_empty() {
        err
    } else {
        warn!(uploaded = ?uploaded, error = %err, "publish failed after upload");
        BrainioError::OrphanedUpload {
            uploaded,
            source: Box::new(err),
        }
    }
}
