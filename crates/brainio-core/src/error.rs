//! Error kinds surfaced by the catalog, transports, validators, and the asset manager.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::catalog::LookupType;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, BrainioError>;

#[derive(Debug, Error)]
pub enum BrainioError {
    #[error("{lookup_type} `{identifier}` not found in catalog `{catalog}`")]
    NotFound {
        catalog: String,
        lookup_type: LookupType,
        identifier: String,
    },

    #[error("{lookup_type} `{identifier}` (class `{class}`) already exists in catalog `{catalog}`")]
    DuplicateEntry {
        catalog: String,
        lookup_type: LookupType,
        identifier: String,
        class: String,
    },

    #[error("catalog violates `{rule}`{}: {detail}", key_suffix(.key))]
    CatalogConsistency {
        rule: CatalogRule,
        key: Option<String>,
        detail: String,
    },

    #[error("asset violates `{rule}`: {detail}")]
    AssetFormat { rule: AssetRule, detail: String },

    #[error("sha1 mismatch for {}: catalog has {expected}, file has {actual}", .path.display())]
    Integrity {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("{location_type} transport failed for `{location}`: {source}")]
    Transport {
        location_type: String,
        location: String,
        #[source]
        source: BoxError,
    },

    #[error("location_type `{location_type}` is unsupported")]
    UnsupportedTransport { location_type: String },

    #[error("catalog `{catalog}` already exists at {}", .path.display())]
    AlreadyExists { catalog: String, path: PathBuf },

    #[error("publish failed after uploading {}; remote copies are orphaned: {source}", .uploaded.join(", "))]
    OrphanedUpload {
        uploaded: Vec<String>,
        #[source]
        source: Box<BrainioError>,
    },

    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("configuration error: {reason}")]
    Config { reason: String },

    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl BrainioError {
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn transport(
        location_type: impl Into<String>,
        location: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::Transport {
            location_type: location_type.into(),
            location: location.into(),
            source: source.into(),
        }
    }

    pub fn catalog(rule: CatalogRule, key: Option<String>, detail: impl Into<String>) -> Self {
        Self::CatalogConsistency {
            rule,
            key,
            detail: detail.into(),
        }
    }

    pub fn asset(rule: AssetRule, detail: impl Into<String>) -> Self {
        Self::AssetFormat {
            rule,
            detail: detail.into(),
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    /// Rule that failed, when this is a catalog consistency error.
    pub fn catalog_rule(&self) -> Option<CatalogRule> {
        match self {
            Self::CatalogConsistency { rule, .. } => Some(*rule),
            Self::OrphanedUpload { source, .. } => source.catalog_rule(),
            _ => None,
        }
    }

    /// Rule that failed, when this is an asset format error.
    pub fn asset_rule(&self) -> Option<AssetRule> {
        match self {
            Self::AssetFormat { rule, .. } => Some(*rule),
            _ => None,
        }
    }
}

fn key_suffix(key: &Option<String>) -> String {
    key.as_deref()
        .map(|key| format!(" at `{key}`"))
        .unwrap_or_default()
}

/// Catalog invariants, named so callers can assert on which one failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CatalogRule {
    /// Header row is not exactly the seven catalog columns.
    ColumnSet,
    /// A header is not lowercase alphanumeric/underscore.
    ColumnName,
    /// A sha1 value is not 40 hex characters.
    Sha1Format,
    UniqueSha1,
    LookupType,
    /// More or fewer than one row for an assembly identifier.
    AssemblyRows,
    /// Not exactly one `csv` and one `zip` row for a stimulus set identifier.
    StimulusSetRows,
    /// The table file could not be parsed as delimited text.
    Malformed,
}

impl CatalogRule {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ColumnSet => "column-set",
            Self::ColumnName => "column-name",
            Self::Sha1Format => "sha1-format",
            Self::UniqueSha1 => "unique-sha1",
            Self::LookupType => "lookup-type",
            Self::AssemblyRows => "assembly-rows",
            Self::StimulusSetRows => "stimulus-set-rows",
            Self::Malformed => "malformed",
        }
    }
}

impl fmt::Display for CatalogRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structural rules for assemblies and stimulus sets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AssetRule {
    /// The assembly container could not be decoded.
    Container,
    /// A required global attribute is missing or not a string.
    GlobalAttribute,
    PresentationDimension,
    StimulusIdCoordinate,
    /// The metadata table could not be parsed.
    Metadata,
    MetadataColumnName,
    MetadataColumnsUnique,
    MissingColumn,
    UniqueValues,
    AlphanumericStimulusId,
    /// The archive could not be opened.
    Archive,
    ArchiveMembers,
}

impl AssetRule {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Container => "container",
            Self::GlobalAttribute => "global-attribute",
            Self::PresentationDimension => "presentation-dimension",
            Self::StimulusIdCoordinate => "stimulus-id-coordinate",
            Self::Metadata => "metadata",
            Self::MetadataColumnName => "metadata-column-name",
            Self::MetadataColumnsUnique => "metadata-columns-unique",
            Self::MissingColumn => "missing-column",
            Self::UniqueValues => "unique-values",
            Self::AlphanumericStimulusId => "alphanumeric-stimulus-id",
            Self::Archive => "archive",
            Self::ArchiveMembers => "archive-members",
        }
    }
}

impl fmt::Display for AssetRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
