//! Catalog-backed registry for BrainIO assemblies and stimulus sets.
//!
//! This crate records each asset's identifier, content hash, and remote
//! location in a per-catalog CSV table, moves files through pluggable
//! transports (`rsync`, `S3`, plain files, HTTP mirrors), and verifies
//! integrity and structure when assets are published or loaded.

pub mod assets;
pub mod catalog;
pub mod env;
pub mod error;
pub mod hash;
pub mod transport;

pub use assets::{
    Asset, AssetManager, LoadOptions, LoadedAsset, LoadedAssembly, LoadedStimulusSet, Location,
};
pub use catalog::{Catalog, CatalogEntry, CatalogStore, Lookup, LookupType};
pub use env::BrainioConfig;
pub use error::{AssetRule, BrainioError, CatalogRule, Result};
pub use hash::{Sha1Digest, sha1_file};
pub use transport::{Transport, TransportRegistry};
