use std::collections::{BTreeSet, HashSet};
use std::fs::{self, File};
use std::path::Path;

use serde::Serialize;
use tracing::debug;
use zip::ZipArchive;

use crate::error::{AssetRule, BrainioError, Result};

pub const STIMULUS_ID_COLUMN: &str = "stimulus_id";
pub const FILENAME_COLUMN: &str = "filename";

/// Stimulus identifiers and archive member names listed by the metadata table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StimulusSetManifest {
    pub stimulus_ids: Vec<String>,
    pub filenames: Vec<String>,
}

/// Checks the metadata table and that every listed `filename` is an archive member.
pub fn validate_stimulus_set(csv: &Path, zip: &Path) -> Result<StimulusSetManifest> {
    let manifest = read_manifest(csv)?;
    let members = archive_members(zip)?;
    let missing: Vec<&str> = manifest
        .filenames
        .iter()
        .map(String::as_str)
        .filter(|name| !members.contains(*name))
        .collect();
    if !missing.is_empty() {
        return Err(BrainioError::asset(
            AssetRule::ArchiveMembers,
            format!(
                "{} listed file(s) missing from {}: {}",
                missing.len(),
                zip.display(),
                missing.join(", ")
            ),
        ));
    }
    Ok(manifest)
}

/// Parses and validates the metadata table on its own.
pub fn read_manifest(csv: &Path) -> Result<StimulusSetManifest> {
    let mut reader = csv::Reader::from_path(csv).map_err(|err| metadata(csv, err))?;
    let headers: Vec<String> = reader
        .headers()
        .map_err(|err| metadata(csv, err))?
        .iter()
        .map(str::to_string)
        .collect();

    let mut seen = HashSet::new();
    for header in &headers {
        if !seen.insert(header.as_str()) {
            return Err(BrainioError::asset(
                AssetRule::MetadataColumnsUnique,
                format!("column `{header}` appears more than once"),
            ));
        }
    }
    if let Some(bad) = headers.iter().find(|header| !is_column_name(header)) {
        return Err(BrainioError::asset(
            AssetRule::MetadataColumnName,
            format!("column `{bad}` may only contain lowercase letters, digits, and underscores"),
        ));
    }
    let id_index = column_index(&headers, STIMULUS_ID_COLUMN)?;
    let filename_index = column_index(&headers, FILENAME_COLUMN)?;

    let mut stimulus_ids = Vec::new();
    let mut filenames = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|err| metadata(csv, err))?;
        stimulus_ids.push(record.get(id_index).unwrap_or_default().to_string());
        filenames.push(record.get(filename_index).unwrap_or_default().to_string());
    }

    ensure_unique(STIMULUS_ID_COLUMN, &stimulus_ids)?;
    ensure_unique(FILENAME_COLUMN, &filenames)?;
    if let Some(bad) = stimulus_ids
        .iter()
        .find(|id| id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric()))
    {
        return Err(BrainioError::asset(
            AssetRule::AlphanumericStimulusId,
            format!("stimulus_id `{bad}` is not alphanumeric"),
        ));
    }

    Ok(StimulusSetManifest {
        stimulus_ids,
        filenames,
    })
}

pub fn archive_members(zip: &Path) -> Result<BTreeSet<String>> {
    let archive = open_archive(zip)?;
    Ok(archive.file_names().map(str::to_string).collect())
}

/// Reads just the `filename` column, without enforcing the metadata rules.
pub fn listed_filenames(csv: &Path) -> Result<Vec<String>> {
    let mut reader = csv::Reader::from_path(csv).map_err(|err| metadata(csv, err))?;
    let headers: Vec<String> = reader
        .headers()
        .map_err(|err| metadata(csv, err))?
        .iter()
        .map(str::to_string)
        .collect();
    let index = column_index(&headers, FILENAME_COLUMN)?;
    let mut filenames = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|err| metadata(csv, err))?;
        filenames.push(record.get(index).unwrap_or_default().to_string());
    }
    Ok(filenames)
}

/// Unpacks `zip` into `dir` unless `dir` already holds every expected file.
///
/// Returns whether anything was extracted.
pub fn extract_archive(zip: &Path, dir: &Path, expected: &[String]) -> Result<bool> {
    let needed = !dir.is_dir() || expected.iter().any(|name| !dir.join(name).is_file());
    if !needed {
        debug!(dir = %dir.display(), "stimuli already extracted");
        return Ok(false);
    }
    fs::create_dir_all(dir).map_err(|err| BrainioError::io(dir, err))?;
    let mut archive = open_archive(zip)?;
    archive.extract(dir).map_err(|err| {
        BrainioError::asset(
            AssetRule::Archive,
            format!("failed to extract {}: {err}", zip.display()),
        )
    })?;
    debug!(zip = %zip.display(), dir = %dir.display(), "extracted stimuli");
    Ok(true)
}

fn open_archive(zip: &Path) -> Result<ZipArchive<File>> {
    let file = File::open(zip).map_err(|err| BrainioError::io(zip, err))?;
    ZipArchive::new(file).map_err(|err| {
        BrainioError::asset(
            AssetRule::Archive,
            format!("{} is not a readable ZIP archive: {err}", zip.display()),
        )
    })
}

fn is_column_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

fn column_index(headers: &[String], column: &str) -> Result<usize> {
    headers
        .iter()
        .position(|header| header == column)
        .ok_or_else(|| {
            BrainioError::asset(
                AssetRule::MissingColumn,
                format!("`{column}` must be a column of the metadata table"),
            )
        })
}

fn ensure_unique(column: &str, values: &[String]) -> Result<()> {
    let mut seen = HashSet::with_capacity(values.len());
    match values.iter().find(|value| !seen.insert(value.as_str())) {
        Some(repeated) => Err(BrainioError::asset(
            AssetRule::UniqueValues,
            format!("`{column}` value `{repeated}` appears more than once"),
        )),
        None => Ok(()),
    }
}

fn metadata(csv: &Path, err: csv::Error) -> BrainioError {
    BrainioError::asset(
        AssetRule::Metadata,
        format!("failed to read {}: {err}", csv.display()),
    )
}
