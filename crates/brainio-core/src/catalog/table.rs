use std::fs;
use std::io::Read;
use std::path::Path;

use serde::Deserialize;

use super::{CatalogEntry, LookupType, validate};
use crate::error::{BrainioError, CatalogRule, Result};

pub(crate) const COLUMNS: [&str; 7] = [
    "identifier",
    "lookup_type",
    "class",
    "location_type",
    "location",
    "sha1",
    "stimulus_set_identifier",
];

/// Row as it sits on disk, before `lookup_type` is checked.
#[derive(Deserialize)]
struct RawRow {
    identifier: String,
    lookup_type: String,
    class: String,
    location_type: String,
    location: String,
    sha1: String,
    #[serde(default)]
    stimulus_set_identifier: String,
}

impl RawRow {
    fn into_entry(self) -> Result<CatalogEntry> {
        let lookup_type = self.lookup_type.parse::<LookupType>().map_err(|_| {
            BrainioError::catalog(
                CatalogRule::LookupType,
                Some(self.identifier.clone()),
                format!(
                    "lookup_type `{}` must be `assembly` or `stimulus_set`",
                    self.lookup_type
                ),
            )
        })?;
        Ok(CatalogEntry {
            identifier: self.identifier,
            lookup_type,
            class: self.class,
            location_type: self.location_type,
            location: self.location,
            sha1: self.sha1,
            stimulus_set_identifier: self.stimulus_set_identifier,
        })
    }
}

/// Reads and fully validates the table at `path`.
pub(crate) fn read(path: &Path) -> Result<Vec<CatalogEntry>> {
    let file = fs::File::open(path).map_err(|err| BrainioError::io(path, err))?;
    read_from(file)
}

pub(crate) fn read_from<R: Read>(reader: R) -> Result<Vec<CatalogEntry>> {
    let mut reader = csv::Reader::from_reader(reader);
    let headers = reader.headers().map_err(malformed)?.clone();
    let columns: Vec<String> = headers.iter().map(str::to_string).collect();
    validate::validate_columns(&columns)?;

    let mut entries = Vec::new();
    for record in reader.deserialize::<RawRow>() {
        entries.push(record.map_err(malformed)?.into_entry()?);
    }
    validate::validate_entries(&entries)?;
    Ok(entries)
}

/// Rewrites the table at `path` via a sibling temp file and rename.
pub(crate) fn write(path: &Path, entries: &[CatalogEntry]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| BrainioError::io(parent, err))?;
    }
    let tmp = path.with_extension("csv.tmp");
    {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(&tmp)
            .map_err(|err| csv_io(&tmp, err))?;
        writer
            .write_record(COLUMNS)
            .map_err(|err| csv_io(&tmp, err))?;
        for entry in entries {
            writer.serialize(entry).map_err(|err| csv_io(&tmp, err))?;
        }
        writer
            .flush()
            .map_err(|err| BrainioError::io(&tmp, err))?;
    }
    fs::rename(&tmp, path).map_err(|err| BrainioError::io(path, err))
}

fn malformed(err: csv::Error) -> BrainioError {
    let key = err
        .position()
        .map(|position| format!("line {}", position.line()));
    BrainioError::catalog(CatalogRule::Malformed, key, err.to_string())
}

fn csv_io(path: &Path, err: csv::Error) -> BrainioError {
    match err.into_kind() {
        csv::ErrorKind::Io(io) => BrainioError::io(path, io),
        other => BrainioError::io(path, std::io::Error::other(format!("{other:?}"))),
    }
}
