use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::table::COLUMNS;
use super::{CatalogEntry, LookupType};
use crate::error::{BrainioError, CatalogRule, Result};
use crate::hash::Sha1Digest;

/// Header row must be exactly the seven catalog columns, each a lowercase
/// identifier, with no repeats.
pub fn validate_columns(columns: &[String]) -> Result<()> {
    for column in columns {
        if column.is_empty()
            || !column
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            return Err(BrainioError::catalog(
                CatalogRule::ColumnName,
                Some(column.clone()),
                "column headers may only contain lowercase letters, digits, and underscores",
            ));
        }
    }

    let mut seen = BTreeSet::new();
    for column in columns {
        if !seen.insert(column.as_str()) {
            return Err(BrainioError::catalog(
                CatalogRule::ColumnSet,
                Some(column.clone()),
                "column headers must be unique",
            ));
        }
    }

    let expected: BTreeSet<&str> = COLUMNS.into_iter().collect();
    if let Some(missing) = expected.difference(&seen).next() {
        return Err(BrainioError::catalog(
            CatalogRule::ColumnSet,
            Some((*missing).to_string()),
            "required column is missing",
        ));
    }
    if let Some(extra) = seen.difference(&expected).next() {
        return Err(BrainioError::catalog(
            CatalogRule::ColumnSet,
            Some((*extra).to_string()),
            "unexpected column",
        ));
    }
    Ok(())
}

/// Row-level invariants: sha1 shape and uniqueness, one row per assembly,
/// one `csv` plus one `zip` row per stimulus set.
pub fn validate_entries(entries: &[CatalogEntry]) -> Result<()> {
    let mut hashes: HashMap<String, &str> = HashMap::with_capacity(entries.len());
    for entry in entries {
        if Sha1Digest::parse(&entry.sha1).is_none() {
            return Err(BrainioError::catalog(
                CatalogRule::Sha1Format,
                Some(entry.identifier.clone()),
                format!("`{}` is not a 40-character hex sha1", entry.sha1),
            ));
        }
        let normalised = entry.sha1.to_ascii_lowercase();
        if let Some(previous) = hashes.insert(normalised, entry.identifier.as_str()) {
            return Err(BrainioError::catalog(
                CatalogRule::UniqueSha1,
                Some(entry.sha1.clone()),
                format!(
                    "sha1 shared by `{previous}` and `{}`",
                    entry.identifier
                ),
            ));
        }
    }

    let mut assemblies: BTreeMap<&str, usize> = BTreeMap::new();
    let mut stimulus_sets: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for entry in entries {
        match entry.lookup_type {
            LookupType::Assembly => *assemblies.entry(entry.identifier.as_str()).or_default() += 1,
            LookupType::StimulusSet => stimulus_sets
                .entry(entry.identifier.as_str())
                .or_default()
                .push(entry.class.as_str()),
        }
    }

    if let Some((identifier, count)) = assemblies.iter().find(|(_, count)| **count != 1) {
        return Err(BrainioError::catalog(
            CatalogRule::AssemblyRows,
            Some((*identifier).to_string()),
            format!("expected exactly one row, found {count}"),
        ));
    }

    for (identifier, classes) in &stimulus_sets {
        let mut sorted = classes.clone();
        sorted.sort_unstable();
        if sorted != ["csv", "zip"] {
            return Err(BrainioError::catalog(
                CatalogRule::StimulusSetRows,
                Some((*identifier).to_string()),
                format!(
                    "expected one `csv` and one `zip` row, found [{}]",
                    classes.join(", ")
                ),
            ));
        }
    }
    Ok(())
}
