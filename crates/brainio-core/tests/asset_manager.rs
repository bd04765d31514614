use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use brainio_core::assets::{
    AssemblyHeader, AttributeValue, Dimension, NetcdfInspector, Variable, write_classic,
};
use brainio_core::transport::FsTransport;
use brainio_core::{
    AssetManager, AssetRule, BrainioError, CatalogEntry, CatalogRule, CatalogStore, LoadOptions,
    Location, Lookup, LookupType, Transport, TransportRegistry, sha1_file,
};
use zip::write::FileOptions;

type Hook = Box<dyn Fn(&str) -> brainio_core::Result<()> + Send + Sync>;

/// `file` transport that counts calls and can fail or run a hook on upload.
#[derive(Clone, Default)]
struct Recording {
    uploads: Arc<AtomicUsize>,
    downloads: Arc<AtomicUsize>,
    fail_upload_suffix: Option<&'static str>,
    after_upload: Option<Arc<Hook>>,
}

impl Transport for Recording {
    fn location_type(&self) -> &str {
        "file"
    }

    fn upload(&self, local: &Path, location: &str) -> brainio_core::Result<()> {
        if self
            .fail_upload_suffix
            .is_some_and(|suffix| location.ends_with(suffix))
        {
            return Err(BrainioError::transport("file", location, "disk quota exceeded"));
        }
        FsTransport::new().upload(local, location)?;
        self.uploads.fetch_add(1, Ordering::SeqCst);
        if let Some(hook) = &self.after_upload {
            (hook.as_ref())(location)?;
        }
        Ok(())
    }

    fn download(&self, location: &str, local: &Path) -> brainio_core::Result<()> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        FsTransport::new().download(location, local)
    }
}

struct Lab {
    _dir: tempfile::TempDir,
    home: PathBuf,
    remote: PathBuf,
    work: PathBuf,
}

impl Lab {
    fn new() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let home = dir.path().join("home");
        let remote = dir.path().join("remote");
        let work = dir.path().join("work");
        fs::create_dir_all(&work)?;
        Ok(Self {
            home,
            remote,
            work,
            _dir: dir,
        })
    }

    fn manager(&self, transport: Recording) -> AssetManager {
        let mut transports = TransportRegistry::default();
        transports.register(transport);
        AssetManager::with_parts(
            CatalogStore::new(&self.home),
            transports,
            NetcdfInspector::new(),
        )
    }

    fn remote(&self, name: &str) -> String {
        self.remote.join(name).to_string_lossy().into_owned()
    }

    fn rows(&self, catalog: &str) -> Result<Vec<CatalogEntry>> {
        Ok(CatalogStore::new(&self.home).lookup(catalog, &Lookup::new())?)
    }

    fn assembly(&self, name: &str, identifier: &str, stimulus_set: &str) -> Result<PathBuf> {
        let mut attributes = BTreeMap::new();
        attributes.insert(
            "identifier".to_string(),
            AttributeValue::Text(identifier.into()),
        );
        attributes.insert(
            "stimulus_set_identifier".to_string(),
            AttributeValue::Text(stimulus_set.into()),
        );
        let header = AssemblyHeader {
            dimensions: vec![
                Dimension {
                    name: "presentation".into(),
                    len: 2,
                },
                Dimension {
                    name: "neuroid".into(),
                    len: 4,
                },
            ],
            attributes,
            variables: vec![
                Variable {
                    name: "stimulus_id".into(),
                    dimensions: vec!["presentation".into()],
                },
                Variable {
                    name: "data".into(),
                    dimensions: vec!["presentation".into(), "neuroid".into()],
                },
            ],
        };
        let path = self.work.join(name);
        write_classic(&path, &header)?;
        Ok(path)
    }

    fn stimulus_set(&self, stem: &str, csv: &str, members: &[&str]) -> Result<(PathBuf, PathBuf)> {
        let csv_path = self.work.join(format!("{stem}.csv"));
        fs::write(&csv_path, csv)?;
        let zip_path = self.work.join(format!("{stem}.zip"));
        let mut writer = zip::ZipWriter::new(File::create(&zip_path)?);
        for member in members {
            writer.start_file(*member, FileOptions::default())?;
            writer.write_all(format!("pixels of {member}").as_bytes())?;
        }
        writer.finish()?;
        Ok((csv_path, zip_path))
    }
}

const SS1_CSV: &str = "stimulus_id,filename\nimg1,img1.png\nimg2,img2.png\n";

#[test]
fn assembly_round_trip_and_cached_reload() -> Result<()> {
    let lab = Lab::new()?;
    let transport = Recording::default();
    let manager = lab.manager(transport.clone());
    let local = lab.assembly("a1.nc", "A1", "S1")?;

    let row = manager.publish_assembly("lab", &local, "file", &lab.remote("a1.nc"))?;
    assert_eq!(row.identifier, "A1");
    assert_eq!(row.lookup_type, LookupType::Assembly);
    assert_eq!(row.class, "netcdf");
    assert_eq!(row.stimulus_set_identifier, "S1");
    assert_eq!(row.sha1, sha1_file(&local)?.as_str());
    assert_eq!(lab.rows("lab")?, vec![row.clone()]);

    let loaded = manager.load_assembly("lab", "A1", &LoadOptions::default())?;
    assert_eq!(loaded.path, lab.home.join("lab/a1.nc"));
    assert_eq!(fs::read(&loaded.path)?, fs::read(&local)?);
    assert_eq!(loaded.entry, row);
    assert_eq!(loaded.metadata.map(|meta| meta.identifier), Some("A1".to_string()));
    assert_eq!(transport.downloads.load(Ordering::SeqCst), 1);

    let again = manager.load_assembly("lab", "A1", &LoadOptions::default())?;
    assert_eq!(again.path, loaded.path);
    assert_eq!(transport.downloads.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn stimulus_set_publishes_two_rows_and_extracts() -> Result<()> {
    let lab = Lab::new()?;
    let manager = lab.manager(Recording::default());
    let (csv, zip) = lab.stimulus_set("ss1", SS1_CSV, &["img1.png", "img2.png"])?;

    let rows = manager.publish_stimulus_set(
        "lab",
        "SS1",
        &csv,
        &zip,
        "file",
        &lab.remote("sets/ss1.csv"),
        &lab.remote("sets/ss1.zip"),
    )?;
    let classes: Vec<&str> = rows.iter().map(|row| row.class.as_str()).collect();
    assert_eq!(classes, ["csv", "zip"]);
    assert!(rows.iter().all(|row| row.identifier == "SS1"));
    assert!(rows.iter().all(|row| row.stimulus_set_identifier.is_empty()));
    assert_eq!(lab.rows("lab")?.len(), 2);

    let loaded = manager.load_stimulus_set("lab", "SS1", &LoadOptions::default())?;
    let extracted = loaded.extracted.expect("extraction requested");
    assert_eq!(extracted, lab.home.join("lab/extracted/SS1"));
    assert_eq!(fs::read(extracted.join("img2.png"))?, b"pixels of img2.png");
    assert_eq!(
        loaded.manifest.map(|manifest| manifest.stimulus_ids),
        Some(vec!["img1".to_string(), "img2".to_string()])
    );

    let options = LoadOptions {
        extract: false,
        ..LoadOptions::default()
    };
    let plain = manager.load_stimulus_set("lab", "SS1", &options)?;
    assert!(plain.extracted.is_none());
    assert_eq!(plain.csv, lab.home.join("lab/ss1.csv"));
    Ok(())
}

#[test]
fn missing_archive_member_fails_before_upload() -> Result<()> {
    let lab = Lab::new()?;
    let transport = Recording::default();
    let manager = lab.manager(transport.clone());
    let (csv, zip) = lab.stimulus_set("ss1", SS1_CSV, &["img1.png"])?;

    let err = manager
        .publish_stimulus_set(
            "lab",
            "SS1",
            &csv,
            &zip,
            "file",
            &lab.remote("ss1.csv"),
            &lab.remote("ss1.zip"),
        )
        .unwrap_err();
    assert_eq!(err.asset_rule(), Some(AssetRule::ArchiveMembers));
    assert_eq!(transport.uploads.load(Ordering::SeqCst), 0);
    assert!(lab.rows("lab")?.is_empty());
    Ok(())
}

#[test]
fn duplicate_publish_leaves_catalog_unchanged() -> Result<()> {
    let lab = Lab::new()?;
    let transport = Recording::default();
    let manager = lab.manager(transport.clone());
    let first = lab.assembly("a1.nc", "A1", "S1")?;
    manager.publish_assembly("lab", &first, "file", &lab.remote("a1.nc"))?;
    let before = lab.rows("lab")?;

    let second = lab.assembly("a1-v2.nc", "A1", "S2")?;
    let err = manager
        .publish_assembly("lab", &second, "file", &lab.remote("a1-v2.nc"))
        .unwrap_err();
    assert!(matches!(
        err,
        BrainioError::DuplicateEntry { ref identifier, .. } if identifier == "A1"
    ));
    assert_eq!(lab.rows("lab")?, before);
    assert_eq!(transport.uploads.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn sha1_collision_is_caught_before_upload() -> Result<()> {
    let lab = Lab::new()?;
    let transport = Recording::default();
    let manager = lab.manager(transport.clone());
    let (csv, zip) = lab.stimulus_set("ss1", SS1_CSV, &["img1.png", "img2.png"])?;
    manager.publish_stimulus_set(
        "lab",
        "SS1",
        &csv,
        &zip,
        "file",
        &lab.remote("ss1.csv"),
        &lab.remote("ss1.zip"),
    )?;

    let err = manager
        .publish_stimulus_set(
            "lab",
            "SS1copy",
            &csv,
            &zip,
            "file",
            &lab.remote("copy.csv"),
            &lab.remote("copy.zip"),
        )
        .unwrap_err();
    assert_eq!(err.catalog_rule(), Some(CatalogRule::UniqueSha1));
    assert!(!matches!(err, BrainioError::OrphanedUpload { .. }));
    assert_eq!(transport.uploads.load(Ordering::SeqCst), 2);
    assert_eq!(lab.rows("lab")?.len(), 2);
    Ok(())
}

#[test]
fn tampered_files_fail_integrity() -> Result<()> {
    let lab = Lab::new()?;
    let manager = lab.manager(Recording::default());
    let local = lab.assembly("a1.nc", "A1", "S1")?;
    manager.publish_assembly("lab", &local, "file", &lab.remote("a1.nc"))?;

    let remote = lab.remote.join("a1.nc");
    let mut bytes = fs::read(&remote)?;
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;
    fs::write(&remote, &bytes)?;

    let err = manager
        .load_assembly("lab", "A1", &LoadOptions::default())
        .unwrap_err();
    assert!(matches!(err, BrainioError::Integrity { .. }));

    let unchecked = LoadOptions {
        check_integrity: false,
        ..LoadOptions::default()
    };
    let loaded = manager.load_assembly("lab", "A1", &unchecked)?;
    assert_eq!(fs::read(&loaded.path)?, bytes);
    Ok(())
}

#[test]
fn refresh_replaces_a_corrupted_cache_entry() -> Result<()> {
    let lab = Lab::new()?;
    let transport = Recording::default();
    let manager = lab.manager(transport.clone());
    let local = lab.assembly("a1.nc", "A1", "S1")?;
    manager.publish_assembly("lab", &local, "file", &lab.remote("a1.nc"))?;

    let loaded = manager.load_assembly("lab", "A1", &LoadOptions::default())?;
    fs::write(&loaded.path, b"scribbled over")?;
    let err = manager
        .load_assembly("lab", "A1", &LoadOptions::default())
        .unwrap_err();
    assert!(matches!(err, BrainioError::Integrity { .. }));

    let refresh = LoadOptions {
        refresh: true,
        ..LoadOptions::default()
    };
    let fixed = manager.load_assembly("lab", "A1", &refresh)?;
    assert_eq!(fs::read(&fixed.path)?, fs::read(&local)?);
    assert_eq!(transport.downloads.load(Ordering::SeqCst), 2);
    Ok(())
}

#[test]
fn failed_second_upload_reports_orphan() -> Result<()> {
    let lab = Lab::new()?;
    let transport = Recording {
        fail_upload_suffix: Some(".zip"),
        ..Recording::default()
    };
    let manager = lab.manager(transport);
    let (csv, zip) = lab.stimulus_set("ss1", SS1_CSV, &["img1.png", "img2.png"])?;
    let csv_location = lab.remote("ss1.csv");

    let err = manager
        .publish_stimulus_set(
            "lab",
            "SS1",
            &csv,
            &zip,
            "file",
            &csv_location,
            &lab.remote("ss1.zip"),
        )
        .unwrap_err();
    match err {
        BrainioError::OrphanedUpload { uploaded, source } => {
            assert_eq!(uploaded, vec![csv_location.clone()]);
            assert!(matches!(*source, BrainioError::Transport { .. }));
        }
        other => panic!("expected orphaned upload, got {other}"),
    }
    assert!(Path::new(&csv_location).exists());
    assert!(lab.rows("lab")?.is_empty());
    Ok(())
}

#[test]
fn concurrent_writer_between_upload_and_append_reports_orphan() -> Result<()> {
    let lab = Lab::new()?;
    let home = lab.home.clone();
    let hook: Hook = Box::new(move |_location| {
        CatalogStore::new(&home).append(
            "lab",
            CatalogEntry {
                identifier: "A1".into(),
                lookup_type: LookupType::Assembly,
                class: "netcdf".into(),
                location_type: "file".into(),
                location: "/elsewhere/a1.nc".into(),
                sha1: "0".repeat(40),
                stimulus_set_identifier: "S1".into(),
            },
        )?;
        Ok(())
    });
    let transport = Recording {
        after_upload: Some(Arc::new(hook)),
        ..Recording::default()
    };
    let manager = lab.manager(transport);
    let local = lab.assembly("a1.nc", "A1", "S1")?;
    let location = lab.remote("a1.nc");

    let err = manager
        .publish_assembly("lab", &local, "file", &location)
        .unwrap_err();
    assert_eq!(err.catalog_rule(), Some(CatalogRule::AssemblyRows));
    assert!(matches!(
        err,
        BrainioError::OrphanedUpload { ref uploaded, .. } if uploaded == &vec![location.clone()]
    ));
    let rows = lab.rows("lab")?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].location, "/elsewhere/a1.nc");
    Ok(())
}

#[test]
fn unknown_location_type_fails_before_any_io() -> Result<()> {
    let lab = Lab::new()?;
    let manager = lab.manager(Recording::default());
    let local = lab.assembly("a1.nc", "A1", "S1")?;

    let err = manager
        .publish_assembly("lab", &local, "ftp", "ftp://mirror/a1.nc")
        .unwrap_err();
    assert!(matches!(err, BrainioError::UnsupportedTransport { .. }));
    assert!(!lab.home.join("lab").exists());
    Ok(())
}

#[test]
fn load_reports_unknown_identifier() -> Result<()> {
    let lab = Lab::new()?;
    let manager = lab.manager(Recording::default());
    let err = manager
        .load_stimulus_set("lab", "SS9", &LoadOptions::default())
        .unwrap_err();
    assert!(matches!(
        err,
        BrainioError::NotFound { lookup_type: LookupType::StimulusSet, ref identifier, .. }
            if identifier == "SS9"
    ));
    Ok(())
}

#[test]
fn location_shape_must_match_asset_kind() -> Result<()> {
    let lab = Lab::new()?;
    let manager = lab.manager(Recording::default());
    let local = lab.assembly("a1.nc", "A1", "S1")?;
    let err = manager
        .publish(
            "lab",
            &brainio_core::Asset::Assembly { path: local },
            "file",
            &Location::Pair {
                csv: lab.remote("a.csv"),
                zip: lab.remote("a.zip"),
            },
        )
        .unwrap_err();
    assert!(matches!(err, BrainioError::InvalidRequest { .. }));
    Ok(())
}

#[test]
fn invalid_assembly_is_rejected_with_rule() -> Result<()> {
    let lab = Lab::new()?;
    let transport = Recording::default();
    let manager = lab.manager(transport.clone());
    let local = lab.work.join("broken.nc");
    fs::write(&local, b"\x89HDF\r\n\x1a\nnot really hdf5")?;

    let err = manager
        .publish_assembly("lab", &local, "file", &lab.remote("broken.nc"))
        .unwrap_err();
    assert_eq!(err.asset_rule(), Some(AssetRule::Container));
    assert_eq!(transport.uploads.load(Ordering::SeqCst), 0);
    Ok(())
}

#[test]
fn unvalidated_load_restores_missing_stimuli() -> Result<()> {
    let lab = Lab::new()?;
    let manager = lab.manager(Recording::default());
    let (csv, zip) = lab.stimulus_set("ss1", SS1_CSV, &["img1.png", "img2.png"])?;
    manager.publish_stimulus_set(
        "lab",
        "SS1",
        &csv,
        &zip,
        "file",
        &lab.remote("ss1.csv"),
        &lab.remote("ss1.zip"),
    )?;
    let extracted = manager
        .load_stimulus_set("lab", "SS1", &LoadOptions::default())?
        .extracted
        .expect("extraction requested");
    fs::remove_file(extracted.join("img1.png"))?;

    let options = LoadOptions {
        validate: false,
        ..LoadOptions::default()
    };
    let loaded = manager.load_stimulus_set("lab", "SS1", &options)?;
    assert!(loaded.manifest.is_none());
    assert_eq!(loaded.extracted.as_ref(), Some(&extracted));
    assert_eq!(fs::read(extracted.join("img1.png"))?, b"pixels of img1.png");
    Ok(())
}

#[test]
fn stimulus_locations_must_not_share_a_cache_name() -> Result<()> {
    let lab = Lab::new()?;
    let transport = Recording::default();
    let manager = lab.manager(transport.clone());
    let (csv, zip) = lab.stimulus_set("ss1", SS1_CSV, &["img1.png", "img2.png"])?;

    for (csv_location, zip_location) in [
        (lab.remote("csv/ss1"), lab.remote("zip/ss1")),
        (lab.remote("ss1.bin"), lab.remote("ss1.bin")),
    ] {
        let err = manager
            .publish_stimulus_set("lab", "SS1", &csv, &zip, "file", &csv_location, &zip_location)
            .unwrap_err();
        assert!(matches!(err, BrainioError::InvalidRequest { .. }), "{err}");
    }
    assert_eq!(transport.uploads.load(Ordering::SeqCst), 0);
    assert!(lab.rows("lab")?.is_empty());
    Ok(())
}

#[test]
fn mixed_publishes_keep_catalog_invariants() -> Result<()> {
    let lab = Lab::new()?;
    let manager = lab.manager(Recording::default());

    let a1 = lab.assembly("a1.nc", "A1", "SS1")?;
    manager.publish_assembly("lab", &a1, "file", &lab.remote("a1.nc"))?;
    let (csv, zip) = lab.stimulus_set("ss1", SS1_CSV, &["img1.png", "img2.png"])?;
    manager.publish_stimulus_set(
        "lab",
        "SS1",
        &csv,
        &zip,
        "file",
        &lab.remote("ss1.csv"),
        &lab.remote("ss1.zip"),
    )?;
    let a2 = lab.assembly("a2.nc", "A2", "SS1")?;
    manager.publish_assembly("lab", &a2, "file", &lab.remote("a2.nc"))?;

    // Rejected attempts in between must not disturb the table.
    assert!(
        manager
            .publish_assembly("lab", &a1, "file", &lab.remote("a1-again.nc"))
            .is_err()
    );
    let (csv2, zip2) = lab.stimulus_set(
        "ss2",
        "stimulus_id,filename\nimg3,img3.png\n",
        &["img3.png"],
    )?;
    assert!(
        manager
            .publish_stimulus_set(
                "lab",
                "SS2",
                &csv2,
                &zip,
                "file",
                &lab.remote("ss2.csv"),
                &lab.remote("ss2.zip"),
            )
            .is_err()
    );
    manager.publish_stimulus_set(
        "lab",
        "SS2",
        &csv2,
        &zip2,
        "file",
        &lab.remote("ss2.csv"),
        &lab.remote("ss2.zip"),
    )?;
    let a3 = lab.assembly("a3.nc", "A3", "SS2")?;
    manager.publish_assembly("lab", &a3, "file", &lab.remote("a3.nc"))?;

    let catalog = CatalogStore::new(&lab.home).load("lab")?;
    let entries = catalog.entries();
    let mut rows_per_identifier: BTreeMap<(&str, LookupType), Vec<&str>> = BTreeMap::new();
    for entry in entries {
        rows_per_identifier
            .entry((entry.identifier.as_str(), entry.lookup_type))
            .or_default()
            .push(entry.class.as_str());
    }
    assert_eq!(rows_per_identifier.len(), 5);
    for ((identifier, lookup_type), mut classes) in rows_per_identifier {
        classes.sort_unstable();
        match lookup_type {
            LookupType::Assembly => assert_eq!(classes, ["netcdf"], "{identifier}"),
            LookupType::StimulusSet => assert_eq!(classes, ["csv", "zip"], "{identifier}"),
        }
    }
    let mut hashes: Vec<&str> = entries.iter().map(|entry| entry.sha1.as_str()).collect();
    hashes.sort_unstable();
    hashes.dedup();
    assert_eq!(hashes.len(), entries.len());
    assert_eq!(entries.len(), 7);
    Ok(())
}
