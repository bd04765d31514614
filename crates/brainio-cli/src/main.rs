use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::Context;
use brainio_core::{
    AssetManager, BrainioConfig, CatalogEntry, CatalogStore, LoadOptions, LoadedAsset, Lookup,
    LookupType,
};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "brainio", about = "Publish and load BrainIO assemblies and stimulus sets")]
struct Cli {
    /// Base directory for catalogs and caches (overrides BRAINIO_HOME)
    #[arg(long, global = true, value_name = "DIR")]
    home: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create an empty catalog
    Create { catalog: String },

    /// Copy an existing catalog table in after validating it
    Import { catalog: String, source: PathBuf },

    /// Print catalog rows matching the given filters
    Lookup {
        catalog: String,
        #[arg(long)]
        identifier: Option<String>,
        /// `assembly` or `stimulus_set`
        #[arg(long)]
        lookup_type: Option<String>,
        #[arg(long)]
        class: Option<String>,
        #[arg(long)]
        json: bool,
    },

    /// Validate, upload, and register an assembly file
    PublishAssembly {
        catalog: String,
        path: PathBuf,
        #[arg(long)]
        location_type: String,
        #[arg(long)]
        location: String,
    },

    /// Validate, upload, and register a stimulus set (metadata CSV plus ZIP)
    PublishStimulusSet {
        catalog: String,
        identifier: String,
        csv: PathBuf,
        zip: PathBuf,
        #[arg(long)]
        location_type: String,
        #[arg(long)]
        csv_location: String,
        #[arg(long)]
        zip_location: String,
    },

    /// Fetch an assembly into the local cache and print its path
    LoadAssembly {
        catalog: String,
        identifier: String,
        #[command(flatten)]
        load: LoadFlags,
    },

    /// Fetch a stimulus set into the local cache and print its paths
    LoadStimulusSet {
        catalog: String,
        identifier: String,
        #[command(flatten)]
        load: LoadFlags,
    },
}

#[derive(Debug, Args)]
struct LoadFlags {
    /// Skip the sha1 comparison against the catalog
    #[arg(long)]
    no_check_integrity: bool,
    /// Skip structural validation of the cached files
    #[arg(long)]
    no_validate: bool,
    /// Discard cached copies and download again
    #[arg(long)]
    refresh: bool,
    /// Do not unpack stimulus archives
    #[arg(long)]
    no_extract: bool,
    #[arg(long)]
    json: bool,
}

impl LoadFlags {
    fn options(&self) -> LoadOptions {
        LoadOptions {
            check_integrity: !self.no_check_integrity,
            validate: !self.no_validate,
            refresh: self.refresh,
            extract: !self.no_extract,
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let stdout = io::stdout();
    if let Err(err) = run(cli, &mut stdout.lock()) {
        tracing::error!(error = %format!("{err:#}"), "brainio failed");
        std::process::exit(1);
    }
}

fn run(cli: Cli, out: &mut impl Write) -> anyhow::Result<()> {
    let cfg =
        BrainioConfig::from_env_with_home(cli.home).context("failed to read configuration")?;
    tracing::debug!(home = %cfg.home.display(), "using brainio home");

    match cli.command {
        Command::Create { catalog } => {
            let path = CatalogStore::new(&cfg.home).create(&catalog)?;
            writeln!(out, "{}", path.display())?;
        }
        Command::Import { catalog, source } => {
            let path = CatalogStore::new(&cfg.home)
                .import(&catalog, &source)
                .with_context(|| format!("failed to import {}", source.display()))?;
            writeln!(out, "{}", path.display())?;
        }
        Command::Lookup {
            catalog,
            identifier,
            lookup_type,
            class,
            json,
        } => {
            let query = Lookup {
                identifier,
                lookup_type: lookup_type
                    .as_deref()
                    .map(str::parse::<LookupType>)
                    .transpose()?,
                class,
            };
            let rows = CatalogStore::new(&cfg.home).lookup(&catalog, &query)?;
            if json {
                serde_json::to_writer_pretty(&mut *out, &rows)?;
                writeln!(out)?;
            } else {
                for row in &rows {
                    write_row(out, row)?;
                }
            }
        }
        Command::PublishAssembly {
            catalog,
            path,
            location_type,
            location,
        } => {
            let manager = AssetManager::new(&cfg)?;
            let row = manager
                .publish_assembly(&catalog, &path, &location_type, &location)
                .with_context(|| format!("failed to publish {}", path.display()))?;
            write_row(out, &row)?;
        }
        Command::PublishStimulusSet {
            catalog,
            identifier,
            csv,
            zip,
            location_type,
            csv_location,
            zip_location,
        } => {
            let manager = AssetManager::new(&cfg)?;
            let rows = manager
                .publish_stimulus_set(
                    &catalog,
                    &identifier,
                    &csv,
                    &zip,
                    &location_type,
                    &csv_location,
                    &zip_location,
                )
                .with_context(|| format!("failed to publish stimulus set {identifier}"))?;
            for row in &rows {
                write_row(out, row)?;
            }
        }
        Command::LoadAssembly {
            catalog,
            identifier,
            load,
        } => {
            let manager = AssetManager::new(&cfg)?;
            let loaded = manager.load(&catalog, &identifier, LookupType::Assembly, &load.options())?;
            write_loaded(out, &loaded, load.json)?;
        }
        Command::LoadStimulusSet {
            catalog,
            identifier,
            load,
        } => {
            let manager = AssetManager::new(&cfg)?;
            let loaded =
                manager.load(&catalog, &identifier, LookupType::StimulusSet, &load.options())?;
            write_loaded(out, &loaded, load.json)?;
        }
    }
    Ok(())
}

fn write_row(out: &mut impl Write, row: &CatalogEntry) -> io::Result<()> {
    writeln!(
        out,
        "{}\t{}\t{}\t{}\t{}\t{}\t{}",
        row.identifier,
        row.lookup_type,
        row.class,
        row.location_type,
        row.location,
        row.sha1,
        row.stimulus_set_identifier
    )
}

fn write_loaded(out: &mut impl Write, loaded: &LoadedAsset, json: bool) -> anyhow::Result<()> {
    if json {
        serde_json::to_writer_pretty(&mut *out, loaded)?;
        writeln!(out)?;
        return Ok(());
    }
    match loaded {
        LoadedAsset::Assembly(assembly) => writeln!(out, "{}", assembly.path.display())?,
        LoadedAsset::StimulusSet(set) => {
            writeln!(out, "csv\t{}", set.csv.display())?;
            writeln!(out, "zip\t{}", set.zip.display())?;
            if let Some(dir) = &set.extracted {
                writeln!(out, "extracted\t{}", dir.display())?;
            }
        }
    }
    Ok(())
}
