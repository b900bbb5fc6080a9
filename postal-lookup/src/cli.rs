//! Définition et implémentation des commandes CLI
//!
//! - `load`: GeoJSON → PostgreSQL (ou script SQL, ou mémoire)
//! - `convert`: extrait OSM `.osm.pbf` → GeoJSON (via osmium)
//! - `run`: convert puis load

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use tracing::info;

use postal_lookup::convert::{geojson_path_for, ConversionOutcome, Converter, OsmiumConverter};
use postal_lookup::sink::{DatabaseConfig, SinkTarget};
use postal_lookup::{run_pipeline, PipelineConfig};

#[derive(Subcommand)]
pub enum Commands {
    /// Load a GeoJSON export into the postal_lookup table
    Load {
        /// GeoJSON FeatureCollection (osmium export output)
        #[arg(short, long)]
        input: Option<PathBuf>,

        #[command(flatten)]
        options: LoadOptions,
    },

    /// Convert an OSM extract (.osm.pbf) to GeoJSON with osmium
    Convert {
        /// OSM extract (.osm.pbf)
        #[arg(short, long)]
        input: PathBuf,

        /// GeoJSON output file (skipped if it already exists)
        #[arg(short, long)]
        output: PathBuf,

        /// osmium executable
        #[arg(long, default_value = "osmium")]
        osmium: PathBuf,
    },

    /// Convert an OSM extract then load it
    Run {
        /// OSM extract (.osm.pbf)
        #[arg(short, long)]
        input: PathBuf,

        /// Directory for the intermediate GeoJSON
        #[arg(short, long, default_value = "data/geojson")]
        workdir: PathBuf,

        /// osmium executable
        #[arg(long, default_value = "osmium")]
        osmium: PathBuf,

        #[command(flatten)]
        options: LoadOptions,
    },
}

/// Options communes au chargement
#[derive(Args, Debug, Default)]
pub struct LoadOptions {
    /// JSON pipeline configuration (flags override its values)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Write a SQL script instead of loading into the database
    #[arg(long, conflicts_with = "memory")]
    pub script: Option<PathBuf>,

    /// Dry run: load into memory only
    #[arg(long)]
    pub memory: bool,

    /// Records per transaction (défaut : 1000)
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Property holding the postal code (défaut : addr:postcode)
    #[arg(long)]
    pub postal_key: Option<String>,

    /// Log progress every N features (défaut : 50000, 0 = never)
    #[arg(long)]
    pub progress_every: Option<u64>,

    /// Reload even if this source was already loaded
    #[arg(long)]
    pub force: bool,

    /// Save the run report as JSON
    #[arg(long)]
    pub report: Option<PathBuf>,

    #[command(flatten)]
    pub db: DbArgs,
}

/// Connexion PostgreSQL (prioritaire sur l'environnement)
#[derive(Args, Debug, Default)]
pub struct DbArgs {
    /// PostgreSQL host (défaut : env DB_HOST / PGHOST / localhost)
    #[arg(long)]
    pub host: Option<String>,

    /// PostgreSQL database name (défaut : env DB_NAME / PGDATABASE / osm)
    #[arg(long)]
    pub database: Option<String>,

    /// PostgreSQL user (défaut : env DB_USER / PGUSER / osmuser)
    #[arg(long)]
    pub user: Option<String>,

    /// PostgreSQL password (défaut : env DB_PASS / PGPASSWORD)
    #[arg(long)]
    pub password: Option<String>,

    /// PostgreSQL port (défaut : env DB_PORT / PGPORT / 5432)
    #[arg(long)]
    pub port: Option<u16>,

    /// SSL mode: disable, prefer, require (défaut : env PGSSLMODE / disable)
    #[arg(long)]
    pub ssl: Option<String>,
}

/// Exécute la commande load
pub async fn cmd_load(input: Option<PathBuf>, options: LoadOptions) -> Result<()> {
    let config = build_config(input, &options)?;

    info!(
        input = %config.input.display(),
        sink = %config.sink.describe(),
        batch_size = config.batch_size,
        postal_key = %config.postal_key,
        force = config.force,
        "Loading postal codes"
    );

    let report = run_pipeline(config).await;
    report.display();

    if let Some(ref path) = options.report {
        report
            .save_to_file(path)
            .with_context(|| format!("Failed to save report to {}", path.display()))?;
        info!(path = %path.display(), "Report saved");
    }

    if !report.is_success() {
        bail!(
            "Load failed: {}",
            report.error.as_deref().unwrap_or("unknown error")
        );
    }

    info!("{}", report.summary());
    Ok(())
}

/// Exécute la commande convert
pub async fn cmd_convert(input: &Path, output: &Path, osmium: &Path) -> Result<()> {
    let converter = OsmiumConverter::with_binary(osmium);
    let outcome = converter
        .convert(input, output)
        .await
        .with_context(|| format!("Failed to convert {}", input.display()))?;

    if outcome == ConversionOutcome::AlreadyPresent {
        info!(output = %output.display(), "Conversion skipped");
    }
    Ok(())
}

/// Exécute la commande run (convert puis load)
pub async fn cmd_run(
    input: &Path,
    workdir: &Path,
    osmium: &Path,
    options: LoadOptions,
) -> Result<()> {
    let geojson = geojson_path_for(input, workdir);
    cmd_convert(input, &geojson, osmium).await?;
    cmd_load(Some(geojson), options).await
}

/// Construit la configuration : fichier JSON, puis options de la ligne de commande
fn build_config(input: Option<PathBuf>, options: &LoadOptions) -> Result<PipelineConfig> {
    let mut config = match options.config {
        Some(ref path) => PipelineConfig::load(path)
            .with_context(|| format!("Cannot load config {}", path.display()))?,
        None => PipelineConfig {
            sink: SinkTarget::Database(DatabaseConfig::from_env()),
            ..Default::default()
        },
    };

    if let Some(input) = input {
        config.input = input;
    }

    if options.memory {
        config.sink = SinkTarget::Memory;
    } else if let Some(ref path) = options.script {
        config.sink = SinkTarget::Script { path: path.clone() };
    }

    if let SinkTarget::Database(ref mut db) = config.sink {
        apply_database_overrides(db, &options.db);
    }

    if let Some(batch_size) = options.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(ref postal_key) = options.postal_key {
        config.postal_key = postal_key.clone();
    }
    if let Some(progress_every) = options.progress_every {
        config.progress_every = progress_every;
    }
    config.force |= options.force;

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn apply_database_overrides(config: &mut DatabaseConfig, args: &DbArgs) {
    if let Some(ref host) = args.host {
        config.host = host.clone();
    }
    if let Some(ref database) = args.database {
        config.dbname = database.clone();
    }
    if let Some(ref user) = args.user {
        config.user = user.clone();
    }
    if let Some(ref password) = args.password {
        config.password = Some(password.clone());
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(ref ssl) = args.ssl {
        if let Ok(mode) = ssl.parse() {
            config.ssl_mode = mode;
        }
    }
}
