//! # postal-lookup
//!
//! Chargement des codes postaux OpenStreetMap dans une table PostgreSQL
//! `postal_lookup (postcode, lat, lon)`.
//!
//! ## Features
//!
//! - Lecture en streaming d'exports GeoJSON volumineux (`osmium export`)
//! - Filtrage des Points portant un code postal, rejets comptés par raison
//! - Batches transactionnels, insertion si absent (idempotent)
//! - Destinations : PostgreSQL, script SQL, mémoire
//! - Skip des sources déjà chargées (checksum blake3)
//!
//! ## Usage CLI
//!
//! ```bash
//! # Chargement direct
//! postal-lookup load --input ./france-latest.geojson
//!
//! # Script SQL à exécuter plus tard avec psql
//! postal-lookup load --input ./france-latest.geojson --script ./france.sql
//!
//! # Extrait .osm.pbf -> GeoJSON -> base
//! postal-lookup run --input ./france-latest.osm.pbf --workdir ./data/geojson
//! ```

pub mod batch;
pub mod config;
pub mod convert;
pub mod error;
pub mod filter;
pub mod pipeline;
pub mod report;
pub mod sink;

pub use batch::{Batch, BatchAccumulator};
pub use config::PipelineConfig;
pub use error::PipelineError;
pub use filter::{FeatureFilter, NormalizedRecord, SkipReason};
pub use pipeline::{run_pipeline, PipelineOrchestrator, PipelineState, PipelineStats};
pub use report::{RunReport, RunStatus};
pub use sink::{LoadResult, LoadSink, SinkTarget, SourceFingerprint};
