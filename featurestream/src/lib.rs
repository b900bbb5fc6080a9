//! # featurestream
//!
//! Décodeur streaming pour les FeatureCollection GeoJSON volumineuses
//! (exports `osmium export` d'extraits OpenStreetMap).
//!
//! ## Features
//!
//! - Lecture incrémentale : une seule feature en mémoire à la fois
//! - Membres de premier niveau (`bbox`, `crs`, ...) ignorés sans allocation
//! - Validation complète de la structure, y compris après le tableau `features`
//! - Types `serde` permissifs : la validation métier est faite en aval
//!
//! ## Usage
//!
//! ```rust,ignore
//! use featurestream::FeatureStreamReader;
//! use std::path::Path;
//!
//! for feature in FeatureStreamReader::open(Path::new("extract.geojson"))? {
//!     let feature = feature?;
//!     println!("{:?}", feature.geometry_type());
//! }
//! ```

mod lexer;

pub mod error;
pub mod reader;
pub mod types;

pub use error::{Location, StreamError};
pub use reader::FeatureStreamReader;
pub use types::{RawFeature, RawGeometry};

use std::path::Path;

/// Ouvre un fichier GeoJSON et retourne la séquence de ses features.
///
/// # Errors
///
/// Retourne `StreamError` si le fichier est introuvable ou illisible.
/// Les erreurs de structure sont retournées au fil de l'itération.
pub fn open(path: &Path) -> Result<FeatureStreamReader, StreamError> {
    FeatureStreamReader::open(path)
}

/// Extrait le nom de la source depuis un chemin d'export
/// (`france-latest.geojson` -> `france-latest`)
pub fn source_name(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let base = name
        .strip_suffix(".geojson")
        .or_else(|| name.strip_suffix(".json"))
        .unwrap_or(name);
    Some(base.to_string())
}
