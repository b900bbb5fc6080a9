//! Types d'erreurs pour le crate featurestream

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Position d'une erreur dans le document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    /// Structure englobante (FeatureCollection, membres de premier niveau)
    Document,
    /// Feature à l'index donné (base 0) dans le tableau `features`
    Feature(usize),
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Document => write!(f, "document"),
            Location::Feature(index) => write!(f, "feature #{}", index),
        }
    }
}

/// Erreurs pouvant survenir lors du décodage d'une FeatureCollection
#[derive(Debug, Error)]
pub enum StreamError {
    /// Fichier source introuvable
    #[error("Input not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Erreur d'I/O lors de la lecture du flux
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Structure JSON invalide ou tronquée
    #[error("Parse error in {location} at byte {offset}: {reason}")]
    Parse {
        location: Location,
        offset: u64,
        reason: String,
    },
}

impl StreamError {
    /// Crée une erreur de parsing avec contexte
    pub fn parse(location: Location, offset: u64, reason: impl Into<String>) -> Self {
        Self::Parse {
            location,
            offset,
            reason: reason.into(),
        }
    }

    /// Convertit une erreur serde_json en distinguant les erreurs d'I/O
    pub(crate) fn from_json(err: serde_json::Error, location: Location, offset: u64) -> Self {
        if err.is_io() {
            Self::Io(err.into())
        } else {
            Self::parse(location, offset, err.to_string())
        }
    }
}
