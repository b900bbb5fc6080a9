//! Types d'erreurs du pipeline de chargement

use std::path::PathBuf;

use featurestream::StreamError;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Erreurs fatales du pipeline
///
/// Les features ignorées (géométrie non ponctuelle, code postal absent...)
/// ne sont pas des erreurs : elles sont comptées via `SkipReason`.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Fichier source introuvable au démarrage
    #[error("Input not found: {}", .0.display())]
    InputNotFound(PathBuf),

    /// Document GeoJSON invalide, tronqué ou illisible
    #[error("Parse error: {0}")]
    Parse(#[source] StreamError),

    /// Connexion à la base impossible ou perdue
    #[error("Connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Échec d'application d'un batch (rollback complet du batch)
    #[error("Transaction failed for batch #{batch}: {message}")]
    Transaction {
        batch: u64,
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Erreur d'I/O hors lecture du flux (script SQL, checksum)
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration invalide
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Échec du convertisseur externe (extrait -> GeoJSON)
    #[error("Conversion failed: {0}")]
    Conversion(String),
}

impl PipelineError {
    /// Crée une erreur de connexion avec sa cause
    pub fn connection<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Connection {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Crée une erreur de transaction pour un batch
    pub fn transaction<E>(batch: u64, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Transaction {
            batch,
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Crée une erreur d'I/O avec le chemin concerné
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Nom court de la catégorie, pour les rapports
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InputNotFound(_) => "input-not-found",
            Self::Parse(_) => "parse",
            Self::Connection { .. } => "connection",
            Self::Transaction { .. } => "transaction",
            Self::Io { .. } => "io",
            Self::Config(_) => "config",
            Self::Conversion(_) => "conversion",
        }
    }
}

impl From<StreamError> for PipelineError {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::NotFound(path) => Self::InputNotFound(path),
            other => Self::Parse(other),
        }
    }
}
