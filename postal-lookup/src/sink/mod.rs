//! Destinations du chargement (PostgreSQL, script SQL, mémoire)

pub mod memory;
pub mod pool;
pub mod postgres;
pub mod script;
pub mod transaction;

pub use memory::MemorySink;
pub use pool::{DatabaseConfig, SslMode};
pub use postgres::PostgresSink;
pub use script::ScriptSink;

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::batch::Batch;
use crate::error::PipelineError;

/// DDL de la table cible (idempotent)
pub const CREATE_LOOKUP_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS postal_lookup (
    postcode TEXT PRIMARY KEY,
    lat DOUBLE PRECISION,
    lon DOUBLE PRECISION
)"#;

/// Ligne persistée : au plus une par code postal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostalLookupRow {
    pub postcode: String,
    pub lat: f64,
    pub lon: f64,
}

/// Résultat de l'application d'un batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadResult {
    /// Lignes tentées dans le batch commité (conflits inclus)
    pub inserted: u64,
    /// Lignes réellement ajoutées, si la destination sait les compter
    pub new_rows: Option<u64>,
}

/// Empreinte d'un fichier source : nom + checksum blake3
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFingerprint {
    pub name: String,
    pub checksum: String,
}

impl SourceFingerprint {
    /// Calcule l'empreinte du fichier (lecture par blocs de 64 Ko)
    ///
    /// Appel bloquant : à lancer via `spawn_blocking` depuis du code async.
    pub fn compute(path: &Path) -> Result<Self, PipelineError> {
        let mut file = File::open(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PipelineError::InputNotFound(path.to_path_buf())
            } else {
                PipelineError::io(path, e)
            }
        })?;

        let mut hasher = blake3::Hasher::new();
        let mut buffer = [0u8; 65536];

        loop {
            let bytes_read = file
                .read(&mut buffer)
                .map_err(|e| PipelineError::io(path, e))?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }

        let name = featurestream::source_name(path)
            .unwrap_or_else(|| path.display().to_string());

        Ok(Self {
            name,
            checksum: hasher.finalize().to_hex().to_string(),
        })
    }
}

/// Destination d'un chargement
///
/// Chaque batch est appliqué de façon atomique avec une politique
/// « insertion si absent » sur le code postal.
#[async_trait]
pub trait LoadSink: Send {
    /// Description courte pour les logs et le rapport
    fn describe(&self) -> String;

    /// Vrai si cette source a déjà été chargée dans la destination
    async fn already_loaded(
        &mut self,
        fingerprint: &SourceFingerprint,
    ) -> Result<bool, PipelineError>;

    /// Crée la table cible si absente (appelable à chaque exécution)
    async fn bootstrap(&mut self) -> Result<(), PipelineError>;

    /// Applique un batch en une transaction : tout ou rien
    async fn apply(&mut self, batch: Batch) -> Result<LoadResult, PipelineError>;

    /// Enregistre la source comme chargée (après un run complet)
    async fn mark_loaded(&mut self, fingerprint: &SourceFingerprint) -> Result<(), PipelineError>;

    /// Finalise la destination
    async fn finish(&mut self) -> Result<(), PipelineError> {
        Ok(())
    }
}

#[async_trait]
impl<S: LoadSink + ?Sized> LoadSink for Box<S> {
    fn describe(&self) -> String {
        (**self).describe()
    }

    async fn already_loaded(
        &mut self,
        fingerprint: &SourceFingerprint,
    ) -> Result<bool, PipelineError> {
        (**self).already_loaded(fingerprint).await
    }

    async fn bootstrap(&mut self) -> Result<(), PipelineError> {
        (**self).bootstrap().await
    }

    async fn apply(&mut self, batch: Batch) -> Result<LoadResult, PipelineError> {
        (**self).apply(batch).await
    }

    async fn mark_loaded(&mut self, fingerprint: &SourceFingerprint) -> Result<(), PipelineError> {
        (**self).mark_loaded(fingerprint).await
    }

    async fn finish(&mut self) -> Result<(), PipelineError> {
        (**self).finish().await
    }
}

/// Choix de la destination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SinkTarget {
    /// Connexion directe à PostgreSQL
    Database(DatabaseConfig),
    /// Script SQL à exécuter plus tard (psql -f)
    Script { path: PathBuf },
    /// Stockage en mémoire (dry run)
    Memory,
}

impl SinkTarget {
    /// Description sans mot de passe, pour les logs
    pub fn describe(&self) -> String {
        match self {
            Self::Database(config) => config.describe(),
            Self::Script { path } => format!("script {}", path.display()),
            Self::Memory => "memory".to_string(),
        }
    }
}

impl Default for SinkTarget {
    fn default() -> Self {
        Self::Database(DatabaseConfig::default())
    }
}

/// Ouvre la destination demandée
///
/// Pour PostgreSQL la connexion est établie et testée ici.
pub async fn open_sink(target: &SinkTarget) -> Result<Box<dyn LoadSink>, PipelineError> {
    let sink: Box<dyn LoadSink> = match target {
        SinkTarget::Database(config) => Box::new(PostgresSink::connect(config).await?),
        SinkTarget::Script { path } => Box::new(ScriptSink::create(path)?),
        SinkTarget::Memory => Box::new(MemorySink::new()),
    };
    Ok(sink)
}
