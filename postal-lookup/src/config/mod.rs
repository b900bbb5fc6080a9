//! Configuration du pipeline

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::batch::DEFAULT_BATCH_SIZE;
use crate::error::PipelineError;
use crate::filter::DEFAULT_POSTAL_KEY;
use crate::sink::SinkTarget;

/// Intervalle par défaut des logs de progression (features lues)
pub const DEFAULT_PROGRESS_EVERY: u64 = 50_000;

/// Configuration d'un chargement, passée une fois à l'orchestrateur
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Fichier GeoJSON source
    pub input: PathBuf,

    /// Destination du chargement
    pub sink: SinkTarget,

    /// Nombre d'enregistrements par transaction
    pub batch_size: usize,

    /// Attribut portant le code postal
    pub postal_key: String,

    /// Log de progression toutes les N features (0 = jamais)
    pub progress_every: u64,

    /// Recharger même si la source a déjà été chargée
    pub force: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::new(),
            sink: SinkTarget::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            postal_key: DEFAULT_POSTAL_KEY.to_string(),
            progress_every: DEFAULT_PROGRESS_EVERY,
            force: false,
        }
    }
}

impl PipelineConfig {
    pub fn new(input: impl Into<PathBuf>, sink: SinkTarget) -> Self {
        Self {
            input: input.into(),
            sink,
            ..Default::default()
        }
    }

    /// Charge une configuration depuis un fichier JSON
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let content = std::fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;

        serde_json::from_str(&content).map_err(|e| {
            PipelineError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })
    }

    /// Vérifie la cohérence de la configuration
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.batch_size == 0 {
            return Err(PipelineError::Config("batch_size must be at least 1".into()));
        }
        if self.postal_key.trim().is_empty() {
            return Err(PipelineError::Config("postal_key must not be empty".into()));
        }
        if self.input.as_os_str().is_empty() {
            return Err(PipelineError::Config("input path is required".into()));
        }
        Ok(())
    }

    pub fn batch_size_nonzero(&self) -> Result<NonZeroUsize, PipelineError> {
        NonZeroUsize::new(self.batch_size)
            .ok_or_else(|| PipelineError::Config("batch_size must be at least 1".into()))
    }
}
