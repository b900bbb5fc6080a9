//! Chargement direct dans PostgreSQL

use async_trait::async_trait;
use deadpool_postgres::{Object, Pool};
use tracing::{debug, info};

use crate::batch::Batch;
use crate::error::PipelineError;
use crate::sink::pool::{self, DatabaseConfig};
use crate::sink::transaction;
use crate::sink::{LoadResult, LoadSink, SourceFingerprint, CREATE_LOOKUP_TABLE_SQL};

/// Table de suivi des sources chargées, pour le skip incrémental
const CREATE_SOURCES_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS postal_lookup_sources (
    source_name TEXT PRIMARY KEY,
    checksum TEXT NOT NULL,
    loaded_at TIMESTAMPTZ DEFAULT NOW()
)"#;

/// Destination PostgreSQL : une connexion tenue pendant tout le chargement
pub struct PostgresSink {
    client: Object,
    // Déclaré après `client` : les champs sont détruits dans l'ordre, le pool
    // survit donc à la connexion qu'il a prêtée
    _pool: Pool,
    description: String,
}

impl PostgresSink {
    /// Ouvre la connexion et vérifie qu'elle répond
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, PipelineError> {
        let pool = pool::create_pool(config)?;
        let client = pool::connect(&pool, config).await?;

        info!(target_db = %config.describe(), "Connected to PostgreSQL");

        Ok(Self {
            client,
            _pool: pool,
            description: config.describe(),
        })
    }

    /// Nombre de lignes dans la table cible
    pub async fn row_count(&self) -> Result<i64, PipelineError> {
        let row = self
            .client
            .query_one("SELECT COUNT(*) FROM postal_lookup", &[])
            .await
            .map_err(|e| PipelineError::connection("Failed to count postal_lookup rows", e))?;
        Ok(row.get(0))
    }
}

#[async_trait]
impl LoadSink for PostgresSink {
    fn describe(&self) -> String {
        self.description.clone()
    }

    async fn already_loaded(
        &mut self,
        fingerprint: &SourceFingerprint,
    ) -> Result<bool, PipelineError> {
        // Première exécution : la table de suivi n'existe pas encore
        let exists: bool = self
            .client
            .query_one(
                "SELECT to_regclass('postal_lookup_sources') IS NOT NULL",
                &[],
            )
            .await
            .map_err(|e| PipelineError::connection("Failed to check postal_lookup_sources", e))?
            .get(0);

        if !exists {
            return Ok(false);
        }

        let row = self
            .client
            .query_opt(
                "SELECT 1 FROM postal_lookup_sources WHERE source_name = $1 AND checksum = $2",
                &[&fingerprint.name, &fingerprint.checksum],
            )
            .await
            .map_err(|e| PipelineError::connection("Failed to query postal_lookup_sources", e))?;

        Ok(row.is_some())
    }

    async fn bootstrap(&mut self) -> Result<(), PipelineError> {
        self.client
            .batch_execute(CREATE_LOOKUP_TABLE_SQL)
            .await
            .map_err(|e| PipelineError::connection("Failed to create postal_lookup table", e))?;

        self.client
            .batch_execute(CREATE_SOURCES_TABLE_SQL)
            .await
            .map_err(|e| {
                PipelineError::connection("Failed to create postal_lookup_sources table", e)
            })?;

        debug!("Tables postal_lookup and postal_lookup_sources ready");
        Ok(())
    }

    async fn apply(&mut self, batch: Batch) -> Result<LoadResult, PipelineError> {
        transaction::apply_batch(&mut self.client, &batch).await
    }

    async fn mark_loaded(&mut self, fingerprint: &SourceFingerprint) -> Result<(), PipelineError> {
        self.client
            .execute(
                r#"
                INSERT INTO postal_lookup_sources (source_name, checksum)
                VALUES ($1, $2)
                ON CONFLICT (source_name) DO UPDATE SET checksum = $2, loaded_at = NOW()
                "#,
                &[&fingerprint.name, &fingerprint.checksum],
            )
            .await
            .map_err(|e| PipelineError::connection("Failed to record source checksum", e))?;

        debug!(source = %fingerprint.name, "Source recorded as loaded");
        Ok(())
    }
}
