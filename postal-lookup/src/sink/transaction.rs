//! Transaction atomique pour un batch
//!
//! Garantit le rollback automatique en cas d'erreur : une transaction
//! non commitée est annulée quand elle est droppée.

use deadpool_postgres::{Object, Transaction};
use tracing::{debug, error};

use crate::batch::Batch;
use crate::error::PipelineError;
use crate::sink::LoadResult;

/// Insertion si absent, en une seule requête paramétrée par batch
pub(crate) const INSERT_BATCH_SQL: &str = r#"
    INSERT INTO postal_lookup (postcode, lat, lon)
    SELECT * FROM UNNEST($1::text[], $2::float8[], $3::float8[])
    ON CONFLICT (postcode) DO NOTHING
"#;

/// Gestionnaire de transaction pour un batch
pub struct BatchTransaction<'a> {
    transaction: Transaction<'a>,
    batch_seq: u64,
    attempted: u64,
    new_rows: u64,
}

impl<'a> BatchTransaction<'a> {
    /// Démarre une nouvelle transaction pour le batch `batch_seq`
    ///
    /// # Errors
    /// Retourne une erreur si la transaction ne peut pas être démarrée
    pub async fn begin(client: &'a mut Object, batch_seq: u64) -> Result<Self, PipelineError> {
        let transaction = client
            .transaction()
            .await
            .map_err(|e| PipelineError::transaction(batch_seq, e))?;

        debug!(batch = batch_seq, "Begin batch transaction");

        Ok(Self {
            transaction,
            batch_seq,
            attempted: 0,
            new_rows: 0,
        })
    }

    /// Insère les enregistrements du batch (conflits ignorés)
    pub async fn insert(&mut self, batch: &Batch) -> Result<(), PipelineError> {
        let records = batch.records();
        let postcodes: Vec<&str> = records.iter().map(|r| r.postcode()).collect();
        let lats: Vec<f64> = records.iter().map(|r| r.lat()).collect();
        let lons: Vec<f64> = records.iter().map(|r| r.lon()).collect();

        let stmt = self
            .transaction
            .prepare_cached(INSERT_BATCH_SQL)
            .await
            .map_err(|e| PipelineError::transaction(self.batch_seq, e))?;

        let affected = self
            .transaction
            .execute(&stmt, &[&postcodes, &lats, &lons])
            .await
            .map_err(|e| PipelineError::transaction(self.batch_seq, e))?;

        self.attempted += records.len() as u64;
        self.new_rows += affected;
        Ok(())
    }

    /// Valide et commit la transaction
    ///
    /// # Errors
    /// Retourne une erreur si le commit échoue (le batch est alors annulé)
    pub async fn commit(self) -> Result<LoadResult, PipelineError> {
        let batch_seq = self.batch_seq;
        self.transaction
            .commit()
            .await
            .map_err(|e| PipelineError::transaction(batch_seq, e))?;

        debug!(
            batch = batch_seq,
            attempted = self.attempted,
            new_rows = self.new_rows,
            "Batch committed"
        );

        Ok(LoadResult {
            inserted: self.attempted,
            new_rows: Some(self.new_rows),
        })
    }

    /// Annule la transaction (rollback)
    ///
    /// Le rollback est aussi implicite au drop.
    pub async fn rollback(self, reason: &str) {
        error!(
            batch = self.batch_seq,
            reason = %reason,
            attempted = self.attempted,
            "Rolling back batch"
        );

        if let Err(e) = self.transaction.rollback().await {
            error!(error = %e, "Explicit rollback failed (will rollback on drop anyway)");
        }
    }
}

/// Applique un batch dans sa propre transaction : commit ou rollback complet
pub async fn apply_batch(client: &mut Object, batch: &Batch) -> Result<LoadResult, PipelineError> {
    let mut tx = BatchTransaction::begin(client, batch.seq()).await?;

    match tx.insert(batch).await {
        Ok(()) => tx.commit().await,
        Err(e) => {
            tx.rollback(&e.to_string()).await;
            Err(e)
        }
    }
}
