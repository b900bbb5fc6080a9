//! Compteurs agrégés d'un run

use std::collections::BTreeMap;

use serde::Serialize;

use crate::filter::SkipReason;
use crate::sink::LoadResult;

/// Compteurs du pipeline
///
/// Invariant en fin de run réussi : `processed == inserted + total_skipped()`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineStats {
    /// Features lues dans la source
    pub processed: u64,
    /// Lignes des batches commités (conflits inclus)
    pub inserted: u64,
    /// Lignes réellement ajoutées, quand la destination les compte
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_rows: Option<u64>,
    pub batches_committed: u64,
    pub skipped: BTreeMap<SkipReason, u64>,
    /// Pic d'enregistrements en attente dans l'accumulateur
    pub peak_buffered: usize,
}

impl PipelineStats {
    pub fn record_skip(&mut self, reason: SkipReason) {
        *self.skipped.entry(reason).or_insert(0) += 1;
    }

    pub fn record_batch(&mut self, result: &LoadResult) {
        self.inserted += result.inserted;
        self.batches_committed += 1;
        if let Some(n) = result.new_rows {
            *self.new_rows.get_or_insert(0) += n;
        }
    }

    pub fn total_skipped(&self) -> u64 {
        self.skipped.values().sum()
    }

    pub fn skipped_for(&self, reason: SkipReason) -> u64 {
        self.skipped.get(&reason).copied().unwrap_or(0)
    }
}
