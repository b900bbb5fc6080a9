//! Destination en mémoire (dry run, tests)

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;

use crate::batch::Batch;
use crate::error::PipelineError;
use crate::sink::{LoadResult, LoadSink, PostalLookupRow, SourceFingerprint};

/// Table `postal_lookup` simulée : même politique d'insertion si absent
#[derive(Debug, Default)]
pub struct MemorySink {
    rows: BTreeMap<String, (f64, f64)>,
    loaded: BTreeSet<(String, String)>,
    committed: Vec<usize>,
    bootstrapped: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, postcode: &str) -> Option<PostalLookupRow> {
        self.rows.get(postcode).map(|&(lat, lon)| PostalLookupRow {
            postcode: postcode.to_string(),
            lat,
            lon,
        })
    }

    /// Lignes triées par code postal
    pub fn rows(&self) -> Vec<PostalLookupRow> {
        self.rows
            .iter()
            .map(|(postcode, &(lat, lon))| PostalLookupRow {
                postcode: postcode.clone(),
                lat,
                lon,
            })
            .collect()
    }

    /// Taille de chaque batch commité, dans l'ordre
    pub fn committed_batches(&self) -> &[usize] {
        &self.committed
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.bootstrapped
    }
}

#[async_trait]
impl LoadSink for MemorySink {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    async fn already_loaded(
        &mut self,
        fingerprint: &SourceFingerprint,
    ) -> Result<bool, PipelineError> {
        Ok(self
            .loaded
            .contains(&(fingerprint.name.clone(), fingerprint.checksum.clone())))
    }

    async fn bootstrap(&mut self) -> Result<(), PipelineError> {
        self.bootstrapped = true;
        Ok(())
    }

    async fn apply(&mut self, batch: Batch) -> Result<LoadResult, PipelineError> {
        let attempted = batch.len();
        let mut new_rows = 0u64;

        for record in batch.into_records() {
            if !self.rows.contains_key(record.postcode()) {
                self.rows
                    .insert(record.postcode().to_string(), (record.lat(), record.lon()));
                new_rows += 1;
            }
        }

        self.committed.push(attempted);
        Ok(LoadResult {
            inserted: attempted as u64,
            new_rows: Some(new_rows),
        })
    }

    async fn mark_loaded(&mut self, fingerprint: &SourceFingerprint) -> Result<(), PipelineError> {
        self.loaded
            .insert((fingerprint.name.clone(), fingerprint.checksum.clone()));
        Ok(())
    }
}
