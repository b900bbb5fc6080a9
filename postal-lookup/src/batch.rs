//! Regroupement des enregistrements en batches de taille fixe

use std::num::NonZeroUsize;

use crate::filter::NormalizedRecord;

/// Taille de batch par défaut
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Groupe ordonné d'enregistrements, appliqué en une seule transaction
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    seq: u64,
    records: Vec<NormalizedRecord>,
}

impl Batch {
    /// Crée un batch (numéro de séquence à partir de 1)
    pub fn new(seq: u64, records: Vec<NormalizedRecord>) -> Self {
        Self { seq, records }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn records(&self) -> &[NormalizedRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_records(self) -> Vec<NormalizedRecord> {
        self.records
    }
}

/// Accumule les enregistrements et émet un batch à chaque remplissage
///
/// Le buffer ne dépasse jamais `batch_size` éléments ; le pic observé est
/// exposé par [`BatchAccumulator::peak_buffered`].
#[derive(Debug)]
pub struct BatchAccumulator {
    batch_size: usize,
    buffer: Vec<NormalizedRecord>,
    next_seq: u64,
    peak_buffered: usize,
}

impl BatchAccumulator {
    pub fn new(batch_size: NonZeroUsize) -> Self {
        let batch_size = batch_size.get();
        Self {
            batch_size,
            buffer: Vec::with_capacity(batch_size),
            next_seq: 1,
            peak_buffered: 0,
        }
    }

    /// Ajoute un enregistrement ; retourne un batch plein le cas échéant
    pub fn push(&mut self, record: NormalizedRecord) -> Option<Batch> {
        self.buffer.push(record);
        self.peak_buffered = self.peak_buffered.max(self.buffer.len());

        if self.buffer.len() >= self.batch_size {
            Some(self.take())
        } else {
            None
        }
    }

    /// Émet le reste du buffer en fin de flux (aucun batch s'il est vide)
    pub fn flush(&mut self) -> Option<Batch> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(self.take())
        }
    }

    fn take(&mut self) -> Batch {
        let records = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.batch_size));
        let batch = Batch::new(self.next_seq, records);
        self.next_seq += 1;
        batch
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Nombre d'enregistrements en attente
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Nombre maximal d'enregistrements bufferisés depuis la création
    pub fn peak_buffered(&self) -> usize {
        self.peak_buffered
    }

    /// Nombre de batches émis
    pub fn batches_emitted(&self) -> u64 {
        self.next_seq - 1
    }
}
