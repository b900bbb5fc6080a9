//! Génération d'un script SQL à exécuter plus tard (`psql -f`)
//!
//! Le script est écrit dans un fichier `.partial` voisin, renommé vers sa
//! destination finale seulement quand le chargement s'est terminé sans
//! erreur. Un run en échec ne laisse donc jamais de script complet.

use std::fmt::Write as _;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::batch::Batch;
use crate::error::PipelineError;
use crate::sink::{LoadResult, LoadSink, SourceFingerprint, CREATE_LOOKUP_TABLE_SQL};

/// Échappe une chaîne en littéral SQL (`standard_conforming_strings = on`)
///
/// Les apostrophes sont doublées, les octets NUL (refusés par PostgreSQL)
/// sont retirés.
pub fn quote_literal(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        match c {
            '\'' => quoted.push_str("''"),
            '\0' => {}
            c => quoted.push(c),
        }
    }
    quoted.push('\'');
    quoted
}

/// Chemin du script pour une source : `<dir>/<source>.sql`
pub fn script_path_for(input: &Path, dir: &Path) -> PathBuf {
    let name = featurestream::source_name(input).unwrap_or_else(|| "postal_lookup".into());
    dir.join(format!("{}.sql", name))
}

/// Destination « script SQL »
pub struct ScriptSink {
    target: PathBuf,
    partial: PathBuf,
    writer: Option<BufWriter<File>>,
    batches_written: u64,
}

/// Fichier temporaire voisin : `<target>.partial`
pub(crate) fn partial_path(target: &Path) -> PathBuf {
    let mut partial = target.as_os_str().to_owned();
    partial.push(".partial");
    PathBuf::from(partial)
}

impl ScriptSink {
    /// Crée le fichier temporaire à côté de `target`
    pub fn create(target: &Path) -> Result<Self, PipelineError> {
        let partial = partial_path(target);

        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;
        }

        let file = File::create(&partial).map_err(|e| PipelineError::io(&partial, e))?;
        debug!(path = %partial.display(), "Script file opened");

        Ok(Self {
            target: target.to_path_buf(),
            partial,
            writer: Some(BufWriter::new(file)),
            batches_written: 0,
        })
    }

    /// Chemin final du script
    pub fn target(&self) -> &Path {
        &self.target
    }

    fn writer(&mut self) -> Result<&mut BufWriter<File>, PipelineError> {
        let partial = &self.partial;
        self.writer.as_mut().ok_or_else(|| {
            PipelineError::io(
                partial,
                std::io::Error::new(std::io::ErrorKind::Other, "script already finished"),
            )
        })
    }

    fn write_str(&mut self, text: &str) -> Result<(), PipelineError> {
        let partial = self.partial.clone();
        self.writer()?
            .write_all(text.as_bytes())
            .map_err(|e| PipelineError::io(partial, e))
    }
}

/// Segment SQL d'un batch : une transaction, un INSERT multi-lignes
fn render_batch(batch: &Batch) -> String {
    let mut sql = String::with_capacity(64 + batch.len() * 40);
    sql.push_str("BEGIN;\nINSERT INTO postal_lookup (postcode, lat, lon) VALUES\n");

    for (i, record) in batch.records().iter().enumerate() {
        if i > 0 {
            sql.push_str(",\n");
        }
        // L'écriture dans une String ne peut pas échouer
        let _ = write!(
            sql,
            "({}, {}, {})",
            quote_literal(record.postcode()),
            record.lat(),
            record.lon()
        );
    }

    sql.push_str("\nON CONFLICT (postcode) DO NOTHING;\nCOMMIT;\n");
    sql
}

#[async_trait]
impl LoadSink for ScriptSink {
    fn describe(&self) -> String {
        format!("script {}", self.target.display())
    }

    async fn already_loaded(
        &mut self,
        _fingerprint: &SourceFingerprint,
    ) -> Result<bool, PipelineError> {
        Ok(self.target.exists())
    }

    async fn bootstrap(&mut self) -> Result<(), PipelineError> {
        let header = format!(
            "SET standard_conforming_strings = on;\n{};\n\n",
            CREATE_LOOKUP_TABLE_SQL.trim_start()
        );
        self.write_str(&header)
    }

    async fn apply(&mut self, batch: Batch) -> Result<LoadResult, PipelineError> {
        if batch.is_empty() {
            return Ok(LoadResult::default());
        }

        let sql = render_batch(&batch);
        self.writer()?
            .write_all(sql.as_bytes())
            .map_err(|e| PipelineError::transaction(batch.seq(), e))?;
        self.batches_written += 1;

        Ok(LoadResult {
            inserted: batch.len() as u64,
            new_rows: None,
        })
    }

    async fn mark_loaded(&mut self, fingerprint: &SourceFingerprint) -> Result<(), PipelineError> {
        let footer = format!(
            "-- source: {} (blake3 {})\n",
            fingerprint.name, fingerprint.checksum
        );
        self.write_str(&footer)
    }

    async fn finish(&mut self) -> Result<(), PipelineError> {
        let Some(writer) = self.writer.take() else {
            return Ok(());
        };

        let file = writer
            .into_inner()
            .map_err(|e| PipelineError::io(&self.partial, e.into_error()))?;
        file.sync_all()
            .map_err(|e| PipelineError::io(&self.partial, e))?;
        drop(file);

        fs::rename(&self.partial, &self.target)
            .map_err(|e| PipelineError::io(&self.target, e))?;

        info!(
            path = %self.target.display(),
            batches = self.batches_written,
            "SQL script written"
        );
        Ok(())
    }
}

impl Drop for ScriptSink {
    fn drop(&mut self) {
        // Script non finalisé : on retire le fichier partiel
        if self.writer.take().is_some() {
            if let Err(e) = fs::remove_file(&self.partial) {
                warn!(path = %self.partial.display(), error = %e, "Failed to remove partial script");
            }
        }
    }
}
