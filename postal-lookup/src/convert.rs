//! Conversion d'un extrait OSM (`.osm.pbf`) en GeoJSON
//!
//! Délègue à `osmium export`. Le pipeline de chargement ne lit jamais le
//! format PBF lui-même.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::sink::script::partial_path;

/// Résultat d'une conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionOutcome {
    /// Fichier produit par le convertisseur
    Converted,
    /// Sortie déjà présente, conversion ignorée
    AlreadyPresent,
}

/// Convertisseur extrait -> FeatureCollection
#[async_trait]
pub trait Converter: Send + Sync {
    async fn convert(&self, input: &Path, output: &Path)
        -> Result<ConversionOutcome, PipelineError>;
}

/// Appelle `osmium export --progress --overwrite -o <output>.partial <input>`,
/// puis renomme la sortie une fois osmium terminé avec succès
#[derive(Debug, Clone)]
pub struct OsmiumConverter {
    binary: PathBuf,
}

impl Default for OsmiumConverter {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("osmium"),
        }
    }
}

impl OsmiumConverter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Utilise un autre exécutable que `osmium` du PATH
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

fn file_size_mb(path: &Path) -> f64 {
    std::fs::metadata(path)
        .map(|m| m.len() as f64 / (1024.0 * 1024.0))
        .unwrap_or(0.0)
}

/// Nombre de lignes d'erreur d'osmium gardées pour le message d'échec
const STDERR_TAIL: usize = 5;

#[async_trait]
impl Converter for OsmiumConverter {
    async fn convert(
        &self,
        input: &Path,
        output: &Path,
    ) -> Result<ConversionOutcome, PipelineError> {
        if output.exists() {
            info!(
                output = %output.display(),
                size_mb = file_size_mb(output),
                "GeoJSON already exists, skipping conversion"
            );
            return Ok(ConversionOutcome::AlreadyPresent);
        }

        if !input.exists() {
            return Err(PipelineError::InputNotFound(input.to_path_buf()));
        }

        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PipelineError::io(parent, e))?;
        }

        info!(
            input = %input.display(),
            output = %output.display(),
            size_mb = file_size_mb(input),
            "Converting OSM extract to GeoJSON"
        );
        let start = Instant::now();

        // La sortie n'apparaît sous son nom final qu'une fois complète
        let partial = partial_path(output);
        if let Err(e) = self.export(input, &partial).await {
            discard_partial(&partial).await;
            return Err(e);
        }
        tokio::fs::rename(&partial, output)
            .await
            .map_err(|e| PipelineError::io(output, e))?;

        info!(
            output = %output.display(),
            elapsed_secs = start.elapsed().as_secs_f64(),
            size_mb = file_size_mb(output),
            "Conversion completed"
        );
        Ok(ConversionOutcome::Converted)
    }
}

impl OsmiumConverter {
    /// Lance osmium vers `target` et attend sa fin
    async fn export(&self, input: &Path, target: &Path) -> Result<(), PipelineError> {
        let mut child = Command::new(&self.binary)
            .arg("export")
            .arg("--progress")
            .arg("--overwrite")
            .arg("-o")
            .arg(target)
            .arg(input)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                PipelineError::Conversion(format!(
                    "Failed to start {}: {}",
                    self.binary.display(),
                    e
                ))
            })?;

        // osmium écrit sa progression sur stderr
        let tail = match child.stderr.take() {
            Some(stderr) => forward_stderr(stderr).await,
            None => Vec::new(),
        };

        let status = child.wait().await.map_err(|e| {
            PipelineError::Conversion(format!("Failed to wait for {}: {}", self.binary.display(), e))
        })?;

        if !status.success() {
            return Err(PipelineError::Conversion(format!(
                "{} exited with {}{}",
                self.binary.display(),
                status,
                if tail.is_empty() {
                    String::new()
                } else {
                    format!(": {}", tail.join(" | "))
                }
            )));
        }
        Ok(())
    }
}

async fn discard_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Partial GeoJSON removed"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove partial GeoJSON"),
    }
}

/// Lit un segment terminé par `\r` ou `\n` ; `false` en fin de flux
///
/// La barre de progression d'osmium est rafraîchie avec `\r`, chaque mise
/// à jour est donc un segment.
async fn next_segment<R>(reader: &mut R, segment: &mut Vec<u8>) -> io::Result<bool>
where
    R: AsyncBufRead + Unpin,
{
    segment.clear();
    loop {
        let buf = reader.fill_buf().await?;
        if buf.is_empty() {
            return Ok(!segment.is_empty());
        }
        match buf.iter().position(|&b| b == b'\r' || b == b'\n') {
            Some(pos) => {
                segment.extend_from_slice(&buf[..pos]);
                reader.consume(pos + 1);
                return Ok(true);
            }
            None => {
                let len = buf.len();
                segment.extend_from_slice(buf);
                reader.consume(len);
            }
        }
    }
}

/// Journalise stderr jusqu'à sa fermeture et retourne les dernières lignes
/// hors progression
///
/// Le flux est toujours lu jusqu'au bout, pour que le processus ne bloque
/// jamais sur un pipe plein.
async fn forward_stderr<R>(stderr: R) -> Vec<String>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stderr);
    let mut segment = Vec::new();
    let mut tail = Vec::new();

    loop {
        match next_segment(&mut reader, &mut segment).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => {
                warn!(error = %e, "Cannot read osmium output, discarding the rest");
                let _ = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await;
                break;
            }
        }

        let line = String::from_utf8_lossy(&segment);
        let line = line.trim();
        if line.contains('%') || line.contains("Done") {
            info!("{}", line);
        } else if !line.is_empty() {
            debug!("{}", line);
            tail.push(line.to_string());
            if tail.len() > STDERR_TAIL {
                tail.remove(0);
            }
        }
    }

    tail
}

/// Chemin du GeoJSON pour un extrait : `<dir>/<nom>.geojson`
/// (`france-latest.osm.pbf` -> `france-latest.geojson`)
pub fn geojson_path_for(extract: &Path, dir: &Path) -> PathBuf {
    let name = extract
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("extract");
    let base = name
        .strip_suffix(".osm.pbf")
        .or_else(|| name.strip_suffix(".pbf"))
        .unwrap_or(name);
    dir.join(format!("{}.geojson", base))
}
