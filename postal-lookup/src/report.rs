//! Rapport de fin de chargement
//!
//! Résumé affiché en console (features lues, lignes chargées, rejets par
//! raison, durée) et sauvegardable en JSON.

use std::path::Path;
use std::time::Duration;

use serde::Serialize;

use crate::error::PipelineError;
use crate::filter::SkipReason;
use crate::pipeline::PipelineStats;

/// Statut global du run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunStatus {
    /// Source chargée entièrement
    Completed,
    /// Source déjà chargée, rien n'a été fait
    Skipped,
    /// Erreur fatale : les batches déjà commités restent en base
    Failed,
}

/// Rapport complet d'un run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Fichier source
    pub source: String,
    /// Destination (sans mot de passe)
    pub sink: String,
    pub status: RunStatus,
    pub duration_secs: f64,
    pub stats: PipelineStats,
    /// Catégorie de l'erreur fatale
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    /// Message de l'erreur fatale
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunReport {
    pub fn new(source: &str, sink: &str) -> Self {
        Self {
            source: source.to_string(),
            sink: sink.to_string(),
            status: RunStatus::Completed,
            duration_secs: 0.0,
            stats: PipelineStats::default(),
            error_kind: None,
            error: None,
        }
    }

    /// Définit la durée du run
    pub fn set_duration(&mut self, duration: Duration) {
        self.duration_secs = duration.as_secs_f64();
    }

    /// Marque le run en échec
    pub fn fail(&mut self, error: &PipelineError) {
        self.status = RunStatus::Failed;
        self.error_kind = Some(error.kind().to_string());
        self.error = Some(error.to_string());
    }

    pub fn is_success(&self) -> bool {
        self.status != RunStatus::Failed
    }

    /// Affiche le rapport sur la console
    pub fn display(&self) {
        println!("\n{}", "=".repeat(60));
        println!("POSTAL LOOKUP LOAD - {}", self.source);
        println!("{}", "=".repeat(60));

        println!("\nStatus: {:?}", self.status);
        println!("Sink: {}", self.sink);
        println!("Duration: {:.2}s", self.duration_secs);

        if self.status == RunStatus::Skipped {
            println!("\nSource already loaded (use --force to reload)");
            println!("\n{}", "=".repeat(60));
            return;
        }

        println!("\n--- SUMMARY ---");
        println!("Features processed: {}", self.stats.processed);
        println!(
            "Rows inserted: {} in {} batches",
            self.stats.inserted, self.stats.batches_committed
        );
        if let Some(new_rows) = self.stats.new_rows {
            println!("New postcodes: {}", new_rows);
        }
        println!("Skipped: {}", self.stats.total_skipped());

        if self.stats.total_skipped() > 0 {
            println!("\n--- SKIPPED BY REASON ---");
            for reason in SkipReason::ALL {
                let count = self.stats.skipped_for(reason);
                if count > 0 {
                    println!("  {}: {}", reason, count);
                }
            }
        }

        if let Some(ref error) = self.error {
            println!("\n--- ERROR ---");
            println!("  {}", error);
        }

        println!("\n{}", "=".repeat(60));
    }

    /// Sauvegarde le rapport en JSON
    pub fn save_to_file(&self, path: &Path) -> Result<(), PipelineError> {
        let json = serde_json::to_string_pretty(self).map_err(|e| PipelineError::io(path, e.into()))?;
        std::fs::write(path, json).map_err(|e| PipelineError::io(path, e))
    }

    /// Affichage compact pour le résumé
    pub fn summary(&self) -> String {
        format!(
            "{}: {:?}, {} processed, {} inserted, {} skipped",
            self.source,
            self.status,
            self.stats.processed,
            self.stats.inserted,
            self.stats.total_skipped()
        )
    }
}
