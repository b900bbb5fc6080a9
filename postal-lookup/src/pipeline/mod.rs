//! Orchestration du chargement
//!
//! Séquence : vérification de la source, création de la table, puis
//! lecture -> filtre -> batches -> destination, un batch à la fois.
//! Une erreur fatale arrête le run ; les batches déjà commités restent.

mod state;
mod stats;

pub use state::PipelineState;
pub use stats::PipelineStats;

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Instant;

use featurestream::FeatureStreamReader;
use tracing::{debug, error, info, warn};

use crate::batch::{Batch, BatchAccumulator};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::filter::FeatureFilter;
use crate::report::{RunReport, RunStatus};
use crate::sink::{open_sink, LoadSink, SourceFingerprint};

/// Issue d'un run sans erreur
enum Outcome {
    Completed,
    Skipped,
}

/// Pilote un chargement complet vers une destination
pub struct PipelineOrchestrator<S: LoadSink> {
    config: PipelineConfig,
    filter: FeatureFilter,
    batch_size: NonZeroUsize,
    sink: S,
    state: PipelineState,
}

impl<S: LoadSink> PipelineOrchestrator<S> {
    /// Valide la configuration et prépare l'orchestrateur
    pub fn new(config: PipelineConfig, sink: S) -> Result<Self, PipelineError> {
        config.validate()?;
        let batch_size = config.batch_size_nonzero()?;
        let filter = FeatureFilter::new(config.postal_key.clone());

        Ok(Self {
            config,
            filter,
            batch_size,
            sink,
            state: PipelineState::Idle,
        })
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    fn transition(&mut self, next: PipelineState) {
        if self.state.can_transition_to(next) {
            debug!(from = ?self.state, to = ?next, "Pipeline state");
            self.state = next;
        } else {
            warn!(from = ?self.state, to = ?next, "Ignoring invalid pipeline transition");
        }
    }

    /// Exécute le chargement et retourne le rapport
    ///
    /// Ne retourne jamais d'erreur : un échec est porté par le rapport
    /// (`RunStatus::Failed`).
    pub async fn run(&mut self) -> RunReport {
        let start = Instant::now();
        let mut report = RunReport::new(
            &self.config.input.display().to_string(),
            &self.sink.describe(),
        );

        if self.state != PipelineState::Idle {
            report.fail(&PipelineError::Config(format!(
                "pipeline already ran (state: {:?})",
                self.state
            )));
            return report;
        }

        let mut stats = PipelineStats::default();
        match self.execute(&mut stats).await {
            Ok(Outcome::Completed) => report.status = RunStatus::Completed,
            Ok(Outcome::Skipped) => report.status = RunStatus::Skipped,
            Err(e) => {
                error!(
                    kind = e.kind(),
                    processed = stats.processed,
                    batches = stats.batches_committed,
                    "Load failed: {}",
                    e
                );
                self.transition(PipelineState::Failed);
                report.fail(&e);
            }
        }

        report.stats = stats;
        report.set_duration(start.elapsed());

        info!(
            status = ?report.status,
            processed = report.stats.processed,
            inserted = report.stats.inserted,
            skipped = report.stats.total_skipped(),
            elapsed_secs = report.duration_secs,
            "Load finished"
        );

        report
    }

    async fn execute(&mut self, stats: &mut PipelineStats) -> Result<Outcome, PipelineError> {
        let input = self.config.input.clone();
        let fingerprint = fingerprint(input.clone()).await?;

        if !self.config.force && self.sink.already_loaded(&fingerprint).await? {
            info!(
                source = %fingerprint.name,
                checksum = %fingerprint.checksum,
                "Source already loaded, skipping"
            );
            self.transition(PipelineState::Done);
            return Ok(Outcome::Skipped);
        }

        self.sink.bootstrap().await?;

        let reader = FeatureStreamReader::open(&input)?;
        self.transition(PipelineState::Streaming);
        info!(
            source = %input.display(),
            sink = %self.sink.describe(),
            batch_size = self.batch_size.get(),
            "Streaming features"
        );

        let mut accumulator = BatchAccumulator::new(self.batch_size);

        for item in reader {
            let feature = item?;
            let index = stats.processed;
            stats.processed += 1;

            match self.filter.apply(&feature) {
                Ok(record) => {
                    let full = accumulator.push(record);
                    stats.peak_buffered = accumulator.peak_buffered();
                    if let Some(batch) = full {
                        self.commit(batch, stats).await?;
                    }
                }
                Err(reason) => {
                    debug!(feature = index, reason = %reason, "Feature skipped");
                    stats.record_skip(reason);
                }
            }

            if self.config.progress_every > 0 && stats.processed % self.config.progress_every == 0
            {
                info!(
                    processed = stats.processed,
                    inserted = stats.inserted,
                    skipped = stats.total_skipped(),
                    "Progress"
                );
            }
        }

        self.transition(PipelineState::Flushing);
        if let Some(batch) = accumulator.flush() {
            self.commit(batch, stats).await?;
        }

        self.sink.mark_loaded(&fingerprint).await?;
        self.sink.finish().await?;
        self.transition(PipelineState::Done);

        Ok(Outcome::Completed)
    }

    async fn commit(&mut self, batch: Batch, stats: &mut PipelineStats) -> Result<(), PipelineError> {
        let seq = batch.seq();
        let rows = batch.len();
        let result = self.sink.apply(batch).await?;
        stats.record_batch(&result);
        debug!(batch = seq, rows, new_rows = ?result.new_rows, "Batch committed");
        Ok(())
    }
}

/// Empreinte de la source, calculée hors du runtime async
async fn fingerprint(input: PathBuf) -> Result<SourceFingerprint, PipelineError> {
    let path = input.clone();
    tokio::task::spawn_blocking(move || SourceFingerprint::compute(&path))
        .await
        .map_err(|e| {
            PipelineError::io(
                input,
                std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
            )
        })?
}

/// Ouvre la destination configurée et exécute le chargement
///
/// Une destination injoignable donne un rapport en échec, comme toute
/// autre erreur fatale.
pub async fn run_pipeline(config: PipelineConfig) -> RunReport {
    let source = config.input.display().to_string();

    if let Err(e) = config.validate() {
        let mut report = RunReport::new(&source, &config.sink.describe());
        report.fail(&e);
        return report;
    }

    let sink = match open_sink(&config.sink).await {
        Ok(sink) => sink,
        Err(e) => {
            error!("Cannot open sink: {}", e);
            let mut report = RunReport::new(&source, &config.sink.describe());
            report.fail(&e);
            return report;
        }
    };

    match PipelineOrchestrator::new(config, sink) {
        Ok(mut orchestrator) => orchestrator.run().await,
        Err(e) => {
            let mut report = RunReport::new(&source, "-");
            report.fail(&e);
            report
        }
    }
}
