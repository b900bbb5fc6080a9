//! Tests de bout en bout du pipeline (destinations mémoire et script)

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;

use postal_lookup::sink::{MemorySink, PostalLookupRow};
use postal_lookup::{
    Batch, LoadResult, LoadSink, PipelineConfig, PipelineError, PipelineOrchestrator,
    PipelineState, RunStatus, SinkTarget, SkipReason, SourceFingerprint,
};

fn point(postcode: &str, lon: f64, lat: f64) -> Value {
    json!({
        "type": "Feature",
        "geometry": {"type": "Point", "coordinates": [lon, lat]},
        "properties": {"addr:postcode": postcode}
    })
}

fn collection(features: Vec<Value>) -> String {
    json!({"type": "FeatureCollection", "features": features}).to_string()
}

fn write_input(dir: &TempDir, name: &str, body: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, body).unwrap();
    path
}

/// `count` points valides avec des codes postaux distincts
fn valid_points(count: usize) -> Vec<Value> {
    (0..count)
        .map(|i| point(&format!("{:06}", i), 5.0 + (i % 100) as f64 * 0.01, 45.0))
        .collect()
}

fn config(input: &Path, batch_size: usize) -> PipelineConfig {
    PipelineConfig {
        batch_size,
        ..PipelineConfig::new(input, SinkTarget::Memory)
    }
}

/// Destination mémoire qui échoue sur un batch donné
struct FailingSink {
    inner: MemorySink,
    fail_at: Option<u64>,
}

#[async_trait]
impl LoadSink for FailingSink {
    fn describe(&self) -> String {
        "failing".into()
    }

    async fn already_loaded(
        &mut self,
        fingerprint: &SourceFingerprint,
    ) -> Result<bool, PipelineError> {
        self.inner.already_loaded(fingerprint).await
    }

    async fn bootstrap(&mut self) -> Result<(), PipelineError> {
        self.inner.bootstrap().await
    }

    async fn apply(&mut self, batch: Batch) -> Result<LoadResult, PipelineError> {
        if self.fail_at == Some(batch.seq()) {
            let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "connection lost");
            return Err(PipelineError::transaction(batch.seq(), io));
        }
        self.inner.apply(batch).await
    }

    async fn mark_loaded(&mut self, fingerprint: &SourceFingerprint) -> Result<(), PipelineError> {
        self.inner.mark_loaded(fingerprint).await
    }
}

#[tokio::test]
async fn test_end_to_end_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let body = collection(vec![
        point("10001", -73.99, 40.75),
        json!({
            "type": "Feature",
            "geometry": {"type": "Polygon", "coordinates": [[[0, 0], [1, 0], [1, 1], [0, 0]]]},
            "properties": {"addr:postcode": "99999"}
        }),
        json!({
            "type": "Feature",
            "geometry": {"type": "Point", "coordinates": [2.35, 48.85]},
            "properties": {"name": "Sans code"}
        }),
    ]);
    let input = write_input(&dir, "scenario.geojson", &body);

    let mut orchestrator =
        PipelineOrchestrator::new(config(&input, 1000), MemorySink::new()).unwrap();
    let report = orchestrator.run().await;

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.stats.processed, 3);
    assert_eq!(report.stats.inserted, 1);
    assert_eq!(report.stats.skipped_for(SkipReason::NonPointGeometry), 1);
    assert_eq!(report.stats.skipped_for(SkipReason::MissingPostcode), 1);
    assert_eq!(report.stats.total_skipped(), 2);

    assert_eq!(
        orchestrator.sink().rows(),
        vec![PostalLookupRow {
            postcode: "10001".into(),
            lat: 40.75,
            lon: -73.99,
        }]
    );
}

#[tokio::test]
async fn test_processed_equals_inserted_plus_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let mut features = Vec::new();
    for i in 0..2345 {
        let feature = match i % 5 {
            0 => json!({"type": "Feature", "geometry": {"type": "LineString", "coordinates": [[0, 0], [1, 1]]}, "properties": {"addr:postcode": "1"}}),
            1 => json!({"type": "Feature", "geometry": {"type": "Point", "coordinates": [1.0, 2.0]}, "properties": {}}),
            2 => json!({"type": "Feature", "geometry": {"type": "Point", "coordinates": []}, "properties": {"addr:postcode": "2"}}),
            3 => json!({"type": "Feature", "geometry": null, "properties": {"addr:postcode": "3"}}),
            _ => point(&format!("P{}", i), 1.0, 2.0),
        };
        features.push(feature);
    }
    let input = write_input(&dir, "mixed.geojson", &collection(features));

    let mut orchestrator =
        PipelineOrchestrator::new(config(&input, 100), MemorySink::new()).unwrap();
    let report = orchestrator.run().await;

    assert_eq!(report.status, RunStatus::Completed);
    let stats = &report.stats;
    assert_eq!(stats.processed, 2345);
    assert_eq!(stats.processed, stats.inserted + stats.total_skipped());
    assert_eq!(stats.inserted, 469);
    assert_eq!(stats.skipped_for(SkipReason::NonPointGeometry), 938);
    assert_eq!(stats.skipped_for(SkipReason::MissingPostcode), 469);
    assert_eq!(stats.skipped_for(SkipReason::MissingCoordinates), 469);
}

#[tokio::test]
async fn test_overflowing_coordinates_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let body = format!(
        r#"{{"type":"FeatureCollection","features":[{},{},{}]}}"#,
        r#"{"type":"Feature","geometry":{"type":"Point","coordinates":[1e400,48.0]},"properties":{"addr:postcode":"75001"}}"#,
        point("38000", 5.72, 45.19),
        r#"{"type":"Feature","geometry":{"type":"Point","coordinates":[2.35,-1e999]},"properties":{"addr:postcode":"75002"}}"#,
    );
    let input = write_input(&dir, "overflow.geojson", &body);

    let mut orchestrator =
        PipelineOrchestrator::new(config(&input, 1000), MemorySink::new()).unwrap();
    let report = orchestrator.run().await;

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.stats.processed, 3);
    assert_eq!(report.stats.inserted, 1);
    assert_eq!(report.stats.skipped_for(SkipReason::OutOfRangeCoordinates), 2);
    assert!(orchestrator.sink().get("38000").is_some());
}

#[tokio::test]
async fn test_batch_flush_sizes() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(&dir, "1500.geojson", &collection(valid_points(1500)));

    let mut orchestrator =
        PipelineOrchestrator::new(config(&input, 1000), MemorySink::new()).unwrap();
    let report = orchestrator.run().await;

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.stats.batches_committed, 2);
    assert_eq!(orchestrator.sink().committed_batches(), &[1000, 500]);
    assert_eq!(orchestrator.sink().len(), 1500);
}

#[tokio::test]
async fn test_memory_bound() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(&dir, "large.geojson", &collection(valid_points(25_000)));

    let mut orchestrator =
        PipelineOrchestrator::new(config(&input, 100), MemorySink::new()).unwrap();
    let report = orchestrator.run().await;

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.stats.inserted, 25_000);
    assert!(report.stats.peak_buffered <= 100);
    assert_eq!(report.stats.batches_committed, 250);
}

#[tokio::test]
async fn test_idempotent_reload() {
    let dir = tempfile::tempdir().unwrap();
    let mut features = valid_points(300);
    // Doublon : la première occurrence gagne
    features.push(point("000007", 9.0, 9.0));
    let input = write_input(&dir, "dup.geojson", &collection(features));

    let mut first = PipelineOrchestrator::new(config(&input, 50), MemorySink::new()).unwrap();
    first.run().await;
    let once = first.into_sink();
    let rows_once = once.rows();
    assert_eq!(rows_once.len(), 300);
    assert_eq!(once.get("000007").unwrap().lat, 45.0);

    let forced = PipelineConfig {
        force: true,
        ..config(&input, 50)
    };
    let mut second = PipelineOrchestrator::new(forced, once).unwrap();
    let report = second.run().await;

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.stats.inserted, 301);
    assert_eq!(report.stats.new_rows, Some(0));
    assert_eq!(second.sink().rows(), rows_once);
}

#[tokio::test]
async fn test_restart_after_crash() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(&dir, "crash.geojson", &collection(valid_points(150)));

    let sink = FailingSink {
        inner: MemorySink::new(),
        fail_at: Some(2),
    };
    let mut crashed = PipelineOrchestrator::new(config(&input, 100), sink).unwrap();
    let report = crashed.run().await;

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.error_kind.as_deref(), Some("transaction"));
    assert_eq!(crashed.state(), PipelineState::Failed);
    assert_eq!(report.stats.batches_committed, 1);

    let mut sink = crashed.into_sink();
    assert_eq!(sink.inner.len(), 100);

    // Pas de marqueur après un échec : le second run recharge tout
    sink.fail_at = None;
    let mut rerun = PipelineOrchestrator::new(config(&input, 100), sink).unwrap();
    let report = rerun.run().await;

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(rerun.sink().inner.len(), 150);
    let codes: Vec<String> = rerun
        .sink()
        .inner
        .rows()
        .into_iter()
        .map(|row| row.postcode)
        .collect();
    let expected: Vec<String> = (0..150).map(|i| format!("{:06}", i)).collect();
    assert_eq!(codes, expected);
}

#[tokio::test]
async fn test_truncated_input_keeps_committed_batches() {
    let dir = tempfile::tempdir().unwrap();
    let body = collection(valid_points(2500));
    let truncated = &body[..body.len() - 20];
    let input = write_input(&dir, "truncated.geojson", truncated);

    let mut orchestrator =
        PipelineOrchestrator::new(config(&input, 1000), MemorySink::new()).unwrap();
    let report = orchestrator.run().await;

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.error_kind.as_deref(), Some("parse"));
    assert_eq!(orchestrator.state(), PipelineState::Failed);
    assert_eq!(report.stats.batches_committed, 2);
    assert_eq!(orchestrator.sink().len(), 2000);

    // Source non marquée : un nouveau run n'est pas ignoré
    let fp = SourceFingerprint::compute(&input).unwrap();
    let mut sink = orchestrator.into_sink();
    assert!(!sink.already_loaded(&fp).await.unwrap());
}

#[tokio::test]
async fn test_precondition_skip_and_force() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(&dir, "isere.geojson", &collection(valid_points(10)));

    let mut first = PipelineOrchestrator::new(config(&input, 1000), MemorySink::new()).unwrap();
    assert_eq!(first.run().await.status, RunStatus::Completed);

    let mut second = PipelineOrchestrator::new(config(&input, 1000), first.into_sink()).unwrap();
    let report = second.run().await;
    assert_eq!(report.status, RunStatus::Skipped);
    assert!(report.is_success());
    assert_eq!(report.stats.processed, 0);
    assert_eq!(second.state(), PipelineState::Done);
    assert_eq!(second.sink().committed_batches().len(), 1);

    let forced = PipelineConfig {
        force: true,
        ..config(&input, 1000)
    };
    let mut third = PipelineOrchestrator::new(forced, second.into_sink()).unwrap();
    let report = third.run().await;
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.stats.processed, 10);
    assert_eq!(third.sink().committed_batches().len(), 2);
}

#[tokio::test]
async fn test_modified_source_is_reloaded() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(&dir, "isere.geojson", &collection(valid_points(10)));

    let mut first = PipelineOrchestrator::new(config(&input, 1000), MemorySink::new()).unwrap();
    first.run().await;

    std::fs::write(&input, collection(valid_points(20))).unwrap();
    let mut second = PipelineOrchestrator::new(config(&input, 1000), first.into_sink()).unwrap();
    let report = second.run().await;

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.stats.new_rows, Some(10));
    assert_eq!(second.sink().len(), 20);
}

#[tokio::test]
async fn test_custom_postal_key() {
    let dir = tempfile::tempdir().unwrap();
    let body = collection(vec![json!({
        "type": "Feature",
        "geometry": {"type": "Point", "coordinates": [5.72, 45.19]},
        "properties": {"postal_code": "38000", "addr:postcode": "00000"}
    })]);
    let input = write_input(&dir, "custom.geojson", &body);

    let custom = PipelineConfig {
        postal_key: "postal_code".into(),
        ..config(&input, 1000)
    };
    let mut orchestrator = PipelineOrchestrator::new(custom, MemorySink::new()).unwrap();
    orchestrator.run().await;

    assert!(orchestrator.sink().get("38000").is_some());
    assert!(orchestrator.sink().get("00000").is_none());
}

#[tokio::test]
async fn test_script_sink_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let body = collection(vec![
        point("10001", -73.99, 40.75),
        point("O'Hare 60666", -87.9, 41.97),
        point("38000", 5.72, 45.19),
    ]);
    let input = write_input(&dir, "quotes.geojson", &body);
    let script = dir.path().join("sql").join("quotes.sql");

    let cfg = PipelineConfig {
        batch_size: 2,
        ..PipelineConfig::new(&input, SinkTarget::Script { path: script.clone() })
    };
    let report = postal_lookup::run_pipeline(cfg.clone()).await;

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.stats.inserted, 3);
    assert_eq!(report.stats.new_rows, None);

    let sql = std::fs::read_to_string(&script).unwrap();
    assert!(sql.contains("('OHare 60666', 41.97, -87.9)"));
    assert!(!sql.contains("O'Hare"));
    assert_eq!(sql.matches("BEGIN;").count(), 2);
    assert_eq!(sql.matches("COMMIT;").count(), 2);
    // Chaque littéral est fermé : nombre pair d'apostrophes par ligne de valeurs
    for line in sql.lines().filter(|l| l.starts_with('(')) {
        assert_eq!(line.matches('\'').count() % 2, 0, "unbalanced quotes in {}", line);
    }

    // Le script existe : le run suivant est ignoré
    let report = postal_lookup::run_pipeline(cfg).await;
    assert_eq!(report.status, RunStatus::Skipped);
}

#[tokio::test]
async fn test_script_sink_failed_run_leaves_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let body = collection(valid_points(50));
    let input = write_input(&dir, "broken.geojson", &body[..body.len() - 10]);
    let script = dir.path().join("broken.sql");

    let cfg = PipelineConfig {
        batch_size: 10,
        ..PipelineConfig::new(&input, SinkTarget::Script { path: script.clone() })
    };
    let report = postal_lookup::run_pipeline(cfg).await;

    assert_eq!(report.status, RunStatus::Failed);
    assert!(!script.exists());
    assert!(!dir.path().join("broken.sql.partial").exists());
}

#[tokio::test]
async fn test_missing_input() {
    let cfg = PipelineConfig::new("/nonexistent/france.geojson", SinkTarget::Memory);
    let report = postal_lookup::run_pipeline(cfg).await;

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.error_kind.as_deref(), Some("input-not-found"));
    assert_eq!(report.stats.processed, 0);
}
