//! Batch benchmark runner.
//!
//! Discovers ground truth fixtures, classifies each document from its file
//! name, fans the (PDF, parser) units out to a [`BenchPool`], and folds the
//! unit reports into a per-parser ranking. Output ordering is deterministic
//! regardless of worker count.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::doc_type::{DocumentType, EffectiveConfig, Overrides, apply_overrides};
use crate::pool::{BenchEvent, BenchJob, BenchPool, ParserBackend, ParserError, UnitReport};
use crate::schema::load_parser_output;
use crate::scorer::{FailureReason, Grade, ScoreParams, ScoreReport, allowed_parse_time};
use crate::{CoreError, GroundTruth, ParserOutput};

/// Ground truth fixture suffix.
pub const FIXTURE_SUFFIX: &str = ".fire.json";

/// A parser that replays pre-recorded output from disk.
///
/// For a fixture `foo.fire.json` the replayed output is `<dir>/foo.json`.
/// Lets a benchmark grade outputs captured from parsers that don't link
/// against this crate.
pub struct ReplayParser {
    name: String,
    dir: PathBuf,
}

impl ReplayParser {
    pub fn new(name: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            dir: dir.into(),
        }
    }
}

impl ParserBackend for ReplayParser {
    fn name(&self) -> &str {
        &self.name
    }

    fn extract<'a>(
        &'a self,
        pdf: &'a Path,
    ) -> Pin<Box<dyn Future<Output = Result<ParserOutput, ParserError>> + Send + 'a>> {
        Box::pin(async move {
            let stem = pdf
                .file_stem()
                .and_then(|s| s.to_str())
                .ok_or_else(|| ParserError::Other(format!("bad fixture path: {}", pdf.display())))?;
            let path = self.dir.join(format!("{stem}.json"));
            load_parser_output(&path).map_err(|e| ParserError::Other(e.to_string()))
        })
    }
}

/// Knobs for one benchmark run.
#[derive(Clone)]
pub struct BenchOptions {
    /// Worker tasks when running in parallel.
    pub workers: usize,
    pub overrides: Overrides,
    pub params: ScoreParams,
}

impl Default for BenchOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            overrides: Overrides::default(),
            params: ScoreParams::default(),
        }
    }
}

/// Aggregate result of one benchmark run.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BenchOutcome {
    /// Per-unit reports, sorted by (pdf_name, parser_name).
    pub units: Vec<UnitReport>,
    /// Per-parser summaries, ranked by mean score descending.
    pub parsers: Vec<ParserSummary>,
}

/// One parser's aggregate standing across the batch.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ParserSummary {
    pub parser_name: String,
    pub tests_run: usize,
    /// Units that produced gradable output (no timeout, crash, or schema
    /// failure).
    pub successes: usize,
    pub mean_score: f64,
    pub mean_parse_time_seconds: f64,
    pub grade: Grade,
}

struct Fixture {
    pdf_name: String,
    pdf_path: PathBuf,
    ground_truth: Arc<GroundTruth>,
    config: Arc<EffectiveConfig>,
    timeout: Duration,
}

/// A fixture that failed to load. Graded as a schema failure for every
/// parser so the batch still reports the unit instead of aborting.
struct FailedFixture {
    pdf_name: String,
    violation: String,
}

/// List fixture files under `dir`, sorted by file name.
fn discover_fixtures(dir: &Path) -> Result<Vec<PathBuf>, CoreError> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(FIXTURE_SUFFIX))
        })
        .collect();
    paths.sort();
    Ok(paths)
}

fn load_fixtures(
    dir: &Path,
    options: &BenchOptions,
) -> Result<(Vec<Fixture>, Vec<FailedFixture>), CoreError> {
    let skip_slow = options.overrides.skip_slow.unwrap_or(false);

    let mut fixtures = Vec::new();
    let mut failed = Vec::new();
    for path in discover_fixtures(dir)? {
        let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let stem = file_name
            .strip_suffix(FIXTURE_SUFFIX)
            .unwrap_or(file_name)
            .to_string();

        // A broken fixture is fatal for its own units only, never the batch.
        let ground_truth = match crate::schema::load_ground_truth(&path) {
            Ok(gt) => gt,
            Err(err) => {
                tracing::warn!(fixture = %path.display(), error = %err, "fixture failed to load");
                failed.push(FailedFixture {
                    pdf_name: format!("{stem}.pdf"),
                    violation: err.to_string(),
                });
                continue;
            }
        };
        let doc_type = DocumentType::classify(&ground_truth.metadata.pdf_name);

        if skip_slow && doc_type == DocumentType::StressTest {
            tracing::info!(fixture = %path.display(), "skipping stress test fixture");
            continue;
        }

        let config = apply_overrides(doc_type, &options.overrides);

        // The timeout is deliberately looser than the scoring budget so a
        // slow-but-finishing parser gets graded (and fails performance)
        // instead of being killed.
        let timeout = match options.overrides.timeout_seconds {
            Some(secs) => Duration::from_secs_f64(secs),
            None => Duration::from_secs_f64(allowed_parse_time(&ground_truth, &config) * 2.0),
        };

        fixtures.push(Fixture {
            pdf_name: ground_truth.metadata.pdf_name.clone(),
            pdf_path: dir.join(format!("{stem}.pdf")),
            ground_truth: Arc::new(ground_truth),
            config: Arc::new(config),
            timeout,
        });
    }

    if let Some(subset) = options.overrides.subset_size {
        fixtures.truncate(subset);
    }
    Ok((fixtures, failed))
}

/// Run every parser against every fixture under `fixtures_dir`.
pub async fn run_benchmark(
    fixtures_dir: &Path,
    parsers: &[Arc<dyn ParserBackend>],
    options: &BenchOptions,
    progress: Arc<dyn Fn(BenchEvent) + Send + Sync>,
) -> Result<BenchOutcome, CoreError> {
    let (fixtures, failed) = load_fixtures(fixtures_dir, options)?;
    tracing::info!(
        fixtures = fixtures.len(),
        failed = failed.len(),
        parsers = parsers.len(),
        "starting benchmark"
    );

    let workers = if options.overrides.parallel.unwrap_or(true) {
        options.workers
    } else {
        1
    };
    let params = Arc::new(options.params.clone());
    let pool = BenchPool::new(workers, CancellationToken::new());

    let mut pending: Vec<oneshot::Receiver<UnitReport>> =
        Vec::with_capacity(fixtures.len() * parsers.len());
    for fixture in &fixtures {
        for parser in parsers {
            let (result_tx, result_rx) = oneshot::channel();
            pool.submit(BenchJob {
                parser: Arc::clone(parser),
                pdf_name: fixture.pdf_name.clone(),
                pdf_path: fixture.pdf_path.clone(),
                ground_truth: Arc::clone(&fixture.ground_truth),
                config: Arc::clone(&fixture.config),
                params: Arc::clone(&params),
                timeout: fixture.timeout,
                result_tx,
                progress: Arc::clone(&progress),
            })
            .await;
            pending.push(result_rx);
        }
    }
    pool.shutdown().await;

    let mut units = Vec::with_capacity(pending.len() + failed.len() * parsers.len());
    for rx in pending {
        if let Ok(unit) = rx.await {
            units.push(unit);
        }
    }
    for failure in &failed {
        for parser in parsers {
            units.push(UnitReport {
                pdf_name: failure.pdf_name.clone(),
                parser_name: parser.name().to_string(),
                report: ScoreReport::failed(
                    FailureReason::SchemaViolation(failure.violation.clone()),
                    0.0,
                ),
            });
        }
    }
    units.sort_by(|a, b| {
        (a.pdf_name.as_str(), a.parser_name.as_str())
            .cmp(&(b.pdf_name.as_str(), b.parser_name.as_str()))
    });

    let parsers = summarize(&units, &options.params);
    Ok(BenchOutcome { units, parsers })
}

/// Fold unit reports into per-parser summaries, ranked by mean score.
fn summarize(units: &[UnitReport], params: &ScoreParams) -> Vec<ParserSummary> {
    let mut grouped: BTreeMap<&str, Vec<&UnitReport>> = BTreeMap::new();
    for unit in units {
        grouped.entry(&unit.parser_name).or_default().push(unit);
    }

    let mut summaries: Vec<ParserSummary> = grouped
        .into_iter()
        .map(|(name, reports)| {
            let tests_run = reports.len();
            let successes = reports.iter().filter(|u| u.report.passed()).count();
            let mean_score =
                reports.iter().map(|u| u.report.score).sum::<f64>() / tests_run as f64;
            let mean_parse_time_seconds = reports
                .iter()
                .map(|u| u.report.parse_time_seconds)
                .sum::<f64>()
                / tests_run as f64;
            ParserSummary {
                parser_name: name.to_string(),
                tests_run,
                successes,
                mean_score,
                mean_parse_time_seconds,
                grade: params.scale.grade(mean_score),
            }
        })
        .collect();

    // mean score descending; name ascending keeps ties stable
    summaries.sort_by(|a, b| {
        b.mean_score
            .total_cmp(&a.mean_score)
            .then_with(|| a.parser_name.cmp(&b.parser_name))
    });
    summaries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scorer::{FailureReason, ScoreReport};
    use std::fs;

    fn unit(pdf: &str, parser: &str, score: f64, time: f64) -> UnitReport {
        let params = ScoreParams::default();
        UnitReport {
            pdf_name: pdf.to_string(),
            parser_name: parser.to_string(),
            report: ScoreReport {
                chunk_precision: 0.0,
                chunk_recall: 0.0,
                chunk_f1: 0.0,
                entity_precision: 0.0,
                entity_recall: 0.0,
                entity_f1: 0.0,
                accuracy_pass: false,
                continuity_ok: true,
                performance_pass: true,
                chunk_count_in_range: true,
                parse_time_seconds: time,
                score,
                grade: params.scale.grade(score),
                failure: None,
            },
        }
    }

    #[test]
    fn summaries_ranked_by_mean_score() {
        let units = vec![
            unit("a.pdf", "fast", 0.9, 1.0),
            unit("a.pdf", "slow", 0.5, 3.0),
            unit("b.pdf", "fast", 0.7, 1.0),
            unit("b.pdf", "slow", 0.6, 3.0),
        ];
        let summaries = summarize(&units, &ScoreParams::default());
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].parser_name, "fast");
        assert!((summaries[0].mean_score - 0.8).abs() < 1e-12);
        assert_eq!(summaries[0].grade, Grade::B);
        assert_eq!(summaries[1].parser_name, "slow");
        assert!((summaries[1].mean_score - 0.55).abs() < 1e-12);
    }

    #[test]
    fn summary_counts_failures_but_keeps_them_in_the_mean() {
        let mut failed = unit("a.pdf", "flaky", 0.0, 10.0);
        failed.report = ScoreReport::failed(FailureReason::Timeout, 10.0);
        let units = vec![failed, unit("b.pdf", "flaky", 1.0, 1.0)];
        let summaries = summarize(&units, &ScoreParams::default());
        assert_eq!(summaries[0].tests_run, 2);
        assert_eq!(summaries[0].successes, 1);
        assert!((summaries[0].mean_score - 0.5).abs() < 1e-12);
    }

    #[test]
    fn discovery_is_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.fire.json"), "{}").unwrap();
        fs::write(dir.path().join("a.fire.json"), "{}").unwrap();
        fs::write(dir.path().join("c.json"), "{}").unwrap();
        fs::write(dir.path().join("notes.txt"), "").unwrap();

        let found = discover_fixtures(dir.path()).unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, ["a.fire.json", "b.fire.json"]);
    }

    #[test]
    fn replay_parser_reads_sibling_output() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("doc.json"),
            r#"{"chunks": [{"title": "Scope", "start_page": 1, "end_page": 3}]}"#,
        )
        .unwrap();

        let parser = ReplayParser::new("replay", dir.path());
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let out = rt
            .block_on(parser.extract(Path::new("/fixtures/doc.pdf")))
            .unwrap();
        assert_eq!(out.chunks.len(), 1);
        assert_eq!(out.chunks[0].title, "Scope");
    }

    #[test]
    fn replay_parser_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let parser = ReplayParser::new("replay", dir.path());
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let err = rt.block_on(parser.extract(Path::new("missing.pdf")));
        assert!(err.is_err());
    }
}
