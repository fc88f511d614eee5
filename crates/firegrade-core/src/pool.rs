//! Worker pool for grading parser runs.
//!
//! Architecture: a fixed set of worker tasks pulling jobs off a shared
//! queue. Each job invokes one parser on one PDF inside a timeout, with the
//! parser call spawned onto its own task so a panic inside a backend is
//! isolated from the worker. A failing unit produces a zero-score report;
//! it never aborts the batch.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::doc_type::EffectiveConfig;
use crate::schema::{ChunkRules, validate_chunks, validate_entities};
use crate::scorer::{FailureReason, Measured, ScoreParams, ScoreReport, score_unit};
use crate::{GroundTruth, ParserOutput};

/// Error from a parser backend invocation.
#[derive(Debug, thiserror::Error)]
pub enum ParserError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Other(String),
}

/// A parser under test.
///
/// Implementations wrap whatever actually produces chunks and entities for
/// a PDF. The future is boxed so the trait stays dyn-compatible.
pub trait ParserBackend: Send + Sync {
    /// Short identifier used in reports and log lines.
    fn name(&self) -> &str;

    /// Run the parser on one PDF.
    fn extract<'a>(
        &'a self,
        pdf: &'a Path,
    ) -> Pin<Box<dyn Future<Output = Result<ParserOutput, ParserError>> + Send + 'a>>;
}

/// Progress events emitted while a batch runs.
#[derive(Debug, Clone)]
pub enum BenchEvent {
    UnitStarted {
        pdf_name: String,
        parser_name: String,
    },
    UnitFinished {
        pdf_name: String,
        parser_name: String,
        grade: crate::scorer::Grade,
        failed: bool,
    },
}

/// The graded result for one (PDF, parser) pair.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct UnitReport {
    pub pdf_name: String,
    pub parser_name: String,
    pub report: ScoreReport,
}

/// A grading job submitted to the pool.
pub struct BenchJob {
    pub parser: Arc<dyn ParserBackend>,
    pub pdf_name: String,
    pub pdf_path: PathBuf,
    pub ground_truth: Arc<GroundTruth>,
    pub config: Arc<EffectiveConfig>,
    pub params: Arc<ScoreParams>,
    pub timeout: Duration,
    pub result_tx: oneshot::Sender<UnitReport>,
    pub progress: Arc<dyn Fn(BenchEvent) + Send + Sync>,
}

/// A pool of worker tasks that grade parser runs.
///
/// Submit jobs via [`submit()`](BenchPool::submit), receive results via the
/// oneshot receiver paired with each job.
pub struct BenchPool {
    job_tx: async_channel::Sender<BenchJob>,
    pool_handle: JoinHandle<()>,
}

impl BenchPool {
    /// Create a pool with `num_workers` worker tasks.
    pub fn new(num_workers: usize, cancel: CancellationToken) -> Self {
        let (job_tx, job_rx) = async_channel::unbounded::<BenchJob>();

        let pool_handle = tokio::spawn(async move {
            let mut handles = Vec::with_capacity(num_workers.max(1));
            for _ in 0..num_workers.max(1) {
                handles.push(tokio::spawn(worker_loop(job_rx.clone(), cancel.clone())));
            }

            // Drop our clone so workers are the last holders
            drop(job_rx);

            for h in handles {
                let _ = h.await;
            }
        });

        Self {
            job_tx,
            pool_handle,
        }
    }

    /// Submit a job to the pool.
    pub async fn submit(&self, job: BenchJob) {
        let _ = self.job_tx.send(job).await;
    }

    /// Close the queue and wait for in-flight jobs to finish.
    pub async fn shutdown(self) {
        self.job_tx.close();
        let _ = self.pool_handle.await;
    }
}

/// Worker loop: pull a job, grade it, send the report back.
///
/// Workers exit when the queue closes. Cancellation drains remaining jobs
/// without running them so every submitted oneshot still resolves.
async fn worker_loop(job_rx: async_channel::Receiver<BenchJob>, cancel: CancellationToken) {
    while let Ok(job) = job_rx.recv().await {
        if cancel.is_cancelled() {
            tracing::debug!(pdf = %job.pdf_name, parser = %job.parser.name(), "skipping: cancelled");
            let report = UnitReport {
                pdf_name: job.pdf_name.clone(),
                parser_name: job.parser.name().to_string(),
                report: ScoreReport::failed(
                    FailureReason::Crash("cancelled before run".to_string()),
                    0.0,
                ),
            };
            let _ = job.result_tx.send(report);
            continue;
        }

        let pdf_name = job.pdf_name.clone();
        let parser_name = job.parser.name().to_string();

        (job.progress)(BenchEvent::UnitStarted {
            pdf_name: pdf_name.clone(),
            parser_name: parser_name.clone(),
        });

        let report = run_unit(&job).await;

        (job.progress)(BenchEvent::UnitFinished {
            pdf_name: pdf_name.clone(),
            parser_name: parser_name.clone(),
            grade: report.grade,
            failed: report.failure.is_some(),
        });

        let _ = job.result_tx.send(UnitReport {
            pdf_name,
            parser_name,
            report,
        });
    }
}

/// Run one parser on one PDF and grade the result.
///
/// The parser runs on its own task so a panicking backend surfaces as a
/// Crash failure instead of taking the worker down. Timeout and elapsed
/// time are measured around the parser call only; scoring is not billed
/// to the parser.
async fn run_unit(job: &BenchJob) -> ScoreReport {
    let parser = Arc::clone(&job.parser);
    let pdf_path = job.pdf_path.clone();

    let start = Instant::now();
    let handle = tokio::spawn(async move { parser.extract(&pdf_path).await });
    let abort = handle.abort_handle();
    let outcome = tokio::time::timeout(job.timeout, handle).await;
    let elapsed = start.elapsed().as_secs_f64();

    let output = match outcome {
        Err(_) => {
            // Stop the detached task; a stalled backend must not keep
            // running after its unit is recorded.
            abort.abort();
            tracing::warn!(
                pdf = %job.pdf_name,
                parser = %job.parser.name(),
                timeout_secs = job.timeout.as_secs_f64(),
                "parser timed out"
            );
            return ScoreReport::failed(FailureReason::Timeout, elapsed);
        }
        Ok(Err(join_err)) => {
            tracing::warn!(pdf = %job.pdf_name, parser = %job.parser.name(), error = %join_err, "parser task crashed");
            return ScoreReport::failed(FailureReason::Crash(join_err.to_string()), elapsed);
        }
        Ok(Ok(Err(parser_err))) => {
            tracing::warn!(pdf = %job.pdf_name, parser = %job.parser.name(), error = %parser_err, "parser failed");
            return ScoreReport::failed(FailureReason::Crash(parser_err.to_string()), elapsed);
        }
        Ok(Ok(Ok(output))) => output,
    };

    if let Some(violation) = first_violation(&output) {
        tracing::warn!(pdf = %job.pdf_name, parser = %job.parser.name(), %violation, "output failed validation");
        return ScoreReport::failed(FailureReason::SchemaViolation(violation), elapsed);
    }

    let measured = Measured {
        parse_time_seconds: elapsed,
        memory_mb: None,
    };
    score_unit(
        &output,
        &job.ground_truth,
        &job.config,
        &job.params,
        &measured,
    )
}

/// First structural problem in a parser's output, if any.
///
/// Parser output may legitimately be empty, so chunk rules carry no minimum
/// here; only malformed items disqualify a run.
fn first_violation(output: &ParserOutput) -> Option<String> {
    let mut violations = validate_chunks(&output.chunks, ChunkRules::default());
    violations.extend(validate_entities(output.entities()));
    violations.first().map(|v| v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Chunk, Diameter, Entity, EntityType};

    struct StaticParser {
        name: String,
        output: ParserOutput,
    }

    impl ParserBackend for StaticParser {
        fn name(&self) -> &str {
            &self.name
        }

        fn extract<'a>(
            &'a self,
            _pdf: &'a Path,
        ) -> Pin<Box<dyn Future<Output = Result<ParserOutput, ParserError>> + Send + 'a>> {
            let output = self.output.clone();
            Box::pin(async move { Ok(output) })
        }
    }

    #[test]
    fn first_violation_reports_bad_chunk() {
        let output = ParserOutput {
            chunks: vec![Chunk {
                title: String::new(),
                start_page: 1,
                end_page: 2,
            }],
            entities: None,
            metadata: serde_json::Value::Null,
        };
        let violation = first_violation(&output);
        assert!(violation.is_some());
    }

    #[test]
    fn first_violation_reports_bad_entity() {
        let output = ParserOutput {
            chunks: vec![],
            entities: Some(vec![Entity {
                id: "e1".to_string(),
                entity_type: EntityType::Pipe,
                material: "steel".to_string(),
                diameter: Diameter::Text("nonsense".to_string()),
                schedule: None,
                location_page: 3,
            }]),
            metadata: serde_json::Value::Null,
        };
        let violation = first_violation(&output);
        assert!(violation.is_some());
    }

    #[test]
    fn empty_output_is_structurally_valid() {
        assert_eq!(first_violation(&ParserOutput::default()), None);
    }

    #[tokio::test]
    async fn static_parser_round_trip() {
        let parser = StaticParser {
            name: "static".to_string(),
            output: ParserOutput::default(),
        };
        let out = parser.extract(Path::new("unused.pdf")).await.unwrap();
        assert!(out.chunks.is_empty());
    }
}
