//! Document type classification and threshold policy.
//!
//! A document's filename determines its type, and the type carries the
//! pass/fail tolerances for scoring: chunk-count bounds, a performance
//! multiplier, and accuracy thresholds. The per-type table is declarative,
//! loaded once into read-only state; override application is a pure
//! function and never mutates the base table.

use std::fmt;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Category a document falls into, derived from its filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    TableOfContents,
    Addendum,
    Manual,
    Specification,
    StressTest,
    Default,
}

/// Ordered filename-pattern rules. First match wins; all matching is
/// case-insensitive substring.
static CLASSIFY_RULES: &[(DocumentType, &[&str])] = &[
    (
        DocumentType::TableOfContents,
        &["table_of_contents", "toc", "contents", "index"],
    ),
    (DocumentType::Addendum, &["addendum", "addenda", "appendix"]),
    (DocumentType::Manual, &["manual"]),
    (
        DocumentType::Specification,
        &["spec", "division", "section"],
    ),
    (DocumentType::StressTest, &["stress_test", "ocr"]),
];

impl DocumentType {
    /// Classify a document name or path.
    ///
    /// An unmatched filename is not an error: it falls back to
    /// [`DocumentType::Default`], which carries moderate thresholds.
    pub fn classify(filename: &str) -> DocumentType {
        let lower = filename.to_lowercase();
        for (doc_type, patterns) in CLASSIFY_RULES {
            if patterns.iter().any(|p| lower.contains(p)) {
                return *doc_type;
            }
        }
        DocumentType::Default
    }

    pub fn config(&self) -> &'static DocTypeConfig {
        let idx = DOC_TYPE_TABLE
            .iter()
            .position(|(t, _)| t == self)
            .unwrap_or(DOC_TYPE_TABLE.len() - 1);
        &DOC_TYPE_TABLE[idx].1
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.config().name)
    }
}

/// Accuracy tolerances applied when scoring one document.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccuracyThresholds {
    pub entity_precision_threshold: f64,
    pub entity_recall_threshold: f64,
    pub entity_f1_threshold: f64,
    pub chunk_iou_threshold: f64,
}

impl Default for AccuracyThresholds {
    fn default() -> Self {
        Self {
            entity_precision_threshold: 0.9,
            entity_recall_threshold: 0.9,
            entity_f1_threshold: 0.9,
            chunk_iou_threshold: 0.7,
        }
    }
}

/// Per-type configuration bundle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocTypeConfig {
    pub name: &'static str,
    pub min_chunks: usize,
    pub max_chunks: usize,
    pub performance_multiplier: f64,
    pub accuracy: AccuracyThresholds,
}

/// Global performance thresholds, independent of document type.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceThresholds {
    pub base_time_seconds: f64,
    pub time_per_mb_seconds: f64,
    pub max_time_seconds: f64,
    pub min_throughput_mb_per_sec: f64,
    pub max_memory_mb: f64,
}

impl Default for PerformanceThresholds {
    fn default() -> Self {
        Self {
            base_time_seconds: 5.0,
            time_per_mb_seconds: 2.0,
            max_time_seconds: 120.0,
            min_throughput_mb_per_sec: 0.5,
            max_memory_mb: 2000.0,
        }
    }
}

/// The per-type threshold table. Read-only after first use.
static DOC_TYPE_TABLE: Lazy<Vec<(DocumentType, DocTypeConfig)>> = Lazy::new(|| {
    vec![
        (
            DocumentType::TableOfContents,
            DocTypeConfig {
                name: "Table of Contents",
                min_chunks: 3,
                max_chunks: 20,
                // TOCs are usually faster to parse
                performance_multiplier: 0.8,
                accuracy: AccuracyThresholds::default(),
            },
        ),
        (
            DocumentType::Addendum,
            DocTypeConfig {
                name: "Addendum",
                min_chunks: 5,
                max_chunks: 25,
                performance_multiplier: 1.0,
                accuracy: AccuracyThresholds::default(),
            },
        ),
        (
            DocumentType::Manual,
            DocTypeConfig {
                name: "Project Manual",
                min_chunks: 15,
                max_chunks: 100,
                performance_multiplier: 1.8,
                accuracy: AccuracyThresholds::default(),
            },
        ),
        (
            DocumentType::Specification,
            DocTypeConfig {
                name: "Specification",
                min_chunks: 8,
                max_chunks: 50,
                performance_multiplier: 1.4,
                accuracy: AccuracyThresholds::default(),
            },
        ),
        (
            DocumentType::StressTest,
            DocTypeConfig {
                name: "OCR Stress Test",
                min_chunks: 5,
                max_chunks: 30,
                // OCR documents are much slower and chunk less cleanly
                performance_multiplier: 4.0,
                accuracy: AccuracyThresholds {
                    entity_precision_threshold: 0.6,
                    entity_recall_threshold: 0.6,
                    entity_f1_threshold: 0.6,
                    chunk_iou_threshold: 0.5,
                },
            },
        ),
        (
            DocumentType::Default,
            DocTypeConfig {
                name: "Default",
                min_chunks: 5,
                max_chunks: 40,
                performance_multiplier: 1.2,
                accuracy: AccuracyThresholds::default(),
            },
        ),
    ]
});

#[derive(Error, Debug, Clone, PartialEq)]
pub enum OverrideError {
    #[error("override {key}: expected a number, got {value:?}")]
    NotANumber { key: String, value: String },
    #[error("override {key}: expected a boolean, got {value:?}")]
    NotABool { key: String, value: String },
    #[error("override {key}: {value} out of range (expected {range})")]
    OutOfRange {
        key: String,
        value: f64,
        range: &'static str,
    },
}

/// Externally supplied override values (environment-style).
///
/// Precedence when building an [`EffectiveConfig`]:
/// explicit override > per-type default > global default.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overrides {
    pub max_time_seconds: Option<f64>,
    pub min_throughput_mb_per_sec: Option<f64>,
    pub entity_precision_threshold: Option<f64>,
    pub entity_recall_threshold: Option<f64>,
    pub chunk_iou_threshold: Option<f64>,
    pub timeout_seconds: Option<f64>,
    pub subset_size: Option<usize>,
    pub skip_slow: Option<bool>,
    pub parallel: Option<bool>,
}

pub const ENV_MAX_TIME: &str = "FIREGRADE_MAX_TIME_SECONDS";
pub const ENV_MIN_THROUGHPUT: &str = "FIREGRADE_MIN_THROUGHPUT";
pub const ENV_ENTITY_PRECISION: &str = "FIREGRADE_ENTITY_PRECISION_THRESHOLD";
pub const ENV_ENTITY_RECALL: &str = "FIREGRADE_ENTITY_RECALL_THRESHOLD";
pub const ENV_CHUNK_IOU: &str = "FIREGRADE_CHUNK_IOU_THRESHOLD";
pub const ENV_TIMEOUT: &str = "FIREGRADE_TIMEOUT_SECONDS";
pub const ENV_SUBSET_SIZE: &str = "FIREGRADE_SUBSET_SIZE";
pub const ENV_SKIP_SLOW: &str = "FIREGRADE_SKIP_SLOW";
pub const ENV_DISABLE_PARALLEL: &str = "FIREGRADE_DISABLE_PARALLEL";

impl Overrides {
    /// Read overrides from the process environment.
    ///
    /// A malformed or out-of-range value fails fast with the offending key
    /// named; values are never silently clamped.
    pub fn from_env() -> Result<Self, OverrideError> {
        Ok(Overrides {
            max_time_seconds: read_positive(ENV_MAX_TIME)?,
            min_throughput_mb_per_sec: read_positive(ENV_MIN_THROUGHPUT)?,
            entity_precision_threshold: read_ratio(ENV_ENTITY_PRECISION)?,
            entity_recall_threshold: read_ratio(ENV_ENTITY_RECALL)?,
            chunk_iou_threshold: read_ratio(ENV_CHUNK_IOU)?,
            timeout_seconds: read_positive(ENV_TIMEOUT)?,
            subset_size: read_count(ENV_SUBSET_SIZE)?,
            skip_slow: read_bool(ENV_SKIP_SLOW)?,
            parallel: read_bool(ENV_DISABLE_PARALLEL)?.map(|disabled| !disabled),
        })
    }

    /// Merge, with `overlay` values taking precedence.
    pub fn merge(base: Overrides, overlay: Overrides) -> Overrides {
        Overrides {
            max_time_seconds: overlay.max_time_seconds.or(base.max_time_seconds),
            min_throughput_mb_per_sec: overlay
                .min_throughput_mb_per_sec
                .or(base.min_throughput_mb_per_sec),
            entity_precision_threshold: overlay
                .entity_precision_threshold
                .or(base.entity_precision_threshold),
            entity_recall_threshold: overlay
                .entity_recall_threshold
                .or(base.entity_recall_threshold),
            chunk_iou_threshold: overlay.chunk_iou_threshold.or(base.chunk_iou_threshold),
            timeout_seconds: overlay.timeout_seconds.or(base.timeout_seconds),
            subset_size: overlay.subset_size.or(base.subset_size),
            skip_slow: overlay.skip_slow.or(base.skip_slow),
            parallel: overlay.parallel.or(base.parallel),
        }
    }

    /// Validate all present numeric values. Used when overrides come from a
    /// config file rather than [`Overrides::from_env`].
    pub fn validate(&self) -> Result<(), OverrideError> {
        check_ratio("entity_precision_threshold", self.entity_precision_threshold)?;
        check_ratio("entity_recall_threshold", self.entity_recall_threshold)?;
        check_ratio("chunk_iou_threshold", self.chunk_iou_threshold)?;
        check_positive("max_time_seconds", self.max_time_seconds)?;
        check_positive("min_throughput_mb_per_sec", self.min_throughput_mb_per_sec)?;
        check_positive("timeout_seconds", self.timeout_seconds)?;
        Ok(())
    }
}

fn read_raw(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn read_f64(key: &str) -> Result<Option<f64>, OverrideError> {
    match read_raw(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| OverrideError::NotANumber {
                key: key.to_string(),
                value: raw,
            }),
    }
}

fn read_ratio(key: &str) -> Result<Option<f64>, OverrideError> {
    let value = read_f64(key)?;
    check_ratio(key, value)?;
    Ok(value)
}

fn read_positive(key: &str) -> Result<Option<f64>, OverrideError> {
    let value = read_f64(key)?;
    check_positive(key, value)?;
    Ok(value)
}

fn read_count(key: &str) -> Result<Option<usize>, OverrideError> {
    match read_raw(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<usize>()
            .map(Some)
            .map_err(|_| OverrideError::NotANumber {
                key: key.to_string(),
                value: raw,
            }),
    }
}

fn read_bool(key: &str) -> Result<Option<bool>, OverrideError> {
    match read_raw(key) {
        None => Ok(None),
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(Some(true)),
            "false" | "0" | "no" => Ok(Some(false)),
            _ => Err(OverrideError::NotABool {
                key: key.to_string(),
                value: raw,
            }),
        },
    }
}

fn check_ratio(key: &str, value: Option<f64>) -> Result<(), OverrideError> {
    if let Some(v) = value {
        if !(0.0..=1.0).contains(&v) || !v.is_finite() {
            return Err(OverrideError::OutOfRange {
                key: key.to_string(),
                value: v,
                range: "[0, 1]",
            });
        }
    }
    Ok(())
}

fn check_positive(key: &str, value: Option<f64>) -> Result<(), OverrideError> {
    if let Some(v) = value {
        if !v.is_finite() || v <= 0.0 {
            return Err(OverrideError::OutOfRange {
                key: key.to_string(),
                value: v,
                range: "> 0",
            });
        }
    }
    Ok(())
}

/// Thresholds in effect for one document after override application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectiveConfig {
    pub doc_type: DocumentType,
    pub min_chunks: usize,
    pub max_chunks: usize,
    pub performance_multiplier: f64,
    pub accuracy: AccuracyThresholds,
    pub performance: PerformanceThresholds,
}

impl EffectiveConfig {
    /// Maximum allowed parse time for a document of `size_mb`, used when the
    /// ground truth carries no baseline of its own.
    pub fn heuristic_time_budget(&self, size_mb: f64) -> f64 {
        let base =
            self.performance.base_time_seconds + size_mb * self.performance.time_per_mb_seconds;
        (base * self.performance_multiplier).min(self.performance.max_time_seconds)
    }
}

/// Build the effective configuration for a document type.
///
/// Pure: reads the static table and the overrides, mutates neither.
pub fn apply_overrides(doc_type: DocumentType, overrides: &Overrides) -> EffectiveConfig {
    let base = doc_type.config();
    let mut performance = PerformanceThresholds::default();
    if let Some(v) = overrides.max_time_seconds {
        performance.max_time_seconds = v;
    }
    if let Some(v) = overrides.min_throughput_mb_per_sec {
        performance.min_throughput_mb_per_sec = v;
    }

    let mut accuracy = base.accuracy;
    if let Some(v) = overrides.entity_precision_threshold {
        accuracy.entity_precision_threshold = v;
    }
    if let Some(v) = overrides.entity_recall_threshold {
        accuracy.entity_recall_threshold = v;
    }
    if let Some(v) = overrides.chunk_iou_threshold {
        accuracy.chunk_iou_threshold = v;
    }

    EffectiveConfig {
        doc_type,
        min_chunks: base.min_chunks,
        max_chunks: base.max_chunks,
        performance_multiplier: base.performance_multiplier,
        accuracy,
        performance,
    }
}
