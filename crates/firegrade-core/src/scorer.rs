//! Turns match results and measured performance into a graded report.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::doc_type::EffectiveConfig;
use crate::matching::{ChunkMatching, EntityMatchConfig, match_chunks, match_entities};
use crate::{Chunk, GroundTruth, ParserOutput};

/// Match counts for one metric (chunks or entities).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub matched: usize,
    pub predicted: usize,
    pub ground_truth: usize,
}

impl Counts {
    /// matched / predicted, with defined zero-handling: an empty prediction
    /// against empty ground truth is a vacuous perfect match (1.0); an empty
    /// prediction against non-empty ground truth is 0, never a divide fault.
    pub fn precision(&self) -> f64 {
        if self.predicted == 0 {
            return if self.ground_truth == 0 { 1.0 } else { 0.0 };
        }
        self.matched as f64 / self.predicted as f64
    }

    /// matched / ground_truth, zero-handling symmetric to [`Counts::precision`].
    pub fn recall(&self) -> f64 {
        if self.ground_truth == 0 {
            return if self.predicted == 0 { 1.0 } else { 0.0 };
        }
        self.matched as f64 / self.ground_truth as f64
    }

    /// Harmonic mean of precision and recall; 0 when both are 0.
    pub fn f1(&self) -> f64 {
        let p = self.precision();
        let r = self.recall();
        if p + r == 0.0 {
            return 0.0;
        }
        2.0 * p * r / (p + r)
    }
}

/// Letter grade summarizing a unit's combined score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
    F,
}

impl Grade {
    pub fn letter(&self) -> &'static str {
        match self {
            Grade::A => "A",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
            Grade::F => "F",
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.letter())
    }
}

/// Cutoffs for the letter scale. Configuration, not constants, so the
/// mapping can be tested in isolation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GradeScale {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
}

impl Default for GradeScale {
    fn default() -> Self {
        Self {
            a: 0.9,
            b: 0.8,
            c: 0.7,
            d: 0.6,
        }
    }
}

impl GradeScale {
    /// Map a combined score onto the letter scale. Monotonic by construction.
    pub fn grade(&self, score: f64) -> Grade {
        if score >= self.a {
            Grade::A
        } else if score >= self.b {
            Grade::B
        } else if score >= self.c {
            Grade::C
        } else if score >= self.d {
            Grade::D
        } else {
            Grade::F
        }
    }
}

/// Weights for combining the component scores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GradeWeights {
    pub entity_f1: f64,
    pub chunk_f1: f64,
    pub performance: f64,
}

impl Default for GradeWeights {
    fn default() -> Self {
        Self {
            entity_f1: 0.4,
            chunk_f1: 0.4,
            performance: 0.2,
        }
    }
}

/// Why a unit scored zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    Timeout,
    Crash(String),
    SchemaViolation(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Timeout => f.write_str("timeout"),
            FailureReason::Crash(msg) => write!(f, "crash: {msg}"),
            FailureReason::SchemaViolation(msg) => write!(f, "schema violation: {msg}"),
        }
    }
}

/// Measured performance of one parser invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Measured {
    pub parse_time_seconds: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<f64>,
}

/// The graded report for one (parser, PDF) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreReport {
    pub chunk_precision: f64,
    pub chunk_recall: f64,
    pub chunk_f1: f64,
    pub entity_precision: f64,
    pub entity_recall: f64,
    pub entity_f1: f64,
    /// Entity metrics clear the document type's accuracy thresholds.
    pub accuracy_pass: bool,
    pub continuity_ok: bool,
    pub performance_pass: bool,
    /// Informational: predicted chunk count within the document type's bounds.
    pub chunk_count_in_range: bool,
    pub parse_time_seconds: f64,
    pub score: f64,
    pub grade: Grade,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,
}

impl ScoreReport {
    /// Zero-score report for a unit that never produced usable output.
    pub fn failed(reason: FailureReason, parse_time_seconds: f64) -> Self {
        Self {
            chunk_precision: 0.0,
            chunk_recall: 0.0,
            chunk_f1: 0.0,
            entity_precision: 0.0,
            entity_recall: 0.0,
            entity_f1: 0.0,
            accuracy_pass: false,
            continuity_ok: false,
            performance_pass: false,
            chunk_count_in_range: false,
            parse_time_seconds,
            score: 0.0,
            grade: Grade::F,
            failure: Some(reason),
        }
    }

    pub fn passed(&self) -> bool {
        self.failure.is_none()
    }
}

/// Scoring knobs independent of the document type.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreParams {
    pub entity: EntityMatchConfig,
    pub weights: GradeWeights,
    pub scale: GradeScale,
    /// Allowed deviation, in pages, between a predicted gap and the ground
    /// truth's own gap before continuity fails.
    pub continuity_slack: i64,
}

impl Default for ScoreParams {
    fn default() -> Self {
        Self {
            entity: EntityMatchConfig::default(),
            weights: GradeWeights::default(),
            scale: GradeScale::default(),
            continuity_slack: 0,
        }
    }
}

/// Whether the prediction preserves document order.
///
/// Matched pairs are walked in ground-truth start-page order; the predicted
/// counterparts must have non-decreasing start pages, and each adjacent
/// predicted gap must stay within `slack` pages of the ground truth's own
/// declared gap. This checks the prediction against the ground truth's
/// continuity, not the ground truth against an ideal.
pub fn continuity_ok(
    pred: &[Chunk],
    gt: &[Chunk],
    matching: &ChunkMatching,
    slack: i64,
) -> bool {
    let mut ordered: Vec<(&Chunk, &Chunk)> = matching
        .pairs
        .iter()
        .map(|pair| (&pred[pair.pred], &gt[pair.gt]))
        .collect();
    ordered.sort_by_key(|(_, g)| (g.start_page, g.end_page));

    for window in ordered.windows(2) {
        let (p_prev, g_prev) = window[0];
        let (p_next, g_next) = window[1];
        if p_next.start_page < p_prev.start_page {
            return false;
        }
        let gt_gap = i64::from(g_next.start_page) - i64::from(g_prev.end_page) - 1;
        let pred_gap = i64::from(p_next.start_page) - i64::from(p_prev.end_page) - 1;
        if (pred_gap - gt_gap).abs() > slack {
            return false;
        }
    }
    true
}

/// Maximum allowed parse time for this document.
///
/// Baseline is the ground truth's recorded `parse_time_seconds` when
/// positive; otherwise a size-based heuristic. The document type's
/// multiplier scales the budget either way.
pub fn allowed_parse_time(gt: &GroundTruth, cfg: &EffectiveConfig) -> f64 {
    let recorded = gt.stats.parse_time_seconds;
    if recorded > 0.0 {
        (recorded * cfg.performance_multiplier).min(cfg.performance.max_time_seconds)
    } else {
        cfg.heuristic_time_budget(gt.metadata.pdf_size_mb)
    }
}

/// Score one prediction against one ground truth record.
pub fn score_unit(
    pred: &ParserOutput,
    gt: &GroundTruth,
    cfg: &EffectiveConfig,
    params: &ScoreParams,
    measured: &Measured,
) -> ScoreReport {
    let chunk_matching = match_chunks(&pred.chunks, &gt.chunks, cfg.accuracy.chunk_iou_threshold);
    let chunk_counts = Counts {
        matched: chunk_matching.pairs.len(),
        predicted: pred.chunks.len(),
        ground_truth: gt.chunks.len(),
    };

    let entity_matching = match_entities(pred.entities(), &gt.entities, &params.entity);
    let entity_counts = Counts {
        matched: entity_matching.pairs.len(),
        predicted: pred.entities().len(),
        ground_truth: gt.entities.len(),
    };

    let continuity = continuity_ok(
        &pred.chunks,
        &gt.chunks,
        &chunk_matching,
        params.continuity_slack,
    );

    let time_ok = measured.parse_time_seconds <= allowed_parse_time(gt, cfg);
    let memory_ok = measured
        .memory_mb
        .is_none_or(|m| m <= cfg.performance.max_memory_mb);
    let performance_pass = time_ok && memory_ok;

    let chunk_f1 = chunk_counts.f1();
    let entity_f1 = entity_counts.f1();
    let accuracy_pass = entity_counts.precision() >= cfg.accuracy.entity_precision_threshold
        && entity_counts.recall() >= cfg.accuracy.entity_recall_threshold
        && entity_f1 >= cfg.accuracy.entity_f1_threshold;
    let performance = if performance_pass { 1.0 } else { 0.0 };
    let score = entity_f1 * params.weights.entity_f1
        + chunk_f1 * params.weights.chunk_f1
        + performance * params.weights.performance;

    ScoreReport {
        chunk_precision: chunk_counts.precision(),
        chunk_recall: chunk_counts.recall(),
        chunk_f1,
        entity_precision: entity_counts.precision(),
        entity_recall: entity_counts.recall(),
        entity_f1,
        accuracy_pass,
        continuity_ok: continuity,
        performance_pass,
        chunk_count_in_range: (cfg.min_chunks..=cfg.max_chunks).contains(&pred.chunks.len()),
        parse_time_seconds: measured.parse_time_seconds,
        score,
        grade: params.scale.grade(score),
        failure: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc_type::{DocumentType, Overrides, apply_overrides};
    use crate::{
        Diameter, Entity, EntityType, GroundTruthMetadata, GroundTruthStats,
    };

    fn chunk(title: &str, start: u32, end: u32) -> Chunk {
        Chunk {
            title: title.to_string(),
            start_page: start,
            end_page: end,
        }
    }

    fn entity(id: &str, page: u32) -> Entity {
        Entity {
            id: id.to_string(),
            entity_type: EntityType::Pipe,
            material: "steel".to_string(),
            diameter: Diameter::Inches(2.0),
            schedule: None,
            location_page: page,
        }
    }

    fn ground_truth(chunks: Vec<Chunk>, entities: Vec<Entity>, parse_time: f64) -> GroundTruth {
        GroundTruth {
            metadata: GroundTruthMetadata {
                pdf_name: "doc.pdf".to_string(),
                pdf_size_mb: 1.0,
                total_pages: 20,
                generation_date: "2025-01-01".to_string(),
                parser_version: "1.0.0".to_string(),
                manual_validation: true,
                notes: String::new(),
            },
            stats: GroundTruthStats {
                total_chunks: chunks.len(),
                total_entities: entities.len(),
                parse_time_seconds: parse_time,
                throughput_mb_per_sec: 1.0,
            },
            chunks,
            entities,
        }
    }

    fn spec_config() -> EffectiveConfig {
        apply_overrides(DocumentType::Specification, &Overrides::default())
    }

    // ── Counts zero-handling ────────────────────────────────────────────

    #[test]
    fn empty_empty_is_vacuous_perfect_match() {
        let c = Counts::default();
        assert_eq!(c.precision(), 1.0);
        assert_eq!(c.recall(), 1.0);
        assert_eq!(c.f1(), 1.0);
    }

    #[test]
    fn empty_prediction_nonempty_truth() {
        let c = Counts {
            matched: 0,
            predicted: 0,
            ground_truth: 3,
        };
        assert_eq!(c.precision(), 0.0);
        assert_eq!(c.recall(), 0.0);
        assert_eq!(c.f1(), 0.0);
    }

    #[test]
    fn nonempty_prediction_empty_truth() {
        let c = Counts {
            matched: 0,
            predicted: 3,
            ground_truth: 0,
        };
        assert_eq!(c.precision(), 0.0);
        assert_eq!(c.recall(), 0.0);
    }

    #[test]
    fn partial_match_counts() {
        let c = Counts {
            matched: 2,
            predicted: 4,
            ground_truth: 2,
        };
        assert_eq!(c.precision(), 0.5);
        assert_eq!(c.recall(), 1.0);
        assert!((c.f1() - 2.0 / 3.0).abs() < 1e-12);
    }

    // ── grade mapping ───────────────────────────────────────────────────

    #[test]
    fn grade_scale_boundaries() {
        let scale = GradeScale::default();
        assert_eq!(scale.grade(0.95), Grade::A);
        assert_eq!(scale.grade(0.9), Grade::A);
        assert_eq!(scale.grade(0.89), Grade::B);
        assert_eq!(scale.grade(0.7), Grade::C);
        assert_eq!(scale.grade(0.6), Grade::D);
        assert_eq!(scale.grade(0.59), Grade::F);
        assert_eq!(scale.grade(0.0), Grade::F);
    }

    #[test]
    fn grade_is_monotonic_in_component_scores() {
        // raising entity_f1 (or chunk_f1) while holding the rest fixed never
        // lowers the grade
        let params = ScoreParams::default();
        let mut previous = Grade::F;
        for step in 0..=20 {
            let entity_f1 = step as f64 / 20.0;
            let score = entity_f1 * params.weights.entity_f1 + 0.5 * params.weights.chunk_f1;
            let grade = params.scale.grade(score);
            assert!(grade <= previous || step == 0, "grade regressed at {entity_f1}");
            previous = grade;
        }
    }

    // ── continuity ──────────────────────────────────────────────────────

    #[test]
    fn continuity_holds_for_exact_prediction() {
        let gt = vec![chunk("A", 1, 5), chunk("B", 6, 10)];
        let matching = match_chunks(&gt, &gt, 0.7);
        assert!(continuity_ok(&gt, &gt, &matching, 0));
    }

    #[test]
    fn continuity_ignores_list_order() {
        // list position is irrelevant; only matched page order counts
        let gt = vec![chunk("A", 1, 5), chunk("B", 6, 10)];
        let pred = vec![chunk("B'", 6, 10), chunk("A'", 1, 5)];
        let matching = match_chunks(&pred, &gt, 0.7);
        assert!(continuity_ok(&pred, &gt, &matching, 0));
    }

    #[test]
    fn continuity_fails_on_gap_beyond_slack() {
        let gt = vec![chunk("A", 1, 5), chunk("B", 6, 10)];
        let pred = vec![chunk("A'", 1, 5), chunk("B'", 8, 10)];
        let matching = match_chunks(&pred, &gt, 0.5);
        assert_eq!(matching.pairs.len(), 2);
        // predicted gap is 2 pages where ground truth has 0
        assert!(!continuity_ok(&pred, &gt, &matching, 0));
        assert!(continuity_ok(&pred, &gt, &matching, 2));
    }

    // ── performance ─────────────────────────────────────────────────────

    #[test]
    fn baseline_from_ground_truth_stats() {
        let gt = ground_truth(vec![chunk("A", 1, 5)], vec![], 2.0);
        let cfg = spec_config();
        // 2.0s baseline * 1.4 multiplier
        assert!((allowed_parse_time(&gt, &cfg) - 2.8).abs() < 1e-12);
    }

    #[test]
    fn baseline_falls_back_to_size_heuristic() {
        let gt = ground_truth(vec![chunk("A", 1, 5)], vec![], 0.0);
        let cfg = spec_config();
        // (5 + 1*2) * 1.4
        assert!((allowed_parse_time(&gt, &cfg) - 9.8).abs() < 1e-12);
    }

    // ── end-to-end scoring ──────────────────────────────────────────────

    #[test]
    fn identical_prediction_scores_perfect() {
        let gt = ground_truth(
            vec![chunk("A", 1, 5), chunk("B", 6, 10)],
            vec![entity("e1", 2), entity("e2", 7)],
            5.0,
        );
        let pred = ParserOutput {
            chunks: gt.chunks.clone(),
            entities: Some(gt.entities.clone()),
            metadata: serde_json::Value::Null,
        };
        let report = score_unit(
            &pred,
            &gt,
            &spec_config(),
            &ScoreParams::default(),
            &Measured {
                parse_time_seconds: 1.0,
                memory_mb: None,
            },
        );
        assert_eq!(report.chunk_f1, 1.0);
        assert_eq!(report.entity_f1, 1.0);
        assert!(report.accuracy_pass);
        assert!(report.performance_pass);
        assert!(report.continuity_ok);
        assert_eq!(report.score, 1.0);
        assert_eq!(report.grade, Grade::A);
    }

    #[test]
    fn shifted_chunks_match_at_loose_threshold() {
        // IoU 0.8 on both pairs
        let gt = ground_truth(
            vec![chunk("A", 1, 5), chunk("B", 6, 10)],
            vec![],
            5.0,
        );
        let pred = ParserOutput {
            chunks: vec![chunk("A'", 1, 4), chunk("B'", 7, 10)],
            entities: None,
            metadata: serde_json::Value::Null,
        };

        let overrides = Overrides {
            chunk_iou_threshold: Some(0.5),
            ..Default::default()
        };
        let cfg = apply_overrides(DocumentType::Specification, &overrides);
        let report = score_unit(
            &pred,
            &gt,
            &cfg,
            &ScoreParams::default(),
            &Measured::default(),
        );
        assert_eq!(report.chunk_f1, 1.0);

        let strict = Overrides {
            chunk_iou_threshold: Some(0.9),
            ..Default::default()
        };
        let cfg = apply_overrides(DocumentType::Specification, &strict);
        let report = score_unit(
            &pred,
            &gt,
            &cfg,
            &ScoreParams::default(),
            &Measured::default(),
        );
        assert_eq!(report.chunk_precision, 0.0);
        assert_eq!(report.chunk_recall, 0.0);
        assert_eq!(report.chunk_f1, 0.0);
    }

    #[test]
    fn empty_prediction_against_empty_truth_entities() {
        // chunk-only document: no entities on either side is vacuously perfect
        let gt = ground_truth(vec![chunk("A", 1, 5)], vec![], 5.0);
        let pred = ParserOutput {
            chunks: vec![chunk("A", 1, 5)],
            entities: None,
            metadata: serde_json::Value::Null,
        };
        let report = score_unit(
            &pred,
            &gt,
            &spec_config(),
            &ScoreParams::default(),
            &Measured::default(),
        );
        assert_eq!(report.entity_precision, 1.0);
        assert_eq!(report.entity_recall, 1.0);
        assert_eq!(report.entity_f1, 1.0);
    }

    #[test]
    fn slow_parse_fails_performance() {
        let gt = ground_truth(vec![chunk("A", 1, 5)], vec![], 2.0);
        let cfg = spec_config();
        let report = score_unit(
            &ParserOutput {
                chunks: gt.chunks.clone(),
                entities: None,
                metadata: serde_json::Value::Null,
            },
            &gt,
            &cfg,
            &ScoreParams::default(),
            &Measured {
                parse_time_seconds: 60.0,
                memory_mb: None,
            },
        );
        assert!(!report.performance_pass);
        // accuracy still perfect; only the performance weight is lost
        assert!((report.score - 0.8).abs() < 1e-12);
        assert_eq!(report.grade, Grade::B);
    }

    #[test]
    fn memory_over_budget_fails_performance() {
        let gt = ground_truth(vec![chunk("A", 1, 5)], vec![], 5.0);
        let report = score_unit(
            &ParserOutput::default(),
            &gt,
            &spec_config(),
            &ScoreParams::default(),
            &Measured {
                parse_time_seconds: 0.5,
                memory_mb: Some(9000.0),
            },
        );
        assert!(!report.performance_pass);
    }

    #[test]
    fn failed_report_is_zeroed() {
        let report = ScoreReport::failed(FailureReason::Timeout, 12.0);
        assert_eq!(report.grade, Grade::F);
        assert_eq!(report.score, 0.0);
        assert!(!report.performance_pass);
        assert_eq!(report.failure, Some(FailureReason::Timeout));
        assert!(!report.passed());
    }
}
