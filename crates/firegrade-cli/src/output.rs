use std::io::Write;

use owo_colors::OwoColorize;

use firegrade_core::doc_type::{DocumentType, EffectiveConfig};
use firegrade_core::schema::{ContinuityIssue, Violation};
use firegrade_core::scorer::{FailureReason, Grade, ScoreReport};
use firegrade_core::{ParserSummary, UnitReport};

/// Whether to use colored output.
#[derive(Debug, Clone, Copy)]
pub struct ColorMode(pub bool);

impl ColorMode {
    pub fn enabled(&self) -> bool {
        self.0
    }
}

/// Print the result of validating one file.
pub fn print_validation(
    w: &mut dyn Write,
    file_name: &str,
    violations: &[Violation],
    continuity: &[ContinuityIssue],
    color: ColorMode,
) -> std::io::Result<()> {
    writeln!(w, "Validating {}...", file_name)?;

    if violations.is_empty() {
        if color.enabled() {
            writeln!(w, "{}", "Schema: OK".green())?;
        } else {
            writeln!(w, "Schema: OK")?;
        }
    } else {
        if color.enabled() {
            writeln!(w, "{}", format!("Schema: {} violation(s)", violations.len()).red())?;
        } else {
            writeln!(w, "Schema: {} violation(s)", violations.len())?;
        }
        for v in violations {
            writeln!(w, "  {}", v)?;
        }
    }

    if !continuity.is_empty() {
        if color.enabled() {
            writeln!(
                w,
                "{}",
                format!("Continuity: {} issue(s)", continuity.len()).yellow()
            )?;
        } else {
            writeln!(w, "Continuity: {} issue(s)", continuity.len())?;
        }
        for issue in continuity {
            writeln!(w, "  {}", issue)?;
        }
    }
    Ok(())
}

fn grade_cell(grade: Grade, color: ColorMode) -> String {
    if !color.enabled() {
        return grade.letter().to_string();
    }
    match grade {
        Grade::A | Grade::B => grade.letter().green().to_string(),
        Grade::C => grade.letter().yellow().to_string(),
        Grade::D | Grade::F => grade.letter().red().to_string(),
    }
}

fn pass_cell(pass: bool, color: ColorMode) -> String {
    match (pass, color.enabled()) {
        (true, true) => "pass".green().to_string(),
        (true, false) => "pass".to_string(),
        (false, true) => "fail".red().to_string(),
        (false, false) => "fail".to_string(),
    }
}

/// Print a single unit's score report.
pub fn print_score_report(
    w: &mut dyn Write,
    pdf_name: &str,
    doc_type: DocumentType,
    report: &ScoreReport,
    color: ColorMode,
) -> std::io::Result<()> {
    let sep = "=".repeat(60);
    writeln!(w, "{}", sep)?;
    if color.enabled() {
        writeln!(w, "{} ({})", pdf_name.bold(), doc_type.config().name)?;
    } else {
        writeln!(w, "{} ({})", pdf_name, doc_type.config().name)?;
    }
    writeln!(w, "{}", sep)?;

    if let Some(ref reason) = report.failure {
        let msg = format!("FAILED: {}", reason);
        if color.enabled() {
            writeln!(w, "{}", msg.red().bold())?;
        } else {
            writeln!(w, "{}", msg)?;
        }
        return Ok(());
    }

    writeln!(
        w,
        "  Chunks:   P {:.3} | R {:.3} | F1 {:.3}",
        report.chunk_precision, report.chunk_recall, report.chunk_f1
    )?;
    writeln!(
        w,
        "  Entities: P {:.3} | R {:.3} | F1 {:.3}",
        report.entity_precision, report.entity_recall, report.entity_f1
    )?;
    writeln!(
        w,
        "  Accuracy: {} | Continuity: {} | Performance: {} ({:.2}s)",
        pass_cell(report.accuracy_pass, color),
        pass_cell(report.continuity_ok, color),
        pass_cell(report.performance_pass, color),
        report.parse_time_seconds,
    )?;
    if !report.chunk_count_in_range {
        let msg = "  Chunk count outside the expected range for this document type";
        if color.enabled() {
            writeln!(w, "{}", msg.yellow())?;
        } else {
            writeln!(w, "{}", msg)?;
        }
    }
    writeln!(w)?;
    writeln!(
        w,
        "  Score: {:.3}  Grade: {}",
        report.score,
        grade_cell(report.grade, color)
    )?;
    Ok(())
}

/// Print the ranked parser summary table.
pub fn print_ranking(
    w: &mut dyn Write,
    parsers: &[ParserSummary],
    color: ColorMode,
) -> std::io::Result<()> {
    writeln!(w)?;
    let sep = "=".repeat(60);
    if color.enabled() {
        writeln!(w, "{}", sep.bold())?;
        writeln!(w, "{}", "PARSER RANKING".bold())?;
        writeln!(w, "{}", sep.bold())?;
    } else {
        writeln!(w, "{}", sep)?;
        writeln!(w, "PARSER RANKING")?;
        writeln!(w, "{}", sep)?;
    }

    for (rank, summary) in parsers.iter().enumerate() {
        writeln!(
            w,
            "  {}. {:<20} [{}] mean {:.3} | {}/{} ok | {:.2}s avg",
            rank + 1,
            summary.parser_name,
            grade_cell(summary.grade, color),
            summary.mean_score,
            summary.successes,
            summary.tests_run,
            summary.mean_parse_time_seconds,
        )?;
    }
    writeln!(w)?;
    Ok(())
}

/// Print failed units, if any.
pub fn print_failures(
    w: &mut dyn Write,
    units: &[UnitReport],
    color: ColorMode,
) -> std::io::Result<()> {
    let failed: Vec<&UnitReport> = units.iter().filter(|u| u.report.failure.is_some()).collect();
    if failed.is_empty() {
        return Ok(());
    }

    if color.enabled() {
        writeln!(w, "{}", format!("{} failed unit(s):", failed.len()).red())?;
    } else {
        writeln!(w, "{} failed unit(s):", failed.len())?;
    }
    for unit in failed {
        let reason = match &unit.report.failure {
            Some(FailureReason::Timeout) => "timeout".to_string(),
            Some(FailureReason::Crash(msg)) => format!("crash: {msg}"),
            Some(FailureReason::SchemaViolation(msg)) => format!("schema: {msg}"),
            None => continue,
        };
        writeln!(w, "  {} / {} - {}", unit.pdf_name, unit.parser_name, reason)?;
    }
    writeln!(w)?;
    Ok(())
}

/// Print a file name's document type and effective thresholds.
pub fn print_classification(
    w: &mut dyn Write,
    name: &str,
    config: &EffectiveConfig,
    color: ColorMode,
) -> std::io::Result<()> {
    if color.enabled() {
        writeln!(
            w,
            "{} -> {}",
            name.bold(),
            config.doc_type.config().name.cyan()
        )?;
    } else {
        writeln!(w, "{} -> {}", name, config.doc_type.config().name)?;
    }
    writeln!(
        w,
        "  chunks {}..{} | perf x{:.1} | entity P/R/F1 >= {:.2}/{:.2}/{:.2} | chunk IoU >= {:.2}",
        config.min_chunks,
        config.max_chunks,
        config.performance_multiplier,
        config.accuracy.entity_precision_threshold,
        config.accuracy.entity_recall_threshold,
        config.accuracy.entity_f1_threshold,
        config.accuracy.chunk_iou_threshold,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> ScoreReport {
        ScoreReport {
            chunk_precision: 1.0,
            chunk_recall: 1.0,
            chunk_f1: 1.0,
            entity_precision: 0.5,
            entity_recall: 0.5,
            entity_f1: 0.5,
            accuracy_pass: false,
            continuity_ok: true,
            performance_pass: true,
            chunk_count_in_range: true,
            parse_time_seconds: 2.5,
            score: 0.8,
            grade: Grade::B,
            failure: None,
        }
    }

    #[test]
    fn score_report_renders_without_color() {
        let mut buf = Vec::new();
        print_score_report(
            &mut buf,
            "doc.pdf",
            DocumentType::Specification,
            &report(),
            ColorMode(false),
        )
        .unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("doc.pdf"));
        assert!(text.contains("Grade: B"));
        assert!(text.contains("F1 0.500"));
    }

    #[test]
    fn failed_report_shows_reason() {
        let mut failed = report();
        failed.failure = Some(FailureReason::Timeout);
        let mut buf = Vec::new();
        print_score_report(
            &mut buf,
            "doc.pdf",
            DocumentType::Specification,
            &failed,
            ColorMode(false),
        )
        .unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("FAILED: timeout"));
    }

    #[test]
    fn ranking_lists_parsers_in_order() {
        let parsers = vec![
            ParserSummary {
                parser_name: "best".to_string(),
                tests_run: 3,
                successes: 3,
                mean_score: 0.9,
                mean_parse_time_seconds: 1.0,
                grade: Grade::A,
            },
            ParserSummary {
                parser_name: "worst".to_string(),
                tests_run: 3,
                successes: 1,
                mean_score: 0.2,
                mean_parse_time_seconds: 5.0,
                grade: Grade::F,
            },
        ];
        let mut buf = Vec::new();
        print_ranking(&mut buf, &parsers, ColorMode(false)).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let best = text.find("1. best").unwrap();
        let worst = text.find("2. worst").unwrap();
        assert!(best < worst);
    }
}
