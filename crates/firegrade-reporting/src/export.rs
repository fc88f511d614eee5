use std::io::Write;
use std::path::Path;

use firegrade_core::scorer::FailureReason;
use firegrade_core::{ParserSummary, UnitReport};

use crate::types::{BenchReport, ExportFormat};

/// Render a report in the given format and write it to `path`.
pub fn export_results(
    report: &BenchReport,
    format: ExportFormat,
    path: &Path,
) -> Result<(), String> {
    let content = render(report, format)?;
    let mut file =
        std::fs::File::create(path).map_err(|e| format!("Failed to create file: {}", e))?;
    file.write_all(content.as_bytes())
        .map_err(|e| format!("Failed to write: {}", e))?;
    Ok(())
}

/// Render a report to a string in the given format.
pub fn render(report: &BenchReport, format: ExportFormat) -> Result<String, String> {
    match format {
        ExportFormat::Json => export_json(report),
        ExportFormat::Csv => Ok(export_csv(report)),
        ExportFormat::Markdown => Ok(export_markdown(report)),
        ExportFormat::Text => Ok(export_text(report)),
    }
}

fn export_json(report: &BenchReport) -> Result<String, String> {
    serde_json::to_string_pretty(report).map_err(|e| format!("Failed to serialize report: {}", e))
}

fn failure_str(unit: &UnitReport) -> &'static str {
    match &unit.report.failure {
        None => "",
        Some(FailureReason::Timeout) => "timeout",
        Some(FailureReason::Crash(_)) => "crash",
        Some(FailureReason::SchemaViolation(_)) => "schema_violation",
    }
}

fn csv_escape(s: &str) -> String {
    if s.contains('"') || s.contains(',') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn export_csv(report: &BenchReport) -> String {
    let mut out = String::from(
        "Pdf,Parser,Grade,Score,ChunkP,ChunkR,ChunkF1,EntityP,EntityR,EntityF1,Continuity,PerfPass,ParseTimeSec,Failure\n",
    );
    for unit in &report.outcome.units {
        let r = &unit.report;
        out.push_str(&format!(
            "{},{},{},{:.4},{:.4},{:.4},{:.4},{:.4},{:.4},{:.4},{},{},{:.3},{}\n",
            csv_escape(&unit.pdf_name),
            csv_escape(&unit.parser_name),
            r.grade,
            r.score,
            r.chunk_precision,
            r.chunk_recall,
            r.chunk_f1,
            r.entity_precision,
            r.entity_recall,
            r.entity_f1,
            r.continuity_ok,
            r.performance_pass,
            r.parse_time_seconds,
            failure_str(unit),
        ));
    }
    out
}

fn md_escape(s: &str) -> String {
    s.replace('|', "\\|")
}

fn export_markdown(report: &BenchReport) -> String {
    let mut out = String::from("# Firegrade Benchmark Results\n\n");
    out.push_str(&format!(
        "Fixtures: `{}` \nGenerated: {}\n\n",
        report.fixtures_dir, report.generated_at
    ));

    out.push_str("## Parser Ranking\n\n");
    out.push_str("| Rank | Parser | Grade | Mean Score | Tests | OK | Mean Time (s) |\n");
    out.push_str("|------|--------|-------|-----------|-------|----|---------------|\n");
    for (rank, summary) in report.outcome.parsers.iter().enumerate() {
        out.push_str(&format!(
            "| {} | {} | {} | {:.3} | {} | {} | {:.2} |\n",
            rank + 1,
            md_escape(&summary.parser_name),
            summary.grade,
            summary.mean_score,
            summary.tests_run,
            summary.successes,
            summary.mean_parse_time_seconds,
        ));
    }
    out.push('\n');

    out.push_str("## Per-Document Results\n\n");
    out.push_str("| PDF | Parser | Grade | Chunk F1 | Entity F1 | Continuity | Perf | Failure |\n");
    out.push_str("|-----|--------|-------|----------|-----------|------------|------|--------|\n");
    for unit in &report.outcome.units {
        let r = &unit.report;
        let failure = failure_str(unit);
        out.push_str(&format!(
            "| {} | {} | {} | {:.3} | {:.3} | {} | {} | {} |\n",
            md_escape(&unit.pdf_name),
            md_escape(&unit.parser_name),
            r.grade,
            r.chunk_f1,
            r.entity_f1,
            if r.continuity_ok { "ok" } else { "broken" },
            if r.performance_pass { "pass" } else { "fail" },
            if failure.is_empty() { "\u{2014}" } else { failure },
        ));
    }
    out.push('\n');
    out
}

fn export_text(report: &BenchReport) -> String {
    let mut out = String::from("Firegrade Benchmark Results\n");
    out.push_str(&"=".repeat(60));
    out.push('\n');
    out.push_str(&format!(
        "Fixtures: {}\nGenerated: {}\n",
        report.fixtures_dir, report.generated_at
    ));

    out.push_str("\nParser ranking\n");
    out.push_str(&"-".repeat(60));
    out.push('\n');
    for (rank, summary) in report.outcome.parsers.iter().enumerate() {
        out.push_str(&format_summary_line(rank + 1, summary));
    }

    out.push_str("\nPer-document results\n");
    out.push_str(&"-".repeat(60));
    out.push('\n');
    let mut current_pdf: Option<&str> = None;
    for unit in &report.outcome.units {
        if current_pdf != Some(unit.pdf_name.as_str()) {
            out.push_str(&format!("\n{}\n", unit.pdf_name));
            current_pdf = Some(unit.pdf_name.as_str());
        }
        let r = &unit.report;
        let failure = failure_str(unit);
        let status = if failure.is_empty() {
            format!(
                "chunk F1 {:.3} | entity F1 {:.3} | {} | {}",
                r.chunk_f1,
                r.entity_f1,
                if r.continuity_ok {
                    "continuity ok"
                } else {
                    "continuity broken"
                },
                if r.performance_pass {
                    "perf pass"
                } else {
                    "perf fail"
                },
            )
        } else {
            format!("FAILED ({failure})")
        };
        out.push_str(&format!(
            "  [{}] {:<20} {} ({:.3}) - {}\n",
            r.grade, unit.parser_name, score_bar(r.score), r.score, status,
        ));
    }
    out
}

fn format_summary_line(rank: usize, summary: &ParserSummary) -> String {
    format!(
        "  {}. {:<20} [{}] mean {:.3} | {}/{} ok | {:.2}s avg\n",
        rank,
        summary.parser_name,
        summary.grade,
        summary.mean_score,
        summary.successes,
        summary.tests_run,
        summary.mean_parse_time_seconds,
    )
}

/// Ten-cell bar visualizing a 0..1 score.
fn score_bar(score: f64) -> String {
    let filled = (score.clamp(0.0, 1.0) * 10.0).round() as usize;
    let mut bar = String::with_capacity(12);
    bar.push('[');
    for i in 0..10 {
        bar.push(if i < filled { '#' } else { '.' });
    }
    bar.push(']');
    bar
}
