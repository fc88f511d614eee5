use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use firegrade_core::bench::{BenchOptions, FIXTURE_SUFFIX, ReplayParser, run_benchmark};
use firegrade_core::config_file::load_config;
use firegrade_core::doc_type::{DocumentType, Overrides, apply_overrides};
use firegrade_core::pool::{BenchEvent, ParserBackend};
use firegrade_core::schema::{self, ChunkRules};
use firegrade_core::scorer::{Measured, ScoreParams, score_unit};
use firegrade_core::{GroundTruth, ParserOutput};
use firegrade_reporting::{BenchReport, ExportFormat, render};

mod output;

use output::ColorMode;

/// Firegrade - grade PDF parser output against hand-validated ground truth
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate ground truth (.fire.json) or parser output files
    Validate {
        /// A JSON file, or a directory of .fire.json fixtures
        path: PathBuf,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,
    },

    /// Score one parser output against one ground truth record
    Score {
        /// Path to the parser output JSON
        #[arg(long)]
        prediction: PathBuf,

        /// Path to the ground truth .fire.json
        #[arg(long)]
        ground_truth: PathBuf,

        /// Measured parse time in seconds (default: not measured)
        #[arg(long, default_value_t = 0.0)]
        parse_time: f64,

        /// Emit the report as JSON instead of a table
        #[arg(long)]
        json: bool,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,
    },

    /// Run every registered parser against a fixtures directory
    Bench {
        /// Directory containing *.fire.json ground truth fixtures
        fixtures: PathBuf,

        /// Recorded parser outputs as name=dir (repeatable)
        #[arg(long = "replay", value_name = "NAME=DIR")]
        replays: Vec<String>,

        /// Worker tasks
        #[arg(long, default_value_t = 4)]
        workers: usize,

        /// Write the report to this path instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Report format: text, json, csv, markdown
        #[arg(long, default_value = "text")]
        format: String,

        /// Grade only the first N fixtures
        #[arg(long)]
        subset: Option<usize>,

        /// Run units one at a time
        #[arg(long)]
        serial: bool,

        /// Skip stress test fixtures
        #[arg(long)]
        skip_slow: bool,

        /// Per-unit timeout in seconds
        #[arg(long)]
        timeout: Option<f64>,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,
    },

    /// Show how file names map onto document types and thresholds
    Classify {
        /// PDF file names to classify
        names: Vec<String>,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Validate { path, no_color } => validate(path, no_color),
        Command::Score {
            prediction,
            ground_truth,
            parse_time,
            json,
            no_color,
        } => score(prediction, ground_truth, parse_time, json, no_color),
        Command::Bench {
            fixtures,
            replays,
            workers,
            output,
            format,
            subset,
            serial,
            skip_slow,
            timeout,
            no_color,
        } => {
            bench(
                fixtures, replays, workers, output, format, subset, serial, skip_slow, timeout,
                no_color,
            )
            .await
        }
        Command::Classify { names, no_color } => classify(names, no_color),
    }
}

/// Resolve the override cascade: config file < environment.
fn resolved_overrides() -> anyhow::Result<Overrides> {
    let from_file = load_config().to_overrides();
    let from_env = Overrides::from_env()?;
    let merged = Overrides::merge(from_file, from_env);
    merged.validate()?;
    Ok(merged)
}

fn validate(path: PathBuf, no_color: bool) -> anyhow::Result<()> {
    let color = ColorMode(!no_color);
    let mut writer: Box<dyn Write> = Box::new(std::io::stdout());

    if !path.exists() {
        anyhow::bail!("Path not found: {}", path.display());
    }

    let files: Vec<PathBuf> = if path.is_dir() {
        let mut fixtures: Vec<PathBuf> = std::fs::read_dir(&path)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(FIXTURE_SUFFIX))
            })
            .collect();
        fixtures.sort();
        if fixtures.is_empty() {
            anyhow::bail!("No {} files in {}", FIXTURE_SUFFIX, path.display());
        }
        fixtures
    } else {
        vec![path]
    };

    let mut total_violations = 0;
    for file_path in &files {
        total_violations += validate_one(file_path, &mut writer, color)?;
    }

    if total_violations == 0 {
        Ok(())
    } else {
        anyhow::bail!(
            "{} schema violation(s) across {} file(s)",
            total_violations,
            files.len()
        );
    }
}

fn validate_one(
    file_path: &PathBuf,
    writer: &mut Box<dyn Write>,
    color: ColorMode,
) -> anyhow::Result<usize> {
    let file_name = file_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| file_path.display().to_string());
    let content = std::fs::read_to_string(file_path)?;

    let (violations, continuity) = collect_violations(&file_name, &content);
    output::print_validation(writer, &file_name, &violations, &continuity, color)?;
    Ok(violations.len())
}

/// Validate one file's content. A file that doesn't parse is reported as a
/// violation of its own, so a directory run keeps going past it.
fn collect_violations(
    file_name: &str,
    content: &str,
) -> (Vec<schema::Violation>, Vec<schema::ContinuityIssue>) {
    let parsed = if file_name.ends_with(FIXTURE_SUFFIX) {
        serde_json::from_str::<GroundTruth>(content).map(|gt| {
            let mut violations = schema::validate_chunks(&gt.chunks, ChunkRules { min_items: 1 });
            violations.extend(schema::validate_entities(&gt.entities));
            let continuity = schema::chunk_continuity(&gt.chunks, schema::DEFAULT_GAP_LIMIT);
            (violations, continuity)
        })
    } else {
        serde_json::from_str::<ParserOutput>(content).map(|pred| {
            let mut violations = schema::validate_chunks(&pred.chunks, ChunkRules::default());
            violations.extend(schema::validate_entities(pred.entities()));
            let continuity = schema::chunk_continuity(&pred.chunks, schema::DEFAULT_GAP_LIMIT);
            (violations, continuity)
        })
    };

    match parsed {
        Ok(result) => result,
        Err(err) => (
            vec![schema::Violation {
                item: schema::ItemRef { index: 0, id: None },
                constraint: format!("invalid JSON: {err}"),
            }],
            Vec::new(),
        ),
    }
}

fn score(
    prediction: PathBuf,
    ground_truth: PathBuf,
    parse_time: f64,
    json: bool,
    no_color: bool,
) -> anyhow::Result<()> {
    let color = ColorMode(!no_color && !json);
    let mut writer: Box<dyn Write> = Box::new(std::io::stdout());

    let gt = firegrade_core::load_ground_truth(&ground_truth)?;
    let pred = firegrade_core::load_parser_output(&prediction)?;

    let doc_type = DocumentType::classify(&gt.metadata.pdf_name);
    let config = apply_overrides(doc_type, &resolved_overrides()?);
    let measured = Measured {
        parse_time_seconds: parse_time,
        memory_mb: None,
    };
    let report = score_unit(&pred, &gt, &config, &ScoreParams::default(), &measured);

    if json {
        writeln!(writer, "{}", serde_json::to_string_pretty(&report)?)?;
    } else {
        output::print_score_report(&mut writer, &gt.metadata.pdf_name, doc_type, &report, color)?;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn bench(
    fixtures: PathBuf,
    replays: Vec<String>,
    workers: usize,
    output_path: Option<PathBuf>,
    format: String,
    subset: Option<usize>,
    serial: bool,
    skip_slow: bool,
    timeout: Option<f64>,
    no_color: bool,
) -> anyhow::Result<()> {
    let color = ColorMode(!no_color && output_path.is_none());
    let format: ExportFormat = format
        .parse()
        .map_err(|e: String| anyhow::anyhow!("{}", e))?;

    if !fixtures.is_dir() {
        anyhow::bail!("Fixtures directory not found: {}", fixtures.display());
    }
    if replays.is_empty() {
        anyhow::bail!("No parsers registered. Pass at least one --replay name=dir");
    }

    let mut parsers: Vec<Arc<dyn ParserBackend>> = Vec::with_capacity(replays.len());
    for spec in &replays {
        let (name, dir) = spec
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("Invalid --replay spec (expected name=dir): {spec}"))?;
        let dir = PathBuf::from(dir);
        if !dir.is_dir() {
            anyhow::bail!("Replay directory not found: {}", dir.display());
        }
        parsers.push(Arc::new(ReplayParser::new(name, dir)));
    }

    // CLI flags take precedence over config file and environment.
    let flags = Overrides {
        subset_size: subset,
        skip_slow: skip_slow.then_some(true),
        parallel: serial.then_some(false),
        timeout_seconds: timeout,
        ..Default::default()
    };
    let overrides = Overrides::merge(resolved_overrides()?, flags);
    overrides.validate()?;

    let options = BenchOptions {
        workers,
        overrides,
        params: ScoreParams::default(),
    };

    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {pos} graded | {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    bar.enable_steady_tick(std::time::Duration::from_millis(120));

    let progress_bar = bar.clone();
    let progress = Arc::new(move |event: BenchEvent| {
        if let BenchEvent::UnitFinished {
            pdf_name,
            parser_name,
            grade,
            failed,
        } = event
        {
            progress_bar.inc(1);
            let status = if failed { "FAILED" } else { grade.letter() };
            progress_bar.set_message(format!("{pdf_name} / {parser_name} [{status}]"));
        }
    });

    let outcome = run_benchmark(&fixtures, &parsers, &options, progress).await?;
    bar.finish_and_clear();

    let report = BenchReport::new(fixtures.display().to_string(), outcome);
    let rendered = render(&report, format).map_err(|e| anyhow::anyhow!("{}", e))?;

    if let Some(ref path) = output_path {
        std::fs::write(path, rendered)?;
        println!("Report written to {}", path.display());
        let mut writer: Box<dyn Write> = Box::new(std::io::stdout());
        output::print_ranking(&mut writer, &report.outcome.parsers, color)?;
    } else if format == ExportFormat::Text {
        let mut writer: Box<dyn Write> = Box::new(std::io::stdout());
        output::print_ranking(&mut writer, &report.outcome.parsers, color)?;
        output::print_failures(&mut writer, &report.outcome.units, color)?;
    } else {
        print!("{rendered}");
    }
    Ok(())
}

fn classify(names: Vec<String>, no_color: bool) -> anyhow::Result<()> {
    let color = ColorMode(!no_color);
    let mut writer: Box<dyn Write> = Box::new(std::io::stdout());

    if names.is_empty() {
        anyhow::bail!("No file names given");
    }

    let overrides = resolved_overrides()?;
    for name in &names {
        let doc_type = DocumentType::classify(name);
        let config = apply_overrides(doc_type, &overrides);
        output::print_classification(&mut writer, name, &config, color)?;
    }
    Ok(())
}
