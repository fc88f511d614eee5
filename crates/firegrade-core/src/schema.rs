//! Structural validation of chunk and entity lists.
//!
//! Field presence and enum/pattern constraints are enforced when a record is
//! deserialized (unknown fields are rejected by serde); the checks here cover
//! what the type system can't express: non-empty strings, 1-based pages,
//! ordered page ranges, the dimension grammar, and id uniqueness.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use crate::dimension::diameter_inches;
use crate::{Chunk, CoreError, Entity, GroundTruth, ParserOutput};

/// Identifies the offending item in a violation: list position plus the
/// entity id when one exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemRef {
    pub index: usize,
    pub id: Option<String>,
}

impl fmt::Display for ItemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Some(id) => write!(f, "item {} (id {:?})", self.index, id),
            None => write!(f, "item {}", self.index),
        }
    }
}

/// One failed constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub item: ItemRef,
    pub constraint: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.item, self.constraint)
    }
}

fn violation(index: usize, id: Option<&str>, constraint: impl Into<String>) -> Violation {
    Violation {
        item: ItemRef {
            index,
            id: id.map(str::to_string),
        },
        constraint: constraint.into(),
    }
}

/// Caller-declared preconditions for a chunk list.
///
/// Ground truth files declare `min_items = 1`; predictions keep the default 0
/// because a parser finding nothing is a matching-layer concern (precision 0),
/// not a schema violation.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChunkRules {
    pub min_items: usize,
}

/// Validate a chunk list. An empty return means valid.
pub fn validate_chunks(chunks: &[Chunk], rules: ChunkRules) -> Vec<Violation> {
    let mut violations = Vec::new();

    if chunks.len() < rules.min_items {
        violations.push(violation(
            0,
            None,
            format!(
                "list has {} chunks, at least {} required",
                chunks.len(),
                rules.min_items
            ),
        ));
    }

    for (i, chunk) in chunks.iter().enumerate() {
        if chunk.title.trim().is_empty() {
            violations.push(violation(i, None, "title must be non-empty"));
        }
        if chunk.start_page < 1 {
            violations.push(violation(i, None, "start_page must be >= 1"));
        }
        if chunk.end_page < 1 {
            violations.push(violation(i, None, "end_page must be >= 1"));
        }
        if chunk.start_page > chunk.end_page {
            violations.push(violation(
                i,
                None,
                format!(
                    "start_page ({}) > end_page ({})",
                    chunk.start_page, chunk.end_page
                ),
            ));
        }
    }

    violations
}

/// Validate an entity list. An empty return means valid.
pub fn validate_entities(entities: &[Entity]) -> Vec<Violation> {
    let mut violations = Vec::new();
    let mut seen_ids: HashSet<&str> = HashSet::new();

    for (i, entity) in entities.iter().enumerate() {
        let id = entity.id.as_str();
        if id.trim().is_empty() {
            violations.push(violation(i, None, "id must be non-empty"));
        } else if !seen_ids.insert(id) {
            violations.push(violation(i, Some(id), "duplicate id"));
        }
        if entity.material.trim().is_empty() {
            violations.push(violation(i, Some(id), "material must be non-empty"));
        }
        if diameter_inches(&entity.diameter).is_none() {
            violations.push(violation(
                i,
                Some(id),
                format!("diameter {:?} is not a valid dimension", entity.diameter),
            ));
        }
        if entity.location_page < 1 {
            violations.push(violation(i, Some(id), "location_page must be >= 1"));
        }
    }

    violations
}

/// A page-continuity issue. Reported, never a hard rejection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContinuityIssue {
    /// `start_page > end_page` within one chunk.
    InvertedRange { title: String },
    /// Gap between consecutive chunks larger than the limit.
    Gap {
        before: String,
        after: String,
        pages: u32,
    },
    /// Consecutive chunks overlap.
    Overlap {
        before: String,
        after: String,
        pages: u32,
    },
}

impl fmt::Display for ContinuityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContinuityIssue::InvertedRange { title } => {
                write!(f, "chunk {title:?}: start_page > end_page")
            }
            ContinuityIssue::Gap {
                before,
                after,
                pages,
            } => write!(f, "large gap ({pages} pages) between {before:?} and {after:?}"),
            ContinuityIssue::Overlap {
                before,
                after,
                pages,
            } => write!(f, "overlapping chunks ({pages} pages): {before:?} and {after:?}"),
        }
    }
}

/// Default gap, in pages, beyond which a continuity issue is reported.
pub const DEFAULT_GAP_LIMIT: u32 = 10;

/// Check page continuity of a chunk list: chunks sorted by start page should
/// not overlap, and gaps larger than `gap_limit` are flagged.
pub fn chunk_continuity(chunks: &[Chunk], gap_limit: u32) -> Vec<ContinuityIssue> {
    let mut issues = Vec::new();
    if chunks.is_empty() {
        return issues;
    }

    let mut sorted: Vec<&Chunk> = chunks.iter().collect();
    sorted.sort_by_key(|c| (c.start_page, c.end_page));

    for (i, chunk) in sorted.iter().enumerate() {
        if chunk.start_page > chunk.end_page {
            issues.push(ContinuityIssue::InvertedRange {
                title: chunk.title.clone(),
            });
        }
        if i > 0 {
            let prev = sorted[i - 1];
            // gap = pages strictly between prev.end and chunk.start
            let gap = i64::from(chunk.start_page) - i64::from(prev.end_page) - 1;
            if gap > i64::from(gap_limit) {
                issues.push(ContinuityIssue::Gap {
                    before: prev.title.clone(),
                    after: chunk.title.clone(),
                    pages: gap as u32,
                });
            } else if gap < 0 {
                issues.push(ContinuityIssue::Overlap {
                    before: prev.title.clone(),
                    after: chunk.title.clone(),
                    pages: (-gap) as u32,
                });
            }
        }
    }

    issues
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, CoreError> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn check(violations: Vec<Violation>, path: &Path) -> Result<(), CoreError> {
    if violations.is_empty() {
        return Ok(());
    }
    let joined = violations
        .iter()
        .map(Violation::to_string)
        .collect::<Vec<_>>()
        .join("; ");
    Err(CoreError::Schema(format!("{}: {joined}", path.display())))
}

/// Load and validate a `<stem>.fire.json` ground truth file.
///
/// Ground truth must have at least one chunk; unknown fields anywhere in the
/// chunk/entity lists are rejected during deserialization.
pub fn load_ground_truth(path: &Path) -> Result<GroundTruth, CoreError> {
    let gt: GroundTruth = read_json(path)?;
    check(
        validate_chunks(&gt.chunks, ChunkRules { min_items: 1 }),
        path,
    )?;
    check(validate_entities(&gt.entities), path)?;

    for issue in chunk_continuity(&gt.chunks, DEFAULT_GAP_LIMIT) {
        tracing::warn!(path = %path.display(), %issue, "ground truth continuity issue");
    }

    Ok(gt)
}

/// Load a persisted parser output (prediction) file. Empty lists are valid.
pub fn load_parser_output(path: &Path) -> Result<ParserOutput, CoreError> {
    let out: ParserOutput = read_json(path)?;
    check(validate_chunks(&out.chunks, ChunkRules::default()), path)?;
    check(validate_entities(out.entities()), path)?;
    Ok(out)
}
